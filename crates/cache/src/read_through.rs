//! Read-through access for the trie layer
//!
//! A cache miss is resolved against the persistent store and the result is
//! written back, so repeated reads of the same node stay in memory.

use crate::key::NodeKey;
use crate::traits::TrieNodeCache;
use bytes::Bytes;

/// Persistent store boundary the cache shields
#[cfg_attr(test, mockall::automock(type Error = std::io::Error;))]
pub trait NodeSource: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Read a node from durable storage; `Ok(None)` when it does not exist.
    fn read_node(&self, key: &NodeKey) -> Result<Option<Vec<u8>>, Self::Error>;
}

/// A cache paired with the store it fronts
pub struct ReadThrough<C, S> {
    cache: C,
    source: S,
}

impl<C, S> ReadThrough<C, S>
where
    C: TrieNodeCache,
    S: NodeSource,
{
    pub fn new(cache: C, source: S) -> Self {
        Self { cache, source }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Serve `key` from the cache, falling back to the store on a miss.
    ///
    /// Store errors are returned untouched and nothing is cached for them.
    pub fn read(&self, key: &NodeKey) -> Result<Option<Bytes>, S::Error> {
        if let Some(value) = self.cache.get(key) {
            return Ok(Some(value));
        }

        match self.source.read_node(key)? {
            Some(value) => {
                self.cache.set(key, &value);
                Ok(Some(Bytes::from(value)))
            }
            None => {
                tracing::trace!(key = %key, "Node absent from cache and store");
                Ok(None)
            }
        }
    }

    pub fn into_parts(self) -> (C, S) {
        (self.cache, self.source)
    }
}
