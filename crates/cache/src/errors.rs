//! Error handling for the trie node cache
//!
//! Steady-state operations (get, has, set) never fail. Only lifecycle
//! operations surface these errors: construction, snapshot save and load,
//! and close.

mod conversions;
mod display;
mod recovery;
mod types;

pub use types::*;
