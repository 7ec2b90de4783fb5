use super::*;
use crate::storage::{read_snapshot_file, shard_file_name};
use prometheus::Registry;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn key(n: u32) -> NodeKey {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&n.to_be_bytes());
    NodeKey::new(bytes)
}

fn config(cache_type: CacheType) -> TrieNodeCacheConfig {
    TrieNodeCacheConfig::builder()
        .with_cache_type(cache_type)
        .with_max_bytes(4 << 20)
        .with_shard_count(4)
        .with_stats_interval(None)
        .build()
        .unwrap()
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_facade_dispatches_to_strategy() {
    for cache_type in [CacheType::Lru, CacheType::Fast, CacheType::Hybrid] {
        let cache = NodeCache::open(config(cache_type)).unwrap();
        assert_eq!(cache.cache_type(), cache_type);

        cache.set(&key(1), b"account");
        assert_eq!(cache.get(&key(1)).as_deref(), Some(&b"account"[..]));
        assert_eq!(cache.has(&key(1)), cache.get(&key(1)));
        assert!(cache.get(&key(2)).is_none());

        let stats = cache.update_stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(cache.latest_stats(), stats);
        assert_eq!(cache.tier_stats().is_some(), cache_type == CacheType::Hybrid);
    }
}

#[test]
fn test_close_flushes_and_reopen_restores() {
    let dir = TempDir::new().unwrap();
    let config = TrieNodeCacheConfig {
        snapshot_dir: Some(dir.path().to_path_buf()),
        ..config(CacheType::Lru)
    };

    let cache = NodeCache::open(config.clone()).unwrap();
    assert_eq!(cache.load_report(), LoadReport::default());
    for i in 0..500 {
        cache.set(&key(i), &i.to_le_bytes());
    }
    cache.close().unwrap();
    assert!(dir.path().join(shard_file_name(0)).exists());

    let reopened = NodeCache::open(config).unwrap();
    let report = reopened.load_report();
    assert_eq!(report.files_loaded, 4);
    assert_eq!(report.entries_restored, 500);
    for i in 0..500u32 {
        assert_eq!(reopened.get(&key(i)).as_deref(), Some(&i.to_le_bytes()[..]));
    }
}

#[test]
fn test_close_is_idempotent_and_final() {
    let cache = NodeCache::open(config(CacheType::Fast)).unwrap();
    cache.set(&key(1), b"x");

    cache.close().unwrap();
    cache.close().unwrap();
    assert!(cache.is_closed());
    assert!(cache.get(&key(1)).is_none());

    let dir = TempDir::new().unwrap();
    let err = cache.save_to_file(dir.path(), 2).unwrap_err();
    assert!(matches!(err, CacheError::Closed { .. }));
}

#[test]
fn test_close_reports_flush_failure() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let cache = NodeCache::open(TrieNodeCacheConfig {
        snapshot_dir: Some(blocker),
        ..config(CacheType::Lru)
    })
    .unwrap();
    cache.set(&key(1), b"x");

    assert!(matches!(cache.close(), Err(CacheError::Io { .. })));
    assert!(cache.is_closed());
}

#[test]
fn test_periodic_checkpoint() {
    let dir = TempDir::new().unwrap();
    let snapshot = TrieNodeCacheConfig {
        snapshot_dir: Some(dir.path().to_path_buf()),
        ..config(CacheType::Fast)
    };

    let cache = NodeCache::open(TrieNodeCacheConfig {
        save_period: Some(Duration::from_millis(20)),
        ..snapshot.clone()
    })
    .unwrap();
    cache.set(&key(7), b"storage slot");

    // Wait for a checkpoint taken after the write
    let written = wait_until(Duration::from_secs(10), || {
        let saved: usize = (0..4)
            .filter_map(|shard| read_snapshot_file(&dir.path().join(shard_file_name(shard))).ok())
            .map(|file| file.records().count())
            .sum();
        saved == 1
    });
    assert!(written, "checkpoint never captured the entry");
    drop(cache);

    let restored = NodeCache::open(snapshot).unwrap();
    assert_eq!(restored.get(&key(7)).as_deref(), Some(&b"storage slot"[..]));
}

#[test]
fn test_background_stats_feed_metrics() {
    let registry = Registry::new();
    let metrics = CacheMetrics::register(&registry, "state").unwrap();
    let mut config = config(CacheType::Lru);
    config.stats_interval = Some(Duration::from_millis(10));

    let cache = NodeCache::open_with_metrics(config, metrics.clone()).unwrap();
    cache.set(&key(1), b"x");
    cache.get(&key(1));

    assert!(wait_until(Duration::from_secs(10), || cache.latest_stats().hits == 1));
    let text = metrics.encode_text().unwrap();
    assert!(text.contains(r#"trienode_cache_stats{cache="state",metric="sets"} 1"#));

    cache.close().unwrap();
}

#[test]
fn test_open_rejects_invalid_config() {
    let mut bad = config(CacheType::Fast);
    bad.save_concurrency = 0;
    assert!(matches!(
        NodeCache::open(bad),
        Err(CacheError::Configuration { .. })
    ));
}

#[test]
fn test_shared_across_threads() {
    let cache = Arc::new(NodeCache::open(config(CacheType::Hybrid)).unwrap());
    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..1000 {
                    let k = key(t * 1000 + i);
                    cache.set(&k, &k.as_bytes()[..4]);
                    if let Some(v) = cache.get(&k) {
                        assert_eq!(&v[..], &k.as_bytes()[..4]);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(cache.update_stats().sets, 4000);
}
