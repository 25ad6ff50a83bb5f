//! Integration tests for the cache hierarchy.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;

use cache_hierarchy::cache::backend::{InMemoryBackend, KvBackend};
use cache_hierarchy::cache::disk::DiskTier;
use cache_hierarchy::cache::distributed::DistributedTier;
use cache_hierarchy::cache::memory::MemoryTier;
use cache_hierarchy::cache::{CacheCoordinator, CacheTier};
use cache_hierarchy::config::{
    Config, CoordinatorConfig, DiskTierConfig, DistributedTierConfig, MemoryTierConfig,
};

fn config_in(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.disk.cache_dir = dir.path().to_path_buf();
    config
}

#[tokio::test]
async fn test_memory_tier_capacity_scenario() {
    let tier = MemoryTier::with_max_entries(100).unwrap();
    for i in 0..150 {
        assert!(tier.set(&format!("key-{i}"), Bytes::from(format!("v{i}")), None).await);
    }

    let stats = tier.stats();
    assert_eq!(stats.entries, 100);
    assert_eq!(stats.evictions, 50);
    // The oldest 50 went first.
    assert!(!tier.contains("key-49").await);
    assert!(tier.contains("key-50").await);
    assert!(tier.contains("key-149").await);
}

#[tokio::test]
async fn test_disk_tier_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let config = DiskTierConfig {
        cache_dir: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let text = "lorem ipsum dolor sit amet ".repeat(4_000);

    {
        let tier = DiskTier::open(config.clone()).await.unwrap();
        assert!(tier.set("doc", Bytes::from(text.clone()), None).await);
        tier.flush().await;
    }

    let reopened = DiskTier::open(config).await.unwrap();
    assert_eq!(reopened.stats().entries, 1);
    assert_eq!(reopened.get("doc").await, Some(Bytes::from(text)));
}

#[tokio::test]
async fn test_distributed_clear_respects_namespace() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.set("shared:other", b"keep", None).await.unwrap();

    let tier = DistributedTier::with_backend(
        backend.clone(),
        DistributedTierConfig {
            enabled: true,
            namespace: "embeddings".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(tier.set("mine", Bytes::from_static(b"drop"), None).await);

    tier.clear().await;
    assert_eq!(backend.get("shared:other").await.unwrap(), Some(b"keep".to_vec()));
    assert_eq!(backend.get("embeddings:mine").await.unwrap(), None);
}

#[tokio::test]
async fn test_hierarchy_roundtrip_and_restart() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);

    let cache = CacheCoordinator::from_config(&config).await.unwrap();
    assert_eq!(cache.tiers().len(), 2);
    assert!(cache.set("emb:1", Bytes::from_static(b"[0.1,0.2]"), None).await);
    assert_eq!(cache.get("emb:1").await, Some(Bytes::from_static(b"[0.1,0.2]")));
    cache.shutdown().await;
    drop(cache);

    // A new process starts with a cold L1 but a warm disk.
    let cache = CacheCoordinator::from_config(&config).await.unwrap();
    assert_eq!(cache.get("emb:1").await, Some(Bytes::from_static(b"[0.1,0.2]")));
    let stats = cache.get_statistics();
    assert_eq!(stats.tiers["memory"].misses, 1);
    assert_eq!(stats.tiers["disk"].hits, 1);
}

#[tokio::test]
async fn test_disk_hits_are_promoted_to_memory() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);

    let disk = DiskTier::open(config.disk.clone()).await.unwrap();
    disk.set("hot", Bytes::from_static(b"value"), None).await;
    drop(disk);

    let cache = CacheCoordinator::from_config(&config).await.unwrap();
    for _ in 0..config.coordinator.promotion_threshold {
        assert_eq!(cache.get("hot").await, Some(Bytes::from_static(b"value")));
    }
    cache.flush().await;

    assert!(cache.tiers()[0].contains("hot").await);
    let disk_hits = cache.get_statistics().tiers["disk"].hits;
    cache.get("hot").await;
    assert_eq!(cache.get_statistics().tiers["disk"].hits, disk_hits);
}

#[tokio::test]
async fn test_promoted_disk_entry_expires_with_source() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    let cache = CacheCoordinator::from_config(&config).await.unwrap();

    let disk = &cache.tiers()[1];
    disk.set("session", Bytes::from_static(b"token"), Some(Duration::from_millis(150)))
        .await;
    for _ in 0..config.coordinator.promotion_threshold {
        assert_eq!(cache.get("session").await, Some(Bytes::from_static(b"token")));
    }
    cache.flush().await;
    assert!(cache.tiers()[0].contains("session").await);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(cache.get("session").await, None);
    assert!(!cache.tiers()[0].contains("session").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_access_keeps_tiers_consistent() {
    let tmp = TempDir::new().unwrap();
    let memory = Arc::new(
        MemoryTier::new(MemoryTierConfig {
            max_entries: 32,
            max_bytes: 4096,
        })
        .unwrap(),
    );
    let disk = Arc::new(
        DiskTier::open(DiskTierConfig {
            cache_dir: tmp.path().to_path_buf(),
            ..Default::default()
        })
        .await
        .unwrap(),
    );
    let tiers: Vec<Arc<dyn CacheTier>> = vec![memory.clone(), disk.clone()];
    let cache = CacheCoordinator::new(tiers, CoordinatorConfig::default()).unwrap();

    let workers: Vec<_> = (0..8u8)
        .map(|worker| {
            let cache = cache.clone();
            tokio::spawn(async move {
                for round in 0..40usize {
                    // Contended keys: any interleaving is acceptable.
                    let shared = format!("shared:{}", round % 16);
                    let value = Bytes::from(vec![worker; 1 + round % 64]);
                    cache.set(&shared, value, None).await;
                    cache.get(&shared).await;

                    // Keys owned by one worker: reads see its own writes and
                    // a delete is never undone by background copies.
                    let own = format!("own:{worker}:{}", round % 4);
                    let value = Bytes::from(format!("{worker}-{round}"));
                    assert!(cache.set(&own, value.clone(), None).await);
                    assert_eq!(cache.get(&own).await, Some(value.clone()));
                    assert_eq!(cache.get(&own).await, Some(value));
                    assert!(cache.delete(&own).await);
                    assert_eq!(cache.get(&own).await, None);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.await.unwrap();
    }
    cache.flush().await;

    let stats = memory.stats();
    assert!(stats.entries <= 32);
    assert_eq!(stats.entries as usize, memory.len());
    let mut resident_bytes = 0;
    for key in memory.keys() {
        resident_bytes += memory.get(&key).await.map_or(0, |v| v.len() as u64);
    }
    assert_eq!(stats.size_bytes, resident_bytes);
    assert!(stats.size_bytes <= 4096);

    for worker in 0..8 {
        for slot in 0..4 {
            let own = format!("own:{worker}:{slot}");
            assert!(!memory.contains(&own).await, "{own} resurrected in memory");
            assert!(!disk.contains(&own).await, "{own} resurrected on disk");
        }
    }
    for slot in 0..16 {
        assert!(disk.contains(&format!("shared:{slot}")).await);
    }
    assert_eq!(disk.stats().entries, 16);
}

#[tokio::test]
async fn test_ttl_expiry_across_tiers() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    let cache = CacheCoordinator::from_config(&config).await.unwrap();

    cache
        .set("temp", Bytes::from_static(b"v"), Some(Duration::from_millis(40)))
        .await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(cache.get("temp").await, None);
    for tier in cache.tiers() {
        assert!(!tier.contains("temp").await, "{} still holds it", tier.name());
    }
    let disk = DiskTier::open(config.disk.clone()).await.unwrap();
    assert!(!disk.blob_path("temp").exists());
}

#[tokio::test]
async fn test_unavailable_disk_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let mut config = Config::default();
    config.disk.cache_dir = blocker.join("cache");
    let cache = CacheCoordinator::from_config(&config).await.unwrap();

    assert_eq!(cache.tiers().len(), 1);
    assert!(cache.set("k", Bytes::from_static(b"v"), None).await);
    assert_eq!(cache.get("k").await, Some(Bytes::from_static(b"v")));
}

#[tokio::test]
async fn test_unreachable_redis_degrades() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(&tmp);
    config.distributed.enabled = true;
    // Nothing listens on the discard port.
    config.distributed.url = "redis://127.0.0.1:9/".to_string();

    let cache = CacheCoordinator::from_config(&config).await.unwrap();
    assert_eq!(cache.tiers().len(), 3);

    // Memory and disk still work; only the overall write result reflects L3.
    assert!(!cache.set("k", Bytes::from_static(b"v"), None).await);
    assert_eq!(cache.get("k").await, Some(Bytes::from_static(b"v")));
    cache.maintain().await;
}
