//! Memoization through a full hierarchy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use cache_hierarchy::cache::{cache_key, cached, CacheCoordinator, Memoizer};
use cache_hierarchy::config::Config;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EmbedArgs {
    model: String,
    text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Embedding {
    dims: usize,
    values: Vec<f32>,
}

fn fake_embed(args: &EmbedArgs) -> Embedding {
    let values: Vec<f32> = args.text.bytes().take(4).map(|b| b as f32 / 255.0).collect();
    Embedding {
        dims: values.len(),
        values,
    }
}

async fn hierarchy(dir: &TempDir) -> CacheCoordinator {
    let mut config = Config::default();
    config.disk.cache_dir = dir.path().to_path_buf();
    CacheCoordinator::from_config(&config).await.unwrap()
}

#[tokio::test]
async fn test_memoized_results_persist_across_restart() {
    let tmp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let args = EmbedArgs {
        model: "mini".to_string(),
        text: "hello world".to_string(),
    };

    for _ in 0..2 {
        let cache = hierarchy(&tmp).await;
        let counter = calls.clone();
        let embed = cached(
            Some(Duration::from_secs(3600)),
            cache.clone(),
            "embed",
            move |args: EmbedArgs| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(fake_embed(&args))
                }
            },
        );

        let first = embed.call(args.clone()).await.unwrap();
        let second = embed.call(args.clone()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, fake_embed(&args));
        cache.shutdown().await;
    }

    // Computed once by the first instance, served from disk by the second.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_memoizer_uses_content_addressed_keys() {
    let tmp = TempDir::new().unwrap();
    let cache = hierarchy(&tmp).await;
    let memo = Memoizer::from_config(cache.clone(), &Config::default().memoize);
    assert_eq!(memo.ttl(), Some(Duration::from_secs(86_400)));

    let args = EmbedArgs {
        model: "mini".to_string(),
        text: "abc".to_string(),
    };
    let computed = fake_embed(&args);
    let value: Result<Embedding, String> = memo
        .get_or_compute("embed", &args, || async move { Ok(computed) })
        .await;
    let value = value.unwrap();

    let key = cache_key("embed", &args).unwrap();
    let raw = cache.get(&key).await.unwrap();
    assert_eq!(serde_json::from_slice::<Embedding>(&raw).unwrap(), value);
}
