//! Caching simulated request handlers and invalidating by key prefix.
//!
//! Run with `RUST_LOG=pathcache=debug` to watch the key builds, hits, misses
//! and sweeps.

use std::sync::Arc;
use std::time::Duration;

use pathcache::{Attribute, AttributeValue, KeySpec, MemoryStore, PathCache, PrefixValues};

/// Stand-in for "who is making this request" state a framework would carry.
fn current_user() -> AttributeValue {
    AttributeValue::One("user@example.com".to_string())
}

async fn render_messages(kind: &str, page: &str) -> String {
    // the expensive part a real handler would pay on every call
    tokio::time::sleep(Duration::from_millis(150)).await;
    format!("<ul>{kind} messages, page {page}</ul>")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cache = Arc::new(
        PathCache::new(MemoryStore::<String>::new()).with_default_ttl(Duration::from_secs(300)),
    );

    // /messages?type=sent&page=N, keyed by path/method/user/type+page
    let messages_spec = |kind: &'static str, page: &'static str| {
        KeySpec::new()
            .path("/messages")
            .method("GET")
            .resolver(Attribute::User, || Ok(current_user()))
            .get(vec![kind, page])
    };

    for page in ["1", "2", "1"] {
        let started = std::time::Instant::now();
        let body = cache
            .get_or_compute(&messages_spec("sent", page), None, || async move {
                Ok(render_messages("sent", page).await)
            })
            .await?;
        println!(
            "GET /messages?type=sent&page={page} -> {body} ({:?})",
            started.elapsed()
        );
    }

    // A new message arrived: every cached page for this user is stale now.
    // One prefix invalidation drops them all without knowing the page numbers.
    let dropped = cache
        .invalidate(
            &messages_spec("sent", "1"),
            &PrefixValues::new()
                .path("/messages")
                .method("GET")
                .user(current_user()),
            true,
        )
        .await?;
    println!("invalidated {dropped} cached pages after new message");

    let body = cache
        .get_or_compute(&messages_spec("sent", "1"), None, || async move {
            Ok(render_messages("sent", "1").await)
        })
        .await?;
    println!("GET /messages?type=sent&page=1 -> {body} (recomputed)");

    Ok(())
}
