// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dedup cache capability: `inflight:*` locks and `processed:*` markers.
//! The in-memory implementation serves single-instance deployments; the
//! KV-backed one gives multi-instance consumers an atomic set-if-absent
//! at the broker.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;

#[async_trait]
pub trait DedupCache: Send + Sync {
    /// Atomically claim `key`; `false` when it already exists.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> anyhow::Result<bool>;

    /// Set `key` unconditionally.
    async fn set(&self, key: &str, ttl: Duration) -> anyhow::Result<()>;

    async fn exists(&self, key: &str) -> anyhow::Result<bool>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

// -- In-memory ----------------------------------------------------------------

/// Single-process cache with lazy expiry.
#[derive(Default)]
pub struct MemoryCache {
    entries: parking_lot::Mutex<HashMap<String, Instant>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupCache for MemoryCache {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(expiry) if *expiry > now => Ok(false),
            _ => {
                entries.insert(key.to_owned(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn set(&self, key: &str, ttl: Duration) -> anyhow::Result<()> {
        self.entries.lock().insert(key.to_owned(), Instant::now() + ttl);
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(expiry) if *expiry > now => Ok(true),
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

// -- JetStream KV -------------------------------------------------------------

/// Broker-backed cache. Keys are routed by their `inflight:`/`processed:`
/// prefix to a bucket whose max-age carries the TTL; the per-call ttl is
/// therefore fixed at bucket creation.
pub struct KvDedupCache {
    inflight: async_nats::jetstream::kv::Store,
    processed: async_nats::jetstream::kv::Store,
}

impl KvDedupCache {
    pub async fn connect(
        js: &async_nats::jetstream::Context,
        inflight_ttl: Duration,
        processed_ttl: Duration,
    ) -> anyhow::Result<Self> {
        let inflight = js
            .create_key_value(async_nats::jetstream::kv::Config {
                bucket: "preauth_inflight".to_owned(),
                max_age: inflight_ttl,
                ..Default::default()
            })
            .await?;
        let processed = js
            .create_key_value(async_nats::jetstream::kv::Config {
                bucket: "preauth_processed".to_owned(),
                max_age: processed_ttl,
                ..Default::default()
            })
            .await?;
        Ok(Self { inflight, processed })
    }

    fn route<'a>(&self, key: &'a str) -> (&async_nats::jetstream::kv::Store, &'a str) {
        match key.split_once(':') {
            Some(("inflight", rest)) => (&self.inflight, rest),
            Some((_, rest)) => (&self.processed, rest),
            None => (&self.processed, key),
        }
    }
}

#[async_trait]
impl DedupCache for KvDedupCache {
    async fn set_if_absent(&self, key: &str, _ttl: Duration) -> anyhow::Result<bool> {
        let (store, key) = self.route(key);
        match store.create(key, "1".into()).await {
            Ok(_) => Ok(true),
            Err(e)
                if e.kind() == async_nats::jetstream::kv::CreateErrorKind::AlreadyExists =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, _ttl: Duration) -> anyhow::Result<()> {
        let (store, key) = self.route(key);
        store.put(key, "1".into()).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let (store, key) = self.route(key);
        Ok(store.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let (store, key) = self.route(key);
        store.purge(key).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "dedup_tests.rs"]
mod tests;
