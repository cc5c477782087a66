//! The Reconnector: polls *active* tunnels for transport-declared expiry
//! and swaps in replacement instances.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use super::record::{Age, TunnelRecord, TunnelState};
use super::TunnelPool;
use crate::transport::Transport;

/// Manager poll interval floor.
const POLL_INTERVAL_SECS: u64 = 1;
/// Upper bound (exclusive) on the poll interval's jitter, in milliseconds.
const POLL_JITTER_MS: u64 = 1_000;
/// Upper bound (exclusive) on a single retry's jitter, in milliseconds
/// (shared with the Activator's bounded-retry open procedure).
const RETRY_JITTER_MS: u64 = 1_000;

/// Spawn the Reconnector manager task.
pub fn spawn_manager(pool: Arc<TunnelPool>) {
    tokio::spawn(async move { manager_loop(pool).await });
}

async fn manager_loop(pool: Arc<TunnelPool>) {
    loop {
        let jitter_ms = pool.jitter(POLL_JITTER_MS).await;
        tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS) + Duration::from_millis(jitter_ms))
            .await;

        let expired = poll_expired_tunnels(&pool).await;
        for url in expired {
            let pool = pool.clone();
            tokio::spawn(async move { worker(pool, url).await });
        }
    }
}

/// Under the mutex: for every active record not already reconnecting, ask
/// the transport whether it has timed out. Flip `reconnect = true` on the ones
/// that have, and return their URLs for worker spawning after the lock is
/// released.
async fn poll_expired_tunnels(pool: &Arc<TunnelPool>) -> Vec<String> {
    let mut inner = pool.inner.lock().await;
    let now = Instant::now();

    let candidates: Vec<_> = inner
        .active
        .iter()
        .filter(|r| !r.reconnect)
        .filter_map(|r| r.transport.clone().map(|h| (r.url.clone(), h)))
        .collect();

    let mut expired = Vec::new();
    for (url, handle) in candidates {
        if pool.transport.timeout(&handle, now).await {
            expired.push(url);
        }
    }

    for url in &expired {
        if let Some(record) = inner.active.get_mut(url) {
            record.reconnect = true;
        }
    }
    expired
}

/// Build a fresh replacement record and run the same bounded-retry open
/// procedure as the Activator worker. The
/// record is not stored anywhere until the open succeeds, so no external
/// caller can flip its state mid-attempt — unlike the Activator's worker,
/// this loop needs no per-attempt state checkpoint.
async fn worker(pool: Arc<TunnelPool>, url: String) {
    let id = pool.ids.next();
    let mut record = TunnelRecord::new(url.clone(), id, Age::new(pool.config.init_age));
    record.state = TunnelState::Opening;

    let mut retries_left = pool.config.max_retries;
    let mut backoff = Duration::from_secs(pool.config.base_backoff_secs);
    let mut ok = false;

    loop {
        match pool.transport.open(&url).await {
            Some(handle) => {
                record.transport = Some(handle);
                ok = true;
                break;
            }
            None => {
                retries_left -= 1;
                if retries_left == 0 {
                    break;
                }
                let jitter_ms = pool.jitter(RETRY_JITTER_MS).await;
                tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
                backoff *= pool.config.backoff_multiplier;
            }
        }
    }

    if ok {
        record.state = TunnelState::Open;
        succeed(&pool, &url, record).await;
    } else {
        fail(&pool, &url).await;
    }
    pool.persist().await;
}

/// On a successful reconnect, try to swap the fresh record into *active*
/// and *cache* in place of the old one.
async fn succeed(pool: &Arc<TunnelPool>, url: &str, fresh: TunnelRecord) {
    let mut inner = pool.inner.lock().await;
    let in_active = inner.active.lookup_index(url).is_some();
    let in_cache = inner.cache.lookup_index(url).is_some();

    if in_active {
        let old_active = inner
            .active
            .replace(fresh.clone())
            .expect("checked present above");
        inner.cache.replace(fresh);
        drop(inner);

        if let Some(handle) = old_active.transport {
            pool.transport.close(&handle).await;
        }
        info!("reconnector: swapped in fresh tunnel for {url}");
    } else if in_cache {
        // The tunnel was removed from *active* (e.g. by `delete()`) while we
        // were reconnecting. Discard the freshly opened handle and mark the
        // existing cache record dead rather than resurrecting it.
        let fresh_handle = fresh.transport;
        if let Some(cache_record) = inner.cache.get_mut(url) {
            cache_record.state = TunnelState::Dead;
            cache_record.reconnect = false;
        }
        drop(inner);
        if let Some(handle) = fresh_handle {
            pool.transport.close(&handle).await;
        }
    } else {
        // The URL disappeared from both sets entirely — discard the new
        // record outright.
        drop(inner);
        if let Some(handle) = fresh.transport {
            pool.transport.close(&handle).await;
        }
    }
}

/// On a failed reconnect, delete the old record from *active*, close its
/// transport, mark it dead, and clear `reconnect`. The worker's own
/// (never-stored) record is simply dropped; `url` stays an owned `String`
/// for the worker's entire lifetime, so there's no borrow to untangle here.
async fn fail(pool: &Arc<TunnelPool>, url: &str) {
    let mut inner = pool.inner.lock().await;
    inner.active.delete(url);
    let handle = inner.cache.get_mut(url).and_then(|record| {
        record.state = TunnelState::Dead;
        record.reconnect = false;
        record.transport.take()
    });
    drop(inner);
    if let Some(handle) = handle {
        pool.transport.close(&handle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::record::IdGenerator;
    use crate::transport::mock::MockTransport;
    use crate::transport::Transport;

    fn test_config() -> PoolConfig {
        PoolConfig {
            cache_path: std::env::temp_dir()
                .join(format!("tunnelpool-reconnector-test-{}", std::process::id()))
                .to_string_lossy()
                .into_owned(),
            max_init_open: 8,
            max_retries: 3,
            base_backoff_secs: 0,
            backoff_multiplier: 1,
            init_age: 16,
            default_mtu: 1400,
        }
    }

    async fn seed_active(pool: &Arc<TunnelPool>, url: &str, transport: &Arc<MockTransport>) {
        let ids = IdGenerator::new();
        let handle = transport.open(url).await.unwrap();
        let mut record = TunnelRecord::new(url.to_string(), ids.next(), Age::new(16));
        record.state = TunnelState::Open;
        record.transport = Some(handle);
        let mut inner = pool.inner.lock().await;
        inner.cache.insert(record.clone());
        inner.active.insert(record);
    }

    #[tokio::test]
    async fn successful_reconnect_swaps_in_fresh_tunnel_and_closes_old() {
        let transport = Arc::new(MockTransport::new());
        let pool = TunnelPool::init(transport.clone(), test_config(), "tunnelpool-test");
        seed_active(&pool, "a://swap", &transport).await;
        let old_id = {
            let inner = pool.inner.lock().await;
            inner.active.get("a://swap").unwrap().id
        };

        worker(pool.clone(), "a://swap".to_string()).await;

        let inner = pool.inner.lock().await;
        let new_record = inner.active.get("a://swap").unwrap();
        assert_ne!(new_record.id, old_id);
        assert_eq!(new_record.state, TunnelState::Open);
        assert_eq!(transport.close_calls.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn failed_reconnect_removes_from_active_and_marks_cache_dead() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_always("a://gone");
        let pool = TunnelPool::init(transport.clone(), test_config(), "tunnelpool-test");
        seed_active(&pool, "a://gone", &transport).await;

        worker(pool.clone(), "a://gone".to_string()).await;

        let inner = pool.inner.lock().await;
        assert!(inner.active.get("a://gone").is_none());
        assert_eq!(inner.cache.get("a://gone").unwrap().state, TunnelState::Dead);
    }

    #[tokio::test]
    async fn poll_flags_timed_out_tunnels_for_reconnect() {
        let transport = Arc::new(MockTransport::new());
        let pool = TunnelPool::init(transport.clone(), test_config(), "tunnelpool-test");
        seed_active(&pool, "a://expiring", &transport).await;
        transport.mark_timed_out("a://expiring");

        let expired = poll_expired_tunnels(&pool).await;
        assert_eq!(expired, vec!["a://expiring".to_string()]);

        let inner = pool.inner.lock().await;
        assert!(inner.active.get("a://expiring").unwrap().reconnect);
    }
}
