//! The Activator: background fleet manager plus per-tunnel open workers.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::record::{Age, TunnelState};
use super::TunnelPool;
use crate::transport::{Handle, Transport};

/// Manager pass interval floor.
const PASS_INTERVAL_SECS: u64 = 150;
/// Upper bound (exclusive) on the manager pass's jitter, in milliseconds.
const PASS_JITTER_MS: u64 = 10_000;
/// Upper bound (exclusive) on a single retry's jitter, in milliseconds.
const RETRY_JITTER_MS: u64 = 1_000;

/// Spawn the Activator manager task.
pub fn spawn_manager(pool: Arc<TunnelPool>) {
    tokio::spawn(async move { manager_loop(pool).await });
}

/// Spawn a single Activator worker for `url`. Used
/// both by the manager and directly by [`TunnelPool::add`].
pub fn spawn_worker(pool: Arc<TunnelPool>, url: String) {
    tokio::spawn(async move { worker(pool, url).await });
}

async fn manager_loop(pool: Arc<TunnelPool>) {
    loop {
        let (to_open, active_len) = claim_closed_tunnels(&pool).await;
        let budget = budget_for(&pool, active_len);
        let exhausted = to_open.len() as u32 >= budget;

        for url in to_open {
            spawn_worker(pool.clone(), url);
        }

        // `active_len` above was sampled under the mutex in the same pass
        // that computed the budget, so both the in-pass budget and this
        // loop condition use one consistent snapshot rather than an
        // unlocked read.
        if exhausted {
            info!("activator: budget exhausted this pass, manager exiting");
            return;
        }
        if active_len >= pool_max_init_open(&pool) {
            return;
        }

        let jitter_ms = pool.jitter(PASS_JITTER_MS).await;
        tokio::time::sleep(Duration::from_secs(PASS_INTERVAL_SECS) + Duration::from_millis(jitter_ms))
            .await;
    }
}

fn pool_max_init_open(pool: &TunnelPool) -> usize {
    pool.config.max_init_open as usize
}

fn budget_for(pool: &TunnelPool, active_len: usize) -> u32 {
    let max_init_open = i64::from(pool.config.max_init_open);
    (max_init_open - active_len as i64 + 1).max(0) as u32
}

/// Under the mutex: compute the open budget, walk *cache* claiming up to
/// `budget` `Closed` records into `Opening`, and return their URLs plus the
/// active-set length sampled in the same pass.
async fn claim_closed_tunnels(pool: &Arc<TunnelPool>) -> (Vec<String>, usize) {
    let mut inner = pool.inner.lock().await;
    let active_len = inner.active.len();
    let budget = budget_for(pool, active_len);

    let mut claimed = Vec::new();
    for record in inner.cache.iter_mut() {
        if claimed.len() as u32 >= budget {
            break;
        }
        if record.state == TunnelState::Closed {
            record.state = TunnelState::Opening;
            claimed.push(record.url.clone());
        }
    }
    (claimed, active_len)
}

/// Bounded exponential-backoff open attempt loop.
///
/// Checkpoints on `state == Opening` before every attempt: if `delete()` or
/// `free()` moved the record to `Closing`/`Deleting` while we slept, we stop
/// attempting and let the caller's state dispatch take over.
async fn worker(pool: Arc<TunnelPool>, url: String) {
    let mut retries_left = pool.config.max_retries;
    let mut backoff = Duration::from_secs(pool.config.base_backoff_secs);
    let mut ok = false;
    let mut opened: Option<Handle> = None;

    loop {
        let still_opening = {
            let inner = pool.inner.lock().await;
            matches!(inner.cache.get(&url).map(|r| r.state), Some(TunnelState::Opening))
        };
        if !still_opening {
            break;
        }

        match pool.transport.open(&url).await {
            Some(handle) => {
                opened = Some(handle);
                ok = true;
                break;
            }
            None => {
                retries_left -= 1;
                if retries_left == 0 {
                    ok = false;
                    break;
                }
                let jitter_ms = pool.jitter(RETRY_JITTER_MS).await;
                tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
                backoff *= pool.config.backoff_multiplier;
            }
        }
    }

    finish(&pool, &url, ok, opened).await;
    pool.persist().await;
}

/// Re-acquire the mutex and dispatch on the record's current state.
async fn finish(pool: &Arc<TunnelPool>, url: &str, ok: bool, opened: Option<Handle>) {
    let mut inner = pool.inner.lock().await;
    let Some(record) = inner.cache.get_mut(url) else {
        drop(inner);
        if let Some(handle) = opened {
            pool.transport.close(&handle).await;
        }
        return;
    };

    match record.state {
        TunnelState::Deleting => {
            // Momentarily flip through Open so `delete()` can find a
            // well-formed state if it races this dispatch; the worker is
            // the record's owner-of-last-resort and frees it right after.
            record.state = TunnelState::Open;
            let freed = inner.cache.delete(url);
            drop(inner);
            if let Some(handle) = opened {
                pool.transport.close(&handle).await;
            } else if let Some(freed) = freed {
                if let Some(handle) = freed.transport {
                    pool.transport.close(&handle).await;
                }
            }
        }
        TunnelState::Closing => {
            let old_handle = record.transport.take();
            record.state = TunnelState::Closed;
            drop(inner);
            if let Some(handle) = opened {
                pool.transport.close(&handle).await;
            }
            if let Some(handle) = old_handle {
                pool.transport.close(&handle).await;
            }
        }
        TunnelState::Opening if ok => {
            info!("activator: opened tunnel {url}");
            record.state = TunnelState::Open;
            record.age = Age::new(pool.config.init_age);
            record.transport = opened;
            let active_copy = record.clone();
            inner.active.insert(active_copy);
            drop(inner);
        }
        TunnelState::Opening => {
            warn!("activator: failed to open tunnel {url} after {} attempts", pool.config.max_retries);
            record.state = TunnelState::Dead;
            record.age = record.age.decremented();
            drop(inner);
        }
        other => {
            drop(inner);
            let diagnostic =
                crate::error::PoolError::InvariantViolation(format!("{url} in {other:?}"));
            error!("activator: {diagnostic}");
            panic!("{diagnostic}");
        }
    }
}
