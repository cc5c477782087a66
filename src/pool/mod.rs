//! The tunnel pool — control API, lifecycle manager, and the `TunnelRecord`
//! / `TunnelSet` / `TunnelHistory` / Persistence / Selector building blocks
//! it coordinates.
//!
//! `TunnelPool` owns exactly one `tokio::sync::Mutex` guarding both
//! `TunnelSet`s, the history table, and the shared jitter RNG — a single
//! global lock rather than one per data structure. Every control-API
//! method takes that lock only long enough to inspect or mutate state;
//! transport calls and persistence I/O always happen after it is released.

pub mod activator;
pub mod history;
pub mod persistence;
pub mod reconnector;
pub mod record;
pub mod selector;
pub mod set;

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::transport::{Packet, Transport};

use history::TunnelHistory;
use persistence::CachePaths;
use record::{Age, IdGenerator, TunnelRecord, TunnelState};
use set::TunnelSet;

/// Which of the two `TunnelSet`s a caller wants rendered or inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelListKind {
    Active,
    All,
}

/// State guarded by the pool's single mutex.
struct Inner {
    cache: TunnelSet,
    active: TunnelSet,
    history: TunnelHistory,
    rng: StdRng,
}

/// Concurrent manager of outbound tunnels.
///
/// Constructed via [`TunnelPool::init`], populated from disk via
/// [`TunnelPool::load_cache`], then set running via [`TunnelPool::open`] —
/// callers must follow that `init` → `load_cache` → `open` ordering.
pub struct TunnelPool {
    inner: Mutex<Inner>,
    ids: IdGenerator,
    transport: Arc<dyn Transport>,
    paths: CachePaths,
    program: String,
    config: PoolConfig,
}

impl TunnelPool {
    /// Set up the mutex, the RNG, and the record-id generator. HTTP route
    /// registration is the binary's job — it wires `render_list` into
    /// `axum` routes once this `Arc` exists (see `src/http.rs`).
    pub fn init(transport: Arc<dyn Transport>, config: PoolConfig, program: impl Into<String>) -> Arc<Self> {
        let paths = CachePaths::derive(config.cache_path.as_str());
        Arc::new(Self {
            inner: Mutex::new(Inner {
                cache: TunnelSet::new(),
                active: TunnelSet::new(),
                history: TunnelHistory::new(),
                rng: StdRng::from_entropy(),
            }),
            ids: IdGenerator::new(),
            transport,
            paths,
            program: program.into(),
            config,
        })
    }

    /// Load the cache file (falling back to its backup) and populate
    /// *cache* with `Closed` records. Call once, before [`TunnelPool::open`].
    pub async fn load_cache(&self) {
        let parsed = persistence::read(&self.paths).await;
        let mut inner = self.inner.lock().await;
        for record in parsed {
            let id = self.ids.next();
            inner
                .cache
                .insert(TunnelRecord::new(record.url, id, Age::new(record.age)));
        }
    }

    /// Spawn the Activator and Reconnector manager tasks. Must be called
    /// after [`TunnelPool::init`] and [`TunnelPool::load_cache`].
    pub fn open(self: &Arc<Self>) {
        activator::spawn_manager(self.clone());
        reconnector::spawn_manager(self.clone());
    }

    /// True iff *active* is non-empty.
    pub async fn ready(&self) -> bool {
        !self.inner.lock().await.active.is_empty()
    }

    /// Register a new tunnel URL, or re-arm it if already known but not
    /// currently open/opening.
    pub async fn add(self: &Arc<Self>, url: &str) -> Result<(), PoolError> {
        if url.is_empty()
            || url.len() > persistence::MAX_URL_LENGTH
            || url.contains(char::is_whitespace)
        {
            return Err(PoolError::InvalidUrl(url.to_string()));
        }
        if !self.transport.parse_url(url) {
            return Err(PoolError::InvalidUrl(url.to_string()));
        }

        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.cache.get_mut(url) {
            match record.state {
                TunnelState::Open | TunnelState::Opening => {
                    warn!("add: tunnel {url} already open/opening, ignoring");
                    return Ok(());
                }
                _ => record.state = TunnelState::Opening,
            }
        } else {
            let id = self.ids.next();
            let mut record = TunnelRecord::new(url.to_string(), id, Age::new(self.config.init_age));
            record.state = TunnelState::Opening;
            inner.cache.insert(record);
        }
        drop(inner);

        activator::spawn_worker(self.clone(), url.to_string());
        self.persist().await;
        Ok(())
    }

    /// Remove a tunnel URL. A record's *current state* (not merely
    /// active-set membership) decides the transition to take — see
    /// DESIGN.md for why.
    pub async fn delete(&self, url: &str) {
        let mut inner = self.inner.lock().await;
        inner.active.delete(url);

        let Some(record) = inner.cache.get_mut(url) else {
            drop(inner);
            return;
        };

        match record.state {
            TunnelState::Opening => {
                record.state = TunnelState::Closing;
                drop(inner);
            }
            TunnelState::Closing | TunnelState::Deleting => {
                drop(inner);
            }
            TunnelState::Open => {
                let handle = record.transport.take();
                record.state = TunnelState::Closed;
                drop(inner);
                if let Some(handle) = handle {
                    self.transport.close(&handle).await;
                }
            }
            TunnelState::Closed | TunnelState::Dead => {
                inner.cache.delete(url);
                drop(inner);
            }
        }

        self.persist().await;
    }

    /// Pick a tunnel for this flow and forward the given packets to it.
    /// The mutex guard is dropped on every exit path, including the
    /// MTU-zero branch, before any transport call or I/O.
    pub async fn forward_packets(
        &self,
        primary_packet: &Packet,
        packets: &[Packet],
        flow_hash: u64,
        repeat: u32,
        config_mtu: u16,
    ) -> bool {
        let handle = {
            let mut inner = self.inner.lock().await;
            let Some(selected_id) =
                selector::select(&mut inner.active, &mut inner.history, flow_hash, repeat)
            else {
                warn!("forward_packets: no active tunnel for flow_hash={flow_hash:#x}, dropping");
                return false;
            };
            inner
                .active
                .get_by_id_mut(selected_id)
                .and_then(|record| record.transport.clone())
        };

        let Some(handle) = handle else {
            // Every active record carries an acquired transport handle;
            // observing one without it is a programmer error.
            let diagnostic = PoolError::InvariantViolation(
                "active record selected without a transport handle".to_string(),
            );
            tracing::error!("forward_packets: {diagnostic}");
            panic!("{diagnostic}");
        };

        let mtu = self.transport.mtu(&handle, config_mtu).await;
        if mtu == 0 {
            return false;
        }

        if primary_packet.total_length > mtu || packets.iter().any(|p| p.total_length > mtu) {
            self.transport
                .fragmentation_required(&handle, mtu, primary_packet)
                .await;
            return true;
        }

        for packet in packets {
            self.transport.send(&handle, packet).await;
        }
        true
    }

    /// Emit `<option value="URL">URL</option>` for every record in the
    /// chosen set.
    pub async fn render_list(&self, which: TunnelListKind) -> String {
        let inner = self.inner.lock().await;
        let set = match which {
            TunnelListKind::Active => &inner.active,
            TunnelListKind::All => &inner.cache,
        };
        let mut buffer = String::new();
        for record in set.iter() {
            let url = html_escape(&record.url);
            buffer.push_str(&format!("<option value=\"{url}\">{url}</option>\n"));
        }
        buffer
    }

    /// Persistence write, holding the mutex across the whole
    /// rename/write/rename sequence. This is a deliberate carve-out from
    /// the general "never hold the mutex across I/O" rule — see DESIGN.md.
    async fn persist(&self) {
        let inner = self.inner.lock().await;
        persistence::write(&self.program, inner.cache.iter(), &self.paths).await;
    }

    /// Draw a jitter value in `[0, bound)` from the pool's single shared RNG.
    async fn jitter(&self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        let mut inner = self.inner.lock().await;
        inner.rng.gen_range(0..bound)
    }
}

/// Minimal HTML attribute/text escaping for `render_list` — URLs are
/// operator-controlled (`add`), not end-user input, but escaping costs
/// nothing and keeps the rendered page well-formed if a URL ever contains
/// a reserved character.
fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
