//! The transport contract — consumed, not implemented, by this crate.
//!
//! Covers the transport's external interface: open/close/send, MTU query,
//! timeout probe, fragmentation notification, and URL syntax validation.
//! This crate never makes cryptographic or transport-negotiation decisions
//! — it depends on `Transport` as a trait object so the host daemon can
//! plug in whatever tunnel implementation it has, and ships
//! [`MockTransport`] as the in-memory double used by the test suite in
//! every other module.

use async_trait::async_trait;
use std::sync::Arc;

/// An open handle to a single tunnel, as returned by [`Transport::open`].
///
/// Opaque to the pool — it is passed back into `close`, `send`, `mtu`,
/// `timeout`, and `fragmentation_required` unmodified.
pub type Handle = Arc<dyn std::any::Any + Send + Sync>;

/// A single outbound IP packet, as handed down from the packet pipeline.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Raw packet bytes, including the IP header.
    pub bytes: Vec<u8>,
    /// The IP header's declared total length. The pool never interprets
    /// the payload beyond this field.
    pub total_length: u16,
}

/// The external tunnel transport contract.
///
/// All methods may block/suspend; callers (the Activator and Reconnector
/// workers, and `forward_packets`) never hold the pool mutex across a call
/// into this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a tunnel to `url`. Returns `None` on failure — the caller treats
    /// this as a transient failure subject to bounded retry.
    async fn open(&self, url: &str) -> Option<Handle>;

    /// Close a previously opened handle. Idempotent: closing twice, or
    /// closing an already-invalid handle, is not an error.
    async fn close(&self, handle: &Handle);

    /// Best-effort send. No return value — the transport does not report
    /// per-packet delivery status back to the pool.
    async fn send(&self, handle: &Handle, packet: &Packet);

    /// Effective MTU for `handle`, given the caller's configured MTU as a
    /// hint. Zero means the tunnel is currently unusable.
    async fn mtu(&self, handle: &Handle, config_mtu: u16) -> u16;

    /// True if the transport considers `handle` expired as of `now` and the
    /// Reconnector should replace it.
    async fn timeout(&self, handle: &Handle, now: std::time::Instant) -> bool;

    /// Notify the remote peer that `packet` exceeded `mtu` and requires
    /// fragmentation. The pool does not fragment packets itself.
    async fn fragmentation_required(&self, handle: &Handle, mtu: u16, packet: &Packet);

    /// Syntactic validity check only — no DNS resolution, no reachability
    /// probe.
    fn parse_url(&self, url: &str) -> bool;
}

/// A placeholder [`Transport`] for the bundled `tunnelpoold` binary.
///
/// The real tunnel transport — encryption, negotiation, the actual socket
/// I/O — is an explicit non-goal of this crate: it is supplied
/// by whatever packet-forwarding daemon embeds `tunnelpool` as a library.
/// `StubTransport` lets the bundled binary start up, load its cache, and
/// serve the render-list HTTP surface without one; every `open` attempt
/// fails (a transient failure the Activator retries and eventually gives up
/// on), so no tunnel here ever reaches `Open`. An embedding application
/// should implement [`Transport`] against its real tunnel stack and call
/// [`crate::pool::TunnelPool::init`] directly rather than run this binary.
pub struct StubTransport;

#[async_trait]
impl Transport for StubTransport {
    async fn open(&self, _url: &str) -> Option<Handle> {
        None
    }

    async fn close(&self, _handle: &Handle) {}

    async fn send(&self, _handle: &Handle, _packet: &Packet) {}

    async fn mtu(&self, _handle: &Handle, _config_mtu: u16) -> u16 {
        0
    }

    async fn timeout(&self, _handle: &Handle, _now: std::time::Instant) -> bool {
        false
    }

    async fn fragmentation_required(&self, _handle: &Handle, _mtu: u16, _packet: &Packet) {}

    fn parse_url(&self, url: &str) -> bool {
        !url.is_empty() && !url.contains(char::is_whitespace) && url.contains("://")
    }
}
