//! Per-tunnel identity, state, weight, and age.

use crate::transport::Handle;
use std::sync::atomic::{AtomicU16, Ordering};

/// Age assigned to a record on successful open or on `add`.
pub const TUNNEL_INIT_AGE: u8 = 16;

/// Floor a record's weight never drops below.
pub const WEIGHT_FLOOR: f64 = 0.005;
/// Ceiling a record's weight never rises above.
pub const WEIGHT_CEILING: f64 = 1.0;

/// The tunnel state machine.
///
/// ```text
/// Closed  -- activator claims -->  Opening
/// Opening -- open succeeds    -->  Open
/// Opening -- retries exhausted --> Dead
/// Opening -- delete() while opening        --> Closing
/// Opening -- free() while opening          --> Deleting
/// Open    -- delete()/transport close      --> Closed
/// Open    -- reconnector swap-in           --> (replaced; old freed)
/// Closing -- worker observes               --> Closed
/// Deleting -- worker observes              --> freed
/// Dead    -- add() re-arms                 --> Opening
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Closed,
    Opening,
    Open,
    Dead,
    Closing,
    Deleting,
}

/// 16-bit monotonic identifier, never reused.
///
/// Used by the Selector's history table to disambiguate a record from the
/// replacement instance a reconnect swaps in under the same URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelId(pub u16);

/// Monotonic, process-wide, non-reentrant id generator.
///
/// Wraps on overflow (after 65536 tunnels have ever existed) rather than
/// panicking — at that point the oldest ids have long since left the history
/// table's 1024 live slots, so reuse cannot confuse the Selector in practice
/// (see `DESIGN.md` for the reasoning).
#[derive(Debug, Default)]
pub struct IdGenerator(AtomicU16);

impl IdGenerator {
    pub fn new() -> Self {
        Self(AtomicU16::new(0))
    }

    pub fn next(&self) -> TunnelId {
        TunnelId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Weight in `[0.005, 1.0]`, clamped at every mutation site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weight(f64);

impl Weight {
    pub fn initial() -> Self {
        Self(WEIGHT_CEILING)
    }

    pub fn get(self) -> f64 {
        self.0
    }

    #[must_use]
    pub fn rewarded(self) -> Self {
        Self((self.0 * 1.15).min(WEIGHT_CEILING))
    }

    #[must_use]
    pub fn demoted(self) -> Self {
        Self((self.0 * 0.75).max(WEIGHT_FLOOR))
    }

    /// Construct an out-of-the-normal-flow weight for test fixtures. Still
    /// clamps to the invariant range — tests exercise the clamping behavior
    /// of `rewarded`/`demoted`, not bypass it.
    #[cfg(test)]
    pub fn for_test(value: f64) -> Self {
        Self(value.clamp(WEIGHT_FLOOR, WEIGHT_CEILING))
    }
}

impl Default for Weight {
    fn default() -> Self {
        Self::initial()
    }
}

/// 8-bit saturating reputation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Age(u8);

impl Age {
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn decremented(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    pub const fn is_persistable(self) -> bool {
        self.0 != 0
    }
}

/// A single outbound tunnel: identity, state, weight, age, and a handle to
/// the external transport once opened.
///
/// `Clone` backs the pool's choice to keep *cache* and *active* as two
/// independent `TunnelSet`s instead of sharing one record behind interior
/// mutability (see DESIGN.md) — a cloned snapshot crosses from one set to
/// the other exactly when a tunnel joins or leaves *active* ("insert into
/// active", "replace ... in active and in cache"). Cloning only copies an
/// `Arc` for `transport`, so it stays cheap.
#[derive(Clone)]
pub struct TunnelRecord {
    pub url: String,
    pub state: TunnelState,
    /// Guards against concurrent reconnect attempts on the same record.
    pub reconnect: bool,
    pub id: TunnelId,
    pub age: Age,
    pub weight: Weight,
    pub transport: Option<Handle>,
}

impl TunnelRecord {
    /// A fresh record in `Closed` state, as created by `add()`, cache-file
    /// load, or a Reconnector replacement instance.
    pub fn new(url: String, id: TunnelId, age: Age) -> Self {
        Self {
            url,
            state: TunnelState::Closed,
            reconnect: false,
            id,
            age,
            weight: Weight::initial(),
            transport: None,
        }
    }
}

impl std::fmt::Debug for TunnelRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelRecord")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("reconnect", &self.reconnect)
            .field("id", &self.id)
            .field("age", &self.age)
            .field("weight", &self.weight)
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_reward_and_demotion_stay_in_range() {
        let w = Weight::initial();
        assert_eq!(w.get(), 1.0);
        assert_eq!(w.rewarded().get(), 1.0); // already at ceiling

        let mut w = Weight(0.1);
        for _ in 0..50 {
            w = w.demoted();
        }
        assert!(w.get() >= WEIGHT_FLOOR);
        assert!((w.get() - WEIGHT_FLOOR).abs() < 1e-9);
    }

    #[test]
    fn age_saturates_at_zero_and_tracks_persistability() {
        let mut age = Age::new(1);
        assert!(age.is_persistable());
        age = age.decremented();
        assert_eq!(age.get(), 0);
        assert!(!age.is_persistable());
        age = age.decremented();
        assert_eq!(age.get(), 0);
    }

    #[test]
    fn ids_are_monotonic_and_never_reused_within_range() {
        let gen = IdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
        assert_eq!(a.0 + 1, b.0);
    }
}
