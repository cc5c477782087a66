//! `TunnelHistory` — a 1024-slot table the Selector uses to demote tunnels
//! that appear to have dropped repeated packets.

use super::record::TunnelId;

const SLOTS: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Slot {
    hash: u32,
    id: TunnelId,
}

/// Fixed-size table indexed by `flow_hash mod 1024`. Collisions are
/// accepted — the table is a hint, not a correctness mechanism.
pub struct TunnelHistory {
    slots: Box<[Option<Slot>; SLOTS]>,
}

impl TunnelHistory {
    pub fn new() -> Self {
        Self {
            slots: Box::new([None; SLOTS]),
        }
    }

    pub fn index_for(flow_hash: u64) -> usize {
        (flow_hash % SLOTS as u64) as usize
    }

    /// The `(hash, id)` recorded at `index`, if the slot has ever been
    /// written and its stored hash matches `expected_hash` — a bucket miss
    /// (different flow hashing to the same slot) is reported as absent.
    pub fn get(&self, index: usize, expected_hash: u32) -> Option<TunnelId> {
        self.slots[index].and_then(|slot| {
            if slot.hash == expected_hash {
                Some(slot.id)
            } else {
                None
            }
        })
    }

    pub fn set(&mut self, index: usize, hash: u32, id: TunnelId) {
        self.slots[index] = Some(Slot { hash, id });
    }
}

impl Default for TunnelHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_same_hash_hits() {
        let mut history = TunnelHistory::new();
        let idx = TunnelHistory::index_for(42);
        history.set(idx, 0xDEAD_BEEF, TunnelId(7));
        assert_eq!(history.get(idx, 0xDEAD_BEEF), Some(TunnelId(7)));
    }

    #[test]
    fn mismatched_hash_at_same_slot_is_a_miss() {
        let mut history = TunnelHistory::new();
        let idx = TunnelHistory::index_for(42);
        history.set(idx, 0xDEAD_BEEF, TunnelId(7));
        assert_eq!(history.get(idx, 0x1234_5678), None);
    }

    #[test]
    fn unwritten_slot_is_absent() {
        let history = TunnelHistory::new();
        assert_eq!(history.get(0, 0), None);
    }
}
