//! The weighted probabilistic selector.
//!
//! Runs entirely under the caller's lock (the pool mutex) against a
//! mutable snapshot of *active* and the history table — no `.await` and no
//! I/O anywhere in this module, so it never needs to release anything.

use super::history::TunnelHistory;
use super::record::TunnelId;
use super::set::TunnelSet;

/// Execute the weighted-pick-with-history-demotion algorithm and return the
/// id of the chosen tunnel. `None` if `active` is empty.
pub fn select(
    active: &mut TunnelSet,
    history: &mut TunnelHistory,
    flow_hash: u64,
    repeat: u32,
) -> Option<TunnelId> {
    if active.is_empty() {
        return None;
    }

    let hist_idx = TunnelHistory::index_for(flow_hash);
    let lower32 = flow_hash as u32;
    let upper32 = (flow_hash >> 32) as u32;
    let hist_hash = lower32 ^ upper32;
    let weight_hash = hist_hash.wrapping_mul(repeat.wrapping_add(1));

    let total_weight: f64 = active.iter().map(|r| r.weight.get()).sum();
    let fraction = f64::from(weight_hash) / 4_294_967_296.0_f64; // weight_hash / 2^32
    let pick = fraction * total_weight;

    let mut candidate_idx = pick_index(active, pick);

    // Step 6: demote the previously blamed record on a retransmission.
    if repeat != 0 {
        if let Some(blamed_id) = history.get(hist_idx, hist_hash) {
            if let Some(blamed) = active.get_by_id_mut(blamed_id) {
                blamed.weight = blamed.weight.demoted();
            }
            // Re-fetch the candidate's id now that weights may have moved;
            // the index itself is still valid, only its weight may differ.
            let candidate_id = nth_id(active, candidate_idx);
            if candidate_id == Some(blamed_id) {
                let len = active.len();
                candidate_idx = (candidate_idx + 1) % len;
            }
        }
    }

    let selected_id = nth_id(active, candidate_idx)?;
    if let Some(selected) = active.get_by_id_mut(selected_id) {
        selected.weight = selected.weight.rewarded();
    }
    history.set(hist_idx, hist_hash, selected_id);

    Some(selected_id)
}

/// Linear scan: subtract each weight from `pick`
/// while `pick >= weight`, stop at the first record where it isn't. Falls
/// back to the last record if floating-point rounding runs the scan past
/// the end (it never should, since `pick < total_weight` by construction).
fn pick_index(active: &TunnelSet, mut pick: f64) -> usize {
    let len = active.len();
    for (idx, record) in active.iter().enumerate() {
        let w = record.weight.get();
        if pick < w {
            return idx;
        }
        pick -= w;
    }
    len - 1
}

fn nth_id(active: &TunnelSet, idx: usize) -> Option<TunnelId> {
    active.iter().nth(idx).map(|r| r.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::record::{Age, IdGenerator, TunnelRecord};

    fn active_with_weights(weights: &[f64]) -> (TunnelSet, IdGenerator) {
        let ids = IdGenerator::new();
        let mut set = TunnelSet::new();
        for (i, w) in weights.iter().enumerate() {
            let mut record = TunnelRecord::new(format!("a://{i}"), ids.next(), Age::new(16));
            record.weight = crate::pool::record::Weight::for_test(*w);
            set.insert(record);
        }
        (set, ids)
    }

    #[test]
    fn empty_active_returns_none() {
        let mut active = TunnelSet::new();
        let mut history = TunnelHistory::new();
        assert!(select(&mut active, &mut history, 123, 0).is_none());
    }

    #[test]
    fn deterministic_for_repeat_zero_with_fixed_state() {
        let (mut active, _ids) = active_with_weights(&[1.0, 1.0, 1.0]);
        let mut history = TunnelHistory::new();
        // Not asserting which tunnel, only that two identical calls against
        // freshly rebuilt identical state agree — the mutation from the
        // first call (reward) makes repeating the *same* mutable state
        // non-deterministic, so each call gets its own fresh set.
        let first = select(&mut active, &mut history, 9_999, 0);
        assert!(first.is_some());

        let (mut active2, _ids2) = active_with_weights(&[1.0, 1.0, 1.0]);
        let mut history2 = TunnelHistory::new();
        let second = select(&mut active2, &mut history2, 9_999, 0);
        assert_eq!(first.map(|i| i.0), second.map(|i| i.0));
    }

    #[test]
    fn weighted_pick_matches_expected_fractions() {
        // Two active records, weights 1.0 and 0.1 (total 1.1). A fraction of
        // 0.5 must land on the first; 0.98 must land on the second.
        let (active, _ids) = active_with_weights(&[1.0, 0.1]);
        assert_eq!(pick_index(&active, 0.5 * 1.1), 0);
        assert_eq!(pick_index(&active, 0.98 * 1.1), 1);
    }

    #[test]
    fn repeat_demotes_blamed_and_avoids_reselecting_it() {
        let (mut active, ids) = active_with_weights(&[1.0, 1.0]);
        let mut history = TunnelHistory::new();

        let first = select(&mut active, &mut history, 55, 0).unwrap();
        let before_weight = active.get_by_id_mut(first).unwrap().weight.get();

        let second = select(&mut active, &mut history, 55, 1).unwrap();
        assert_ne!(first, second, "blamed tunnel must not be reselected when |active| >= 2");

        let after_weight = active.get_by_id_mut(first).unwrap().weight.get();
        assert!(after_weight < before_weight, "blamed tunnel's weight must drop");
        let _ = ids;
    }
}
