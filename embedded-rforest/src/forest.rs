//! Plurality-vote inference over a set of [`Tree`]s. No file I/O and no
//! knowledge of unified vs. per-tree persistence — that orchestration lives
//! in `rforest-engine::forest_container`; this module only knows how to
//! combine predictions that are already in memory.

use alloc::collections::BTreeMap;

use crate::tree::{Tree, RF_ERROR_LABEL};

/// Small-label fast path: a fixed-size vote table usable without an
/// allocator, valid while `num_labels <= 32`.
const FIXED_VOTE_LABELS: usize = 32;

/// Runs every tree's [`Tree::predict_features`] against one sample and
/// returns the plurality winner, breaking ties by the lowest label id.
/// Returns [`RF_ERROR_LABEL`] if every tree voted out of range (including the
/// degenerate case of an empty forest).
pub fn vote(trees: &[Tree], packed_features: &[u8], thresholds: &[u16], num_labels: u32) -> u8 {
    if num_labels as usize <= FIXED_VOTE_LABELS {
        let mut votes = [0u32; FIXED_VOTE_LABELS];
        let mut any = false;
        for tree in trees {
            let label = tree.predict_features(packed_features, thresholds);
            if label != RF_ERROR_LABEL && (label as u32) < num_labels {
                votes[label as usize] += 1;
                any = true;
            }
        }
        if !any {
            return RF_ERROR_LABEL;
        }
        let mut best_label = 0usize;
        let mut best_count = 0u32;
        for (label, &count) in votes.iter().enumerate().take(num_labels as usize) {
            if count > best_count {
                best_count = count;
                best_label = label;
            }
        }
        best_label as u8
    } else {
        let mut votes: BTreeMap<u8, u32> = BTreeMap::new();
        for tree in trees {
            let label = tree.predict_features(packed_features, thresholds);
            if label != RF_ERROR_LABEL && (label as u32) < num_labels {
                *votes.entry(label).or_insert(0) += 1;
            }
        }
        // BTreeMap iterates in ascending key order, so the first maximum
        // found by count is automatically the lowest-id tie winner.
        votes
            .into_iter()
            .max_by_key(|&(label, count)| (count, core::cmp::Reverse(label)))
            .map(|(label, _)| label)
            .unwrap_or(RF_ERROR_LABEL)
    }
}
