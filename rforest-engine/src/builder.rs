//! Breadth-first decision-tree construction (spec §4.7), grounded on the
//! tree-building loop in `RandomForest::build_model` /
//! `Rf_tree_container::build_tree` in `Rf_components.h`.
//!
//! Two entry points share every stopping rule, split search, and tie-break:
//! [`build_tree`] drives the fully in-memory [`SampleStore`], and
//! [`build_tree_chunked`] is the same algorithm for an oversized dataset,
//! differing only in that each node's index window is counting-sorted by
//! chunk id before its features/labels are read, to batch reads by chunk.
//! Both reduce to [`grow`] so the two stay byte-identical on the same seed.

use std::collections::VecDeque;

use embedded_rforest::random::Random;
use embedded_rforest::tree::{NodeLayout, Tree, TreeNode, RF_MAX_NODES};

use crate::config::{Config, Criterion};
use crate::sample_store::SampleStore;

/// A read-only view over quantised samples a tree can be built against.
/// Implemented directly by [`SampleStore`]; the chunked entry point uses
/// the same implementation, only reordering indices before reading them.
pub trait SampleWindow {
    fn num_features(&self) -> u16;
    fn label(&self, index: u32) -> u8;
    fn feature(&self, index: u32, feature: u16) -> u8;
}

impl SampleWindow for SampleStore {
    fn num_features(&self) -> u16 {
        SampleStore::num_features(self)
    }

    fn label(&self, index: u32) -> u8 {
        self.get_label(index)
    }

    fn feature(&self, index: u32, feature: u16) -> u8 {
        self.get_feature(index, feature)
    }
}

/// Extra parameters the grid-search training driver varies per candidate
/// that aren't part of the persisted [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct BuildParams {
    pub min_leaf: u16,
}

#[derive(Debug, Clone)]
struct NodeStats {
    counts: Vec<u32>,
    majority_label: u8,
    distinct: usize,
    total: u32,
}

fn node_stats<W: SampleWindow>(window: &W, indices: &[u32], num_labels: u32) -> NodeStats {
    let mut counts = vec![0u32; num_labels as usize];
    for &idx in indices {
        let label = window.label(idx) as usize;
        if let Some(c) = counts.get_mut(label) {
            *c += 1;
        }
    }
    let mut majority_label = 0u8;
    let mut majority_count = 0u32;
    let mut distinct = 0usize;
    for (label, &count) in counts.iter().enumerate() {
        if count > 0 {
            distinct += 1;
            if count > majority_count {
                majority_count = count;
                majority_label = label as u8;
            }
        }
    }
    NodeStats {
        counts,
        majority_label,
        distinct,
        total: indices.len() as u32,
    }
}

fn impurity(counts: &[u32], total: u32, criterion: Criterion) -> f32 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f32;
    match criterion {
        Criterion::Gini => {
            let sum_sq: f32 = counts.iter().map(|&c| {
                let p = c as f32 / total;
                p * p
            }).sum();
            1.0 - sum_sq
        }
        Criterion::Entropy => -counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f32 / total;
                p * p.log2()
            })
            .sum::<f32>(),
    }
}

struct SplitCandidate {
    feature: u32,
    slot: usize,
    threshold: u16,
    gain: f32,
    left_count: u32,
    right_count: u32,
}

/// For each candidate feature, build a `counts[value][label]` table in one
/// pass, then score every precomputed threshold slot. Ties are broken by
/// lower feature id, then lower slot — the iteration order below already
/// visits candidates in that order, so "first strictly better" is correct.
fn find_best_split<W: SampleWindow>(
    window: &W,
    indices: &[u32],
    candidate_features: &[u32],
    thresholds: &[u16],
    num_labels: u32,
    criterion: Criterion,
    parent_impurity: f32,
    parent_total: u32,
) -> Option<SplitCandidate> {
    let mut best: Option<SplitCandidate> = None;

    for &feature in candidate_features {
        let max_value = 256usize;
        let mut counts = vec![vec![0u32; num_labels as usize]; max_value];
        for &idx in indices {
            let value = window.feature(idx, feature as u16) as usize;
            let label = window.label(idx) as usize;
            if let Some(row) = counts.get_mut(value) {
                if let Some(c) = row.get_mut(label) {
                    *c += 1;
                }
            }
        }

        // Q=1 callers pass a single-element threshold set (slot 0, value<=0
        // vs value>0), which already makes this loop the fast path.
        for (slot, &threshold) in thresholds.iter().enumerate() {
            let mut left_counts = vec![0u32; num_labels as usize];
            let mut right_counts = vec![0u32; num_labels as usize];
            for value in 0..max_value {
                let dest = if value as u16 <= threshold { &mut left_counts } else { &mut right_counts };
                for (label, &c) in counts[value].iter().enumerate() {
                    dest[label] += c;
                }
            }
            let left_total: u32 = left_counts.iter().sum();
            let right_total: u32 = right_counts.iter().sum();
            if left_total == 0 || right_total == 0 {
                continue;
            }
            let left_impurity = impurity(&left_counts, left_total, criterion);
            let right_impurity = impurity(&right_counts, right_total, criterion);
            let weighted = (left_total as f32 * left_impurity + right_total as f32 * right_impurity) / parent_total as f32;
            let gain = parent_impurity - weighted;

            let better = match &best {
                None => true,
                Some(b) => gain > b.gain,
            };
            if better {
                best = Some(SplitCandidate {
                    feature,
                    slot,
                    threshold,
                    gain,
                    left_count: left_total,
                    right_count: right_total,
                });
            }
        }
    }
    best
}

/// Lomuto partition of `indices[begin..end]` by `feature(idx) <=
/// threshold`; returns the index of the first "right" element.
fn lomuto_partition<W: SampleWindow>(window: &W, indices: &mut [u32], feature: u32, threshold: u16) -> usize {
    let mut store_idx = 0usize;
    for i in 0..indices.len() {
        if window.feature(indices[i], feature as u16) as u16 <= threshold {
            indices.swap(store_idx, i);
            store_idx += 1;
        }
    }
    store_idx
}

fn feature_subset_size(num_features: u16) -> usize {
    ((num_features as f64).sqrt().ceil() as usize).clamp(1, num_features.max(1) as usize)
}

struct Frame {
    node_index: usize,
    begin: usize,
    end: usize,
    depth: u16,
}

/// The shared breadth-first construction loop. `sort_window` is called on
/// each frame's index slice before stats/splits are computed from it — the
/// chunked variant counting-sorts by chunk id there; the plain variant is a
/// no-op.
fn grow<W: SampleWindow>(
    window: &W,
    mut indices: Vec<u32>,
    config: &Config,
    params: BuildParams,
    thresholds: &[u16],
    layout: NodeLayout,
    tree_index: u8,
    rng: &mut Random,
    mut sort_window: impl FnMut(&mut [u32]),
) -> Tree {
    let num_features = window.num_features();
    let num_labels = config.dataset.num_labels as u32;
    let mut tree = Tree::new(tree_index, layout);

    if indices.is_empty() {
        tree.nodes.push(TreeNode::leaf(0, &layout));
        return tree;
    }

    tree.nodes.push(TreeNode::leaf(0, &layout));
    let max_node_index = (layout.max_nodes().min(RF_MAX_NODES as u32) as usize).saturating_sub(1);

    let mut queue = VecDeque::new();
    queue.push_back(Frame { node_index: 0, begin: 0, end: indices.len(), depth: 0 });
    let mut max_depth_seen = 0u16;

    while let Some(frame) = queue.pop_front() {
        max_depth_seen = max_depth_seen.max(frame.depth);
        let slice = &mut indices[frame.begin..frame.end];
        sort_window(slice);
        let stats = node_stats(window, slice, num_labels);
        let parent_impurity = impurity(&stats.counts, stats.total, config.criterion);
        let adaptive_threshold = config.adaptive_impurity_threshold(stats.total);

        let subset_size = feature_subset_size(num_features);
        let mut feature_ids: Vec<u32> = (0..num_features as u32).collect();
        rng.partial_shuffle(&mut feature_ids, subset_size);
        let mut selected: Vec<u32> = feature_ids[..subset_size].to_vec();
        selected.sort_unstable();

        let best_split = if stats.distinct > 1 {
            find_best_split(
                window,
                slice,
                &selected,
                thresholds,
                num_labels,
                config.criterion,
                parent_impurity,
                stats.total,
            )
        } else {
            None
        };

        let should_stop = stats.distinct <= 1
            || stats.total < config.min_split as u32
            || frame.depth + 1 >= config.max_depth
            || frame.node_index >= max_node_index
            || match &best_split {
                None => true,
                Some(split) => {
                    split.gain <= adaptive_threshold
                        || split.left_count < params.min_leaf as u32
                        || split.right_count < params.min_leaf as u32
                }
            };

        if should_stop {
            tree.nodes[frame.node_index] = TreeNode::leaf(stats.majority_label as u32, &layout);
            continue;
        }

        let split = best_split.unwrap();
        let pivot = lomuto_partition(window, slice, split.feature, split.threshold);
        let left_child = tree.nodes.len() as u32;
        tree.nodes[frame.node_index] = TreeNode::branch(split.feature, split.slot as u8, left_child, &layout);
        tree.nodes.push(TreeNode::leaf(stats.majority_label as u32, &layout));
        tree.nodes.push(TreeNode::leaf(stats.majority_label as u32, &layout));

        let mid = frame.begin + pivot;
        if mid > frame.begin {
            queue.push_back(Frame {
                node_index: left_child as usize,
                begin: frame.begin,
                end: mid,
                depth: frame.depth + 1,
            });
        }
        if frame.end > mid {
            queue.push_back(Frame {
                node_index: left_child as usize + 1,
                begin: mid,
                end: frame.end,
                depth: frame.depth + 1,
            });
        }
    }

    tree.depth = max_depth_seen;
    tree
}

/// Builds one tree entirely in memory against a loaded [`SampleStore`].
pub fn build_tree<W: SampleWindow>(
    window: &W,
    indices: Vec<u32>,
    config: &Config,
    params: BuildParams,
    thresholds: &[u16],
    layout: NodeLayout,
    tree_index: u8,
    rng: &mut Random,
) -> Tree {
    grow(window, indices, config, params, thresholds, layout, tree_index, rng, |_| {})
}

/// Same algorithm, but each node's index window is counting-sorted by chunk
/// id first so the batched accessor can read one chunk at a time. Produces
/// the same tree as [`build_tree`] given the same seed and inputs.
pub fn build_tree_chunked<W: SampleWindow>(
    window: &W,
    indices: Vec<u32>,
    samples_per_chunk: u32,
    config: &Config,
    params: BuildParams,
    thresholds: &[u16],
    layout: NodeLayout,
    tree_index: u8,
    rng: &mut Random,
) -> Tree {
    grow(window, indices, config, params, thresholds, layout, tree_index, rng, move |slice| {
        counting_sort_by_chunk(slice, samples_per_chunk);
    })
}

/// Stable counting sort of `indices` by `index / samples_per_chunk`.
fn counting_sort_by_chunk(indices: &mut [u32], samples_per_chunk: u32) {
    if indices.is_empty() || samples_per_chunk == 0 {
        return;
    }
    let max_chunk = indices.iter().map(|&i| i / samples_per_chunk).max().unwrap_or(0) as usize;
    let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); max_chunk + 1];
    for &idx in indices.iter() {
        buckets[(idx / samples_per_chunk) as usize].push(idx);
    }
    let mut out = Vec::with_capacity(indices.len());
    for bucket in buckets {
        out.extend(bucket);
    }
    indices.copy_from_slice(&out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::platform_mem::MemPlatform;
    use crate::sample_store::{Sample, SampleStore};
    use embedded_rforest::tree::NodeLayout;

    fn xor_dataset() -> (SampleStore, Config) {
        let platform = MemPlatform::new();
        let mut store = SampleStore::init("/m/m_nml.bin", 2, 1, 1);
        let rows = [
            (0u8, [0u8, 0u8]),
            (1, [0, 1]),
            (1, [1, 0]),
            (0, [1, 1]),
        ];
        let mut samples = Vec::new();
        for _ in 0..8 {
            for &(label, features) in &rows {
                samples.push(Sample { label, features: features.to_vec() });
            }
        }
        for (i, s) in samples.iter().enumerate() {
            store.store_sample_for_test(i as u32, s);
        }
        store.set_num_samples_for_test(samples.len() as u32);
        store.release_data(&platform, false).unwrap();
        store.load_data(&platform, true).unwrap();

        let mut config = Config::default();
        config.min_split = 2;
        config.max_depth = 6;
        config.dataset.num_features = 2;
        config.dataset.num_labels = 2;
        config.dataset.quantization_coefficient = 1;
        (store, config)
    }

    #[test]
    fn builds_a_split_that_separates_xor_labels() {
        let (store, config) = xor_dataset();
        let layout = NodeLayout::fit(2, 2, 31);
        let thresholds = Config::threshold_candidates(1);
        let mut rng = Random::seeded(7);
        let indices: Vec<u32> = (0..store.num_samples()).collect();

        let tree = build_tree(
            &store,
            indices,
            &config,
            BuildParams { min_leaf: 1 },
            &thresholds,
            layout,
            0,
            &mut rng,
        );

        assert!(tree.count_nodes() >= 1);
        let mut correct = 0;
        for i in 0..store.num_samples() {
            let features = [store.get_feature(i, 0), store.get_feature(i, 1)];
            let predicted = tree.predict_features(&features, &thresholds);
            if predicted == store.get_label(i) {
                correct += 1;
            }
        }
        assert!(correct as f32 / store.num_samples() as f32 >= 0.5);
    }

    #[test]
    fn single_distinct_label_produces_one_leaf() {
        let platform = MemPlatform::new();
        let mut store = SampleStore::init("/u/u_nml.bin", 1, 1, 1);
        for i in 0..4u32 {
            store.store_sample_for_test(i, &Sample { label: 0, features: vec![0] });
        }
        store.set_num_samples_for_test(4);
        store.release_data(&platform, false).unwrap();
        store.load_data(&platform, true).unwrap();

        let mut config = Config::default();
        config.min_split = 1;
        config.max_depth = 4;
        config.dataset.num_features = 1;
        config.dataset.num_labels = 1;
        let layout = NodeLayout::fit(1, 1, 3);
        let thresholds = Config::threshold_candidates(1);
        let mut rng = Random::seeded(1);

        let tree = build_tree(&store, vec![0, 1, 2, 3], &config, BuildParams { min_leaf: 1 }, &thresholds, layout, 0, &mut rng);
        assert_eq!(tree.count_nodes(), 1);
        assert!(tree.nodes[0].is_leaf());
    }

    #[test]
    fn chunked_variant_matches_plain_variant_on_same_seed() {
        let (store, config) = xor_dataset();
        let layout = NodeLayout::fit(2, 2, 31);
        let thresholds = Config::threshold_candidates(1);
        let indices: Vec<u32> = (0..store.num_samples()).collect();

        let mut rng_a = Random::seeded(42);
        let plain = build_tree(&store, indices.clone(), &config, BuildParams { min_leaf: 1 }, &thresholds, layout, 0, &mut rng_a);

        let mut rng_b = Random::seeded(42);
        let chunked = build_tree_chunked(
            &store,
            indices,
            store.samples_per_chunk(),
            &config,
            BuildParams { min_leaf: 1 },
            &thresholds,
            layout,
            0,
            &mut rng_b,
        );

        assert_eq!(plain.nodes.len(), chunked.nodes.len());
        for i in 0..store.num_samples() {
            let features = [store.get_feature(i, 0), store.get_feature(i, 1)];
            assert_eq!(
                plain.predict_features(&features, &thresholds),
                chunked.predict_features(&features, &thresholds)
            );
        }
    }
}
