//! Hyperparameter grid search (spec §4.12), grounded on
//! `RandomForest::training`/`build_model` in `Rf_components.h`: a `min_split`
//! x `min_leaf` grid, scored by whichever of OOB/validation/k-fold
//! `Config::training_score` selects, with atomic best-state checkpointing
//! and early stopping.

use embedded_rforest::idvector::IdVector;
use embedded_rforest::platform::Platform;
use embedded_rforest::random::Random;
use embedded_rforest::tree::{NodeLayout, Tree};

use crate::builder::{self, BuildParams, SampleWindow};
use crate::config::{Config, TrainingScore};
use crate::error::{EngineError, EngineResult};
use crate::forest_container::Forest;
use crate::sample_store::SampleStore;
use crate::score::ScoreMatrix;

const PATIENCE: u32 = 3;
const MIN_IMPROVEMENT: f32 = 0.003;

#[derive(Debug, Clone, Copy)]
struct GridPoint {
    min_split: u16,
    min_leaf: u16,
}

fn grid_points(config: &Config) -> Vec<GridPoint> {
    let (split_lo, split_hi) = config.min_split_range;
    let (leaf_lo, leaf_hi) = config.min_leaf_range;
    let mut points = Vec::new();
    let mut min_split = split_lo;
    while min_split <= split_hi {
        let mut min_leaf = leaf_lo;
        while min_leaf <= leaf_hi {
            points.push(GridPoint { min_split, min_leaf });
            min_leaf += 1;
        }
        min_split += 2;
    }
    if points.is_empty() {
        points.push(GridPoint { min_split: split_lo.max(2), min_leaf: leaf_lo.max(1) });
    }
    points
}

/// A forest estimated node count rough enough to size `NodeLayout`'s child
/// index width: a balanced tree stopping at `min_split` has on the order of
/// `2 * n / min_split` nodes.
fn estimate_nodes(num_train: u32, min_split: u16) -> u32 {
    let estimate = 2 * num_train / (min_split.max(1) as u32) + 1;
    estimate.clamp(3, embedded_rforest::tree::RF_MAX_NODES as u32)
}

/// Draws one tree's bootstrap multiset and grows it, returning both the
/// tree and the `IdVector` used to draw it (needed for OOB scoring).
fn build_one_tree<W: SampleWindow>(
    window: &W,
    num_train: u32,
    config: &Config,
    params: BuildParams,
    thresholds: &[u16],
    layout: NodeLayout,
    tree_index: u8,
    rng: &mut Random,
) -> (Tree, IdVector<8>) {
    let max_id = num_train.saturating_sub(1).max(0) as usize;
    let mut bag = IdVector::<8>::new(max_id).expect("bounded training set size");
    let indices: Vec<u32> = if config.use_bootstrap {
        let draws = ((num_train as f32) * config.bootstrap_ratio).round() as u32;
        let mut drawn = Vec::with_capacity(draws as usize);
        for _ in 0..draws {
            let id = rng.bounded(num_train.max(1)) as usize;
            let _ = bag.push_back(id);
            drawn.push(id as u32);
        }
        drawn
    } else {
        (0..num_train).collect()
    };
    let tree = builder::build_tree(window, indices, config, params, thresholds, layout, tree_index, rng);
    (tree, bag)
}

fn build_forest_for_point<W: SampleWindow>(
    window: &W,
    num_train: u32,
    config: &Config,
    point: GridPoint,
    thresholds: &[u16],
    seed_rng: &mut Random,
) -> (Forest, Vec<IdVector<8>>) {
    let layout = Forest::derive_layout(
        window.num_features() as u32,
        config.dataset.num_labels as u32,
        estimate_nodes(num_train, point.min_split),
    );
    let mut point_config = config.clone();
    point_config.min_split = point.min_split;
    let params = BuildParams { min_leaf: point.min_leaf };

    let mut forest = Forest::new(layout);
    let mut bags = Vec::with_capacity(config.num_trees as usize);
    for tree_index in 0..config.num_trees {
        let mut rng = seed_rng.derive(tree_index as u64, 0);
        let (tree, bag) = build_one_tree(window, num_train, &point_config, params, thresholds, layout, tree_index as u8, &mut rng);
        forest.trees.push(tree);
        bags.push(bag);
    }
    (forest, bags)
}

fn packed_features<W: SampleWindow>(window: &W, index: u32) -> Vec<u8> {
    (0..window.num_features()).map(|f| window.feature(index, f)).collect()
}

/// Votes a training sample using only the trees whose bootstrap bag does
/// not contain it ("out of bag"); samples in every tree's bag are skipped
/// (no unbiased estimate is possible for them).
fn oob_score<W: SampleWindow>(
    window: &W,
    num_train: u32,
    forest: &Forest,
    bags: &[IdVector<8>],
    thresholds: &[u16],
    num_labels: u32,
) -> ScoreMatrix {
    let mut matrix = ScoreMatrix::new(num_labels as usize);
    for index in 0..num_train {
        let oob_trees: Vec<Tree> = forest
            .trees
            .iter()
            .zip(bags.iter())
            .filter(|(_, bag)| !bag.contains(index as usize))
            .map(|(tree, _)| tree.clone())
            .collect();
        if oob_trees.is_empty() {
            continue;
        }
        let features = packed_features(window, index);
        let predicted = embedded_rforest::forest::vote(&oob_trees, &features, thresholds, num_labels);
        matrix.update(window.label(index), predicted);
    }
    matrix
}

fn validation_score<W: SampleWindow>(window: &W, forest: &Forest, thresholds: &[u16], num_labels: u32, num_valid: u32) -> ScoreMatrix {
    let mut matrix = ScoreMatrix::new(num_labels as usize);
    for index in 0..num_valid {
        let features = packed_features(window, index);
        let predicted = forest.predict(&features, thresholds, num_labels);
        matrix.update(window.label(index), predicted);
    }
    matrix
}

/// Partitions `0..num_train` into `k` contiguous folds; for each fold,
/// rebuilds a forest on the complement and scores it against the fold,
/// then averages the `k` score matrices into one.
fn kfold_score<W: SampleWindow>(
    window: &W,
    num_train: u32,
    config: &Config,
    point: GridPoint,
    thresholds: &[u16],
    seed_rng: &mut Random,
    k: u8,
) -> ScoreMatrix {
    let k = k.max(2) as u32;
    let num_labels = config.dataset.num_labels as u32;
    let fold_size = (num_train / k).max(1);
    let mut matrix = ScoreMatrix::new(num_labels as usize);

    for fold in 0..k {
        let begin = fold * fold_size;
        let end = if fold + 1 == k { num_train } else { (begin + fold_size).min(num_train) };
        if begin >= end {
            continue;
        }
        let complement: Vec<u32> = (0..num_train).filter(|&i| i < begin || i >= end).collect();
        if complement.is_empty() {
            continue;
        }

        let layout = Forest::derive_layout(window.num_features() as u32, num_labels, estimate_nodes(complement.len() as u32, point.min_split));
        let mut point_config = config.clone();
        point_config.min_split = point.min_split;
        let params = BuildParams { min_leaf: point.min_leaf };

        let mut forest = Forest::new(layout);
        for tree_index in 0..config.num_trees {
            let mut rng = seed_rng.derive(fold as u64 * 1000 + tree_index as u64, fold as u64);
            let tree = builder::build_tree(window, complement.clone(), &point_config, params, thresholds, layout, tree_index as u8, &mut rng);
            forest.trees.push(tree);
        }

        for index in begin..end {
            let features = packed_features(window, index);
            let predicted = forest.predict(&features, thresholds, num_labels);
            matrix.update(window.label(index), predicted);
        }
    }
    matrix
}

/// Writes every tree to `best_tree_<i>.bin`, the crash-safe checkpoint of
/// the best candidate seen so far.
fn save_best_state<P: Platform>(platform: &P, model_root: &str, forest: &Forest) -> EngineResult<()> {
    for tree in &forest.trees {
        let path = format!("{model_root}/best_tree_{}.bin", tree.index);
        crate::tree_store::release(platform, &path, tree, true)?;
    }
    Ok(())
}

/// Renames every `best_tree_<i>.bin` back to its canonical `tree_<i>.bin`
/// name, the final step once the grid search has concluded.
fn restore_best_state<P: Platform>(platform: &P, model_root: &str, tree_count: u16) -> EngineResult<()> {
    for index in 0..tree_count {
        let best_path = format!("{model_root}/best_tree_{index}.bin");
        let canonical_path = format!("{model_root}/tree_{index}.bin");
        if platform.exists(&best_path) {
            platform
                .rename(&best_path, &canonical_path)
                .map_err(|e| EngineError::io(&best_path, std::io::Error::other(format!("{e:?}"))))?;
        }
    }
    Ok(())
}

/// Runs the full grid search and returns the winning, already-unified
/// [`Forest`]. `train` must already be loaded in memory; `valid` is only
/// read when `Config::training_score` is `ValidScore`.
pub fn train<P: Platform>(
    platform: &P,
    train_store: &SampleStore,
    valid_store: Option<&SampleStore>,
    config: &mut Config,
    model_root: &str,
    forest_path: &str,
) -> EngineResult<Forest> {
    let thresholds = Config::threshold_candidates(config.dataset.quantization_coefficient);
    let num_labels = config.dataset.num_labels as u32;
    let num_train = train_store.num_samples();
    let points = grid_points(config);

    let mut best_score = f32::MIN;
    let mut best_forest: Option<Forest> = None;
    let mut epochs_without_improvement = 0u32;

    for point in points {
        let mut rng = Random::seeded(config.random_seed ^ ((point.min_split as u64) << 16) ^ point.min_leaf as u64);
        let (forest, bags) = build_forest_for_point(train_store, num_train, config, point, &thresholds, &mut rng);

        let matrix = match config.training_score {
            TrainingScore::OobScore => oob_score(train_store, num_train, &forest, &bags, &thresholds, num_labels),
            TrainingScore::ValidScore => {
                let valid = valid_store
                    .ok_or_else(|| EngineError::Config("validation split required for valid_score".into()))?;
                validation_score(valid, &forest, &thresholds, num_labels, valid.num_samples())
            }
            TrainingScore::KFoldScore => {
                kfold_score(train_store, num_train, config, point, &thresholds, &mut rng, config.k_folds)
            }
        };
        let score = matrix.combined_score(config.metric_score);

        if score > best_score + MIN_IMPROVEMENT {
            best_score = score;
            epochs_without_improvement = 0;
            save_best_state(platform, model_root, &forest)?;
            best_forest = Some(forest);
        } else {
            epochs_without_improvement += 1;
            if epochs_without_improvement >= PATIENCE {
                break;
            }
        }
    }

    config.result_score = best_score.max(0.0);
    let mut forest = best_forest.ok_or_else(|| EngineError::Config("grid search produced no candidate".into()))?;
    restore_best_state(platform, model_root, config.num_trees)?;
    forest.release_forest(platform, forest_path, model_root)?;
    Ok(forest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Criterion;
    use crate::platform_mem::MemPlatform;
    use crate::sample_store::Sample;

    fn xor_store() -> SampleStore {
        let platform = MemPlatform::new();
        let mut store = SampleStore::init("/m/m_nml.bin", 2, 1, 1);
        let rows = [(0u8, [0u8, 0u8]), (1, [0, 1]), (1, [1, 0]), (0, [1, 1])];
        let mut i = 0u32;
        for _ in 0..20 {
            for &(label, features) in &rows {
                store.store_sample_for_test(i, &Sample { label, features: features.to_vec() });
                i += 1;
            }
        }
        store.set_num_samples_for_test(i);
        store.release_data(&platform, false).unwrap();
        store.load_data(&platform, true).unwrap();
        store
    }

    fn xor_config() -> Config {
        let mut config = Config::default();
        config.num_trees = 6;
        config.random_seed = 11;
        config.criterion = Criterion::Gini;
        config.dataset.num_features = 2;
        config.dataset.num_labels = 2;
        config.dataset.quantization_coefficient = 1;
        config.min_split_range = (2, 4);
        config.min_leaf_range = (1, 2);
        config.training_score = TrainingScore::OobScore;
        config
    }

    #[test]
    fn oob_grid_search_produces_a_usable_unified_forest() {
        let platform = MemPlatform::new();
        let store = xor_store();
        let mut config = xor_config();

        let forest = train(&platform, &store, None, &mut config, "/m", "/m/m_forest.bin").unwrap();
        assert!(forest.is_unified());
        assert!(forest.tree_count() > 0);
        assert!(config.result_score > 0.0);

        let thresholds = Config::threshold_candidates(1);
        let mut correct = 0;
        for i in 0..store.num_samples() {
            let features = [store.get_feature(i, 0), store.get_feature(i, 1)];
            let predicted = forest.predict(&features, &thresholds, 2);
            if predicted == store.get_label(i) {
                correct += 1;
            }
        }
        assert!(correct as f32 / store.num_samples() as f32 >= 0.5);
    }

    #[test]
    fn kfold_grid_search_scores_every_fold() {
        let platform = MemPlatform::new();
        let store = xor_store();
        let mut config = xor_config();
        config.training_score = TrainingScore::KFoldScore;
        config.k_folds = 4;

        let forest = train(&platform, &store, None, &mut config, "/m", "/m/m_forest.bin").unwrap();
        assert!(forest.is_unified());
        assert!(config.result_score >= 0.0);
    }

    #[test]
    fn valid_score_requires_a_validation_split() {
        let platform = MemPlatform::new();
        let store = xor_store();
        let mut config = xor_config();
        config.training_score = TrainingScore::ValidScore;

        assert!(train(&platform, &store, None, &mut config, "/m", "/m/m_forest.bin").is_err());
    }
}
