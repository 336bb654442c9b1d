//! Top-level façade (spec §6), grounded on `RandomForest` in
//! `Rf_components.h`: owns every other component and exposes the
//! embedding-application API surface — construction/scan, the full
//! CSV-to-unified-forest build pipeline, grid-search (re)training,
//! single-sample inference, online label feedback, and the configuration
//! setters/getters an application toggles at runtime.
//!
//! Single-threaded, cooperative, non-reentrant, matching §5: nothing here
//! spawns a thread, blocks past one file operation at a time, or assumes a
//! process-wide singleton — every method borrows `&mut self` for the
//! duration of one call and returns.

use embedded_rforest::idvector::IdVector;
use embedded_rforest::platform::{FileHandle, FileMode, Platform};
use embedded_rforest::random::Random;
use embedded_rforest::tree::RF_ERROR_LABEL;

use crate::base::ResourceBase;
use crate::config::{Config, Criterion, MetricScore, TrainingScore};
use crate::error::{EngineError, EngineResult};
use crate::forest_container::Forest;
use crate::node_pred::NodePredictor;
use crate::pending::PendingBuffer;
use crate::quantizer::{Quantizer, TableQuantizer};
use crate::sample_store::{Sample, SampleStore};
use crate::score::ScoreMatrix;
use crate::training;

const DEFAULT_MAX_PENDING: usize = 64;
const DEFAULT_MAX_WAIT_MS: u64 = 30_000;

/// Result of [`RandomForest::predict`], mirroring §6's language-agnostic
/// `{label_text, label_id, latency_us, success}` tuple.
#[derive(Debug, Clone)]
pub struct PredictionResult {
    pub label_text: Option<String>,
    pub label_id: u8,
    pub latency_us: u64,
    pub success: bool,
}

fn read_to_string<P: Platform>(platform: &P, path: &str) -> EngineResult<String> {
    let mut file = platform
        .open(path, FileMode::Read)
        .map_err(|e| EngineError::io(path, std::io::Error::other(format!("{e:?}"))))?;
    let mut bytes = Vec::new();
    let mut buf = [0u8; 2048];
    loop {
        let n = file.read(&mut buf).map_err(|e| EngineError::io(path, std::io::Error::other(format!("{e:?}"))))?;
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&buf[..n]);
    }
    String::from_utf8(bytes).map_err(|e| EngineError::Format(e.to_string()))
}

fn write_string<P: Platform>(platform: &P, path: &str, text: &str) -> EngineResult<()> {
    let mut file = platform
        .open(path, FileMode::Write)
        .map_err(|e| EngineError::io(path, std::io::Error::other(format!("{e:?}"))))?;
    file.write_all(text.as_bytes())
        .map_err(|e| EngineError::io(path, std::io::Error::other(format!("{e:?}"))))
}

fn dataset_stats(store: &SampleStore) -> (u32, Vec<u32>) {
    let mut per_label = Vec::new();
    for i in 0..store.num_samples() {
        let label = store.get_label(i) as usize;
        if label >= per_label.len() {
            per_label.resize(label + 1, 0u32);
        }
        per_label[label] += 1;
    }
    (store.num_samples(), per_label)
}

fn ids_from(values: &[u32]) -> EngineResult<IdVector<8>> {
    let max_id = values.iter().copied().max().unwrap_or(0) as usize;
    let mut ids = IdVector::<8>::new(max_id).map_err(|e| EngineError::Domain(format!("{e:?}")))?;
    for &v in values {
        ids.push_back(v as usize).map_err(|e| EngineError::Domain(format!("{e:?}")))?;
    }
    Ok(ids)
}

/// Owns a model's entire on-disk and in-memory state: the directory scan
/// ([`ResourceBase`]), hyperparameters and dataset statistics ([`Config`]),
/// the loaded forest, the feature quantiser, the node-count predictor, and
/// the online prediction/label queue.
pub struct RandomForest<P: Platform> {
    platform: P,
    base: ResourceBase,
    config: Config,
    forest: Forest,
    quantizer: Option<TableQuantizer>,
    node_pred: NodePredictor,
    pending: PendingBuffer,
    label_names: Vec<String>,
}

impl<P: Platform> RandomForest<P> {
    fn model_root(&self) -> String {
        format!("/{}", self.base.model_name())
    }

    fn base_data_store(&self) -> SampleStore {
        SampleStore::init(
            self.base.base_data_path(),
            self.config.dataset.num_features,
            self.config.dataset.quantization_coefficient,
            Config::label_bits(self.config.dataset.num_labels.max(1) as u32),
        )
    }

    /// Scans `model_name`'s directory and loads whatever companion files
    /// already exist (config, dataset params, quantiser edges, node
    /// predictor, forest). A model with nothing on disk yet is still
    /// constructed successfully — `able_to_training()`/`able_to_inference()`
    /// simply read false until [`build_model`](Self::build_model) runs.
    pub fn new(platform: P, model_name: &str) -> EngineResult<Self> {
        let base = ResourceBase::init(&platform, model_name);

        let mut config = Config::default();
        if base.config_file_exists() {
            let text = read_to_string(&platform, &base.config_path())?;
            config = Config::from_json(&text)?;
        }
        if base.dp_file_exists() {
            let text = read_to_string(&platform, &base.dp_path())?;
            config.dataset = Config::parse_dataset_params_csv(&text)?;
        }

        let layout = Forest::derive_layout(
            config.dataset.num_features.max(1) as u32,
            config.dataset.num_labels.max(1) as u32,
            8,
        );
        let mut forest = Forest::new(layout);
        if base.forest_file_exists() {
            forest.load_forest(&platform, &base.forest_path(), &format!("/{model_name}"), config.num_trees as u8)?;
        }

        let quantizer = if platform.exists(&base.ctg_path()) {
            let text = read_to_string(&platform, &base.ctg_path())?;
            Some(TableQuantizer::from_csv(config.dataset.quantization_coefficient, &text)?)
        } else {
            None
        };

        let node_pred = if base.node_pred_file_exists() {
            NodePredictor::load(&platform, &base.node_pred_path())?
        } else {
            NodePredictor::default()
        };

        Ok(RandomForest {
            platform,
            base,
            config,
            forest,
            quantizer,
            node_pred,
            pending: PendingBuffer::new(DEFAULT_MAX_PENDING, DEFAULT_MAX_WAIT_MS),
            label_names: Vec::new(),
        })
    }

    /// Renames every existing companion file to the new model name and
    /// rescans, per §4.8/§8 scenario 6 — a subsequent `predict` must return
    /// the same labels it did before the rename.
    pub fn set_model_name(&mut self, new_name: &str) {
        self.base.set_model_name(&self.platform, new_name);
    }

    pub fn model_name(&self) -> &str {
        self.base.model_name()
    }

    /// Full pipeline: convert a raw CSV base dataset if that's all that's
    /// present, derive/auto-configure dataset statistics, split into
    /// train/validation, grid-search train, and persist the unified forest
    /// plus every companion file. Spec §6 `build_model()`.
    pub fn build_model(&mut self) -> EngineResult<()> {
        if !self.base.ready_to_use() {
            return Err(EngineError::Resource("no base dataset found for this model".into()));
        }

        let mut store = self.base_data_store();
        if self.base.base_data_is_csv() {
            store.convert_csv_to_binary(&self.platform, &self.base.base_data_csv_path())?;
            self.base.update_resource_status(&self.platform);
        }

        store.load_data(&self.platform, true)?;
        let (num_samples, samples_per_label) = dataset_stats(&store);
        self.config.dataset.num_samples = num_samples;
        self.config.dataset.num_labels = samples_per_label.len().max(1) as u8;
        self.config.dataset.samples_per_label = samples_per_label;
        if self.config.enable_auto_config {
            self.config.auto_config();
        }
        store.release_data(&self.platform, true)?;

        self.run_training_pipeline(&mut store)?;

        write_string(&self.platform, &self.base.dp_path(), &self.config.dataset_params_csv()?)?;
        write_string(&self.platform, &self.base.config_path(), &self.config.to_json())?;
        self.base.set_dp_status(true);
        self.base.set_config_status(true);
        self.base.update_resource_status(&self.platform);
        Ok(())
    }

    /// Re-runs the grid-search training stage only (no re-ingest), the
    /// `training(epochs)` half of §6's `build_model`/`training` pair — used
    /// to retrain against an already-ingested dataset, e.g. after
    /// `flush_pending_data` extended it. `epochs` caps the number of grid
    /// points evaluated (0 = no cap).
    pub fn training(&mut self, epochs: u32) -> EngineResult<()> {
        if !self.base.able_to_training() {
            return Err(EngineError::Resource("model is not able_to_training".into()));
        }
        if epochs > 0 {
            self.config.min_split_range.1 = self
                .config
                .min_split_range
                .1
                .min(self.config.min_split_range.0 + 2 * epochs as u16);
        }
        let mut store = self.base_data_store();
        self.run_training_pipeline(&mut store)?;
        write_string(&self.platform, &self.base.config_path(), &self.config.to_json())?;
        self.base.update_resource_status(&self.platform);
        Ok(())
    }

    fn run_training_pipeline(&mut self, store: &mut SampleStore) -> EngineResult<()> {
        store.load_data(&self.platform, true)?;
        let num_samples = store.num_samples();
        let mut order: Vec<u32> = (0..num_samples).collect();
        let mut rng = Random::seeded(self.config.random_seed);
        let len = order.len();
        rng.partial_shuffle(&mut order, len);

        let train_count = ((num_samples as f32) * self.config.train_ratio).round() as u32;
        let valid_count = ((num_samples as f32) * self.config.valid_ratio).round() as u32;
        let train_end = train_count.min(num_samples) as usize;
        let valid_end = (train_end + valid_count as usize).min(order.len());

        let root = self.model_root();
        let train_path = format!("{root}/{}_train.bin", self.base.model_name());
        let train_ids = ids_from(&order[..train_end])?;
        let mut train_store = SampleStore::init(
            train_path.clone(),
            self.config.dataset.num_features,
            self.config.dataset.quantization_coefficient,
            Config::label_bits(self.config.dataset.num_labels.max(1) as u32),
        );
        train_store.load_data_subset(&self.platform, store, &train_ids, true)?;

        let valid_store = if self.config.training_score == TrainingScore::ValidScore && train_end < valid_end {
            let valid_path = format!("{root}/{}_valid.bin", self.base.model_name());
            let valid_ids = ids_from(&order[train_end..valid_end])?;
            let mut vs = SampleStore::init(
                valid_path,
                self.config.dataset.num_features,
                self.config.dataset.quantization_coefficient,
                Config::label_bits(self.config.dataset.num_labels.max(1) as u32),
            );
            vs.load_data_subset(&self.platform, store, &valid_ids, true)?;
            Some(vs)
        } else {
            None
        };

        self.forest = training::train(
            &self.platform,
            &train_store,
            valid_store.as_ref(),
            &mut self.config,
            &root,
            &self.base.forest_path(),
        )?;

        if self.platform.exists(&train_path) {
            let _ = self.platform.remove(&train_path);
        }
        Ok(())
    }

    fn label_text(&self, label_id: u8) -> String {
        self.label_names
            .get(label_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("label_{label_id}"))
    }

    /// Attaches a human-readable name table; `names[i]` is returned for
    /// `label_id == i`. Not a persisted artefact — the spec's file formats
    /// have no label-name file, so this is a purely in-memory convenience
    /// (see DESIGN.md's resolution of this Open Question).
    pub fn set_label_names(&mut self, names: Vec<String>) {
        self.label_names = names;
    }

    /// Single-sample inference. Spec §6 `predict(features[])`.
    pub fn predict(&self, raw_features: &[f32]) -> PredictionResult {
        if !self.base.able_to_inference() {
            return PredictionResult { label_text: None, label_id: RF_ERROR_LABEL, latency_us: 0, success: false };
        }
        let start = self.platform.micros();
        let packed = match &self.quantizer {
            Some(q) => q.quantize(raw_features),
            None => raw_features.iter().map(|&v| v as u8).collect(),
        };
        let thresholds = Config::threshold_candidates(self.config.dataset.quantization_coefficient);
        let label_id = self.forest.predict(&packed, &thresholds, self.config.dataset.num_labels.max(1) as u32);
        let latency_us = self.platform.micros().saturating_sub(start);
        let success = label_id != RF_ERROR_LABEL;
        PredictionResult {
            label_text: if success { Some(self.label_text(label_id)) } else { None },
            label_id,
            latency_us,
            success,
        }
    }

    /// Enqueues `predicted` alongside the sample's quantised features,
    /// pending its eventual ground-truth label.
    pub fn log_pending_data(&mut self, features: Vec<u8>, predicted: u8) -> EngineResult<()> {
        let sample = Sample { label: predicted, features };
        let mut store = self.base_data_store();
        let infer_log_path = self.base.infer_log_path();
        self.pending.add_pending_sample(&self.platform, sample, &mut store, &mut self.config, &infer_log_path)
    }

    /// Spec §6 `add_actual_label(text|id)`; this façade takes the numeric
    /// form (`label_text` lookups are the caller's responsibility, same as
    /// `label_names`/`label_text` above).
    pub fn add_actual_label(&mut self, label: u8) {
        let now = self.platform.millis();
        self.pending.add_actual_label(now, label);
    }

    pub fn flush_pending_data(&mut self) -> EngineResult<()> {
        let mut store = self.base_data_store();
        let infer_log_path = self.base.infer_log_path();
        self.pending.flush(&self.platform, &mut store, &mut self.config, &infer_log_path)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    pub fn tree_count(&self) -> usize {
        self.forest.tree_count()
    }

    pub fn node_count(&self) -> usize {
        self.forest.trees.iter().map(|t| t.nodes.len()).sum()
    }

    pub fn result_score(&self) -> f32 {
        self.config.result_score
    }

    pub fn free_storage_bytes(&self) -> u64 {
        self.platform.total_bytes().saturating_sub(self.platform.used_bytes())
    }

    pub fn free_heap_bytes(&self) -> u64 {
        self.platform.memory_status().free_heap
    }

    /// Reads the most recent `n` `(predicted, actual)` pairs from the
    /// inference log and scores them against `metric_score`.
    pub fn recent_inference_score(&self, n: u32) -> EngineResult<f32> {
        let path = self.base.infer_log_path();
        if !self.platform.exists(&path) {
            return Ok(0.0);
        }
        let mut file = self
            .platform
            .open(&path, FileMode::Read)
            .map_err(|e| EngineError::io(&path, std::io::Error::other(format!("{e:?}"))))?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header).map_err(|_| EngineError::Format("truncated inference log header".into()))?;
        let count = u32::from_le_bytes(header[4..8].try_into().unwrap());
        let take = count.min(n);
        let skip = count - take;
        file.seek(embedded_rforest::platform::SeekFrom::Current(skip as i64 * 2))
            .map_err(|e| EngineError::Format(format!("{e:?}")))?;
        let mut matrix = ScoreMatrix::new(self.config.dataset.num_labels.max(1) as usize);
        let mut pair = [0u8; 2];
        for _ in 0..take {
            file.read_exact(&mut pair).map_err(|_| EngineError::Format("truncated inference log body".into()))?;
            matrix.update(pair[1], pair[0]);
        }
        Ok(matrix.combined_score(self.config.metric_score))
    }

    pub fn set_metric_score(&mut self, metric: MetricScore) {
        self.config.metric_score = metric;
    }

    pub fn set_training_score(&mut self, score: TrainingScore) {
        self.config.training_score = score;
    }

    pub fn set_criterion(&mut self, criterion: Criterion) {
        self.config.criterion = criterion;
    }

    pub fn set_random_seed(&mut self, seed: u64) {
        self.config.random_seed = seed;
    }

    pub fn set_num_trees(&mut self, num_trees: u16) {
        self.config.num_trees = num_trees;
    }

    pub fn set_extend_base_data(&mut self, extend: bool) {
        self.config.extend_base_data = extend;
    }

    pub fn set_enable_retrain(&mut self, enable: bool) {
        self.config.enable_retrain = enable;
    }

    pub fn set_impurity_threshold(&mut self, threshold: f32) {
        self.config.impurity_threshold = threshold;
    }

    /// Records the quantiser's shape (feature count, bits per feature) so a
    /// freshly-scanned model with no `_config.json`/`_dp.csv` yet knows how
    /// to read its own `_nml.csv`/`_nml.bin`. A no-op once those files exist
    /// and have already populated `config.dataset` from disk.
    pub fn set_dataset_shape(&mut self, num_features: u16, quantization_coefficient: u8) {
        self.config.dataset.num_features = num_features;
        self.config.dataset.quantization_coefficient = quantization_coefficient;
    }

    pub fn able_to_training(&self) -> bool {
        self.base.able_to_training()
    }

    pub fn able_to_inference(&self) -> bool {
        self.base.able_to_inference()
    }

    pub fn node_predictor(&self) -> &NodePredictor {
        &self.node_pred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform_mem::MemPlatform;
    use embedded_rforest::platform::FileMode;

    fn seed_csv_dataset(platform: &MemPlatform) {
        let mut file = platform.open("/m/m_nml.csv", FileMode::Write).unwrap();
        let rows = [(0u8, [0u8, 0u8]), (1, [0, 1]), (1, [1, 0]), (0, [1, 1])];
        let mut text = String::new();
        for _ in 0..40 {
            for &(label, features) in &rows {
                text.push_str(&format!("{label},{},{}\n", features[0], features[1]));
            }
        }
        file.write_all(text.as_bytes()).unwrap();
        let mut ctg = platform.open("/m/m_ctg.csv", FileMode::Write).unwrap();
        ctg.write_all(b"0,0\n1,0\n").unwrap();
    }

    #[test]
    fn build_model_trains_and_enables_inference() {
        let platform = MemPlatform::new();
        seed_csv_dataset(&platform);

        let mut model = RandomForest::new(platform, "m").unwrap();
        assert!(!model.able_to_inference());
        model.config.num_trees = 5;
        model.config.dataset.num_features = 2;
        model.config.dataset.quantization_coefficient = 1;
        model.config.enable_auto_config = false;
        model.config.min_split = 2;
        model.config.max_depth = 6;
        model.config.min_split_range = (2, 4);
        model.config.min_leaf_range = (1, 2);
        model.config.training_score = TrainingScore::OobScore;

        model.build_model().unwrap();
        assert!(model.able_to_inference());
        assert!(model.tree_count() > 0);

        let result = model.predict(&[0.0, 1.0]);
        assert!(result.success);
    }

    #[test]
    fn predict_without_a_trained_forest_fails_gracefully() {
        let platform = MemPlatform::new();
        let model = RandomForest::new(platform, "missing").unwrap();
        let result = model.predict(&[0.0, 0.0]);
        assert!(!result.success);
        assert_eq!(result.label_id, RF_ERROR_LABEL);
    }
}
