//! Hyperparameters and dataset statistics (spec §4.9), grounded on
//! `Rf_config` in `Rf_components.h`: JSON-persisted config, `_dp.csv`
//! dataset parameters, auto-configuration rules, and the per-`Q` threshold
//! candidate set shared by the builder and `TreeStore::predict`.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

const ENABLE_TEST_DATA: bool = true;
pub(crate) const RF_MAX_SAMPLES: u32 = u16::MAX as u32 - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Criterion {
    Gini,
    Entropy,
}

bitflags::bitflags! {
    /// `metric_score` is a bitmask in the original (accuracy/precision/
    /// recall/F1 can be combined); ScoreMatrix averages over whichever bits
    /// are set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MetricScore: u8 {
        const ACCURACY  = 1 << 0;
        const PRECISION = 1 << 1;
        const RECALL    = 1 << 2;
        const F1_SCORE  = 1 << 3;
    }
}

impl Serialize for MetricScore {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for MetricScore {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Ok(MetricScore::from_bits_truncate(bits))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingScore {
    OobScore,
    ValidScore,
    KFoldScore,
}

/// Model hyperparameters plus the dataset statistics that drive
/// auto-configuration. Persisted as flat JSON (`*_config.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub num_trees: u16,
    pub random_seed: u64,
    pub min_split: u16,
    pub max_depth: u16,
    pub train_ratio: f32,
    pub test_ratio: f32,
    pub valid_ratio: f32,
    pub use_bootstrap: bool,
    pub bootstrap_ratio: f32,
    pub criterion: Criterion,
    pub k_folds: u8,
    pub impurity_threshold: f32,
    pub metric_score: MetricScore,
    pub training_score: TrainingScore,
    pub extend_base_data: bool,
    pub enable_retrain: bool,
    pub enable_auto_config: bool,
    pub result_score: f32,

    /// Dataset parameters, not persisted to the flat config JSON but kept
    /// alongside it in memory: mirrors the `*_dp.csv` on-disk layout.
    #[serde(skip)]
    pub dataset: DatasetParams,

    #[serde(skip)]
    pub min_split_range: (u16, u16),
    #[serde(skip)]
    pub max_depth_range: (u16, u16),
    #[serde(skip)]
    pub min_leaf_range: (u16, u16),
}

#[derive(Debug, Clone, Default)]
pub struct DatasetParams {
    pub num_features: u16,
    pub num_samples: u32,
    pub num_labels: u8,
    pub quantization_coefficient: u8,
    pub max_feature_value: u16,
    pub features_per_byte: f32,
    pub samples_per_label: Vec<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            num_trees: 50,
            random_seed: 0,
            min_split: 0,
            max_depth: 0,
            train_ratio: 0.7,
            test_ratio: 0.15,
            valid_ratio: 0.15,
            use_bootstrap: true,
            bootstrap_ratio: 1.0,
            criterion: Criterion::Gini,
            k_folds: 5,
            impurity_threshold: 0.001,
            metric_score: MetricScore::ACCURACY,
            training_score: TrainingScore::OobScore,
            extend_base_data: true,
            enable_retrain: true,
            enable_auto_config: true,
            result_score: 0.0,
            dataset: DatasetParams::default(),
            min_split_range: (2, 8),
            max_depth_range: (4, 12),
            min_leaf_range: (1, 4),
        }
    }
}

impl Config {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Parse a flat config JSON object. The original's parser is a
    /// permissive hand-rolled key scanner; `serde_json` subsumes it while
    /// keeping unknown keys from causing a hard failure (`#[serde(default)]`
    /// semantics would require every field optional, so instead we parse
    /// into a loose `serde_json::Value` map and fall back to defaults for
    /// anything missing or malformed).
    pub fn from_json(text: &str) -> EngineResult<Config> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| EngineError::Config(format!("malformed config json: {e}")))?;
        let mut cfg = Config::default();
        macro_rules! take_num {
            ($key:literal, $field:expr, $cast:ty) => {
                if let Some(v) = value.get($key).and_then(|v| v.as_f64()) {
                    $field = v as $cast;
                }
            };
        }
        macro_rules! take_bool {
            ($key:literal, $field:expr) => {
                if let Some(v) = value.get($key).and_then(|v| v.as_bool()) {
                    $field = v;
                }
            };
        }
        take_num!("numTrees", cfg.num_trees, u16);
        take_num!("randomSeed", cfg.random_seed, u64);
        take_num!("minSplit", cfg.min_split, u16);
        take_num!("maxDepth", cfg.max_depth, u16);
        take_num!("train_ratio", cfg.train_ratio, f32);
        take_num!("test_ratio", cfg.test_ratio, f32);
        take_num!("valid_ratio", cfg.valid_ratio, f32);
        take_bool!("useBootstrap", cfg.use_bootstrap);
        take_num!("boostrapRatio", cfg.bootstrap_ratio, f32);
        take_num!("k_folds", cfg.k_folds, u8);
        take_num!("impurityThreshold", cfg.impurity_threshold, f32);
        take_bool!("extendBaseData", cfg.extend_base_data);
        take_bool!("enableRetrain", cfg.enable_retrain);
        take_bool!("enableAutoConfig", cfg.enable_auto_config);
        take_num!("resultScore", cfg.result_score, f32);
        if let Some(s) = value.get("criterion").and_then(|v| v.as_str()) {
            cfg.criterion = match s {
                "entropy" => Criterion::Entropy,
                _ => Criterion::Gini,
            };
        }
        if let Some(s) = value.get("metric_score").and_then(|v| v.as_str()) {
            cfg.metric_score = match s {
                "PRECISION" => MetricScore::PRECISION,
                "RECALL" => MetricScore::RECALL,
                "F1_SCORE" => MetricScore::F1_SCORE,
                _ => MetricScore::ACCURACY,
            };
        }
        if let Some(s) = value.get("trainingScore").and_then(|v| v.as_str()) {
            cfg.training_score = match s {
                "valid_score" => TrainingScore::ValidScore,
                "k_fold_score" => TrainingScore::KFoldScore,
                _ => TrainingScore::OobScore,
            };
        }
        Ok(cfg)
    }

    /// Bits required to label-encode up to `n-1` inclusive, rounded up to
    /// one of `{1,2,4,8}` per spec §3.
    pub fn label_bits(num_labels: u32) -> u8 {
        let needed = bits_needed(num_labels.saturating_sub(1).max(0));
        if needed <= 1 {
            1
        } else if needed <= 2 {
            2
        } else if needed <= 4 {
            4
        } else {
            8
        }
    }

    /// Spec §4.9: precomputed, per-`Q` candidate thresholds, grounded on
    /// `Rf_components::buildThresholdCandidates`.
    pub fn threshold_candidates(bits: u8) -> Vec<u16> {
        let bits = bits.clamp(1, 8);
        if bits <= 1 {
            return vec![0];
        }
        if bits == 2 {
            return vec![0, 1, 2];
        }
        let max_value: u16 = (1u16 << bits) - 1;
        let available_odd = max_value / 2;
        if available_odd == 0 {
            return vec![if max_value > 0 { max_value - 1 } else { 0 }];
        }
        let desired = available_odd.min(8);
        let mut out = Vec::with_capacity(desired as usize);
        for i in 0..desired {
            let numerator = (2 * i as u32 + 1) * available_odd as u32;
            let mut odd_index = (numerator / (2 * desired as u32)) as u16;
            if odd_index >= available_odd {
                odd_index = available_odd - 1;
            }
            let mut threshold = 2 * odd_index + 1;
            if threshold >= max_value {
                threshold = max_value - 1;
            }
            if let Some(&last) = out.last() {
                if threshold <= last {
                    let mut candidate = last + 2;
                    if candidate >= max_value {
                        candidate = max_value - 1;
                    }
                    threshold = candidate;
                }
            }
            out.push(threshold);
        }
        out
    }

    /// Lowest per-label share of the dataset, as a percentage (0..100).
    fn lowest_distribution(&self) -> f32 {
        let total = self.dataset.num_samples.max(1) as f32;
        self.dataset
            .samples_per_label
            .iter()
            .copied()
            .map(|c| 100.0 * c as f32 / total)
            .fold(f32::MAX, f32::min)
            .min(100.0)
    }

    /// Spec §4.9: metric selection by class-imbalance ratio, training-score
    /// selection by average samples/label, ratio renormalisation, min_split/
    /// max_depth search grid, impurity-threshold formula. Applied whenever
    /// `enable_auto_config` is set or no config file was present.
    pub fn auto_config(&mut self) {
        if !self.dataset.samples_per_label.is_empty() {
            let lowest = self.lowest_distribution();
            let max_imbalance_ratio = if lowest > 0.0 { 100.0 / lowest } else { f32::MAX };
            self.metric_score = if max_imbalance_ratio > 10.0 {
                MetricScore::RECALL
            } else if max_imbalance_ratio > 3.0 {
                MetricScore::F1_SCORE
            } else if max_imbalance_ratio > 1.5 {
                MetricScore::PRECISION
            } else {
                MetricScore::ACCURACY
            };
        }

        let num_labels = self.dataset.num_labels.max(1) as u32;
        let avg_samples_per_label = self.dataset.num_samples / num_labels.max(1);
        self.training_score = if avg_samples_per_label < 200 {
            TrainingScore::KFoldScore
        } else if avg_samples_per_label < 500 {
            TrainingScore::OobScore
        } else {
            TrainingScore::ValidScore
        };

        self.validate_ratios();
        self.generate_ranges();
        self.generate_impurity_threshold();
    }

    fn rarest_class(&self) -> u32 {
        self.dataset
            .samples_per_label
            .iter()
            .copied()
            .min()
            .unwrap_or(RF_MAX_SAMPLES)
    }

    fn validate_ratios(&mut self) {
        let rarest = self.rarest_class();
        if self.enable_auto_config {
            if rarest < 150 {
                self.train_ratio = 0.6;
                self.test_ratio = 0.2;
                self.valid_ratio = 0.2;
            } else {
                self.train_ratio = 0.7;
                self.test_ratio = 0.15;
                self.valid_ratio = 0.15;
            }
        }
        if self.training_score != TrainingScore::ValidScore {
            self.train_ratio += self.valid_ratio;
            self.valid_ratio = 0.0;
        } else if self.valid_ratio < 0.1 {
            self.valid_ratio = if rarest < 150 { 0.2 } else { 0.15 };
            self.train_ratio -= self.valid_ratio;
        }
        if !ENABLE_TEST_DATA {
            self.train_ratio += self.test_ratio;
            self.test_ratio = 0.0;
        }
        let total = self.train_ratio + self.test_ratio + self.valid_ratio;
        if total > 1.0 {
            self.train_ratio /= total;
            self.test_ratio /= total;
            self.valid_ratio /= total;
        }
    }

    fn generate_ranges(&mut self) {
        let num_samples = self.dataset.num_samples.max(1) as f64;
        let num_features = self.dataset.num_features.max(1) as f64;

        let baseline_minsplit_ratio = (100 * (self.dataset.num_samples / 500 + 1)).min(500) as f64;
        let min_min_split = (2i32).max((num_samples / baseline_minsplit_ratio) as i32 - 2) as u16;
        let dynamic_max_split =
            ((min_min_split as i32 + 6) as f64).min(num_samples.log2() / 4.0 + num_features / 25.0);
        let mut max_min_split = (24i32.min(dynamic_max_split as i32) - 2) as u16;
        if max_min_split <= min_min_split {
            max_min_split = min_min_split + 4;
        }

        let base_max_depth =
            ((num_samples * 2.0).log2()).max(num_features.log2() * 2.5) as i32;
        let max_max_depth = 6i32.max(base_max_depth) as u16;
        let dynamic_min_depth = 4i32.max((num_features.log2() + 2.0) as i32);
        let mut min_max_depth = (max_max_depth as i32 - 2).min(dynamic_min_depth) as u16;
        if min_max_depth >= max_max_depth {
            min_max_depth = max_max_depth.saturating_sub(2);
        }
        min_max_depth = min_max_depth.max(4);

        if self.min_split == 0 || self.max_depth == 0 {
            self.min_split = (min_min_split + max_min_split) / 2;
            self.max_depth = (min_max_depth + max_max_depth) / 2;
        }

        self.min_split_range = (min_min_split, max_min_split);
        self.max_depth_range = (min_max_depth, max_max_depth);
        // `min_leaf_range` is not present in the source snapshot (spec §9
        // Open Questions); modeled analogously to `min_split_range`, scaled
        // down since a leaf only needs to hold a handful of samples.
        let min_leaf_lo = 1u16;
        let min_leaf_hi = (min_min_split / 2).max(min_leaf_lo + 1);
        self.min_leaf_range = (min_leaf_lo, min_leaf_hi);
    }

    fn generate_impurity_threshold(&mut self) {
        if self.dataset.samples_per_label.is_empty() {
            self.impurity_threshold = 0.0;
            return;
        }
        let k = (self.dataset.num_labels.max(2)) as f32;
        let expected_min_pct = 100.0 / k;
        let lowest = self.lowest_distribution();
        let deficit = (expected_min_pct - lowest).max(0.0);
        let imbalance = if expected_min_pct > 0.0 {
            (deficit / expected_min_pct).min(1.0)
        } else {
            0.0
        };

        let sample_factor =
            (0.75 + (2.0f64.max(self.dataset.num_samples as f64)).log2() / 12.0).min(2.0) as f32;
        let imbalance_factor = 1.0 - 0.5 * imbalance;
        let feature_factor = 0.9
            + 0.1 * (((2u32.max(self.dataset.num_features as u32)) as f32).log2() / 8.0).min(1.0);

        self.impurity_threshold = match self.criterion {
            Criterion::Gini => {
                let max_gini = 1.0 - 1.0 / k;
                let base = 0.003 * max_gini;
                let thr = base * sample_factor * imbalance_factor * feature_factor;
                thr.clamp(0.0005, 0.02)
            }
            Criterion::Entropy => {
                let max_entropy = k.log2();
                let base = 0.02 * if max_entropy > 0.0 { max_entropy } else { 1.0 };
                let thr = base * sample_factor * imbalance_factor * feature_factor;
                thr.clamp(0.005, 0.2)
            }
        };
    }

    /// §8's "adaptive impurity threshold" used during split search, distinct
    /// from `impurity_threshold` (the base value this derives from).
    pub fn adaptive_impurity_threshold(&self, total_samples: u32) -> f32 {
        let adaptive =
            self.impurity_threshold / (1.0 + (total_samples as f32 + 1.0).log2());
        adaptive.max(0.0001)
    }

    /// Two-column `parameter,value` CSV, rows in the exact order §6
    /// specifies. Written with the `csv` crate (the same dependency
    /// `SampleStore::convert_csv_to_binary` uses for the dataset CSV) rather
    /// than hand-joined strings.
    pub fn dataset_params_csv(&self) -> EngineResult<String> {
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        writer
            .write_record(["parameter", "value"])
            .map_err(|e| EngineError::Format(e.to_string()))?;
        let rows: Vec<(String, String)> = vec![
            (
                "quantization_coefficient".into(),
                self.dataset.quantization_coefficient.to_string(),
            ),
            ("max_feature_value".into(), self.dataset.max_feature_value.to_string()),
            ("features_per_byte".into(), self.dataset.features_per_byte.to_string()),
            ("num_features".into(), self.dataset.num_features.to_string()),
            ("num_samples".into(), self.dataset.num_samples.to_string()),
            ("num_labels".into(), self.dataset.num_labels.to_string()),
        ];
        for (key, value) in rows {
            writer
                .write_record([key.as_str(), value.as_str()])
                .map_err(|e| EngineError::Format(e.to_string()))?;
        }
        for (i, count) in self.dataset.samples_per_label.iter().enumerate() {
            writer
                .write_record([format!("samples_label_{i}"), count.to_string()])
                .map_err(|e| EngineError::Format(e.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| EngineError::Format(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| EngineError::Format(e.to_string()))
    }

    pub fn parse_dataset_params_csv(text: &str) -> EngineResult<DatasetParams> {
        let mut params = DatasetParams::default();
        let mut per_label: std::collections::BTreeMap<usize, u32> = std::collections::BTreeMap::new();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(text.as_bytes());
        for record in reader.records() {
            let record = record.map_err(|e| EngineError::Format(e.to_string()))?;
            let (Some(key), Some(value)) = (record.get(0), record.get(1)) else {
                continue;
            };
            if let Some(idx) = key.strip_prefix("samples_label_") {
                if let (Ok(idx), Ok(v)) = (idx.parse::<usize>(), value.parse::<u32>()) {
                    per_label.insert(idx, v);
                }
                continue;
            }
            match key {
                "quantization_coefficient" => params.quantization_coefficient = value.parse().unwrap_or(0),
                "max_feature_value" => params.max_feature_value = value.parse().unwrap_or(0),
                "features_per_byte" => params.features_per_byte = value.parse().unwrap_or(0.0),
                "num_features" => params.num_features = value.parse().unwrap_or(0),
                "num_samples" => params.num_samples = value.parse().unwrap_or(0),
                "num_labels" => params.num_labels = value.parse().unwrap_or(0),
                _ => {}
            }
        }
        let max_idx = per_label.keys().copied().max().map(|m| m + 1).unwrap_or(0);
        params.samples_per_label = (0..max_idx).map(|i| per_label.get(&i).copied().unwrap_or(0)).collect();
        if params.num_labels as usize > params.samples_per_label.len() {
            params
                .samples_per_label
                .resize(params.num_labels as usize, 0);
        }
        Ok(params)
    }
}

fn bits_needed(mut max_value: u32) -> u32 {
    let mut bits = 1u32;
    max_value = max_value.max(1);
    while (1u32 << bits) <= max_value {
        bits += 1;
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_candidates_q1_is_single_zero() {
        assert_eq!(Config::threshold_candidates(1), vec![0]);
    }

    #[test]
    fn threshold_candidates_strictly_increasing_and_bounded() {
        for bits in 1..=8u8 {
            let cand = Config::threshold_candidates(bits);
            let max_value = (1u16 << bits) - 1;
            for w in cand.windows(2) {
                assert!(w[0] < w[1]);
            }
            assert!(cand.iter().all(|&t| t < max_value));
        }
    }

    #[test]
    fn label_bits_rounds_up_to_power_of_two_family() {
        assert_eq!(Config::label_bits(1), 1);
        assert_eq!(Config::label_bits(2), 1);
        assert_eq!(Config::label_bits(3), 2);
        assert_eq!(Config::label_bits(5), 4);
        assert_eq!(Config::label_bits(200), 8);
    }

    #[test]
    fn auto_config_picks_recall_for_highly_imbalanced_data() {
        let mut cfg = Config::default();
        cfg.dataset.num_samples = 1000;
        cfg.dataset.num_labels = 2;
        cfg.dataset.samples_per_label = vec![950, 50];
        cfg.auto_config();
        assert_eq!(cfg.metric_score, MetricScore::RECALL);
    }

    #[test]
    fn auto_config_picks_accuracy_for_balanced_data() {
        let mut cfg = Config::default();
        cfg.dataset.num_samples = 1000;
        cfg.dataset.num_labels = 2;
        cfg.dataset.samples_per_label = vec![500, 500];
        cfg.auto_config();
        assert_eq!(cfg.metric_score, MetricScore::ACCURACY);
    }

    #[test]
    fn dataset_params_csv_round_trip() {
        let mut cfg = Config::default();
        cfg.dataset.num_features = 4;
        cfg.dataset.num_samples = 10;
        cfg.dataset.num_labels = 2;
        cfg.dataset.quantization_coefficient = 2;
        cfg.dataset.max_feature_value = 3;
        cfg.dataset.features_per_byte = 4.0;
        cfg.dataset.samples_per_label = vec![6, 4];

        let csv = cfg.dataset_params_csv().unwrap();
        let parsed = Config::parse_dataset_params_csv(&csv).unwrap();
        assert_eq!(parsed.num_features, 4);
        assert_eq!(parsed.num_samples, 10);
        assert_eq!(parsed.samples_per_label, vec![6, 4]);
    }
}
