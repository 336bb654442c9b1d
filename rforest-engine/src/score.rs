//! Per-label confusion-matrix counters and aggregate metrics (spec §4.10),
//! grounded on `Rf_matrix_score` in `Rf_components.h`.

use crate::config::MetricScore;

#[derive(Debug, Clone, Default)]
struct LabelCounts {
    tp: u32,
    fp: u32,
    fn_: u32,
}

#[derive(Debug, Clone)]
pub struct ScoreMatrix {
    counts: Vec<LabelCounts>,
    total: u32,
    correct: u32,
}

impl ScoreMatrix {
    pub fn new(num_labels: usize) -> Self {
        ScoreMatrix {
            counts: vec![LabelCounts::default(); num_labels],
            total: 0,
            correct: 0,
        }
    }

    pub fn reset(&mut self) {
        for c in &mut self.counts {
            *c = LabelCounts::default();
        }
        self.total = 0;
        self.correct = 0;
    }

    /// Record one (actual, predicted) observation.
    pub fn update(&mut self, actual: u8, predicted: u8) {
        self.total += 1;
        if actual == predicted {
            self.correct += 1;
        }
        if let Some(c) = self.counts.get_mut(predicted as usize) {
            if actual == predicted {
                c.tp += 1;
            } else {
                c.fp += 1;
            }
        }
        if actual != predicted {
            if let Some(c) = self.counts.get_mut(actual as usize) {
                c.fn_ += 1;
            }
        }
    }

    pub fn accuracy(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f32 / self.total as f32
        }
    }

    /// `None` when the label has no support for this metric (neither
    /// predicted nor present as ground truth) — such labels are excluded
    /// from the metric's average, not counted as zero.
    pub fn precision(&self, label: usize) -> Option<f32> {
        let c = self.counts.get(label)?;
        let denom = c.tp + c.fp;
        if denom == 0 {
            None
        } else {
            Some(c.tp as f32 / denom as f32)
        }
    }

    pub fn recall(&self, label: usize) -> Option<f32> {
        let c = self.counts.get(label)?;
        let denom = c.tp + c.fn_;
        if denom == 0 {
            None
        } else {
            Some(c.tp as f32 / denom as f32)
        }
    }

    pub fn f1(&self, label: usize) -> Option<f32> {
        let p = self.precision(label)?;
        let r = self.recall(label)?;
        if p + r == 0.0 {
            None
        } else {
            Some(2.0 * p * r / (p + r))
        }
    }

    fn mean_over_labels<F: Fn(usize) -> Option<f32>>(&self, f: F) -> Option<f32> {
        let mut sum = 0.0;
        let mut n = 0;
        for label in 0..self.counts.len() {
            if let Some(v) = f(label) {
                sum += v;
                n += 1;
            }
        }
        if n == 0 {
            None
        } else {
            Some(sum / n as f32)
        }
    }

    pub fn mean_precision(&self) -> Option<f32> {
        self.mean_over_labels(|l| self.precision(l))
    }

    pub fn mean_recall(&self) -> Option<f32> {
        self.mean_over_labels(|l| self.recall(l))
    }

    pub fn mean_f1(&self) -> Option<f32> {
        self.mean_over_labels(|l| self.f1(l))
    }

    /// Combined score: the unweighted mean of every metric selected by the
    /// `metric_score` bitmask. Spec §4.10.
    pub fn combined_score(&self, metrics: MetricScore) -> f32 {
        let mut sum = 0.0;
        let mut n = 0;
        if metrics.contains(MetricScore::ACCURACY) {
            sum += self.accuracy();
            n += 1;
        }
        if metrics.contains(MetricScore::PRECISION) {
            if let Some(p) = self.mean_precision() {
                sum += p;
                n += 1;
            }
        }
        if metrics.contains(MetricScore::RECALL) {
            if let Some(r) = self.mean_recall() {
                sum += r;
                n += 1;
            }
        }
        if metrics.contains(MetricScore::F1_SCORE) {
            if let Some(f) = self.mean_f1() {
                sum += f;
                n += 1;
            }
        }
        if n == 0 {
            0.0
        } else {
            sum / n as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions_score_one() {
        let mut m = ScoreMatrix::new(2);
        for _ in 0..5 {
            m.update(0, 0);
        }
        for _ in 0..5 {
            m.update(1, 1);
        }
        assert_eq!(m.accuracy(), 1.0);
        assert_eq!(m.combined_score(MetricScore::all()), 1.0);
    }

    #[test]
    fn unsupported_label_excluded_from_average() {
        let mut m = ScoreMatrix::new(3);
        m.update(0, 0);
        m.update(1, 1);
        // label 2 never appears as actual or predicted
        assert!(m.precision(2).is_none());
        assert_eq!(m.mean_precision(), Some(1.0));
    }

    #[test]
    fn confusion_updates_precision_recall() {
        let mut m = ScoreMatrix::new(2);
        m.update(0, 1); // false negative for 0, false positive for 1
        m.update(1, 1); // true positive for 1
        assert_eq!(m.recall(1), Some(1.0));
        assert_eq!(m.precision(1), Some(0.5));
    }
}
