//! Contract for the feature quantiser (spec §1: out of scope, "consumed as
//! a pure function"). `TableQuantizer` loads the packed edge table
//! `Rf_quantizer` writes to the `_ctg.csv` file, just enough to round-trip
//! raw `f32` features into packed bins for the integration tests — this
//! crate never owns quantiser *training*.

use crate::error::{EngineError, EngineResult};

pub trait Quantizer {
    /// Quantize one raw feature vector into `num_features()` bins, each in
    /// `[0, 2^bits() - 1]`.
    fn quantize(&self, features: &[f32]) -> Vec<u8>;
    fn num_features(&self) -> u16;
    fn bits(&self) -> u8;
}

/// A per-feature sorted list of bin-edge thresholds, loaded from a
/// `_ctg.csv` file: one row per feature, `feature_index,edge_0,edge_1,...`.
#[derive(Debug, Clone)]
pub struct TableQuantizer {
    bits: u8,
    edges: Vec<Vec<f32>>,
}

impl TableQuantizer {
    pub fn new(bits: u8, edges: Vec<Vec<f32>>) -> Self {
        TableQuantizer { bits, edges }
    }

    pub fn from_csv(bits: u8, text: &str) -> EngineResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());
        let mut edges = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| EngineError::Format(e.to_string()))?;
            let mut row = Vec::with_capacity(record.len().saturating_sub(1));
            for field in record.iter().skip(1) {
                row.push(
                    field
                        .parse::<f32>()
                        .map_err(|_| EngineError::Format("non-numeric quantizer edge".into()))?,
                );
            }
            edges.push(row);
        }
        Ok(TableQuantizer { bits, edges })
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for (i, row) in self.edges.iter().enumerate() {
            out.push_str(&i.to_string());
            for edge in row {
                out.push(',');
                out.push_str(&edge.to_string());
            }
            out.push('\n');
        }
        out
    }
}

impl Quantizer for TableQuantizer {
    fn quantize(&self, features: &[f32]) -> Vec<u8> {
        let max_bin = ((1u32 << self.bits) - 1) as u8;
        features
            .iter()
            .enumerate()
            .map(|(i, &value)| {
                let Some(edges) = self.edges.get(i) else {
                    return 0;
                };
                let mut bin = 0u8;
                for &edge in edges {
                    if value > edge {
                        bin = bin.saturating_add(1);
                    } else {
                        break;
                    }
                }
                bin.min(max_bin)
            })
            .collect()
    }

    fn num_features(&self) -> u16 {
        self.edges.len() as u16
    }

    fn bits(&self) -> u8 {
        self.bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_bins_by_edges() {
        let q = TableQuantizer::new(2, vec![vec![1.0, 2.0, 3.0]]);
        assert_eq!(q.quantize(&[0.5]), vec![0]);
        assert_eq!(q.quantize(&[1.5]), vec![1]);
        assert_eq!(q.quantize(&[2.5]), vec![2]);
        assert_eq!(q.quantize(&[10.0]), vec![3]);
    }

    #[test]
    fn csv_round_trip() {
        let q = TableQuantizer::new(3, vec![vec![1.0, 2.0], vec![0.5]]);
        let csv = q.to_csv();
        let parsed = TableQuantizer::from_csv(3, &csv).unwrap();
        assert_eq!(parsed.num_features(), 2);
        assert_eq!(parsed.quantize(&[1.5, 0.0]), vec![1, 0]);
    }
}
