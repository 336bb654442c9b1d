//! Contract for the node-count predictor (spec §1: out of scope, "trivial
//! 3-coefficient linear model"). Owns only the `*_node_pred.bin` (`"NODE"`
//! magic) read/write pair and the linear estimate; this crate never owns
//! the predictor's training.

use embedded_rforest::platform::{FileHandle, FileMode, Platform};

use crate::error::{EngineError, EngineResult};

const MAGIC: [u8; 4] = *b"NODE";

#[derive(Debug, Clone, Copy, Default)]
pub struct NodePredictor {
    pub is_trained: bool,
    pub accuracy_percent: u8,
    pub peak_percent: u8,
    pub coefficients: [f32; 3],
}

impl NodePredictor {
    /// `bias + min_split_coeff * min_split + max_depth_coeff * max_depth`.
    pub fn estimate(&self, min_split: u16, max_depth: u16) -> u32 {
        let [bias, min_split_coeff, max_depth_coeff] = self.coefficients;
        let estimate = bias + min_split_coeff * min_split as f32 + max_depth_coeff * max_depth as f32;
        estimate.max(0.0) as u32
    }

    pub fn save<P: Platform>(&self, platform: &P, path: &str) -> EngineResult<()> {
        let mut file = platform
            .open(path, FileMode::Write)
            .map_err(|e| EngineError::Format(e.to_string()))?;
        let mut buf = Vec::with_capacity(4 + 1 + 1 + 1 + 1 + 12);
        buf.extend_from_slice(&MAGIC);
        buf.push(self.is_trained as u8);
        buf.push(self.accuracy_percent);
        buf.push(self.peak_percent);
        buf.push(3u8);
        for c in self.coefficients {
            buf.extend_from_slice(&c.to_le_bytes());
        }
        file.write_all(&buf)
            .map_err(|e| EngineError::Format(e.to_string()))?;
        Ok(())
    }

    pub fn load<P: Platform>(platform: &P, path: &str) -> EngineResult<Self> {
        let mut file = platform
            .open(path, FileMode::Read)
            .map_err(|e| EngineError::Format(e.to_string()))?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header)
            .map_err(|e| EngineError::Format(e.to_string()))?;
        if header[0..4] != MAGIC {
            return Err(EngineError::Format("bad node-predictor magic".into()));
        }
        let is_trained = header[4] != 0;
        let accuracy_percent = header[5];
        let peak_percent = header[6];
        let num_coefficients = header[7];
        if num_coefficients != 3 {
            return Err(EngineError::Format("unexpected coefficient count".into()));
        }
        let mut coeff_bytes = [0u8; 12];
        file.read_exact(&mut coeff_bytes)
            .map_err(|e| EngineError::Format(e.to_string()))?;
        let mut coefficients = [0f32; 3];
        for (i, chunk) in coeff_bytes.chunks_exact(4).enumerate() {
            coefficients[i] = f32::from_le_bytes(chunk.try_into().unwrap());
        }
        Ok(NodePredictor {
            is_trained,
            accuracy_percent,
            peak_percent,
            coefficients,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform_mem::MemPlatform;

    #[test]
    fn save_load_round_trip() {
        let platform = MemPlatform::new();
        let pred = NodePredictor {
            is_trained: true,
            accuracy_percent: 92,
            peak_percent: 60,
            coefficients: [10.0, 1.5, 2.25],
        };
        pred.save(&platform, "/m/m_node_pred.bin").unwrap();
        let loaded = NodePredictor::load(&platform, "/m/m_node_pred.bin").unwrap();
        assert_eq!(loaded.is_trained, true);
        assert_eq!(loaded.accuracy_percent, 92);
        assert_eq!(loaded.coefficients, [10.0, 1.5, 2.25]);
        assert_eq!(loaded.estimate(4, 10), (10.0 + 1.5 * 4.0 + 2.25 * 10.0) as u32);
    }
}
