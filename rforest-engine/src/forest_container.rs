//! Forest orchestration (spec §4.6), grounded on `Rf_tree_container` in
//! `Rf_components.h`: node-layout derivation, individual-vs-unified
//! persistence, and the plurality-vote prediction wrapper around
//! `embedded_rforest::forest::vote`.

use embedded_rforest::forest::vote;
use embedded_rforest::platform::{FileHandle, FileMode, Platform};
use embedded_rforest::tree::{NodeLayout, Tree, RF_ERROR_LABEL};

use crate::error::{EngineError, EngineResult};
use crate::tree_store;

const MAGIC: [u8; 4] = *b"FORS";

/// Owns the trees of one model: either fully loaded in memory, persisted as
/// per-tree files during training, or persisted as one unified file after
/// training completes. `unified` is one-way per session: once set by
/// [`release_forest`](Self::release_forest) it never reverts.
pub struct Forest {
    pub trees: Vec<Tree>,
    pub layout: NodeLayout,
    unified: bool,
}

impl Forest {
    /// Node-layout widths derived from `(num_labels, num_features,
    /// estimated_nodes)`: `ceil(log2(x))` per field, capped at
    /// `(feature=10, label=8, child=10)`.
    pub fn derive_layout(num_features: u32, num_labels: u32, estimated_nodes: u32) -> NodeLayout {
        NodeLayout::fit(num_features, num_labels, estimated_nodes)
    }

    pub fn new(layout: NodeLayout) -> Self {
        Forest {
            trees: Vec::new(),
            layout,
            unified: false,
        }
    }

    pub fn is_unified(&self) -> bool {
        self.unified
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Persist one finished tree immediately, freeing RAM during training.
    /// Used between build steps rather than at the end of a session.
    pub fn release_tree<P: Platform>(&self, platform: &P, model_root: &str, tree: &Tree) -> EngineResult<()> {
        let path = format!("{model_root}/tree_{}.bin", tree.index);
        tree_store::release(platform, &path, tree, true)?;
        Ok(())
    }

    pub fn load_tree<P: Platform>(&self, platform: &P, model_root: &str, index: u8, depth: u16) -> EngineResult<Tree> {
        let path = format!("{model_root}/tree_{index}.bin");
        tree_store::load(platform, &path, index, self.layout, depth, true)
    }

    /// Walks every loaded tree and writes the unified `"FORS"` file, then
    /// deletes all per-tree files. One-way: afterwards `is_unified()` is
    /// always true for this session.
    pub fn release_forest<P: Platform>(&mut self, platform: &P, forest_path: &str, model_root: &str) -> EngineResult<()> {
        let mut file = platform
            .open(forest_path, FileMode::Write)
            .map_err(|e| EngineError::io(forest_path, std::io::Error::other(format!("{e:?}"))))?;
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.push(self.trees.len() as u8);
        for tree in &self.trees {
            buf.push(tree.index);
            buf.extend_from_slice(&(tree.nodes.len() as u32).to_le_bytes());
            for node in &tree.nodes {
                buf.extend_from_slice(&node.0.to_le_bytes());
            }
        }
        file.write_all(&buf).map_err(|e| EngineError::Format(format!("{e:?}")))?;

        for tree in &self.trees {
            let path = format!("{model_root}/tree_{}.bin", tree.index);
            if platform.exists(&path) {
                let _ = platform.remove(&path);
            }
        }
        self.unified = true;
        Ok(())
    }

    /// Reads the unified file when `is_unified()` (or one already exists on
    /// disk), otherwise falls back to per-tree loading of `tree_count`
    /// trees from `model_root`.
    pub fn load_forest<P: Platform>(&mut self, platform: &P, forest_path: &str, model_root: &str, tree_count: u8) -> EngineResult<()> {
        if platform.exists(forest_path) {
            self.load_unified(platform, forest_path)?;
            self.unified = true;
            return Ok(());
        }
        self.trees.clear();
        for index in 0..tree_count {
            let tree = self.load_tree(platform, model_root, index, 0)?;
            self.trees.push(tree);
        }
        self.unified = false;
        Ok(())
    }

    fn load_unified<P: Platform>(&mut self, platform: &P, forest_path: &str) -> EngineResult<()> {
        let mut file = platform
            .open(forest_path, FileMode::Read)
            .map_err(|e| EngineError::io(forest_path, std::io::Error::other(format!("{e:?}"))))?;
        let mut header = [0u8; 5];
        file.read_exact(&mut header)
            .map_err(|_| EngineError::Format("truncated forest header".into()))?;
        if header[0..4] != MAGIC {
            return Err(EngineError::Format("bad forest magic".into()));
        }
        let tree_count = header[4];

        let mut trees = Vec::with_capacity(tree_count as usize);
        for _ in 0..tree_count {
            let mut prefix = [0u8; 5];
            file.read_exact(&mut prefix)
                .map_err(|_| EngineError::Format("truncated forest tree prefix".into()))?;
            let index = prefix[0];
            let node_count = u32::from_le_bytes(prefix[1..5].try_into().unwrap());
            let mut words = vec![0u8; node_count as usize * 4];
            file.read_exact(&mut words)
                .map_err(|_| EngineError::Format("truncated forest tree body".into()))?;
            let nodes = words
                .chunks_exact(4)
                .map(|c| embedded_rforest::tree::TreeNode(u32::from_le_bytes(c.try_into().unwrap())))
                .collect();
            trees.push(Tree {
                nodes,
                layout: self.layout,
                depth: 0,
                index,
            });
        }
        self.trees = trees;
        Ok(())
    }

    /// Plurality vote across every tree. Returns `RF_ERROR_LABEL` if the
    /// forest is empty or every tree voted out of range.
    pub fn predict(&self, packed_features: &[u8], thresholds: &[u16], num_labels: u32) -> u8 {
        if self.trees.is_empty() {
            return RF_ERROR_LABEL;
        }
        vote(&self.trees, packed_features, thresholds, num_labels)
    }
}
