//! Persistence for a single [`Tree`] (spec §4.5), grounded on
//! `Rf_tree::release`/`load` in `Rf_components.h`: the `"TREE"`-magic
//! per-tree binary format, kept separate from `embedded_rforest::tree`
//! because it needs `Platform`.

use embedded_rforest::platform::{FileHandle, FileMode, Platform};
use embedded_rforest::tree::{NodeLayout, Tree, TreeNode, RF_MAX_NODES};

use crate::error::{EngineError, EngineResult};

const MAGIC: [u8; 4] = *b"TREE";

/// Writes `"TREE"`, `u32 node_count`, then `node_count` packed `u32` words.
/// `reuse = false` drops the in-memory node vector after a successful
/// write (this crate models that by returning an empty replacement).
pub fn release<P: Platform>(platform: &P, path: &str, tree: &Tree, reuse: bool) -> EngineResult<Option<Tree>> {
    let mut file = platform
        .open(path, FileMode::Write)
        .map_err(|e| EngineError::io(path, std::io::Error::other(format!("{e:?}"))))?;
    let mut buf = Vec::with_capacity(4 + 4 + tree.nodes.len() * 4);
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&(tree.nodes.len() as u32).to_le_bytes());
    for node in &tree.nodes {
        buf.extend_from_slice(&node.0.to_le_bytes());
    }
    file.write_all(&buf).map_err(|e| EngineError::Format(format!("{e:?}")))?;

    if reuse {
        Ok(None)
    } else {
        Ok(Some(Tree {
            nodes: Vec::new(),
            layout: tree.layout,
            depth: tree.depth,
            index: tree.index,
        }))
    }
}

/// Verifies the magic and node count (must be in `1..=RF_MAX_NODES`), then
/// reads the node words. `reuse = false` removes the file after a
/// successful load.
pub fn load<P: Platform>(platform: &P, path: &str, index: u8, layout: NodeLayout, depth: u16, reuse: bool) -> EngineResult<Tree> {
    let mut file = platform
        .open(path, FileMode::Read)
        .map_err(|e| EngineError::io(path, std::io::Error::other(format!("{e:?}"))))?;
    let mut header = [0u8; 8];
    file.read_exact(&mut header)
        .map_err(|_| EngineError::Format("truncated tree header".into()))?;
    if header[0..4] != MAGIC {
        return Err(EngineError::Format("bad tree magic".into()));
    }
    let node_count = u32::from_le_bytes(header[4..8].try_into().unwrap());
    if node_count == 0 || node_count > RF_MAX_NODES as u32 {
        return Err(EngineError::Format(format!("tree node count {node_count} out of range")));
    }

    let mut words = vec![0u8; node_count as usize * 4];
    file.read_exact(&mut words)
        .map_err(|_| EngineError::Format("truncated tree body".into()))?;
    let nodes = words
        .chunks_exact(4)
        .map(|c| TreeNode(u32::from_le_bytes(c.try_into().unwrap())))
        .collect();

    if !reuse {
        platform
            .remove(path)
            .map_err(|e| EngineError::io(path, std::io::Error::other(format!("{e:?}"))))?;
    }

    Ok(Tree { nodes, layout, depth, index })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform_mem::MemPlatform;

    #[test]
    fn round_trip_preserves_nodes() {
        let platform = MemPlatform::new();
        let layout = NodeLayout::default_layout();
        let mut tree = Tree::new(3, layout);
        tree.nodes.push(TreeNode::branch(0, 0, 1, &layout));
        tree.nodes.push(TreeNode::leaf(5, &layout));
        tree.nodes.push(TreeNode::leaf(9, &layout));
        tree.depth = 2;

        release(&platform, "/m/tree_3.bin", &tree, true).unwrap();
        let loaded = load(&platform, "/m/tree_3.bin", 3, layout, 2, true).unwrap();
        assert_eq!(loaded.nodes.len(), 3);
        assert_eq!(loaded.nodes[1], TreeNode::leaf(5, &layout));
        assert!(platform.exists("/m/tree_3.bin"));
    }

    #[test]
    fn load_removes_file_when_not_reused() {
        let platform = MemPlatform::new();
        let layout = NodeLayout::default_layout();
        let mut tree = Tree::new(0, layout);
        tree.nodes.push(TreeNode::leaf(1, &layout));
        release(&platform, "/m/tree_0.bin", &tree, true).unwrap();

        load(&platform, "/m/tree_0.bin", 0, layout, 0, false).unwrap();
        assert!(!platform.exists("/m/tree_0.bin"));
    }

    #[test]
    fn rejects_out_of_range_node_count() {
        let platform = MemPlatform::new();
        let mut file = platform.open("/m/bad.bin", FileMode::Write).unwrap();
        file.write_all(b"TREE").unwrap();
        file.write_all(&0u32.to_le_bytes()).unwrap();
        let layout = NodeLayout::default_layout();
        assert!(load(&platform, "/m/bad.bin", 0, layout, 0, true).is_err());
    }
}
