//! An append-only arena of block metadata, linked by `u32` indices instead
//! of `Rc`/`RefCell` pointers. A doubly-linked parent/child graph has no
//! cycle-free Rust representation, so this crate keeps the nodes in a
//! `Vec` and stores arena indices in the link fields: one writer, many
//! readers, no interior mutability.

use std::collections::HashMap;

use crate::block::{self, Header};
use crate::work::ChainWork;

/// An index into a [`BlockIndexArena`]. `NONE` stands in for a null pointer
/// (genesis has no parent; a block with no children has no `next` yet).
pub type NodeId = u32;
pub const NONE: NodeId = u32::MAX;

/// One block's metadata as tracked by the chain engine: enough to
/// walk the tree, without holding the block's transactions in memory.
#[derive(Clone, Debug)]
pub struct BlockNode {
    pub header: Header,
    pub height: block::Height,
    pub chain_work: ChainWork,
    pub parent: NodeId,
    /// The child that extends the currently-best chain through this node,
    /// if any — updated whenever `set_best_chain` walks through this node.
    pub main_chain_child: NodeId,
    pub status: BlockStatus,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockStatus {
    /// Passed structural and contextual checks; connectable.
    Valid,
    /// Failed a consensus check; this node and all its descendants are
    /// permanently rejected.
    Invalid,
    /// Structurally valid but its parent is unknown.
    Orphan,
}

/// The append-only block metadata graph.
#[derive(Default)]
pub struct BlockIndexArena {
    nodes: Vec<BlockNode>,
    by_hash: HashMap<block::Hash, NodeId>,
    tip: NodeId,
}

impl BlockIndexArena {
    pub fn new() -> BlockIndexArena {
        BlockIndexArena { nodes: Vec::new(), by_hash: HashMap::new(), tip: NONE }
    }

    pub fn get(&self, id: NodeId) -> Option<&BlockNode> {
        self.nodes.get(id as usize)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut BlockNode> {
        self.nodes.get_mut(id as usize)
    }

    pub fn find(&self, hash: &block::Hash) -> Option<NodeId> {
        self.by_hash.get(hash).copied()
    }

    pub fn tip(&self) -> NodeId {
        self.tip
    }

    pub fn tip_work(&self) -> ChainWork {
        self.get(self.tip).map(|n| n.chain_work).unwrap_or_default()
    }

    /// Appends a new node, computing its height and cumulative work from its
    /// parent (or treating it as a genesis if `parent` is [`NONE`]).
    pub fn insert(&mut self, hash: block::Hash, header: Header, parent: NodeId, status: BlockStatus) -> NodeId {
        let (height, chain_work) = match self.get(parent) {
            Some(parent_node) => (block::Height(parent_node.height.0 + 1), parent_node.chain_work + header.difficulty_threshold.work()),
            None => (block::Height(0), header.difficulty_threshold.work()),
        };
        let id = self.nodes.len() as NodeId;
        self.nodes.push(BlockNode { header, height, chain_work, parent, main_chain_child: NONE, status });
        self.by_hash.insert(hash, id);
        id
    }

    /// Marks `new_tip` as the head of the best chain, rewriting the
    /// `main_chain_child` pointers: the old tip's path is unlinked first so
    /// a node abandoned by a reorganization never claims main-chain
    /// membership through a stale pointer.
    pub fn set_tip(&mut self, new_tip: NodeId) {
        let mut walk = self.tip;
        while walk != NONE {
            let parent = match self.get_mut(walk) {
                Some(node) => {
                    node.main_chain_child = NONE;
                    node.parent
                }
                None => break,
            };
            walk = parent;
        }
        let mut child = NONE;
        let mut walk = new_tip;
        while walk != NONE {
            let parent = match self.get_mut(walk) {
                Some(node) => {
                    node.main_chain_child = child;
                    node.parent
                }
                None => break,
            };
            child = walk;
            walk = parent;
        }
        self.tip = new_tip;
    }

    /// Whether `id` lies on the best chain: it is the tip, or some child
    /// extends the best chain through it.
    pub fn is_on_main_chain(&self, id: NodeId) -> bool {
        if id == NONE {
            return false;
        }
        id == self.tip || self.get(id).map(|n| n.main_chain_child != NONE).unwrap_or(false)
    }

    /// Walks from `id` back to genesis, oldest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut walk = id;
        while walk != NONE {
            path.push(walk);
            walk = match self.get(walk) {
                Some(node) => node.parent,
                None => break,
            };
        }
        path.reverse();
        path
    }

    /// The most recent common ancestor of two nodes, used to find a reorg's
    /// fork point.
    pub fn fork_point(&self, a: NodeId, b: NodeId) -> NodeId {
        let ancestors_a: std::collections::HashSet<NodeId> = self.ancestors(a).into_iter().collect();
        let mut walk = b;
        while walk != NONE {
            if ancestors_a.contains(&walk) {
                return walk;
            }
            walk = match self.get(walk) {
                Some(node) => node.parent,
                None => break,
            };
        }
        NONE
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::merkle;
    use crate::work::CompactDifficulty;
    use chrono::{TimeZone, Utc};

    fn header(previous: block::Hash, nonce: u32) -> Header {
        Header::new(1, previous, merkle::Root([0; 32]), Utc.timestamp(0, 0), CompactDifficulty(0x1d00ffff), nonce)
    }

    #[test]
    fn genesis_has_zero_height_and_no_parent() {
        let mut arena = BlockIndexArena::new();
        let genesis_header = header(block::Hash([0; 32]), 0);
        let id = arena.insert(genesis_header.hash(), genesis_header, NONE, BlockStatus::Valid);
        assert_eq!(arena.get(id).unwrap().height, block::Height(0));
        assert_eq!(arena.get(id).unwrap().parent, NONE);
    }

    #[test]
    fn work_accumulates_along_a_chain() {
        let mut arena = BlockIndexArena::new();
        let genesis_header = header(block::Hash([0; 32]), 0);
        let genesis_hash = genesis_header.hash();
        let genesis = arena.insert(genesis_hash, genesis_header, NONE, BlockStatus::Valid);
        let child_header = header(genesis_hash, 1);
        let child = arena.insert(child_header.hash(), child_header, genesis, BlockStatus::Valid);
        assert!(arena.get(child).unwrap().chain_work > arena.get(genesis).unwrap().chain_work);
    }

    #[test]
    fn set_tip_unlinks_an_abandoned_branch() {
        let mut arena = BlockIndexArena::new();
        let genesis_header = header(block::Hash([0; 32]), 0);
        let genesis_hash = genesis_header.hash();
        let genesis = arena.insert(genesis_hash, genesis_header, NONE, BlockStatus::Valid);
        let a_header = header(genesis_hash, 1);
        let a = arena.insert(a_header.hash(), a_header, genesis, BlockStatus::Valid);
        let b_header = header(genesis_hash, 2);
        let b = arena.insert(b_header.hash(), b_header, genesis, BlockStatus::Valid);

        arena.set_tip(a);
        assert!(arena.is_on_main_chain(a));
        assert!(!arena.is_on_main_chain(b));

        arena.set_tip(b);
        assert!(arena.is_on_main_chain(b));
        assert!(!arena.is_on_main_chain(a));
        assert_eq!(arena.get(genesis).unwrap().main_chain_child, b);
    }

    #[test]
    fn fork_point_finds_the_common_ancestor() {
        let mut arena = BlockIndexArena::new();
        let genesis_header = header(block::Hash([0; 32]), 0);
        let genesis_hash = genesis_header.hash();
        let genesis = arena.insert(genesis_hash, genesis_header, NONE, BlockStatus::Valid);
        let a_header = header(genesis_hash, 1);
        let a_hash = a_header.hash();
        let a = arena.insert(a_hash, a_header, genesis, BlockStatus::Valid);
        let b_header = header(genesis_hash, 2);
        let b = arena.insert(b_header.hash(), b_header, genesis, BlockStatus::Valid);
        assert_eq!(arena.fork_point(a, b), genesis);
        let _ = a_hash;
    }
}
