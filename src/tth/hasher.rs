use super::tree::LEAF_SIZE;
use super::TreeHash;
use tiger::{Digest, Tiger};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Incremental tiger tree hasher.
///
/// Data is cut into 1024 byte leaves. Completed subtrees are kept on a stack tagged with their
/// height, two equal height neighbours are merged as soon as both exist, so memory stays
/// logarithmic in the input length.
#[derive(Debug, Clone, Default)]
pub struct TreeHasher {
    leaf: Vec<u8>,
    stack: Vec<(u32, TreeHash)>,
}

impl TreeHasher {
    pub fn new() -> Self {
        Self {
            leaf: Vec::with_capacity(LEAF_SIZE as usize),
            stack: Vec::new(),
        }
    }

    pub fn update(&mut self, mut data: &[u8]) {
        let leaf_size = LEAF_SIZE as usize;
        while !data.is_empty() {
            let take = (leaf_size - self.leaf.len()).min(data.len());
            self.leaf.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.leaf.len() == leaf_size {
                self.flush_leaf();
            }
        }
    }

    /// root of everything fed so far. The empty input hashes as one empty leaf.
    pub fn finalize(mut self) -> TreeHash {
        if !self.leaf.is_empty() || self.stack.is_empty() {
            self.flush_leaf();
        }

        // unequal subtrees are joined right to left, which promotes odd nodes unchanged.
        let mut subtrees = self.stack.into_iter().rev().map(|(_, hash)| hash);
        let mut root = subtrees.next().unwrap_or_else(|| leaf_hash(&[]));
        for left in subtrees {
            root = node_hash(&left, &root);
        }
        root
    }

    /// finalize and start over, keeping the allocations.
    pub fn finalize_reset(&mut self) -> TreeHash {
        std::mem::replace(self, Self::new()).finalize()
    }

    fn flush_leaf(&mut self) {
        let hash = leaf_hash(&self.leaf);
        self.leaf.clear();

        let mut node = (0, hash);
        while let Some(&(level, left)) = self.stack.last() {
            if level != node.0 {
                break;
            }
            self.stack.pop();
            node = (level + 1, node_hash(&left, &node.1));
        }
        self.stack.push(node);
    }
}

pub(super) fn leaf_hash(data: &[u8]) -> TreeHash {
    let mut tiger = Tiger::new();
    tiger.update([LEAF_PREFIX]);
    tiger.update(data);
    TreeHash::from_digest(&tiger.finalize())
}

pub(super) fn node_hash(left: &TreeHash, right: &TreeHash) -> TreeHash {
    let mut tiger = Tiger::new();
    tiger.update([NODE_PREFIX]);
    tiger.update(left.as_ref());
    tiger.update(right.as_ref());
    TreeHash::from_digest(&tiger.finalize())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tth::root_of;
    use rstest::rstest;

    fn reference_root(data: &[u8]) -> TreeHash {
        let leaves: Vec<_> = if data.is_empty() {
            vec![leaf_hash(&[])]
        } else {
            data.chunks(LEAF_SIZE as usize).map(leaf_hash).collect()
        };
        root_of(&leaves).unwrap()
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(1023)]
    #[case(1024)]
    #[case(1025)]
    #[case(3 * 1024)]
    #[case(5 * 1024 + 17)]
    #[case(64 * 1024)]
    fn test_incremental_matches_level_by_level(#[case] len: usize) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

        let mut hasher = TreeHasher::new();
        for chunk in data.chunks(700) {
            hasher.update(chunk);
        }

        assert_eq!(hasher.finalize(), reference_root(&data));
    }

    #[rstest]
    fn test_single_leaf_is_leaf_hash() {
        let mut hasher = TreeHasher::new();
        hasher.update(b"abc");
        assert_eq!(hasher.finalize(), leaf_hash(b"abc"));
    }

    #[rstest]
    fn test_finalize_reset_starts_fresh() {
        let mut hasher = TreeHasher::new();
        hasher.update(&[7; 2000]);
        let first = hasher.finalize_reset();

        hasher.update(b"abc");
        assert_ne!(first, leaf_hash(b"abc"));
        assert_eq!(hasher.finalize_reset(), leaf_hash(b"abc"));
    }
}
