use super::hasher::node_hash;
use super::TreeHash;

/// Size of a tiger tree leaf in bytes.
pub const LEAF_SIZE: u64 = 1024;

/// Smallest power of two block size, never below one leaf, for which `blocks` hashes cover
/// `size` bytes.
pub fn block_size_for(size: u64, blocks: usize) -> u64 {
    let blocks = blocks.max(1) as u64;
    let mut block_size = LEAF_SIZE;
    while block_size.saturating_mul(blocks) < size {
        block_size <<= 1;
    }
    block_size
}

/// Number of blocks of `block_size` in a file of `size` bytes, an empty file still has one.
pub fn num_blocks(size: u64, block_size: u64) -> usize {
    size.div_ceil(block_size).max(1) as usize
}

/// Root of a list of sibling hashes, built level by level. An unpaired trailing node is
/// promoted to the next level unchanged.
pub fn root_of(hashes: &[TreeHash]) -> Option<TreeHash> {
    let mut level = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => node_hash(left, right),
                _ => pair[0],
            })
            .collect();
    }
    level.first().copied()
}

/// Reduces the block hashes of a file of `size` bytes until each covers at least `min_block`
/// bytes. Every step multiplies the block size by four and collapses four neighbours into
/// their subtree root.
///
/// Returns the (possibly unchanged) hashes and the block size they describe.
pub fn shrink_block_hashes(
    size: u64,
    hashes: Vec<TreeHash>,
    min_block: u64,
) -> (Vec<TreeHash>, u64) {
    let mut block_size = block_size_for(size, hashes.len());
    let mut group = 1usize;
    while block_size < min_block {
        block_size <<= 2;
        group <<= 2;
    }

    if group == 1 {
        return (hashes, block_size);
    }

    let shrunk = hashes.chunks(group).filter_map(root_of).collect();
    (shrunk, block_size)
}
