use crate::config::MIN_TTHL_SIZE;
use crate::prelude::*;
use crate::store::QueueStore;
use crate::tth::{TreeHash, TreeHasher};
use std::sync::Arc;

/// Where the expected digest of a block comes from.
#[derive(Clone)]
enum Expected {
    /// the file is a single block, its root is the content hash.
    Root,
    /// block hashes fetched from a peer and kept in the store.
    Stored(Arc<dyn QueueStore>),
}

/// Checks received content block by block while it streams in.
///
/// The hasher only ever holds the bytes of the block in progress, it is reset at every
/// block boundary. Feed it exactly the bytes written to the partial file, in order.
#[derive(Clone)]
pub struct BlockVerifier {
    hash: TreeHash,
    size: u64,
    block_size: u64,
    expected: Expected,
    hasher: TreeHasher,
}

impl BlockVerifier {
    pub(crate) fn new(
        hash: TreeHash,
        size: u64,
        block_size: u64,
        store: Arc<dyn QueueStore>,
        hasher: TreeHasher,
    ) -> Self {
        let expected = if size <= MIN_TTHL_SIZE {
            Expected::Root
        } else {
            Expected::Stored(store)
        };
        Self {
            hash,
            size,
            block_size,
            expected,
            hasher,
        }
    }

    /// Feeds `buf`, whose first byte sits at `offset` in the file.
    ///
    /// Every block completed by `buf` (the last one may be short) is checked. On a mismatch
    /// the index of the failing block is returned and the rest of `buf` is ignored.
    pub fn update(&mut self, mut offset: u64, mut buf: &[u8]) -> Result<(), usize> {
        while !buf.is_empty() {
            let to_boundary = self.block_size - offset % self.block_size;
            let take = to_boundary.min(buf.len() as u64) as usize;
            self.hasher.update(&buf[..take]);
            buf = &buf[take..];
            offset += take as u64;

            if offset % self.block_size == 0 || offset == self.size {
                let index = ((offset - 1) / self.block_size) as usize;
                if !self.check(index) {
                    return Err(index);
                }
            }
        }
        Ok(())
    }

    fn check(&mut self, index: usize) -> bool {
        let digest = self.hasher.finalize_reset();
        match &self.expected {
            Expected::Root => digest == self.hash,
            Expected::Stored(store) => match store.has_block_hash(&self.hash, index, &digest) {
                Ok(matches) => matches,
                Err(e) => {
                    warn!(hash = %self.hash, "failed to look up hash of block {index}: {e:#}");
                    false
                }
            },
        }
    }

    /// hash state of the block in progress, to be kept with the job.
    pub fn into_hasher(self) -> TreeHasher {
        self.hasher
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::queue::Priority;
    use crate::store::{JobRow, MemoryStore};
    use crate::tth::root_of;
    use rstest::{fixture, rstest};

    const BLOCK: u64 = 1024 * 1024;
    const SIZE: u64 = 3 * BLOCK - 4321;

    struct Stored {
        content: Vec<u8>,
        hash: TreeHash,
        store: Arc<MemoryStore>,
    }

    #[fixture]
    fn stored() -> Stored {
        let content: Vec<u8> = (0..SIZE).map(|i| (i * 7 % 251) as u8).collect();
        let blocks: Vec<_> = content
            .chunks(BLOCK as usize)
            .map(|chunk| {
                let mut hasher = TreeHasher::new();
                hasher.update(chunk);
                hasher.finalize()
            })
            .collect();
        let hash = root_of(&blocks).unwrap();

        let store = Arc::new(MemoryStore::new());
        store
            .upsert_job(&JobRow {
                hash,
                size: SIZE,
                destination: "/dl/f".into(),
                priority: Priority::Medium,
                error: None,
                block_hash_len: 0,
            })
            .unwrap();
        store.set_block_hashes(&hash, &blocks).unwrap();
        Stored {
            content,
            hash,
            store,
        }
    }

    fn verifier(stored: &Stored) -> BlockVerifier {
        BlockVerifier::new(
            stored.hash,
            SIZE,
            BLOCK,
            stored.store.clone(),
            TreeHasher::new(),
        )
    }

    #[rstest]
    #[case(1)]
    #[case(1000)]
    #[case(65536)]
    #[case(BLOCK as usize + 17)]
    fn test_accepts_any_chunking(stored: Stored, #[case] chunk: usize) {
        let mut verifier = verifier(&stored);
        let mut offset = 0;
        // single bytes would take a while, a slice of the file is enough there
        let limit = if chunk == 1 { 3000 } else { stored.content.len() };
        for buf in stored.content[..limit].chunks(chunk) {
            assert_eq!(verifier.update(offset, buf), Ok(()));
            offset += buf.len() as u64;
        }
    }

    #[rstest]
    fn test_reports_failing_block(stored: Stored) {
        let mut content = stored.content.clone();
        content[(2 * BLOCK + 10) as usize] ^= 0xff;

        let mut verifier = verifier(&stored);
        assert_eq!(verifier.update(0, &content[..(2 * BLOCK) as usize]), Ok(()));
        assert_eq!(verifier.update(2 * BLOCK, &content[(2 * BLOCK) as usize..]), Err(2));
    }

    #[rstest]
    fn test_small_file_checked_against_root() {
        let content = vec![0x5a; 5000];
        let hash = TreeHash::tiger(b"not the content");
        let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());

        let mut hasher = TreeHasher::new();
        hasher.update(&content);
        let root = hasher.finalize();

        let mut good = BlockVerifier::new(root, 5000, MIN_TTHL_SIZE, store.clone(), TreeHasher::new());
        assert_eq!(good.update(0, &content[..4000]), Ok(()));
        assert_eq!(good.update(4000, &content[4000..]), Ok(()));

        let mut bad = BlockVerifier::new(hash, 5000, MIN_TTHL_SIZE, store, TreeHasher::new());
        assert_eq!(bad.update(0, &content), Err(0));
    }
}
