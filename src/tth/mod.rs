mod hasher;
mod tree;

pub use hasher::TreeHasher;
pub use tree::{block_size_for, num_blocks, root_of, shrink_block_hashes, LEAF_SIZE};

use data_encoding::BASE32_NOPAD;
use serde::de::{self, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tiger::{Digest, Tiger};

/// A 24 byte tiger digest. Used both as the root of a tiger tree (the content hash of a file)
/// and as the hash of a single block inside that tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TreeHash([u8; Self::SIZE]);

impl TreeHash {
    pub const SIZE: usize = 24;
    /// length of the unpadded base32 rendering of a hash, also the file name of partial files.
    pub const BASE32_LEN: usize = 39;

    pub fn new(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }

    /// plain (non-tree) tiger digest of `data`.
    pub fn tiger(data: &[u8]) -> Self {
        Self::from_digest(&Tiger::digest(data))
    }

    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        let mut bytes = [0; Self::SIZE];
        bytes.copy_from_slice(digest);
        Self(bytes)
    }

    pub fn to_base32(&self) -> String {
        BASE32_NOPAD.encode(&self.0)
    }

    pub fn from_base32(encoded: &str) -> anyhow::Result<Self> {
        if encoded.len() != Self::BASE32_LEN {
            anyhow::bail!(
                "tree hash must be {} base32 characters, got {}",
                Self::BASE32_LEN,
                encoded.len()
            );
        }

        let bytes = BASE32_NOPAD.decode(encoded.to_ascii_uppercase().as_bytes())?;
        let bytes: [u8; Self::SIZE] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("decoded tree hash is not {} bytes", Self::SIZE))?;

        Ok(Self(bytes))
    }

    /// whether `name` looks like something we would have named a partial file.
    pub fn is_base32_name(name: &str) -> bool {
        name.len() == Self::BASE32_LEN
            && name
                .bytes()
                .all(|b| b.is_ascii_alphabetic() || (b'2'..=b'7').contains(&b))
    }
}

impl AsRef<[u8; TreeHash::SIZE]> for TreeHash {
    fn as_ref(&self) -> &[u8; TreeHash::SIZE] {
        &self.0
    }
}

impl fmt::Display for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base32())
    }
}

impl fmt::Debug for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeHash({})", self.to_base32())
    }
}

impl FromStr for TreeHash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base32(s)
    }
}

impl Serialize for TreeHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base32())
    }
}

impl<'de> Deserialize<'de> for TreeHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(TreeHashVisitor)
    }
}

struct TreeHashVisitor;
impl<'de> Visitor<'de> for TreeHashVisitor {
    type Value = TreeHash;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a 39 character base32 encoded tiger tree hash")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        TreeHash::from_base32(v).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_base32_name_roundtrip() {
        let hash = TreeHash::tiger(b"some peer");
        let name = hash.to_base32();

        assert_eq!(name.len(), TreeHash::BASE32_LEN);
        assert!(TreeHash::is_base32_name(&name));
        assert_eq!(TreeHash::from_base32(&name.to_ascii_lowercase()).unwrap(), hash);
    }

    #[rstest]
    #[case("")]
    #[case("LWPNACQDBZRYXW3VHJVCJ64QBZNGHOHHHZWCLN")]
    #[case("LWPNACQDBZRYXW3VHJVCJ64QBZNGHOHHHZWCLN1")]
    fn test_rejects_bad_names(#[case] name: &str) {
        assert!(TreeHash::from_base32(name).is_err());
        assert!(!TreeHash::is_base32_name(name));
    }

    #[rstest]
    fn test_known_empty_root() {
        // the tiger tree hash of the empty input, as published by every DC client.
        let expected = TreeHash::from_base32("LWPNACQDBZRYXW3VHJVCJ64QBZNGHOHHHZWCLNQ").unwrap();
        assert_eq!(TreeHasher::new().finalize(), expected);
    }
}
