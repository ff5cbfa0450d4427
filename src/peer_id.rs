use crate::tth::TreeHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hub-independent identity of a remote user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct PeerId(u64);

impl PeerId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// the content hash under which this peer's file list is queued.
    pub fn list_hash(self) -> TreeHash {
        TreeHash::tiger(&self.0.to_le_bytes())
    }

    /// file name of this peer's file list in the list directory.
    pub fn list_file_name(self) -> String {
        format!("{self}.xml.bz2")
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = anyhow::Error;

    /// accepts the 16 digit hex form used in logs and list names, or a plain decimal id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16)?,
            None if s.len() == 16 => u64::from_str_radix(s, 16)?,
            None => s.parse()?,
        };
        Ok(Self(id))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("00000000000000ff", 255)]
    #[case("0xff", 255)]
    #[case("255", 255)]
    fn test_parse(#[case] input: &str, #[case] expected: u64) {
        assert_eq!(input.parse::<PeerId>().unwrap(), PeerId::new(expected));
    }

    #[rstest]
    fn test_list_identity() {
        let peer = PeerId::new(0x1234);
        assert_eq!(peer.list_file_name(), "0000000000001234.xml.bz2");
        assert_eq!(peer.list_hash(), TreeHash::tiger(&0x1234u64.to_le_bytes()));
        assert_ne!(peer.list_hash(), PeerId::new(0x1235).list_hash());
    }
}
