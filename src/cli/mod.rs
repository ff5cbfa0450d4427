use clap::{self, Parser, Subcommand};
use std::path::PathBuf;

pub mod data_dir;
use data_dir::DataDir;

use crate::config::{QueueConfig, DEFAULT_SLOTS};
use crate::peer_id::PeerId;
use crate::queue::Priority;
use crate::tth::TreeHash;

#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
/// inspect and edit a direct connect download queue.
pub struct Cli {
    #[arg(short, long, default_value = ".dcq")]
    /// where the queue, partial files, downloads and file lists live.
    pub data_dir: DataDir,

    #[arg(short, long, default_value_t = DEFAULT_SLOTS)]
    /// number of downloads allowed to run at once.
    pub slots: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// show every queued download.
    List,
    /// queue a file.
    Add {
        /// the peer offering the file, as hex (16 digits or 0x prefixed) or decimal.
        peer: PeerId,
        /// base32 tiger tree hash of the content.
        hash: TreeHash,
        size: u64,
        /// relative to the download directory.
        destination: PathBuf,
    },
    /// remove a queued file, together with whatever was downloaded of it.
    Rm { hash: TreeHash },
    /// change the priority of a queued file.
    Prio {
        hash: TreeHash,
        /// off, very-low, low, medium, high, very-high or the numeric value.
        #[arg(allow_hyphen_values = true)]
        priority: Priority,
    },
    /// delete stale partial files and old file lists.
    Clean,
}

impl Cli {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::from_data_dir(&self.data_dir).with_slots(self.slots)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_parse_add() {
        let hash = TreeHash::tiger(b"x");
        let cli = Cli::try_parse_from([
            "dcq",
            "--data-dir",
            "/tmp/q",
            "add",
            "0x2a",
            &hash.to_base32(),
            "1000",
            "music/a.flac",
        ])
        .unwrap();

        assert_eq!(cli.slots, DEFAULT_SLOTS);
        assert_eq!(cli.queue_config().download_dir, PathBuf::from("/tmp/q/dl"));
        match cli.command {
            Command::Add {
                peer,
                hash: parsed,
                size,
                destination,
            } => {
                assert_eq!(peer, PeerId::new(42));
                assert_eq!(parsed, hash);
                assert_eq!(size, 1000);
                assert_eq!(destination, PathBuf::from("music/a.flac"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[rstest]
    #[case("off", Priority::Off)]
    #[case("-1", Priority::Low)]
    fn test_parse_prio(#[case] arg: &str, #[case] expected: Priority) {
        let hash = TreeHash::tiger(b"x").to_base32();
        let cli = Cli::try_parse_from(["dcq", "prio", &hash, arg]).unwrap();
        assert!(matches!(cli.command, Command::Prio { priority, .. } if priority == expected));
    }

    #[rstest]
    fn test_bad_hash_rejected() {
        assert!(Cli::try_parse_from(["dcq", "rm", "not-a-hash"]).is_err());
    }
}
