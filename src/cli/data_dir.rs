use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Directory holding the queue store, partial files, downloads and file lists.
/// Created on first use, but must not name something that is not a directory.
#[derive(Debug, Clone)]
pub struct DataDir(pub PathBuf);

impl DataDir {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, anyhow::Error> {
        let path: PathBuf = path.into();

        if path.exists() && !path.is_dir() {
            anyhow::bail!("{} exists but is not a directory", path.display());
        }

        Ok(DataDir(path))
    }

    pub fn store_path(&self) -> PathBuf {
        self.0.join("queue.json")
    }
}

impl FromStr for DataDir {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(PathBuf::from(s))
    }
}

impl AsRef<Path> for DataDir {
    fn as_ref(&self) -> &Path {
        self.0.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_rejects_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("file");
        std::fs::write(&file, b"")?;

        assert!(DataDir::new(&file).is_err());
        assert!(DataDir::new(dir.path()).is_ok());
        assert!(DataDir::new(dir.path().join("not-yet")).is_ok());
        Ok(())
    }
}
