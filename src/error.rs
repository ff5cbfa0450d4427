use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a job (or one peer's offer of it) stopped being downloadable.
///
/// The discriminants are the values kept in the store, do not renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum ErrorKind {
    #[error("TTHL data does not match TTH root")]
    HashTreeMismatch = 1,
    #[error("File not available from this user")]
    PeerMissingFile = 2,
    #[error("Error writing to temporary file")]
    PartialIo = 3,
    #[error("Error moving file to destination")]
    DestinationIo = 4,
    #[error("Hash error")]
    BlockHashMismatch = 5,
}

impl From<ErrorKind> for u8 {
    fn from(kind: ErrorKind) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for ErrorKind {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::HashTreeMismatch),
            2 => Ok(Self::PeerMissingFile),
            3 => Ok(Self::PartialIo),
            4 => Ok(Self::DestinationIo),
            5 => Ok(Self::BlockHashMismatch),
            other => Err(format!("unknown download error code {other}")),
        }
    }
}

/// An error kind with optional detail, as recorded on a job or on a peer link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    #[serde(default)]
    pub message: Option<String>,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: Option<String>) -> Self {
        Self { kind, message }
    }

    pub fn detail(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, Some(message.into()))
    }

    pub fn io(kind: ErrorKind, err: &std::io::Error) -> Self {
        Self::detail(kind, err.to_string())
    }
}

impl From<ErrorKind> for JobError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind, None)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind, message),
            None => write!(f, "{}.", self.kind),
        }
    }
}

impl std::error::Error for JobError {}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_display() {
        let with_detail =
            JobError::detail(ErrorKind::BlockHashMismatch, "Hash for block 1 does not match.");
        assert_eq!(
            with_detail.to_string(),
            "Hash error: Hash for block 1 does not match."
        );
        assert_eq!(
            JobError::from(ErrorKind::PeerMissingFile).to_string(),
            "File not available from this user."
        );
    }

    #[rstest]
    fn test_persisted_as_code() {
        let err = JobError::from(ErrorKind::DestinationIo);
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"kind":4,"message":null}"#);
        assert_eq!(serde_json::from_str::<JobError>(&json).unwrap(), err);
        assert!(serde_json::from_str::<JobError>(r#"{"kind":9}"#).is_err());
    }
}
