//! Central error types for multitok.

use crate::tokenizer::TokenizerKind;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used by every fallible tokenizer operation.
pub type Result<T> = std::result::Result<T, TokenizerError>;

/// Closed set of failure kinds shared by all backends and the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Internal,
    Uninitialized,
    OutOfRange,
    LoadFailure,
    EncodeFailure,
    Base64DecodeFailure,
    ParseFailure,
    DecodeFailure,
    RegexFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Internal => "Internal",
            Self::Uninitialized => "Uninitialized",
            Self::OutOfRange => "OutOfRange",
            Self::LoadFailure => "LoadFailure",
            Self::EncodeFailure => "EncodeFailure",
            Self::Base64DecodeFailure => "Base64DecodeFailure",
            Self::ParseFailure => "ParseFailure",
            Self::DecodeFailure => "DecodeFailure",
            Self::RegexFailure => "RegexFailure",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Tokenizer not loaded")]
    Uninitialized,

    #[error("Token {id} out of range for vocabulary of {vocab_size}")]
    OutOfRange { id: u32, vocab_size: usize },

    #[error("Failed to load {}: {reason}", path.display())]
    LoadFailure { path: PathBuf, reason: String },

    #[error("Encode failed: {0}")]
    EncodeFailure(String),

    #[error("Base64 decode failed: {0}")]
    Base64DecodeFailure(String),

    #[error("Parse error: {0}")]
    ParseFailure(String),

    #[error("Decode failed: {0}")]
    DecodeFailure(String),

    #[error("Regex error: {0}")]
    RegexFailure(String),

    #[error("No tokenizer format matched {}: {}", path.display(), summarize(attempts))]
    NoBackendMatched {
        path: PathBuf,
        attempts: Vec<DispatchAttempt>,
    },
}

impl TokenizerError {
    /// Project onto the closed [`ErrorKind`] set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Internal(_) => ErrorKind::Internal,
            Self::Uninitialized => ErrorKind::Uninitialized,
            Self::OutOfRange { .. } => ErrorKind::OutOfRange,
            Self::LoadFailure { .. } | Self::NoBackendMatched { .. } => ErrorKind::LoadFailure,
            Self::EncodeFailure(_) => ErrorKind::EncodeFailure,
            Self::Base64DecodeFailure(_) => ErrorKind::Base64DecodeFailure,
            Self::ParseFailure(_) => ErrorKind::ParseFailure,
            Self::DecodeFailure(_) => ErrorKind::DecodeFailure,
            Self::RegexFailure(_) => ErrorKind::RegexFailure,
        }
    }

    pub(crate) fn load(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::LoadFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// One failed candidate of an auto-detecting dispatch.
#[derive(Debug)]
pub struct DispatchAttempt {
    pub kind: TokenizerKind,
    pub error: TokenizerError,
}

fn summarize(attempts: &[DispatchAttempt]) -> String {
    if attempts.is_empty() {
        return "no candidates tried".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{} ({}: {})", a.kind, a.error.kind(), a.error))
        .collect::<Vec<_>>()
        .join("; ")
}
