//! Pick and load the right backend for a vocabulary path.
//!
//! A `.json` file or a directory is a HuggingFace tokenizer, loaded directly.
//! Anything else is tried as llama2.c, then SentencePiece, then tiktoken; the
//! first backend that loads wins. An explicit kind skips detection. Both direct
//! paths report the backend's own error.

use crate::config::TokenizerOptions;
use crate::errors::{DispatchAttempt, Result, TokenizerError};
use crate::tokenizer::{Tokenizer, TokenizerBackend, TokenizerKind};
use std::path::Path;
use tracing::{debug, info};

/// Load `path` with an optional HuggingFace config and an optional forced kind.
pub fn get_tokenizer(
    path: impl AsRef<Path>,
    config_path: Option<&Path>,
    kind: Option<TokenizerKind>,
) -> Result<Tokenizer> {
    let options = TokenizerOptions {
        kind,
        config_path: config_path.map(Path::to_path_buf),
        ..TokenizerOptions::default()
    };
    get_tokenizer_with(path, &options)
}

pub fn get_tokenizer_with(path: impl AsRef<Path>, options: &TokenizerOptions) -> Result<Tokenizer> {
    let path = path.as_ref();

    let direct = match (options.kind, candidate_kinds(path)) {
        (Some(kind), _) => Some(kind),
        (None, [only]) => Some(*only),
        (None, _) => None,
    };
    if let Some(kind) = direct {
        let mut tokenizer = Tokenizer::new(kind, options);
        tokenizer.load(path)?;
        info!("Loaded {} tokenizer from {:?}", kind, path);
        return Ok(tokenizer);
    }

    let mut attempts = Vec::new();
    for &kind in candidate_kinds(path) {
        let mut tokenizer = Tokenizer::new(kind, options);
        match tokenizer.load(path) {
            Ok(()) => {
                info!("Detected {} tokenizer at {:?}", kind, path);
                return Ok(tokenizer);
            }
            Err(error) => {
                debug!("{} rejected {:?}: {}", kind, path, error);
                attempts.push(DispatchAttempt { kind, error });
            }
        }
    }

    Err(TokenizerError::NoBackendMatched {
        path: path.to_path_buf(),
        attempts,
    })
}

/// Backends to try for `path`, in order.
pub fn candidate_kinds(path: &Path) -> &'static [TokenizerKind] {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json || path.is_dir() {
        &[TokenizerKind::HuggingFace]
    } else {
        &TokenizerKind::FALLBACK_ORDER
    }
}
