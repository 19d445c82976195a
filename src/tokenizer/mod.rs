//! Tokenizer contract and the concrete backends behind it.
//!
//! Every backend starts Unloaded, becomes Loaded through [`TokenizerBackend::load`],
//! and reports failures through [`TokenizerError`].

pub mod handle;
pub mod hf;
pub mod llama2c;
pub mod spm;
mod state;
pub mod tiktoken;

pub use handle::Tokenizer;
pub use hf::HfTokenizer;
pub use llama2c::Llama2cTokenizer;
pub use spm::SpTokenizer;
pub use tiktoken::Tiktoken;

pub(crate) use state::LoadState;

use crate::errors::{Result, TokenizerError};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// The closed set of supported tokenizer formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    /// `tokenizer.json` (+ optional `tokenizer_config.json`).
    #[value(name = "huggingface", alias = "hf")]
    HuggingFace,
    /// llama2.c binary vocabulary (`tokenizer.bin`).
    Llama2c,
    /// SentencePiece model (`tokenizer.model`).
    #[value(name = "sentencepiece", alias = "sp")]
    SentencePiece,
    /// Base64 merge table with a pre-tokenization regex.
    Tiktoken,
}

impl TokenizerKind {
    /// Order tried by the dispatcher when the format is not obvious from the path.
    pub const FALLBACK_ORDER: [TokenizerKind; 3] = [
        TokenizerKind::Llama2c,
        TokenizerKind::SentencePiece,
        TokenizerKind::Tiktoken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HuggingFace => "huggingface",
            Self::Llama2c => "llama2c",
            Self::SentencePiece => "sentencepiece",
            Self::Tiktoken => "tiktoken",
        }
    }
}

impl fmt::Display for TokenizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenizerKind {
    type Err = TokenizerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "huggingface" | "hf" | "hf_tokenizer" => Ok(Self::HuggingFace),
            "llama2c" => Ok(Self::Llama2c),
            "sentencepiece" | "sp" => Ok(Self::SentencePiece),
            "tiktoken" => Ok(Self::Tiktoken),
            other => Err(TokenizerError::ParseFailure(format!(
                "unknown tokenizer type '{}'",
                other
            ))),
        }
    }
}

/// Capability set shared by every tokenizer backend.
///
/// Query methods return the Unloaded defaults (0) until [`load`](Self::load)
/// succeeds; `encode` and the `decode*` family fail with
/// [`TokenizerError::Uninitialized`] until then.
pub trait TokenizerBackend: Send + Sync {
    fn kind(&self) -> TokenizerKind;

    /// Materialize the vocabulary at `path`.
    ///
    /// The handle stays Unloaded when this fails. Calling it again on a
    /// Loaded handle is a no-op.
    fn load(&mut self, path: &Path) -> Result<()>;

    fn is_loaded(&self) -> bool;

    /// Path the vocabulary was loaded from.
    fn model_path(&self) -> Option<&Path>;

    fn vocab_size(&self) -> usize;

    fn bos_tok(&self) -> u32;

    fn eos_tok(&self) -> u32;

    /// Tokenize `text`, then prepend `bos` copies of BOS and append `eos` copies of EOS.
    fn encode(&self, text: &str, bos: usize, eos: usize) -> Result<Vec<u32>>;

    /// Surface form of a single token.
    fn decode_token(&self, id: u32) -> Result<String>;

    /// Surface form of `id` when it directly follows `prev` in a stream.
    fn decode_next(&self, prev: u32, id: u32) -> Result<String> {
        let _ = prev;
        self.decode_token(id)
    }

    /// Decode a whole sequence, concatenated in order.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Fails with `Uninitialized` or `OutOfRange` when `id` cannot be decoded.
    fn verify_token(&self, id: u32) -> Result<()> {
        if !self.is_loaded() {
            return Err(TokenizerError::Uninitialized);
        }
        let vocab_size = self.vocab_size();
        if id as usize >= vocab_size {
            return Err(TokenizerError::OutOfRange { id, vocab_size });
        }
        Ok(())
    }
}

/// `[bos; n_bos] ++ body ++ [eos; n_eos]`
pub(crate) fn wrap_special(bos: u32, n_bos: usize, body: Vec<u32>, eos: u32, n_eos: usize) -> Vec<u32> {
    let mut ids = Vec::with_capacity(n_bos + body.len() + n_eos);
    ids.extend(std::iter::repeat(bos).take(n_bos));
    ids.extend(body);
    ids.extend(std::iter::repeat(eos).take(n_eos));
    ids
}
