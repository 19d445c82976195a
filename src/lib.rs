//! # multitok
//!
//! One tokenizer interface over several on-disk vocabulary formats.
//!
//! ## Formats
//!
//! - **HuggingFace**: `tokenizer.json`, BOS/EOS from `tokenizer_config.json` or guessed
//! - **llama2.c**: binary `tokenizer.bin` with scores, score-driven BPE and byte fallback
//! - **SentencePiece**: `tokenizer.model` protobuf
//! - **tiktoken**: base64 merge table, rank-driven BPE through `tiktoken-rs`
//!
//! [`get_tokenizer`] detects the format from the path (falling back through the
//! binary formats in a fixed order) and returns a loaded [`Tokenizer`].

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod tokenizer;

pub use config::{TiktokenConfig, TokenizerOptions};
pub use dispatch::{candidate_kinds, get_tokenizer, get_tokenizer_with};
pub use errors::{DispatchAttempt, ErrorKind, Result, TokenizerError};
pub use tokenizer::{
    HfTokenizer, Llama2cTokenizer, SpTokenizer, Tiktoken, Tokenizer, TokenizerBackend, TokenizerKind,
};
