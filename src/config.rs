//! Loader configuration.
//!
//! Everything the dispatcher needs beyond the vocabulary path: an explicit
//! format, the HuggingFace side config, and the tiktoken special-token layout.

use crate::errors::{Result, TokenizerError};
use crate::tokenizer::TokenizerKind;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Env var naming a JSON file with a [`TiktokenConfig`].
pub const TIKTOKEN_CONFIG_ENV: &str = "MULTITOK_TIKTOKEN_CONFIG";

/// Llama 3 pre-tokenization pattern. Needs look-ahead, so it compiles with fancy-regex.
pub const LLAMA3_PATTERN: &str = r#"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+"#;

const NUM_RESERVED_SPECIAL_TOKENS: usize = 256;
const LLAMA3_SPECIAL_TOKENS: [&str; 11] = [
    "<|begin_of_text|>",
    "<|end_of_text|>",
    "<|reserved_special_token_0|>",
    "<|reserved_special_token_1|>",
    "<|finetune_right_pad_id|>",
    "<|step_id|>",
    "<|start_header_id|>",
    "<|end_header_id|>",
    "<|eom_id|>",
    "<|eot_id|>",
    "<|python_tag|>",
];

/// Special tokens and pattern for the tiktoken backend.
///
/// Special token `i` gets id `n + i`, where `n` is the size of the merge table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TiktokenConfig {
    pub pattern: String,
    pub special_tokens: Vec<String>,
    pub bos_index: usize,
    pub eos_index: usize,
}

impl Default for TiktokenConfig {
    fn default() -> Self {
        let mut special_tokens: Vec<String> =
            LLAMA3_SPECIAL_TOKENS.iter().map(|t| t.to_string()).collect();
        special_tokens.extend(
            (0..NUM_RESERVED_SPECIAL_TOKENS - LLAMA3_SPECIAL_TOKENS.len())
                .map(|i| format!("<|reserved_special_token_{}|>", i + 2)),
        );
        Self {
            pattern: LLAMA3_PATTERN.to_string(),
            special_tokens,
            bos_index: 0,
            eos_index: 1,
        }
    }
}

impl TiktokenConfig {
    pub fn validate(&self) -> Result<()> {
        let n = self.special_tokens.len();
        if self.bos_index >= n || self.eos_index >= n {
            return Err(TokenizerError::ParseFailure(format!(
                "bos_index {} / eos_index {} outside {} special tokens",
                self.bos_index, self.eos_index, n
            )));
        }
        let mut seen = HashSet::with_capacity(n);
        for token in &self.special_tokens {
            if token.is_empty() {
                return Err(TokenizerError::ParseFailure("empty special token".into()));
            }
            if !seen.insert(token.as_str()) {
                return Err(TokenizerError::ParseFailure(format!(
                    "duplicate special token: {}",
                    token
                )));
            }
        }
        Ok(())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }
}

/// Options for [`crate::get_tokenizer_with`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenizerOptions {
    /// Skip detection and load exactly this format.
    pub kind: Option<TokenizerKind>,
    /// `tokenizer_config.json` for the HuggingFace backend.
    pub config_path: Option<PathBuf>,
    pub tiktoken: TiktokenConfig,
}

impl TokenizerOptions {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let options: Self = read_json(path.as_ref())?;
        options.tiktoken.validate()?;
        Ok(options)
    }

    /// Defaults, with the tiktoken layout taken from `MULTITOK_TIKTOKEN_CONFIG` when set.
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();
        if let Ok(path) = std::env::var(TIKTOKEN_CONFIG_ENV) {
            if !path.is_empty() {
                options.tiktoken = TiktokenConfig::from_json_file(path)?;
            }
        }
        Ok(options)
    }

    pub fn with_kind(mut self, kind: TokenizerKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_tiktoken(mut self, tiktoken: TiktokenConfig) -> Self {
        self.tiktoken = tiktoken;
        self
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| TokenizerError::load(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| TokenizerError::ParseFailure(format!("{}: {}", path.display(), e)))
}
