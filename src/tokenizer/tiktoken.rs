//! tiktoken merge table: one `<base64 token> <rank>` per line.
//!
//! The table is parsed and validated here; splitting and byte-pair merging are
//! done by [`tiktoken_rs::CoreBPE`].

use super::{wrap_special, LoadState, TokenizerBackend, TokenizerKind};
use crate::config::TiktokenConfig;
use crate::errors::{Result, TokenizerError};
use base64::{engine::general_purpose::STANDARD, Engine};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use tiktoken_rs::CoreBPE;
use tracing::{debug, info, warn};

struct TiktokenModel {
    path: PathBuf,
    bpe: CoreBPE,
    special_encoder: FxHashMap<String, u32>,
    /// Single bytes with no rank. CoreBPE cannot encode text containing them.
    missing_bytes: Vec<u8>,
    vocab_size: usize,
    bos: u32,
    eos: u32,
}

/// Rank-ordered byte-pair encoder over a tiktoken table.
#[derive(Default)]
pub struct Tiktoken {
    config: TiktokenConfig,
    state: LoadState<TiktokenModel>,
}

impl Tiktoken {
    /// Llama 3 special tokens and pattern.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TiktokenConfig) -> Self {
        Self {
            config,
            state: LoadState::Unloaded,
        }
    }

    pub fn config(&self) -> &TiktokenConfig {
        &self.config
    }

    /// Id of a special token, if loaded and known.
    pub fn special_token_id(&self, token: &str) -> Option<u32> {
        self.state.loaded()?.special_encoder.get(token).copied()
    }
}

impl TokenizerBackend for Tiktoken {
    fn kind(&self) -> TokenizerKind {
        TokenizerKind::Tiktoken
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        if let Some(model) = self.state.loaded() {
            warn!(
                "tiktoken tokenizer already loaded from {:?}, ignoring {:?}",
                model.path, path
            );
            return Ok(());
        }
        self.config.validate()?;
        if self.config.pattern.is_empty() {
            return Err(TokenizerError::RegexFailure("empty pattern".into()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| TokenizerError::load(path, e))?;
        let pairs = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| parse_line(line, i + 1))
            .collect::<Result<Vec<_>>>()?;
        if pairs.is_empty() {
            return Err(TokenizerError::load(path, "empty merge table"));
        }
        let encoder = build_token_map(pairs)?;
        let base = encoder.len() as u32;
        if let Some(&rank) = encoder.values().find(|&&r| r >= base) {
            return Err(TokenizerError::ParseFailure(format!(
                "rank {} outside 0..{}: ranks must be contiguous",
                rank, base
            )));
        }
        let missing_bytes: Vec<u8> = (0..=255u8)
            .filter(|b| !encoder.contains_key([*b].as_slice()))
            .collect();
        debug!(
            "tiktoken: {} mergeable ranks from {:?}, {} bytes without rank",
            encoder.len(),
            path,
            missing_bytes.len()
        );

        let special_encoder: FxHashMap<String, u32> = self
            .config
            .special_tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), base + i as u32))
            .collect();
        let vocab_size = encoder.len() + special_encoder.len();

        let bpe = CoreBPE::new(encoder, special_encoder.clone(), &self.config.pattern)
            .map_err(|e| TokenizerError::RegexFailure(e.to_string()))?;

        let model = TiktokenModel {
            path: path.to_path_buf(),
            bpe,
            special_encoder,
            missing_bytes,
            vocab_size,
            bos: base + self.config.bos_index as u32,
            eos: base + self.config.eos_index as u32,
        };
        info!(
            "Loaded tiktoken tokenizer from {:?}: vocab_size={}, bos={}, eos={}",
            path, model.vocab_size, model.bos, model.eos
        );
        self.state.set(model);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.state.is_loaded()
    }

    fn model_path(&self) -> Option<&Path> {
        self.state.loaded().map(|m| m.path.as_path())
    }

    fn vocab_size(&self) -> usize {
        self.state.loaded().map_or(0, |m| m.vocab_size)
    }

    fn bos_tok(&self) -> u32 {
        self.state.loaded().map_or(0, |m| m.bos)
    }

    fn eos_tok(&self) -> u32 {
        self.state.loaded().map_or(0, |m| m.eos)
    }

    fn encode(&self, text: &str, bos: usize, eos: usize) -> Result<Vec<u32>> {
        let model = self.state.get()?;
        model.check_coverage(text)?;
        let body = model.bpe.encode_with_special_tokens(text);
        Ok(wrap_special(model.bos, bos, body, model.eos, eos))
    }

    fn decode_token(&self, id: u32) -> Result<String> {
        self.decode(&[id])
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let model = self.state.get()?;
        for &id in ids {
            self.verify_token(id)?;
        }
        model
            .bpe
            .decode(ids.to_vec())
            .map_err(|e| TokenizerError::DecodeFailure(e.to_string()))
    }
}

impl TiktokenModel {
    /// Fails when `text` outside special tokens holds a byte the table cannot encode.
    fn check_coverage(&self, text: &str) -> Result<()> {
        if self.missing_bytes.is_empty() {
            return Ok(());
        }
        let mut specials: Vec<&str> = self.special_encoder.keys().map(String::as_str).collect();
        specials.sort_by_key(|t| std::cmp::Reverse(t.len()));
        let ordinary = specials
            .iter()
            .fold(text.to_string(), |acc, t| acc.replace(t, ""));
        match ordinary.bytes().find(|b| self.missing_bytes.contains(b)) {
            Some(b) => Err(TokenizerError::EncodeFailure(format!(
                "no rank for byte 0x{:02x}",
                b
            ))),
            None => Ok(()),
        }
    }
}

fn parse_line(line: &str, lineno: usize) -> Result<(Vec<u8>, u32)> {
    let (token, rank) = line.split_once(' ').ok_or_else(|| {
        TokenizerError::ParseFailure(format!("line {}: invalid tiktoken line: {}", lineno, line))
    })?;
    let token = STANDARD
        .decode(token)
        .map_err(|e| TokenizerError::Base64DecodeFailure(format!("line {}: {}", lineno, e)))?;
    let rank = rank.trim().parse::<u32>().map_err(|e| {
        TokenizerError::ParseFailure(format!("line {}: invalid rank '{}': {}", lineno, rank, e))
    })?;
    Ok((token, rank))
}

/// Mergeable ranks; duplicate tokens or ranks are a parse failure.
fn build_token_map(pairs: Vec<(Vec<u8>, u32)>) -> Result<FxHashMap<Vec<u8>, u32>> {
    let mut encoder: FxHashMap<Vec<u8>, u32> = FxHashMap::default();
    let mut ranks: FxHashSet<u32> = FxHashSet::default();
    encoder.reserve(pairs.len());
    for (token, rank) in pairs {
        if !ranks.insert(rank) {
            return Err(TokenizerError::ParseFailure(format!(
                "duplicate rank {} at {:?}",
                rank,
                String::from_utf8_lossy(&token)
            )));
        }
        if encoder.contains_key(&token) {
            return Err(TokenizerError::ParseFailure(format!(
                "duplicate token {:?}",
                String::from_utf8_lossy(&token)
            )));
        }
        encoder.insert(token, rank);
    }
    Ok(encoder)
}
