//! HuggingFace `tokenizer.json`, via the `tokenizers` crate.
//!
//! BOS/EOS come from `tokenizer_config.json` when one is given (or sits next to
//! `tokenizer.json` in a model directory); otherwise they are guessed from the
//! added tokens.

use super::{wrap_special, LoadState, TokenizerBackend, TokenizerKind};
use crate::errors::{Result, TokenizerError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const TOKENIZER_JSON: &str = "tokenizer.json";
pub const TOKENIZER_CONFIG_JSON: &str = "tokenizer_config.json";

struct HfModel {
    path: PathBuf,
    tokenizer: tokenizers::Tokenizer,
    vocab_size: usize,
    bos: u32,
    eos: u32,
}

/// Only the part of `tokenizer.json` needed for BOS/EOS guessing.
#[derive(Deserialize)]
struct TokenizerJson {
    #[serde(default)]
    added_tokens: Vec<AddedTokenJson>,
}

#[derive(Deserialize)]
struct AddedTokenJson {
    id: u32,
    content: String,
}

/// Wrapper around HuggingFace tokenizers.
#[derive(Default)]
pub struct HfTokenizer {
    config_path: Option<PathBuf>,
    state: LoadState<HfModel>,
}

impl HfTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read BOS/EOS from `config_path` instead of guessing.
    pub fn with_config(config_path: Option<PathBuf>) -> Self {
        Self {
            config_path,
            state: LoadState::Unloaded,
        }
    }

    /// Id of a token string, if loaded and known.
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.state.loaded()?.tokenizer.token_to_id(token)
    }
}

impl TokenizerBackend for HfTokenizer {
    fn kind(&self) -> TokenizerKind {
        TokenizerKind::HuggingFace
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        if let Some(model) = self.state.loaded() {
            warn!(
                "HF tokenizer already loaded from {:?}, ignoring {:?}",
                model.path, path
            );
            return Ok(());
        }

        let (model_json, config_json) = if path.is_dir() {
            let model_json = path.join(TOKENIZER_JSON);
            if !model_json.exists() {
                return Err(TokenizerError::load(path, "no tokenizer.json in directory"));
            }
            let sibling = path.join(TOKENIZER_CONFIG_JSON);
            let config = self
                .config_path
                .clone()
                .or_else(|| sibling.exists().then_some(sibling));
            (model_json, config)
        } else {
            (path.to_path_buf(), self.config_path.clone())
        };

        let content =
            std::fs::read_to_string(&model_json).map_err(|e| TokenizerError::load(&model_json, e))?;
        let meta: TokenizerJson =
            serde_json::from_str(&content).map_err(|e| TokenizerError::load(&model_json, e))?;
        let tokenizer = tokenizers::Tokenizer::from_file(&model_json)
            .map_err(|e| TokenizerError::load(&model_json, e))?;

        let vocab_size = tokenizer.get_vocab_size(true);
        if vocab_size == 0 {
            return Err(TokenizerError::load(&model_json, "empty vocabulary"));
        }

        let (bos, eos) = match &config_json {
            Some(config) => special_tokens_from_config(&tokenizer, config)?,
            None => {
                let added: Vec<(&str, u32)> = meta
                    .added_tokens
                    .iter()
                    .map(|t| (t.content.as_str(), t.id))
                    .collect();
                let (bos, eos) = guess_special_tokens(&added);
                if bos.is_none() && eos.is_none() {
                    warn!("no BOS/EOS found in added tokens of {:?}, using 0", model_json);
                }
                (bos.unwrap_or(0), eos.unwrap_or(0))
            }
        };

        info!(
            "Loaded HF tokenizer from {:?}: vocab_size={}, bos={}, eos={}",
            model_json, vocab_size, bos, eos
        );
        self.state.set(HfModel {
            path: model_json,
            tokenizer,
            vocab_size,
            bos,
            eos,
        });
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
        let encoding = model
            .tokenizer
            .encode(text, false)
            .map_err(|e| TokenizerError::EncodeFailure(e.to_string()))?;
        Ok(wrap_special(
            model.bos,
            bos,
            encoding.get_ids().to_vec(),
            model.eos,
            eos,
        ))
    }

    fn decode_token(&self, id: u32) -> Result<String> {
        self.decode(&[id])
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let model = self.state.get()?;
        for &id in ids {
            self.verify_token(id)?;
            if model.tokenizer.id_to_token(id).is_none() {
                return Err(TokenizerError::DecodeFailure(format!(
                    "token {} has no vocabulary entry",
                    id
                )));
            }
        }
        model
            .tokenizer
            .decode(ids, false)
            .map_err(|e| TokenizerError::DecodeFailure(e.to_string()))
    }
}

/// `bos_token` / `eos_token` may be a plain string or an added-token object.
fn config_token(config: &serde_json::Value, key: &str) -> Option<String> {
    match config.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(obj) => obj.get("content")?.as_str().map(str::to_string),
        _ => None,
    }
}

fn special_tokens_from_config(tokenizer: &tokenizers::Tokenizer, path: &Path) -> Result<(u32, u32)> {
    let content = std::fs::read_to_string(path).map_err(|e| TokenizerError::load(path, e))?;
    let config: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| TokenizerError::load(path, e))?;
    let bos_token = config_token(&config, "bos_token").unwrap_or_default();
    let eos_token = config_token(&config, "eos_token").unwrap_or_default();
    debug!("tokenizer config {:?}: bos={:?}, eos={:?}", path, bos_token, eos_token);
    let bos = tokenizer.token_to_id(&bos_token).ok_or_else(|| {
        TokenizerError::load(path, format!("BOS token {:?} not in vocabulary", bos_token))
    })?;
    let eos = tokenizer.token_to_id(&eos_token).ok_or_else(|| {
        TokenizerError::load(path, format!("EOS token {:?} not in vocabulary", eos_token))
    })?;
    Ok((bos, eos))
}

/// Guess BOS/EOS from added tokens.
///
/// Candidates contain `bos`/`begin` (resp. `eos`/`end`); several candidates are
/// narrowed to those containing `text`. Only a unique candidate is used, and if
/// only one side is found the other copies it.
pub fn guess_special_tokens(added: &[(&str, u32)]) -> (Option<u32>, Option<u32>) {
    let pick = |needles: [&str; 2]| {
        let mut candidates: Vec<(&str, u32)> = added
            .iter()
            .copied()
            .filter(|(t, _)| needles.iter().any(|n| t.contains(n)))
            .collect();
        if candidates.len() > 1 {
            candidates.retain(|(t, _)| t.contains("text"));
        }
        match candidates.as_slice() {
            [(_, id)] => Some(*id),
            _ => None,
        }
    };
    let bos = pick(["bos", "begin"]);
    let eos = pick(["eos", "end"]);
    match (bos, eos) {
        (Some(b), None) => (Some(b), Some(b)),
        (None, Some(e)) => (Some(e), Some(e)),
        other => other,
    }
}
