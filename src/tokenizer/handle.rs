//! Closed sum over the concrete backends, as returned by the dispatcher.

use super::{HfTokenizer, Llama2cTokenizer, SpTokenizer, Tiktoken, TokenizerBackend, TokenizerKind};
use crate::config::TokenizerOptions;
use crate::errors::Result;
use std::path::Path;

pub enum Tokenizer {
    HuggingFace(HfTokenizer),
    Llama2c(Llama2cTokenizer),
    SentencePiece(SpTokenizer),
    Tiktoken(Tiktoken),
}

impl Tokenizer {
    /// An Unloaded backend of `kind`, configured from `options`.
    pub fn new(kind: TokenizerKind, options: &TokenizerOptions) -> Self {
        match kind {
            TokenizerKind::HuggingFace => {
                Self::HuggingFace(HfTokenizer::with_config(options.config_path.clone()))
            }
            TokenizerKind::Llama2c => Self::Llama2c(Llama2cTokenizer::new()),
            TokenizerKind::SentencePiece => Self::SentencePiece(SpTokenizer::new()),
            TokenizerKind::Tiktoken => Self::Tiktoken(Tiktoken::with_config(options.tiktoken.clone())),
        }
    }
}

macro_rules! delegate {
    ($self:ident, $inner:ident => $body:expr) => {
        match $self {
            Tokenizer::HuggingFace($inner) => $body,
            Tokenizer::Llama2c($inner) => $body,
            Tokenizer::SentencePiece($inner) => $body,
            Tokenizer::Tiktoken($inner) => $body,
        }
    };
}

impl TokenizerBackend for Tokenizer {
    fn kind(&self) -> TokenizerKind {
        delegate!(self, t => t.kind())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        delegate!(self, t => t.load(path))
    }

    fn is_loaded(&self) -> bool {
        delegate!(self, t => t.is_loaded())
    }

    fn model_path(&self) -> Option<&Path> {
        delegate!(self, t => t.model_path())
    }

    fn vocab_size(&self) -> usize {
        delegate!(self, t => t.vocab_size())
    }

    fn bos_tok(&self) -> u32 {
        delegate!(self, t => t.bos_tok())
    }

    fn eos_tok(&self) -> u32 {
        delegate!(self, t => t.eos_tok())
    }

    fn encode(&self, text: &str, bos: usize, eos: usize) -> Result<Vec<u32>> {
        delegate!(self, t => t.encode(text, bos, eos))
    }

    fn decode_token(&self, id: u32) -> Result<String> {
        delegate!(self, t => t.decode_token(id))
    }

    fn decode_next(&self, prev: u32, id: u32) -> Result<String> {
        delegate!(self, t => t.decode_next(prev, id))
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        delegate!(self, t => t.decode(ids))
    }

    fn verify_token(&self, id: u32) -> Result<()> {
        delegate!(self, t => t.verify_token(id))
    }
}
