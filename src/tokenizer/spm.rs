//! SentencePiece models, via the `sentencepiece` crate.

use super::llama2c::write_vocab;
use super::{wrap_special, LoadState, TokenizerBackend, TokenizerKind};
use crate::errors::{Result, TokenizerError};
use prost::Message;
use sentencepiece::SentencePieceProcessor;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

struct SpModel {
    path: PathBuf,
    processor: SentencePieceProcessor,
    vocab_size: usize,
    bos: u32,
    eos: u32,
}

/// The part of `ModelProto` that lists pieces and scores. Other fields are skipped.
#[derive(Clone, PartialEq, Message)]
struct PieceTable {
    #[prost(message, repeated, tag = "1")]
    pieces: Vec<PieceEntry>,
}

#[derive(Clone, PartialEq, Message)]
struct PieceEntry {
    #[prost(string, optional, tag = "1")]
    piece: Option<String>,
    #[prost(float, optional, tag = "2")]
    score: Option<f32>,
}

#[derive(Default)]
pub struct SpTokenizer {
    state: LoadState<SpModel>,
}

impl SpTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the loaded model as a llama2.c vocabulary.
    ///
    /// The `▁` word marker becomes a space and the BOS/EOS pieces are written as `<s>` and
    /// `</s>`. With `prepend_padding`, `<pad>` takes id 0 and every other id
    /// (BOS and EOS included) moves up by one.
    pub fn export_llama2c(&self, path: impl AsRef<Path>, prepend_padding: bool) -> Result<()> {
        let model = self.state.get()?;
        let path = path.as_ref();
        let table = PieceTable::decode(model.processor.to_serialized_proto().as_slice())
            .map_err(|e| TokenizerError::Internal(format!("reading model proto: {}", e)))?;
        if table.pieces.len() != model.vocab_size {
            return Err(TokenizerError::Internal(format!(
                "model proto has {} pieces, processor reports {}",
                table.pieces.len(),
                model.vocab_size
            )));
        }

        let bos = model.processor.bos_id();
        let eos = model.processor.eos_id();
        let mut entries: Vec<(Vec<u8>, f32)> = Vec::with_capacity(table.pieces.len() + 1);
        if prepend_padding {
            entries.push((b"<pad>".to_vec(), -1.0));
        }
        for (id, entry) in table.pieces.iter().enumerate() {
            let id = Some(id as u32);
            let piece = if id == bos {
                "<s>".to_string()
            } else if id == eos {
                "</s>".to_string()
            } else {
                entry.piece.as_deref().unwrap_or_default().replace('\u{2581}', " ")
            };
            entries.push((piece.into_bytes(), entry.score.unwrap_or(0.0)));
        }

        let shift = u32::from(prepend_padding);
        let pieces: Vec<(&[u8], f32)> = entries.iter().map(|(p, s)| (p.as_slice(), *s)).collect();
        write_vocab(path, &pieces, model.bos + shift, model.eos + shift)?;
        info!(
            "Exported {} pieces from {:?} to llama2.c vocabulary {:?}",
            pieces.len(),
            model.path,
            path
        );
        Ok(())
    }

    fn decode_ids(model: &SpModel, ids: &[u32]) -> Result<String> {
        model
            .processor
            .decode_piece_ids(ids)
            .map_err(|e| TokenizerError::DecodeFailure(e.to_string()))
    }
}

impl TokenizerBackend for SpTokenizer {
    fn kind(&self) -> TokenizerKind {
        TokenizerKind::SentencePiece
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        if let Some(model) = self.state.loaded() {
            warn!(
                "SentencePiece model already loaded from {:?}, ignoring {:?}",
                model.path, path
            );
            return Ok(());
        }
        if !path.is_file() {
            return Err(TokenizerError::load(path, "not a file"));
        }

        let processor = SentencePieceProcessor::open(path).map_err(|e| TokenizerError::load(path, e))?;
        let vocab_size = processor.len();
        if vocab_size == 0 {
            return Err(TokenizerError::load(path, "empty vocabulary"));
        }
        // Disabled BOS/EOS (id -1 in the model proto) report as 0.
        let bos = processor.bos_id().unwrap_or(0);
        let eos = processor.eos_id().unwrap_or(0);

        info!(
            "Loaded SentencePiece model from {:?}: vocab_size={}, bos={}, eos={}",
            path, vocab_size, bos, eos
        );
        self.state.set(SpModel {
            path: path.to_path_buf(),
            processor,
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
        let pieces = model
            .processor
            .encode(text)
            .map_err(|e| TokenizerError::EncodeFailure(e.to_string()))?;
        let body = pieces.into_iter().map(|p| p.id).collect();
        Ok(wrap_special(model.bos, bos, body, model.eos, eos))
    }

    fn decode_token(&self, id: u32) -> Result<String> {
        let model = self.state.get()?;
        self.verify_token(id)?;
        Self::decode_ids(model, &[id])
    }

    /// SentencePiece drops the leading space of the first piece it decodes,
    /// so decode the pair and keep what `id` adds to `prev`.
    fn decode_next(&self, prev: u32, id: u32) -> Result<String> {
        let model = self.state.get()?;
        self.verify_token(id)?;
        if prev as usize >= model.vocab_size {
            return Self::decode_ids(model, &[id]);
        }
        let head = Self::decode_ids(model, &[prev])?;
        let pair = Self::decode_ids(model, &[prev, id])?;
        match pair.strip_prefix(head.as_str()) {
            Some(tail) => Ok(tail.to_string()),
            None => Self::decode_ids(model, &[id]),
        }
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let model = self.state.get()?;
        for &id in ids {
            self.verify_token(id)?;
        }
        Self::decode_ids(model, ids)
    }
}
