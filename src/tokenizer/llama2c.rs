//! llama2.c binary vocabulary (`tokenizer.bin`).
//!
//! Layout (little-endian): header `vocab_size, bos, eos, max_token_length` as u32,
//! then per token `score: f32, len: u32, len bytes`. Pieces of the form `<0xHH>`
//! are byte-fallback tokens; raw byte `b` is token `b + 3`.

use super::{wrap_special, LoadState, TokenizerBackend, TokenizerKind};
use crate::errors::{Result, TokenizerError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const HEADER_LEN: usize = 16;
/// Smallest possible token record: score + length, no bytes.
const MIN_RECORD_LEN: u64 = 8;
/// Byte `b` maps to token `b + BYTE_FALLBACK_OFFSET` (after `<unk>`, `<s>`, `</s>`).
const BYTE_FALLBACK_OFFSET: u32 = 3;

struct Llama2cModel {
    path: PathBuf,
    pieces: Vec<Vec<u8>>,
    scores: Vec<f32>,
    lookup: FxHashMap<Vec<u8>, u32>,
    bos: u32,
    eos: u32,
}

/// Score-driven BPE over a llama2.c vocabulary.
#[derive(Default)]
pub struct Llama2cTokenizer {
    state: LoadState<Llama2cModel>,
}

impl Llama2cTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Longest piece in bytes, 0 while unloaded.
    pub fn max_token_length(&self) -> usize {
        self.state
            .loaded()
            .map(|m| m.pieces.iter().map(Vec::len).max().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Score of token `id`, if loaded and in range.
    pub fn score(&self, id: u32) -> Option<f32> {
        self.state.loaded()?.scores.get(id as usize).copied()
    }
}

impl TokenizerBackend for Llama2cTokenizer {
    fn kind(&self) -> TokenizerKind {
        TokenizerKind::Llama2c
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        if let Some(model) = self.state.loaded() {
            warn!(
                "llama2c tokenizer already loaded from {:?}, ignoring {:?}",
                model.path, path
            );
            return Ok(());
        }
        let data = std::fs::read(path).map_err(|e| TokenizerError::load(path, e))?;
        let model = parse_vocab(path, &data)?;
        info!(
            "Loaded llama2c tokenizer from {:?}: vocab_size={}, bos={}, eos={}",
            path,
            model.pieces.len(),
            model.bos,
            model.eos
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
        self.state.loaded().map_or(0, |m| m.pieces.len())
    }

    fn bos_tok(&self) -> u32 {
        self.state.loaded().map_or(0, |m| m.bos)
    }

    fn eos_tok(&self) -> u32 {
        self.state.loaded().map_or(0, |m| m.eos)
    }

    fn encode(&self, text: &str, bos: usize, eos: usize) -> Result<Vec<u32>> {
        let model = self.state.get()?;
        let body = model.encode(text)?;
        Ok(wrap_special(model.bos, bos, body, model.eos, eos))
    }

    fn decode_token(&self, id: u32) -> Result<String> {
        self.verify_token(id)?;
        let model = self.state.get()?;
        let bytes = surface_bytes(&model.pieces[id as usize])?;
        Ok(String::from_utf8_lossy(bytes.as_ref()).into_owned())
    }

    /// Following BOS, the leading space of the piece is dropped.
    fn decode_next(&self, prev: u32, id: u32) -> Result<String> {
        self.verify_token(id)?;
        let model = self.state.get()?;
        let mut out = Vec::new();
        model.push_piece(prev, id, &mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let model = self.state.get()?;
        let mut out = Vec::new();
        let mut prev = model.bos;
        for &id in ids {
            self.verify_token(id)?;
            model.push_piece(prev, id, &mut out)?;
            prev = id;
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

impl Llama2cModel {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut tokens = Vec::with_capacity(text.len() + 1);
        if text.is_empty() {
            return Ok(tokens);
        }
        // dummy prefix
        self.push_char(" ", &mut tokens)?;
        let mut buf = [0u8; 4];
        for c in text.chars() {
            self.push_char(c.encode_utf8(&mut buf), &mut tokens)?;
        }

        // Merge the adjacent pair whose concatenation scores highest until none is left.
        let mut merged = Vec::new();
        loop {
            let mut best: Option<(f32, usize, u32)> = None;
            for i in 0..tokens.len().saturating_sub(1) {
                merged.clear();
                merged.extend_from_slice(&self.pieces[tokens[i] as usize]);
                merged.extend_from_slice(&self.pieces[tokens[i + 1] as usize]);
                if let Some(&id) = self.lookup.get(merged.as_slice()) {
                    let score = self.scores[id as usize];
                    if best.map_or(true, |(s, _, _)| score > s) {
                        best = Some((score, i, id));
                    }
                }
            }
            match best {
                Some((_, i, id)) => {
                    tokens[i] = id;
                    tokens.remove(i + 1);
                }
                None => break,
            }
        }
        Ok(tokens)
    }

    fn push_char(&self, c: &str, tokens: &mut Vec<u32>) -> Result<()> {
        if let Some(&id) = self.lookup.get(c.as_bytes()) {
            tokens.push(id);
            return Ok(());
        }
        for &b in c.as_bytes() {
            let id = b as u32 + BYTE_FALLBACK_OFFSET;
            if id as usize >= self.pieces.len() {
                return Err(TokenizerError::EncodeFailure(format!(
                    "no token for byte 0x{:02x} and no byte fallback",
                    b
                )));
            }
            tokens.push(id);
        }
        Ok(())
    }

    fn push_piece(&self, prev: u32, id: u32, out: &mut Vec<u8>) -> Result<()> {
        let mut piece = self.pieces[id as usize].as_slice();
        if prev == self.bos && piece.first() == Some(&b' ') {
            piece = &piece[1..];
        }
        out.extend_from_slice(surface_bytes(piece)?.as_ref());
        Ok(())
    }
}

/// Resolve `<0xHH>` byte-fallback pieces to their byte.
fn surface_bytes(piece: &[u8]) -> Result<Cow<'_, [u8]>> {
    if piece.len() == 6 && piece.starts_with(b"<0x") && piece[5] == b'>' {
        let hex = std::str::from_utf8(&piece[3..5])
            .ok()
            .and_then(|h| u8::from_str_radix(h, 16).ok())
            .ok_or_else(|| {
                TokenizerError::DecodeFailure(format!(
                    "malformed byte piece {}",
                    String::from_utf8_lossy(piece)
                ))
            })?;
        return Ok(Cow::Owned(vec![hex]));
    }
    Ok(Cow::Borrowed(piece))
}

fn parse_vocab(path: &Path, data: &[u8]) -> Result<Llama2cModel> {
    let fail = |reason: String| TokenizerError::load(path, reason);
    if data.len() < HEADER_LEN {
        return Err(fail(format!("header too short ({} bytes)", data.len())));
    }
    let mut r = Cursor::new(data);
    let vocab_size = r.read_u32::<LittleEndian>().map_err(|e| fail(e.to_string()))?;
    let bos = r.read_u32::<LittleEndian>().map_err(|e| fail(e.to_string()))?;
    let eos = r.read_u32::<LittleEndian>().map_err(|e| fail(e.to_string()))?;
    let max_token_length = r.read_u32::<LittleEndian>().map_err(|e| fail(e.to_string()))?;

    if vocab_size == 0 {
        return Err(fail("empty vocabulary".into()));
    }
    let body_len = (data.len() - HEADER_LEN) as u64;
    if vocab_size as u64 * MIN_RECORD_LEN > body_len {
        return Err(fail(format!(
            "vocab_size {} does not fit in {} bytes",
            vocab_size, body_len
        )));
    }
    if bos >= vocab_size || eos >= vocab_size {
        return Err(fail(format!(
            "bos {} / eos {} outside vocabulary of {}",
            bos, eos, vocab_size
        )));
    }
    if max_token_length == 0 {
        return Err(fail("max_token_length is 0".into()));
    }
    debug!(
        "llama2c header: vocab_size={}, bos={}, eos={}, max_token_length={}",
        vocab_size, bos, eos, max_token_length
    );

    let n = vocab_size as usize;
    let mut pieces = Vec::with_capacity(n);
    let mut scores = Vec::with_capacity(n);
    let mut lookup = FxHashMap::default();
    for id in 0..vocab_size {
        let score = r
            .read_f32::<LittleEndian>()
            .map_err(|_| fail(format!("truncated at token {}", id)))?;
        if !score.is_finite() {
            return Err(fail(format!("non-finite score for token {}", id)));
        }
        let len = r
            .read_u32::<LittleEndian>()
            .map_err(|_| fail(format!("truncated at token {}", id)))?;
        if len > max_token_length {
            return Err(fail(format!(
                "token {} has length {} > max_token_length {}",
                id, len, max_token_length
            )));
        }
        let mut piece = vec![0u8; len as usize];
        r.read_exact(&mut piece)
            .map_err(|_| fail(format!("truncated in token {}", id)))?;
        lookup.entry(piece.clone()).or_insert(id);
        pieces.push(piece);
        scores.push(score);
    }
    if (r.position() as usize) != data.len() {
        return Err(fail(format!(
            "{} trailing bytes after vocabulary",
            data.len() - r.position() as usize
        )));
    }

    Ok(Llama2cModel {
        path: path.to_path_buf(),
        pieces,
        scores,
        lookup,
        bos,
        eos,
    })
}

/// Write `pieces` as a llama2.c vocabulary file that [`Llama2cTokenizer`] can load.
pub fn write_vocab(path: impl AsRef<Path>, pieces: &[(&[u8], f32)], bos: u32, eos: u32) -> Result<()> {
    let path = path.as_ref();
    let io_err = |e: std::io::Error| TokenizerError::Internal(format!("{}: {}", path.display(), e));
    let max_token_length = pieces.iter().map(|(p, _)| p.len()).max().unwrap_or(0);
    let file = File::create(path).map_err(io_err)?;
    let mut w = BufWriter::new(file);
    w.write_u32::<LittleEndian>(pieces.len() as u32).map_err(io_err)?;
    w.write_u32::<LittleEndian>(bos).map_err(io_err)?;
    w.write_u32::<LittleEndian>(eos).map_err(io_err)?;
    w.write_u32::<LittleEndian>(max_token_length as u32).map_err(io_err)?;
    for (piece, score) in pieces {
        w.write_f32::<LittleEndian>(*score).map_err(io_err)?;
        w.write_u32::<LittleEndian>(piece.len() as u32).map_err(io_err)?;
        w.write_all(piece).map_err(io_err)?;
    }
    w.flush().map_err(io_err)?;
    Ok(())
}
