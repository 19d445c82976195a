//! Integration tests: format detection, fallback order, cross-backend contract.

use base64::{engine::general_purpose::STANDARD, Engine};
use multitok::tokenizer::llama2c::write_vocab;
use multitok::{
    get_tokenizer, get_tokenizer_with, ErrorKind, HfTokenizer, Llama2cTokenizer, SpTokenizer,
    Tiktoken, TiktokenConfig, TokenizerBackend, TokenizerError, TokenizerKind, TokenizerOptions,
};
use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const HF_TOKENIZER_JSON: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [
    {"id": 1, "content": "<|begin_of_text|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 2, "content": "<|end_of_text|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
  ],
  "normalizer": null,
  "pre_tokenizer": {"type": "Whitespace"},
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {"<unk>": 0, "<|begin_of_text|>": 1, "<|end_of_text|>": 2, "Hello": 3, "world": 4, "!": 5},
    "unk_token": "<unk>"
  }
}"#;

/// Just enough of SentencePiece's `ModelProto` to write a unigram model.
#[derive(Clone, PartialEq, prost::Message)]
struct SpModelProto {
    #[prost(message, repeated, tag = "1")]
    pieces: Vec<SpPiece>,
    #[prost(message, optional, tag = "2")]
    trainer_spec: Option<SpTrainerSpec>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct SpPiece {
    #[prost(string, optional, tag = "1")]
    piece: Option<String>,
    #[prost(float, optional, tag = "2")]
    score: Option<f32>,
    #[prost(int32, optional, tag = "3")]
    kind: Option<i32>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct SpTrainerSpec {
    #[prost(int32, optional, tag = "3")]
    model_type: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    vocab_size: Option<i32>,
    #[prost(int32, optional, tag = "40")]
    unk_id: Option<i32>,
    #[prost(int32, optional, tag = "41")]
    bos_id: Option<i32>,
    #[prost(int32, optional, tag = "42")]
    eos_id: Option<i32>,
}

const SP_NORMAL: i32 = 1;
const SP_UNKNOWN: i32 = 2;
const SP_CONTROL: i32 = 3;
const SP_UNIGRAM: i32 = 1;

const TIKTOKEN_MERGES: [&str; 8] = ["He", "ll", "llo", " w", "or", "ld", " wor", " world"];

fn llama2c_vocab(dir: &Path) -> PathBuf {
    let mut entries: Vec<(Vec<u8>, f32)> = vec![
        (b"<unk>".to_vec(), 0.0),
        (b"<s>".to_vec(), 0.0),
        (b"</s>".to_vec(), 0.0),
    ];
    for b in 0..=255u8 {
        entries.push((format!("<0x{:02X}>", b).into_bytes(), 0.0));
    }
    for (piece, score) in [
        (" ", -1.0),
        ("H", -1.0),
        ("e", -1.0),
        ("l", -1.0),
        ("o", -1.0),
        ("w", -1.0),
        ("r", -1.0),
        ("d", -1.0),
        ("ll", 10.0),
        ("llo", 9.0),
        ("He", 8.0),
        ("Hello", 7.0),
        (" Hello", 6.0),
        (" w", 5.0),
        ("or", 4.0),
        (" wor", 3.0),
        ("ld", 2.0),
        (" world", 1.0),
    ] {
        entries.push((piece.as_bytes().to_vec(), score));
    }
    let pieces: Vec<(&[u8], f32)> = entries.iter().map(|(p, s)| (p.as_slice(), *s)).collect();
    let path = dir.join("tokenizer.bin");
    write_vocab(&path, &pieces, 1, 2).unwrap();
    path
}

fn tiktoken_table(dir: &Path) -> PathBuf {
    let mut out = String::new();
    for b in 0..=255u8 {
        writeln!(out, "{} {}", STANDARD.encode([b]), b).unwrap();
    }
    for (i, m) in TIKTOKEN_MERGES.iter().enumerate() {
        writeln!(out, "{} {}", STANDARD.encode(m), 256 + i).unwrap();
    }
    let path = dir.join("tokenizer.model");
    std::fs::write(&path, out).unwrap();
    path
}

/// Unigram model: `<unk>`, `<s>`, `</s>`, then `▁Hello` (3) and `▁world` (4)
/// ahead of single characters.
fn sentencepiece_model(dir: &Path) -> PathBuf {
    let mut pieces = vec![
        ("<unk>", 0.0, SP_UNKNOWN),
        ("<s>", 0.0, SP_CONTROL),
        ("</s>", 0.0, SP_CONTROL),
        ("\u{2581}Hello", -1.0, SP_NORMAL),
        ("\u{2581}world", -1.0, SP_NORMAL),
        ("\u{2581}", -2.0, SP_NORMAL),
    ];
    for c in ["H", "e", "l", "o", "w", "r", "d", "!"] {
        pieces.push((c, -3.0, SP_NORMAL));
    }
    let proto = SpModelProto {
        trainer_spec: Some(SpTrainerSpec {
            model_type: Some(SP_UNIGRAM),
            vocab_size: Some(pieces.len() as i32),
            unk_id: Some(0),
            bos_id: Some(1),
            eos_id: Some(2),
        }),
        pieces: pieces
            .into_iter()
            .map(|(piece, score, kind)| SpPiece {
                piece: Some(piece.to_string()),
                score: Some(score),
                kind: Some(kind),
            })
            .collect(),
    };
    let path = dir.join("sp.model");
    std::fs::write(&path, prost::Message::encode_to_vec(&proto)).unwrap();
    path
}

fn hf_json(dir: &Path) -> PathBuf {
    let path = dir.join("tokenizer.json");
    std::fs::write(&path, HF_TOKENIZER_JSON).unwrap();
    path
}

fn small_tiktoken_options() -> TokenizerOptions {
    TokenizerOptions::default().with_tiktoken(TiktokenConfig {
        special_tokens: vec!["<|bos|>".into(), "<|eos|>".into()],
        bos_index: 0,
        eos_index: 1,
        ..TiktokenConfig::default()
    })
}

fn expect_err<T>(res: multitok::Result<T>) -> TokenizerError {
    match res {
        Err(e) => e,
        Ok(_) => panic!("expected an error"),
    }
}

#[test]
fn unloaded_backends_share_defaults() {
    let backends: Vec<Box<dyn TokenizerBackend>> = vec![
        Box::new(HfTokenizer::new()),
        Box::new(Llama2cTokenizer::new()),
        Box::new(SpTokenizer::new()),
        Box::new(Tiktoken::new()),
    ];
    for tok in &backends {
        assert!(!tok.is_loaded(), "{}", tok.kind());
        assert_eq!(tok.vocab_size(), 0);
        assert_eq!(tok.bos_tok(), 0);
        assert_eq!(tok.eos_tok(), 0);
        assert_eq!(
            expect_err(tok.encode("Hello", 1, 1)).kind(),
            ErrorKind::Uninitialized
        );
        assert_eq!(expect_err(tok.decode(&[0])).kind(), ErrorKind::Uninitialized);
        assert_eq!(
            expect_err(tok.decode_next(0, 0)).kind(),
            ErrorKind::Uninitialized
        );
    }
}

#[test]
fn json_path_loads_huggingface() {
    let dir = tempfile::tempdir().unwrap();
    let path = hf_json(dir.path());
    let tok = get_tokenizer(&path, None, None).unwrap();
    assert_eq!(tok.kind(), TokenizerKind::HuggingFace);
    assert!(tok.vocab_size() >= 6);
    assert_eq!(tok.bos_tok(), 1);
    assert_eq!(tok.eos_tok(), 2);

    let ids = tok.encode("Hello world!", 1, 1).unwrap();
    assert_eq!(ids, vec![1, 3, 4, 5, 2]);
    assert_eq!(tok.decode_token(3).unwrap(), "Hello");
    for &id in &ids {
        assert!(tok.decode_token(id).is_ok(), "id {}", id);
    }
}

#[test]
fn huggingface_directory_reads_sibling_config() {
    let dir = tempfile::tempdir().unwrap();
    hf_json(dir.path());
    std::fs::write(
        dir.path().join("tokenizer_config.json"),
        r#"{"bos_token": {"content": "<|end_of_text|>"}, "eos_token": "<|begin_of_text|>"}"#,
    )
    .unwrap();
    let tok = get_tokenizer(dir.path(), None, None).unwrap();
    assert_eq!(tok.kind(), TokenizerKind::HuggingFace);
    assert_eq!(tok.bos_tok(), 2);
    assert_eq!(tok.eos_tok(), 1);
}

#[test]
fn huggingface_config_with_unknown_token_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = hf_json(dir.path());
    let config = dir.path().join("bad_config.json");
    std::fs::write(&config, r#"{"bos_token": "<s>", "eos_token": "</s>"}"#).unwrap();
    let err = expect_err(get_tokenizer(&path, Some(&config), Some(TokenizerKind::HuggingFace)));
    assert!(matches!(err, TokenizerError::LoadFailure { .. }), "{}", err);
}

#[test]
fn llama2c_is_tried_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = llama2c_vocab(dir.path());
    let tok = get_tokenizer(&path, None, None).unwrap();
    assert_eq!(tok.kind(), TokenizerKind::Llama2c);
    assert_eq!(tok.model_path(), Some(path.as_path()));
    assert_eq!(tok.bos_tok(), 1);
    assert_eq!(tok.eos_tok(), 2);
    let ids = tok.encode("Hello world", 0, 0).unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(tok.decode(&ids).unwrap(), "Hello world");
}

#[test]
fn sentencepiece_reached_through_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let path = sentencepiece_model(dir.path());
    let tok = get_tokenizer(&path, None, None).unwrap();
    assert_eq!(tok.kind(), TokenizerKind::SentencePiece);
    assert_eq!(tok.model_path(), Some(path.as_path()));
    assert_eq!(tok.vocab_size(), 14);
    assert_eq!(tok.bos_tok(), 1);
    assert_eq!(tok.eos_tok(), 2);

    let ids = tok.encode("Hello world", 1, 1).unwrap();
    assert_eq!(ids, vec![1, 3, 4, 2]);
    assert_eq!(tok.decode(&ids[1..3]).unwrap(), "Hello world");

    let mut prev = ids[0];
    let mut streamed = String::new();
    for &id in &ids[1..3] {
        streamed.push_str(&tok.decode_next(prev, id).unwrap());
        prev = id;
    }
    assert_eq!(streamed.trim_start(), "Hello world");
}

#[test]
fn sentencepiece_exports_to_llama2c() {
    let dir = tempfile::tempdir().unwrap();
    let mut sp = SpTokenizer::new();
    sp.load(&sentencepiece_model(dir.path())).unwrap();

    let bin = dir.path().join("converted.bin");
    sp.export_llama2c(&bin, false).unwrap();
    let tok = get_tokenizer(&bin, None, None).unwrap();
    assert_eq!(tok.kind(), TokenizerKind::Llama2c);
    assert_eq!(tok.vocab_size(), sp.vocab_size());
    assert_eq!((tok.bos_tok(), tok.eos_tok()), (1, 2));
    assert_eq!(tok.decode_token(1).unwrap(), "<s>");
    assert_eq!(tok.decode_token(3).unwrap(), " Hello");
    assert_eq!(tok.decode(&[3, 4]).unwrap(), "Hello world");
    let ids = tok.encode("Hello world!", 0, 0).unwrap();
    assert_eq!(tok.decode(&ids).unwrap(), "Hello world!");

    let padded = dir.path().join("padded.bin");
    sp.export_llama2c(&padded, true).unwrap();
    let tok = get_tokenizer(&padded, None, None).unwrap();
    assert_eq!(tok.vocab_size(), sp.vocab_size() + 1);
    assert_eq!((tok.bos_tok(), tok.eos_tok()), (2, 3));
    assert_eq!(tok.decode_token(0).unwrap(), "<pad>");
    assert_eq!(tok.decode(&[4, 5]).unwrap(), "Hello world");
}

#[test]
fn tiktoken_reached_through_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let path = tiktoken_table(dir.path());
    let tok = get_tokenizer_with(&path, &small_tiktoken_options()).unwrap();
    assert_eq!(tok.kind(), TokenizerKind::Tiktoken);
    assert_eq!(tok.vocab_size(), 256 + TIKTOKEN_MERGES.len() + 2);
    assert_eq!(tok.encode("Hello world!", 0, 0).unwrap(), vec![256, 258, 263, 33]);
    assert_eq!(tok.decode(&[256, 258, 263, 33]).unwrap(), "Hello world!");
}

#[test]
fn unrecognized_file_reports_every_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.bin");
    std::fs::write(&path, b"\xff\xfe definitely not a tokenizer \xff").unwrap();

    let err = expect_err(get_tokenizer(&path, None, None));
    assert_eq!(err.kind(), ErrorKind::LoadFailure);
    match err {
        TokenizerError::NoBackendMatched { attempts, .. } => {
            let kinds: Vec<TokenizerKind> = attempts.iter().map(|a| a.kind).collect();
            assert_eq!(kinds, TokenizerKind::FALLBACK_ORDER.to_vec());
            assert!(attempts.iter().all(|a| a.error.kind() == ErrorKind::LoadFailure));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn detection_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let bin = llama2c_vocab(dir.path());
    let table = tiktoken_table(dir.path());
    for path in [&bin, &table] {
        let first = get_tokenizer_with(path, &small_tiktoken_options()).unwrap().kind();
        for _ in 0..3 {
            let again = get_tokenizer_with(path, &small_tiktoken_options()).unwrap().kind();
            assert_eq!(again, first);
        }
    }
}

#[test]
fn explicit_kind_reports_its_own_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = llama2c_vocab(dir.path());
    let err = expect_err(get_tokenizer(&path, None, Some(TokenizerKind::Tiktoken)));
    assert!(matches!(err, TokenizerError::LoadFailure { .. }), "{}", err);
}

#[test]
fn second_load_keeps_first_vocabulary() {
    let dir = tempfile::tempdir().unwrap();
    let bin = llama2c_vocab(dir.path());
    let table = tiktoken_table(dir.path());
    let mut tok = get_tokenizer(&bin, None, None).unwrap();
    let vocab_size = tok.vocab_size();
    tok.load(&table).unwrap();
    assert_eq!(tok.vocab_size(), vocab_size);
    assert_eq!(tok.model_path(), Some(bin.as_path()));
}

#[test]
fn bos_eos_compose_around_plain_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let bin = llama2c_vocab(dir.path());
    let table = tiktoken_table(dir.path());
    let sp = sentencepiece_model(dir.path());
    let tokenizers = [
        get_tokenizer(&bin, None, None).unwrap(),
        get_tokenizer_with(&table, &small_tiktoken_options()).unwrap(),
        get_tokenizer(&sp, None, None).unwrap(),
    ];
    for tok in &tokenizers {
        let plain = tok.encode("Hello world", 0, 0).unwrap();
        let wrapped = tok.encode("Hello world", 2, 1).unwrap();
        let mut expected = vec![tok.bos_tok(), tok.bos_tok()];
        expected.extend(&plain);
        expected.push(tok.eos_tok());
        assert_eq!(wrapped, expected, "{}", tok.kind());
    }
}

#[test]
fn out_of_range_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let bin = llama2c_vocab(dir.path());
    let table = tiktoken_table(dir.path());
    let sp = sentencepiece_model(dir.path());
    let tokenizers = [
        get_tokenizer(&bin, None, None).unwrap(),
        get_tokenizer_with(&table, &small_tiktoken_options()).unwrap(),
        get_tokenizer(&sp, None, None).unwrap(),
        get_tokenizer(hf_json(dir.path()), None, None).unwrap(),
    ];
    for tok in &tokenizers {
        let id = tok.vocab_size() as u32;
        assert_eq!(expect_err(tok.decode_token(id)).kind(), ErrorKind::OutOfRange);
        assert_eq!(expect_err(tok.decode(&[0, id])).kind(), ErrorKind::OutOfRange);
        assert_eq!(expect_err(tok.verify_token(id)).kind(), ErrorKind::OutOfRange);
        assert!(tok.verify_token(id - 1).is_ok());
    }
}

#[test]
fn random_text_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    let bin = llama2c_vocab(dir.path());
    let table = tiktoken_table(dir.path());
    let tokenizers = [
        get_tokenizer(&bin, None, None).unwrap(),
        get_tokenizer_with(&table, &small_tiktoken_options()).unwrap(),
    ];
    let alphabet: Vec<char> = "Helo wrd!x\u{e9}\u{20ac}\u{6f22}\n".chars().collect();
    let mut rng = rand::thread_rng();
    for _ in 0..50 {
        let len = rng.gen_range(0..40);
        let text: String = (0..len)
            .map(|_| *alphabet.choose(&mut rng).unwrap())
            .collect();
        for tok in &tokenizers {
            let ids = tok.encode(&text, 0, 0).unwrap();
            assert_eq!(tok.decode(&ids).unwrap(), text, "{} on {:?}", tok.kind(), text);
            assert_eq!(tok.encode(&text, 0, 0).unwrap(), ids, "deterministic");
        }
    }
}

#[test]
fn streaming_decode_matches_full_decode() {
    let dir = tempfile::tempdir().unwrap();
    let bin = llama2c_vocab(dir.path());
    let tok = get_tokenizer(&bin, None, None).unwrap();
    let ids = tok.encode("Hello world", 1, 0).unwrap();
    let mut prev = ids[0];
    let mut streamed = String::new();
    for &id in &ids[1..] {
        streamed.push_str(&tok.decode_next(prev, id).unwrap());
        prev = id;
    }
    assert_eq!(streamed, "Hello world");
}

#[test]
fn loaded_tokenizer_is_shareable_across_threads() {
    let dir = tempfile::tempdir().unwrap();
    let tok = Arc::new(get_tokenizer(llama2c_vocab(dir.path()), None, None).unwrap());
    let expected = tok.encode("Hello world", 1, 1).unwrap();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let tok = Arc::clone(&tok);
            std::thread::spawn(move || tok.encode("Hello world", 1, 1).unwrap())
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), expected);
    }
}
