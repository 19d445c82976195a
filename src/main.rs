//! CLI for multitok: info, encode, decode, and SentencePiece to llama2.c export.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use multitok::{
    get_tokenizer_with, SpTokenizer, Tokenizer, TokenizerBackend, TokenizerKind, TokenizerOptions,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

#[derive(Parser)]
#[command(name = "multitok")]
#[command(about = "Tokenize text with HuggingFace, llama2.c, SentencePiece or tiktoken vocabularies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModelArgs {
    /// Vocabulary file or HuggingFace model directory
    #[arg(short, long)]
    model: PathBuf,
    /// Skip format detection
    #[arg(short = 't', long = "type", value_enum)]
    kind: Option<TokenizerKind>,
    /// tokenizer_config.json for HuggingFace tokenizers
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON file with loader options (overrides MULTITOK_TIKTOKEN_CONFIG)
    #[arg(long)]
    options: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show tokenizer information
    Info {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Encode text and print ids, then decode them back token by token
    Encode {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long, default_value = "1")]
        bos: usize,
        #[arg(long, default_value = "0")]
        eos: usize,
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Decode token ids to text
    Decode {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(required = true)]
        ids: Vec<u32>,
    },

    /// Convert a SentencePiece model to a llama2.c tokenizer.bin
    Export {
        /// SentencePiece tokenizer.model
        #[arg(short, long)]
        model: PathBuf,
        #[arg(short, long, default_value = "tokenizer.bin")]
        output: PathBuf,
        /// Put a <pad> token at id 0
        #[arg(long)]
        prepend_padding: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Info { model } => run_info(&model)?,
        Commands::Encode {
            model,
            bos,
            eos,
            text,
        } => run_encode(&model, &text.join(" "), bos, eos)?,
        Commands::Decode { model, ids } => run_decode(&model, &ids)?,
        Commands::Export {
            model,
            output,
            prepend_padding,
        } => run_export(&model, &output, prepend_padding)?,
    }
    Ok(())
}

fn load(args: &ModelArgs) -> Result<Tokenizer> {
    let mut options = match &args.options {
        Some(path) => TokenizerOptions::from_json_file(path)
            .with_context(|| format!("reading options from {:?}", path))?,
        None => TokenizerOptions::from_env()?,
    };
    if let Some(kind) = args.kind {
        options = options.with_kind(kind);
    }
    if let Some(config) = &args.config {
        options = options.with_config_path(config);
    }

    info!("Loading tokenizer from {:?}...", args.model);
    let t0 = Instant::now();
    let tokenizer = get_tokenizer_with(&args.model, &options)
        .with_context(|| format!("loading tokenizer {:?}", args.model))?;
    info!("Loaded in {:.2} ms", t0.elapsed().as_secs_f64() * 1000.0);
    Ok(tokenizer)
}

fn run_info(args: &ModelArgs) -> Result<()> {
    let tok = load(args)?;
    println!("type: {}", tok.kind());
    if let Some(path) = tok.model_path() {
        println!("path: {}", path.display());
    }
    println!("vocab_size: {}", tok.vocab_size());
    println!("bos: {}", tok.bos_tok());
    println!("eos: {}", tok.eos_tok());
    Ok(())
}

fn run_encode(args: &ModelArgs, text: &str, bos: usize, eos: usize) -> Result<()> {
    let tok = load(args)?;
    let ids = tok.encode(text, bos, eos).context("encode")?;
    let joined: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    println!("{}", joined.join(" "));

    let mut prev = tok.bos_tok();
    let mut pieces = Vec::with_capacity(ids.len());
    for &id in &ids {
        // A token holding part of a UTF-8 sequence has no text of its own.
        match tok.decode_next(prev, id) {
            Ok(piece) => pieces.push(format!("{:?}", piece)),
            Err(_) => pieces.push(format!("<{}>", id)),
        }
        prev = id;
    }
    println!("{}", pieces.join(" "));
    Ok(())
}

fn run_decode(args: &ModelArgs, ids: &[u32]) -> Result<()> {
    let tok = load(args)?;
    println!("{}", tok.decode(ids).context("decode")?);
    Ok(())
}

fn run_export(model: &Path, output: &Path, prepend_padding: bool) -> Result<()> {
    let mut sp = SpTokenizer::new();
    sp.load(model)
        .with_context(|| format!("loading SentencePiece model {:?}", model))?;
    sp.export_llama2c(output, prepend_padding)
        .with_context(|| format!("writing {:?}", output))?;
    println!(
        "wrote {} tokens to {}",
        sp.vocab_size() + usize::from(prepend_padding),
        output.display()
    );
    Ok(())
}
