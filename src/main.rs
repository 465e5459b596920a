use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use docent_core::config::{Config, provider_defaults};
use docent_core::context::AssemblerConfig;
use docent_core::engine::{Answer, Engine, EngineConfig};
use docent_index::chunker::ChunkerConfig;
use docent_index::indexer::{CorpusIndexer, IndexerConfig};
use docent_index::retriever::{RetrievalConfig, Retriever};
use docent_index::store::{SharedIndex, VectorIndex};
use docent_llm::any::AnyProvider;
use docent_llm::compatible::CompatibleProvider;
use docent_llm::ollama::OllamaProvider;
use docent_llm::openai::OpenAiProvider;

mod init;

#[derive(Parser)]
#[command(
    name = "docent",
    version,
    about = "Grounded documentation Q&A with source citations"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a single question and print the cited answer.
    Ask {
        question: String,
        /// Session id for follow-up context.
        #[arg(long, default_value = "cli")]
        session: String,
    },
    /// Interactive question/answer loop.
    Chat,
    /// Re-ingest the corpus and atomically republish the index snapshot.
    Rebuild,
    /// Interactive configuration wizard.
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);

    if matches!(cli.command, Command::Init) {
        return init::run(&config_path);
    }

    let config = Config::load(&config_path)?;
    config.validate()?;

    match cli.command {
        Command::Rebuild => rebuild(&config).await,
        Command::Ask { question, session } => {
            let engine = build_engine(&config)?;
            answer_question(&engine, &question, &session).await
        }
        Command::Chat => {
            let engine = build_engine(&config)?;
            chat_loop(&engine).await
        }
        Command::Init => unreachable!("handled above"),
    }
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("DOCENT_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

async fn rebuild(config: &Config) -> anyhow::Result<()> {
    let provider = Arc::new(create_embedding_provider(config)?);
    let indexer = CorpusIndexer::new(
        provider,
        &config.embedding.model,
        IndexerConfig {
            chunker: ChunkerConfig {
                target_chars: config.chunking.target_chars,
                max_chars: config.chunking.max_chars,
                overlap_chars: config.chunking.overlap_chars,
            },
        },
    );

    let report = indexer
        .rebuild(
            Path::new(&config.corpus.docs_dir),
            Path::new(&config.corpus.index_path),
        )
        .await
        .context("corpus rebuild failed")?;

    println!(
        "indexed {} documents into {} chunks in {}ms → {}",
        report.documents, report.chunks, report.duration_ms, config.corpus.index_path
    );
    Ok(())
}

fn build_engine(config: &Config) -> anyhow::Result<Engine<AnyProvider, AnyProvider>> {
    let index_path = Path::new(&config.corpus.index_path);
    if !index_path.exists() {
        bail!(
            "no index snapshot at {}, run `docent rebuild` first",
            index_path.display()
        );
    }
    let index = VectorIndex::load(index_path, Some(&config.embedding.model))?;
    tracing::info!(chunks = index.len(), model = index.embedding_model(), "index loaded");

    let generator = Arc::new(create_generation_provider(config)?);
    let embedder = Arc::new(create_embedding_provider(config)?);

    let retriever = Retriever::new(
        Arc::new(SharedIndex::new(index)),
        embedder,
        RetrievalConfig {
            top_k: config.retrieval.top_k,
            score_floor: config.retrieval.score_floor,
            history_aware: config.retrieval.history_aware,
        },
    );

    let engine_config = EngineConfig {
        max_retries: config.generation.max_retries,
        embed_timeout: config.generation.embed_timeout(),
        generate_timeout: config.generation.generate_timeout(),
        assembler: AssemblerConfig {
            context_budget_tokens: config.generation.context_budget_tokens,
            history_turns: config.memory.history_turns,
        },
        history_turns: config.memory.history_turns,
    };

    Ok(Engine::new(generator, retriever, engine_config))
}

fn create_generation_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    let llm = &config.llm;
    let defaults = provider_defaults(&llm.provider)
        .with_context(|| format!("unknown provider: {}", llm.provider))?;

    let model = llm.effective_model();
    let base_url = llm.effective_base_url();

    match llm.provider.as_str() {
        "ollama" => Ok(AnyProvider::Ollama(OllamaProvider::new(
            &base_url,
            model,
            config.embedding.model.clone(),
        ))),
        "openai" => {
            let api_key = require_api_key(defaults.api_key_env)?;
            Ok(AnyProvider::OpenAi(OpenAiProvider::new(
                api_key,
                base_url,
                model,
                llm.temperature,
                llm.max_tokens,
                None,
            )))
        }
        name => {
            let api_key = require_api_key(defaults.api_key_env)?;
            Ok(AnyProvider::Compatible(CompatibleProvider::new(
                name.to_owned(),
                api_key,
                base_url,
                model,
                llm.temperature,
                llm.max_tokens,
                None,
            )))
        }
    }
}

fn create_embedding_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "ollama" => Ok(AnyProvider::Ollama(OllamaProvider::new(
            &embedding.base_url,
            docent_llm::ollama::DEFAULT_MODEL.to_owned(),
            embedding.model.clone(),
        ))),
        "openai" => {
            let api_key = require_api_key("OPENAI_API_KEY")?;
            Ok(AnyProvider::OpenAi(OpenAiProvider::new(
                api_key,
                docent_llm::openai::DEFAULT_BASE_URL.to_owned(),
                docent_llm::openai::DEFAULT_MODEL.to_owned(),
                0.0,
                16,
                Some(embedding.model.clone()),
            )))
        }
        other => bail!("unknown embedding provider: {other}"),
    }
}

fn require_api_key(env_var: &str) -> anyhow::Result<String> {
    std::env::var(env_var)
        .with_context(|| format!("missing API key: set {env_var} in the environment"))
}

async fn answer_question(
    engine: &Engine<AnyProvider, AnyProvider>,
    question: &str,
    session: &str,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let (tx, mut rx) = mpsc::channel::<String>(64);
    let printer = tokio::spawn(async move {
        while let Some(token) = rx.recv().await {
            print!("{token}");
            let _ = std::io::stdout().flush();
        }
    });

    let answer = engine
        .ask_stream(question, session, tx, cancel)
        .await
        .context("request failed")?;
    let _ = printer.await;
    println!();

    print_answer_meta(&answer);
    Ok(())
}

fn print_answer_meta(answer: &Answer) {
    if answer.cancelled {
        println!("\n(cancelled)");
    }
    if !answer.citations.is_empty() {
        println!("\nSources:");
        for citation in &answer.citations {
            println!(
                "  [{}] {} ({}), relevance {:.2}",
                citation.marker, citation.title, citation.source, citation.score
            );
        }
    }
    tracing::info!(
        provider = %answer.provider,
        elapsed_ms = answer.elapsed.as_millis(),
        truncated = answer.truncated,
        degraded = answer.degraded,
        "answer complete"
    );
}

async fn chat_loop(engine: &Engine<AnyProvider, AnyProvider>) -> anyhow::Result<()> {
    println!(
        "docent v{}, ask about the documentation (/quit to leave)",
        env!("CARGO_PKG_VERSION")
    );
    let session = "chat";
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "/quit" || question == "/exit" {
            break;
        }

        if let Err(e) = answer_question(engine, question, session).await {
            eprintln!("error: {e:#}");
        }
    }

    engine.end_session(session);
    Ok(())
}
