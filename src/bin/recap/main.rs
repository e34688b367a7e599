use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

use recap::config::Config;
use recap::coordinator::{Coordinator, TierRequest};
use recap::engine::{EngineTier, RequestContext};
use recap::error::RecapError;
use recap::generate::{CancelToken, cancel_pair};
use recap::level::SummaryLevel;
use recap::models::{self, WeightSize};
use recap::parse::StructuredSummary;
use recap::pipeline::Pipeline;
use recap::prompt;
use recap::secrets::EnvSecretStore;
use recap::store::{JsonStore, SourceUnit, SummaryStore};

#[derive(Parser)]
#[command(
    name = "recap",
    about = "Hierarchical summaries of your transcripts",
    long_about = "Recap turns transcribed speech into summaries at every scale: chunk, \
        session, day, week, month, year and a multi-year rollup. Summaries come from \
        one of four engines (a hosted API, an on-device assistant, a local quantized \
        model, or a model-free extractive summarizer) chosen by preference with \
        automatic fallback. Local chunk summaries are cached by content hash so edits \
        only re-run what changed."
)]
struct Cli {
    /// Path to config file
    ///
    /// Defaults to ~/.config/recap/config.yaml. A missing default file means
    /// built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    ///
    /// Sets the log level to debug for the recap crate, showing tier
    /// selection, cache hits and generation details.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize text from a file or stdin
    ///
    /// Prints the structured summary as JSON, or as plain text with --plain.
    Summarize {
        /// Summary level to produce
        #[arg(long, default_value = "session")]
        level: SummaryLevel,

        /// Use only this engine (basic, assistant, local, remote)
        #[arg(long)]
        engine: Option<EngineTier>,

        /// Input file (reads stdin if omitted)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Print plain text instead of JSON
        #[arg(long)]
        plain: bool,
    },

    /// Summarize a stored session from its transcript chunks
    Session {
        /// Session id as recorded in transcripts.json
        id: String,

        /// Use only this engine (basic, assistant, local, remote)
        #[arg(long)]
        engine: Option<EngineTier>,

        #[arg(long)]
        plain: bool,
    },

    /// Roll stored summaries up to a higher level
    ///
    /// Summarizes the level below for the period containing --date.
    /// With --through, every level from day up to LEVEL is rolled up in turn.
    Rollup {
        /// Target level (day, week, month, year, yearRollup)
        level: SummaryLevel,

        /// Any date inside the period (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Roll up every level from day through LEVEL
        #[arg(long)]
        through: bool,

        /// Use only this engine (basic, assistant, local, remote)
        #[arg(long)]
        engine: Option<EngineTier>,

        #[arg(long)]
        plain: bool,
    },

    /// Show engine readiness and the fallback chain
    ///
    /// Use --prefer to save a preferred engine to the config file, or
    /// --prefer none to clear it.
    Engines {
        /// Preferred engine to save (basic, assistant, local, remote, none)
        #[arg(long)]
        prefer: Option<String>,
    },

    /// Print the output schema for a level
    Schema {
        level: SummaryLevel,

        /// Also print the full prompt built for this text
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Download the local model weights
    ///
    /// Fetches local.model_url to local.model_path and checks the size
    /// against local.expected_size_bytes.
    FetchModel,

    /// Generate shell completions
    ///
    /// Prints a completion script for the given shell to stdout.
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, elvish, powershell)
        shell: Shell,
    },
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(Config::default_path)
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("recap=debug,info")
    } else {
        EnvFilter::new("recap=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), RecapError> {
    let config = match &cli.command {
        Command::Completions { shell } => {
            generate(*shell, &mut Cli::command(), "recap", &mut std::io::stdout());
            return Ok(());
        }
        _ => Config::load_or_default(cli.config.as_deref())?,
    };

    match &cli.command {
        Command::Summarize {
            level,
            engine,
            file,
            plain,
        } => {
            let text = read_input(file.as_deref())?;
            let coordinator = coordinator(&config)?;
            let unit = SourceUnit::new("input", None, &text);
            let rt = tokio::runtime::Runtime::new()?;
            let summary = rt.block_on(async {
                let ctx = RequestContext::new(cancel_on_ctrl_c());
                coordinator
                    .summarize(*level, &[unit], &ctx, target(*engine))
                    .await
            })?;
            print_summary(&summary, *plain)
        }
        Command::Session { id, engine, plain } => {
            let pipeline = pipeline(&config)?;
            let rt = tokio::runtime::Runtime::new()?;
            let record = rt.block_on(async {
                let ctx = RequestContext::new(cancel_on_ctrl_c());
                pipeline.summarize_session(id, &ctx, target(*engine)).await
            })?;
            print_summary(&record.summary, *plain)
        }
        Command::Rollup {
            level,
            date,
            through,
            engine,
            plain,
        } => run_rollup(&config, *level, *date, *through, *engine, *plain),
        Command::Engines { prefer } => run_engines(&cli, &config, prefer.as_deref()),
        Command::Schema { level, prompt } => {
            run_schema(*level, prompt.as_deref());
            Ok(())
        }
        Command::FetchModel => run_fetch_model(&config),
        Command::Completions { .. } => Ok(()),
    }
}

fn target(engine: Option<EngineTier>) -> TierRequest {
    engine.map_or(TierRequest::AnyAvailable, TierRequest::Explicit)
}

fn coordinator(config: &Config) -> Result<Coordinator, RecapError> {
    Coordinator::from_config(config, Arc::new(EnvSecretStore), None)
}

fn pipeline(config: &Config) -> Result<Pipeline, RecapError> {
    let dir = Config::expand_path(&config.store.directory);
    let store: Arc<dyn SummaryStore> = Arc::new(JsonStore::open(&dir)?);
    Ok(Pipeline::new(Arc::new(coordinator(config)?), store))
}

/// A token cancelled by the first Ctrl+C. Must be called inside a runtime.
fn cancel_on_ctrl_c() -> CancelToken {
    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("cancelling");
            handle.cancel();
        }
    });
    token
}

fn read_input(file: Option<&Path>) -> Result<String, RecapError> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| RecapError::Other(format!("failed to read {}: {e}", path.display())))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| RecapError::Other(format!("failed to read stdin: {e}")))?;
            buf
        }
    };

    if text.trim().is_empty() {
        return Err(RecapError::Other("input is empty".to_string()));
    }
    Ok(text)
}

fn print_summary(summary: &StructuredSummary, plain: bool) -> Result<(), RecapError> {
    if plain {
        print!("{}", summary.render_plain());
        return Ok(());
    }
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| RecapError::Other(format!("failed to serialize summary: {e}")))?;
    println!("{json}");
    Ok(())
}

fn run_rollup(
    config: &Config,
    level: SummaryLevel,
    date: Option<NaiveDate>,
    through: bool,
    engine: Option<EngineTier>,
    plain: bool,
) -> Result<(), RecapError> {
    let at = match date {
        Some(d) => d
            .and_hms_opt(12, 0, 0)
            .map(|dt| dt.and_utc())
            .ok_or_else(|| RecapError::Other(format!("invalid date {d}")))?,
        None => Utc::now(),
    };

    let pipeline = pipeline(config)?;
    let rt = tokio::runtime::Runtime::new()?;
    let records = rt.block_on(async {
        let ctx = RequestContext::new(cancel_on_ctrl_c());
        if through {
            pipeline
                .rollup_through(level, at, &ctx, target(engine))
                .await
        } else {
            pipeline
                .rollup(level, at, &ctx, target(engine))
                .await
                .map(|r| r.into_iter().collect::<Vec<_>>())
        }
    })?;

    if records.is_empty() {
        println!("Nothing to roll up for {level} containing {}.", at.format("%Y-%m-%d"));
        return Ok(());
    }
    for record in &records {
        print_summary(&record.summary, plain)?;
    }
    Ok(())
}

fn run_engines(cli: &Cli, config: &Config, prefer: Option<&str>) -> Result<(), RecapError> {
    if let Some(prefer) = prefer {
        let preferred = match prefer {
            "none" => None,
            other => Some(other.parse::<EngineTier>()?),
        };
        let path = config_path(cli);
        Config::set_preferred_engine(&path, preferred)?;
        println!(
            "Preferred engine set to: {}",
            preferred.map_or("none", EngineTier::as_str)
        );
        return Ok(());
    }

    let coordinator = coordinator(config)?;
    let rt = tokio::runtime::Runtime::new()?;
    let (status, active) = rt.block_on(async {
        (coordinator.status().await, coordinator.active_engine().await)
    });

    for (tier, readiness) in &status {
        let privacy = if tier.is_privacy_preserving() {
            "on-device"
        } else {
            "network"
        };
        match readiness {
            Ok(()) => println!("  {:<9} ready        ({privacy})", tier.as_str()),
            Err(e) => println!("  {:<9} unavailable  ({privacy}): {e}", tier.as_str()),
        }
    }

    let chain: Vec<&str> = coordinator.chain().iter().map(|t| t.as_str()).collect();
    println!();
    println!(
        "Preference: {}",
        coordinator.preference().map_or("none", EngineTier::as_str)
    );
    println!("Fallback chain: {}", chain.join(" -> "));
    println!("Active engine: {active}");
    Ok(())
}

fn run_schema(level: SummaryLevel, text: Option<&str>) {
    let schema = prompt::schema(level);
    println!("{level} ({}):", level.describe());
    for field in schema.fields {
        println!("  {:<16} {}", field.name, field.description);
    }

    if let Some(text) = text {
        let messages = prompt::build_messages(level, text, &[]);
        println!();
        println!("--- system ---");
        println!("{}", messages.system);
        println!("--- user ---");
        println!("{}", messages.user);
    }
}

fn run_fetch_model(config: &Config) -> Result<(), RecapError> {
    let url = config.local.model_url.as_deref().ok_or_else(|| {
        RecapError::Config("local.model_url is not set; nothing to download".to_string())
    })?;
    let path = Config::expand_path(&config.local.model_path);
    let expected = WeightSize::new(
        config.local.expected_size_bytes,
        config.local.size_tolerance_bytes,
    );

    models::ensure_model(&path, url, expected)?;
    println!("Model weights ready at {}", path.display());
    Ok(())
}
