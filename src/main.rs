//! Acceptability Eval CLI
//!
//! Minimal-pair surprisal and prompted-judgment evaluation of language models

use acceptability_eval::{
    extract_stimuli, load_model, results, run, write_stimuli, EvalMode, ModelKind, ReportFormat,
    RunConfig, Settings, StatConfig, SummaryReport,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "acceptability-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a model on a stimuli table
    Evaluate {
        /// Input CSV (minimal pairs, or stimuli for prompting)
        #[arg(short, long, default_value = "stimuli/stimuli.csv")]
        input: PathBuf,

        /// Root directory for output tables
        #[arg(short, long, default_value = "data/model_outputs")]
        output: PathBuf,

        /// Model identifier (local models must be Llama-family Hub checkpoints)
        #[arg(long, default_value = "text-davinci-002")]
        model: String,

        /// Backend: local or remote
        #[arg(long, default_value = "remote")]
        model_type: ModelKind,

        /// Evaluation: minimal_pairs or prompting
        #[arg(long, default_value = "prompting")]
        eval_mode: EvalMode,

        /// YAML settings file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Build a stimuli table from a raw experiment CSV
    Extract {
        /// Raw CSV with phenomenon, test_item, condition and sentence columns
        #[arg(short, long)]
        input: PathBuf,

        /// Output stimuli CSV
        #[arg(short, long, default_value = "stimuli/stimuli.csv")]
        output: PathBuf,
    },

    /// Summarize a written output table
    Summarize {
        /// Sentence-level surprisal table or prompting table
        #[arg(short, long)]
        input: PathBuf,

        /// Which kind of table `input` is
        #[arg(long, default_value = "minimal_pairs")]
        eval_mode: EvalMode,

        /// markdown, text or json
        #[arg(long, default_value = "markdown")]
        format: ReportFormat,

        /// Write the report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Bootstrap resamples
        #[arg(long, default_value = "10000")]
        bootstrap: usize,

        /// Bootstrap seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Evaluate {
            input,
            output,
            model,
            model_type,
            eval_mode,
            config,
        } => {
            let settings = match &config {
                Some(path) => Settings::load(path)
                    .with_context(|| format!("Failed to load settings from {}", path.display()))?,
                None => Settings::default(),
            };

            tracing::info!(
                input = %input.display(),
                output = %output.display(),
                model = %model,
                model_type = model_type.as_str(),
                eval_mode = eval_mode.as_str(),
                unit = settings.surprisal_unit.as_str(),
                "Starting evaluation"
            );

            let backend = load_model(model_type, &model, &settings)
                .with_context(|| format!("Failed to initialize model {model}"))?;

            let run_config = RunConfig {
                input,
                output_root: output,
                model_id: model,
                mode: eval_mode,
                settings,
            };
            let summary = run(&run_config, backend.as_ref()).context("Evaluation failed")?;

            println!("Evaluated {} rows", summary.rows);
            for path in &summary.written {
                println!("  wrote {}", path.display());
            }
        }
        Commands::Extract { input, output } => {
            tracing::info!(input = %input.display(), output = %output.display(), "Extracting stimuli");

            let file = File::open(&input)
                .with_context(|| format!("Failed to open {}", input.display()))?;
            let stimuli = extract_stimuli(BufReader::new(file))
                .with_context(|| format!("Failed to extract stimuli from {}", input.display()))?;

            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let out = File::create(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            write_stimuli(BufWriter::new(out), &stimuli)
                .with_context(|| format!("Failed to write {}", output.display()))?;

            println!("Extracted {} stimuli to {}", stimuli.len(), output.display());
        }
        Commands::Summarize {
            input,
            eval_mode,
            format,
            output,
            bootstrap,
            seed,
        } => {
            let stat_config = StatConfig {
                bootstrap_n: bootstrap,
                seed,
                ..StatConfig::default()
            };
            let source = input.display().to_string();

            let report = match eval_mode {
                EvalMode::MinimalPairs => {
                    let rows = results::read_sentence_surprisals(&input)
                        .with_context(|| format!("Failed to read {source}"))?;
                    SummaryReport::from_sentence_rows(source, &rows, stat_config)
                }
                EvalMode::Prompting => {
                    let records = results::read_prompt_records(&input)
                        .with_context(|| format!("Failed to read {source}"))?;
                    SummaryReport::from_prompt_records(source, &records, stat_config)
                }
            };

            let rendered = report.render(format).context("Failed to render report")?;
            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    tracing::info!(path = %path.display(), "Wrote summary");
                }
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(rendered.as_bytes())?;
                }
            }
        }
    }

    Ok(())
}
