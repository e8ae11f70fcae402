//! # seolens CLI
//!
//! Command-line front end for the SEO analysis pipeline.
//!
//! ## Subcommands
//!
//! - `analyze`: scrape a URL and run every analysis stage plus the final report
//! - `files`: list what the output directory contains
//! - `report`: print a final report, or only its priority action plan
//!
//! The reasoning service API key is read from `GROQ_API_KEY`, which may also
//! live in a `.env` file in the working directory.

mod logging;

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, anyhow};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use seolens::analysis::StageOutcome;
use seolens::config::{API_KEY_ENV, AnalyzerConfig};
use seolens::document::OutputNames;
use seolens::fetcher::{HttpFetcher, normalize_target_url};
use seolens::llm::{ChatClient, RateLimitedClient};
use seolens::pipeline::{Orchestrator, PipelineEvent, PipelineOutcome};
use seolens::report::priority_section;
use seolens::storage::FileStorage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::instrument;

#[derive(Parser)]
#[command(author, version, about = "Scrape a page and run a multi-stage LLM SEO analysis", long_about = None)]
struct Cli {
    /// Directory for documents, reports, images and logs
    #[arg(short, long, global = true, default_value = "seo_output")]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a website
    Analyze(AnalyzeArgs),

    /// List the files in the output directory
    Files,

    /// Print a final report
    Report(ReportArgs),
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// URL to analyze; `https://` is assumed when no scheme is given
    #[arg(required = true)]
    url: String,

    /// Retries allowed after a rate-limited request
    #[arg(long)]
    max_retries: Option<u32>,

    /// Base backoff delay in seconds
    #[arg(long)]
    retry_delay: Option<u64>,

    /// Seconds to wait before every reasoning request
    #[arg(long)]
    pacing: Option<u64>,

    /// Model for text and vision requests
    #[arg(short, long)]
    model: Option<String>,

    /// Model for keyword research
    #[arg(long)]
    keyword_model: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long)]
    api_base: Option<String>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Client-side request quota per minute
    #[arg(long)]
    rpm: Option<NonZeroU32>,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// URL that was analyzed, or a path to a report file; defaults to the newest report
    target: Option<String>,

    /// Only print the priority action plan
    #[arg(short, long)]
    priority: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Analyze(args)) => {
            logging::setup_logging(&cli.output_dir)?;
            analyze_command(args, cli.output_dir).await?;
        }
        Some(Commands::Files) => {
            logging::setup_console_logging();
            files_command(&cli.output_dir).await?;
        }
        Some(Commands::Report(args)) => {
            logging::setup_console_logging();
            report_command(args, &cli.output_dir).await?;
        }
        None => {
            // If no command is provided, show help
            let _ = Cli::parse_from(["seolens", "--help"]);
        }
    }

    Ok(())
}

fn build_config(args: &AnalyzeArgs, output_dir: PathBuf) -> AnalyzerConfig {
    let mut builder = AnalyzerConfig::builder().output_dir(output_dir);
    if let Some(max_retries) = args.max_retries {
        builder = builder.max_retries(max_retries);
    }
    if let Some(secs) = args.retry_delay {
        builder = builder.retry_base_delay(Duration::from_secs(secs));
    }
    if let Some(secs) = args.pacing {
        builder = builder.pacing_delay(Duration::from_secs(secs));
    }
    if let Some(model) = &args.model {
        builder = builder.model(model);
    }
    if let Some(model) = &args.keyword_model {
        builder = builder.keyword_model(model);
    }
    if let Some(url) = &args.api_base {
        builder = builder.api_base_url(url);
    }
    if let Some(secs) = args.timeout {
        builder = builder.request_timeout(Duration::from_secs(secs));
    }
    if let Some(rpm) = args.rpm {
        builder = builder.requests_per_minute(rpm);
    }
    builder.build()
}

#[instrument(skip(args), fields(url = %args.url))]
async fn analyze_command(args: AnalyzeArgs, output_dir: PathBuf) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let api_key = std::env::var(API_KEY_ENV).map_err(|_| {
        anyhow!("{API_KEY_ENV} not found; set it in a .env file or the environment")
    })?;

    let url = normalize_target_url(&args.url)?;
    let config = build_config(&args, output_dir);

    let fetcher = HttpFetcher::new(config.fetcher_config())?;
    let chat = ChatClient::with_api_key_and_options(api_key, config.client_options())?;
    let client = RateLimitedClient::per_minute(chat, config.requests_per_minute);
    let storage = FileStorage::new(config.output_dir());

    println!("Analyzing {url}");
    println!(
        "Pacing {}s between requests; this may take several minutes",
        config.pacing_delay.as_secs()
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let progress = spawn_progress(rx);
    let orchestrator = Orchestrator::new(fetcher, client, storage, &config).with_events(tx);

    let outcome = orchestrator.run(&url).await;
    drop(orchestrator);
    progress.await?;

    if let Some(run) = outcome.run() {
        println!();
        for (stage, stage_outcome) in &run.stages {
            match stage_outcome {
                StageOutcome::Success { .. } => println!("  {:<10} ok", stage.label()),
                StageOutcome::Failure { message, .. } => {
                    println!("  {:<10} failed: {}", stage.label(), message)
                }
            }
        }
        if let Some(path) = &run.analysis_path {
            println!("Analysis saved to {}", path.display());
        }
        if let Some(path) = &run.report_path {
            println!("Report saved to {}", path.display());
        }
    }

    match outcome {
        PipelineOutcome::Succeeded(_) => {
            println!("Analysis completed. Results are in {}", config.output_dir().display());
            Ok(())
        }
        PipelineOutcome::Failed { error, .. } => Err(error.into()),
    }
}

/// Drive a spinner from pipeline events until the sender is dropped
fn spawn_progress(mut rx: mpsc::UnboundedReceiver<PipelineEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));

        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::FetchStarted { url } => {
                    spinner.set_message(format!("Scraping {url}"));
                }
                PipelineEvent::FetchCompleted { paragraphs, images } => {
                    spinner.println(format!("Scraped {paragraphs} paragraphs, {images} images"));
                }
                PipelineEvent::StageStarted { stage } => {
                    spinner.set_message(format!("Running {stage} analysis"));
                }
                PipelineEvent::StageFinished { stage, outcome } => match outcome {
                    StageOutcome::Success { .. } => spinner.println(format!("{stage} analysis done")),
                    StageOutcome::Failure { message, .. } => {
                        spinner.println(format!("{stage} analysis failed: {message}"))
                    }
                },
                PipelineEvent::Persisted { .. } | PipelineEvent::ReportWritten { .. } => {}
            }
        }

        spinner.finish_and_clear();
    })
}

async fn files_command(output_dir: &Path) -> anyhow::Result<()> {
    let files = FileStorage::new(output_dir).list_outputs().await?;

    println!("Output directory: {}", output_dir.display());
    if files.is_empty() {
        println!("No files found");
        return Ok(());
    }
    for file in files {
        if let Some(name) = file.file_name() {
            println!("  - {}", name.to_string_lossy());
        }
    }
    Ok(())
}

async fn report_command(args: ReportArgs, output_dir: &Path) -> anyhow::Result<()> {
    let path = match &args.target {
        Some(target) if Path::new(target).is_file() => PathBuf::from(target),
        Some(target) => {
            let url = normalize_target_url(target)?;
            output_dir.join(OutputNames::for_url(&url)?.report_file())
        }
        None => latest_report(output_dir)
            .await?
            .ok_or_else(|| anyhow!("No report available. Run an analysis first."))?,
    };

    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Could not read report {}", path.display()))?;

    if args.priority {
        match priority_section(&content) {
            Some(section) => {
                println!("--- PRIORITY ACTION ITEMS ---\n");
                println!("{section}");
            }
            None => println!("No Priority Action Plan section found."),
        }
    } else {
        println!("{content}");
    }
    Ok(())
}

/// Most recently modified `*_final_report.txt` in the output directory
async fn latest_report(output_dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let files = FileStorage::new(output_dir).list_outputs().await?;

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for file in files {
        let is_report = file
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with("_final_report.txt"));
        if !is_report {
            continue;
        }
        let modified = tokio::fs::metadata(&file).await?.modified()?;
        if newest.as_ref().is_none_or(|(time, _)| modified > *time) {
            newest = Some((modified, file));
        }
    }
    Ok(newest.map(|(_, path)| path))
}
