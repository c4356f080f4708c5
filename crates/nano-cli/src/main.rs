use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use nano_contracts::events::EventWriter;
use nano_engine::output::DEFAULT_OUTPUT;
use nano_engine::{
    provider_for, ConfigOverrides, CritiqueLoop, CritiqueRequest, RunObserver, RunRequest,
    RuntimeConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "nano-agent",
    version,
    disable_version_flag = true,
    about = "Generate images with Gemini and improve them through critique loops"
)]
struct Cli {
    /// TOML config file (default: ~/.nano-agent.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Model used for generation and critique.
    #[arg(long, global = true)]
    model: Option<String>,
    /// Backend: gemini, openrouter or dryrun.
    #[arg(long, global = true)]
    provider: Option<String>,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    /// Print version and exit.
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: Option<bool>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate an image, then run critique and improvement rounds.
    Run(RunArgs),
    /// Generate a single image without critique.
    Generate(GenerateArgs),
    /// Critique an existing image against its prompt.
    Critique(CritiqueArgs),
}

#[derive(Debug, Args)]
struct InputArgs {
    /// Text prompt guiding the generation.
    #[arg(short = 'p', long)]
    prompt: String,
    /// Input image paths (repeatable or comma separated).
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    images: Vec<PathBuf>,
    /// Text files appended to the prompt.
    #[arg(short = 'f', long = "fragment")]
    fragments: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    inputs: InputArgs,
    /// Input images given positionally.
    #[arg(value_name = "IMAGES")]
    positional_images: Vec<PathBuf>,
    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
    /// Number of critique and improvement rounds (legacy shorthand: -cl N).
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    critique_loops: i64,
    /// Ask for a white background and make it transparent afterwards.
    #[arg(short = 't', long)]
    transparent: bool,
    /// Append run events as JSON lines to this file.
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    inputs: InputArgs,
    #[arg(value_name = "IMAGES")]
    positional_images: Vec<PathBuf>,
    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
    #[arg(short = 't', long)]
    transparent: bool,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CritiqueArgs {
    /// Image to critique.
    #[arg(long)]
    image: PathBuf,
    /// Original prompt plus optional fragments and reference images.
    #[command(flatten)]
    inputs: InputArgs,
    /// Previous critique (file path or text) to escalate unresolved items.
    #[arg(long)]
    prev_critique: Option<String>,
}

/// Prints progress the way users read it on stdout.
struct StdoutReporter;

impl RunObserver for StdoutReporter {
    fn image_saved(&self, path: &Path, iteration: u32) {
        if iteration == 0 {
            println!("Generated image saved at: {}", path.display());
        } else {
            println!("Improved image saved at: {}", path.display());
        }
    }

    fn transparency_applied(&self, path: &Path) {
        println!(
            "Applied transparent background post-process: {}",
            path.display()
        );
    }

    fn round_started(&self, iteration: u32, total: u32) {
        println!("\n=== Critique loop {iteration}/{total} ===");
    }

    fn critique_received(&self, _iteration: u32, critique: &str) {
        println!("Critique feedback:");
        println!("{critique}");
    }

    fn snapshot_saved(&self, path: &Path, _iteration: u32) {
        println!("Iteration copy saved at: {}", path.display());
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("nano-agent error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse_from(normalize_args(env::args_os()));
    init_tracing(cli.log_format);
    let config = RuntimeConfig::load(cli.config.as_deref(), &overrides(&cli))?;
    execute(cli, &config)
}

fn overrides(cli: &Cli) -> ConfigOverrides {
    ConfigOverrides {
        model: cli.model.clone(),
        provider: cli.provider.clone(),
    }
}

fn execute(cli: Cli, config: &RuntimeConfig) -> Result<i32> {
    config.require_credentials()?;
    let provider = provider_for(config)?;
    tracing::info!(
        provider = provider.name(),
        model = provider.model(),
        "nano-agent starting"
    );
    let reporter = StdoutReporter;
    let runner = CritiqueLoop::new(config, provider.as_ref()).with_observer(&reporter);

    match cli.command {
        Command::Run(args) => {
            let runner = match args.events.as_deref() {
                Some(path) => runner.with_events(event_writer(path)),
                None => runner,
            };
            let request = RunRequest {
                prompt: args.inputs.prompt,
                images: merge_images(args.inputs.images, args.positional_images),
                fragments: args.inputs.fragments,
                output: Some(args.output),
                critique_loops: args.critique_loops,
                transparent: args.transparent,
            };
            runner.run(&request)?;
        }
        Command::Generate(args) => {
            let runner = match args.events.as_deref() {
                Some(path) => runner.with_events(event_writer(path)),
                None => runner,
            };
            let request = RunRequest {
                prompt: args.inputs.prompt,
                images: merge_images(args.inputs.images, args.positional_images),
                fragments: args.inputs.fragments,
                output: Some(args.output),
                critique_loops: 0,
                transparent: args.transparent,
            };
            runner.generate_once(&request)?;
        }
        Command::Critique(args) => {
            let previous = args
                .prev_critique
                .as_deref()
                .map(read_previous_critique)
                .transpose()?;
            let request = CritiqueRequest {
                image: args.image,
                prompt: args.inputs.prompt,
                fragments: args.inputs.fragments,
                references: args.inputs.images,
                previous,
            };
            let critique = runner.critique_image(&request)?;
            println!("{critique}");
        }
    }
    Ok(0)
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn event_writer(path: &Path) -> EventWriter {
    let run_id = uuid::Uuid::new_v4().to_string();
    tracing::debug!(run_id = %run_id, path = %path.display(), "recording run events");
    EventWriter::new(path, run_id)
}

fn merge_images(mut flagged: Vec<PathBuf>, positional: Vec<PathBuf>) -> Vec<PathBuf> {
    flagged.extend(positional);
    flagged
}

/// A path to an existing file is read; anything else is the critique text.
fn read_previous_critique(raw: &str) -> Result<String> {
    let path = Path::new(raw);
    if path.is_file() {
        return fs::read_to_string(path)
            .with_context(|| format!("failed reading previous critique {}", path.display()));
    }
    Ok(raw.to_string())
}

/// Rewrites the legacy `-cl N` and `-cl=N` shorthand to `--critique-loops`.
fn normalize_args<I>(argv: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    let mut args = argv.into_iter();
    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("-cl") => {
                out.push(OsString::from("--critique-loops"));
                if let Some(value) = args.next() {
                    out.push(value);
                }
            }
            Some(text) if text.starts_with("-cl=") => {
                out.push(OsString::from(format!("--critique-loops{}", &text[3..])));
            }
            _ => out.push(arg),
        }
    }
    out
}
