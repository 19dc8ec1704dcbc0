use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use classifier_core::acquisition::{self, ImageSource};
use classifier_core::config::{self, ImageConfig};
use classifier_core::present::Presenter;
use classifier_core::Session;
use cli::present::{JsonPresenter, TextPresenter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Classify {
            path,
            capture,
            json,
            verbose,
        } => run_classify(config_path, path, capture, json, verbose).await,
        Commands::Encode { path, output } => run_encode(config_path, path, output).await,
        Commands::Config => run_config(config_path),
    }
}

#[derive(Parser)]
#[command(name = "coin-classifier")]
#[command(
    about = "Classify a banknote or coin photo with a hosted scoring endpoint",
    long_about = None
)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an image and print the predicted class
    Classify {
        /// JPEG or PNG image
        path: PathBuf,
        /// Treat the image as a camera capture (removed afterwards if configured)
        #[arg(long, default_value_t = false)]
        capture: bool,
        /// Output JSON
        #[arg(long)]
        json: bool,
        /// Also list every class probability (non-JSON)
        #[arg(short, long, default_value_t = false)]
        verbose: bool,
    },
    /// Print the base64 payload that would be sent for an image
    Encode {
        /// JPEG or PNG image
        path: PathBuf,
        /// Write the payload to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the effective configuration (API key redacted)
    Config,
}

async fn run_classify(
    config_path: Option<&str>,
    path: PathBuf,
    capture: bool,
    json: bool,
    verbose: bool,
) -> Result<ExitCode> {
    let cfg = config::load(config_path).context("load configuration")?;
    let session = Session::from_config(&cfg).context("build scoring client")?;
    let source = if capture {
        ImageSource::Capture(path)
    } else {
        ImageSource::Gallery(path)
    };
    let presenter: Arc<dyn Presenter> = if json {
        Arc::new(JsonPresenter::stdout())
    } else {
        Arc::new(TextPresenter::stdio(verbose))
    };

    info!(source = %source.describe(), "submitting image");
    let join = session.spawn(source, presenter)?.join();
    tokio::pin!(join);
    tokio::select! {
        outcome = &mut join => Ok(if outcome.is_ok() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; cancelling submission");
            drop(session);
            Ok(ExitCode::from(130))
        }
    }
}

async fn run_encode(
    config_path: Option<&str>,
    path: PathBuf,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    let image_cfg = match config::load(config_path) {
        Ok(cfg) => cfg.image,
        Err(e) => {
            warn!(error = %e, "no usable configuration; using default image settings");
            ImageConfig::default()
        }
    };
    let encoded = acquisition::acquire(
        ImageSource::Gallery(path.clone()),
        acquisition::normalizer_for(&image_cfg),
    )
    .await
    .with_context(|| format!("encode {}", path.display()))?;

    match output {
        Some(out) => {
            std::fs::write(&out, encoded.as_str())
                .with_context(|| format!("write {}", out.display()))?;
            eprintln!("wrote {} base64 characters to {}", encoded.len(), out.display());
        }
        None => println!("{}", encoded.as_str()),
    }
    Ok(ExitCode::SUCCESS)
}

fn run_config(config_path: Option<&str>) -> Result<ExitCode> {
    let cfg = config::load(config_path).context("load configuration")?;
    println!("{}", serde_json::to_string_pretty(&cfg.redacted())?);
    Ok(ExitCode::SUCCESS)
}
