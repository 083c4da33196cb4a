use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reportsynth::{
    config::{self, Config, LogSettings},
    logging,
    processing::{RunParameters, SynthesisService},
    shell::{self, ShellSettings},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "reportsynth",
    about = "Turn a folder of PDF reports into a cited executive summary"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the interactive shell (default).
    Serve {
        /// Port to listen on; overrides SERVER_PORT.
        #[arg(long)]
        port: Option<u16>,
        /// PDF directory; overrides DATA_DIR.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Run the pipeline once and print the executive summary.
    Run {
        /// Business question to answer.
        #[arg(long)]
        question: String,
        /// Sampling temperature (0.0-1.0); defaults to DEFAULT_TEMPERATURE.
        #[arg(long)]
        temperature: Option<f32>,
        /// Chunk size in characters (500-2000); defaults to DEFAULT_CHUNK_SIZE.
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Chunk overlap in characters (0-500); defaults to DEFAULT_CHUNK_OVERLAP.
        #[arg(long)]
        chunk_overlap: Option<usize>,
        /// PDF directory; overrides DATA_DIR.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    config::load_dotenv();
    logging::init_tracing(&LogSettings::from_env());

    let config = match config::init_config() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(error = %error, "Configuration invalid; exiting");
            eprintln!("Configuration error: {error}");
            std::process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Command::Serve {
        port: None,
        data_dir: None,
    }) {
        Command::Serve { port, data_dir } => serve(config, port, data_dir).await,
        Command::Run {
            question,
            temperature,
            chunk_size,
            chunk_overlap,
            data_dir,
        } => {
            run_once(
                config,
                question,
                temperature,
                chunk_size,
                chunk_overlap,
                data_dir,
            )
            .await
        }
    };

    if let Err(error) = result {
        tracing::error!(error = format!("{error:#}"), "Exiting with error");
        eprintln!("Error: {error:#}");
        std::process::exit(1);
    }
}

async fn serve(config: &Config, port: Option<u16>, data_dir: Option<PathBuf>) -> Result<()> {
    let service =
        SynthesisService::from_config(config).context("Failed to initialize language model client")?;
    let settings = ShellSettings {
        data_dir: data_dir.unwrap_or_else(|| config.data_dir.clone()),
        temperature: config.default_temperature,
        chunk_size: config.default_chunk_size,
        chunk_overlap: config.default_chunk_overlap,
    };
    let app = shell::create_router(Arc::new(service), settings);

    let (listener, port) = bind_listener(port.or(config.server_port))
        .await
        .context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn run_once(
    config: &Config,
    question: String,
    temperature: Option<f32>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let params = RunParameters::new(
        question,
        temperature.unwrap_or(config.default_temperature),
        chunk_size.unwrap_or(config.default_chunk_size),
        chunk_overlap.unwrap_or(config.default_chunk_overlap),
    )
    .context("Invalid run parameters")?;
    let directory = data_dir.unwrap_or_else(|| config.data_dir.clone());
    let service =
        SynthesisService::from_config(config).context("Failed to initialize language model client")?;

    let outcome = tokio::select! {
        outcome = service.run(&directory, &params) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("Run cancelled");
        }
    };

    println!(
        "Loaded {} chunks from {} documents.",
        outcome.chunk_count, outcome.document_count
    );
    for skipped in &outcome.skipped {
        println!("Skipped {}: {}", skipped.source_name, skipped.reason);
    }
    match outcome.summary {
        Some(summary) => println!("\n{}", summary.text),
        None => println!("\nNo documents to summarize in {}.", directory.display()),
    }
    Ok(())
}

async fn bind_listener(requested: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = requested {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 8501..=8599;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 8501-8599",
    ))
}
