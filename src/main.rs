use anyhow::Result;
use clap::{Parser, Subcommand};
use forensic_capture::commands::{
    ImageQuery, OutputFormat, capture_url, delete_snapshot, export_thumbnails, run_schedule,
    search_image_command, search_text_command, show_history, show_status,
};
use forensic_capture::config::{BASE_DIR_ENV, Config, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "forensic-capture")]
#[command(about = "Capture web pages and their images as versioned forensic snapshots")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the snapshot database
    #[arg(long, global = true, env = BASE_DIR_ENV)]
    data_dir: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a page, the images on it and the pages it links to
    Capture {
        /// Absolute http(s) URL of the page
        url: String,
        /// How many levels of links to follow (overrides the configured max depth)
        #[arg(long)]
        depth: Option<u32>,
    },
    /// Find snapshots whose extracted text contains a keyword
    SearchText {
        keyword: String,
    },
    /// Find stored images that look like a given image
    SearchImage {
        /// Image file to compare against
        #[arg(required_unless_present = "hash", conflicts_with = "hash")]
        path: Option<PathBuf>,
        /// Compare against a 16-digit hex perceptual hash instead of a file
        #[arg(long)]
        hash: Option<String>,
        /// Largest Hamming distance to report (0-64)
        #[arg(long)]
        threshold: Option<u32>,
    },
    /// List every stored version of a URL
    History {
        url: String,
    },
    /// Delete a snapshot and its images
    Delete {
        snapshot_id: i64,
    },
    /// Show store statistics
    Status,
    /// Write a snapshot's thumbnails to a directory
    ExportThumbnails {
        snapshot_id: i64,
        out_dir: PathBuf,
    },
    /// Edit or show the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Capture the configured seeds periodically until interrupted
    Schedule {
        /// Minutes between runs (overrides the configured interval)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => Config::default_dir()?,
    };
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Commands::Capture { url, depth } => {
            capture_url(&data_dir, &url, depth, format).await?;
        }
        Commands::SearchText { keyword } => {
            search_text_command(&data_dir, &keyword, format).await?;
        }
        Commands::SearchImage {
            path,
            hash,
            threshold,
        } => {
            let query = match (path, hash) {
                (_, Some(hash)) => ImageQuery::Hash(hash),
                (Some(path), None) => ImageQuery::File(path),
                (None, None) => anyhow::bail!("Either an image path or --hash is required"),
            };
            search_image_command(&data_dir, query, threshold, format).await?;
        }
        Commands::History { url } => {
            show_history(&data_dir, &url, format).await?;
        }
        Commands::Delete { snapshot_id } => {
            delete_snapshot(&data_dir, snapshot_id).await?;
        }
        Commands::Status => {
            show_status(&data_dir, format).await?;
        }
        Commands::ExportThumbnails {
            snapshot_id,
            out_dir,
        } => {
            export_thumbnails(&data_dir, snapshot_id, &out_dir).await?;
        }
        Commands::Config { show } => {
            if show {
                show_config(&data_dir)?;
            } else {
                run_interactive_config(&data_dir)?;
            }
        }
        Commands::Schedule { interval } => {
            run_schedule(&data_dir, interval).await?;
        }
    }

    Ok(())
}
