use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod app;
mod commands;
mod config;
mod session;

use app::App;
use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face recognition attendance tracker")]
struct Cli {
    /// Config file (default: <data_dir>/rollcall.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new student
    Register {
        name: String,
        student_id: String,
    },
    /// List registered students
    Students,
    /// Remove a student and their enrolled face
    Remove { name: String },
    /// Capture a registered student's face and store its encoding
    Enroll {
        name: String,
        /// Use a photo instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Mark a registered student present manually
    Mark { name: String },
    /// Run face recognition and mark attendance until Ctrl-C
    Take {
        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,
        /// Read frames from a directory of images instead of the camera
        #[arg(long)]
        frames_dir: Option<PathBuf>,
        /// Write the latest annotated frame to this image file
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// Show today's attendance
    Today,
    /// Attendance records for a date range (default: today)
    Report {
        /// First day, YYYY-MM-DD
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day, YYYY-MM-DD
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Write the filtered records as CSV into this directory
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");

    let mut app = App::open(&config)?;

    match cli.command {
        Commands::Register { name, student_id } => commands::register(&mut app, &name, &student_id)?,
        Commands::Students => commands::students(&app),
        Commands::Remove { name } => commands::remove(&mut app, &name)?,
        Commands::Enroll { name, image } => {
            commands::enroll(&mut app, &config, &name, image.as_deref())?
        }
        Commands::Mark { name } => commands::mark(&mut app, &name)?,
        Commands::Take {
            max_frames,
            frames_dir,
            preview,
        } => commands::take(app, &config, max_frames, frames_dir, preview).await?,
        Commands::Today => commands::today(&app),
        Commands::Report { from, to, export } => {
            commands::report(&app, from, to, export.as_deref())?
        }
    }

    Ok(())
}
