mod ai;
mod alerts;
#[cfg(feature = "ffmpeg")]
mod capture;
mod config;
mod diary;
mod geometry;
mod normalize;
mod paths;
mod pipeline;
mod preprocess;
mod ranking;
mod schema;
mod store;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{ModelRegistry, Settings};
use crate::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "framediary")]
#[command(about = "Caption video frames, pick best shots and write a short diary", long_about = None)]
struct Cli {
    /// Directory holding settings.toml and models.toml
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,
    /// Overrides data_root from settings.toml
    #[arg(short, long)]
    data_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy a video under raw_videos/ and print its id
    Import {
        input_file: PathBuf,
        #[arg(long)]
        video_id: Option<String>,
    },
    /// Sample frames from an imported video and write the manifest
    Extract { video_id: String },
    /// Re-run the dark/blur checks on the manifest frames
    Preprocess { video_id: String },
    /// Print frame statistics from the manifest
    Summary { video_id: String },
    /// Caption every manifest frame with the vision model
    Caption { video_id: String },
    /// Pick the best shots from the analysis
    Bestshots { video_id: String },
    /// Write the diary from the analysis
    Diary { video_id: String },
    /// Scan the analysis for alert keywords
    Alerts { video_id: String },
    /// Extract, caption, then bestshots, diary and alerts
    Run { video_id: String },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(&cli.config_dir)?;
    if let Some(root) = cli.data_root {
        settings.data_root = root;
    }
    init_tracing(&settings.logging.level);

    let roles = config::load_model_settings(&cli.config_dir)?;
    let models = ModelRegistry::resolve(&roles, |var| std::env::var(var).ok())?;
    let pipeline = Pipeline::new(settings, &models);

    match cli.command {
        Command::Import {
            input_file,
            video_id,
        } => {
            let video_id = pipeline.import_video(&input_file, video_id)?;
            println!("{video_id}");
        }
        Command::Extract { video_id } => {
            let frames = pipeline.extract_frames(&video_id)?;
            println!("{} frames", frames.len());
        }
        Command::Preprocess { video_id } => {
            let frames = pipeline.preprocess_manifest(&video_id)?;
            println!("{} frames", frames.len());
        }
        Command::Summary { video_id } => {
            let summary = pipeline.summarize_manifest(&video_id)?;
            println!("video_id: {video_id}");
            println!("#frames: {}", summary.frames);
            if let Some((start, end)) = summary.time_range {
                println!("time range: {start:.2}s - {end:.2}s");
                println!("too_dark: {}, blurry: {}", summary.too_dark, summary.blurry);
            }
        }
        Command::Caption { video_id } => {
            for analysis in pipeline.run_captioning(&video_id).await? {
                println!(
                    "{:>5} {:>8.2}s {:<4} {}",
                    analysis.frame_index,
                    analysis.time_sec,
                    analysis.grid_label().unwrap_or("-"),
                    analysis.caption
                );
            }
        }
        Command::Bestshots { video_id } => print_bestshots(&pipeline, &video_id)?,
        Command::Diary { video_id } => println!("{}", pipeline.generate_diary(&video_id).await?),
        Command::Alerts { video_id } => print_alerts(&pipeline, &video_id)?,
        Command::Run { video_id } => {
            pipeline.extract_frames(&video_id)?;
            pipeline.run_captioning(&video_id).await?;
            print_bestshots(&pipeline, &video_id)?;
            println!("{}", pipeline.generate_diary(&video_id).await?);
            print_alerts(&pipeline, &video_id)?;
        }
    }

    Ok(())
}

fn print_bestshots(pipeline: &Pipeline, video_id: &str) -> anyhow::Result<()> {
    for shot in pipeline.select_bestshots(video_id)? {
        println!(
            "#{} frame {} score {:.2} {} {}",
            shot.rank, shot.frame_index, shot.score, shot.frame_path, shot.caption
        );
    }
    Ok(())
}

fn print_alerts(pipeline: &Pipeline, video_id: &str) -> anyhow::Result<()> {
    for event in pipeline.detect_alerts(video_id)? {
        println!(
            "[{:?}] {:.2}s frames {:?}: {}",
            event.level, event.start_time_sec, event.related_frames, event.reason
        );
    }
    Ok(())
}
