use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use edge_boxes::client::install_dir;
use edge_boxes::overlay::{render_overlay, DEFAULT_MIN_SCORE};
use edge_boxes::{MatlabConfig, Proposal, ProposalBridge, DEFAULT_ROUTINE};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "edge_boxes", about = "Compute Edge Boxes window proposals via MATLAB")]
struct Args {
    /// Images to compute proposals for.
    #[arg(required = true)]
    images: Vec<PathBuf>,
    /// MATLAB function to call.
    #[arg(long, default_value = DEFAULT_ROUTINE)]
    routine: String,
    /// MATLAB executable.
    #[arg(long, default_value = "matlab")]
    matlab: PathBuf,
    /// Edge Boxes toolbox directory.
    #[arg(long, default_value = "toolbox")]
    toolbox: PathBuf,
    /// Working directory for MATLAB (defaults to this executable's directory).
    #[arg(long)]
    work_dir: Option<PathBuf>,
    /// Skip the `savepath` bootstrap run.
    #[arg(long, default_value_t = false)]
    no_persist_path: bool,
    /// Write proposals as JSON here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Write one PNG overlay per image into this directory.
    #[arg(long)]
    overlay_dir: Option<PathBuf>,
    /// Minimum score for a proposal to be drawn on overlays.
    #[arg(long, default_value_t = DEFAULT_MIN_SCORE)]
    min_score: f64,
}

#[derive(Serialize)]
struct ImageProposals<'a> {
    image: &'a PathBuf,
    proposals: &'a [Proposal],
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let cfg = MatlabConfig {
        program: args.matlab.clone(),
        toolbox_dir: args.toolbox.clone(),
        work_dir: args.work_dir.clone().unwrap_or_else(install_dir),
        persist_path: !args.no_persist_path,
        ..MatlabConfig::default()
    };
    let bridge = ProposalBridge::matlab(cfg).with_routine(args.routine.clone());
    let batch = bridge
        .get_windows(&args.images)
        .context("computing window proposals")?;

    let report: Vec<ImageProposals> = args
        .images
        .iter()
        .zip(batch.iter())
        .map(|(image, proposals)| ImageProposals { image, proposals })
        .collect();
    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "wrote proposals");
        }
        None => println!("{json}"),
    }

    if let Some(dir) = &args.overlay_dir {
        fs::create_dir_all(dir)?;
        for (image, proposals) in args.images.iter().zip(batch.iter()) {
            let stem = image
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("image");
            let out = dir.join(format!("{stem}_proposals.png"));
            let drawn = render_overlay(image, proposals, args.min_score, &out)
                .with_context(|| format!("rendering overlay for {}", image.display()))?;
            info!(image = %image.display(), drawn, out = %out.display(), "wrote overlay");
        }
    }
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
