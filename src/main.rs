// Entry point.
//
// One run is a full batch recomputation from the files under the data
// directory:
// - without `--out-dir`, the summary document goes to stdout (or `--output`);
// - with `--out-dir`, the summary, geometry layers and missing records are
//   written there and a manifest of the written files goes to stdout.
mod columns;
mod config;
mod county;
mod error;
mod geo;
mod join;
mod metrics;
mod output;
mod pipeline;
mod ranking;
mod reference;
mod series;
mod types;
mod util;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use config::PipelineConfig;
use pipeline::Pipeline;

#[derive(Parser, Debug)]
#[command(name = "regionstats", version, about = "Aggregate regional reference and case data")]
struct Args {
    /// Directory holding the reference and snapshot inputs.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// JSON run configuration; omitted fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the multi-file output here instead of a single document.
    #[arg(long, conflicts_with = "output")]
    out_dir: Option<PathBuf>,

    /// Write the single document to this file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print a ranking summary table to stderr.
    #[arg(long, default_value_t = false)]
    preview: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let pipeline = Pipeline::new(config, &args.data_dir).context("invalid configuration")?;

    let start = Instant::now();
    match &args.out_dir {
        Some(out_dir) => {
            let manifest = pipeline
                .run_multi(out_dir, args.preview)
                .with_context(|| format!("building outputs from {}", args.data_dir.display()))?;
            output::print_manifest(&manifest)?;
        }
        None => pipeline
            .run_single(args.output.as_deref(), args.preview)
            .with_context(|| format!("building summary from {}", args.data_dir.display()))?,
    }
    info!("Finished in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}
