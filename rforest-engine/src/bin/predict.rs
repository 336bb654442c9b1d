//! `rforest-predict` — single-sample inference against a model directory
//! produced by `rforest-build`. Mirrors `forest-optimizer`'s
//! `analyze_forest` bin: read the artifact, report what the engine did.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;

use rforest_engine::model::RandomForest;
use rforest_engine::platform_std::StdPlatform;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Model name to load (must already be `able_to_inference`).
    #[arg(short = 'm', long = "model", value_name = "MODEL_NAME")]
    model: String,

    /// Directory the model directory lives under.
    #[arg(short = 'r', long = "root", value_name = "ROOT_DIR", default_value = ".")]
    root: PathBuf,

    /// Raw feature vector, comma-separated (e.g. `0,1,1,0`).
    #[arg(short = 'x', long = "features", value_name = "F0,F1,...", value_delimiter = ',')]
    features: Vec<f32>,

    /// Record this prediction in the pending-feedback buffer, so a later
    /// `add_actual_label` call can fold the ground truth back into the
    /// dataset.
    #[arg(long = "log-pending")]
    log_pending: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let args = Cli::parse();

    let platform = StdPlatform::new(&args.root);
    let mut forest = RandomForest::new(platform, &args.model)
        .map_err(|e| color_eyre::eyre::eyre!("{e}"))
        .context("loading model")?;

    if !forest.able_to_inference() {
        return Err(color_eyre::eyre::eyre!(
            "model '{}' is not able_to_inference (missing unified forest and/or quantiser)",
            args.model
        ));
    }

    let result = forest.predict(&args.features);
    if !result.success {
        println!("predict failed (wrong feature length or no quantiser loaded)");
        return Ok(());
    }

    println!(
        "label_id={} label_text={} latency_us={}",
        result.label_id,
        result.label_text.as_deref().unwrap_or("<unnamed>"),
        result.latency_us,
    );

    if args.log_pending {
        // `predict` doesn't hand back its quantised bins, only the label;
        // re-derive the packed form the same way the CLI's own identity
        // quantiser would for an already-binned CLI input.
        let packed: Vec<u8> = args.features.iter().map(|&v| v as u8).collect();
        forest
            .log_pending_data(packed, result.label_id)
            .map_err(|e| color_eyre::eyre::eyre!("{e}"))
            .context("logging pending prediction")?;
    }

    Ok(())
}
