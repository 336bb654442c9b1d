//! `rforest-build` — CSV base dataset in, trained unified forest out.
//! Mirrors `forest-optimizer`'s `optimize_forest` bin: a thin `clap` CLI
//! over the library's own pipeline, `color-eyre` for reporting.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;

use rforest_engine::model::RandomForest;
use rforest_engine::platform_std::StdPlatform;
use rforest_engine::quantizer::TableQuantizer;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Model name; every artifact lands under `<root>/<name>/<name>_*`.
    #[arg(short = 'm', long = "model", value_name = "MODEL_NAME")]
    model: String,

    /// Labelled, already-quantised CSV dataset: one `label,f0,f1,...`
    /// record per line, features in `[0, 2^bits)`.
    #[arg(short = 'd', long = "data", value_name = "DATA_CSV")]
    data: PathBuf,

    /// Number of quantised features per sample.
    #[arg(short = 'f', long = "features", value_name = "NUM_FEATURES")]
    num_features: u16,

    /// Quantisation bit-width shared by every feature (1..=8).
    #[arg(short = 'b', long = "bits", value_name = "BITS", default_value_t = 4)]
    bits: u8,

    /// Directory the model directory is created under. Defaults to the
    /// current working directory, matching `StdPlatform`'s convention.
    #[arg(short = 'r', long = "root", value_name = "ROOT_DIR", default_value = ".")]
    root: PathBuf,

    /// Override the auto-configured number of trees.
    #[arg(long = "trees", value_name = "NUM_TREES")]
    trees: Option<u16>,

    /// Override the engine's base RNG seed.
    #[arg(long = "seed", value_name = "SEED")]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let args = Cli::parse();

    let model_dir = args.root.join(&args.model);
    std::fs::create_dir_all(&model_dir)
        .with_context(|| format!("creating model directory {}", model_dir.display()))?;

    let data_dest = model_dir.join(format!("{}_nml.csv", args.model));
    std::fs::copy(&args.data, &data_dest)
        .with_context(|| format!("copying {} into {}", args.data.display(), data_dest.display()))?;

    // No quantiser file shipped yet: until `Rf_quantizer`'s own training
    // pipeline produces one, install an identity quantiser whose bin edges
    // sit at the half-integers between adjacent quantised levels, so a raw
    // `f32` feature that already holds an integral bin value round-trips
    // through `predict` unchanged.
    let max_level = (1u32 << args.bits).saturating_sub(1);
    let edges: Vec<f32> = (0..max_level).map(|level| level as f32 + 0.5).collect();
    let quantizer = TableQuantizer::new(args.bits, vec![edges; args.num_features as usize]);
    let ctg_dest = model_dir.join(format!("{}_ctg.csv", args.model));
    std::fs::write(&ctg_dest, quantizer.to_csv())
        .with_context(|| format!("writing quantiser table to {}", ctg_dest.display()))?;

    let platform = StdPlatform::new(&args.root);
    let mut forest = RandomForest::new(platform, &args.model)
        .map_err(|e| color_eyre::eyre::eyre!("{e}"))
        .context("initializing model")?;

    forest.set_dataset_shape(args.num_features, args.bits);
    if let Some(seed) = args.seed {
        forest.set_random_seed(seed);
    }
    if let Some(trees) = args.trees {
        forest.set_num_trees(trees);
    }

    forest
        .build_model()
        .map_err(|e| color_eyre::eyre::eyre!("{e}"))
        .context("training model")?;

    println!(
        "Trained '{}': {} trees, {} nodes, result score {:.4}",
        args.model,
        forest.tree_count(),
        forest.node_count(),
        forest.result_score(),
    );

    Ok(())
}
