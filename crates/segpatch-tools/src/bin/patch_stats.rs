use std::path::PathBuf;

use anyhow::Result;
use burn::config::Config;
use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};
use segpatch::{CorpusBuilder, SamplerConfig};
use segpatch_tools::{collect_training_items, submit_items, LabelCounter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Draw patches from an image corpus and report label statistics
#[derive(Parser)]
#[command(name = "patch_stats")]
struct Args {
    /// Directory of raw images
    #[arg(short, long)]
    raw: PathBuf,

    /// Label plane directory; repeat for one directory per plane
    #[arg(short, long, required = true)]
    labels: Vec<PathBuf>,

    /// Sampler configuration (JSON); overrides patch size and label count
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Label patch edge length
    #[arg(long, default_value_t = 64)]
    patch_size: usize,

    /// Number of label classes
    #[arg(long, default_value_t = 2)]
    nr_labels: usize,

    /// Number of patches to draw
    #[arg(short, long, default_value_t = 1000)]
    iterations: usize,

    /// Random seed; defaults to the configured seed
    #[arg(long)]
    seed: Option<u64>,

    /// Print the label counters after every draw
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Configuration file not found: {}", path.display());
            }
            tracing::info!(config = %path.display(), "loading sampler configuration");
            SamplerConfig::load(path)?
        }
        None => SamplerConfig::new(args.patch_size, args.nr_labels),
    };
    config.augmentation.validate()?;
    tracing::info!(
        patch_size = config.patch_size,
        nr_labels = config.nr_labels,
        seed = config.seed,
        "configuration loaded"
    );

    let items = collect_training_items(&args.raw, &args.labels)?;
    let mut builder = CorpusBuilder::from_config(config);
    submit_items(&mut builder, &items)?;
    let corpus = builder.init()?;

    let seed = args.seed.unwrap_or(corpus.config().seed);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut counter = LabelCounter::new(corpus.config().nr_labels);

    tracing::info!(iterations = args.iterations, seed, "drawing patches");
    for iteration in 0..args.iterations {
        let patch = corpus.draw_patch(&mut rng);
        counter.record(&patch.label);

        if args.debug {
            println!("Iteration {iteration}:");
            print_counter(&counter);
        }
    }

    println!("Label counts over {} patches:", args.iterations);
    print_counter(&counter);
    Ok(())
}

fn print_counter(counter: &LabelCounter) {
    let total = counter.total().max(1) as f64;
    for (label, count) in counter.entries() {
        println!(
            "  Label: {label:>3}, {count:>12} ({:6.2}%)",
            100.0 * count as f64 / total
        );
    }
}
