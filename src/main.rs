//! Command-line front end: inspect configured chains and draw sample batches.

use augpipe::config::{PipelineConfig, Task};
use augpipe::data::{
    apply_augmentation, BoxedDataset, ClassificationDataset, CyclicIterator, DataLoader,
    DataSource,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "augpipe: augmentation pipelines and balanced loaders", long_about = None)]
struct Args {
    /// JSON pipeline configuration; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the transform chains and sampler a task would use
    Describe {
        #[arg(short, long, value_enum, default_value_t = Task::Classification)]
        task: Task,
    },
    /// Load the configured source and draw classification batches
    Sample {
        /// Number of batches to draw; the loader restarts when exhausted
        #[arg(short, long, default_value_t = 3)]
        batches: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    match args.command {
        Command::Describe { task } => describe(&config, task)?,
        Command::Sample { batches } => sample(&config, batches)?,
    }
    Ok(())
}

fn describe(config: &PipelineConfig, task: Task) -> Result<(), Box<dyn std::error::Error>> {
    println!("task: {task}");
    for (label, chain) in config.transforms(task)? {
        println!("{label:>9}: {}", chain.names().join(" -> "));
    }
    println!("  sampler: {}", config.sampler_kind()?);
    Ok(())
}

fn sample(config: &PipelineConfig, batches: usize) -> Result<(), Box<dyn std::error::Error>> {
    let source: Arc<dyn DataSource> = Arc::from(config.source()?);
    tracing::info!(
        samples = source.len(),
        classes = source.num_classes(),
        "opened data source '{}'",
        config.dataset
    );

    let sampling = config.train_sampling(Some(source.as_ref()))?;
    let mut chains = config.transforms(Task::Classification)?;
    let (_, train) = chains.remove(0);

    let mut dataset = ClassificationDataset::new(source, train);
    if let Some(seed) = config.seed {
        dataset = dataset.with_seed(seed);
    }
    let dataset: BoxedDataset = apply_augmentation(
        Box::new(dataset),
        &config.augment,
        config.crop_size,
        config.cutmix_prob,
        config.mixup_prob,
        config.seed,
    )?;

    let mut loader = DataLoader::new(dataset, config.batch_size).sampling(sampling);
    if let Some(seed) = config.seed {
        loader = loader.seed(seed);
    }

    let mut cyclic = CyclicIterator::new(&loader);
    for step in 0..batches {
        let batch = cyclic.get()??;
        let (images, labels) = batch.stack()?;
        println!(
            "batch {step}: images {:?}, labels {:?}, indices {:?}",
            images.shape(),
            labels.shape(),
            batch.indices
        );
    }
    Ok(())
}
