use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use log::info;
use meds_tab::store::layout::SPLITS;
use meds_tab::{Pipeline, TabularizeConfig};

#[global_allocator]
static ALLOC: snmalloc_rs::SnMalloc = snmalloc_rs::SnMalloc;

const USAGE: &str = "usage: meds-tab <config.json> [describe|static|windows|index|merge|all]";

fn main() -> anyhow::Result<()> {
    // Setup logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let config_path = PathBuf::from(args.next().context(USAGE)?);
    let stage = args.next().unwrap_or_else(|| "all".to_string());

    let config = TabularizeConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    let pipeline = Pipeline::new(config).context("Failed to set up the pipeline")?;

    let start = Instant::now();
    match stage.as_str() {
        "describe" => {
            pipeline.describe_codes().context("Failed to describe codes")?;
        }
        "static" => {
            let catalog = pipeline.load_catalog().context("Run the describe stage first")?;
            pipeline
                .tabularize_static(&catalog)
                .context("Failed to tabularize static features")?;
        }
        "windows" => {
            let catalog = pipeline.load_catalog().context("Run the describe stage first")?;
            pipeline
                .summarize_windows(&catalog)
                .context("Failed to summarize windows")?;
        }
        "index" => {
            let catalog = pipeline.load_catalog().context("Run the describe stage first")?;
            pipeline
                .write_event_indices(&catalog)
                .context("Failed to write event indices")?;
        }
        "merge" => {
            for split in SPLITS {
                pipeline
                    .merge_split(split)
                    .with_context(|| format!("Failed to merge split {split}"))?;
            }
        }
        "all" => {
            let catalog = pipeline.run_all().context("Tabularization failed")?;
            info!("Tabularized {} feature columns", catalog.len());
        }
        other => anyhow::bail!("Unknown stage '{other}'\n{USAGE}"),
    }

    info!("Finished {stage} in {:?}", start.elapsed());
    Ok(())
}
