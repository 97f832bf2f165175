mod cache;
mod error;
mod frame;
mod plot;

use error::AnalysisError;
use parser::ErrorPolicy;
use plot::{ChartKind, ChartTask};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "analysis=info,parser=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <path_to_simulation>", args[0]);
        process::exit(1);
    }

    let run_dir = PathBuf::from(&args[1]);
    info!("Processing simulation at {}", run_dir.display());

    if let Err(error) = run(&run_dir) {
        error!("{error}");
        process::exit(1);
    }
}

fn run(run_dir: &Path) -> Result<(), AnalysisError> {
    let log = cache::load_or_parse(run_dir, ErrorPolicy::Lenient)?;

    let plots_dir = run_dir.join("plots");
    std::fs::create_dir_all(&plots_dir)?;

    // The seed is an averaging dimension, never a chart dimension.
    let chart_params: Vec<String> = log
        .parameters
        .iter()
        .filter(|p| p.as_str() != "seed")
        .cloned()
        .collect();

    let tasks = build_tasks(&chart_params);
    info!("Generating charts from {} tasks", tasks.len());

    tasks
        .par_iter()
        .try_for_each(|task| task.run(&log.stats, &log.freq, &plots_dir))?;

    info!("Charts written to {}", plots_dir.display());
    Ok(())
}

/// One task per chart family and series parameter: vary over every other
/// parameter, draw one series per value of the chosen one. Tasks are
/// independent and land on disjoint output paths, so the pool can run them
/// in any order.
fn build_tasks(params: &[String]) -> Vec<ChartTask> {
    let mut tasks = vec![ChartTask {
        kind: ChartKind::Messages,
        agg_diff: params.to_vec(),
        agg_same: None,
    }];

    for param in params {
        let others: Vec<String> = params.iter().filter(|p| *p != param).cloned().collect();

        for kind in [ChartKind::Messages, ChartKind::ForksNumber, ChartKind::ForksRate] {
            tasks.push(ChartTask {
                kind,
                agg_diff: others.clone(),
                agg_same: Some(param.clone()),
            });
        }

        // Distributions are per point in time, so time joins the vary set.
        let mut with_time = others;
        with_time.push("time".to_string());
        tasks.push(ChartTask {
            kind: ChartKind::ForksDistribution,
            agg_diff: with_time,
            agg_same: Some(param.clone()),
        });
    }
    tasks
}
