use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use std::path::PathBuf;

use beer_rs::chain::{ChainConfig, TreeEvaluator, run_chains};
use beer_rs::io::report::{RunReport, save_report};
use beer_rs::io::scenario::load_scenario;
use beer_rs::progress;

#[derive(Parser, Debug)]
#[command(name = "beer")]
#[command(
    about = "Tree likelihood with cached, double-buffered partials and branch-length proposal chains",
    long_about = None
)]
struct Cli {
    scenario: PathBuf,
    output_file: PathBuf,
    #[arg(long, default_value_t = 1000, help = "Proposals per chain (0 evaluates only)")]
    iterations: usize,
    #[arg(long, default_value_t = 1)]
    chains: usize,
    #[arg(long)]
    threads: Option<usize>,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 0.1, help = "Half-width of the branch-length proposal")]
    step: f64,
    #[arg(long, help = "Partials scale factor; overrides the scenario value")]
    scale: Option<f64>,
    #[arg(long)]
    no_progress: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    if let Some(n_threads) = cli.threads {
        if n_threads == 0 {
            bail!("--threads must be >= 1");
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()
            .map_err(|e| anyhow!("failed to configure Rayon global thread pool: {e}"))?;
    }

    let pb = progress::loading_spinner(!cli.no_progress, &cli.scenario);
    let mut scenario = load_scenario(&cli.scenario)
        .with_context(|| format!("failed to load scenario {:?}", cli.scenario))?;
    pb.finish_and_clear();
    if let Some(scale) = cli.scale {
        scenario.scale = scale;
    }

    let mut eval = TreeEvaluator::new(&scenario)?;
    let pattern_log_likelihoods = eval.pattern_log_likelihoods()?;
    let log_likelihood = eval.log_likelihood()?;
    let core = eval.core();
    println!(
        "Tree: {} nodes, {} patterns, {} states, {} categories",
        core.node_count(),
        core.pattern_count(),
        core.state_count(),
        core.category_count()
    );
    if let Some(distinct) = core.distinct_count(eval.root()) {
        println!("Distinct combinations at root: {distinct}");
    }
    println!("Log-likelihood: {log_likelihood}");

    let mut chains = Vec::new();
    if cli.iterations > 0 && cli.chains > 0 {
        let config = ChainConfig {
            iterations: cli.iterations,
            step: cli.step,
            seed: cli.seed,
        };
        let pb = progress::chains_bar(!cli.no_progress, cli.chains, cli.iterations);
        chains = run_chains(&scenario, cli.chains, &config, Some(&pb))?;
        pb.finish_with_message("done");
        for c in &chains {
            println!(
                "Chain {}: accepted {}/{} ({:.3}), final lnL {:.6}, best lnL {:.6}",
                c.chain,
                c.accepted,
                c.iterations,
                c.acceptance_rate,
                c.final_log_likelihood,
                c.best_log_likelihood
            );
        }
    }

    let report = RunReport {
        scenario: cli.scenario.display().to_string(),
        node_count: core.node_count(),
        pattern_count: core.pattern_count(),
        state_count: core.state_count(),
        category_count: core.category_count(),
        root_distinct_combinations: core.distinct_count(eval.root()),
        scale: core.scale_factor(),
        log_likelihood,
        pattern_log_likelihoods,
        chains,
    };
    save_report(&cli.output_file, &report)?;
    println!("Report: {}", cli.output_file.display());
    Ok(())
}
