use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::Path;
use std::time::Duration;

const CHAINS_TEMPLATE: &str =
    "beer {prefix:.bold.green} {wide_bar:.green/white} {human_pos}/{human_len} proposals ({per_sec}, {eta} left) {msg}";
const LOAD_TEMPLATE: &str = "beer {spinner:.yellow} {msg} ({elapsed})";

fn chains_style() -> ProgressStyle {
    ProgressStyle::with_template(CHAINS_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn load_style() -> ProgressStyle {
    ProgressStyle::with_template(LOAD_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("-\\|/ ")
}

// one bar for all chains; rayon workers tick it concurrently
pub fn chains_bar(enabled: bool, n_chains: usize, iterations: usize) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let total = n_chains.saturating_mul(iterations) as u64;
    let pb = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr_with_hz(10));
    pb.set_style(chains_style());
    pb.set_prefix(format!("{n_chains}x{iterations}"));
    pb
}

pub fn loading_spinner(enabled: bool, path: &Path) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr_with_hz(10));
    pb.set_style(load_style());
    pb.set_message(format!("loading {}", path.display()));
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
