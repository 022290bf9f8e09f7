use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::chain::ChainSummary;

use super::open_reader;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub scenario: String,
    pub node_count: usize,
    pub pattern_count: usize,
    pub state_count: usize,
    pub category_count: usize,
    pub root_distinct_combinations: Option<usize>,
    pub scale: f64,
    pub log_likelihood: f64,
    pub pattern_log_likelihoods: Vec<f64>,
    pub chains: Vec<ChainSummary>,
}

pub fn save_report(path: &Path, report: &RunReport) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, report)
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

pub fn load_report(path: &Path) -> Result<RunReport> {
    let reader = open_reader(path)?;
    let report =
        serde_json::from_reader(reader).with_context(|| format!("failed to parse {:?}", path))?;
    Ok(report)
}
