use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::likelihood::CoreConfig;
use crate::model::{EqualRatesModel, uniform_frequencies};

use super::open_reader;

fn default_rates() -> Vec<f64> {
    vec![1.0]
}

fn default_proportions() -> Vec<f64> {
    vec![1.0]
}

fn default_scale() -> f64 {
    1.0
}

fn default_integrate() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipData {
    pub node: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub state_count: usize,
    pub branch_lengths: Vec<f64>,
    pub operations: Vec<[usize; 3]>,
    pub tips: Vec<TipData>,
    #[serde(default = "default_rates")]
    pub rates: Vec<f64>,
    #[serde(default = "default_proportions")]
    pub proportions: Vec<f64>,
    #[serde(default)]
    pub frequencies: Option<Vec<f64>>,
    #[serde(default)]
    pub pattern_weights: Option<Vec<f64>>,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_integrate")]
    pub integrate_categories: bool,
}

pub fn nucleotide_state(b: u8) -> u32 {
    match b {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' | b'U' | b'u' => 3,
        _ => 4,
    }
}

impl Scenario {
    pub fn node_count(&self) -> usize {
        self.branch_lengths.len()
    }

    pub fn category_count(&self) -> usize {
        self.rates.len()
    }

    pub fn root(&self) -> Option<usize> {
        self.operations.last().map(|op| op[2])
    }

    pub fn tip_states(&self, tip: &TipData) -> Result<Vec<u32>> {
        match (&tip.states, &tip.sequence) {
            (Some(states), None) => Ok(states.clone()),
            (None, Some(seq)) => {
                if self.state_count != 4 {
                    bail!(
                        "tip {} gives a nucleotide sequence but state_count is {}",
                        tip.node,
                        self.state_count
                    );
                }
                Ok(seq
                    .bytes()
                    .filter(|b| !b.is_ascii_whitespace())
                    .map(nucleotide_state)
                    .collect())
            }
            _ => bail!("tip {} must give exactly one of states or sequence", tip.node),
        }
    }

    pub fn pattern_count(&self) -> Result<usize> {
        match self.tips.first() {
            Some(tip) => Ok(self.tip_states(tip)?.len()),
            None => bail!("scenario has no tips"),
        }
    }

    pub fn parents(&self) -> Vec<Option<usize>> {
        let mut parents = vec![None; self.node_count()];
        for &[c1, c2, p] in &self.operations {
            if c1 < parents.len() {
                parents[c1] = Some(p);
            }
            if c2 < parents.len() {
                parents[c2] = Some(p);
            }
        }
        parents
    }

    pub fn model(&self) -> Result<EqualRatesModel> {
        let frequencies = self
            .frequencies
            .clone()
            .unwrap_or_else(|| uniform_frequencies(self.state_count));
        EqualRatesModel::new(
            self.state_count,
            self.rates.clone(),
            self.proportions.clone(),
            frequencies,
        )
    }

    pub fn core_config(&self) -> Result<CoreConfig> {
        Ok(CoreConfig {
            state_count: self.state_count,
            node_count: self.node_count(),
            pattern_count: self.pattern_count()?,
            category_count: self.category_count(),
            integrate_categories: self.integrate_categories,
        })
    }

    pub fn weights(&self) -> Result<Vec<f64>> {
        let n = self.pattern_count()?;
        match &self.pattern_weights {
            Some(w) => Ok(w.clone()),
            None => Ok(vec![1.0; n]),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.node_count();
        if self.state_count == 0 {
            bail!("state_count must be > 0");
        }
        if self.operations.is_empty() {
            bail!("scenario has no operations");
        }
        if let Some(b) = self.branch_lengths.iter().find(|b| !b.is_finite() || **b < 0.0) {
            bail!("branch lengths must be finite and >= 0, found {b}");
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            bail!("scale must be finite and > 0, got {}", self.scale);
        }

        let mut is_tip = vec![false; n];
        let patterns = self.pattern_count()?;
        for tip in &self.tips {
            if tip.node >= n {
                bail!("tip node {} out of range (node count {n})", tip.node);
            }
            if is_tip[tip.node] {
                bail!("tip node {} listed twice", tip.node);
            }
            is_tip[tip.node] = true;
            let len = self.tip_states(tip)?.len();
            if len != patterns {
                bail!(
                    "tip {} has {len} patterns, expected {patterns}",
                    tip.node
                );
            }
        }

        let mut computed = vec![false; n];
        let mut used = vec![false; n];
        for (k, &[c1, c2, p]) in self.operations.iter().enumerate() {
            for node in [c1, c2, p] {
                if node >= n {
                    bail!("operation {k} names node {node}, node count is {n}");
                }
            }
            if c1 == c2 || p == c1 || p == c2 {
                bail!("operation {k} repeats a node: [{c1}, {c2}, {p}]");
            }
            if is_tip[p] {
                bail!("operation {k} writes tip node {p}");
            }
            if computed[p] {
                bail!("operation {k} computes node {p} a second time");
            }
            for c in [c1, c2] {
                if !is_tip[c] && !computed[c] {
                    bail!("operation {k} reads node {c} before it is computed");
                }
                if used[c] {
                    bail!("node {c} has more than one parent");
                }
                used[c] = true;
            }
            computed[p] = true;
        }

        if let Some(w) = &self.pattern_weights {
            if w.len() != patterns {
                bail!(
                    "pattern_weights has length {}, expected {patterns}",
                    w.len()
                );
            }
            if w.iter().any(|v| !v.is_finite() || *v < 0.0) {
                bail!("pattern_weights must be finite and >= 0");
            }
        }
        self.model()?;
        Ok(())
    }
}

pub fn save_scenario(path: &Path, scenario: &Scenario) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, scenario)
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let reader = open_reader(path)?;
    let scenario: Scenario =
        serde_json::from_reader(reader).with_context(|| format!("failed to parse {:?}", path))?;
    scenario
        .validate()
        .with_context(|| format!("invalid scenario {:?}", path))?;
    Ok(scenario)
}
