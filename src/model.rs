use anyhow::{Result, bail};
use ndarray::Array2;

use crate::Real;

const SUM_TOL: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct EqualRatesModel {
    pub n_states: usize,
    pub rates: Vec<f64>,
    pub proportions: Vec<f64>,
    pub frequencies: Vec<f64>,
}

impl EqualRatesModel {
    pub fn new(
        n_states: usize,
        rates: Vec<f64>,
        proportions: Vec<f64>,
        frequencies: Vec<f64>,
    ) -> Result<Self> {
        if n_states == 0 {
            bail!("n_states must be > 0");
        }
        if rates.is_empty() {
            bail!("at least one rate category is required");
        }
        if rates.len() != proportions.len() {
            bail!(
                "rates has {} categories but proportions has {}",
                rates.len(),
                proportions.len()
            );
        }
        if rates.iter().any(|r| !r.is_finite() || *r < 0.0) {
            bail!("category rates must be finite and >= 0");
        }
        check_distribution("proportions", &proportions)?;
        if frequencies.len() != n_states {
            bail!(
                "frequencies has length {}, expected {n_states}",
                frequencies.len()
            );
        }
        check_distribution("frequencies", &frequencies)?;
        Ok(Self {
            n_states,
            rates,
            proportions,
            frequencies,
        })
    }

    pub fn uniform(n_states: usize) -> Result<Self> {
        Self::new(n_states, vec![1.0], vec![1.0], uniform_frequencies(n_states))
    }

    pub fn n_categories(&self) -> usize {
        self.rates.len()
    }

    pub fn transition_matrix(&self, branch_len: f64, category: usize) -> Result<Array2<f64>> {
        if !branch_len.is_finite() || branch_len < 0.0 {
            bail!("branch length must be finite and >= 0, got {branch_len}");
        }
        let Some(&rate) = self.rates.get(category) else {
            bail!(
                "category {category} out of range (category count {})",
                self.n_categories()
            );
        };
        let n = self.n_states;
        let d = rate * branch_len;
        Ok(Array2::from_shape_fn((n, n), |(i, j)| {
            equal_rates_prob(i, j, n, d)
        }))
    }

    pub fn category_matrices(&self, branch_len: f64) -> Result<Vec<Vec<f64>>> {
        (0..self.n_categories())
            .map(|l| {
                self.transition_matrix(branch_len, l)
                    .map(|m| m.iter().copied().collect())
            })
            .collect()
    }

    pub fn padded_matrices(&self, branch_len: f64) -> Result<Vec<f64>> {
        let n = self.n_states;
        let width = n + 1;
        let mut out = vec![1.0; self.n_categories() * width * width];
        for (l, block) in out.chunks_exact_mut(width * width).enumerate() {
            let m = self.transition_matrix(branch_len, l)?;
            for ((i, j), &p) in m.indexed_iter() {
                block[i * width + j] = p;
            }
        }
        Ok(out)
    }

    pub fn site_log_likelihood(&self, row: &[Real]) -> f64 {
        let mut acc = 0.0f64;
        for (&f, &p) in self.frequencies.iter().zip(row) {
            acc += f * f64::from(p);
        }
        acc.ln()
    }
}

pub fn uniform_frequencies(n_states: usize) -> Vec<f64> {
    vec![1.0 / n_states as f64; n_states]
}

pub fn equal_rates_prob(from: usize, to: usize, n_states: usize, distance: f64) -> f64 {
    if n_states == 1 {
        return 1.0;
    }
    let n = n_states as f64;
    let e = (-n * distance / (n - 1.0)).exp();
    if from == to {
        (1.0 + (n - 1.0) * e) / n
    } else {
        (1.0 - e) / n
    }
}

fn check_distribution(name: &str, values: &[f64]) -> Result<()> {
    if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
        bail!("{name} must be finite and >= 0");
    }
    let sum: f64 = values.iter().sum();
    if (sum - 1.0).abs() > SUM_TOL {
        bail!("{name} must sum to 1, got {sum}");
    }
    Ok(())
}
