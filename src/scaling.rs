use crate::Real;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    factor: f64,
}

impl Default for Scaling {
    fn default() -> Self {
        Self { factor: 1.0 }
    }
}

impl Scaling {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn is_enabled(&self) -> bool {
        self.factor != 1.0
    }

    pub fn apply(&self, partials: &mut [Real]) {
        if !self.is_enabled() {
            return;
        }
        let s = self.factor as Real;
        for v in partials.iter_mut() {
            *v *= s;
        }
    }

    // -(n_nodes / 2) * ln(factor), integer halving of the node count
    pub fn log_factor(&self, n_nodes: usize) -> f64 {
        if self.is_enabled() {
            -((n_nodes / 2) as f64) * self.factor.ln()
        } else {
            0.0
        }
    }
}
