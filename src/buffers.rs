use anyhow::{Result, anyhow, bail};

use crate::Real;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Slot {
    #[default]
    First,
    Second,
}

impl Slot {
    #[inline]
    pub fn flipped(self) -> Self {
        match self {
            Slot::First => Slot::Second,
            Slot::Second => Slot::First,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Slot::First => 0,
            Slot::Second => 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DoubleBuffer<T> {
    slots: [T; 2],
}

impl<T> DoubleBuffer<T> {
    pub fn new(first: T, second: T) -> Self {
        Self {
            slots: [first, second],
        }
    }

    #[inline]
    pub fn get(&self, slot: Slot) -> &T {
        &self.slots[slot.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, slot: Slot) -> &mut T {
        &mut self.slots[slot.index()]
    }
}

pub(crate) fn try_zeroed<T: Clone + Default>(len: usize, what: &str) -> Result<Vec<T>> {
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|e| anyhow!("failed to allocate {len} {what}: {e}"))?;
    out.resize(len, T::default());
    Ok(out)
}

#[derive(Debug)]
pub struct BufferStore {
    n_states: usize,
    n_patterns: usize,
    n_categories: usize,
    partials_len: usize,
    matrix_len: usize,
    partials: Vec<Option<DoubleBuffer<Vec<Real>>>>,
    matrices: Vec<DoubleBuffer<Vec<Real>>>,
    tip_states: Vec<Option<Vec<u32>>>,
}

impl BufferStore {
    pub fn new(
        n_states: usize,
        n_nodes: usize,
        n_patterns: usize,
        n_categories: usize,
        partials_len: usize,
    ) -> Result<Self> {
        let matrix_len = (n_states + 1) * (n_states + 1);
        let per_node = n_categories * matrix_len;
        let mut matrices = Vec::new();
        matrices
            .try_reserve_exact(n_nodes)
            .map_err(|e| anyhow!("failed to allocate matrix table for {n_nodes} nodes: {e}"))?;
        for _ in 0..n_nodes {
            matrices.push(DoubleBuffer::new(
                try_zeroed(per_node, "matrix entries")?,
                try_zeroed(per_node, "matrix entries")?,
            ));
        }
        Ok(Self {
            n_states,
            n_patterns,
            n_categories,
            partials_len,
            matrix_len,
            partials: (0..n_nodes).map(|_| None).collect(),
            matrices,
            tip_states: vec![None; n_nodes],
        })
    }

    pub fn node_count(&self) -> usize {
        self.matrices.len()
    }

    pub fn state_count(&self) -> usize {
        self.n_states
    }

    pub fn check_node(&self, node: usize) -> Result<()> {
        if node >= self.node_count() {
            bail!(
                "node index {node} out of range (node count {})",
                self.node_count()
            );
        }
        Ok(())
    }

    pub fn allocate_partials(&mut self, node: usize) -> Result<()> {
        self.check_node(node)?;
        if self.partials[node].is_none() {
            self.partials[node] = Some(DoubleBuffer::new(
                try_zeroed(self.partials_len, "partials")?,
                try_zeroed(self.partials_len, "partials")?,
            ));
        }
        Ok(())
    }

    pub fn has_partials(&self, node: usize) -> bool {
        self.partials.get(node).is_some_and(Option::is_some)
    }

    pub fn is_tip(&self, node: usize) -> bool {
        self.tip_states.get(node).is_some_and(Option::is_some)
    }

    // states >= n_states clamp to the ambiguous sentinel n_states
    pub fn set_tip_states(&mut self, node: usize, states: &[u32]) -> Result<()> {
        self.check_node(node)?;
        if states.len() != self.n_patterns {
            bail!(
                "tip states for node {node} have length {}, expected {} patterns",
                states.len(),
                self.n_patterns
            );
        }
        let sentinel = self.n_states as u32;
        let clamped = states.iter().map(|&s| s.min(sentinel)).collect();
        self.tip_states[node] = Some(clamped);
        Ok(())
    }

    pub fn tip_states(&self, node: usize) -> Option<&[u32]> {
        self.tip_states.get(node).and_then(|s| s.as_deref())
    }

    pub fn set_matrix(&mut self, node: usize, slot: Slot, category: usize, matrix: &[f64]) -> Result<()> {
        self.check_node(node)?;
        let n = self.n_states;
        if category >= self.n_categories {
            bail!(
                "category {category} out of range (category count {})",
                self.n_categories
            );
        }
        if matrix.len() != n * n {
            bail!(
                "matrix for node {node} has length {}, expected {}",
                matrix.len(),
                n * n
            );
        }
        let width = n + 1;
        let offset = category * self.matrix_len;
        let block = &mut self.matrices[node].get_mut(slot)[offset..offset + self.matrix_len];
        for (i, row) in matrix.chunks_exact(n).enumerate() {
            let padded = &mut block[i * width..(i + 1) * width];
            for (dst, &src) in padded.iter_mut().zip(row) {
                *dst = src as Real;
            }
            padded[n] = 1.0;
        }
        block[n * width..].fill(1.0);
        Ok(())
    }

    pub fn set_padded_matrices(&mut self, node: usize, slot: Slot, matrices: &[f64]) -> Result<()> {
        self.check_node(node)?;
        let expected = self.n_categories * self.matrix_len;
        if matrices.len() != expected {
            bail!(
                "padded matrices for node {node} have length {}, expected {expected}",
                matrices.len()
            );
        }
        for (dst, &src) in self.matrices[node].get_mut(slot).iter_mut().zip(matrices) {
            *dst = src as Real;
        }
        Ok(())
    }

    pub fn matrices(&self, node: usize, slot: Slot) -> &[Real] {
        self.matrices[node].get(slot)
    }

    pub fn partials(&self, node: usize, slot: Slot) -> Option<&[Real]> {
        self.partials
            .get(node)
            .and_then(Option::as_ref)
            .map(|p| p.get(slot).as_slice())
    }

    pub fn with_partials_mut<R>(
        &mut self,
        node: usize,
        slot: Slot,
        f: impl FnOnce(&Self, &mut [Real]) -> R,
    ) -> Result<R> {
        let mut buf = match self.partials.get_mut(node).and_then(Option::as_mut) {
            Some(p) => std::mem::take(p.get_mut(slot)),
            None => bail!("node {node} has no partials buffers"),
        };
        let out = f(self, &mut buf);
        if let Some(p) = self.partials[node].as_mut() {
            *p.get_mut(slot) = buf;
        }
        Ok(out)
    }
}
