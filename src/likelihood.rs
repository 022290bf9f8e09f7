use anyhow::{Result, anyhow, bail};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::Real;
use crate::buffers::{BufferStore, DoubleBuffer, Slot};
use crate::checkpoint::{Checkpoint, Generations};
use crate::dedup::{DedupEngine, DedupIndex, Operand};
use crate::kernels::{Dims, Job, Kernel, integrate_categories};
use crate::scaling::Scaling;
use crate::stack::{Operation, OperationStack, StackEntry};

fn default_integrate() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub state_count: usize,
    pub node_count: usize,
    pub pattern_count: usize,
    pub category_count: usize,
    #[serde(default = "default_integrate")]
    pub integrate_categories: bool,
}

impl CoreConfig {
    pub fn new(
        state_count: usize,
        node_count: usize,
        pattern_count: usize,
        category_count: usize,
    ) -> Self {
        Self {
            state_count,
            node_count,
            pattern_count,
            category_count,
            integrate_categories: true,
        }
    }

    pub fn partials_len(&self) -> usize {
        if self.integrate_categories {
            self.pattern_count * self.state_count * self.category_count
        } else {
            self.pattern_count * self.state_count
        }
    }

    fn validate(&self) -> Result<()> {
        if self.state_count == 0 {
            bail!("state_count must be > 0");
        }
        if self.category_count == 0 {
            bail!("category_count must be > 0");
        }
        if !self.integrate_categories && self.category_count > 1 {
            bail!(
                "category_count is {} but categories are not integrated; only one category fits a partials buffer",
                self.category_count
            );
        }
        if self.pattern_count >= u32::MAX as usize {
            bail!("pattern_count {} exceeds the index range", self.pattern_count);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct LikelihoodCore {
    config: CoreConfig,
    dims: Dims,
    kernel: Kernel,
    buffers: BufferStore,
    indices: Vec<DoubleBuffer<DedupIndex>>,
    fresh: Vec<DoubleBuffer<bool>>,
    dedup: DedupEngine,
    checkpoint: Checkpoint,
    stack: OperationStack,
    scaling: Scaling,
}

impl LikelihoodCore {
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        let buffers = BufferStore::new(
            config.state_count,
            config.node_count,
            config.pattern_count,
            config.category_count,
            config.partials_len(),
        )?;
        let n = config.node_count;
        log::info!(
            "likelihood core: {} nodes, {} patterns, {} states, {} categories",
            n,
            config.pattern_count,
            config.state_count,
            config.category_count
        );
        Ok(Self {
            config,
            dims: Dims {
                n_states: config.state_count,
                n_categories: config.category_count,
                n_patterns: config.pattern_count,
            },
            kernel: Kernel::for_states(config.state_count),
            buffers,
            indices: (0..n).map(|_| DoubleBuffer::default()).collect(),
            fresh: vec![DoubleBuffer::default(); n],
            dedup: DedupEngine::new(config.pattern_count),
            checkpoint: Checkpoint::new(n),
            stack: OperationStack::with_capacity(n),
            scaling: Scaling::default(),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn node_count(&self) -> usize {
        self.config.node_count
    }

    pub fn pattern_count(&self) -> usize {
        self.config.pattern_count
    }

    pub fn state_count(&self) -> usize {
        self.config.state_count
    }

    pub fn category_count(&self) -> usize {
        self.config.category_count
    }

    pub fn allocate_partials(&mut self, node: usize) -> Result<()> {
        self.buffers.allocate_partials(node)
    }

    pub fn set_tip_states(&mut self, node: usize, states: &[u32]) -> Result<()> {
        if self.buffers.has_partials(node) {
            bail!("node {node} already holds partials and cannot become a tip");
        }
        self.buffers.set_tip_states(node, states)
    }

    pub fn tip_states(&self, node: usize) -> Option<&[u32]> {
        self.buffers.tip_states(node)
    }

    pub fn set_matrix(&mut self, node: usize, category: usize, matrix: &[f64]) -> Result<()> {
        self.buffers.check_node(node)?;
        let slot = self.checkpoint.matrices.current(node);
        self.buffers.set_matrix(node, slot, category, matrix)
    }

    pub fn set_padded_matrices(&mut self, node: usize, matrices: &[f64]) -> Result<()> {
        self.buffers.check_node(node)?;
        let slot = self.checkpoint.matrices.current(node);
        self.buffers.set_padded_matrices(node, slot, matrices)
    }

    pub fn mark_matrix_update(&mut self, node: usize) -> Result<()> {
        self.buffers.check_node(node)?;
        self.checkpoint.matrices.flip(node);
        Ok(())
    }

    pub fn mark_partials_update(&mut self, node: usize) -> Result<()> {
        self.buffers.check_node(node)?;
        let slot = self.checkpoint.partials.flip(node);
        *self.fresh[node].get_mut(slot) = false;
        Ok(())
    }

    pub fn mark_state_update(&mut self, node: usize) -> Result<()> {
        self.buffers.check_node(node)?;
        let slot = self.checkpoint.states.flip(node);
        self.indices[node].get_mut(slot).invalidate();
        Ok(())
    }

    pub fn set_scale_factor(&mut self, factor: f64) -> Result<()> {
        if !factor.is_finite() || factor <= 0.0 {
            bail!("scale factor must be finite and > 0, got {factor}");
        }
        self.scaling = Scaling::new(factor);
        log::debug!(
            "scale factor set to {factor} (scaling {})",
            if self.scaling.is_enabled() { "on" } else { "off" }
        );
        Ok(())
    }

    pub fn use_scaling(&self) -> bool {
        self.scaling.is_enabled()
    }

    pub fn scale_factor(&self) -> f64 {
        self.scaling.factor()
    }

    pub fn log_scaling_factor(&self, _pattern: usize) -> f64 {
        self.scaling.log_factor(self.config.node_count)
    }

    pub fn distinct_count(&self, node: usize) -> Option<usize> {
        self.current_index(node)?.count()
    }

    pub fn is_direct(&self, node: usize) -> bool {
        self.current_index(node)
            .is_some_and(|index| index.is_direct() && !index.is_stale())
    }

    fn current_index(&self, node: usize) -> Option<&DedupIndex> {
        self.buffers.check_node(node).ok()?;
        let slot = self.checkpoint.states.current(node);
        self.indices.get(node).map(|index| index.get(slot))
    }

    pub fn pending(&self) -> usize {
        self.stack.len()
    }

    pub fn request(&mut self, child1: usize, child2: usize, parent: usize) -> Result<()> {
        for node in [child1, child2, parent] {
            self.buffers.check_node(node)?;
        }
        if parent == child1 || parent == child2 {
            bail!("node {parent} cannot be its own child");
        }
        if self.buffers.is_tip(parent) {
            bail!("parent node {parent} holds tip states and cannot receive partials");
        }
        if !self.buffers.has_partials(parent) {
            bail!("parent node {parent} has no partials buffers; allocate them first");
        }

        let operation = match (self.buffers.is_tip(child1), self.buffers.is_tip(child2)) {
            (true, true) => Operation::StatesStates {
                tip1: child1,
                tip2: child2,
            },
            (true, false) => {
                self.require_partials_child(child2)?;
                Operation::StatesPartials {
                    tip: child1,
                    child: child2,
                }
            }
            (false, true) => {
                self.require_partials_child(child1)?;
                Operation::StatesPartials {
                    tip: child2,
                    child: child1,
                }
            }
            (false, false) => {
                self.require_partials_child(child1)?;
                self.require_partials_child(child2)?;
                Operation::PartialsPartials { child1, child2 }
            }
        };

        let index_slot = self.checkpoint.states.current(parent);
        self.ensure_index(operation, parent, index_slot);
        self.stack.push(StackEntry {
            operation,
            parent,
            index_slot,
        });
        Ok(())
    }

    fn require_partials_child(&self, node: usize) -> Result<()> {
        if !self.buffers.has_partials(node) {
            bail!("child node {node} has neither tip states nor partials");
        }
        if self.indices[node]
            .get(self.checkpoint.states.current(node))
            .is_stale()
        {
            bail!("child node {node} has no pattern index; request its partials before its parent's");
        }
        Ok(())
    }

    fn ensure_index(&mut self, operation: Operation, parent: usize, slot: Slot) {
        if !self.indices[parent].get(slot).is_stale() {
            return;
        }
        let mut index = std::mem::take(self.indices[parent].get_mut(slot));
        let (c1, c2) = operation.children();
        let left = operand(&self.buffers, &self.indices, &self.checkpoint.states, c1);
        let right = operand(&self.buffers, &self.indices, &self.checkpoint.states, c2);
        self.dedup.build(left, right, &mut index);
        log::debug!(
            "node {parent}: {} index rebuilt, {} distinct of {} patterns{}",
            operation.label(),
            index.count().unwrap_or(0),
            self.config.pattern_count,
            if index.is_direct() { " (direct)" } else { "" }
        );
        *self.indices[parent].get_mut(slot) = index;
    }

    // stops at the first failing entry, the rest of the queue is dropped
    pub fn flush(&mut self) -> Result<()> {
        if self.stack.is_empty() {
            return Ok(());
        }
        let entries = self.stack.take();
        log::trace!("flushing {} queued operations", entries.len());
        let mut result = Ok(());
        for entry in &entries {
            result = self.execute(entry);
            if result.is_err() {
                break;
            }
        }
        self.stack.recycle(entries);
        result
    }

    fn execute(&mut self, entry: &StackEntry) -> Result<()> {
        let parent = entry.parent;
        let out_slot = self.checkpoint.partials.current(parent);
        let kernel = self.kernel;
        let dims = self.dims;
        let scaling = self.scaling;
        let index = self.indices[parent].get(entry.index_slot);
        let cp = &self.checkpoint;
        let fresh = &self.fresh;
        if index.is_stale() {
            bail!("pattern index of node {parent} was invalidated while its request was queued");
        }

        self.buffers.with_partials_mut(parent, out_slot, |buffers, out| -> Result<()> {
            let (c1, c2) = entry.operation.children();
            let m1 = buffers.matrices(c1, cp.matrices.current(c1));
            let m2 = buffers.matrices(c2, cp.matrices.current(c2));
            let job = match entry.operation {
                Operation::StatesStates { .. } => Job::StatesStates {
                    left: index.left(),
                    right: index.right(),
                    m1,
                    m2,
                },
                Operation::StatesPartials { tip, child } => {
                    let p2 = child_partials(buffers, cp, fresh, child)?;
                    if index.is_direct() {
                        let states = buffers
                            .tip_states(tip)
                            .ok_or_else(|| anyhow!("tip node {tip} lost its states"))?;
                        Job::StatesPartialsDirect { states, m1, m2, p2 }
                    } else {
                        Job::StatesPartials {
                            left: index.left(),
                            right: index.right(),
                            m1,
                            m2,
                            p2,
                        }
                    }
                }
                Operation::PartialsPartials { child1, child2 } => {
                    let p1 = child_partials(buffers, cp, fresh, child1)?;
                    let p2 = child_partials(buffers, cp, fresh, child2)?;
                    if index.is_direct() {
                        Job::PartialsPartialsDirect { m1, p1, m2, p2 }
                    } else {
                        Job::PartialsPartials {
                            left: index.left(),
                            right: index.right(),
                            m1,
                            p1,
                            m2,
                            p2,
                        }
                    }
                }
            };
            kernel.execute(&dims, job, out);
            let written = index.count().unwrap_or(0) * dims.n_categories * dims.n_states;
            scaling.apply(&mut out[..written]);
            Ok(())
        })??;

        *self.fresh[parent].get_mut(out_slot) = true;
        Ok(())
    }

    pub fn integrate(&mut self, node: usize, proportions: &[f64], out: &mut [Real]) -> Result<()> {
        self.buffers.check_node(node)?;
        if proportions.len() != self.config.category_count {
            bail!(
                "expected {} category proportions, got {}",
                self.config.category_count,
                proportions.len()
            );
        }
        let expected = self.config.pattern_count * self.config.state_count;
        if out.len() != expected {
            bail!(
                "output buffer has length {}, expected {expected}",
                out.len()
            );
        }
        self.flush()?;

        let partials = self.current_partials(node)?;
        let index = self.indices[node].get(self.checkpoint.states.current(node));
        integrate_categories(
            &self.dims,
            index.pattern_ids(self.dedup.identity()),
            partials,
            proportions,
            out,
        );
        Ok(())
    }

    pub fn integrated_partials(&mut self, node: usize, proportions: &[f64]) -> Result<Array2<Real>> {
        let mut out = Array2::<Real>::zeros((self.config.pattern_count, self.config.state_count));
        match out.as_slice_mut() {
            Some(buf) => self.integrate(node, proportions, buf)?,
            None => bail!("output matrix is not contiguous"),
        }
        Ok(out)
    }

    pub fn partials(&self, node: usize) -> Result<&[Real]> {
        self.buffers.check_node(node)?;
        if !self.stack.is_empty() {
            bail!(
                "{} requests are still queued; flush before reading partials",
                self.stack.len()
            );
        }
        let partials = self.current_partials(node)?;
        let count = self.distinct_count(node).unwrap_or(0);
        Ok(&partials[..count * self.dims.n_categories * self.dims.n_states])
    }

    fn current_partials(&self, node: usize) -> Result<&[Real]> {
        let slot = self.checkpoint.partials.current(node);
        let partials = self
            .buffers
            .partials(node, slot)
            .ok_or_else(|| anyhow!("node {node} has no partials buffers"))?;
        if self.indices[node]
            .get(self.checkpoint.states.current(node))
            .is_stale()
        {
            bail!("node {node} has no pattern index; request its partials first");
        }
        if !*self.fresh[node].get(slot) {
            bail!("partials of node {node} were never computed in the current generation");
        }
        Ok(partials)
    }

    pub fn store(&mut self) {
        self.checkpoint.store();
        log::debug!("checkpoint stored");
    }

    pub fn restore(&mut self) {
        self.checkpoint.restore();
        log::debug!("checkpoint restored");
    }

    pub fn unstore(&mut self) {
        self.checkpoint.unstore();
        log::debug!("checkpoint unstored");
    }
}

fn operand<'a>(
    buffers: &'a BufferStore,
    indices: &'a [DoubleBuffer<DedupIndex>],
    states: &Generations,
    node: usize,
) -> Operand<'a> {
    match buffers.tip_states(node) {
        Some(tip) => Operand::States {
            states: tip,
            n_states: buffers.state_count(),
        },
        None => indices[node].get(states.current(node)).as_operand(),
    }
}

fn child_partials<'a>(
    buffers: &'a BufferStore,
    cp: &Checkpoint,
    fresh: &[DoubleBuffer<bool>],
    node: usize,
) -> Result<&'a [Real]> {
    let slot = cp.partials.current(node);
    if !*fresh[node].get(slot) {
        bail!("partials of node {node} were marked for update but never recomputed");
    }
    buffers
        .partials(node, slot)
        .ok_or_else(|| anyhow!("node {node} has no partials buffers"))
}
