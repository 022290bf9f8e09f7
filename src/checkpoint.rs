// Only the per-node slot choices are checkpointed, never the buffers they
// point at. restore is a swap.

use crate::buffers::Slot;

#[derive(Debug, Clone)]
pub struct Generations {
    current: Vec<Slot>,
    stored: Vec<Slot>,
}

impl Generations {
    pub fn new(n_nodes: usize) -> Self {
        Self {
            current: vec![Slot::First; n_nodes],
            stored: vec![Slot::First; n_nodes],
        }
    }

    #[inline]
    pub fn current(&self, node: usize) -> Slot {
        self.current[node]
    }

    #[cfg(test)]
    fn stored(&self, node: usize) -> Slot {
        self.stored[node]
    }

    pub fn flip(&mut self, node: usize) -> Slot {
        let next = self.current[node].flipped();
        self.current[node] = next;
        next
    }

    pub fn store(&mut self) {
        self.stored.copy_from_slice(&self.current);
    }

    pub fn unstore(&mut self) {
        self.current.copy_from_slice(&self.stored);
    }

    pub fn restore(&mut self) {
        std::mem::swap(&mut self.current, &mut self.stored);
    }
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub matrices: Generations,
    pub partials: Generations,
    pub states: Generations,
}

impl Checkpoint {
    pub fn new(n_nodes: usize) -> Self {
        Self {
            matrices: Generations::new(n_nodes),
            partials: Generations::new(n_nodes),
            states: Generations::new(n_nodes),
        }
    }

    pub fn store(&mut self) {
        self.matrices.store();
        self.partials.store();
        self.states.store();
    }

    pub fn unstore(&mut self) {
        self.matrices.unstore();
        self.partials.unstore();
        self.states.unstore();
    }

    pub fn restore(&mut self) {
        self.matrices.restore();
        self.partials.restore();
        self.states.restore();
    }
}
