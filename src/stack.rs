use crate::buffers::Slot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    StatesStates {
        tip1: usize,
        tip2: usize,
    },
    StatesPartials {
        tip: usize,
        child: usize,
    },
    PartialsPartials {
        child1: usize,
        child2: usize,
    },
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::StatesStates { .. } => "SS",
            Operation::StatesPartials { .. } => "SP",
            Operation::PartialsPartials { .. } => "PP",
        }
    }

    pub fn children(&self) -> (usize, usize) {
        match *self {
            Operation::StatesStates { tip1, tip2 } => (tip1, tip2),
            Operation::StatesPartials { tip, child } => (tip, child),
            Operation::PartialsPartials { child1, child2 } => (child1, child2),
        }
    }
}

// index_slot is fixed at push time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEntry {
    pub operation: Operation,
    pub parent: usize,
    pub index_slot: Slot,
}

#[derive(Debug, Default)]
pub struct OperationStack {
    entries: Vec<StackEntry>,
}

impl OperationStack {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, entry: StackEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    #[cfg(test)]
    fn writes(&self, node: usize) -> bool {
        self.entries.iter().any(|e| e.parent == node)
    }

    pub fn take(&mut self) -> Vec<StackEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn recycle(&mut self, mut drained: Vec<StackEntry>) {
        drained.clear();
        if self.entries.is_empty() && drained.capacity() > self.entries.capacity() {
            self.entries = drained;
        }
    }
}
