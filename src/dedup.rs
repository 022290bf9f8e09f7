use rustc_hash::FxHashMap;

const UNSEEN: u32 = u32::MAX;

const DENSE_LIMIT: usize = 1 << 22;

#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    States { states: &'a [u32], n_states: usize },
    Combinations {
        ids: Option<&'a [u32]>,
        count: usize,
    },
}

impl<'a> Operand<'a> {
    fn values<'b>(&self, identity: &'b [u32]) -> &'b [u32]
    where
        'a: 'b,
    {
        match *self {
            Operand::States { states, .. } => states,
            Operand::Combinations { ids: Some(ids), .. } => ids,
            Operand::Combinations { ids: None, .. } => identity,
        }
    }

    fn cardinality(&self) -> usize {
        match *self {
            Operand::States { n_states, .. } => n_states + 1,
            Operand::Combinations { count, .. } => count,
        }
    }

    fn is_identity(&self, n_patterns: usize) -> bool {
        matches!(*self, Operand::Combinations { count, .. } if count == n_patterns)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DedupIndex {
    count: Option<usize>,
    direct: bool,
    pattern_ids: Vec<u32>,
    left: Vec<u32>,
    right: Vec<u32>,
}

impl DedupIndex {
    pub fn invalidate(&mut self) {
        self.count = None;
    }

    pub fn is_stale(&self) -> bool {
        self.count.is_none()
    }

    pub fn count(&self) -> Option<usize> {
        self.count
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn pattern_ids<'a>(&'a self, identity: &'a [u32]) -> &'a [u32] {
        self.mapped_ids().unwrap_or(identity)
    }

    pub fn mapped_ids(&self) -> Option<&[u32]> {
        if self.direct {
            None
        } else {
            Some(&self.pattern_ids)
        }
    }

    pub fn as_operand(&self) -> Operand<'_> {
        Operand::Combinations {
            ids: self.mapped_ids(),
            count: self.count.unwrap_or(0),
        }
    }

    pub fn left(&self) -> &[u32] {
        &self.left[..self.count.unwrap_or(0).min(self.left.len())]
    }

    pub fn right(&self) -> &[u32] {
        &self.right[..self.count.unwrap_or(0).min(self.right.len())]
    }
}

#[derive(Debug, Default)]
struct PairMap {
    dense: Vec<u32>,
    sparse: FxHashMap<u64, u32>,
    width: usize,
    use_dense: bool,
    dense_limit: usize,
}

impl PairMap {
    fn reset(&mut self, rows: usize, cols: usize) {
        self.width = rows;
        match rows.checked_mul(cols) {
            Some(cells) if cells <= self.dense_limit => {
                self.use_dense = true;
                self.dense.clear();
                self.dense.resize(cells, UNSEEN);
            }
            _ => {
                self.use_dense = false;
                self.sparse.clear();
            }
        }
    }

    #[inline]
    fn id_or_insert(&mut self, a: u32, b: u32, next: u32) -> u32 {
        if self.use_dense {
            let key = a as usize + self.width * b as usize;
            let slot = &mut self.dense[key];
            if *slot == UNSEEN {
                *slot = next;
            }
            *slot
        } else {
            let key = (u64::from(b) << 32) | u64::from(a);
            *self.sparse.entry(key).or_insert(next)
        }
    }
}

#[derive(Debug)]
pub struct DedupEngine {
    n_patterns: usize,
    identity: Vec<u32>,
    map: PairMap,
}

impl DedupEngine {
    pub fn new(n_patterns: usize) -> Self {
        Self::with_dense_limit(n_patterns, DENSE_LIMIT)
    }

    pub(crate) fn with_dense_limit(n_patterns: usize, dense_limit: usize) -> Self {
        Self {
            n_patterns,
            identity: (0..n_patterns as u32).collect(),
            map: PairMap {
                dense_limit,
                ..PairMap::default()
            },
        }
    }

    pub fn identity(&self) -> &[u32] {
        &self.identity
    }

    // states go on the left whenever exactly one side is a tip
    pub fn build(&mut self, left: Operand<'_>, right: Operand<'_>, out: &mut DedupIndex) {
        let n = self.n_patterns;
        let left_is_states = matches!(left, Operand::States { .. });
        let fast = match right {
            Operand::States { .. } => false,
            Operand::Combinations { .. } if left_is_states => right.is_identity(n),
            Operand::Combinations { .. } => left.is_identity(n) && right.is_identity(n),
        };

        out.left.clear();
        out.right.clear();
        if fast {
            out.direct = true;
            out.pattern_ids.clear();
            out.count = Some(n);
            log::debug!("pattern index: no reduction over {n} patterns, using direct path");
            return;
        }

        out.direct = false;
        out.pattern_ids.resize(n, 0);
        self.map.reset(left.cardinality(), right.cardinality());
        let identity = &self.identity;
        let lv = left.values(identity);
        let rv = right.values(identity);
        let mut distinct = 0u32;
        for (k, (&a, &b)) in lv.iter().zip(rv).enumerate() {
            let id = self.map.id_or_insert(a, b, distinct);
            if id == distinct {
                out.left.push(a);
                out.right.push(b);
                distinct += 1;
            }
            out.pattern_ids[k] = id;
        }
        out.count = Some(distinct as usize);
        log::debug!("pattern index: {distinct} distinct combinations over {n} patterns");
    }
}
