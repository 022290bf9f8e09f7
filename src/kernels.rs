// Matrices are padded (S+1) x (S+1) blocks per category: row i is the parent
// state, column j the child state, column S (ambiguous tip) is all ones.
// Partials are [combination][category][state]. Sums accumulate in f64.

use crate::Real;

#[inline(always)]
fn wide(x: Real) -> f64 {
    f64::from(x)
}

pub trait StateKernel {
    fn states_states(&self, s1: usize, s2: usize, m1: &[Real], m2: &[Real], out: &mut [Real]);

    fn states_partials(&self, s1: usize, m1: &[Real], m2: &[Real], p2: &[Real], out: &mut [Real]);

    fn partials_partials(
        &self,
        m1: &[Real],
        p1: &[Real],
        m2: &[Real],
        p2: &[Real],
        out: &mut [Real],
    );
}

#[derive(Debug, Clone, Copy)]
pub struct GenericKernel {
    pub n_states: usize,
}

impl StateKernel for GenericKernel {
    fn states_states(&self, s1: usize, s2: usize, m1: &[Real], m2: &[Real], out: &mut [Real]) {
        let width = self.n_states + 1;
        for (i, o) in out.iter_mut().enumerate() {
            let w = i * width;
            *o = (wide(m1[w + s1]) * wide(m2[w + s2])) as Real;
        }
    }

    fn states_partials(&self, s1: usize, m1: &[Real], m2: &[Real], p2: &[Real], out: &mut [Real]) {
        let n = self.n_states;
        let width = n + 1;
        for (i, o) in out.iter_mut().enumerate() {
            let w = i * width;
            let mut sum = 0.0f64;
            for j in 0..n {
                sum += wide(m2[w + j]) * wide(p2[j]);
            }
            *o = (wide(m1[w + s1]) * sum) as Real;
        }
    }

    fn partials_partials(
        &self,
        m1: &[Real],
        p1: &[Real],
        m2: &[Real],
        p2: &[Real],
        out: &mut [Real],
    ) {
        let n = self.n_states;
        let width = n + 1;
        for (i, o) in out.iter_mut().enumerate() {
            let w = i * width;
            let mut sum1 = 0.0f64;
            let mut sum2 = 0.0f64;
            for j in 0..n {
                sum1 += wide(m1[w + j]) * wide(p1[j]);
                sum2 += wide(m2[w + j]) * wide(p2[j]);
            }
            *o = (sum1 * sum2) as Real;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NucleotideKernel;

impl NucleotideKernel {
    const WIDTH: usize = 5;

    #[inline(always)]
    fn dot(row: &[Real], p: &[Real]) -> f64 {
        0.0 + wide(row[0]) * wide(p[0])
            + wide(row[1]) * wide(p[1])
            + wide(row[2]) * wide(p[2])
            + wide(row[3]) * wide(p[3])
    }
}

impl StateKernel for NucleotideKernel {
    fn states_states(&self, s1: usize, s2: usize, m1: &[Real], m2: &[Real], out: &mut [Real]) {
        const W: usize = NucleotideKernel::WIDTH;
        out[0] = (wide(m1[s1]) * wide(m2[s2])) as Real;
        out[1] = (wide(m1[W + s1]) * wide(m2[W + s2])) as Real;
        out[2] = (wide(m1[2 * W + s1]) * wide(m2[2 * W + s2])) as Real;
        out[3] = (wide(m1[3 * W + s1]) * wide(m2[3 * W + s2])) as Real;
    }

    fn states_partials(&self, s1: usize, m1: &[Real], m2: &[Real], p2: &[Real], out: &mut [Real]) {
        const W: usize = NucleotideKernel::WIDTH;
        out[0] = (wide(m1[s1]) * Self::dot(&m2[..W], p2)) as Real;
        out[1] = (wide(m1[W + s1]) * Self::dot(&m2[W..2 * W], p2)) as Real;
        out[2] = (wide(m1[2 * W + s1]) * Self::dot(&m2[2 * W..3 * W], p2)) as Real;
        out[3] = (wide(m1[3 * W + s1]) * Self::dot(&m2[3 * W..4 * W], p2)) as Real;
    }

    fn partials_partials(
        &self,
        m1: &[Real],
        p1: &[Real],
        m2: &[Real],
        p2: &[Real],
        out: &mut [Real],
    ) {
        const W: usize = NucleotideKernel::WIDTH;
        out[0] = (Self::dot(&m1[..W], p1) * Self::dot(&m2[..W], p2)) as Real;
        out[1] = (Self::dot(&m1[W..2 * W], p1) * Self::dot(&m2[W..2 * W], p2)) as Real;
        out[2] = (Self::dot(&m1[2 * W..3 * W], p1) * Self::dot(&m2[2 * W..3 * W], p2)) as Real;
        out[3] = (Self::dot(&m1[3 * W..4 * W], p1) * Self::dot(&m2[3 * W..4 * W], p2)) as Real;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Dims {
    pub n_states: usize,
    pub n_categories: usize,
    pub n_patterns: usize,
}

impl Dims {
    #[inline]
    pub fn matrix_len(&self) -> usize {
        (self.n_states + 1) * (self.n_states + 1)
    }

    #[inline]
    pub fn partials_offset(&self, combination: usize, category: usize) -> usize {
        (combination * self.n_categories + category) * self.n_states
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Job<'a> {
    StatesStates {
        left: &'a [u32],
        right: &'a [u32],
        m1: &'a [Real],
        m2: &'a [Real],
    },
    StatesPartials {
        left: &'a [u32],
        right: &'a [u32],
        m1: &'a [Real],
        m2: &'a [Real],
        p2: &'a [Real],
    },
    StatesPartialsDirect {
        states: &'a [u32],
        m1: &'a [Real],
        m2: &'a [Real],
        p2: &'a [Real],
    },
    PartialsPartials {
        left: &'a [u32],
        right: &'a [u32],
        m1: &'a [Real],
        p1: &'a [Real],
        m2: &'a [Real],
        p2: &'a [Real],
    },
    PartialsPartialsDirect {
        m1: &'a [Real],
        p1: &'a [Real],
        m2: &'a [Real],
        p2: &'a [Real],
    },
}

fn run<K: StateKernel>(k: &K, dims: &Dims, job: Job<'_>, out: &mut [Real]) {
    let n = dims.n_states;
    let ml = dims.matrix_len();
    let cats = dims.n_categories;
    match job {
        Job::StatesStates {
            left,
            right,
            m1,
            m2,
        } => {
            for (i, (&s1, &s2)) in left.iter().zip(right).enumerate() {
                for l in 0..cats {
                    let w = l * ml;
                    let u = dims.partials_offset(i, l);
                    k.states_states(
                        s1 as usize,
                        s2 as usize,
                        &m1[w..w + ml],
                        &m2[w..w + ml],
                        &mut out[u..u + n],
                    );
                }
            }
        }
        Job::StatesPartials {
            left,
            right,
            m1,
            m2,
            p2,
        } => {
            for (i, (&s1, &id2)) in left.iter().zip(right).enumerate() {
                for l in 0..cats {
                    let w = l * ml;
                    let v = dims.partials_offset(id2 as usize, l);
                    let u = dims.partials_offset(i, l);
                    k.states_partials(
                        s1 as usize,
                        &m1[w..w + ml],
                        &m2[w..w + ml],
                        &p2[v..v + n],
                        &mut out[u..u + n],
                    );
                }
            }
        }
        Job::StatesPartialsDirect { states, m1, m2, p2 } => {
            for (i, &s1) in states.iter().enumerate() {
                for l in 0..cats {
                    let w = l * ml;
                    let u = dims.partials_offset(i, l);
                    k.states_partials(
                        s1 as usize,
                        &m1[w..w + ml],
                        &m2[w..w + ml],
                        &p2[u..u + n],
                        &mut out[u..u + n],
                    );
                }
            }
        }
        Job::PartialsPartials {
            left,
            right,
            m1,
            p1,
            m2,
            p2,
        } => {
            for (i, (&id1, &id2)) in left.iter().zip(right).enumerate() {
                for l in 0..cats {
                    let w = l * ml;
                    let v1 = dims.partials_offset(id1 as usize, l);
                    let v2 = dims.partials_offset(id2 as usize, l);
                    let u = dims.partials_offset(i, l);
                    k.partials_partials(
                        &m1[w..w + ml],
                        &p1[v1..v1 + n],
                        &m2[w..w + ml],
                        &p2[v2..v2 + n],
                        &mut out[u..u + n],
                    );
                }
            }
        }
        Job::PartialsPartialsDirect { m1, p1, m2, p2 } => {
            for i in 0..dims.n_patterns {
                for l in 0..cats {
                    let w = l * ml;
                    let u = dims.partials_offset(i, l);
                    k.partials_partials(
                        &m1[w..w + ml],
                        &p1[u..u + n],
                        &m2[w..w + ml],
                        &p2[u..u + n],
                        &mut out[u..u + n],
                    );
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Kernel {
    Generic(GenericKernel),
    Nucleotide(NucleotideKernel),
}

impl Kernel {
    pub fn for_states(n_states: usize) -> Self {
        if n_states == 4 {
            Kernel::Nucleotide(NucleotideKernel)
        } else {
            Kernel::Generic(GenericKernel { n_states })
        }
    }

    pub fn execute(&self, dims: &Dims, job: Job<'_>, out: &mut [Real]) {
        match self {
            Kernel::Generic(k) => run(k, dims, job, out),
            Kernel::Nucleotide(k) => run(k, dims, job, out),
        }
    }
}

pub fn integrate_categories(
    dims: &Dims,
    pattern_ids: &[u32],
    partials: &[Real],
    proportions: &[f64],
    out: &mut [Real],
) {
    let n = dims.n_states;
    for (row, &id) in out.chunks_exact_mut(n).zip(pattern_ids) {
        for (i, o) in row.iter_mut().enumerate() {
            let mut acc = 0.0f64;
            for (l, &p) in proportions.iter().enumerate() {
                acc += wide(partials[dims.partials_offset(id as usize, l) + i]) * p;
            }
            *o = acc as Real;
        }
    }
}
