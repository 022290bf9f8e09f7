use beer_rs::{CoreConfig, LikelihoodCore, Real};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const N_STATES: usize = 4;
const N_CATS: usize = 2;
const N_PATTERNS: usize = 30;
const N_NODES: usize = 9;
const PROPORTIONS: [f64; N_CATS] = [0.3, 0.7];
const ROOT: usize = 8;
// ((0,1)5,(2,3)6)7 then (7,4)8
const OPS: [[usize; 3]; 4] = [[0, 1, 5], [2, 3, 6], [5, 6, 7], [7, 4, 8]];

fn parent_of(node: usize) -> Option<usize> {
    OPS.iter()
        .find(|op| op[0] == node || op[1] == node)
        .map(|op| op[2])
}

fn children_of(node: usize) -> (usize, usize) {
    let op = OPS
        .iter()
        .find(|op| op[2] == node)
        .expect("node is not a parent");
    (op[0], op[1])
}

fn random_matrix(rng: &mut SmallRng) -> Vec<f64> {
    let mut m: Vec<f64> = (0..N_STATES * N_STATES)
        .map(|_| rng.gen_range(0.05..1.0))
        .collect();
    for row in m.chunks_exact_mut(N_STATES) {
        let total: f64 = row.iter().sum();
        row.iter_mut().for_each(|v| *v /= total);
    }
    m
}

struct Fixture {
    tips: Vec<Vec<u32>>,
    // node -> category -> matrix
    matrices: Vec<Vec<Vec<f64>>>,
}

impl Fixture {
    fn random(rng: &mut SmallRng) -> Self {
        let tips = (0..5)
            .map(|_| (0..N_PATTERNS).map(|_| rng.gen_range(0..5)).collect())
            .collect();
        let matrices = (0..N_NODES)
            .map(|_| (0..N_CATS).map(|_| random_matrix(rng)).collect())
            .collect();
        Self { tips, matrices }
    }

    fn core(&self) -> LikelihoodCore {
        let config = CoreConfig::new(N_STATES, N_NODES, N_PATTERNS, N_CATS);
        let mut core = LikelihoodCore::new(config).expect("failed to create core");
        for (tip, states) in self.tips.iter().enumerate() {
            core.set_tip_states(tip, states).expect("failed to set tips");
        }
        for &[_, _, p] in &OPS {
            core.allocate_partials(p).expect("failed to allocate");
        }
        for (node, cats) in self.matrices.iter().enumerate() {
            for (l, m) in cats.iter().enumerate() {
                core.set_matrix(node, l, m).expect("failed to set matrix");
            }
        }
        for &[c1, c2, p] in &OPS {
            core.request(c1, c2, p).expect("failed to request");
        }
        core
    }
}

fn integrate(core: &mut LikelihoodCore) -> Vec<Real> {
    let mut out = vec![0.0; N_PATTERNS * N_STATES];
    core.integrate(ROOT, &PROPORTIONS, &mut out)
        .expect("failed to integrate");
    out
}

/// New matrices above `node`, then recompute the path to the root.
fn perturb(core: &mut LikelihoodCore, rng: &mut SmallRng, node: usize) {
    core.mark_matrix_update(node).expect("failed to mark matrix");
    for l in 0..N_CATS {
        let m = random_matrix(rng);
        core.set_matrix(node, l, &m).expect("failed to set matrix");
    }
    let mut ancestor = parent_of(node);
    while let Some(p) = ancestor {
        core.mark_partials_update(p).expect("failed to mark partials");
        let (c1, c2) = children_of(p);
        core.request(c1, c2, p).expect("failed to request");
        ancestor = parent_of(p);
    }
}

#[test]
fn restore_undoes_any_sequence_of_rejected_proposals() {
    let mut rng = SmallRng::seed_from_u64(17);
    let mut core = Fixture::random(&mut rng).core();
    let baseline = integrate(&mut core);

    for _ in 0..40 {
        let node = rng.gen_range(0..ROOT);
        core.store();
        perturb(&mut core, &mut rng, node);
        let moved = integrate(&mut core);
        assert_ne!(moved, baseline);
        core.restore();
        assert_eq!(integrate(&mut core), baseline);
    }
}

#[test]
fn accepted_proposal_becomes_the_new_restore_point() {
    let mut rng = SmallRng::seed_from_u64(29);
    let mut core = Fixture::random(&mut rng).core();

    core.store();
    perturb(&mut core, &mut rng, 2);
    let accepted = integrate(&mut core);

    core.store();
    perturb(&mut core, &mut rng, 4);
    perturb(&mut core, &mut rng, 0);
    integrate(&mut core);
    core.restore();
    assert_eq!(integrate(&mut core), accepted);
}

#[test]
fn unstore_returns_to_the_stored_generation() {
    let mut rng = SmallRng::seed_from_u64(31);
    let mut core = Fixture::random(&mut rng).core();
    let baseline = integrate(&mut core);

    core.store();
    perturb(&mut core, &mut rng, 6);
    integrate(&mut core);
    core.unstore();
    assert_eq!(integrate(&mut core), baseline);
}

#[test]
fn restore_twice_swaps_back_to_the_proposal() {
    let mut rng = SmallRng::seed_from_u64(37);
    let mut core = Fixture::random(&mut rng).core();
    let baseline = integrate(&mut core);

    core.store();
    perturb(&mut core, &mut rng, 1);
    let moved = integrate(&mut core);
    core.restore();
    assert_eq!(integrate(&mut core), baseline);
    core.restore();
    assert_eq!(integrate(&mut core), moved);
}

#[test]
fn state_update_rebuilds_indices_for_new_tip_data() {
    let mut rng = SmallRng::seed_from_u64(41);
    let mut fixture = Fixture::random(&mut rng);
    let mut core = fixture.core();
    integrate(&mut core);

    // tip 0 now copies tip 1, so node 5 has one combination per distinct state
    fixture.tips[0] = fixture.tips[1].clone();
    core.set_tip_states(0, &fixture.tips[0])
        .expect("failed to set tips");
    let mut node = 5;
    loop {
        core.mark_state_update(node).expect("failed to mark states");
        core.mark_partials_update(node).expect("failed to mark partials");
        let (c1, c2) = children_of(node);
        core.request(c1, c2, node).expect("failed to request");
        match parent_of(node) {
            Some(p) => node = p,
            None => break,
        }
    }
    let updated = integrate(&mut core);

    let mut distinct = fixture.tips[1].clone();
    distinct.sort_unstable();
    distinct.dedup();
    assert_eq!(core.distinct_count(5), Some(distinct.len()));

    let mut fresh = fixture.core();
    assert_eq!(integrate(&mut fresh), updated);
}

#[test]
fn stale_partials_are_reported_instead_of_read() {
    let mut rng = SmallRng::seed_from_u64(43);
    let mut core = Fixture::random(&mut rng).core();
    integrate(&mut core);

    core.mark_partials_update(6).expect("failed to mark partials");
    core.mark_partials_update(7).expect("failed to mark partials");
    core.request(5, 6, 7).expect("failed to request");
    let mut out = vec![0.0; N_PATTERNS * N_STATES];
    let err = core
        .integrate(7, &PROPORTIONS, &mut out)
        .expect_err("node 6 was never recomputed");
    assert!(err.to_string().contains("never recomputed"));
    assert_eq!(core.pending(), 0);
}
