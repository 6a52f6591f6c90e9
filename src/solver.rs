// src/solver.rs
//!
//! Bisection Gauss-Seidel contact-impulse solver.
//!
//! ## Algorithm
//! - Block Gauss-Seidel sweeps over every non-skip primary contact, in
//!   detection order, holding the other contacts' impulses fixed.
//! - Per contact, the normal impulse is found by bisection on `[0, hi]` using
//!   the sign of the resulting normal velocity, measured against the
//!   contact's target velocity, as the test. The tangential
//!   impulse for a trial normal impulse is the sticking solution clipped to
//!   the friction cone `|λt| ≤ μ λn`.
//! - Sweeps stop once the largest per-contact impulse change drops below
//!   `sweep_tolerance`, or at `max_sweeps`. Hitting the cap is reported
//!   through [`SolverReport`], never as an error; the impulses found so far
//!   stay applied.
//!
//! The solver only writes impulses. Velocities are read and updated through
//! the [`ImpulseResponse`] seam so alternate dynamics backends plug in.

use crate::context::ensure;
use crate::contact::ContactRecord;
use crate::error::Result;
use crate::math::{DiagonalViews, Mat3, Real, Vec3, Views};
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// `Gnn` at or below this is treated as a contact the solver cannot move.
const DEGENERATE_RESPONSE: Real = 1e-12;
/// Bracket expansion limit when searching for a non-negative normal velocity.
const MAX_BRACKET_DOUBLINGS: usize = 60;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Coulomb coefficient μ (≥ 0).
    pub friction: Real,
    /// Width of the normal-impulse bracket at which bisection stops.
    pub bisection_tolerance: Real,
    /// Largest per-contact impulse change that still counts as converged.
    pub sweep_tolerance: Real,
    pub max_sweeps: usize,
    pub max_bisection_steps: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            friction: 0.8,
            bisection_tolerance: 1e-10,
            sweep_tolerance: 1e-9,
            max_sweeps: 20_000,
            max_bisection_steps: 64,
        }
    }
}

impl SolverConfig {
    pub fn with_friction(mut self, friction: Real) -> Self {
        self.friction = friction;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.friction.is_finite() && self.friction >= 0.0,
            "friction coefficient must be non-negative, got {}",
            self.friction
        );
        ensure!(self.bisection_tolerance > 0.0, "bisection tolerance must be positive");
        ensure!(self.sweep_tolerance > 0.0, "sweep tolerance must be positive");
        ensure!(self.max_sweeps >= 1, "max_sweeps must be at least 1");
        ensure!(self.max_bisection_steps >= 1, "max_bisection_steps must be at least 1");
        Ok(())
    }
}

/// Outcome of the last [`BisectionSolver::solve`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverReport {
    pub sweeps: usize,
    pub converged: bool,
    /// Largest per-contact impulse change in the final sweep.
    pub max_impulse_change: Real,
    pub active_contacts: usize,
    /// Contacts resolved without bisection (no inverse-inertia response).
    pub degenerate_contacts: usize,
    pub bisection_steps: usize,
}

// ============================================================================
// DYNAMICS SEAM
// ============================================================================

/// How impulses at a contact change the relative velocity there.
pub trait ImpulseResponse {
    /// Current velocity of the owner relative to the paired body at the
    /// contact point, in the record's contact frame.
    fn relative_velocity(&self, record: &ContactRecord) -> Vec3;

    /// Apply an additional contact-frame impulse to the owner and its reaction
    /// to the paired body.
    fn apply_impulse(&mut self, record: &ContactRecord, delta: &Vec3);

    /// Lowest normal velocity the contact has to reach. Zero for touching
    /// contacts; negative for an open gap the bodies may still close within
    /// the step.
    fn target_normal_velocity(&self, _record: &ContactRecord) -> Real {
        0.0
    }
}

// ============================================================================
// SINGLE CONTACT
// ============================================================================

/// One contact with every other impulse frozen: `v(λ) = v0 + G λ`.
struct ContactProblem<'a> {
    g: &'a Mat3,
    v0: Vec3,
    gtt_inv: Option<Matrix2<Real>>,
    gtn: Vector2<Real>,
    mu: Real,
}

impl<'a> ContactProblem<'a> {
    fn new(g: &'a Mat3, v0: Vec3, mu: Real) -> Result<Self> {
        let gtt = g.block_ref::<2, 2>(0, 0)?.to_matrix();
        let gtn = g.block_ref::<2, 1>(0, 2)?.to_matrix();
        Ok(Self { g, v0, gtt_inv: gtt.try_inverse(), gtn, mu })
    }

    /// Sticking tangential impulse for `ln`, projected onto the cone.
    fn tangential(&self, ln: Real) -> Vector2<Real> {
        let Some(gtt_inv) = self.gtt_inv else {
            return Vector2::zeros();
        };
        if self.mu == 0.0 {
            return Vector2::zeros();
        }
        let stick = -(gtt_inv * (self.v0.xy() + self.gtn * ln));
        let limit = self.mu * ln;
        let norm = stick.norm();
        if norm > limit {
            stick * (limit / norm)
        } else {
            stick
        }
    }

    fn impulse(&self, ln: Real) -> Vec3 {
        let lt = self.tangential(ln);
        Vec3::new(lt.x, lt.y, ln)
    }

    fn normal_velocity(&self, ln: Real) -> Result<Real> {
        let lambda = self.impulse(ln);
        Ok(self.v0.z + self.g.row_ref(2)?.dot(&lambda)?)
    }
}

// ============================================================================
// SOLVER
// ============================================================================

#[derive(Debug, Clone)]
pub struct BisectionSolver {
    config: SolverConfig,
    report: SolverReport,
}

impl BisectionSolver {
    pub fn new(config: SolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, report: SolverReport::default() })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Report from the most recent solve.
    pub fn report(&self) -> &SolverReport {
        &self.report
    }

    /// Solve every non-skip primary record in `records`, writing impulses in
    /// place and pushing the impulse deltas through `response`.
    #[tracing::instrument(level = "debug", skip_all, fields(records = records.len()))]
    pub fn solve<R>(&mut self, records: &mut [ContactRecord], response: &mut R) -> Result<&SolverReport>
    where
        R: ImpulseResponse + ?Sized,
    {
        let mut report = SolverReport {
            active_contacts: records.iter().filter(|r| r.is_first_body() && !r.skip()).count(),
            ..Default::default()
        };

        if report.active_contacts == 0 {
            report.converged = true;
            self.report = report;
            return Ok(&self.report);
        }

        for sweep in 1..=self.config.max_sweeps {
            let mut max_change: Real = 0.0;
            let mut degenerate = 0;

            for record in records.iter_mut().filter(|r| r.is_first_body() && !r.skip()) {
                let old = *record.impulse();
                let v = response.relative_velocity(record);
                let v0 = v - record.inverse_inertia() * old;
                let target = response.target_normal_velocity(record);

                let (new, outcome) = self.solve_contact(record.inverse_inertia(), v0, target)?;
                match outcome {
                    Outcome::Degenerate => degenerate += 1,
                    Outcome::Bisected(steps) => report.bisection_steps += steps,
                    Outcome::Separating => {}
                }

                let delta = new - old;
                if delta != Vec3::zeros() {
                    response.apply_impulse(record, &delta);
                    record.set_impulse(new);
                }
                max_change = max_change.max(delta.amax());
            }

            report.sweeps = sweep;
            report.max_impulse_change = max_change;
            report.degenerate_contacts = degenerate;
            if max_change < self.config.sweep_tolerance {
                report.converged = true;
                break;
            }
        }

        if report.converged {
            debug!(sweeps = report.sweeps, contacts = report.active_contacts, "contact solve converged");
        } else {
            warn!(
                sweeps = report.sweeps,
                residual = report.max_impulse_change,
                tolerance = self.config.sweep_tolerance,
                "contact solver hit its sweep cap; applying best available impulses"
            );
        }
        self.report = report;
        Ok(&self.report)
    }

    /// Impulse for one contact given its free velocity `v0` and the normal
    /// velocity it has to reach.
    fn solve_contact(&self, g: &Mat3, mut v0: Vec3, target: Real) -> Result<(Vec3, Outcome)> {
        let gnn = g.diag_ref().get(2)?;
        if gnn <= DEGENERATE_RESPONSE {
            return Ok((Vec3::zeros(), Outcome::Degenerate));
        }
        // Measure the normal velocity against the target from here on.
        v0.z -= target;
        if v0.z >= 0.0 {
            return Ok((Vec3::zeros(), Outcome::Separating));
        }

        let problem = ContactProblem::new(g, v0, self.config.friction)?;

        let mut lo = 0.0;
        let mut hi = -v0.z / gnn;
        for _ in 0..MAX_BRACKET_DOUBLINGS {
            if problem.normal_velocity(hi)? >= 0.0 {
                break;
            }
            lo = hi;
            hi *= 2.0;
        }

        let mut steps = 0;
        while hi - lo > self.config.bisection_tolerance && steps < self.config.max_bisection_steps {
            let mid = 0.5 * (lo + hi);
            if problem.normal_velocity(mid)? < 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
            steps += 1;
        }

        // Upper end keeps the normal velocity non-negative.
        Ok((problem.impulse(hi), Outcome::Bisected(steps)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// No inverse-inertia response along the normal; impulse stays zero.
    Degenerate,
    /// Free normal velocity already at or above the target.
    Separating,
    Bisected(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyType;
    use crate::contact::ContactDesc;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const EPS: Real = 1e-6;

    /// Contacts that do not influence each other: `v_i = free_i + G_i λ_i`.
    struct Isolated {
        free: Vec<Vec3>,
        applied: Vec<Vec3>,
    }

    impl ImpulseResponse for Isolated {
        fn relative_velocity(&self, record: &ContactRecord) -> Vec3 {
            let k = record.contact_problem_index();
            self.free[k] + record.inverse_inertia() * self.applied[k]
        }

        fn apply_impulse(&mut self, record: &ContactRecord, delta: &Vec3) {
            self.applied[record.contact_problem_index()] += delta;
        }
    }

    impl Isolated {
        fn velocity(&self, record: &ContactRecord) -> Vec3 {
            self.relative_velocity(record)
        }
    }

    fn record(k: usize, g: Mat3) -> ContactRecord {
        let mut r = ContactRecord::new(
            ContactDesc {
                position: Vec3::zeros(),
                normal: Vec3::z(),
                depth: 0.01,
                is_first_body: true,
                contact_problem_index: k,
                owner_body_index: k + 1,
                paired_body_index: 0,
                paired_body_type: BodyType::Static,
                local_body_index: 0,
                self_collision: false,
            },
            0,
        )
        .unwrap();
        r.set_inverse_inertia(g);
        r
    }

    /// Diagonally dominant PSD operator.
    fn random_operator(rng: &mut StdRng) -> Mat3 {
        let b = Mat3::from_fn(|_, _| rng.gen_range(-1.0..1.0));
        Mat3::identity() * rng.gen_range(0.5..2.0) + b * b.transpose() * 0.1
    }

    fn random_set(seed: u64, n: usize) -> (Vec<ContactRecord>, Isolated) {
        let mut rng = StdRng::seed_from_u64(seed);
        let records = (0..n).map(|k| record(k, random_operator(&mut rng))).collect();
        let free = (0..n)
            .map(|_| Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-2.0..1.0)))
            .collect();
        (records, Isolated { free, applied: vec![Vec3::zeros(); n] })
    }

    #[test]
    fn config_validation() {
        assert!(SolverConfig::default().validate().is_ok());
        let err = BisectionSolver::new(SolverConfig::default().with_friction(-0.1)).unwrap_err();
        assert!(err.is_config());
        let zero_cap = SolverConfig { max_sweeps: 0, ..Default::default() };
        assert!(zero_cap.validate().is_err());
    }

    #[test]
    fn random_sets_satisfy_contact_conditions() {
        for seed in 0..20 {
            let mu = 0.05 * seed as Real;
            let mut solver = BisectionSolver::new(SolverConfig::default().with_friction(mu)).unwrap();
            let (mut records, mut response) = random_set(seed, 12);
            let report = *solver.solve(&mut records, &mut response).unwrap();
            assert!(report.converged, "seed {seed}: {report:?}");

            for r in &records {
                let v = response.velocity(r);
                let l = r.impulse();
                assert!(v.z >= -EPS, "seed {seed}: penetrating velocity {}", v.z);
                assert!(l.z >= 0.0);
                assert!(l.xy().norm() <= mu * l.z + 1e-12, "seed {seed}: outside friction cone");
                if v.z > EPS {
                    assert!(l.norm() <= EPS, "seed {seed}: separating contact carries {l}");
                }
            }
        }
    }

    #[test]
    fn skipped_records_stay_zero() {
        let mut solver = BisectionSolver::new(SolverConfig::default()).unwrap();
        let (mut records, mut response) = random_set(42, 6);
        for r in records.iter_mut().step_by(2) {
            r.mark_skip();
        }
        solver.solve(&mut records, &mut response).unwrap();
        for r in records.iter().step_by(2) {
            assert_eq!(*r.impulse(), Vec3::zeros());
        }
        assert_eq!(solver.report().active_contacts, 3);
    }

    #[test]
    fn frictionless_impulse_cancels_approach() {
        let mut solver = BisectionSolver::new(SolverConfig::default().with_friction(0.0)).unwrap();
        let g = Mat3::from_diagonal(&Vec3::new(1.0, 1.0, 2.0));
        let mut records = vec![record(0, g)];
        let mut response = Isolated { free: vec![Vec3::new(0.5, 0.0, -1.0)], applied: vec![Vec3::zeros()] };
        solver.solve(&mut records, &mut response).unwrap();
        let l = records[0].impulse();
        assert!((l.z - 0.5).abs() < 1e-9);
        assert_eq!(l.x, 0.0);
    }

    #[test]
    fn sliding_contact_sits_on_cone_edge() {
        let mut solver = BisectionSolver::new(SolverConfig::default().with_friction(0.2)).unwrap();
        let mut records = vec![record(0, Mat3::identity())];
        let mut response = Isolated { free: vec![Vec3::new(3.0, 0.0, -1.0)], applied: vec![Vec3::zeros()] };
        solver.solve(&mut records, &mut response).unwrap();
        let l = records[0].impulse();
        assert!((l.z - 1.0).abs() < 1e-9);
        assert!((l.x + 0.2).abs() < 1e-9);
    }

    #[test]
    fn degenerate_and_separating_contacts() {
        let mut solver = BisectionSolver::new(SolverConfig::default()).unwrap();
        let mut records = vec![record(0, Mat3::zeros()), record(1, Mat3::identity())];
        let mut response = Isolated {
            free: vec![Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 0.0, 0.5)],
            applied: vec![Vec3::zeros(); 2],
        };
        let report = *solver.solve(&mut records, &mut response).unwrap();
        assert!(report.converged);
        assert_eq!(report.sweeps, 1);
        assert_eq!(report.degenerate_contacts, 1);
        assert_eq!(*records[0].impulse(), Vec3::zeros());
        assert_eq!(*records[1].impulse(), Vec3::zeros());
    }

    /// Isolated contacts with a per-contact target normal velocity.
    struct Gapped {
        inner: Isolated,
        targets: Vec<Real>,
    }

    impl ImpulseResponse for Gapped {
        fn relative_velocity(&self, record: &ContactRecord) -> Vec3 {
            self.inner.relative_velocity(record)
        }

        fn apply_impulse(&mut self, record: &ContactRecord, delta: &Vec3) {
            self.inner.apply_impulse(record, delta)
        }

        fn target_normal_velocity(&self, record: &ContactRecord) -> Real {
            self.targets[record.contact_problem_index()]
        }
    }

    #[test]
    fn open_gap_only_limits_overshoot() {
        let mut solver = BisectionSolver::new(SolverConfig::default().with_friction(0.5)).unwrap();
        let mut records = vec![record(0, Mat3::identity()), record(1, Mat3::identity())];
        // Both gaps allow -2 m/s; the first approaches slower, the second faster.
        let mut response = Gapped {
            inner: Isolated {
                free: vec![Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 0.0, -3.0)],
                applied: vec![Vec3::zeros(); 2],
            },
            targets: vec![-2.0, -2.0],
        };
        let report = *solver.solve(&mut records, &mut response).unwrap();
        assert!(report.converged);

        assert_eq!(*records[0].impulse(), Vec3::zeros());
        assert!((records[1].impulse().z - 1.0).abs() < 1e-9);
        let v = response.relative_velocity(&records[1]);
        assert!(v.z >= -2.0 - EPS && v.z <= -2.0 + EPS);
    }

    /// Two contacts pushing against each other through a shared coupling.
    struct Coupled {
        free: [Vec3; 2],
        applied: [Vec3; 2],
    }

    impl ImpulseResponse for Coupled {
        fn relative_velocity(&self, record: &ContactRecord) -> Vec3 {
            let k = record.contact_problem_index();
            self.free[k] + self.applied[k] + self.applied[1 - k] * 0.9
        }

        fn apply_impulse(&mut self, record: &ContactRecord, delta: &Vec3) {
            self.applied[record.contact_problem_index()] += delta;
        }
    }

    #[test]
    fn sweep_cap_is_reported_not_fatal() {
        let config = SolverConfig { max_sweeps: 2, friction: 0.0, ..Default::default() };
        let mut solver = BisectionSolver::new(config).unwrap();
        let mut records = vec![record(0, Mat3::identity()), record(1, Mat3::identity())];
        let mut response = Coupled { free: [Vec3::new(0.0, 0.0, -1.0); 2], applied: [Vec3::zeros(); 2] };
        let report = *solver.solve(&mut records, &mut response).unwrap();
        assert!(!report.converged);
        assert_eq!(report.sweeps, 2);
        assert!(records.iter().all(|r| r.impulse().z > 0.0));
    }
}
