// src/dynamics.rs
//!
//! Unconstrained rigid-body dynamics consumed by the contact solver.
//!
//! - Effective inverse inertia per contact: how an impulse at the contact
//!   point changes the relative velocity there, `W = Σ (m⁻¹ E − [r]× I⁻¹ [r]×)`
//!   over the dynamic bodies of the pair, expressed in the contact frame.
//! - [`BodyImpulseResponse`]: the [`ImpulseResponse`] the world hands the
//!   solver, applying impulses straight to body velocities.
//! - Semi-implicit Euler: external forces into velocity first, contact
//!   impulses next, then poses from the updated velocities.

use crate::body::{BodyIndex, BodyType, RigidBody};
use crate::contact::ContactRecord;
use crate::math::{skew, Mat3, Quat, Real, Vec3};
use crate::solver::ImpulseResponse;

/// Velocity change at `point` per unit impulse applied at `point`, world frame.
pub fn point_response(body: &RigidBody, point: &Vec3) -> Mat3 {
    if !body.body_type.is_dynamic() {
        return Mat3::zeros();
    }
    let r = skew(&(point - body.state.position));
    Mat3::identity() * body.mass.inv_mass - r * body.inverse_inertia_world() * r
}

/// Relative-velocity response of a record's body pair, world frame. Zero when
/// both sides are the same body.
pub fn pair_response(bodies: &[RigidBody], record: &ContactRecord) -> Mat3 {
    let (owner, paired) = (record.owner_body_index(), record.paired_body_index());
    if owner == paired {
        return Mat3::zeros();
    }
    let point = record.position();
    let side = |index: BodyIndex| bodies.get(index).map_or_else(Mat3::zeros, |b| point_response(b, point));
    side(owner) + side(paired)
}

/// Store `F W Fᵀ` on every record the solver will visit.
pub fn assign_inverse_inertia(records: &mut [ContactRecord], bodies: &[RigidBody]) {
    for record in records.iter_mut().filter(|r| r.is_first_body() && !r.skip()) {
        let frame = record.contact_frame();
        let g = frame * pair_response(bodies, record) * frame.transpose();
        record.set_inverse_inertia(g);
    }
}

/// Gravity into the free velocity of every dynamic body.
pub fn apply_external_forces(bodies: &mut [RigidBody], gravity: &Vec3, dt: Real) {
    for body in bodies.iter_mut().filter(|b| b.body_type.is_dynamic()) {
        body.state.linear_velocity += gravity * dt;
    }
}

/// Advance poses of every non-static body from its current velocity.
pub fn integrate_poses(bodies: &mut [RigidBody], dt: Real) {
    for body in bodies.iter_mut() {
        if body.body_type == BodyType::Static {
            continue;
        }
        let state = &mut body.state;
        state.position += state.linear_velocity * dt;
        state.orientation = Quat::from_scaled_axis(state.angular_velocity * dt) * state.orientation;
    }
}

/// Two distinct bodies borrowed mutably at once.
fn pair_mut(bodies: &mut [RigidBody], a: BodyIndex, b: BodyIndex) -> Option<(&mut RigidBody, &mut RigidBody)> {
    if a == b || a >= bodies.len() || b >= bodies.len() {
        return None;
    }
    if a < b {
        let (lo, hi) = bodies.split_at_mut(b);
        Some((&mut lo[a], &mut hi[0]))
    } else {
        let (lo, hi) = bodies.split_at_mut(a);
        Some((&mut hi[0], &mut lo[b]))
    }
}

/// Impulses act directly on the world's body velocities.
///
/// A record with negative depth is an open gap: its normal velocity may stay
/// as low as `depth / time_step`, which closes the gap by the end of the step.
pub struct BodyImpulseResponse<'a> {
    bodies: &'a mut [RigidBody],
    time_step: Real,
}

impl<'a> BodyImpulseResponse<'a> {
    pub fn new(bodies: &'a mut [RigidBody], time_step: Real) -> Self {
        Self { bodies, time_step }
    }
}

impl ImpulseResponse for BodyImpulseResponse<'_> {
    fn relative_velocity(&self, record: &ContactRecord) -> Vec3 {
        let (owner, paired) = (record.owner_body_index(), record.paired_body_index());
        if owner == paired {
            return Vec3::zeros();
        }
        let point = record.position();
        let velocity = |index: BodyIndex| self.bodies.get(index).map_or_else(Vec3::zeros, |b| b.velocity_at(point));
        record.contact_frame() * (velocity(owner) - velocity(paired))
    }

    fn apply_impulse(&mut self, record: &ContactRecord, delta: &Vec3) {
        let Some((owner, paired)) = pair_mut(&mut *self.bodies, record.owner_body_index(), record.paired_body_index()) else {
            return;
        };
        let world = record.contact_frame().transpose() * delta;
        owner.apply_impulse_at(record.position(), &world);
        paired.apply_impulse_at(record.position(), &-world);
    }

    fn target_normal_velocity(&self, record: &ContactRecord) -> Real {
        if record.depth() < 0.0 && self.time_step > 0.0 {
            record.depth() / self.time_step
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Shape;
    use crate::contact::ContactDesc;
    use crate::collision::{AnalyticCollider, CollisionLayer};
    use crate::contact::ContactBuffer;
    use crate::solver::{BisectionSolver, SolverConfig};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const DT: Real = 1e-3;
    const EPS: Real = 1e-6;

    fn ball(z: Real) -> RigidBody {
        RigidBody::primitive("ball", Shape::Sphere { radius: 0.5 }, 2.0)
            .unwrap()
            .with_position(Vec3::new(0.0, 0.0, z))
    }

    fn contact(owner: BodyIndex, paired: BodyIndex, position: Vec3, normal: Vec3) -> ContactRecord {
        ContactRecord::new(
            ContactDesc {
                position,
                normal,
                depth: 0.0,
                is_first_body: true,
                contact_problem_index: 0,
                owner_body_index: owner,
                paired_body_index: paired,
                paired_body_type: BodyType::Static,
                local_body_index: 0,
                self_collision: false,
            },
            0,
        )
        .unwrap()
    }

    #[test]
    fn response_matches_applied_impulse() {
        let mut bodies = vec![RigidBody::ground(0.0), ball(0.5)];
        bodies[1].state.orientation = Quat::from_euler_angles(0.3, -0.2, 0.7);
        let record = contact(1, 0, Vec3::new(0.1, 0.2, 0.0), Vec3::z());
        let predicted = record.contact_frame() * pair_response(&bodies, &record) * record.contact_frame().transpose();

        let mut response = BodyImpulseResponse::new(&mut bodies, DT);
        let before = response.relative_velocity(&record);
        let impulse = Vec3::new(0.3, -0.1, 1.0);
        response.apply_impulse(&record, &impulse);
        let after = response.relative_velocity(&record);
        assert!((after - before - predicted * impulse).norm() < 1e-12);
    }

    #[test]
    fn response_is_symmetric_psd() {
        let bodies = vec![ball(0.0), ball(1.0)];
        let record = contact(0, 1, Vec3::new(0.2, 0.1, 0.5), Vec3::z());
        let w = pair_response(&bodies, &record);
        assert!((w - w.transpose()).norm() < 1e-12);
        assert!(nalgebra::SymmetricEigen::new(w).eigenvalues.iter().all(|&l| l > 0.0));
        assert_eq!(pair_response(&bodies, &contact(1, 1, Vec3::zeros(), Vec3::z())), Mat3::zeros());
    }

    #[test]
    fn falling_ball_stops_on_ground() {
        let mut bodies = vec![RigidBody::ground(0.0), ball(0.5)];
        bodies[1].state.linear_velocity = Vec3::new(0.4, 0.0, -3.0);
        let mut records = vec![contact(1, 0, Vec3::zeros(), Vec3::z())];
        assign_inverse_inertia(&mut records, &bodies);

        let mut solver = BisectionSolver::new(SolverConfig::default().with_friction(0.5)).unwrap();
        let report = *solver.solve(&mut records, &mut BodyImpulseResponse::new(&mut bodies, DT)).unwrap();
        assert!(report.converged);

        let v = bodies[1].velocity_at(&Vec3::zeros());
        assert!(v.z.abs() < 1e-6);
        let l = records[0].impulse();
        assert!(l.xy().norm() <= 0.5 * l.z + 1e-12);
        assert_eq!(bodies[0].state.linear_velocity, Vec3::zeros());
    }

    #[test]
    fn integration_moves_dynamic_and_kinematic_only() {
        let mut platform = ball(0.0);
        platform.body_type = BodyType::Kinematic;
        platform.state.linear_velocity = Vec3::x();
        let mut spinner = ball(2.0);
        spinner.state.angular_velocity = Vec3::new(0.0, 0.0, std::f64::consts::PI);
        let mut bodies = vec![RigidBody::ground(0.0), platform, spinner];

        apply_external_forces(&mut bodies, &Vec3::new(0.0, 0.0, -10.0), 0.1);
        integrate_poses(&mut bodies, 0.5);
        assert_eq!(bodies[0].state.position, Vec3::zeros());
        assert_eq!(bodies[1].state.position, Vec3::new(0.5, 0.0, 0.0));
        assert!((bodies[2].state.position.z - 1.5).abs() < 1e-12);
        assert!((bodies[2].state.orientation.angle() - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn open_gap_target_follows_depth() {
        let mut bodies = vec![RigidBody::ground(0.0), ball(0.6)];
        let touching = contact(1, 0, Vec3::zeros(), Vec3::z());
        let gap = ContactRecord::new(
            ContactDesc {
                position: Vec3::new(0.0, 0.0, 0.1),
                normal: Vec3::z(),
                depth: -0.1,
                is_first_body: true,
                contact_problem_index: 0,
                owner_body_index: 1,
                paired_body_index: 0,
                paired_body_type: BodyType::Static,
                local_body_index: 0,
                self_collision: false,
            },
            0,
        )
        .unwrap();
        let response = BodyImpulseResponse::new(&mut bodies, 0.01);
        assert!((response.target_normal_velocity(&gap) + 10.0).abs() < 1e-12);
        assert_eq!(response.target_normal_velocity(&touching), 0.0);
    }

    /// Box resting on or just above the ground, tilted and moving.
    fn tilted_box(rng: &mut StdRng) -> RigidBody {
        let mut body = RigidBody::primitive("box", Shape::Box { half_extents: Vec3::new(0.5, 0.3, 0.2) }, 2.0).unwrap();
        let orientation = Quat::from_euler_angles(
            rng.gen_range(-0.1..0.1),
            rng.gen_range(-0.1..0.1),
            rng.gen_range(-3.0..3.0),
        );
        let mut lowest = Real::INFINITY;
        for sx in [-0.5, 0.5] {
            for sy in [-0.3, 0.3] {
                for sz in [-0.2, 0.2] {
                    lowest = lowest.min((orientation * Vec3::new(sx, sy, sz)).z);
                }
            }
        }
        let depth = rng.gen_range(0.0..0.02);
        body.state.orientation = orientation;
        body.state.position = Vec3::new(0.0, 0.0, -lowest - depth);
        body.state.linear_velocity =
            Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-2.0..0.0));
        body.state.angular_velocity = Vec3::from_fn(|_, _| rng.gen_range(-2.0..2.0));
        body
    }

    #[test]
    fn coupled_box_contacts_satisfy_contact_conditions() {
        let gravity = Vec3::new(0.0, 0.0, -9.81);
        let mut converged = 0;
        let mut coupled = 0;

        for seed in 0..40u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mu = 0.025 * seed as Real;
            let mut bodies = vec![RigidBody::ground(0.0), tilted_box(&mut rng)];

            let mut candidates = Vec::new();
            AnalyticCollider::new(0.05).detect(&bodies, &mut candidates).unwrap();
            let mut buffer = ContactBuffer::with_capacity(16);
            buffer.rebuild(&candidates, &bodies).unwrap();
            apply_external_forces(&mut bodies, &gravity, DT);
            assign_inverse_inertia(buffer.records_mut(), &bodies);

            let mut solver = BisectionSolver::new(SolverConfig::default().with_friction(mu)).unwrap();
            let mut response = BodyImpulseResponse::new(&mut bodies, DT);
            let report = *solver.solve(buffer.records_mut(), &mut response).unwrap();
            if report.active_contacts >= 2 {
                coupled += 1;
            }
            if !report.converged {
                continue;
            }
            converged += 1;

            for record in buffer.active() {
                let target = response.target_normal_velocity(record);
                let v = response.relative_velocity(record);
                let l = record.impulse();
                assert!(v.z >= target - EPS, "seed {seed}: normal velocity {} below {target}", v.z);
                assert!(l.z >= 0.0, "seed {seed}: pulling impulse {}", l.z);
                assert!(l.xy().norm() <= mu * l.z + 1e-12, "seed {seed}: outside friction cone");
                if v.z > target + EPS {
                    assert!(l.norm() <= EPS, "seed {seed}: separating contact carries {l}");
                }
            }
        }
        assert!(coupled > 0);
        assert!(converged > 0);
    }
}
