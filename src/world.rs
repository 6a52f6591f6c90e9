// src/world.rs
//!
//! The world stepper.
//!
//! Every call to [`World::step`] runs one pass of
//! `CollisionDetect → BuildContacts → Solve → Integrate → Publish`; the next
//! step's detection only starts after the previous publish returned.
//!
//! Everything up to `Publish` works on state owned by the world and takes no
//! lock. `Publish` captures a [`WorldSnapshot`] first and only then hands it
//! to the attached [`SnapshotChannel`], whose lock covers a single `Arc` swap.

use crate::body::{BodyIndex, BodyType, Geometry, MassProperties, RigidBody, Shape};
use crate::clock::StepClock;
use crate::collision::{AnalyticCollider, CollisionLayer, ContactCandidate};
use crate::compound::{CompoundBuilder, CompoundObjectChild};
use crate::contact::{BuildStats, ContactBuffer, ContactList};
use crate::context::{ensure, Context};
use crate::dynamics::{self, BodyImpulseResponse};
use crate::error::{Error, Result};
use crate::math::{Mat3, Real, Vec3};
use crate::snapshot::{SnapshotChannel, WorldSnapshot};
use crate::solver::{BisectionSolver, SolverConfig, SolverReport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug_span, trace};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Seconds of simulated time per step.
    pub time_step: Real,
    pub gravity: Vec3,
    pub solver: SolverConfig,
    /// Contact records the buffer is sized for up front (two per candidate).
    pub contact_capacity: usize,
    /// Self-collision flag given to bodies created through `add_*`.
    pub default_self_collision: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            time_step: 1e-3,
            gravity: Vec3::new(0.0, 0.0, -9.81),
            solver: SolverConfig::default(),
            contact_capacity: 1024,
            default_self_collision: false,
        }
    }
}

impl WorldConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.time_step.is_finite() && self.time_step > 0.0,
            "time step must be positive, got {}",
            self.time_step
        );
        ensure!(self.gravity.iter().all(|g| g.is_finite()), "gravity must be finite");
        ensure!(self.contact_capacity > 0, "contact capacity must be positive");
        self.solver.validate()
    }

    /// Parse and validate. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ============================================================================
// PHASES & METRICS
// ============================================================================

/// One stage of a world step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepPhase {
    CollisionDetect,
    BuildContacts,
    Solve,
    Integrate,
    Publish,
}

impl StepPhase {
    pub const ORDER: [StepPhase; 5] =
        [Self::CollisionDetect, Self::BuildContacts, Self::Solve, Self::Integrate, Self::Publish];

    pub fn name(self) -> &'static str {
        match self {
            Self::CollisionDetect => "CollisionDetect",
            Self::BuildContacts => "BuildContacts",
            Self::Solve => "Solve",
            Self::Integrate => "Integrate",
            Self::Publish => "Publish",
        }
    }

    fn span(self) -> tracing::span::EnteredSpan {
        debug_span!("phase", name = self.name()).entered()
    }
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-step statistics, refreshed at the end of every step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    pub step: u64,
    pub last_step_time_ms: f64,
    pub average_step_time_ms: f64,
    pub max_step_time_ms: f64,
    /// Candidates reported by the collision layer.
    pub candidate_count: usize,
    /// Records built (primary and mirror).
    pub contact_count: usize,
    pub skipped_contacts: usize,
    /// Primaries the solver visited.
    pub active_contacts: usize,
    pub solver_sweeps: usize,
    pub solver_converged: bool,
    /// Whether the snapshot reached a live channel.
    pub published: bool,
}

// ============================================================================
// WORLD
// ============================================================================

pub struct World {
    config: WorldConfig,
    bodies: Vec<RigidBody>,
    collision: Box<dyn CollisionLayer>,
    candidates: Vec<ContactCandidate>,
    contacts: ContactBuffer,
    solver: BisectionSolver,
    clock: StepClock,
    metrics: StepMetrics,
    publisher: Option<Arc<SnapshotChannel>>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("bodies", &self.bodies.len())
            .field("step", &self.clock.step())
            .field("contacts", &self.contacts.len())
            .field("publishing", &self.publisher.is_some())
            .finish()
    }
}

impl World {
    /// Empty world using the built-in [`AnalyticCollider`].
    pub fn new(config: WorldConfig) -> Result<Self> {
        config.validate()?;
        let solver = BisectionSolver::new(config.solver.clone())?;
        Ok(Self {
            bodies: Vec::new(),
            collision: Box::new(AnalyticCollider::new(0.0)),
            candidates: Vec::with_capacity(config.contact_capacity / 2),
            contacts: ContactBuffer::with_capacity(config.contact_capacity),
            solver,
            clock: StepClock::new(config.time_step),
            metrics: StepMetrics::default(),
            publisher: None,
            config,
        })
    }

    /// Replace the collision layer.
    pub fn with_collision_layer(mut self, layer: Box<dyn CollisionLayer>) -> Self {
        self.collision = layer;
        self
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Bodies
    // ------------------------------------------------------------------------

    /// Insert a fully built body as is.
    pub fn add_body(&mut self, body: RigidBody) -> BodyIndex {
        self.bodies.push(body);
        self.bodies.len() - 1
    }

    pub fn add_ground(&mut self, height: Real) -> BodyIndex {
        self.add_body(RigidBody::ground(height))
    }

    fn add_primitive(&mut self, name: &str, shape: Shape, mass: Real, position: Vec3) -> Result<BodyIndex> {
        let mut body = RigidBody::primitive(name, shape, mass)
            .with_context(|| format!("body `{name}`"))?
            .with_position(position);
        body.self_collision = self.config.default_self_collision;
        Ok(self.add_body(body))
    }

    pub fn add_sphere(&mut self, name: &str, radius: Real, mass: Real, position: Vec3) -> Result<BodyIndex> {
        self.add_primitive(name, Shape::Sphere { radius }, mass, position)
    }

    pub fn add_box(&mut self, name: &str, half_extents: Vec3, mass: Real, position: Vec3) -> Result<BodyIndex> {
        self.add_primitive(name, Shape::Box { half_extents }, mass, position)
    }

    pub fn add_capsule(
        &mut self,
        name: &str,
        radius: Real,
        height: Real,
        mass: Real,
        position: Vec3,
    ) -> Result<BodyIndex> {
        self.add_primitive(name, Shape::Capsule { radius, height }, mass, position)
    }

    pub fn add_cylinder(
        &mut self,
        name: &str,
        radius: Real,
        height: Real,
        mass: Real,
        position: Vec3,
    ) -> Result<BodyIndex> {
        self.add_primitive(name, Shape::Cylinder { radius, height }, mass, position)
    }

    /// Assemble a compound with uniform child masses and composed inertia.
    pub fn add_compound(
        &mut self,
        name: &str,
        children: Vec<CompoundObjectChild>,
        mass: Real,
        base_position: Vec3,
        base_inertia: Mat3,
    ) -> Result<BodyIndex> {
        self.add_compound_with(name, CompoundBuilder::new(children, mass, base_position, base_inertia))
    }

    /// Assemble a compound from a configured builder.
    pub fn add_compound_with(&mut self, name: &str, builder: CompoundBuilder) -> Result<BodyIndex> {
        let compound = builder.build().with_context(|| format!("compound `{name}`"))?;
        let mut body = RigidBody::new(
            name,
            BodyType::Dynamic,
            compound.mass_properties()?,
            Geometry::Compound { children: compound.shared_children(), center_of_mass: *compound.center_of_mass() },
        );
        body.state = *compound.state();
        body.self_collision = self.config.default_self_collision;
        Ok(self.add_body(body))
    }

    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    pub fn bodies(&self) -> &[RigidBody] {
        &self.bodies
    }

    pub fn body(&self, index: BodyIndex) -> Result<&RigidBody> {
        let count = self.bodies.len();
        self.bodies.get(index).ok_or(Error::InvalidBody { index, count })
    }

    pub fn body_mut(&mut self, index: BodyIndex) -> Result<&mut RigidBody> {
        let count = self.bodies.len();
        self.bodies.get_mut(index).ok_or(Error::InvalidBody { index, count })
    }

    pub fn set_position(&mut self, index: BodyIndex, position: Vec3) -> Result<()> {
        self.body_mut(index)?.state.position = position;
        Ok(())
    }

    pub fn set_velocity(&mut self, index: BodyIndex, linear: Vec3, angular: Vec3) -> Result<()> {
        let state = &mut self.body_mut(index)?.state;
        state.linear_velocity = linear;
        state.angular_velocity = angular;
        Ok(())
    }

    /// Takes effect on records built from the next step on.
    pub fn set_self_collision(&mut self, index: BodyIndex, enabled: bool) -> Result<()> {
        self.body_mut(index)?.self_collision = enabled;
        Ok(())
    }

    pub fn set_appearance(&mut self, index: BodyIndex, appearance: impl Into<String>) -> Result<()> {
        self.body_mut(index)?.appearance = appearance.into();
        Ok(())
    }

    /// Replace a body's mass properties; ignored by non-dynamic bodies.
    pub fn set_mass(&mut self, index: BodyIndex, mass: MassProperties) -> Result<()> {
        let body = self.body_mut(index)?;
        if body.body_type.is_dynamic() {
            body.mass = mass;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Publication
    // ------------------------------------------------------------------------

    /// Publish every completed step to `channel` from now on.
    pub fn attach_publisher(&mut self, channel: Arc<SnapshotChannel>) {
        self.publisher = Some(channel);
    }

    pub fn detach_publisher(&mut self) -> Option<Arc<SnapshotChannel>> {
        self.publisher.take()
    }

    pub fn publisher(&self) -> Option<&Arc<SnapshotChannel>> {
        self.publisher.as_ref()
    }

    /// Snapshot of the current state without publishing it.
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot::capture(self.clock.step(), self.clock.time(), &self.bodies, self.contacts.records().iter())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Completed steps.
    pub fn step_count(&self) -> u64 {
        self.clock.step()
    }

    pub fn time(&self) -> Real {
        self.clock.time()
    }

    pub fn metrics(&self) -> &StepMetrics {
        &self.metrics
    }

    pub fn solver_report(&self) -> &SolverReport {
        self.solver.report()
    }

    /// Records built during the last step.
    pub fn contacts(&self) -> &ContactBuffer {
        &self.contacts
    }

    pub fn contact_list(&self, body: BodyIndex) -> Result<ContactList<'_>> {
        self.contacts.list(body)
    }

    // ------------------------------------------------------------------------
    // Step
    // ------------------------------------------------------------------------

    /// Advance the world by one time step.
    #[tracing::instrument(level = "debug", skip(self), fields(step = self.clock.step() + 1))]
    pub fn step(&mut self) -> Result<&StepMetrics> {
        let started = self.clock.begin();
        let dt = self.clock.time_step();

        {
            let _phase = StepPhase::CollisionDetect.span();
            self.collision.detect(&self.bodies, &mut self.candidates)?;
        }

        let stats: BuildStats = {
            let _phase = StepPhase::BuildContacts.span();
            let stats = self.contacts.rebuild(&self.candidates, &self.bodies)?;
            self.contacts.update_impact_velocities(&self.bodies);
            stats
        };

        let report = {
            let _phase = StepPhase::Solve.span();
            dynamics::apply_external_forces(&mut self.bodies, &self.config.gravity, dt);
            dynamics::assign_inverse_inertia(self.contacts.records_mut(), &self.bodies);
            let mut response = BodyImpulseResponse::new(&mut self.bodies, dt);
            let report = *self.solver.solve(self.contacts.records_mut(), &mut response)?;
            self.contacts.sync_paired_impulses();
            report
        };

        {
            let _phase = StepPhase::Integrate.span();
            dynamics::integrate_poses(&mut self.bodies, dt);
        }

        let step = self.clock.step() + 1;
        let published = {
            let _phase = StepPhase::Publish.span();
            match &self.publisher {
                Some(channel) => {
                    let snapshot = WorldSnapshot::capture(
                        step,
                        step as Real * dt,
                        &self.bodies,
                        self.contacts.records().iter(),
                    );
                    channel.publish(snapshot)
                }
                None => false,
            }
        };

        self.clock.finish(started);
        self.metrics = StepMetrics {
            step,
            last_step_time_ms: self.clock.last_step_ms(),
            average_step_time_ms: self.clock.average_step_ms(),
            max_step_time_ms: self.clock.max_step_ms(),
            candidate_count: stats.candidates,
            contact_count: stats.records,
            skipped_contacts: stats.skipped,
            active_contacts: report.active_contacts,
            solver_sweeps: report.sweeps,
            solver_converged: report.converged,
            published,
        };
        trace!(metrics = ?self.metrics, "step complete");
        Ok(&self.metrics)
    }

    /// Run `count` steps, stopping at the first error.
    pub fn run(&mut self, count: u64) -> Result<()> {
        for _ in 0..count {
            self.step()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compound::Transform;
    use crate::snapshot::Wait;
    use std::time::Duration;

    const GRAVITY: Real = 9.81;

    fn world_with_friction(friction: Real) -> World {
        let config = WorldConfig { solver: SolverConfig::default().with_friction(friction), ..Default::default() };
        World::new(config).unwrap()
    }

    #[test]
    fn resting_sphere_gets_pure_normal_impulse() {
        let mut world = world_with_friction(0.5);
        world.add_ground(0.0);
        let ball = world.add_sphere("ball", 0.5, 1.0, Vec3::new(0.0, 0.0, 0.49)).unwrap();

        let metrics = *world.step().unwrap();
        assert!(metrics.solver_converged);
        assert!(metrics.solver_sweeps <= world.config().solver.max_sweeps);
        assert_eq!(metrics.contact_count, 2);
        assert_eq!(metrics.active_contacts, 1);

        let list = world.contact_list(ball).unwrap();
        assert_eq!(list.num_contacts(), 1);
        let record = list.contact_at(0).unwrap();
        assert!(!record.skip());
        assert!((record.depth() - 0.01).abs() < 1e-12);
        let impulse = record.impulse();
        assert!(impulse.z > 0.0);
        assert!(impulse.xy().norm() < 1e-12);
        // The contact cancels exactly one step of gravity.
        assert!((impulse.z - GRAVITY * 1e-3).abs() < 1e-6);
        assert!(world.body(ball).unwrap().state.linear_velocity.z > -1e-9);
    }

    #[test]
    fn free_fall_matches_semi_implicit_euler() {
        let mut world = world_with_friction(0.5);
        let ball = world.add_sphere("ball", 0.1, 1.0, Vec3::new(0.0, 0.0, 10.0)).unwrap();
        world.run(100).unwrap();

        let dt = world.config().time_step;
        let n = 100.0;
        let expected = 10.0 - GRAVITY * dt * dt * n * (n + 1.0) / 2.0;
        let body = world.body(ball).unwrap();
        assert!((body.state.position.z - expected).abs() < 1e-9);
        assert!((body.state.linear_velocity.z + GRAVITY * dt * n).abs() < 1e-9);
        assert!((world.time() - 0.1).abs() < 1e-12);
        assert_eq!(world.metrics().contact_count, 0);
    }

    #[test]
    fn box_stays_on_ground() {
        let mut world = world_with_friction(0.8);
        world.add_ground(0.0);
        let crate_box = world.add_box("box", Vec3::repeat(0.5), 2.0, Vec3::new(0.0, 0.0, 0.499)).unwrap();
        world.run(200).unwrap();

        assert_eq!(world.metrics().contact_count, 8);
        let body = world.body(crate_box).unwrap();
        assert!((body.state.position.z - 0.499).abs() < 1e-3);
        assert!(body.state.linear_velocity.norm() < 1e-2);
        for record in world.contacts().active() {
            let impulse = record.impulse();
            assert!(impulse.z >= 0.0);
            assert!(impulse.xy().norm() <= 0.8 * impulse.z + 1e-12);
        }
    }

    #[test]
    fn speculative_contact_lets_ball_fall_until_touching() {
        let mut world = world_with_friction(0.5).with_collision_layer(Box::new(AnalyticCollider::new(2.0)));
        world.add_ground(0.0);
        let ball = world.add_sphere("ball", 0.5, 1.0, Vec3::new(0.0, 0.0, 2.0)).unwrap();
        world.set_velocity(ball, Vec3::new(0.0, 0.0, -1.0), Vec3::zeros()).unwrap();

        world.step().unwrap();
        let record = world.contact_list(ball).unwrap().contact_at(0).unwrap();
        assert!((record.depth() + 1.5).abs() < 1e-12);
        assert_eq!(*record.impulse(), Vec3::zeros());
        assert!(world.body(ball).unwrap().state.linear_velocity.z < -1.0);

        world.run(99).unwrap();
        assert!(world.body(ball).unwrap().state.position.z < 1.9);

        // Free fall reaches the ground after about 0.46 s; give it a full second.
        world.run(900).unwrap();
        let body = world.body(ball).unwrap();
        assert!((body.state.position.z - 0.5).abs() < 1e-6, "z = {}", body.state.position.z);
        assert!(body.state.linear_velocity.z.abs() < 1e-6);
        assert!(world.contacts().active().all(|r| r.impulse().z >= 0.0));
    }

    #[test]
    fn steps_publish_snapshots() {
        let mut world = world_with_friction(0.5);
        let channel = Arc::new(SnapshotChannel::new());
        world.attach_publisher(Arc::clone(&channel));
        world.add_ground(0.0);
        world.add_sphere("ball", 0.5, 1.0, Vec3::new(0.0, 0.0, 0.49)).unwrap();
        world.set_appearance(1, "1,0,0,1").unwrap();

        assert_eq!(channel.latest().step, 0);
        world.run(3).unwrap();
        assert!(world.metrics().published);

        let latest = channel.latest();
        assert_eq!(latest.step, 3);
        assert!((latest.time - 3e-3).abs() < 1e-15);
        assert_eq!(latest.bodies.len(), 2);
        assert_eq!(latest.bodies[1].appearance, "1,0,0,1");
        assert_eq!(latest.bodies[1].position, world.body(1).unwrap().state.position);
        assert_eq!(latest.contacts.len(), 2);
        assert!(matches!(channel.wait_newer(2, Duration::from_millis(10)), Wait::Snapshot(s) if s.step == 3));

        channel.shutdown();
        world.step().unwrap();
        assert!(!world.metrics().published);
        assert_eq!(world.snapshot().step, 4);
    }

    #[test]
    fn compound_body_is_placed_at_its_center_of_mass() {
        let mut world = World::new(WorldConfig::default()).unwrap();
        let sphere = Shape::Sphere { radius: 0.1 };
        let children = vec![
            CompoundObjectChild::new(sphere, Transform::from_position(Vec3::new(0.0, 0.0, 0.0))),
            CompoundObjectChild::new(sphere, Transform::from_position(Vec3::new(2.0, 0.0, 0.0))),
        ];
        let index = world.add_compound("dumbbell", children, 4.0, Vec3::new(0.0, 0.0, 3.0), Mat3::identity()).unwrap();
        let body = world.body(index).unwrap();
        assert!((body.mass.mass - 4.0).abs() < 1e-12);
        assert!((body.state.position - Vec3::new(1.0, 0.0, 3.0)).norm() < 1e-12);

        let err = world.add_compound("empty", Vec::new(), 1.0, Vec3::zeros(), Mat3::identity()).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("at least one child"));
    }

    #[test]
    fn invalid_body_indices_are_reported() {
        let mut world = World::new(WorldConfig::default()).unwrap();
        world.add_ground(0.0);
        assert!(matches!(world.body(7), Err(Error::InvalidBody { index: 7, count: 1 })));
        assert!(world.set_position(3, Vec3::zeros()).is_err());
        assert!(world.set_velocity(1, Vec3::zeros(), Vec3::zeros()).is_err());
        assert!(world.contact_list(5).is_err());
        assert!(world.add_sphere("bad", -1.0, 1.0, Vec3::zeros()).is_err());
    }

    #[test]
    fn config_json_round_trip() {
        let config = WorldConfig {
            time_step: 2e-3,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            solver: SolverConfig::default().with_friction(0.3),
            contact_capacity: 64,
            default_self_collision: true,
        };
        let json = config.to_json_string().unwrap();
        assert_eq!(WorldConfig::from_json_str(&json).unwrap(), config);

        let partial = WorldConfig::from_json_str(r#"{ "time_step": 0.01 }"#).unwrap();
        assert_eq!(partial.time_step, 0.01);
        assert_eq!(partial.solver, SolverConfig::default());

        let err = WorldConfig::from_json_str(r#"{ "solver": { "friction": -1.0 } }"#).unwrap_err();
        assert!(err.is_config());
        assert!(WorldConfig::from_json_str("{ not json").is_err());
    }

    #[test]
    fn phases_run_in_order() {
        let names: Vec<_> = StepPhase::ORDER.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, ["CollisionDetect", "BuildContacts", "Solve", "Integrate", "Publish"]);
    }
}
