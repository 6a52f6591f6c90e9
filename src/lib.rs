// src/lib.rs
//! Multibody contact simulation core.
//!
//! Collision candidates become paired contact records, a bisection
//! Gauss-Seidel solver resolves frictional impulses on them, and the world
//! stepper integrates bodies and publishes immutable snapshots to a streaming
//! server running on its own thread.
//!
//! ```text
//! CollisionLayer → ContactBuffer → BisectionSolver → integrate → SnapshotChannel → SnapshotServer
//! ```

pub mod body;
pub mod clock;
pub mod collision;
pub mod compound;
pub mod contact;
pub mod context;
pub mod dynamics;
pub mod error;
pub mod math;
pub mod realtime;
pub mod server;
pub mod snapshot;
pub mod solver;
pub mod telemetry;
pub mod world;

pub use error::{Error, Result};

pub mod prelude {
    pub use crate::body::{BodyIndex, BodyType, Geometry, MassProperties, RigidBody, Shape};
    pub use crate::collision::{AnalyticCollider, CollisionLayer, ContactCandidate};
    pub use crate::compound::{CompoundBody, CompoundBuilder, CompoundObjectChild, InertiaSource, MassPolicy, Transform};
    pub use crate::contact::{ContactBuffer, ContactList, ContactRecord, PerObjectContactList};
    pub use crate::context::{Context, OptionContext};
    pub use crate::error::{Error, Result};
    pub use crate::math::{Mat3, Quat, Real, Vec3};
    pub use crate::realtime::{Pacing, StepLoop, StepLoopConfig};
    pub use crate::server::{ServerConfig, SnapshotServer, SnapshotSink};
    pub use crate::snapshot::{SnapshotChannel, Wait, WorldSnapshot};
    pub use crate::solver::{BisectionSolver, ImpulseResponse, SolverConfig, SolverReport};
    pub use crate::world::{StepMetrics, StepPhase, World, WorldConfig};
}
