// src/snapshot.rs
//!
//! Step-indexed world snapshots and the hand-off between the stepping thread
//! and the streaming server.
//!
//! ## Publication protocol
//! - The stepping thread builds the complete [`WorldSnapshot`] *outside* the
//!   lock, then swaps an `Arc` under it. Lock hold time is one pointer swap.
//! - Readers clone the current `Arc` under the same lock and read it after
//!   releasing it. A snapshot is immutable once published, so a reader can
//!   never see a pose from one step next to a velocity from another.
//! - Shutdown takes the same lock, so it can never interleave with a swap.

use crate::body::{BodyIndex, BodyType, RigidBody};
use crate::contact::ContactRecord;
use crate::error::Result;
use crate::math::{Quat, Real, Vec3};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodySnapshot {
    pub name: String,
    pub body_type: BodyType,
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub appearance: String,
}

impl From<&RigidBody> for BodySnapshot {
    fn from(body: &RigidBody) -> Self {
        Self {
            name: body.name.clone(),
            body_type: body.body_type,
            position: body.state.position,
            orientation: body.state.orientation,
            linear_velocity: body.state.linear_velocity,
            angular_velocity: body.state.angular_velocity,
            appearance: body.appearance.clone(),
        }
    }
}

/// Read-only copy of a record's public fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSnapshot {
    pub position: Vec3,
    pub normal: Vec3,
    pub depth: Real,
    /// World-frame impulse on `owner`.
    pub impulse: Vec3,
    pub owner: BodyIndex,
    pub paired: BodyIndex,
    pub paired_body_type: BodyType,
    pub contact_problem_index: usize,
    pub is_first_body: bool,
    pub local_body_index: usize,
}

impl From<&ContactRecord> for ContactSnapshot {
    fn from(record: &ContactRecord) -> Self {
        Self {
            position: *record.position(),
            normal: *record.normal(),
            depth: record.depth(),
            impulse: record.impulse_world(),
            owner: record.owner_body_index(),
            paired: record.paired_body_index(),
            paired_body_type: record.paired_body_type(),
            contact_problem_index: record.contact_problem_index(),
            is_first_body: record.is_first_body(),
            local_body_index: record.local_body_index(),
        }
    }
}

/// Immutable world state after one completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// 0 before the first step.
    pub step: u64,
    pub time: Real,
    pub bodies: Vec<BodySnapshot>,
    pub contacts: Vec<ContactSnapshot>,
}

impl WorldSnapshot {
    /// What readers see before anything was published.
    pub fn empty() -> Self {
        Self { step: 0, time: 0.0, bodies: Vec::new(), contacts: Vec::new() }
    }

    pub fn capture<'a>(
        step: u64,
        time: Real,
        bodies: &[RigidBody],
        contacts: impl Iterator<Item = &'a ContactRecord>,
    ) -> Self {
        Self {
            step,
            time,
            bodies: bodies.iter().map(BodySnapshot::from).collect(),
            contacts: contacts.filter(|r| !r.skip()).map(ContactSnapshot::from).collect(),
        }
    }

    /// One line of newline-delimited JSON (no trailing newline).
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// CHANNEL
// ============================================================================

/// Result of [`SnapshotChannel::wait_newer`].
#[derive(Debug, Clone)]
pub enum Wait {
    Snapshot(Arc<WorldSnapshot>),
    TimedOut,
    Shutdown,
}

#[derive(Debug)]
struct Slot {
    current: Arc<WorldSnapshot>,
    shutdown: bool,
}

/// Single-slot latest-value channel between the stepper and its readers.
#[derive(Debug)]
pub struct SnapshotChannel {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Default for SnapshotChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotChannel {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot { current: Arc::new(WorldSnapshot::empty()), shutdown: false }),
            ready: Condvar::new(),
        }
    }

    /// Swap in a finished snapshot and wake waiting readers. Returns `false`
    /// (and drops the snapshot) once the channel is shut down.
    pub fn publish(&self, snapshot: WorldSnapshot) -> bool {
        let snapshot = Arc::new(snapshot);
        let previous = {
            let mut slot = self.slot.lock();
            if slot.shutdown {
                return false;
            }
            std::mem::replace(&mut slot.current, snapshot)
        };
        self.ready.notify_all();
        // Last reference to the old snapshot may be freed here, outside the lock.
        drop(previous);
        true
    }

    pub fn latest(&self) -> Arc<WorldSnapshot> {
        Arc::clone(&self.slot.lock().current)
    }

    /// Block until a snapshot with `step > after_step` exists, the channel
    /// shuts down, or `timeout` elapses.
    pub fn wait_newer(&self, after_step: u64, timeout: Duration) -> Wait {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if slot.shutdown {
                return Wait::Shutdown;
            }
            if slot.current.step > after_step {
                return Wait::Snapshot(Arc::clone(&slot.current));
            }
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return if slot.shutdown {
                    Wait::Shutdown
                } else if slot.current.step > after_step {
                    Wait::Snapshot(Arc::clone(&slot.current))
                } else {
                    Wait::TimedOut
                };
            }
        }
    }

    /// Idempotent; safe from any thread.
    pub fn shutdown(&self) {
        self.slot.lock().shutdown = true;
        self.ready.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.slot.lock().shutdown
    }
}
