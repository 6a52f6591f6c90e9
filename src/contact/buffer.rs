// src/contact/buffer.rs
//! Step-scoped contact arena.
//!
//! Allocated once with a fixed capacity, cleared and refilled every step.
//! Records are addressed by [`ContactHandle`] instead of references, so the
//! per-body lists stay valid while the solver mutates impulses in place.

use super::{ContactDesc, ContactList, ContactRecord, PerObjectContactList};
use crate::body::{BodyIndex, RigidBody};
use crate::collision::ContactCandidate;
use crate::error::{Error, Result};
use crate::math::{Real, Vec3};
use tracing::{trace, warn};

/// Positions closer than this count as the same contact point.
const DUPLICATE_DISTANCE: Real = 1e-9;

/// Index of a record inside the current step's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContactHandle(usize);

impl ContactHandle {
    #[inline]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Counts from the last rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub candidates: usize,
    pub records: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub struct ContactBuffer {
    records: Vec<ContactRecord>,
    lists: Vec<PerObjectContactList>,
    /// `(primary, mirror)` per contact problem.
    pairs: Vec<(ContactHandle, ContactHandle)>,
    capacity: usize,
    overflow_reported: bool,
}

impl ContactBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            lists: Vec::new(),
            pairs: Vec::with_capacity(capacity / 2),
            capacity,
            overflow_reported: false,
        }
    }

    /// Drop last step's records; keeps every allocation.
    pub fn clear(&mut self, num_bodies: usize) {
        self.records.clear();
        self.pairs.clear();
        self.lists.resize_with(num_bodies, PerObjectContactList::default);
        for list in &mut self.lists {
            list.clear();
        }
    }

    /// Clear and refill from this step's candidates, in detection order.
    pub fn rebuild(&mut self, candidates: &[ContactCandidate], bodies: &[RigidBody]) -> Result<BuildStats> {
        self.clear(bodies.len());
        let mut stats = BuildStats { candidates: candidates.len(), ..Default::default() };
        for candidate in candidates {
            let (primary, _) = self.push_candidate(candidate, bodies)?;
            if self.records[primary.index()].skip() {
                stats.skipped += 1;
            }
        }
        stats.records = self.records.len();
        if stats.records > self.capacity && !self.overflow_reported {
            warn!(records = stats.records, capacity = self.capacity, "contact buffer grew past its capacity");
            self.overflow_reported = true;
        }
        trace!(?stats, "contacts rebuilt");
        Ok(stats)
    }

    /// Append the primary record (owned by `body_a`) and its mirror (owned by
    /// `body_b`) for one candidate.
    pub fn push_candidate(
        &mut self,
        candidate: &ContactCandidate,
        bodies: &[RigidBody],
    ) -> Result<(ContactHandle, ContactHandle)> {
        let count = bodies.len();
        for index in [candidate.body_a, candidate.body_b] {
            if index >= count {
                return Err(Error::InvalidBody { index, count });
            }
        }
        if self.lists.len() < count {
            self.lists.resize_with(count, PerObjectContactList::default);
        }

        let (a, b) = (candidate.body_a, candidate.body_b);
        let self_collision = bodies[a].self_collision;
        let skip = (a == b && !self_collision) || self.is_duplicate(candidate);
        let problem = self.pairs.len();

        let primary = ContactHandle(self.records.len());
        let index_in_a = self.lists[a].num_contacts();
        let mut record = ContactRecord::new(
            ContactDesc {
                position: candidate.position,
                normal: candidate.normal,
                depth: candidate.depth,
                is_first_body: true,
                contact_problem_index: problem,
                owner_body_index: a,
                paired_body_index: b,
                paired_body_type: candidate.type_b,
                local_body_index: candidate.local_a,
                self_collision,
            },
            index_in_a,
        )?;
        let mirror = ContactHandle(primary.0 + 1);
        let index_in_b = if a == b { index_in_a + 1 } else { self.lists[b].num_contacts() };
        let mut paired = ContactRecord::new(
            ContactDesc {
                position: candidate.position,
                normal: -candidate.normal,
                depth: candidate.depth,
                is_first_body: false,
                contact_problem_index: problem,
                owner_body_index: b,
                paired_body_index: a,
                paired_body_type: candidate.type_a,
                local_body_index: candidate.local_b,
                self_collision,
            },
            index_in_b,
        )?;
        record.link_pair(index_in_b);
        paired.link_pair(index_in_a);
        if skip {
            record.mark_skip();
            paired.mark_skip();
        }

        self.records.push(record);
        self.records.push(paired);
        self.lists[a].push(primary);
        self.lists[b].push(mirror);
        self.pairs.push((primary, mirror));
        Ok((primary, mirror))
    }

    /// An earlier live record of `body_a` against `body_b` at the same point
    /// and sub-shape. Mirrors are included, so a candidate reported again
    /// with its bodies swapped is caught too.
    fn is_duplicate(&self, candidate: &ContactCandidate) -> bool {
        let Some(list) = self.lists.get(candidate.body_a) else {
            return false;
        };
        list.handles().iter().any(|h| {
            let r = &self.records[h.index()];
            !r.skip()
                && r.paired_body_index() == candidate.body_b
                && r.local_body_index() == candidate.local_a
                && (r.position() - candidate.position).norm() < DUPLICATE_DISTANCE
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of contact problems (primary records) this step.
    #[inline]
    pub fn num_problems(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn records(&self) -> &[ContactRecord] {
        &self.records
    }

    #[inline]
    pub fn records_mut(&mut self) -> &mut [ContactRecord] {
        &mut self.records
    }

    pub fn get(&self, handle: ContactHandle) -> Result<&ContactRecord> {
        let len = self.records.len();
        self.records.get(handle.0).ok_or(Error::OutOfBounds { index: handle.0, len })
    }

    pub fn get_mut(&mut self, handle: ContactHandle) -> Result<&mut ContactRecord> {
        let len = self.records.len();
        self.records.get_mut(handle.0).ok_or(Error::OutOfBounds { index: handle.0, len })
    }

    /// Non-skip primaries, one per solved contact problem.
    pub fn active(&self) -> impl Iterator<Item = &ContactRecord> + '_ {
        self.records.iter().filter(|r| r.is_first_body() && !r.skip())
    }

    pub fn list(&self, body: BodyIndex) -> Result<ContactList<'_>> {
        let count = self.lists.len();
        let list = self.lists.get(body).ok_or(Error::InvalidBody { index: body, count })?;
        Ok(ContactList::new(list, &self.records))
    }

    /// Recompute each list's impact velocity from current body velocities.
    pub fn update_impact_velocities(&mut self, bodies: &[RigidBody]) {
        for list in &mut self.lists {
            let mut fastest: Real = 0.0;
            for handle in list.handles() {
                let record = &self.records[handle.index()];
                if record.skip() {
                    continue;
                }
                let (Some(owner), Some(other)) =
                    (bodies.get(record.owner_body_index()), bodies.get(record.paired_body_index()))
                else {
                    continue;
                };
                let relative: Vec3 = owner.velocity_at(record.position()) - other.velocity_at(record.position());
                fastest = fastest.max(-relative.dot(record.normal()));
            }
            list.set_impact_velocity(fastest);
        }
    }

    /// Give every mirror the equal and opposite impulse of its primary.
    pub fn sync_paired_impulses(&mut self) {
        for &(primary, mirror) in &self.pairs {
            let world = self.records[primary.0].impulse_world();
            self.records[mirror.0].mirror_from(&world);
        }
    }
}
