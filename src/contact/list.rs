// src/contact/list.rs
//! Per-body contact index: handles into the step's contact arena, kept in
//! detection order.

use super::{ContactHandle, ContactRecord};
use crate::error::{Error, Result};
use crate::math::Real;

/// Contacts owned by one body during the current step.
#[derive(Debug, Clone, Default)]
pub struct PerObjectContactList {
    handles: Vec<ContactHandle>,
    impact_velocity: Real,
}

impl PerObjectContactList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { handles: Vec::with_capacity(capacity), impact_velocity: 0.0 }
    }

    #[inline]
    pub fn num_contacts(&self) -> usize {
        self.handles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handle_at(&self, index: usize) -> Result<ContactHandle> {
        self.handles
            .get(index)
            .copied()
            .ok_or(Error::OutOfBounds { index, len: self.handles.len() })
    }

    #[inline]
    pub fn handles(&self) -> &[ContactHandle] {
        &self.handles
    }

    /// Largest approach speed along the normal among non-skip contacts.
    #[inline]
    pub fn impact_velocity(&self) -> Real {
        self.impact_velocity
    }

    pub(crate) fn push(&mut self, handle: ContactHandle) -> usize {
        self.handles.push(handle);
        self.handles.len() - 1
    }

    pub(crate) fn set_impact_velocity(&mut self, velocity: Real) {
        self.impact_velocity = velocity;
    }

    /// Keeps the allocation for the next step.
    pub(crate) fn clear(&mut self) {
        self.handles.clear();
        self.impact_velocity = 0.0;
    }
}

/// Borrowed view pairing a body's list with the arena it indexes.
#[derive(Debug, Clone, Copy)]
pub struct ContactList<'a> {
    list: &'a PerObjectContactList,
    records: &'a [ContactRecord],
}

impl<'a> ContactList<'a> {
    pub(crate) fn new(list: &'a PerObjectContactList, records: &'a [ContactRecord]) -> Self {
        Self { list, records }
    }

    #[inline]
    pub fn num_contacts(&self) -> usize {
        self.list.num_contacts()
    }

    pub fn contact_at(&self, index: usize) -> Result<&'a ContactRecord> {
        let handle = self.list.handle_at(index)?;
        self.records
            .get(handle.index())
            .ok_or(Error::OutOfBounds { index: handle.index(), len: self.records.len() })
    }

    /// Records in detection order.
    pub fn contacts(&self) -> impl Iterator<Item = &'a ContactRecord> + 'a {
        let records = self.records;
        self.list
            .handles()
            .iter()
            .filter_map(move |h| records.get(h.index()))
    }

    #[inline]
    pub fn impact_velocity(&self) -> Real {
        self.list.impact_velocity()
    }
}
