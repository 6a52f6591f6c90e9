// src/contact/record.rs
//! One contact between two bodies, as seen from the body that owns the record.

use crate::body::{BodyIndex, BodyType};
use crate::context::ensure;
use crate::error::Result;
use crate::math::{contact_frame, Mat3, Real, Vec3};
use serde::{Deserialize, Serialize};

/// Geometry plus solver state of a single contact.
///
/// `normal` points from the paired body toward the owner, so a positive
/// normal impulse pushes the owner out of the contact. `impulse` and
/// `inverse_inertia` live in the contact frame (rows `t1, t2, n`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    position: Vec3,
    normal: Vec3,
    frame: Mat3,
    is_first_body: bool,
    contact_problem_index: usize,
    owner_body_index: BodyIndex,
    index_in_owning_body: usize,
    paired_body_index: BodyIndex,
    paired_body_type: BodyType,
    paired_contact_index_in_paired_body: usize,
    local_body_index: usize,
    depth: Real,
    impulse: Vec3,
    inverse_inertia: Mat3,
    self_collision: bool,
    skip: bool,
}

/// Everything a record needs at construction besides its list position.
#[derive(Debug, Clone, Copy)]
pub struct ContactDesc {
    pub position: Vec3,
    pub normal: Vec3,
    pub depth: Real,
    pub is_first_body: bool,
    pub contact_problem_index: usize,
    pub owner_body_index: BodyIndex,
    pub paired_body_index: BodyIndex,
    pub paired_body_type: BodyType,
    pub local_body_index: usize,
    pub self_collision: bool,
}

impl ContactRecord {
    /// Builds a record with zero impulse. The normal must be unit length.
    pub fn new(desc: ContactDesc, index_in_owning_body: usize) -> Result<Self> {
        let len = desc.normal.norm();
        ensure!(
            (len - 1.0).abs() < 1e-6,
            "contact normal must be unit length, got |n| = {}",
            len
        );
        ensure!(desc.depth.is_finite(), "contact depth must be finite");
        Ok(Self {
            position: desc.position,
            normal: desc.normal,
            frame: contact_frame(&desc.normal)?,
            is_first_body: desc.is_first_body,
            contact_problem_index: desc.contact_problem_index,
            owner_body_index: desc.owner_body_index,
            index_in_owning_body,
            paired_body_index: desc.paired_body_index,
            paired_body_type: desc.paired_body_type,
            paired_contact_index_in_paired_body: usize::MAX,
            local_body_index: desc.local_body_index,
            depth: desc.depth,
            impulse: Vec3::zeros(),
            inverse_inertia: Mat3::zeros(),
            self_collision: desc.self_collision,
            skip: false,
        })
    }

    #[inline]
    pub fn position(&self) -> &Vec3 {
        &self.position
    }

    #[inline]
    pub fn normal(&self) -> &Vec3 {
        &self.normal
    }

    /// Rows are `(tangent1, tangent2, normal)`; `frame * world` maps into contact coordinates.
    #[inline]
    pub fn contact_frame(&self) -> &Mat3 {
        &self.frame
    }

    #[inline]
    pub fn is_first_body(&self) -> bool {
        self.is_first_body
    }

    #[inline]
    pub fn contact_problem_index(&self) -> usize {
        self.contact_problem_index
    }

    #[inline]
    pub fn owner_body_index(&self) -> BodyIndex {
        self.owner_body_index
    }

    #[inline]
    pub fn index_in_owning_body(&self) -> usize {
        self.index_in_owning_body
    }

    #[inline]
    pub fn paired_body_index(&self) -> BodyIndex {
        self.paired_body_index
    }

    #[inline]
    pub fn paired_body_type(&self) -> BodyType {
        self.paired_body_type
    }

    /// Position of the mirror record in the paired body's list, `usize::MAX`
    /// when the paired body keeps no list (the ground).
    #[inline]
    pub fn paired_contact_index_in_paired_body(&self) -> usize {
        self.paired_contact_index_in_paired_body
    }

    #[inline]
    pub fn local_body_index(&self) -> usize {
        self.local_body_index
    }

    #[inline]
    pub fn depth(&self) -> Real {
        self.depth
    }

    /// Impulse on the owner in the contact frame, normal component last.
    #[inline]
    pub fn impulse(&self) -> &Vec3 {
        &self.impulse
    }

    /// Impulse on the owner in world coordinates.
    pub fn impulse_world(&self) -> Vec3 {
        self.frame.transpose() * self.impulse
    }

    #[inline]
    pub fn set_impulse(&mut self, impulse: Vec3) {
        if !self.skip {
            self.impulse = impulse;
        }
    }

    /// Relative-velocity response to a unit impulse, in the contact frame.
    #[inline]
    pub fn inverse_inertia(&self) -> &Mat3 {
        &self.inverse_inertia
    }

    #[inline]
    pub fn set_inverse_inertia(&mut self, inverse_inertia: Mat3) {
        self.inverse_inertia = inverse_inertia;
    }

    #[inline]
    pub fn is_self_collision(&self) -> bool {
        self.self_collision
    }

    #[inline]
    pub fn set_self_collision(&mut self, enabled: bool) {
        self.self_collision = enabled;
    }

    #[inline]
    pub fn skip(&self) -> bool {
        self.skip
    }

    pub(crate) fn mark_skip(&mut self) {
        self.skip = true;
        self.impulse = Vec3::zeros();
    }

    pub(crate) fn link_pair(&mut self, paired_index: usize) {
        self.paired_contact_index_in_paired_body = paired_index;
    }

    /// Overwrite with the equal-and-opposite impulse of the primary record.
    pub(crate) fn mirror_from(&mut self, primary_world_impulse: &Vec3) {
        if !self.skip {
            self.impulse = self.frame * -primary_world_impulse;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(normal: Vec3) -> ContactDesc {
        ContactDesc {
            position: Vec3::new(0.0, 0.0, -0.01),
            normal,
            depth: 0.01,
            is_first_body: true,
            contact_problem_index: 0,
            owner_body_index: 1,
            paired_body_index: 0,
            paired_body_type: BodyType::Static,
            local_body_index: 0,
            self_collision: false,
        }
    }

    #[test]
    fn new_record_has_zero_impulse() {
        let record = ContactRecord::new(desc(Vec3::z()), 3).unwrap();
        assert_eq!(*record.impulse(), Vec3::zeros());
        assert_eq!(record.index_in_owning_body(), 3);
        assert!(!record.skip());
        assert!((record.contact_frame().row(2).transpose() - Vec3::z()).norm() < 1e-12);
    }

    #[test]
    fn rejects_non_unit_normal() {
        let err = ContactRecord::new(desc(Vec3::new(0.0, 0.0, 2.0)), 0).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn skipped_record_ignores_impulse() {
        let mut record = ContactRecord::new(desc(Vec3::z()), 0).unwrap();
        record.mark_skip();
        record.set_impulse(Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(*record.impulse(), Vec3::zeros());
    }

    #[test]
    fn world_impulse_round_trip() {
        let n = Vec3::new(0.3, -0.2, 0.9).normalize();
        let mut primary = ContactRecord::new(desc(n), 0).unwrap();
        let mut mirror = ContactRecord::new(desc(-n), 0).unwrap();
        primary.set_impulse(Vec3::new(0.1, -0.2, 1.5));
        mirror.mirror_from(&primary.impulse_world());
        assert!((mirror.impulse_world() + primary.impulse_world()).norm() < 1e-12);
        assert!((mirror.impulse().z - 1.5).abs() < 1e-12);
    }
}
