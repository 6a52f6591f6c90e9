// src/body.rs
//!
//! Rigid bodies: classification, primitive shapes, mass properties and state.
//!
//! Every body carries its pose (center of mass + orientation) and its
//! velocity in world coordinates. Inertia is stored in the body frame about the
//! center of mass; world-frame operators are produced on demand by `dynamics`.

use crate::compound::CompoundObjectChild;
use crate::context::ensure;
use crate::error::{Error, Result};
use crate::math::{Mat3, Quat, Real, Vec3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;

/// Index of a body inside its world.
pub type BodyIndex = usize;

/// Defines how a body reacts to contact impulses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyType {
    Static,    // Never moves, infinite mass (e.g., the ground)
    Kinematic, // Moves via velocity setting, not forces (e.g., a conveyor)
    Dynamic,   // Affected by gravity and contacts
}

impl BodyType {
    #[inline(always)]
    pub fn is_dynamic(self) -> bool {
        matches!(self, BodyType::Dynamic)
    }
}

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

/// Primitive shape discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Sphere,
    Box,
    Capsule,
    Cylinder,
}

/// Primitive shape with its kind-specific parameters. Capsules and cylinders
/// are aligned with the local z axis; `height` is the center-to-center length
/// of the capsule segment and the full length of the cylinder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    Sphere { radius: Real },
    Box { half_extents: Vec3 },
    Capsule { radius: Real, height: Real },
    Cylinder { radius: Real, height: Real },
}

impl Shape {
    pub fn kind(&self) -> ShapeKind {
        match self {
            Shape::Sphere { .. } => ShapeKind::Sphere,
            Shape::Box { .. } => ShapeKind::Box,
            Shape::Capsule { .. } => ShapeKind::Capsule,
            Shape::Cylinder { .. } => ShapeKind::Cylinder,
        }
    }

    /// Every parameter must be strictly positive and finite.
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: Real| -> Result<()> {
            ensure!(v.is_finite() && v > 0.0, "{:?} {} must be positive, got {}", self.kind(), name, v);
            Ok(())
        };
        match *self {
            Shape::Sphere { radius } => positive("radius", radius),
            Shape::Box { half_extents } => {
                positive("half extent x", half_extents.x)?;
                positive("half extent y", half_extents.y)?;
                positive("half extent z", half_extents.z)
            }
            Shape::Capsule { radius, height } | Shape::Cylinder { radius, height } => {
                positive("radius", radius)?;
                positive("height", height)
            }
        }
    }

    pub fn volume(&self) -> Real {
        match *self {
            Shape::Sphere { radius } => 4.0 / 3.0 * PI * radius.powi(3),
            Shape::Box { half_extents } => 8.0 * half_extents.x * half_extents.y * half_extents.z,
            Shape::Capsule { radius, height } => PI * radius * radius * height + 4.0 / 3.0 * PI * radius.powi(3),
            Shape::Cylinder { radius, height } => PI * radius * radius * height,
        }
    }

    /// Inertia about the shape's own center, in its local frame, for `mass`.
    pub fn inertia(&self, mass: Real) -> Mat3 {
        match *self {
            Shape::Sphere { radius } => Mat3::from_diagonal_element(0.4 * mass * radius * radius),
            Shape::Box { half_extents: h } => {
                let (x2, y2, z2) = (4.0 * h.x * h.x, 4.0 * h.y * h.y, 4.0 * h.z * h.z);
                Mat3::from_diagonal(&Vec3::new(
                    mass / 12.0 * (y2 + z2),
                    mass / 12.0 * (x2 + z2),
                    mass / 12.0 * (x2 + y2),
                ))
            }
            Shape::Cylinder { radius, height } => {
                let axial = 0.5 * mass * radius * radius;
                let lateral = mass / 12.0 * (3.0 * radius * radius + height * height);
                Mat3::from_diagonal(&Vec3::new(lateral, lateral, axial))
            }
            Shape::Capsule { radius, height } => {
                // Split the mass by volume between the cylinder and the two caps.
                let r2 = radius * radius;
                let cyl_volume = PI * r2 * height;
                let caps_volume = 4.0 / 3.0 * PI * r2 * radius;
                let cyl_mass = mass * cyl_volume / (cyl_volume + caps_volume);
                let caps_mass = mass - cyl_mass;

                let cyl_axial = 0.5 * cyl_mass * r2;
                let cyl_lateral = cyl_mass / 12.0 * (3.0 * r2 + height * height);

                // Each hemisphere: 83/320 m r^2 about its own centroid, which
                // sits 3r/8 past the end of the segment.
                let offset = 0.5 * height + 0.375 * radius;
                let caps_axial = 0.4 * caps_mass * r2;
                let caps_lateral = caps_mass * (83.0 / 320.0 * r2 + offset * offset);

                Mat3::from_diagonal(&Vec3::new(
                    cyl_lateral + caps_lateral,
                    cyl_lateral + caps_lateral,
                    cyl_axial + caps_axial,
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Mass properties & state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MassProperties {
    pub mass: Real,
    /// Body-frame inertia about the center of mass.
    pub inertia: Mat3,
    pub inv_mass: Real,
    pub inv_inertia: Mat3,
}

impl MassProperties {
    pub fn new(mass: Real, inertia: Mat3) -> Result<Self> {
        ensure!(mass.is_finite() && mass > 0.0, "mass must be positive, got {}", mass);
        let inv_inertia = inertia
            .try_inverse()
            .ok_or_else(|| Error::config("inertia tensor is singular"))?;
        Ok(Self { mass, inertia, inv_mass: 1.0 / mass, inv_inertia })
    }

    pub fn of_shape(shape: &Shape, mass: Real) -> Result<Self> {
        shape.validate()?;
        Self::new(mass, shape.inertia(mass))
    }

    /// Infinite mass: zero inverse operators. Used for static/kinematic bodies.
    pub fn immovable() -> Self {
        Self {
            mass: Real::INFINITY,
            inertia: Mat3::from_diagonal_element(Real::INFINITY),
            inv_mass: 0.0,
            inv_inertia: Mat3::zeros(),
        }
    }
}

/// Pose and velocity, all in world coordinates. `position` is the center of mass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyState {
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl BodyState {
    pub fn at_rest(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::identity(),
            linear_velocity: Vec3::zeros(),
            angular_velocity: Vec3::zeros(),
        }
    }
}

/// Collision geometry attached to a body.
#[derive(Debug, Clone)]
pub enum Geometry {
    Primitive(Shape),
    /// Children are expressed in the compound's base frame; `center_of_mass`
    /// is the body origin inside that frame.
    Compound {
        children: Arc<[CompoundObjectChild]>,
        center_of_mass: Vec3,
    },
    /// Infinite horizontal plane `z = height`.
    Ground { height: Real },
}

// ---------------------------------------------------------------------------
// Rigid body
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RigidBody {
    pub name: String,
    pub body_type: BodyType,
    pub mass: MassProperties,
    pub state: BodyState,
    pub geometry: Geometry,
    /// Evaluated when contact records are built, never retroactively.
    pub self_collision: bool,
    /// Free-form color/material hint for the visualizer ("r,g,b,a").
    pub appearance: String,
}

impl RigidBody {
    pub fn new(name: impl Into<String>, body_type: BodyType, mass: MassProperties, geometry: Geometry) -> Self {
        let mass = if body_type.is_dynamic() { mass } else { MassProperties::immovable() };
        Self {
            name: name.into(),
            body_type,
            mass,
            state: BodyState::at_rest(Vec3::zeros()),
            geometry,
            self_collision: false,
            appearance: String::new(),
        }
    }

    /// Dynamic body with a primitive shape of the given mass.
    pub fn primitive(name: impl Into<String>, shape: Shape, mass: Real) -> Result<Self> {
        let props = MassProperties::of_shape(&shape, mass)?;
        Ok(Self::new(name, BodyType::Dynamic, props, Geometry::Primitive(shape)))
    }

    pub fn ground(height: Real) -> Self {
        Self::new("ground", BodyType::Static, MassProperties::immovable(), Geometry::Ground { height })
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.state.position = position;
        self
    }

    pub fn is_ground(&self) -> bool {
        matches!(self.geometry, Geometry::Ground { .. })
    }

    /// World-frame inverse inertia `R I⁻¹ Rᵀ`; zero for non-dynamic bodies.
    pub fn inverse_inertia_world(&self) -> Mat3 {
        if !self.body_type.is_dynamic() {
            return Mat3::zeros();
        }
        let r = self.state.orientation.to_rotation_matrix();
        r.matrix() * self.mass.inv_inertia * r.matrix().transpose()
    }

    /// Velocity of the material point currently at `point`.
    #[inline]
    pub fn velocity_at(&self, point: &Vec3) -> Vec3 {
        let r = point - self.state.position;
        self.state.linear_velocity + self.state.angular_velocity.cross(&r)
    }

    /// Apply a world-frame impulse at `point`. No-op unless dynamic.
    pub fn apply_impulse_at(&mut self, point: &Vec3, impulse: &Vec3) {
        if !self.body_type.is_dynamic() {
            return;
        }
        let r = point - self.state.position;
        self.state.linear_velocity += impulse * self.mass.inv_mass;
        self.state.angular_velocity += self.inverse_inertia_world() * r.cross(impulse);
    }
}
