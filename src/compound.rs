// src/compound.rs
//!
//! Compound body assembly: N rigidly attached primitives → one rigid body.
//!
//! ## What gets composed
//! - **Mass split** per child following a [`MassPolicy`] (uniform, explicit
//!   per-child mass weights, or per-child density × volume), scaled so the
//!   children sum to the requested total mass.
//! - **Center of mass**: mass-weighted average of the child centroids in the
//!   compound's base frame.
//! - **Inertia** about that center: every child's local inertia rotated into
//!   the base frame plus its parallel-axis point-mass term.
//!
//! After assembly the children are only used for collision and rendering;
//! dynamics run on the single composed inertia.

use crate::body::{BodyState, MassProperties, Shape};
use crate::context::{ensure, ensure_eq};
use crate::error::Result;
use crate::math::{symmetrize, DiagonalViews, Expr, Mat3, Quat, Real, Vec3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Rigid transform of a child inside the compound's base frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub fn identity() -> Self {
        Self { position: Vec3::zeros(), rotation: Quat::identity() }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self { position, rotation: Quat::identity() }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// One primitive in the compound's local frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompoundObjectChild {
    pub shape: Shape,
    pub transform: Transform,
}

impl CompoundObjectChild {
    pub fn new(shape: Shape, transform: Transform) -> Self {
        Self { shape, transform }
    }
}

/// How the total mass is distributed over the children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MassPolicy {
    /// Every child gets `total / n`.
    #[default]
    Uniform,
    /// Relative per-child masses, normalized to the total.
    Masses(Vec<Real>),
    /// Per-child densities; mass proportional to density × volume.
    Densities(Vec<Real>),
}

/// Which inertia drives the dynamics of the assembled body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InertiaSource {
    /// Composed from the children (rotation + parallel axis).
    #[default]
    Composed,
    /// Caller-supplied base inertia used verbatim; children stay collision-only.
    Base,
}

/// Immutable result of assembly.
#[derive(Debug, Clone)]
pub struct CompoundBody {
    children: Arc<[CompoundObjectChild]>,
    child_masses: Vec<Real>,
    mass: Real,
    inertia: Mat3,
    center_of_mass: Vec3,
    state: BodyState,
}

impl CompoundBody {
    pub fn children(&self) -> &[CompoundObjectChild] {
        &self.children
    }

    pub fn shared_children(&self) -> Arc<[CompoundObjectChild]> {
        Arc::clone(&self.children)
    }

    pub fn child_masses(&self) -> &[Real] {
        &self.child_masses
    }

    pub fn mass(&self) -> Real {
        self.mass
    }

    /// Composed inertia about the center of mass, base-frame axes.
    pub fn inertia(&self) -> &Mat3 {
        &self.inertia
    }

    /// Center of mass in the base frame.
    pub fn center_of_mass(&self) -> &Vec3 {
        &self.center_of_mass
    }

    pub fn state(&self) -> &BodyState {
        &self.state
    }

    pub fn mass_properties(&self) -> Result<MassProperties> {
        MassProperties::new(self.mass, self.inertia)
    }
}

/// Builder for [`CompoundBody`]; mirrors `World::add_compound` arguments.
#[derive(Debug, Clone)]
pub struct CompoundBuilder {
    children: Vec<CompoundObjectChild>,
    total_mass: Real,
    base_position: Vec3,
    base_inertia: Mat3,
    mass_policy: MassPolicy,
    inertia_source: InertiaSource,
}

impl CompoundBuilder {
    pub fn new(children: Vec<CompoundObjectChild>, total_mass: Real, base_position: Vec3, base_inertia: Mat3) -> Self {
        Self {
            children,
            total_mass,
            base_position,
            base_inertia,
            mass_policy: MassPolicy::Uniform,
            inertia_source: InertiaSource::Composed,
        }
    }

    pub fn mass_policy(mut self, policy: MassPolicy) -> Self {
        self.mass_policy = policy;
        self
    }

    pub fn inertia_source(mut self, source: InertiaSource) -> Self {
        self.inertia_source = source;
        self
    }

    #[tracing::instrument(skip(self), fields(children = self.children.len()))]
    pub fn build(self) -> Result<CompoundBody> {
        ensure!(!self.children.is_empty(), "compound needs at least one child");
        ensure!(
            self.total_mass.is_finite() && self.total_mass > 0.0,
            "compound mass must be positive, got {}",
            self.total_mass
        );
        for (i, child) in self.children.iter().enumerate() {
            child
                .shape
                .validate()
                .map_err(|e| e.context(format!("compound child {i}")))?;
        }

        let child_masses = self.split_mass()?;
        let mass_sum: Real = child_masses.iter().sum();

        let mut center_of_mass = Vec3::zeros();
        for (child, m) in self.children.iter().zip(&child_masses) {
            center_of_mass += child.transform.position * *m;
        }
        center_of_mass /= mass_sum;

        let inertia = match self.inertia_source {
            InertiaSource::Composed => compose_inertia(&self.children, &child_masses, &center_of_mass)?,
            InertiaSource::Base => self.base_inertia,
        };

        debug!(mass = self.total_mass, com = ?center_of_mass, "compound assembled");

        Ok(CompoundBody {
            children: self.children.into(),
            child_masses,
            mass: self.total_mass,
            inertia,
            center_of_mass,
            state: BodyState::at_rest(self.base_position + center_of_mass),
        })
    }

    fn split_mass(&self) -> Result<Vec<Real>> {
        let n = self.children.len();
        let weights: Vec<Real> = match &self.mass_policy {
            MassPolicy::Uniform => return Ok(vec![self.total_mass / n as Real; n]),
            MassPolicy::Masses(masses) => {
                ensure_eq!(masses.len(), n);
                masses.clone()
            }
            MassPolicy::Densities(densities) => {
                ensure_eq!(densities.len(), n);
                densities
                    .iter()
                    .zip(&self.children)
                    .map(|(rho, child)| rho * child.shape.volume())
                    .collect()
            }
        };
        for w in &weights {
            ensure!(w.is_finite() && *w > 0.0, "per-child mass weight must be positive, got {}", w);
        }
        let sum: Real = weights.iter().sum();
        Ok(weights.iter().map(|w| self.total_mass * w / sum).collect())
    }
}

/// `Σ R I Rᵀ + m (|d|² E − d dᵀ)` about `center`.
fn compose_inertia(children: &[CompoundObjectChild], masses: &[Real], center: &Vec3) -> Result<Mat3> {
    let mut inertia = Mat3::zeros();
    for (child, &m) in children.iter().zip(masses) {
        let rot = child.transform.rotation.to_rotation_matrix();
        inertia += rot.matrix() * child.shape.inertia(m) * rot.matrix().transpose();

        let d = child.transform.position - center;
        let along_axes = Vec3::repeat(m * d.norm_squared());
        inertia.diag_ref_mut().add_assign(&Expr::of(&along_axes))?;
        inertia -= d * d.transpose() * m;
    }
    Ok(symmetrize(&inertia))
}

/// `World::add_compound`-style shorthand with the default policies.
pub fn assemble(
    children: Vec<CompoundObjectChild>,
    total_mass: Real,
    base_position: Vec3,
    base_inertia: Mat3,
) -> Result<CompoundBody> {
    CompoundBuilder::new(children, total_mass, base_position, base_inertia).build()
}
