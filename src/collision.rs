// src/collision.rs
//!
//! Collision seam plus a minimal analytic detector.
//!
//! The stepper only depends on [`CollisionLayer`]; any broad/narrow phase can
//! stand behind it. [`AnalyticCollider`] covers what the built-in scenes need:
//! - primitives and compound children against ground planes
//! - sphere against sphere
//!
//! Candidate normals point from `body_b` toward `body_a`.

use crate::body::{BodyIndex, BodyType, Geometry, RigidBody, Shape};
use crate::error::Result;
use crate::math::{Quat, Real, Vec3};
use serde::{Deserialize, Serialize};

/// One potential penetration reported by the collision layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactCandidate {
    /// World-frame contact point.
    pub position: Vec3,
    /// World-frame unit normal, from `body_b` toward `body_a`.
    pub normal: Vec3,
    /// Penetration depth (positive when overlapping).
    pub depth: Real,
    pub body_a: BodyIndex,
    pub body_b: BodyIndex,
    pub type_a: BodyType,
    pub type_b: BodyType,
    /// Sub-shape index inside each body (compound child, 0 for primitives).
    pub local_a: usize,
    pub local_b: usize,
}

/// Produces this step's candidates in a deterministic order.
pub trait CollisionLayer: Send {
    fn detect(&mut self, bodies: &[RigidBody], out: &mut Vec<ContactCandidate>) -> Result<()>;
}

/// Closed-form detector for planes, spheres, boxes, capsules and cylinders.
#[derive(Debug, Clone, Default)]
pub struct AnalyticCollider {
    /// Report features this far above the surface as well.
    pub margin: Real,
    /// Points sampled around each cylinder cap rim.
    pub rim_samples: usize,
    scratch: Vec<Feature>,
}

/// A point with a rounding radius; its lowest extent is `center.z - radius`.
#[derive(Debug, Clone, Copy)]
struct Feature {
    center: Vec3,
    radius: Real,
    local: usize,
}

impl AnalyticCollider {
    pub fn new(margin: Real) -> Self {
        Self { margin, rim_samples: 8, scratch: Vec::new() }
    }

    fn ground_contacts(
        &mut self,
        bodies: &[RigidBody],
        ground: BodyIndex,
        height: Real,
        out: &mut Vec<ContactCandidate>,
    ) {
        for (index, body) in bodies.iter().enumerate() {
            if index == ground || !body.body_type.is_dynamic() || body.is_ground() {
                continue;
            }
            self.scratch.clear();
            collect_features(body, self.rim_samples.max(3), &mut self.scratch);
            for feature in &self.scratch {
                let lowest = feature.center.z - feature.radius;
                let depth = height - lowest;
                if depth < -self.margin {
                    continue;
                }
                out.push(ContactCandidate {
                    position: Vec3::new(feature.center.x, feature.center.y, lowest),
                    normal: Vec3::z(),
                    depth,
                    body_a: index,
                    body_b: ground,
                    type_a: body.body_type,
                    type_b: bodies[ground].body_type,
                    local_a: feature.local,
                    local_b: 0,
                });
            }
        }
    }

    fn sphere_contacts(&self, bodies: &[RigidBody], out: &mut Vec<ContactCandidate>) {
        let spheres: Vec<(BodyIndex, Real)> = bodies
            .iter()
            .enumerate()
            .filter_map(|(i, b)| match b.geometry {
                Geometry::Primitive(Shape::Sphere { radius }) => Some((i, radius)),
                _ => None,
            })
            .collect();

        for (k, &(a, ra)) in spheres.iter().enumerate() {
            for &(b, rb) in &spheres[k + 1..] {
                let (body_a, body_b) = (&bodies[a], &bodies[b]);
                if !body_a.body_type.is_dynamic() && !body_b.body_type.is_dynamic() {
                    continue;
                }
                let offset = body_a.state.position - body_b.state.position;
                let distance = offset.norm();
                let depth = ra + rb - distance;
                if depth < -self.margin || distance <= Real::EPSILON {
                    continue;
                }
                let normal = offset / distance;
                let on_a = body_a.state.position - normal * ra;
                let on_b = body_b.state.position + normal * rb;
                out.push(ContactCandidate {
                    position: (on_a + on_b) * 0.5,
                    normal,
                    depth,
                    body_a: a,
                    body_b: b,
                    type_a: body_a.body_type,
                    type_b: body_b.body_type,
                    local_a: 0,
                    local_b: 0,
                });
            }
        }
    }
}

impl CollisionLayer for AnalyticCollider {
    fn detect(&mut self, bodies: &[RigidBody], out: &mut Vec<ContactCandidate>) -> Result<()> {
        out.clear();
        for (index, body) in bodies.iter().enumerate() {
            if let Geometry::Ground { height } = body.geometry {
                self.ground_contacts(bodies, index, height, out);
            }
        }
        self.sphere_contacts(bodies, out);
        Ok(())
    }
}

/// Lowest-point candidates of every sub-shape of `body`, in world space.
fn collect_features(body: &RigidBody, rim_samples: usize, out: &mut Vec<Feature>) {
    let rotation = body.state.orientation;
    match &body.geometry {
        Geometry::Primitive(shape) => shape_features(shape, &body.state.position, &rotation, 0, rim_samples, out),
        Geometry::Compound { children, center_of_mass } => {
            for (local, child) in children.iter().enumerate() {
                let position = body.state.position + rotation * (child.transform.position - center_of_mass);
                let child_rotation = rotation * child.transform.rotation;
                shape_features(&child.shape, &position, &child_rotation, local, rim_samples, out);
            }
        }
        Geometry::Ground { .. } => {}
    }
}

fn shape_features(shape: &Shape, position: &Vec3, rotation: &Quat, local: usize, rim_samples: usize, out: &mut Vec<Feature>) {
    let at = |offset: Vec3, radius: Real| Feature { center: position + rotation * offset, radius, local };
    match *shape {
        Shape::Sphere { radius } => out.push(at(Vec3::zeros(), radius)),
        Shape::Capsule { radius, height } => {
            out.push(at(Vec3::new(0.0, 0.0, 0.5 * height), radius));
            out.push(at(Vec3::new(0.0, 0.0, -0.5 * height), radius));
        }
        Shape::Box { half_extents: h } => {
            for sx in [-1.0, 1.0] {
                for sy in [-1.0, 1.0] {
                    for sz in [-1.0, 1.0] {
                        out.push(at(Vec3::new(sx * h.x, sy * h.y, sz * h.z), 0.0));
                    }
                }
            }
        }
        Shape::Cylinder { radius, height } => {
            for cap in [-0.5 * height, 0.5 * height] {
                for k in 0..rim_samples {
                    let angle = std::f64::consts::TAU * k as Real / rim_samples as Real;
                    out.push(at(Vec3::new(radius * angle.cos(), radius * angle.sin(), cap), 0.0));
                }
            }
        }
    }
}
