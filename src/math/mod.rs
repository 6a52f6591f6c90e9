// src/math/mod.rs
//! Numeric foundation: fixed-size aliases over nalgebra plus the checked view
//! layer (`view`) and lazy expression tree (`expr`) the solver runs on.

pub mod expr;
pub mod view;

pub use expr::{Expr, Linear};
pub use view::{BlockMut, BlockRef, DiagonalViews, Orientation, VecMut, VecRef, Views};

use crate::error::Result;
use nalgebra::{Matrix3, UnitQuaternion, Vector3};

pub type Real = f64;
pub type Vec3 = Vector3<Real>;
pub type Mat3 = Matrix3<Real>;
pub type Quat = UnitQuaternion<Real>;

/// Cross-product matrix: `skew(a) * b == a.cross(&b)`.
#[inline]
pub fn skew(v: &Vec3) -> Mat3 {
    Mat3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Orthonormal contact frame with rows `(tangent1, tangent2, normal)`.
///
/// `frame * world` expresses a world vector in contact coordinates (normal last).
/// The tangent choice depends only on `normal`, so two records with the same
/// normal always agree on their frames.
pub fn contact_frame(normal: &Vec3) -> Result<Mat3> {
    let n = normal.normalize();
    // Seed with the world axis least aligned with the normal.
    let seed = if n.x.abs() < 0.57 {
        Vec3::x()
    } else if n.y.abs() < 0.57 {
        Vec3::y()
    } else {
        Vec3::z()
    };
    let t1 = (seed - n * n.dot(&seed)).normalize();
    let t2 = n.cross(&t1);

    let mut frame = Mat3::zeros();
    frame.row_ref_mut(0)?.assign(&Expr::of(&t1))?;
    frame.row_ref_mut(1)?.assign(&Expr::of(&t2))?;
    frame.row_ref_mut(2)?.assign(&Expr::of(&n))?;
    Ok(frame)
}

/// Symmetric part of a 3x3 operator, `(A + Aᵀ) / 2`.
pub fn symmetrize(m: &Mat3) -> Mat3 {
    (m + m.transpose()) * 0.5
}
