// src/math/expr.rs
//! Small tagged expression tree over linear operands.
//!
//! `Expr::of(&a) * 2.0 - Expr::of(&b)` builds a tree without evaluating it; the
//! destination view evaluates one element at a time during `assign`, so
//! multi-term updates never materialize temporaries.

use super::Real;
use crate::error::{Error, Result};
use nalgebra::SMatrix;
use std::ops::{Add, Mul, Neg, Sub};

/// Anything that can be read element-by-element in column-major order.
pub trait Linear {
    fn len(&self) -> usize;

    /// Element `k` in column-major order.
    fn at(&self, k: usize) -> Result<Real>;
}

impl<const R: usize, const C: usize> Linear for SMatrix<Real, R, C> {
    fn len(&self) -> usize {
        R * C
    }

    fn at(&self, k: usize) -> Result<Real> {
        self.as_slice()
            .get(k)
            .copied()
            .ok_or(Error::OutOfBounds { index: k, len: R * C })
    }
}

/// Expression node. Leaves borrow their operands; nothing is evaluated until
/// a view assigns it.
pub enum Expr<'a> {
    Leaf(&'a dyn Linear),
    Add(Box<Expr<'a>>, Box<Expr<'a>>),
    Sub(Box<Expr<'a>>, Box<Expr<'a>>),
    Scale(Real, Box<Expr<'a>>),
    Neg(Box<Expr<'a>>),
}

impl<'a> Expr<'a> {
    #[inline]
    pub fn of(leaf: &'a dyn Linear) -> Self {
        Expr::Leaf(leaf)
    }

    /// Element count; fails if two operands of a sum disagree.
    pub fn len(&self) -> Result<usize> {
        match self {
            Expr::Leaf(leaf) => Ok(leaf.len()),
            Expr::Add(a, b) | Expr::Sub(a, b) => {
                let (la, lb) = (a.len()?, b.len()?);
                if la != lb {
                    return Err(Error::ShapeMismatch { expected: la, found: lb });
                }
                Ok(la)
            }
            Expr::Scale(_, e) | Expr::Neg(e) => e.len(),
        }
    }

    pub fn eval(&self, k: usize) -> Result<Real> {
        match self {
            Expr::Leaf(leaf) => leaf.at(k),
            Expr::Add(a, b) => Ok(a.eval(k)? + b.eval(k)?),
            Expr::Sub(a, b) => Ok(a.eval(k)? - b.eval(k)?),
            Expr::Scale(s, e) => Ok(s * e.eval(k)?),
            Expr::Neg(e) => Ok(-e.eval(k)?),
        }
    }

    /// Evaluate the whole tree into an owned column vector.
    pub fn to_vector<const N: usize>(&self) -> Result<SMatrix<Real, N, 1>> {
        let len = self.len()?;
        if len != N {
            return Err(Error::ShapeMismatch { expected: N, found: len });
        }
        let mut out = SMatrix::<Real, N, 1>::zeros();
        for (k, slot) in out.iter_mut().enumerate() {
            *slot = self.eval(k)?;
        }
        Ok(out)
    }
}

impl<'a> Add for Expr<'a> {
    type Output = Expr<'a>;
    fn add(self, rhs: Self) -> Self::Output {
        Expr::Add(Box::new(self), Box::new(rhs))
    }
}

impl<'a> Sub for Expr<'a> {
    type Output = Expr<'a>;
    fn sub(self, rhs: Self) -> Self::Output {
        Expr::Sub(Box::new(self), Box::new(rhs))
    }
}

impl<'a> Mul<Real> for Expr<'a> {
    type Output = Expr<'a>;
    fn mul(self, rhs: Real) -> Self::Output {
        Expr::Scale(rhs, Box::new(self))
    }
}

impl<'a> Neg for Expr<'a> {
    type Output = Expr<'a>;
    fn neg(self) -> Self::Output {
        Expr::Neg(Box::new(self))
    }
}
