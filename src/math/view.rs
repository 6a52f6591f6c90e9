// src/math/view.rs
//! Aliasing row / column / diagonal / block views over fixed-size matrix storage.
//!
//! A view is a `(storage slice, offset, stride)` triple into the column-major
//! backing array of an `SMatrix`. Views never copy: reads and writes go straight
//! to the backing storage. Every access is bounds-checked and reports
//! [`Error::OutOfBounds`] instead of touching memory it does not own.

use super::Real;
use crate::error::{Error, Result};
use crate::math::expr::{Expr, Linear};
use nalgebra::SMatrix;

/// Layout of a 1-D view inside its backing matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Row,
    Column,
    Diagonal,
}

#[inline(always)]
fn check(index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(Error::OutOfBounds { index, len })
    }
}

// ============================================================================
// 1-D VIEWS
// ============================================================================

/// Read-only strided view of `N` elements.
#[derive(Debug, Clone, Copy)]
pub struct VecRef<'a, const N: usize> {
    data: &'a [Real],
    offset: usize,
    stride: usize,
    orientation: Orientation,
}

impl<'a, const N: usize> VecRef<'a, N> {
    /// Element count, known at compile time.
    pub const LEN: usize = N;

    #[inline(always)]
    pub const fn len(&self) -> usize {
        N
    }

    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    #[inline(always)]
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    #[inline]
    pub fn get(&self, i: usize) -> Result<Real> {
        check(i, N)?;
        Ok(self.data[self.offset + i * self.stride])
    }

    pub fn iter(&self) -> impl Iterator<Item = Real> + '_ {
        (0..N).map(move |i| self.data[self.offset + i * self.stride])
    }

    /// Copy the viewed elements out into an owned column vector.
    pub fn to_vector(&self) -> SMatrix<Real, N, 1> {
        SMatrix::<Real, N, 1>::from_fn(|i, _| self.data[self.offset + i * self.stride])
    }

    pub fn dot(&self, other: &dyn Linear) -> Result<Real> {
        if other.len() != N {
            return Err(Error::ShapeMismatch { expected: N, found: other.len() });
        }
        let mut acc = 0.0;
        for i in 0..N {
            acc += self.data[self.offset + i * self.stride] * other.at(i)?;
        }
        Ok(acc)
    }

    pub fn norm_squared(&self) -> Real {
        self.iter().map(|v| v * v).sum()
    }
}

/// Mutable strided view of `N` elements.
#[derive(Debug)]
pub struct VecMut<'a, const N: usize> {
    data: &'a mut [Real],
    offset: usize,
    stride: usize,
    orientation: Orientation,
}

impl<'a, const N: usize> VecMut<'a, N> {
    pub const LEN: usize = N;

    #[inline(always)]
    pub const fn len(&self) -> usize {
        N
    }

    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    #[inline]
    pub fn get(&self, i: usize) -> Result<Real> {
        check(i, N)?;
        Ok(self.data[self.offset + i * self.stride])
    }

    #[inline]
    pub fn get_mut(&mut self, i: usize) -> Result<&mut Real> {
        check(i, N)?;
        Ok(&mut self.data[self.offset + i * self.stride])
    }

    #[inline]
    pub fn set(&mut self, i: usize, value: Real) -> Result<()> {
        *self.get_mut(i)? = value;
        Ok(())
    }

    pub fn fill(&mut self, value: Real) {
        for i in 0..N {
            self.data[self.offset + i * self.stride] = value;
        }
    }

    /// Reborrow as a read-only view.
    pub fn as_ref(&self) -> VecRef<'_, N> {
        VecRef {
            data: &*self.data,
            offset: self.offset,
            stride: self.stride,
            orientation: self.orientation,
        }
    }

    /// Evaluate `expr` element by element straight into the backing storage.
    pub fn assign(&mut self, expr: &Expr<'_>) -> Result<()> {
        let len = expr.len()?;
        if len != N {
            return Err(Error::ShapeMismatch { expected: N, found: len });
        }
        for i in 0..N {
            self.data[self.offset + i * self.stride] = expr.eval(i)?;
        }
        Ok(())
    }

    /// `self += expr`, element by element.
    pub fn add_assign(&mut self, expr: &Expr<'_>) -> Result<()> {
        let len = expr.len()?;
        if len != N {
            return Err(Error::ShapeMismatch { expected: N, found: len });
        }
        for i in 0..N {
            self.data[self.offset + i * self.stride] += expr.eval(i)?;
        }
        Ok(())
    }

    pub fn scale(&mut self, factor: Real) {
        for i in 0..N {
            self.data[self.offset + i * self.stride] *= factor;
        }
    }
}

impl<const N: usize> Linear for VecRef<'_, N> {
    fn len(&self) -> usize {
        N
    }

    fn at(&self, k: usize) -> Result<Real> {
        self.get(k)
    }
}

impl<const N: usize> Linear for VecMut<'_, N> {
    fn len(&self) -> usize {
        N
    }

    fn at(&self, k: usize) -> Result<Real> {
        self.get(k)
    }
}

// ============================================================================
// BLOCK VIEWS
// ============================================================================

/// Read-only `BR x BC` window into an `R`-row backing matrix.
#[derive(Debug, Clone, Copy)]
pub struct BlockRef<'a, const BR: usize, const BC: usize> {
    data: &'a [Real],
    offset: usize,
    col_stride: usize,
}

impl<'a, const BR: usize, const BC: usize> BlockRef<'a, BR, BC> {
    pub const ROWS: usize = BR;
    pub const COLS: usize = BC;
    pub const SIZE: usize = BR * BC;

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> Result<Real> {
        check(i, BR)?;
        check(j, BC)?;
        Ok(self.data[self.offset + i + j * self.col_stride])
    }

    /// Copy the window out into an owned matrix.
    pub fn to_matrix(&self) -> SMatrix<Real, BR, BC> {
        SMatrix::<Real, BR, BC>::from_fn(|i, j| self.data[self.offset + i + j * self.col_stride])
    }
}

impl<const BR: usize, const BC: usize> Linear for BlockRef<'_, BR, BC> {
    fn len(&self) -> usize {
        BR * BC
    }

    fn at(&self, k: usize) -> Result<Real> {
        check(k, BR * BC)?;
        self.get(k % BR, k / BR)
    }
}

/// Mutable `BR x BC` window.
#[derive(Debug)]
pub struct BlockMut<'a, const BR: usize, const BC: usize> {
    data: &'a mut [Real],
    offset: usize,
    col_stride: usize,
}

impl<'a, const BR: usize, const BC: usize> BlockMut<'a, BR, BC> {
    pub const ROWS: usize = BR;
    pub const COLS: usize = BC;

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> Result<Real> {
        check(i, BR)?;
        check(j, BC)?;
        Ok(self.data[self.offset + i + j * self.col_stride])
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: Real) -> Result<()> {
        check(i, BR)?;
        check(j, BC)?;
        self.data[self.offset + i + j * self.col_stride] = value;
        Ok(())
    }

    /// Row `i` of the window, itself a view into the same backing storage.
    pub fn row_ref_mut(&mut self, i: usize) -> Result<VecMut<'_, BC>> {
        check(i, BR)?;
        Ok(VecMut {
            data: &mut *self.data,
            offset: self.offset + i,
            stride: self.col_stride,
            orientation: Orientation::Row,
        })
    }

    /// Assign an expression in column-major order.
    pub fn assign(&mut self, expr: &Expr<'_>) -> Result<()> {
        let len = expr.len()?;
        if len != BR * BC {
            return Err(Error::ShapeMismatch { expected: BR * BC, found: len });
        }
        for k in 0..BR * BC {
            let (i, j) = (k % BR, k / BR);
            self.data[self.offset + i + j * self.col_stride] = expr.eval(k)?;
        }
        Ok(())
    }

    pub fn as_ref(&self) -> BlockRef<'_, BR, BC> {
        BlockRef { data: &*self.data, offset: self.offset, col_stride: self.col_stride }
    }
}

// ============================================================================
// CONSTRUCTION FROM BACKING STORAGE
// ============================================================================

/// View constructors on fixed-size matrices. Names avoid nalgebra's inherent
/// `row` / `column` so both APIs stay reachable.
pub trait Views<const R: usize, const C: usize> {
    fn row_ref(&self, r: usize) -> Result<VecRef<'_, C>>;
    fn row_ref_mut(&mut self, r: usize) -> Result<VecMut<'_, C>>;
    fn col_ref(&self, c: usize) -> Result<VecRef<'_, R>>;
    fn col_ref_mut(&mut self, c: usize) -> Result<VecMut<'_, R>>;
    fn block_ref<const BR: usize, const BC: usize>(&self, r0: usize, c0: usize) -> Result<BlockRef<'_, BR, BC>>;
    fn block_ref_mut<const BR: usize, const BC: usize>(&mut self, r0: usize, c0: usize) -> Result<BlockMut<'_, BR, BC>>;
}

fn check_block(r0: usize, c0: usize, br: usize, bc: usize, rows: usize, cols: usize) -> Result<()> {
    if r0 + br > rows {
        return Err(Error::OutOfBounds { index: r0 + br - 1, len: rows });
    }
    if c0 + bc > cols {
        return Err(Error::OutOfBounds { index: c0 + bc - 1, len: cols });
    }
    Ok(())
}

impl<const R: usize, const C: usize> Views<R, C> for SMatrix<Real, R, C> {
    fn row_ref(&self, r: usize) -> Result<VecRef<'_, C>> {
        check(r, R)?;
        Ok(VecRef { data: self.as_slice(), offset: r, stride: R, orientation: Orientation::Row })
    }

    fn row_ref_mut(&mut self, r: usize) -> Result<VecMut<'_, C>> {
        check(r, R)?;
        Ok(VecMut { data: self.as_mut_slice(), offset: r, stride: R, orientation: Orientation::Row })
    }

    fn col_ref(&self, c: usize) -> Result<VecRef<'_, R>> {
        check(c, C)?;
        Ok(VecRef { data: self.as_slice(), offset: c * R, stride: 1, orientation: Orientation::Column })
    }

    fn col_ref_mut(&mut self, c: usize) -> Result<VecMut<'_, R>> {
        check(c, C)?;
        Ok(VecMut { data: self.as_mut_slice(), offset: c * R, stride: 1, orientation: Orientation::Column })
    }

    fn block_ref<const BR: usize, const BC: usize>(&self, r0: usize, c0: usize) -> Result<BlockRef<'_, BR, BC>> {
        check_block(r0, c0, BR, BC, R, C)?;
        Ok(BlockRef { data: self.as_slice(), offset: r0 + c0 * R, col_stride: R })
    }

    fn block_ref_mut<const BR: usize, const BC: usize>(&mut self, r0: usize, c0: usize) -> Result<BlockMut<'_, BR, BC>> {
        check_block(r0, c0, BR, BC, R, C)?;
        Ok(BlockMut { data: self.as_mut_slice(), offset: r0 + c0 * R, col_stride: R })
    }
}

/// Diagonal views exist only for square storage.
pub trait DiagonalViews<const N: usize> {
    fn diag_ref(&self) -> VecRef<'_, N>;
    fn diag_ref_mut(&mut self) -> VecMut<'_, N>;
}

impl<const N: usize> DiagonalViews<N> for SMatrix<Real, N, N> {
    fn diag_ref(&self) -> VecRef<'_, N> {
        VecRef { data: self.as_slice(), offset: 0, stride: N + 1, orientation: Orientation::Diagonal }
    }

    fn diag_ref_mut(&mut self) -> VecMut<'_, N> {
        VecMut { data: self.as_mut_slice(), offset: 0, stride: N + 1, orientation: Orientation::Diagonal }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Mat3, Vec3};
    use nalgebra::Matrix4;

    fn counting() -> Mat3 {
        Mat3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0)
    }

    #[test]
    fn row_and_column_alias_backing_storage() {
        let mut m = counting();
        assert_eq!(m.row_ref(1).unwrap().get(2).unwrap(), 6.0);
        assert_eq!(m.col_ref(0).unwrap().get(2).unwrap(), 7.0);

        m.row_ref_mut(0).unwrap().set(1, -2.5).unwrap();
        assert_eq!(m[(0, 1)], -2.5);
        assert_eq!(m.row_ref(0).unwrap().get(1).unwrap(), -2.5);

        m.col_ref_mut(2).unwrap().fill(0.0);
        assert_eq!(m[(0, 2)], 0.0);
        assert_eq!(m[(1, 2)], 0.0);
        assert_eq!(m[(2, 2)], 0.0);
    }

    #[test]
    fn diagonal_view() {
        let mut m = counting();
        let diag: Vec<f64> = m.diag_ref().iter().collect();
        assert_eq!(diag, vec![1.0, 5.0, 9.0]);
        m.diag_ref_mut().scale(2.0);
        assert_eq!(m[(1, 1)], 10.0);
        assert_eq!(m[(0, 1)], 2.0);
    }

    #[test]
    fn block_view_round_trip() {
        let mut m = Matrix4::<f64>::zeros();
        {
            let mut block = m.block_ref_mut::<2, 2>(1, 2).unwrap();
            block.set(0, 0, 1.5).unwrap();
            block.set(1, 1, -3.0).unwrap();
            block.row_ref_mut(1).unwrap().set(0, 7.0).unwrap();
        }
        assert_eq!(m[(1, 2)], 1.5);
        assert_eq!(m[(2, 3)], -3.0);
        assert_eq!(m[(2, 2)], 7.0);

        let block = m.block_ref::<2, 2>(1, 2).unwrap();
        assert_eq!(block.get(1, 0).unwrap(), 7.0);
        assert_eq!(block.to_matrix()[(1, 1)], -3.0);
    }

    #[test]
    fn out_of_range_is_reported() {
        let mut m = counting();
        assert!(m.row_ref(3).unwrap_err().is_out_of_bounds());
        assert!(m.col_ref_mut(5).unwrap_err().is_out_of_bounds());
        assert!(m.row_ref(0).unwrap().get(3).unwrap_err().is_out_of_bounds());
        assert!(m.block_ref::<2, 2>(2, 0).is_err());
        assert!(m.block_ref::<2, 2>(1, 1).is_ok());
        let mut row = m.row_ref_mut(2).unwrap();
        assert!(row.set(9, 1.0).is_err());
    }

    #[test]
    fn assign_expression_into_row() {
        let mut m = Mat3::zeros();
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(0.5, 0.5, 0.5);
        let expr = Expr::of(&a) * 2.0 - Expr::of(&b);
        m.row_ref_mut(1).unwrap().assign(&expr).unwrap();
        assert_eq!(m[(1, 0)], 1.5);
        assert_eq!(m[(1, 1)], 3.5);
        assert_eq!(m[(1, 2)], 5.5);
        assert_eq!(m[(0, 0)], 0.0);
    }

    #[test]
    fn assign_rejects_wrong_length() {
        let mut m = Mat3::zeros();
        let v = nalgebra::Vector2::new(1.0, 2.0);
        let err = m.col_ref_mut(0).unwrap().assign(&Expr::of(&v)).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { expected: 3, found: 2 }));
    }

    #[test]
    fn view_to_view_arithmetic() {
        let src = counting();
        let mut dst = Mat3::zeros();
        let r0 = src.row_ref(0).unwrap();
        let r2 = src.row_ref(2).unwrap();
        dst.col_ref_mut(1).unwrap().assign(&(Expr::of(&r2) - Expr::of(&r0))).unwrap();
        assert_eq!(dst.column(1).into_owned(), Vec3::new(6.0, 6.0, 6.0));
        assert_eq!(r0.dot(&r2).unwrap(), 1.0 * 7.0 + 2.0 * 8.0 + 3.0 * 9.0);
    }
}
