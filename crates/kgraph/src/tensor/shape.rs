//! Partially known tensor shapes and the static inference rules built on them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Logical shape of a graph tensor.
///
/// A tensor whose rank is not known is [`Shape::Unknown`]; this is a different state from a
/// tensor of known rank whose axes are unknown (`Known(vec![None, None])`) and from a scalar
/// (`Known(vec![])`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Unknown,
    Known(Vec<Option<usize>>),
}

impl Shape {
    /// Builds a shape of known rank; `None` marks an axis whose extent is unknown.
    pub fn new<I>(dims: I) -> Self
    where
        I: IntoIterator<Item = Option<usize>>,
    {
        Shape::Known(dims.into_iter().collect())
    }

    /// Builds a fully known shape.
    pub fn known(dims: &[usize]) -> Self {
        Shape::Known(dims.iter().copied().map(Some).collect())
    }

    pub fn unknown() -> Self {
        Shape::Unknown
    }

    pub fn scalar() -> Self {
        Shape::Known(Vec::new())
    }

    /// Number of axes, or `None` when the rank itself is unknown.
    pub fn rank(&self) -> Option<usize> {
        self.dims().map(<[_]>::len)
    }

    pub fn dims(&self) -> Option<&[Option<usize>]> {
        match self {
            Shape::Unknown => None,
            Shape::Known(dims) => Some(dims),
        }
    }

    /// Returns the concrete extents when every axis is known.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        self.dims()?.iter().copied().collect()
    }

    pub fn num_elements(&self) -> Option<usize> {
        self.static_dims().map(|dims| dims.iter().product())
    }

    pub fn is_fully_known(&self) -> bool {
        self.static_dims().is_some()
    }

    /// Reports whether `concrete` is a realization of this shape: same rank and every known
    /// axis equal.
    pub fn is_compatible_with(&self, concrete: &[usize]) -> bool {
        match self.dims() {
            None => true,
            Some(dims) => {
                dims.len() == concrete.len()
                    && dims
                        .iter()
                        .zip(concrete)
                        .all(|(dim, actual)| dim.map_or(true, |dim| dim == *actual))
            }
        }
    }

    /// Infers the result of contracting the last axis of `lhs` with the first axis of `rhs`.
    ///
    /// The result keeps `lhs[..r-1]` followed by `rhs[1..]`. When either contraction extent is
    /// unknown the compatibility check is left to the engine.
    pub fn dot(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
        let (Some(lhs_dims), Some(rhs_dims)) = (lhs.dims(), rhs.dims()) else {
            return Err(Error::invalid(format!(
                "dot requires operands of known rank, got {lhs} and {rhs}"
            )));
        };
        let (Some((lhs_contract, lhs_free)), Some((rhs_contract, rhs_free))) =
            (lhs_dims.split_last(), rhs_dims.split_first())
        else {
            return Err(Error::invalid(format!(
                "dot requires operands of rank >= 1, got {lhs} and {rhs}"
            )));
        };

        if let (Some(left), Some(right)) = (lhs_contract, rhs_contract) {
            if left != right {
                return Err(Error::shape(
                    "dot",
                    format!(
                        "cannot contract {lhs} with {rhs}: inner dimensions {left} and {right} differ"
                    ),
                ));
            }
        }

        let mut dims = Vec::with_capacity(lhs_free.len() + rhs_free.len());
        dims.extend_from_slice(lhs_free);
        dims.extend_from_slice(rhs_free);
        Ok(Shape::Known(dims))
    }

    /// Infers the result of an elementwise op under trailing-axis broadcasting.
    ///
    /// Known extents must be equal or one of them must be 1. An unknown axis paired with a known
    /// extent other than 1 yields that extent; the engine rejects a conflicting runtime value.
    pub fn broadcast(op: &'static str, lhs: &Shape, rhs: &Shape) -> Result<Shape> {
        let (Some(lhs_dims), Some(rhs_dims)) = (lhs.dims(), rhs.dims()) else {
            return Ok(Shape::Unknown);
        };

        let rank = lhs_dims.len().max(rhs_dims.len());
        let mut dims = vec![None; rank];
        for (offset, slot) in dims.iter_mut().rev().enumerate() {
            let left = axis_from_end(lhs_dims, offset);
            let right = axis_from_end(rhs_dims, offset);
            *slot = match (left, right) {
                (Some(Some(1)), other) | (other, Some(Some(1))) => other.unwrap_or(Some(1)),
                (Some(Some(a)), Some(Some(b))) if a != b => {
                    return Err(Error::shape(
                        op,
                        format!("cannot broadcast {lhs} with {rhs}: extents {a} and {b} differ"),
                    ));
                }
                (Some(Some(a)), _) | (_, Some(Some(a))) => Some(a),
                _ => None,
            };
        }
        Ok(Shape::Known(dims))
    }

    /// Shape after reducing along `axes` (already normalized and in range).
    pub(crate) fn reduce(&self, axes: &[usize], keepdims: bool) -> Shape {
        match self {
            Shape::Unknown => Shape::Unknown,
            Shape::Known(dims) => Shape::Known(
                dims.iter()
                    .enumerate()
                    .filter_map(|(idx, dim)| match (axes.contains(&idx), keepdims) {
                        (false, _) => Some(*dim),
                        (true, true) => Some(Some(1)),
                        (true, false) => None,
                    })
                    .collect(),
            ),
        }
    }
}

fn axis_from_end(dims: &[Option<usize>], offset: usize) -> Option<Option<usize>> {
    dims.len()
        .checked_sub(offset + 1)
        .map(|index| dims[index])
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::known(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::known(&dims)
    }
}

impl<const N: usize> From<[Option<usize>; N]> for Shape {
    fn from(dims: [Option<usize>; N]) -> Self {
        Shape::new(dims)
    }
}

impl From<Vec<Option<usize>>> for Shape {
    fn from(dims: Vec<Option<usize>>) -> Self {
        Shape::Known(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(dims) = self.dims() else {
            return f.write_str("<unknown>");
        };
        f.write_str("(")?;
        for (idx, dim) in dims.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            match dim {
                Some(dim) => write!(f, "{dim}")?,
                None => f.write_str("None")?,
            }
        }
        if dims.len() == 1 {
            f.write_str(",")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_rank_is_not_rank_zero() {
        assert_eq!(Shape::unknown().rank(), None);
        assert_eq!(Shape::scalar().rank(), Some(0));
        assert_eq!(Shape::new([None, None]).rank(), Some(2));
        assert_eq!(Shape::scalar().num_elements(), Some(1));
    }

    #[test]
    fn dot_keeps_unknown_batch_axis() {
        let lhs = Shape::new([None, Some(2)]);
        let rhs = Shape::known(&[2, 3]);
        let out = Shape::dot(&lhs, &rhs).unwrap();
        assert_eq!(out, Shape::new([None, Some(3)]));
        assert_eq!(out.to_string(), "(None, 3)");
    }

    #[test]
    fn dot_concatenates_free_axes_of_higher_rank() {
        let lhs = Shape::known(&[2, 4, 5]);
        let rhs = Shape::known(&[5, 6, 7]);
        let out = Shape::dot(&lhs, &rhs).unwrap();
        assert_eq!(out, Shape::known(&[2, 4, 6, 7]));

        let vector = Shape::known(&[5]);
        assert_eq!(Shape::dot(&lhs, &vector).unwrap(), Shape::known(&[2, 4]));
    }

    #[test]
    fn dot_rejects_conflicting_contraction() {
        let err = Shape::dot(&Shape::known(&[2, 3]), &Shape::known(&[4, 5])).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { op: "dot", .. }));
    }

    #[test]
    fn dot_defers_unknown_contraction() {
        let out = Shape::dot(&Shape::new([Some(2), None]), &Shape::known(&[4, 5])).unwrap();
        assert_eq!(out, Shape::known(&[2, 5]));
    }

    #[test]
    fn dot_needs_known_rank() {
        let err = Shape::dot(&Shape::unknown(), &Shape::known(&[4, 5])).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = Shape::dot(&Shape::scalar(), &Shape::known(&[4, 5])).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn broadcast_aligns_trailing_axes() {
        let out = Shape::broadcast("mul", &Shape::known(&[4, 1, 3]), &Shape::known(&[5, 1])).unwrap();
        assert_eq!(out, Shape::known(&[4, 5, 3]));

        let out = Shape::broadcast("mul", &Shape::new([None, Some(3)]), &Shape::known(&[3])).unwrap();
        assert_eq!(out, Shape::new([None, Some(3)]));

        let out = Shape::broadcast("mul", &Shape::new([None]), &Shape::known(&[7])).unwrap();
        assert_eq!(out, Shape::known(&[7]));

        let out = Shape::broadcast("mul", &Shape::new([None]), &Shape::known(&[1])).unwrap();
        assert_eq!(out, Shape::new([None]));
    }

    #[test]
    fn broadcast_rejects_unequal_known_axes() {
        let err = Shape::broadcast("mul", &Shape::known(&[2, 3]), &Shape::known(&[2, 4])).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { op: "mul", .. }));
    }

    #[test]
    fn broadcast_with_unknown_rank_is_unknown() {
        let out = Shape::broadcast("add", &Shape::unknown(), &Shape::known(&[3])).unwrap();
        assert_eq!(out, Shape::Unknown);
    }

    #[test]
    fn reduce_drops_or_keeps_axes() {
        let shape = Shape::new([None, Some(4), Some(5)]);
        assert_eq!(shape.reduce(&[2], true), Shape::new([None, Some(4), Some(1)]));
        assert_eq!(shape.reduce(&[0, 2], false), Shape::known(&[4]));
        assert_eq!(shape.reduce(&[0, 1, 2], false), Shape::scalar());
    }

    #[test]
    fn display_matches_tuple_notation() {
        assert_eq!(Shape::known(&[3]).to_string(), "(3,)");
        assert_eq!(Shape::scalar().to_string(), "()");
        assert_eq!(Shape::unknown().to_string(), "<unknown>");
    }
}
