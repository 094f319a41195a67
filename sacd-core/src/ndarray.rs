//! Flat numeric arrays crossing process boundaries.
//!
//! [`NdArray`] is the single array representation used everywhere in this
//! workspace: inside the replay buffer, in episode traces and on the wire.
//! It is a `(dtype, shape, flat little-endian byte payload)` triplet, so a
//! serialized array round-trips bit-exactly regardless of the element type.
//! An array with an empty payload stands for "no value" (e.g. the recurrent
//! state of a feed-forward policy).
use crate::error::CoreError;
use serde::{Deserialize, Serialize};

/// Element type of an [`NdArray`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum Dtype {
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// Unsigned byte.
    U8,
}

impl Dtype {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            Dtype::F32 | Dtype::I32 => 4,
            Dtype::F64 | Dtype::I64 => 8,
            Dtype::U8 => 1,
        }
    }
}

/// A dense array with explicit shape, element type and flat byte payload.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct NdArray {
    /// Element type.
    pub dtype: Dtype,

    /// Dimensions, outermost first.
    pub shape: Vec<usize>,

    /// Little-endian element bytes, row-major.
    pub data: Vec<u8>,
}

impl NdArray {
    /// An array standing for "no value".
    pub fn empty() -> Self {
        Self {
            dtype: Dtype::F32,
            shape: vec![0],
            data: vec![],
        }
    }

    /// `true` if this array stands for "no value".
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Builds an `f32` array from values.
    ///
    /// # Panics
    ///
    /// Panics if the number of values does not match the shape.
    pub fn from_f32(shape: &[usize], values: &[f32]) -> Self {
        assert_eq!(shape.iter().product::<usize>(), values.len());
        let mut data = Vec::with_capacity(values.len() * 4);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        Self {
            dtype: Dtype::F32,
            shape: shape.to_vec(),
            data,
        }
    }

    /// Builds a zero-filled `f32` array.
    pub fn zeros_f32(shape: &[usize]) -> Self {
        let n = shape.iter().product::<usize>();
        Self {
            dtype: Dtype::F32,
            shape: shape.to_vec(),
            data: vec![0u8; n * 4],
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of the outermost dimension.
    pub fn rows(&self) -> usize {
        *self.shape.first().unwrap_or(&0)
    }

    fn row_bytes(&self) -> usize {
        self.shape[1..].iter().product::<usize>() * self.dtype.size()
    }

    /// Decodes the payload as `f32` values.
    pub fn to_f32(&self) -> Result<Vec<f32>, CoreError> {
        if self.dtype != Dtype::F32 {
            return Err(CoreError::DtypeMismatch {
                expected: Dtype::F32,
                actual: self.dtype,
            });
        }
        Ok(self
            .data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Copies rows `[start, end)` into a new array.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        assert!(start <= end && end <= self.rows());
        let rb = self.row_bytes();
        let mut shape = self.shape.clone();
        shape[0] = end - start;
        Self {
            dtype: self.dtype,
            shape,
            data: self.data[start * rb..end * rb].to_vec(),
        }
    }

    /// Overwrites the leading rows of `self` with the rows of `src`.
    ///
    /// Used by pre-allocated episode slots: the slot keeps its maximal
    /// shape and only the `src.rows()` prefix carries live data.
    pub fn copy_rows_from(&mut self, src: &NdArray) -> Result<(), CoreError> {
        if self.dtype != src.dtype {
            return Err(CoreError::DtypeMismatch {
                expected: self.dtype,
                actual: src.dtype,
            });
        }
        if self.shape[1..] != src.shape[1..] || src.rows() > self.rows() {
            return Err(CoreError::ShapeMismatch(format!(
                "cannot copy {:?} into slot of shape {:?}",
                src.shape, self.shape
            )));
        }
        self.data[..src.data.len()].copy_from_slice(&src.data);
        Ok(())
    }

    /// Removes a leading dimension of size one.
    ///
    /// Bridges the `[1, ...]` row convention of environments and models
    /// to the per-step rows an episode trace stacks. Empty arrays pass
    /// through unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the leading dimension is not one.
    pub fn squeeze_first(&self) -> Self {
        if self.is_empty() {
            return self.clone();
        }
        assert_eq!(self.rows(), 1);
        Self {
            dtype: self.dtype,
            shape: self.shape[1..].to_vec(),
            data: self.data.clone(),
        }
    }

    /// Stacks equally-shaped arrays along a new outermost dimension.
    pub fn stack_rows(rows: &[NdArray]) -> Result<Self, CoreError> {
        let first = rows
            .first()
            .ok_or_else(|| CoreError::ShapeMismatch("cannot stack zero rows".into()))?;
        let mut data = Vec::with_capacity(first.data.len() * rows.len());
        for r in rows {
            if r.shape != first.shape || r.dtype != first.dtype {
                return Err(CoreError::ShapeMismatch(format!(
                    "cannot stack {:?} with {:?}",
                    r.shape, first.shape
                )));
            }
            data.extend_from_slice(&r.data);
        }
        let mut shape = vec![rows.len()];
        shape.extend_from_slice(&first.shape);
        Ok(Self {
            dtype: first.dtype,
            shape,
            data,
        })
    }

    /// `true` if any element of a float array is NaN.
    ///
    /// Integer arrays never contain NaN.
    pub fn has_nan(&self) -> bool {
        match self.dtype {
            Dtype::F32 => self
                .data
                .chunks_exact(4)
                .any(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]).is_nan()),
            Dtype::F64 => self.data.chunks_exact(8).any(|c| {
                f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]).is_nan()
            }),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_roundtrip() {
        let a = NdArray::from_f32(&[2, 3], &[1., 2., 3., 4., 5., 6.]);
        assert_eq!(a.rows(), 2);
        assert_eq!(a.len(), 6);
        assert_eq!(a.to_f32().unwrap(), vec![1., 2., 3., 4., 5., 6.]);
    }

    #[test]
    fn test_slice_rows() {
        let a = NdArray::from_f32(&[3, 2], &[0., 1., 2., 3., 4., 5.]);
        let b = a.slice_rows(1, 3);
        assert_eq!(b.shape, vec![2, 2]);
        assert_eq!(b.to_f32().unwrap(), vec![2., 3., 4., 5.]);
    }

    #[test]
    fn test_stack_rows() {
        let rows = vec![
            NdArray::from_f32(&[2], &[1., 2.]),
            NdArray::from_f32(&[2], &[3., 4.]),
        ];
        let a = NdArray::stack_rows(&rows).unwrap();
        assert_eq!(a.shape, vec![2, 2]);
        assert_eq!(a.to_f32().unwrap(), vec![1., 2., 3., 4.]);
    }

    #[test]
    fn test_copy_rows_into_slot() {
        let mut slot = NdArray::zeros_f32(&[4, 2]);
        let src = NdArray::from_f32(&[2, 2], &[1., 2., 3., 4.]);
        slot.copy_rows_from(&src).unwrap();
        assert_eq!(slot.slice_rows(0, 2), src);
        // shape mismatch is rejected
        let bad = NdArray::from_f32(&[2, 3], &[0.; 6]);
        assert!(slot.copy_rows_from(&bad).is_err());
    }

    #[test]
    fn test_squeeze_first() {
        let a = NdArray::from_f32(&[1, 3], &[1., 2., 3.]);
        let b = a.squeeze_first();
        assert_eq!(b.shape, vec![3]);
        assert_eq!(b.to_f32().unwrap(), vec![1., 2., 3.]);
        assert!(NdArray::empty().squeeze_first().is_empty());
    }

    #[test]
    fn test_nan_detection() {
        let a = NdArray::from_f32(&[3], &[0., f32::NAN, 1.]);
        assert!(a.has_nan());
        let b = NdArray::from_f32(&[2], &[0., 1.]);
        assert!(!b.has_nan());
        assert!(!NdArray::empty().has_nan());
    }
}
