use crate::dtype::{Dtype, Element};
use crate::error::Error;
use crate::with_dtype;
use ndarray::{ArrayD, IxDyn, ShapeError};

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Dense buffer of one dtype. Every array's data lives in one of these.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum Storage {
    Bool(ArrayD<bool>),
    Int8(ArrayD<i8>),
    Int16(ArrayD<i16>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    UInt8(ArrayD<u8>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
}

impl Storage {
    pub fn from_array<T: Element>(data: ArrayD<T>) -> Self {
        T::wrap(data)
    }

    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Result<Self, Error> {
        let actual_len = data.len();
        let map_err = |_e: ShapeError| Error::ShapeMismatch {
            expected: shape.to_vec(),
            actual: vec![actual_len],
        };
        let array = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(map_err)?;
        Ok(Self::from_array(array))
    }

    pub fn full(shape: &[usize], dtype: Dtype, value: f64) -> Self {
        with_dtype!(dtype, T => T::wrap(ArrayD::from_elem(IxDyn(shape), T::from_f64(value))))
    }

    pub fn zeros(shape: &[usize], dtype: Dtype) -> Self {
        with_dtype!(dtype, T => T::wrap(ArrayD::from_elem(IxDyn(shape), T::zero())))
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            Storage::Bool(_) => Dtype::Bool,
            Storage::Int8(_) => Dtype::Int8,
            Storage::Int16(_) => Dtype::Int16,
            Storage::Int32(_) => Dtype::Int32,
            Storage::Int64(_) => Dtype::Int64,
            Storage::UInt8(_) => Dtype::UInt8,
            Storage::Float32(_) => Dtype::Float32,
            Storage::Float64(_) => Dtype::Float64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_dtype!(self.dtype(), T => self.view::<T>().map(|a| a.shape()).unwrap_or(&[]))
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Typed view of the buffer; fails if `T` is not this storage's element type.
    pub fn view<T: Element>(&self) -> Result<&ArrayD<T>, Error> {
        let dtype = self.dtype();
        T::unwrap_ref(self).ok_or_else(|| {
            Error::DtypeError(format!("Expected {} storage, found {}", T::DTYPE, dtype))
        })
    }

    pub fn view_mut<T: Element>(&mut self) -> Result<&mut ArrayD<T>, Error> {
        let dtype = self.dtype();
        T::unwrap_mut(self).ok_or_else(|| {
            Error::DtypeError(format!("Expected {} storage, found {}", T::DTYPE, dtype))
        })
    }

    /// Elements in logical (row-major) order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, Error> {
        Ok(self.view::<T>()?.iter().copied().collect())
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        with_dtype!(self.dtype(), T => match self.view::<T>() {
            Ok(data) => data.iter().map(|v| v.to_f64()).collect(),
            Err(_) => Vec::new(),
        })
    }

    /// Reads an index-like buffer as signed 64-bit integers.
    pub fn to_index_vec(&self) -> Result<Vec<i64>, Error> {
        match self {
            Storage::Int8(data) => Ok(data.iter().map(|&v| v as i64).collect()),
            Storage::Int16(data) => Ok(data.iter().map(|&v| v as i64).collect()),
            Storage::Int32(data) => Ok(data.iter().map(|&v| v as i64).collect()),
            Storage::Int64(data) => Ok(data.iter().copied().collect()),
            Storage::UInt8(data) => Ok(data.iter().map(|&v| v as i64).collect()),
            _ => Err(Error::DtypeError(format!(
                "Indices must have an integral dtype, got {}",
                self.dtype()
            ))),
        }
    }

    /// Overwrites the contents with `src`; dtype and shape must match.
    pub fn assign(&mut self, src: &Storage) -> Result<(), Error> {
        if self.dtype() != src.dtype() {
            return Err(Error::DtypeMismatch {
                op: "assign".to_string(),
                lhs: self.dtype(),
                rhs: src.dtype(),
            });
        }
        if self.shape() != src.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().to_vec(),
                actual: src.shape().to_vec(),
            });
        }
        with_dtype!(self.dtype(), T => {
            let src = src.view::<T>()?;
            self.view_mut::<T>()?.assign(src);
        });
        Ok(())
    }

    /// Adds `delta` (converted to the element type) to the element at `flat_index`.
    pub(crate) fn offset_element(&mut self, flat_index: usize, delta: f64) -> Result<(), Error> {
        let len = self.len();
        with_dtype!(self.dtype(), T => {
            let slot = self.view_mut::<T>()?.iter_mut().nth(flat_index).ok_or_else(|| {
                Error::IndexError(format!(
                    "Flat index {} is out of bounds for {} element(s)",
                    flat_index, len
                ))
            })?;
            *slot = Element::add(*slot, T::from_f64(delta));
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_rejects_wrong_length() {
        let result = Storage::from_vec(vec![1.0f32, 2.0, 3.0], &[2, 2]);
        assert_eq!(
            result,
            Err(Error::ShapeMismatch {
                expected: vec![2, 2],
                actual: vec![3],
            })
        );
    }

    #[test]
    fn full_and_views() {
        let storage = Storage::full(&[2, 3], Dtype::Int16, 7.0);
        assert_eq!(storage.dtype(), Dtype::Int16);
        assert_eq!(storage.shape(), &[2, 3]);
        assert_eq!(storage.to_vec::<i16>().unwrap(), vec![7; 6]);
        assert!(storage.view::<f32>().is_err());
    }

    #[test]
    fn index_vec_requires_integral_dtype() {
        let idx = Storage::from_vec(vec![0u8, 2, 1], &[3]).unwrap();
        assert_eq!(idx.to_index_vec().unwrap(), vec![0, 2, 1]);
        let floats = Storage::from_vec(vec![0.0f32], &[1]).unwrap();
        assert!(matches!(floats.to_index_vec(), Err(Error::DtypeError(_))));
    }

    #[test]
    fn offset_element_in_native_precision() {
        let mut storage = Storage::from_vec(vec![1.0f32, 2.0], &[2]).unwrap();
        storage.offset_element(1, 1e-3f32 as f64).unwrap();
        assert_eq!(storage.to_vec::<f32>().unwrap(), vec![1.0, 2.0f32 + 1e-3f32]);
        assert!(storage.offset_element(2, 1.0).is_err());
    }
}
