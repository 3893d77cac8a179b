//! Host backend: kernels run on the CPU over `ndarray` buffers.

use crate::array::Array;
use crate::backend::op::{
    AddAtKernel, AddAtOp, AddOp, BinaryKernel, CopyOp, FillKernel, FillOp, MultiplyOp, NegateOp,
    OpRegistry, SubtractOp, TakeKernel, TakeOp, UnaryKernel,
};
use crate::backend::{Backend, Device, DeviceTable};
use crate::dtype::Element;
use crate::error::Error;
use crate::ops::indexing::{check_add_at_args, check_take_args, wrap_index};
use crate::storage::Storage;
use crate::with_dtype;
use ndarray::{ArrayD, IxDyn, Zip};
use std::sync::Arc;

/// Devices created when no count is given.
pub const DEFAULT_DEVICE_COUNT: usize = 4;

/// The built-in CPU backend, registered as `"native"`.
#[derive(Debug)]
pub struct NativeBackend {
    device_count: usize,
    devices: DeviceTable,
}

impl NativeBackend {
    pub const NAME: &'static str = "native";

    pub fn new() -> Self {
        Self::with_device_count(DEFAULT_DEVICE_COUNT)
    }

    pub fn with_device_count(device_count: usize) -> Self {
        Self {
            device_count,
            devices: DeviceTable::new(),
        }
    }

    /// Registers every native kernel into `registry`.
    ///
    /// Other backends may call this first and then override individual ops.
    pub fn register_kernels(registry: &mut OpRegistry) {
        registry.register::<AddOp>(Arc::new(NativeAdd));
        registry.register::<SubtractOp>(Arc::new(NativeSubtract));
        registry.register::<MultiplyOp>(Arc::new(NativeMultiply));
        registry.register::<NegateOp>(Arc::new(NativeNegate));
        registry.register::<CopyOp>(Arc::new(NativeCopy));
        registry.register::<FillOp>(Arc::new(NativeFill));
        registry.register::<TakeOp>(Arc::new(NativeTake));
        registry.register::<AddAtOp>(Arc::new(NativeAddAt));
    }
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for NativeBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn device_count(&self) -> usize {
        self.device_count
    }

    fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    fn create_device(&self, index: usize) -> Result<Device, Error> {
        let mut ops = OpRegistry::new();
        Self::register_kernels(&mut ops);
        Ok(Device::new(Self::NAME, index, ops))
    }
}

// --- Helpers ---

/// Writes a computed buffer into `out`. All input borrows must be released first.
fn write_output(out: &Array, result: Storage) -> Result<(), Error> {
    out.buffer().borrow_mut().assign(&result)
}

fn binary_map<T: Element>(a: &Storage, b: &Storage, f: fn(T, T) -> T) -> Result<Storage, Error> {
    let a = a.view::<T>()?;
    let b = b.view::<T>()?;
    if a.shape() != b.shape() {
        return Err(Error::ShapeMismatch {
            expected: a.shape().to_vec(),
            actual: b.shape().to_vec(),
        });
    }
    Ok(T::wrap(Zip::from(a).and(b).map_collect(|&x, &y| f(x, y))))
}

fn unary_map<T: Element>(a: &Storage, f: fn(T) -> T) -> Result<Storage, Error> {
    Ok(T::wrap(a.view::<T>()?.mapv(f)))
}

/// Sizes of the axes before, at, and after `axis`.
fn split_at_axis(shape: &[usize], axis: usize) -> (usize, usize, usize) {
    let outer = shape[..axis].iter().product();
    let inner = shape[axis + 1..].iter().product();
    (outer, shape[axis], inner)
}

fn take_values<T: Element>(
    a: &Storage,
    indices: &[i64],
    axis: usize,
    out_shape: &[usize],
) -> Result<Storage, Error> {
    let a = a.view::<T>()?;
    let (outer, dim, inner) = split_at_axis(a.shape(), axis);
    let flat: Vec<T> = a.iter().copied().collect();

    let mut values = Vec::with_capacity(outer * indices.len() * inner);
    for o in 0..outer {
        for &index in indices {
            let base = (o * dim + wrap_index(index, dim)?) * inner;
            values.extend_from_slice(&flat[base..base + inner]);
        }
    }
    let result = ArrayD::from_shape_vec(IxDyn(out_shape), values)
        .map_err(|e| Error::InternalLogicError(format!("take produced a bad buffer: {}", e)))?;
    Ok(T::wrap(result))
}

fn add_at_values<T: Element>(
    a: &Storage,
    indices: &[i64],
    axis: usize,
    b: &Storage,
) -> Result<Storage, Error> {
    let a = a.view::<T>()?;
    let b = b.view::<T>()?;
    let (outer, dim, inner) = split_at_axis(a.shape(), axis);
    if b.len() != outer * indices.len() * inner {
        return Err(Error::InternalLogicError(format!(
            "add_at received {} update element(s), expected {}",
            b.len(),
            outer * indices.len() * inner
        )));
    }

    let mut values: Vec<T> = a.iter().copied().collect();
    let mut updates = b.iter();
    for o in 0..outer {
        for &index in indices {
            let base = (o * dim + wrap_index(index, dim)?) * inner;
            for slot in &mut values[base..base + inner] {
                if let Some(&update) = updates.next() {
                    *slot = Element::add(*slot, update);
                }
            }
        }
    }
    let result = ArrayD::from_shape_vec(IxDyn(a.shape()), values)
        .map_err(|e| Error::InternalLogicError(format!("add_at produced a bad buffer: {}", e)))?;
    Ok(T::wrap(result))
}

// --- Kernels ---

macro_rules! native_binary_kernel {
    ($kernel:ident, $method:ident) => {
        struct $kernel;

        impl BinaryKernel for $kernel {
            fn call(&self, a: &Array, b: &Array, out: &Array) -> Result<(), Error> {
                let result = {
                    let a_buf = a.buffer();
                    let b_buf = b.buffer();
                    let a_data = a_buf.borrow();
                    let b_data = b_buf.borrow();
                    with_dtype!(a_data.dtype(), T => {
                        binary_map::<T>(&a_data, &b_data, <T as Element>::$method)?
                    })
                };
                write_output(out, result)
            }
        }
    };
}

macro_rules! native_unary_kernel {
    ($kernel:ident, $f:expr) => {
        struct $kernel;

        impl UnaryKernel for $kernel {
            fn call(&self, a: &Array, out: &Array) -> Result<(), Error> {
                let result = {
                    let a_buf = a.buffer();
                    let a_data = a_buf.borrow();
                    with_dtype!(a_data.dtype(), T => unary_map::<T>(&a_data, $f)?)
                };
                write_output(out, result)
            }
        }
    };
}

native_binary_kernel!(NativeAdd, add);
native_binary_kernel!(NativeSubtract, sub);
native_binary_kernel!(NativeMultiply, mul);
native_unary_kernel!(NativeNegate, <T as Element>::neg);
native_unary_kernel!(NativeCopy, |x| x);

struct NativeFill;

impl FillKernel for NativeFill {
    fn call(&self, value: f64, out: &Array) -> Result<(), Error> {
        write_output(out, Storage::full(&out.shape(), out.dtype(), value))
    }
}

struct NativeTake;

impl TakeKernel for NativeTake {
    fn call(&self, a: &Array, indices: &Array, axis: usize, out: &Array) -> Result<(), Error> {
        let out_shape = check_take_args(a, indices, axis)?;
        if out.shape() != out_shape {
            return Err(Error::ShapeMismatch {
                expected: out_shape,
                actual: out.shape(),
            });
        }
        let index_values = indices.buffer().borrow().to_index_vec()?;
        let result = {
            let a_buf = a.buffer();
            let a_data = a_buf.borrow();
            with_dtype!(a_data.dtype(), T => {
                take_values::<T>(&a_data, &index_values, axis, &out_shape)?
            })
        };
        write_output(out, result)
    }
}

struct NativeAddAt;

impl AddAtKernel for NativeAddAt {
    fn call(
        &self,
        a: &Array,
        indices: &Array,
        axis: usize,
        b: &Array,
        out: &Array,
    ) -> Result<(), Error> {
        check_add_at_args(a, indices, axis, b)?;
        if out.shape() != a.shape() {
            return Err(Error::ShapeMismatch {
                expected: a.shape(),
                actual: out.shape(),
            });
        }
        let index_values = indices.buffer().borrow().to_index_vec()?;
        let result = {
            let a_buf = a.buffer();
            let b_buf = b.buffer();
            let a_data = a_buf.borrow();
            let b_data = b_buf.borrow();
            with_dtype!(a_data.dtype(), T => {
                add_at_values::<T>(&a_data, &index_values, axis, &b_data)?
            })
        };
        write_output(out, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_values_gathers_inner_slices() {
        let a = Storage::from_vec((0..6).collect::<Vec<i32>>(), &[2, 3]).unwrap();
        let taken = take_values::<i32>(&a, &[2, 0], 1, &[2, 2]).unwrap();
        assert_eq!(taken.to_vec::<i32>().unwrap(), vec![2, 0, 5, 3]);
    }

    #[test]
    fn add_at_values_accumulates_repeats() {
        let a = Storage::from_vec(vec![0.0f64; 3], &[3]).unwrap();
        let b = Storage::from_vec(vec![1.0f64, 2.0, 4.0], &[3]).unwrap();
        let summed = add_at_values::<f64>(&a, &[1, 1, -1], 0, &b).unwrap();
        assert_eq!(summed.to_vec::<f64>().unwrap(), vec![0.0, 3.0, 4.0]);
    }

    #[test]
    fn devices_carry_every_native_op() {
        let backend = NativeBackend::with_device_count(1);
        let device = backend.get_device(0).unwrap();
        assert_eq!(
            device.ops().names(),
            vec!["add", "add_at", "copy", "fill", "multiply", "negate", "subtract", "take"]
        );
    }
}
