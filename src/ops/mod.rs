//! Differentiable routines that dispatch to device kernels
//! and record the computation graph when gradients are required.
//!
//! Every routine validates its arguments, allocates the output on the inputs'
//! device, runs the device's kernel and then calls
//! [`set_up_op_nodes`](crate::graph::set_up_op_nodes) with one backward
//! function per differentiable input.

use crate::array::Array;
use crate::error::Error;
use std::sync::Arc;

pub mod arithmetic;
pub mod indexing;

pub use arithmetic::{add, copy, multiply, negate, subtract};
pub use indexing::{add_at, take, take_output_shape};

/// Fails with [`Error::DeviceMismatch`] unless both arrays live on the same device.
///
/// Devices are compared by identity: `native:0` of two separate contexts are
/// different devices.
pub(crate) fn check_same_device(op: &str, a: &Array, b: &Array) -> Result<(), Error> {
    let (da, db) = (a.device(), b.device());
    if !Arc::ptr_eq(&da, &db) {
        return Err(Error::DeviceMismatch {
            op: op.to_string(),
            expected: da.name(),
            actual: db.name(),
        });
    }
    Ok(())
}
