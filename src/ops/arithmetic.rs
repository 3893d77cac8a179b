use crate::array::Array;
use crate::backend::{AddOp, CopyOp, MultiplyOp, NegateOp, SubtractOp};
use crate::dtype::{check_equal_dtype, Dtype};
use crate::error::Error;
use crate::graph::{set_up_op_nodes, BackwardFn};
use crate::ops::check_same_device;

fn check_binary_args(op: &str, a: &Array, b: &Array) -> Result<(), Error> {
    check_same_device(op, a, b)?;
    check_equal_dtype(op, a.dtype(), b.dtype())?;
    if a.shape() != b.shape() {
        return Err(Error::ShapeMismatch {
            expected: a.shape(),
            actual: b.shape(),
        });
    }
    Ok(())
}

fn reject_bool(op: &str, a: &Array) -> Result<(), Error> {
    if a.dtype() == Dtype::Bool {
        return Err(Error::DtypeError(format!("{} does not support bool arrays", op)));
    }
    Ok(())
}

/// Element-wise `a + b`. Shapes and dtypes must match exactly.
pub fn add(a: &Array, b: &Array) -> Result<Array, Error> {
    check_binary_args("add", a, b)?;
    let out = Array::empty_like(a);
    a.device().get_op::<AddOp>()?.call(a, b, &out)?;
    set_up_op_nodes(
        "add",
        &[a, b],
        &out,
        vec![BackwardFn::Identity, BackwardFn::Identity],
    )?;
    Ok(out)
}

/// Element-wise `a - b`.
pub fn subtract(a: &Array, b: &Array) -> Result<Array, Error> {
    check_binary_args("subtract", a, b)?;
    reject_bool("subtract", a)?;
    let out = Array::empty_like(a);
    a.device().get_op::<SubtractOp>()?.call(a, b, &out)?;
    set_up_op_nodes(
        "subtract",
        &[a, b],
        &out,
        vec![BackwardFn::Identity, BackwardFn::Negate],
    )?;
    Ok(out)
}

/// Element-wise `a * b`. Each side's gradient is the output gradient times the other side.
pub fn multiply(a: &Array, b: &Array) -> Result<Array, Error> {
    check_binary_args("multiply", a, b)?;
    let out = Array::empty_like(a);
    a.device().get_op::<MultiplyOp>()?.call(a, b, &out)?;
    set_up_op_nodes(
        "multiply",
        &[a, b],
        &out,
        vec![
            BackwardFn::MultiplyBy(b.clone()),
            BackwardFn::MultiplyBy(a.clone()),
        ],
    )?;
    Ok(out)
}

pub fn negate(a: &Array) -> Result<Array, Error> {
    reject_bool("negate", a)?;
    let out = Array::empty_like(a);
    a.device().get_op::<NegateOp>()?.call(a, &out)?;
    set_up_op_nodes("negate", &[a], &out, vec![BackwardFn::Negate])?;
    Ok(out)
}

/// Copies `a` into a new buffer on the same device.
pub fn copy(a: &Array) -> Result<Array, Error> {
    let out = Array::empty_like(a);
    a.device().get_op::<CopyOp>()?.call(a, &out)?;
    set_up_op_nodes("copy", &[a], &out, vec![BackwardFn::Identity])?;
    Ok(out)
}
