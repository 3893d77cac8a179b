use crate::array::Array;
use crate::backend::{AddAtOp, TakeOp};
use crate::dtype::check_equal_dtype;
use crate::error::Error;
use crate::graph::{set_up_op_nodes, BackwardFn};
use crate::ops::check_same_device;

/// Maps a possibly negative or too large index into `0..dim`.
pub(crate) fn wrap_index(index: i64, dim: usize) -> Result<usize, Error> {
    if dim == 0 {
        return Err(Error::IndexError(format!(
            "Cannot index into an axis of size 0 (index {})",
            index
        )));
    }
    Ok(index.rem_euclid(dim as i64) as usize)
}

fn check_indices(indices: &Array) -> Result<(), Error> {
    if !indices.dtype().is_index_like() {
        return Err(Error::DtypeError(format!(
            "Indices must have an integral dtype, got {}",
            indices.dtype()
        )));
    }
    Ok(())
}

fn check_axis(axis: usize, ndim: usize) -> Result<(), Error> {
    if axis >= ndim {
        return Err(Error::DimensionError { axis, ndim });
    }
    Ok(())
}

/// Shape of `take(a, indices, axis)`: the axis is replaced by the index shape.
pub fn take_output_shape(
    a_shape: &[usize],
    indices_shape: &[usize],
    axis: usize,
) -> Result<Vec<usize>, Error> {
    check_axis(axis, a_shape.len())?;
    let mut shape = Vec::with_capacity(a_shape.len() + indices_shape.len() - 1);
    shape.extend_from_slice(&a_shape[..axis]);
    shape.extend_from_slice(indices_shape);
    shape.extend_from_slice(&a_shape[axis + 1..]);
    Ok(shape)
}

/// Validates `take` arguments and returns the output shape.
pub(crate) fn check_take_args(a: &Array, indices: &Array, axis: usize) -> Result<Vec<usize>, Error> {
    check_indices(indices)?;
    check_same_device("take", a, indices)?;
    take_output_shape(&a.shape(), &indices.shape(), axis)
}

pub(crate) fn check_add_at_args(
    a: &Array,
    indices: &Array,
    axis: usize,
    b: &Array,
) -> Result<(), Error> {
    check_indices(indices)?;
    check_same_device("add_at", a, indices)?;
    check_same_device("add_at", a, b)?;
    check_equal_dtype("add_at", a.dtype(), b.dtype())?;
    let expected = take_output_shape(&a.shape(), &indices.shape(), axis)?;
    if b.shape() != expected {
        return Err(Error::ShapeMismatch {
            expected,
            actual: b.shape(),
        });
    }
    Ok(())
}

/// Gathers slices of `a` along `axis` at `indices`.
///
/// Out-of-range indices wrap around (`-1` is the last slice, `dim` is the
/// first). The gradient w.r.t. `a` scatter-adds the output gradient back,
/// so repeated indices accumulate. `indices` is never differentiated.
pub fn take(a: &Array, indices: &Array, axis: usize) -> Result<Array, Error> {
    let out_shape = check_take_args(a, indices, axis)?;
    let out = Array::empty(&out_shape, a.dtype(), &a.device());
    a.device().get_op::<TakeOp>()?.call(a, indices, axis, &out)?;

    let indices = indices.as_constant_all();
    set_up_op_nodes(
        "take",
        &[a],
        &out,
        vec![BackwardFn::TakeGrad {
            input_shape: a.shape(),
            indices,
            axis,
        }],
    )?;
    Ok(out)
}

/// Returns a copy of `a` with the slices of `b` added at `indices` along `axis`.
///
/// `b` must have the shape `take(a, indices, axis)` would produce. Repeated
/// indices accumulate; indices wrap like in [`take`].
pub fn add_at(a: &Array, indices: &Array, axis: usize, b: &Array) -> Result<Array, Error> {
    check_add_at_args(a, indices, axis, b)?;
    let out = Array::empty(&a.shape(), a.dtype(), &a.device());
    a.device()
        .get_op::<AddAtOp>()?
        .call(a, indices, axis, b, &out)?;

    let indices = indices.as_constant_all();
    set_up_op_nodes(
        "add_at",
        &[a, b],
        &out,
        vec![
            BackwardFn::Identity,
            BackwardFn::AddAtGrad { indices, axis },
        ],
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_shape_replaces_axis() {
        assert_eq!(take_output_shape(&[2, 3, 4], &[5, 6], 1).unwrap(), vec![2, 5, 6, 4]);
        assert_eq!(take_output_shape(&[3], &[], 0).unwrap(), Vec::<usize>::new());
        assert_eq!(
            take_output_shape(&[3], &[2], 1),
            Err(Error::DimensionError { axis: 1, ndim: 1 })
        );
    }

    #[test]
    fn indices_wrap() {
        assert_eq!(wrap_index(-1, 3).unwrap(), 2);
        assert_eq!(wrap_index(4, 3).unwrap(), 1);
        assert_eq!(wrap_index(-7, 3).unwrap(), 2);
        assert!(wrap_index(0, 0).is_err());
    }
}
