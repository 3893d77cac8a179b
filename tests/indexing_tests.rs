use std::sync::Arc;
use tapegrad::backend::TakeOp;
use tapegrad::ops::{add_at, take, take_output_shape};
use tapegrad::{Array, Context, Device, Dtype, Error};

fn device() -> Result<Arc<Device>, Error> {
    Context::new().default_device()
}

#[test]
fn test_take_wraps_out_of_range_indices() -> Result<(), Error> {
    let device = device()?;
    let a = Array::from_vec(vec![10.0f32, 20.0, 30.0], &[3], &device)?;
    let indices = Array::from_vec(vec![-1i64, 4, 0, 3, -4], &[5], &device)?;

    let out = take(&a, &indices, 0)?;
    assert_eq!(out.shape(), vec![5]);
    assert_eq!(out.to_vec::<f32>()?, vec![30.0, 20.0, 10.0, 10.0, 30.0]);
    Ok(())
}

#[test]
fn test_take_along_inner_axis() -> Result<(), Error> {
    let device = device()?;
    let a = Array::from_vec((0..24).collect::<Vec<i32>>(), &[2, 3, 4], &device)?;
    let indices = Array::from_vec(vec![2i32, 0, 1, 1], &[2, 2], &device)?;

    let out = take(&a, &indices, 1)?;
    assert_eq!(out.shape(), vec![2, 2, 2, 4]);
    assert_eq!(
        out.to_vec::<i32>()?,
        vec![
            8, 9, 10, 11, 0, 1, 2, 3, 4, 5, 6, 7, 4, 5, 6, 7, // a[0, [2, 0, 1, 1], :]
            20, 21, 22, 23, 12, 13, 14, 15, 16, 17, 18, 19, 16, 17, 18, 19, // a[1, ...]
        ]
    );
    Ok(())
}

#[test]
fn test_take_accepts_every_integral_index_dtype() -> Result<(), Error> {
    let device = device()?;
    let a = Array::from_vec(vec![1.0f64, 2.0, 3.0], &[3], &device)?;
    for dtype in [Dtype::Int8, Dtype::Int16, Dtype::Int32, Dtype::Int64, Dtype::UInt8] {
        let indices = Array::from_f64_vec(vec![2.0, 1.0], &[2], dtype, &device)?;
        assert_eq!(take(&a, &indices, 0)?.to_vec::<f64>()?, vec![3.0, 2.0]);
    }
    Ok(())
}

#[test]
fn test_take_with_scalar_index() -> Result<(), Error> {
    let device = device()?;
    let a = Array::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2], &device)?;
    let index = Array::from_vec(vec![1i64], &[], &device)?;
    let row = take(&a, &index, 0)?;
    assert_eq!(row.shape(), vec![2]);
    assert_eq!(row.to_vec::<f32>()?, vec![3.0, 4.0]);
    Ok(())
}

#[test]
fn test_take_validation() -> Result<(), Error> {
    let device = device()?;
    let a = Array::from_vec(vec![1.0f32, 2.0, 3.0], &[3], &device)?;

    let float_indices = Array::from_vec(vec![0.0f32], &[1], &device)?;
    assert!(matches!(
        take(&a, &float_indices, 0),
        Err(Error::DtypeError(_))
    ));
    let bool_indices = Array::from_vec(vec![true], &[1], &device)?;
    assert!(matches!(
        take(&a, &bool_indices, 0),
        Err(Error::DtypeError(_))
    ));

    let indices = Array::from_vec(vec![0i32], &[1], &device)?;
    assert_eq!(
        take(&a, &indices, 1),
        Err(Error::DimensionError { axis: 1, ndim: 1 })
    );

    let empty = Array::zeros(&[0], Dtype::Float32, &device)?;
    assert!(matches!(take(&empty, &indices, 0), Err(Error::IndexError(_))));
    Ok(())
}

#[test]
fn test_take_kernel_rejects_wrong_output_shape() -> Result<(), Error> {
    let device = device()?;
    let a = Array::from_vec(vec![1.0f32, 2.0, 3.0], &[3], &device)?;
    let indices = Array::from_vec(vec![0i32, 1], &[2], &device)?;
    let out = Array::zeros(&[3], Dtype::Float32, &device)?;

    let result = device.get_op::<TakeOp>()?.call(&a, &indices, 0, &out);
    assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    assert_eq!(out.to_vec::<f32>()?, vec![0.0; 3]);
    Ok(())
}

#[test]
fn test_add_at_accumulates_repeated_indices() -> Result<(), Error> {
    let device = device()?;
    let a = Array::from_vec(vec![1.0f32, 1.0, 1.0], &[3], &device)?;
    let indices = Array::from_vec(vec![0i64, 2, 0, 0], &[4], &device)?;
    let b = Array::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[4], &device)?;

    let out = add_at(&a, &indices, 0, &b)?;
    assert_eq!(out.to_vec::<f32>()?, vec![9.0, 1.0, 3.0]);
    // Inputs are untouched
    assert_eq!(a.to_vec::<f32>()?, vec![1.0, 1.0, 1.0]);
    assert_eq!(b.to_vec::<f32>()?, vec![1.0, 2.0, 3.0, 4.0]);
    Ok(())
}

#[test]
fn test_add_at_wraps_and_adds_slices() -> Result<(), Error> {
    let device = device()?;
    let a = Array::zeros(&[2, 3], Dtype::Float64, &device)?;
    let indices = Array::from_vec(vec![-1i32, 5], &[2], &device)?;
    let b = Array::from_vec(vec![1.0f64, 2.0, 3.0, 4.0], &[2, 2], &device)?;

    let out = add_at(&a, &indices, 1, &b)?;
    assert_eq!(out.to_vec::<f64>()?, vec![0.0, 0.0, 3.0, 0.0, 0.0, 7.0]);
    Ok(())
}

#[test]
fn test_add_at_validation() -> Result<(), Error> {
    let device = device()?;
    let a = Array::zeros(&[3], Dtype::Float32, &device)?;
    let indices = Array::from_vec(vec![0i32, 1], &[2], &device)?;

    let wrong_shape = Array::zeros(&[3], Dtype::Float32, &device)?;
    assert_eq!(
        add_at(&a, &indices, 0, &wrong_shape),
        Err(Error::ShapeMismatch {
            expected: vec![2],
            actual: vec![3],
        })
    );

    let wrong_dtype = Array::zeros(&[2], Dtype::Float64, &device)?;
    assert!(matches!(
        add_at(&a, &indices, 0, &wrong_dtype),
        Err(Error::DtypeMismatch { .. })
    ));

    let float_indices = Array::zeros(&[2], Dtype::Float32, &device)?;
    let b = Array::zeros(&[2], Dtype::Float32, &device)?;
    assert!(matches!(
        add_at(&a, &float_indices, 0, &b),
        Err(Error::DtypeError(_))
    ));
    assert!(matches!(
        add_at(&a, &indices, 2, &b),
        Err(Error::DimensionError { axis: 2, ndim: 1 })
    ));
    Ok(())
}

#[test]
fn test_take_output_shape() -> Result<(), Error> {
    assert_eq!(take_output_shape(&[4, 5], &[2, 3], 0)?, vec![2, 3, 5]);
    assert_eq!(take_output_shape(&[4, 5], &[7], 1)?, vec![4, 7]);
    Ok(())
}
