//! Verification of analytical gradients against central finite differences.
//!
//! The checker validates vector-Jacobian products: every output is contracted
//! with its matching `grad_outputs` entry, so a single call covers functions
//! with several inputs and outputs.

use crate::array::Array;
use crate::backward::backward_outputs;
use crate::error::Error;
use crate::graph::GraphId;

/// Numerical gradient of `sum_j grad_outputs[j] * func(inputs)[j]` w.r.t. every input.
///
/// Element `k` of input `i` is perturbed by `±eps[i][k]` in the input's own
/// dtype; the two evaluations are contracted with `grad_outputs` in `f64` and
/// divided by `2 * eps[i][k]`. Inputs are evaluated as constants and their
/// buffers are never modified.
pub fn calculate_numerical_gradient<F>(
    func: F,
    inputs: &[Array],
    grad_outputs: &[Array],
    eps: &[Array],
) -> Result<Vec<Array>, Error>
where
    F: Fn(&[Array]) -> Result<Vec<Array>, Error>,
{
    check_eps(inputs, eps)?;
    (0..inputs.len())
        .map(|i| numerical_gradient_for(&func, inputs, i, grad_outputs, &eps[i]))
        .collect()
}

/// Runs `func` forward and backward on `graph_id` and compares the gradients
/// of every input that requires grad on `graph_id` with their numerical estimate.
///
/// Passes when `|analytical - numerical| <= atol + rtol * |numerical|` holds
/// element-wise. The first mismatch is returned as [`Error::GradientCheck`].
/// If no input requires grad the check passes without evaluating anything.
///
/// # Example
/// ```rust
/// use tapegrad::{check_backward_computation, ops, Array, Context, GraphId};
///
/// fn main() -> Result<(), tapegrad::Error> {
///     let device = Context::new().default_device()?;
///     let graph = GraphId::new("check_example");
///     let x = Array::from_vec(vec![1.0f64, 2.0, 1.0], &[3], &device)?;
///     x.require_grad(&graph)?;
///     let gout = Array::from_vec(vec![0.0f64, -2.0, 1.0], &[3], &device)?;
///     let eps = Array::full(&[3], x.dtype(), 1e-3, &device)?;
///
///     check_backward_computation(
///         |xs: &[Array]| Ok(vec![ops::multiply(&xs[0], &xs[0])?]),
///         &[x],
///         &[gout],
///         &[eps],
///         1e-5,
///         1e-4,
///         &graph,
///     )
/// }
/// ```
pub fn check_backward_computation<F>(
    func: F,
    inputs: &[Array],
    grad_outputs: &[Array],
    eps: &[Array],
    atol: f64,
    rtol: f64,
    graph_id: &GraphId,
) -> Result<(), Error>
where
    F: Fn(&[Array]) -> Result<Vec<Array>, Error>,
{
    check_eps(inputs, eps)?;

    let tracked: Vec<usize> = (0..inputs.len())
        .filter(|&i| inputs[i].is_grad_required(graph_id))
        .collect();
    if tracked.is_empty() {
        return Ok(());
    }

    // --- Analytical gradients ---
    for &i in &tracked {
        inputs[i].clear_grad(graph_id);
    }
    let outputs = func(inputs)?;
    check_output_count(&outputs, grad_outputs)?;
    for (output, grad_output) in outputs.iter().zip(grad_outputs) {
        if output.is_grad_required(graph_id) {
            output.set_grad(graph_id, grad_output.clone())?;
        }
    }
    backward_outputs(&outputs, graph_id)?;

    // --- Comparison ---
    for &i in &tracked {
        let input = &inputs[i];
        let analytical = match input.grad(graph_id) {
            Some(grad) => grad.to_f64_vec(),
            None => vec![0.0; input.total_size()],
        };
        let numerical =
            numerical_gradient_for(&func, inputs, i, grad_outputs, &eps[i])?.to_f64_vec();

        let mismatch = analytical
            .iter()
            .zip(&numerical)
            .position(|(a, n)| !is_close(*a, *n, atol, rtol));
        if let Some(at_index) = mismatch {
            log::warn!(
                "backward check failed for input {} at element {}: analytical={} numerical={}",
                i,
                at_index,
                analytical[at_index],
                numerical[at_index]
            );
            return Err(Error::GradientCheck {
                input_index: i,
                at_index,
                analytical,
                numerical,
                atol,
                rtol,
            });
        }
    }
    Ok(())
}

/// True if both arrays have the same shape and are element-wise within
/// `atol + rtol * |b|`.
pub fn all_close(a: &Array, b: &Array, atol: f64, rtol: f64) -> Result<bool, Error> {
    if a.shape() != b.shape() {
        return Ok(false);
    }
    Ok(a
        .to_f64_vec()
        .iter()
        .zip(b.to_f64_vec())
        .all(|(x, y)| is_close(*x, y, atol, rtol)))
}

fn is_close(a: f64, b: f64, atol: f64, rtol: f64) -> bool {
    (a - b).abs() <= atol + rtol * b.abs()
}

fn check_eps(inputs: &[Array], eps: &[Array]) -> Result<(), Error> {
    if inputs.len() != eps.len() {
        return Err(Error::InvalidOperation(format!(
            "Got {} input(s) but {} epsilon array(s)",
            inputs.len(),
            eps.len()
        )));
    }
    for (input, eps) in inputs.iter().zip(eps) {
        if input.shape() != eps.shape() {
            return Err(Error::ShapeMismatch {
                expected: input.shape(),
                actual: eps.shape(),
            });
        }
    }
    Ok(())
}

fn check_output_count(outputs: &[Array], grad_outputs: &[Array]) -> Result<(), Error> {
    if outputs.len() != grad_outputs.len() {
        return Err(Error::GradientError(format!(
            "Function returned {} output(s) but {} output gradient(s) were given",
            outputs.len(),
            grad_outputs.len()
        )));
    }
    for (output, grad_output) in outputs.iter().zip(grad_outputs) {
        if output.shape() != grad_output.shape() {
            return Err(Error::ShapeMismatch {
                expected: output.shape(),
                actual: grad_output.shape(),
            });
        }
    }
    Ok(())
}

/// Detached copy of `array` with its own buffer.
fn detached_copy(array: &Array) -> Array {
    Array::from_storage(array.to_storage(), &array.device())
}

/// Evaluates `func` with element `k` of input `index` offset by `delta` and
/// returns every output as `f64` values.
fn evaluate_perturbed<F>(
    func: &F,
    constants: &[Array],
    index: usize,
    k: usize,
    delta: f64,
) -> Result<Vec<Vec<f64>>, Error>
where
    F: Fn(&[Array]) -> Result<Vec<Array>, Error>,
{
    let perturbed = detached_copy(&constants[index]);
    perturbed.buffer().borrow_mut().offset_element(k, delta)?;

    let mut args = constants.to_vec();
    args[index] = perturbed;
    Ok(func(&args)?.iter().map(Array::to_f64_vec).collect())
}

fn numerical_gradient_for<F>(
    func: &F,
    inputs: &[Array],
    index: usize,
    grad_outputs: &[Array],
    eps: &Array,
) -> Result<Array, Error>
where
    F: Fn(&[Array]) -> Result<Vec<Array>, Error>,
{
    let constants: Vec<Array> = inputs.iter().map(detached_copy).collect();
    let grad_outputs: Vec<Vec<f64>> = grad_outputs.iter().map(Array::to_f64_vec).collect();
    let input = &inputs[index];

    let mut values = Vec::with_capacity(input.total_size());
    for (k, step) in eps.to_f64_vec().into_iter().enumerate() {
        if step == 0.0 {
            return Err(Error::InvalidOperation(format!(
                "Epsilon for input {} is zero at element {}",
                index, k
            )));
        }
        let plus = evaluate_perturbed(func, &constants, index, k, step)?;
        let minus = evaluate_perturbed(func, &constants, index, k, -step)?;
        if plus.len() != grad_outputs.len() || minus.len() != grad_outputs.len() {
            return Err(Error::GradientError(format!(
                "Function returned {} output(s) but {} output gradient(s) were given",
                plus.len(),
                grad_outputs.len()
            )));
        }

        let mut contracted = 0.0;
        for ((y_plus, y_minus), gout) in plus.iter().zip(&minus).zip(&grad_outputs) {
            if y_plus.len() != gout.len() || y_minus.len() != gout.len() {
                return Err(Error::GradientError(format!(
                    "Output has {} element(s) but its gradient has {}",
                    y_plus.len(),
                    gout.len()
                )));
            }
            for j in 0..gout.len() {
                contracted += gout[j] * (y_plus[j] - y_minus[j]);
            }
        }
        values.push(contracted / (2.0 * step));
    }

    Array::from_f64_vec(values, &input.shape(), input.dtype(), &input.device())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::ops;

    #[test]
    fn numerical_gradient_of_square() {
        let device = Context::new().default_device().unwrap();
        let x = Array::from_vec(vec![1.0f64, 2.0, -3.0], &[3], &device).unwrap();
        let gout = Array::from_vec(vec![1.0f64, 1.0, 2.0], &[3], &device).unwrap();
        let eps = Array::full(&[3], x.dtype(), 1e-4, &device).unwrap();

        let grads = calculate_numerical_gradient(
            |xs: &[Array]| Ok(vec![ops::multiply(&xs[0], &xs[0])?]),
            &[x.clone()],
            &[gout],
            &[eps],
        )
        .unwrap();

        let expected = [2.0, 4.0, -12.0];
        for (got, want) in grads[0].to_vec::<f64>().unwrap().iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "got {}, want {}", got, want);
        }
        assert_eq!(x.to_vec::<f64>().unwrap(), vec![1.0, 2.0, -3.0]);
    }

    #[test]
    fn zero_epsilon_is_rejected() {
        let device = Context::new().default_device().unwrap();
        let x = Array::from_vec(vec![1.0f32], &[1], &device).unwrap();
        let eps = Array::zeros(&[1], x.dtype(), &device).unwrap();
        let result = calculate_numerical_gradient(
            |xs: &[Array]| Ok(vec![xs[0].clone()]),
            &[x.clone()],
            &[x],
            &[eps],
        );
        assert!(matches!(result, Err(Error::InvalidOperation(_))));
    }
}
