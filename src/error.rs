use crate::dtype::Dtype;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Dtype error: {0}")]
    DtypeError(String),

    #[error("Dtype mismatch in {op}: {lhs} and {rhs}")]
    DtypeMismatch { op: String, lhs: Dtype, rhs: Dtype },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Axis {axis} is out of bounds for array of dimension {ndim}")]
    DimensionError { axis: usize, ndim: usize },

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Device mismatch in {op}: {expected} and {actual}")]
    DeviceMismatch {
        op: String,
        expected: String,
        actual: String,
    },

    #[error("Device index {index} is out of range for backend '{backend}' with {count} device(s)")]
    DeviceIndexOutOfRange {
        backend: String,
        index: usize,
        count: usize,
    },

    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    #[error("Op '{op}' is not registered on device {device}")]
    OpNotRegistered { device: String, op: String },

    #[error("Array {array_id} already requires gradient on graph '{graph_id}'")]
    GradientAlreadyRequired { array_id: usize, graph_id: String },

    #[error("Array {array_id} does not require gradient on graph '{graph_id}'")]
    NotGradRequired { array_id: usize, graph_id: String },

    #[error("Gradient error: {0}")]
    GradientError(String),

    #[error("Backward check failure on input {input_index} at element {at_index}: analytical={analytical:?}, numerical={numerical:?}, atol={atol}, rtol={rtol}")]
    GradientCheck {
        input_index: usize,
        at_index: usize,
        analytical: Vec<f64>,
        numerical: Vec<f64>,
        atol: f64,
        rtol: f64,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Internal logic error: {0}")]
    InternalLogicError(String),
}
