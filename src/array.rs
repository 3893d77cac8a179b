use crate::backend::{Device, FillOp};
use crate::dtype::{Dtype, Element};
use crate::error::Error;
use crate::graph::{ArrayNode, ArrayNodeRef, GraphId, OpNode};
use crate::ops;
use crate::storage::Storage;
use crate::with_dtype;

use ndarray::ArrayD;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

static ARRAY_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn next_id() -> usize {
    ARRAY_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct ArrayBody {
    id: usize,
    shape: Vec<usize>,
    dtype: Dtype,
    device: Arc<Device>,
    data: Rc<RefCell<Storage>>,
    nodes: RefCell<HashMap<GraphId, ArrayNodeRef>>,
}

/// An n-dimensional array living on one device, with per-graph gradient state.
///
/// `Array` is a cheap shared handle: clones refer to the same buffer and the
/// same gradient bookkeeping. Shape and dtype never change after construction.
///
/// # Example
/// ```rust
/// use tapegrad::{ops, Array, Context, GraphId};
///
/// fn main() -> Result<(), tapegrad::Error> {
///     let context = Context::new();
///     let device = context.default_device()?;
///     let graph = GraphId::new("example");
///
///     let x = Array::from_vec(vec![1.0f32, 2.0, 3.0], &[3], &device)?;
///     x.require_grad(&graph)?;
///
///     let y = ops::multiply(&x, &x)?;
///     y.backward(&graph)?;
///
///     let grad = x.grad(&graph).expect("x requires grad");
///     assert_eq!(grad.to_vec::<f32>()?, vec![2.0, 4.0, 6.0]);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Array {
    inner: Rc<ArrayBody>,
}

impl Array {
    // --- Construction ---

    /// Wraps an existing buffer. The array takes the buffer's shape and dtype.
    pub fn from_storage(storage: Storage, device: &Arc<Device>) -> Self {
        Self::from_shared(Rc::new(RefCell::new(storage)), device.clone(), HashMap::new())
    }

    fn from_shared(
        data: Rc<RefCell<Storage>>,
        device: Arc<Device>,
        nodes: HashMap<GraphId, ArrayNodeRef>,
    ) -> Self {
        let (shape, dtype) = {
            let storage = data.borrow();
            (storage.shape().to_vec(), storage.dtype())
        };
        Self {
            inner: Rc::new(ArrayBody {
                id: next_id(),
                shape,
                dtype,
                device,
                data,
                nodes: RefCell::new(nodes),
            }),
        }
    }

    pub fn from_vec<T: Element>(
        data: Vec<T>,
        shape: &[usize],
        device: &Arc<Device>,
    ) -> Result<Self, Error> {
        Ok(Self::from_storage(Storage::from_vec(data, shape)?, device))
    }

    /// Wraps an `ndarray` array; the dtype follows `T`.
    pub fn from_ndarray<T: Element>(data: ArrayD<T>, device: &Arc<Device>) -> Self {
        Self::from_storage(Storage::from_array(data), device)
    }

    /// Creates an array from `f64` values converted to `dtype`.
    pub fn from_f64_vec(
        data: Vec<f64>,
        shape: &[usize],
        dtype: Dtype,
        device: &Arc<Device>,
    ) -> Result<Self, Error> {
        let storage = with_dtype!(dtype, T => Storage::from_vec(
            data.into_iter().map(T::from_f64).collect::<Vec<T>>(),
            shape,
        )?);
        Ok(Self::from_storage(storage, device))
    }

    /// Allocates an array without meaningful contents (zero-filled).
    pub fn empty(shape: &[usize], dtype: Dtype, device: &Arc<Device>) -> Self {
        Self::from_storage(Storage::zeros(shape, dtype), device)
    }

    pub fn empty_like(other: &Array) -> Self {
        Self::empty(&other.shape(), other.dtype(), &other.device())
    }

    /// Allocates an array and fills it through the device's `Fill` kernel.
    pub fn full(
        shape: &[usize],
        dtype: Dtype,
        value: f64,
        device: &Arc<Device>,
    ) -> Result<Self, Error> {
        let out = Self::empty(shape, dtype, device);
        device.get_op::<FillOp>()?.call(value, &out)?;
        Ok(out)
    }

    pub fn zeros(shape: &[usize], dtype: Dtype, device: &Arc<Device>) -> Result<Self, Error> {
        Self::full(shape, dtype, 0.0, device)
    }

    pub fn ones(shape: &[usize], dtype: Dtype, device: &Arc<Device>) -> Result<Self, Error> {
        Self::full(shape, dtype, 1.0, device)
    }

    pub fn full_like(other: &Array, value: f64) -> Result<Self, Error> {
        Self::full(&other.shape(), other.dtype(), value, &other.device())
    }

    pub fn zeros_like(other: &Array) -> Result<Self, Error> {
        Self::full_like(other, 0.0)
    }

    pub fn ones_like(other: &Array) -> Result<Self, Error> {
        Self::full_like(other, 1.0)
    }

    /// Samples U(low, high). Not differentiable; `dtype` must be floating.
    pub fn random_uniform(
        shape: &[usize],
        dtype: Dtype,
        low: f64,
        high: f64,
        device: &Arc<Device>,
    ) -> Result<Self, Error> {
        check_float_dtype("random_uniform", dtype)?;
        if high <= low {
            return Err(Error::InvalidOperation(format!(
                "Upper bound ({}) must be greater than lower bound ({}) for uniform distribution",
                high, low
            )));
        }
        let size = shape.iter().product();
        let mut rng = rand::rng();
        let values = (0..size).map(|_| rng.random_range(low..high)).collect();
        Self::from_f64_vec(values, shape, dtype, device)
    }

    /// Samples N(mean, std_dev^2). Not differentiable; `dtype` must be floating.
    pub fn random_normal(
        shape: &[usize],
        dtype: Dtype,
        mean: f64,
        std_dev: f64,
        device: &Arc<Device>,
    ) -> Result<Self, Error> {
        check_float_dtype("random_normal", dtype)?;
        let dist = Normal::new(mean, std_dev).map_err(|_| {
            Error::InvalidOperation(format!(
                "Standard deviation ({}) must be non-negative for normal distribution",
                std_dev
            ))
        })?;
        let size = shape.iter().product();
        let mut rng = rand::rng();
        let values = (0..size).map(|_| dist.sample(&mut rng)).collect();
        Self::from_f64_vec(values, shape, dtype, device)
    }

    // --- Queries ---

    /// Unique identifier, used for graph bookkeeping and equality.
    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn shape(&self) -> Vec<usize> {
        self.inner.shape.clone()
    }

    pub fn ndim(&self) -> usize {
        self.inner.shape.len()
    }

    pub fn total_size(&self) -> usize {
        self.inner.shape.iter().product()
    }

    pub fn dtype(&self) -> Dtype {
        self.inner.dtype
    }

    pub fn device(&self) -> Arc<Device> {
        self.inner.device.clone()
    }

    /// The shared data buffer. Kernels borrow it to read inputs and write outputs.
    pub fn buffer(&self) -> Rc<RefCell<Storage>> {
        self.inner.data.clone()
    }

    /// True if both arrays view the same buffer.
    pub fn shares_buffer_with(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.inner.data, &other.inner.data)
    }

    /// A copy of the current contents.
    pub fn to_storage(&self) -> Storage {
        self.inner.data.borrow().clone()
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, Error> {
        self.inner.data.borrow().to_vec::<T>()
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.inner.data.borrow().to_f64_vec()
    }

    pub fn to_ndarray<T: Element>(&self) -> Result<ArrayD<T>, Error> {
        Ok(self.inner.data.borrow().view::<T>()?.clone())
    }

    // --- Gradient state ---

    /// Starts tracking gradients of this array on `graph_id`.
    pub fn require_grad(&self, graph_id: &GraphId) -> Result<(), Error> {
        check_float_dtype("require_grad", self.dtype())?;
        if self.is_grad_required(graph_id) {
            return Err(Error::GradientAlreadyRequired {
                array_id: self.id(),
                graph_id: graph_id.to_string(),
            });
        }
        let node = ArrayNode::new_ref(self);
        self.insert_node(*graph_id, node);
        Ok(())
    }

    pub fn is_grad_required(&self, graph_id: &GraphId) -> bool {
        self.inner.nodes.borrow().contains_key(graph_id)
    }

    /// Graphs this array is connected to, in creation order.
    pub fn graph_ids(&self) -> Vec<GraphId> {
        let mut ids: Vec<GraphId> = self.inner.nodes.borrow().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Accumulated gradient on `graph_id`, if any has been computed.
    pub fn grad(&self, graph_id: &GraphId) -> Option<Array> {
        self.node(graph_id).and_then(|node| node.borrow().grad.clone())
    }

    /// Replaces the gradient on `graph_id`. Shape and dtype must match the array.
    pub fn set_grad(&self, graph_id: &GraphId, grad: Array) -> Result<(), Error> {
        let node = self.node(graph_id).ok_or_else(|| Error::NotGradRequired {
            array_id: self.id(),
            graph_id: graph_id.to_string(),
        })?;
        check_gradient_matches(self.id(), &self.inner.shape, self.dtype(), &grad)?;
        node.borrow_mut().grad = Some(grad);
        Ok(())
    }

    pub fn clear_grad(&self, graph_id: &GraphId) {
        if let Some(node) = self.node(graph_id) {
            node.borrow_mut().grad = None;
        }
    }

    /// The op node that produced this array on `graph_id`.
    pub fn op_node(&self, graph_id: &GraphId) -> Option<Rc<OpNode>> {
        self.node(graph_id).and_then(|node| node.borrow().op_node.clone())
    }

    /// A new array sharing this buffer but disconnected from the given graphs.
    pub fn as_constant(&self, graph_ids: &[GraphId]) -> Array {
        let nodes = self
            .inner
            .nodes
            .borrow()
            .iter()
            .filter(|(graph_id, _)| !graph_ids.contains(graph_id))
            .map(|(graph_id, node)| (*graph_id, node.clone()))
            .collect();
        Self::from_shared(self.inner.data.clone(), self.device(), nodes)
    }

    /// A new array sharing this buffer and connected to no graph.
    pub fn as_constant_all(&self) -> Array {
        Self::from_shared(self.inner.data.clone(), self.device(), HashMap::new())
    }

    /// Copies the data into a new buffer; gradients flow back unchanged.
    pub fn copy(&self) -> Result<Array, Error> {
        ops::copy(self)
    }

    /// Runs the backward pass from this array on `graph_id`.
    pub fn backward(&self, graph_id: &GraphId) -> Result<(), Error> {
        crate::backward::backward(self, graph_id)
    }

    pub(crate) fn node(&self, graph_id: &GraphId) -> Option<ArrayNodeRef> {
        self.inner.nodes.borrow().get(graph_id).cloned()
    }

    pub(crate) fn nodes_snapshot(&self) -> HashMap<GraphId, ArrayNodeRef> {
        self.inner.nodes.borrow().clone()
    }

    pub(crate) fn insert_node(&self, graph_id: GraphId, node: ArrayNodeRef) {
        self.inner.nodes.borrow_mut().insert(graph_id, node);
    }

    /// Releases this handle, returning the graph nodes if it was the last one.
    pub(crate) fn into_graph_nodes(self) -> Vec<ArrayNodeRef> {
        match Rc::try_unwrap(self.inner) {
            Ok(body) => body.nodes.into_inner().into_values().collect(),
            Err(_) => Vec::new(),
        }
    }
}

pub(crate) fn check_float_dtype(op: &str, dtype: Dtype) -> Result<(), Error> {
    if !dtype.is_float() {
        return Err(Error::DtypeError(format!(
            "{} requires a floating dtype, got {}",
            op, dtype
        )));
    }
    Ok(())
}

pub(crate) fn check_gradient_matches(
    array_id: usize,
    shape: &[usize],
    dtype: Dtype,
    grad: &Array,
) -> Result<(), Error> {
    if grad.inner.shape != shape {
        return Err(Error::GradientError(format!(
            "Gradient for array {} has shape {:?}, expected {:?}",
            array_id, grad.inner.shape, shape
        )));
    }
    if grad.dtype() != dtype {
        return Err(Error::GradientError(format!(
            "Gradient for array {} has dtype {}, expected {}",
            array_id,
            grad.dtype(),
            dtype
        )));
    }
    Ok(())
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Array {}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("id", &self.id())
            .field("shape", &self.inner.shape)
            .field("dtype", &self.dtype())
            .field("device", &self.inner.device.name())
            .field("graph_ids", &self.graph_ids())
            .finish()
    }
}

// --- Operator Overloading ---
impl<'b> Add<&'b Array> for &Array {
    type Output = Result<Array, Error>;

    /// Element-wise addition via `ops::add`.
    fn add(self, rhs: &'b Array) -> Self::Output {
        ops::add(self, rhs)
    }
}

impl<'b> Sub<&'b Array> for &Array {
    type Output = Result<Array, Error>;

    fn sub(self, rhs: &'b Array) -> Self::Output {
        ops::subtract(self, rhs)
    }
}

impl<'b> Mul<&'b Array> for &Array {
    type Output = Result<Array, Error>;

    /// Element-wise multiplication via `ops::multiply`.
    fn mul(self, rhs: &'b Array) -> Self::Output {
        ops::multiply(self, rhs)
    }
}

impl Neg for &Array {
    type Output = Result<Array, Error>;

    fn neg(self) -> Self::Output {
        ops::negate(self)
    }
}

/// Plain value copy of an array's contents, without gradient state.
#[cfg(feature = "serialization")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArraySnapshot {
    pub shape: Vec<usize>,
    pub dtype: Dtype,
    pub data: Storage,
}

#[cfg(feature = "serialization")]
impl Array {
    pub fn to_snapshot(&self) -> ArraySnapshot {
        ArraySnapshot {
            shape: self.shape(),
            dtype: self.dtype(),
            data: self.to_storage(),
        }
    }

    pub fn from_snapshot(snapshot: ArraySnapshot, device: &Arc<Device>) -> Result<Self, Error> {
        if snapshot.data.dtype() != snapshot.dtype {
            return Err(Error::DtypeMismatch {
                op: "from_snapshot".to_string(),
                lhs: snapshot.dtype,
                rhs: snapshot.data.dtype(),
            });
        }
        if snapshot.data.shape() != snapshot.shape.as_slice() {
            return Err(Error::ShapeMismatch {
                expected: snapshot.shape,
                actual: snapshot.data.shape().to_vec(),
            });
        }
        Ok(Self::from_storage(snapshot.data, device))
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(&self.to_snapshot())
            .map_err(|e| Error::InvalidOperation(format!("Failed to serialize array: {}", e)))
    }

    pub fn from_json(json: &str, device: &Arc<Device>) -> Result<Self, Error> {
        let snapshot: ArraySnapshot = serde_json::from_str(json)
            .map_err(|e| Error::InvalidOperation(format!("Failed to deserialize array: {}", e)))?;
        Self::from_snapshot(snapshot, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn device() -> Arc<Device> {
        Context::new().default_device().unwrap()
    }

    #[test]
    fn constant_view_shares_buffer_but_not_graphs() {
        let device = device();
        let g1 = GraphId::new("array_g1");
        let g2 = GraphId::new("array_g2");
        let a = Array::from_vec(vec![1.0f64, 2.0], &[2], &device).unwrap();
        a.require_grad(&g1).unwrap();
        a.require_grad(&g2).unwrap();

        let c = a.as_constant(&[g1]);
        assert!(c.shares_buffer_with(&a));
        assert_ne!(c.id(), a.id());
        assert!(!c.is_grad_required(&g1));
        assert!(c.is_grad_required(&g2));
        assert!(a.as_constant_all().graph_ids().is_empty());
    }
}
