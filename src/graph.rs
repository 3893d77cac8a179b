use crate::array::Array;
use crate::dtype::Dtype;
use crate::error::Error;
use crate::ops;
use lazy_static::lazy_static;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Name of the graph used when callers do not pick one.
pub const DEFAULT_GRAPH_ID: &str = "default";

/// Table size above which [`GraphId::try_new`] refuses new names.
pub const MAX_GRAPH_IDS: usize = 1 << 16;

struct GraphIdTable {
    by_name: HashMap<Arc<str>, u32>,
    names: Vec<Arc<str>>,
}

impl GraphIdTable {
    fn lookup(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Returns `None` if `name` is new and the table already holds `limit` names.
    fn intern(&mut self, name: &str, limit: usize) -> Option<u32> {
        if let Some(index) = self.lookup(name) {
            return Some(index);
        }
        if self.names.len() >= limit {
            return None;
        }
        let index = self.names.len() as u32;
        let name: Arc<str> = Arc::from(name);
        self.names.push(name.clone());
        self.by_name.insert(name, index);
        Some(index)
    }
}

lazy_static! {
    static ref GRAPH_IDS: Mutex<GraphIdTable> = Mutex::new(GraphIdTable {
        by_name: HashMap::new(),
        names: Vec::new(),
    });
}

/// Tag of one independent differentiation context.
///
/// Ids are interned: two ids created from the same name compare equal, and
/// equality/hashing is a single integer comparison.
///
/// Interned names live for the rest of the process. Use a bounded set of
/// names in program code, and [`GraphId::try_new`] for names that come from
/// outside the program.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u32);

impl GraphId {
    /// Interns `name` unconditionally.
    pub fn new(name: &str) -> Self {
        // The table is only ever appended to, so a poisoned lock still holds consistent data.
        let mut table = GRAPH_IDS.lock().unwrap_or_else(|e| e.into_inner());
        GraphId(table.intern(name, usize::MAX).unwrap_or_default())
    }

    /// Like [`GraphId::new`], but fails once [`MAX_GRAPH_IDS`] names are interned.
    pub fn try_new(name: &str) -> Result<Self, Error> {
        let mut table = GRAPH_IDS.lock().unwrap_or_else(|e| e.into_inner());
        table.intern(name, MAX_GRAPH_IDS).map(GraphId).ok_or_else(|| {
            Error::InvalidOperation(format!(
                "Graph id table is full ({} names), refusing to intern '{}'",
                MAX_GRAPH_IDS, name
            ))
        })
    }

    pub fn default_graph() -> Self {
        GraphId::new(DEFAULT_GRAPH_ID)
    }

    pub fn name(&self) -> Arc<str> {
        let table = GRAPH_IDS.lock().unwrap_or_else(|e| e.into_inner());
        table
            .names
            .get(self.0 as usize)
            .cloned()
            .unwrap_or_else(|| Arc::from("<unknown>"))
    }
}

impl Default for GraphId {
    fn default() -> Self {
        GraphId::default_graph()
    }
}

impl From<&str> for GraphId {
    fn from(name: &str) -> Self {
        GraphId::new(name)
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Debug for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GraphId({:?})", &*self.name())
    }
}

#[cfg(feature = "serialization")]
impl serde::Serialize for GraphId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

#[cfg(feature = "serialization")]
impl<'de> serde::Deserialize<'de> for GraphId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        GraphId::try_new(&name).map_err(serde::de::Error::custom)
    }
}

/// Per-graph gradient state of one array.
///
/// Shared between the owning array and every op node that consumed the array,
/// so the backward pass can reach it without holding the array's buffer.
pub(crate) struct ArrayNode {
    pub(crate) array_id: usize,
    pub(crate) shape: Vec<usize>,
    pub(crate) dtype: Dtype,
    pub(crate) grad: Option<Array>,
    pub(crate) op_node: Option<Rc<OpNode>>,
}

pub(crate) type ArrayNodeRef = Rc<RefCell<ArrayNode>>;

impl ArrayNode {
    pub(crate) fn new_ref(array: &Array) -> ArrayNodeRef {
        Rc::new(RefCell::new(ArrayNode {
            array_id: array.id(),
            shape: array.shape(),
            dtype: array.dtype(),
            grad: None,
            op_node: None,
        }))
    }

    fn detach_into(&mut self, pending: &mut Vec<Teardown>) {
        if let Some(op_node) = self.op_node.take() {
            pending.push(Teardown::Op(op_node));
        }
        if let Some(grad) = self.grad.take() {
            pending.push(Teardown::Array(grad));
        }
    }
}

/// Pieces of a graph waiting to be released by [`ArrayNode`]'s `Drop`.
enum Teardown {
    Op(Rc<OpNode>),
    Node(ArrayNodeRef),
    Array(Array),
}

impl Drop for ArrayNode {
    // Chains of nodes and op nodes own each other in turn, so the default
    // drop glue would recurse once per op. Unlink them with a work list.
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.detach_into(&mut pending);
        while let Some(item) = pending.pop() {
            match item {
                Teardown::Op(op_node) => {
                    let Ok(op_node) = Rc::try_unwrap(op_node) else {
                        continue;
                    };
                    for input in op_node.inputs {
                        pending.extend(input.nodes.into_values().map(Teardown::Node));
                        let captured = input.backward_fn.into_arrays();
                        pending.extend(captured.into_iter().map(Teardown::Array));
                    }
                }
                Teardown::Node(node) => {
                    if let Ok(node) = Rc::try_unwrap(node) {
                        node.into_inner().detach_into(&mut pending);
                    }
                }
                Teardown::Array(array) => {
                    pending.extend(array.into_graph_nodes().into_iter().map(Teardown::Node));
                }
            }
        }
    }
}

type CustomBackwardFn = dyn Fn(&Array, &[GraphId]) -> Result<Array, Error>;

/// Gradient formula for one input of an op.
///
/// Each variant carries exactly the forward values its formula needs.
/// `apply` maps the output gradient (and the graphs on which the formula must
/// not record) to this input's gradient contribution.
#[derive(Clone)]
pub enum BackwardFn {
    /// Gradient passes through unchanged.
    Identity,
    Negate,
    /// Gradient times the captured operand (the other side of a product).
    MultiplyBy(Array),
    /// Gradient of `take` w.r.t. the source array: scatter-add into zeros.
    TakeGrad {
        input_shape: Vec<usize>,
        indices: Array,
        axis: usize,
    },
    /// Gradient of `add_at` w.r.t. the added slices: gather along the axis.
    AddAtGrad { indices: Array, axis: usize },
    Custom(Rc<CustomBackwardFn>),
}

impl BackwardFn {
    pub fn custom(
        f: impl Fn(&Array, &[GraphId]) -> Result<Array, Error> + 'static,
    ) -> Self {
        BackwardFn::Custom(Rc::new(f))
    }

    pub fn apply(&self, grad_output: &Array, stop_graph_ids: &[GraphId]) -> Result<Array, Error> {
        match self {
            BackwardFn::Identity => Ok(grad_output.clone()),
            BackwardFn::Negate => ops::negate(grad_output),
            BackwardFn::MultiplyBy(other) => {
                ops::multiply(grad_output, &other.as_constant(stop_graph_ids))
            }
            BackwardFn::TakeGrad {
                input_shape,
                indices,
                axis,
            } => {
                let zeros =
                    Array::zeros(input_shape, grad_output.dtype(), &grad_output.device())?;
                ops::add_at(&zeros, indices, *axis, grad_output)
            }
            BackwardFn::AddAtGrad { indices, axis } => ops::take(grad_output, indices, *axis),
            BackwardFn::Custom(f) => f(grad_output, stop_graph_ids),
        }
    }

    /// Arrays captured by the formula.
    fn into_arrays(self) -> Vec<Array> {
        match self {
            BackwardFn::MultiplyBy(other) => vec![other],
            BackwardFn::TakeGrad { indices, .. } | BackwardFn::AddAtGrad { indices, .. } => {
                vec![indices]
            }
            BackwardFn::Identity | BackwardFn::Negate | BackwardFn::Custom(_) => Vec::new(),
        }
    }
}

impl fmt::Debug for BackwardFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackwardFn::Identity => write!(f, "Identity"),
            BackwardFn::Negate => write!(f, "Negate"),
            BackwardFn::MultiplyBy(other) => write!(f, "MultiplyBy(array {})", other.id()),
            BackwardFn::TakeGrad {
                input_shape, axis, ..
            } => write!(f, "TakeGrad(input_shape={:?}, axis={})", input_shape, axis),
            BackwardFn::AddAtGrad { axis, .. } => write!(f, "AddAtGrad(axis={})", axis),
            BackwardFn::Custom(_) => write!(f, "Custom(<closure>)"),
        }
    }
}

static OP_NODE_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub(crate) struct OpNodeInput {
    pub(crate) array_id: usize,
    /// The input's gradient slots on the graphs this node is active on.
    pub(crate) nodes: HashMap<GraphId, ArrayNodeRef>,
    pub(crate) backward_fn: BackwardFn,
}

/// Record of one forward op invocation, attached to its output.
pub struct OpNode {
    id: usize,
    name: String,
    graph_ids: Vec<GraphId>,
    pub(crate) inputs: Vec<OpNodeInput>,
}

impl OpNode {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Graphs on which this node propagates gradients, in creation order.
    pub fn graph_ids(&self) -> &[GraphId] {
        &self.graph_ids
    }

    pub fn is_active(&self, graph_id: &GraphId) -> bool {
        self.graph_ids.contains(graph_id)
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn input_array_ids(&self) -> Vec<usize> {
        self.inputs.iter().map(|input| input.array_id).collect()
    }

    pub fn backward_fns(&self) -> Vec<&BackwardFn> {
        self.inputs.iter().map(|input| &input.backward_fn).collect()
    }

    /// Whether input `index` receives gradients on `graph_id`.
    pub fn input_requires_grad(&self, index: usize, graph_id: &GraphId) -> bool {
        self.inputs
            .get(index)
            .is_some_and(|input| input.nodes.contains_key(graph_id))
    }
}

impl fmt::Debug for OpNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("graph_ids", &self.graph_ids)
            .field("inputs", &self.input_array_ids())
            .field("backward_fns", &self.backward_fns())
            .finish()
    }
}

/// Records the backward step of a forward op on `output`.
///
/// The node is active on every graph on which at least one input requires
/// gradient; if there is none, nothing is recorded. `backward_fns[i]` is the
/// gradient formula for `inputs[i]`.
pub fn set_up_op_nodes(
    name: &str,
    inputs: &[&Array],
    output: &Array,
    backward_fns: Vec<BackwardFn>,
) -> Result<(), Error> {
    if inputs.len() != backward_fns.len() {
        return Err(Error::GradientError(format!(
            "Op '{}' has {} input(s) but {} backward function(s)",
            name,
            inputs.len(),
            backward_fns.len()
        )));
    }

    let mut graph_ids: Vec<GraphId> = inputs.iter().flat_map(|input| input.graph_ids()).collect();
    graph_ids.sort();
    graph_ids.dedup();
    if graph_ids.is_empty() {
        return Ok(());
    }

    for graph_id in &graph_ids {
        if output.is_grad_required(graph_id) {
            return Err(Error::GradientError(format!(
                "Output array {} of op '{}' is already connected to graph '{}'",
                output.id(),
                name,
                graph_id
            )));
        }
    }

    let node_inputs = inputs
        .iter()
        .zip(backward_fns)
        .map(|(input, backward_fn)| OpNodeInput {
            array_id: input.id(),
            nodes: input.nodes_snapshot(),
            backward_fn,
        })
        .collect();

    let op_node = Rc::new(OpNode {
        id: OP_NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
        name: name.to_string(),
        graph_ids: graph_ids.clone(),
        inputs: node_inputs,
    });

    log::trace!(
        "recorded op node {} '{}' on graphs {:?} for array {}",
        op_node.id,
        op_node.name,
        graph_ids,
        output.id()
    );

    for graph_id in graph_ids {
        let node = ArrayNode::new_ref(output);
        node.borrow_mut().op_node = Some(op_node.clone());
        output.insert_node(graph_id, node);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_ids_are_interned() {
        let a = GraphId::new("graph_interned");
        let b = GraphId::from("graph_interned");
        let c = GraphId::new("graph_other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(&*a.name(), "graph_interned");
        assert_eq!(format!("{}", c), "graph_other");
        assert_eq!(GraphId::default(), GraphId::new(DEFAULT_GRAPH_ID));
        assert_eq!(GraphId::try_new("graph_interned").unwrap(), a);
    }

    #[test]
    fn interning_stops_at_the_limit() {
        let mut table = GraphIdTable {
            by_name: HashMap::new(),
            names: Vec::new(),
        };
        assert_eq!(table.intern("first", 2), Some(0));
        assert_eq!(table.intern("second", 2), Some(1));
        assert_eq!(table.intern("third", 2), None);
        // Known names are still found once the table is full
        assert_eq!(table.intern("first", 2), Some(0));
        assert_eq!(table.names.len(), 2);
    }

    #[test]
    fn backward_fn_debug_hides_closures() {
        let f = BackwardFn::custom(|gout, _| Ok(gout.clone()));
        assert_eq!(format!("{:?}", f), "Custom(<closure>)");
        assert_eq!(format!("{:?}", BackwardFn::Negate), "Negate");
    }
}
