//! A multi-graph reverse-mode automatic differentiation engine for
//! N-dimensional arrays, with pluggable backends
//!
//! This library provides:
//! - Arrays with per-graph gradient tracking: one array can take part in
//!   several independent differentiation graphs at once
//! - Op nodes recorded at forward time and replayed by the backward engine
//! - A backend / device / op registry through which every routine dispatches
//! - A numerical gradient checker based on central differences
//!
//! # Features
//! - `serialization` - Enables serde support for dtypes, device ids and array snapshots
//!
//! # Example
//! ```rust
//! use tapegrad::{ops, Array, Context, GraphId};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let context = Context::new();
//!     let device = context.default_device()?;
//!     let graph = GraphId::new("main");
//!
//!     // Create arrays and mark the ones to differentiate
//!     let a = Array::from_vec(vec![1.0f32, 2.0, 3.0], &[3], &device)?;
//!     let b = Array::from_vec(vec![4.0f32, 5.0, 6.0], &[3], &device)?;
//!     a.require_grad(&graph)?;
//!     b.require_grad(&graph)?;
//!
//!     // Forward ops record op nodes on `graph`
//!     let c = ops::multiply(&a, &b)?;
//!     let d = ops::add(&c, &a)?;
//!
//!     // Backward pass seeded with ones
//!     d.backward(&graph)?;
//!
//!     println!("Gradient of a: {:?}", a.grad(&graph).map(|g| g.to_f64_vec()));
//!     Ok(())
//! }
//! ```

pub mod array;
pub mod backend;
pub mod backward;
pub mod context;
pub mod dtype;
pub mod error;
pub mod gradient_check;
pub mod graph;
pub mod ops;
pub mod storage;

pub use array::Array;
#[cfg(feature = "serialization")]
pub use array::ArraySnapshot;
pub use backend::{Backend, Device, DeviceId, DeviceTable, NativeBackend, OpKind, OpRegistry};
pub use backward::{backward, backward_outputs, backward_with_seed};
pub use context::Context;
pub use dtype::{Dtype, DtypeKind, Element};
pub use error::Error;
pub use gradient_check::{all_close, calculate_numerical_gradient, check_backward_computation};
pub use graph::{set_up_op_nodes, BackwardFn, GraphId, OpNode, DEFAULT_GRAPH_ID, MAX_GRAPH_IDS};
pub use storage::Storage;
