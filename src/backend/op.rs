//! Op kinds, kernel interfaces and the per-device kernel registry.
//!
//! An op kind is a zero-sized marker naming an operation and the kernel
//! interface that implements it. A device holds one [`OpRegistry`] mapping op
//! names to kernels; backends populate it when a device is created.

use crate::array::Array;
use crate::error::Error;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait OpKind: 'static {
    /// Registry key, unique across op kinds.
    const NAME: &'static str;
    type Kernel: ?Sized + Send + Sync + 'static;
}

/// `out = f(a, b)` for same-shaped `a`, `b`, `out`.
pub trait BinaryKernel: Send + Sync {
    fn call(&self, a: &Array, b: &Array, out: &Array) -> Result<(), Error>;
}

/// `out = f(a)` for same-shaped `a`, `out`.
pub trait UnaryKernel: Send + Sync {
    fn call(&self, a: &Array, out: &Array) -> Result<(), Error>;
}

/// Sets every element of `out` to `value`, converted to `out`'s dtype.
pub trait FillKernel: Send + Sync {
    fn call(&self, value: f64, out: &Array) -> Result<(), Error>;
}

/// Gathers slices of `a` along `axis`.
///
/// `out` has shape `a.shape[..axis] ++ indices.shape ++ a.shape[axis+1..]`.
/// Indices are wrapped into range rather than rejected.
pub trait TakeKernel: Send + Sync {
    fn call(&self, a: &Array, indices: &Array, axis: usize, out: &Array) -> Result<(), Error>;
}

/// `out = a` with the slices of `b` added at `indices` along `axis`.
///
/// Repeated indices accumulate. `b` has the shape `take(a, indices, axis)` would have.
pub trait AddAtKernel: Send + Sync {
    fn call(
        &self,
        a: &Array,
        indices: &Array,
        axis: usize,
        b: &Array,
        out: &Array,
    ) -> Result<(), Error>;
}

macro_rules! op_kind {
    ($(#[$meta:meta])* $kind:ident, $name:literal, $kernel:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $kind;

        impl OpKind for $kind {
            const NAME: &'static str = $name;
            type Kernel = dyn $kernel;
        }
    };
}

op_kind!(AddOp, "add", BinaryKernel);
op_kind!(SubtractOp, "subtract", BinaryKernel);
op_kind!(MultiplyOp, "multiply", BinaryKernel);
op_kind!(NegateOp, "negate", UnaryKernel);
op_kind!(
    /// Element-wise copy into a fresh buffer.
    CopyOp,
    "copy",
    UnaryKernel
);
op_kind!(FillOp, "fill", FillKernel);
op_kind!(TakeOp, "take", TakeKernel);
op_kind!(AddAtOp, "add_at", AddAtKernel);

/// Kernels of one device, keyed by op name.
///
/// Each entry stores an `Arc<K::Kernel>` behind `dyn Any`; the op kind's
/// associated type restores the concrete trait object on lookup.
#[derive(Default)]
pub struct OpRegistry {
    kernels: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `kernel` for `K`, replacing any previous kernel for it.
    pub fn register<K: OpKind>(&mut self, kernel: Arc<K::Kernel>) {
        if self.kernels.insert(K::NAME, Box::new(kernel)).is_some() {
            log::debug!("replaced kernel for op '{}'", K::NAME);
        }
    }

    pub fn get<K: OpKind>(&self) -> Option<Arc<K::Kernel>> {
        self.kernels
            .get(K::NAME)
            .and_then(|entry| entry.downcast_ref::<Arc<K::Kernel>>())
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kernels.contains_key(name)
    }

    /// Registered op names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.kernels.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpRegistry")
            .field("ops", &self.names())
            .finish()
    }
}
