//! Backend trait definition and module structure.

use crate::error::Error;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

pub mod device;
pub mod native;
pub mod op;

pub use device::{Device, DeviceId};
pub use native::NativeBackend;
pub use op::{
    AddAtKernel, AddAtOp, AddOp, BinaryKernel, CopyOp, FillKernel, FillOp, MultiplyOp, NegateOp,
    OpKind, OpRegistry, SubtractOp, TakeKernel, TakeOp, UnaryKernel,
};

/// A family of devices sharing one kernel implementation.
///
/// Implementors supply `create_device`; `get_device` memoizes its result so
/// each index is created at most once, even under concurrent first access.
pub trait Backend: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Number of addressable devices. Fixed for the backend's lifetime.
    fn device_count(&self) -> usize;

    /// The memo table backing `get_device`.
    fn devices(&self) -> &DeviceTable;

    /// Builds device `index`, registering its kernels. Called once per index.
    fn create_device(&self, index: usize) -> Result<Device, Error>;

    fn get_device(&self, index: usize) -> Result<Arc<Device>, Error> {
        self.devices().get_or_create(self, index)
    }
}

/// Lazily populated device slots, one per index.
#[derive(Debug, Default)]
pub struct DeviceTable {
    slots: Mutex<Vec<Option<Arc<Device>>>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns device `index`, creating it through `backend` on first access.
    pub fn get_or_create<B: Backend + ?Sized>(
        &self,
        backend: &B,
        index: usize,
    ) -> Result<Arc<Device>, Error> {
        let count = backend.device_count();
        if index >= count {
            return Err(Error::DeviceIndexOutOfRange {
                backend: backend.name().to_string(),
                index,
                count,
            });
        }

        let mut slots = self.slots.lock().map_err(|_| {
            Error::InternalLogicError(format!(
                "Device table of backend '{}' is poisoned",
                backend.name()
            ))
        })?;
        if slots.len() < count {
            slots.resize(count, None);
        }
        if let Some(device) = &slots[index] {
            return Ok(device.clone());
        }

        let device = Arc::new(backend.create_device(index)?);
        log::debug!(
            "created device {} with {} op(s)",
            device.name(),
            device.ops().names().len()
        );
        slots[index] = Some(device.clone());
        Ok(device)
    }

    /// Number of devices created so far.
    pub fn created_count(&self) -> Result<usize, Error> {
        let slots = self.slots.lock().map_err(|_| {
            Error::InternalLogicError("Device table is poisoned".to_string())
        })?;
        Ok(slots.iter().filter(|slot| slot.is_some()).count())
    }
}
