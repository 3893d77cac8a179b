use crate::backend::{Backend, Device, DeviceId, NativeBackend};
use crate::error::Error;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Named registry of backends.
///
/// A context is passed around explicitly; there is no process-wide default
/// device. `Context::new()` comes with the native backend registered.
pub struct Context {
    backends: Mutex<HashMap<String, Arc<dyn Backend>>>,
}

impl Context {
    pub fn new() -> Self {
        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        backends.insert(
            NativeBackend::NAME.to_string(),
            Arc::new(NativeBackend::new()),
        );
        Self {
            backends: Mutex::new(backends),
        }
    }

    /// A context without any backend.
    pub fn empty() -> Self {
        Self {
            backends: Mutex::new(HashMap::new()),
        }
    }

    fn backends_lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Arc<dyn Backend>>>, Error> {
        self.backends
            .lock()
            .map_err(|_| Error::InternalLogicError("Backend registry is poisoned".to_string()))
    }

    /// Registers `backend` under its name. Names must be unique.
    pub fn register_backend(&self, backend: Arc<dyn Backend>) -> Result<(), Error> {
        let name = backend.name().to_string();
        let mut backends = self.backends_lock()?;
        if backends.contains_key(&name) {
            return Err(Error::InvalidOperation(format!(
                "Backend '{}' is already registered",
                name
            )));
        }
        log::debug!(
            "registered backend '{}' with {} device(s)",
            name,
            backend.device_count()
        );
        backends.insert(name, backend);
        Ok(())
    }

    pub fn get_backend(&self, name: &str) -> Result<Arc<dyn Backend>, Error> {
        self.backends_lock()?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::BackendNotFound(name.to_string()))
    }

    pub fn get_device(&self, id: &DeviceId) -> Result<Arc<Device>, Error> {
        self.get_backend(&id.backend_name)?.get_device(id.index)
    }

    /// Device `native:0`.
    pub fn default_device(&self) -> Result<Arc<Device>, Error> {
        self.get_device(&DeviceId::new(NativeBackend::NAME, 0))
    }

    /// Registered backend names, sorted.
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .backends_lock()
            .map(|backends| backends.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("backends", &self.backend_names())
            .finish()
    }
}
