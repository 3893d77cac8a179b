use crate::backend::op::{OpKind, OpRegistry};
use crate::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Address of a device: backend name plus index, written `"native:0"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct DeviceId {
    pub backend_name: String,
    pub index: usize,
}

impl DeviceId {
    pub fn new(backend_name: &str, index: usize) -> Self {
        Self {
            backend_name: backend_name.to_string(),
            index,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.backend_name, self.index)
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    /// Parses `"backend:index"`; a bare `"backend"` means index 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            None if !s.is_empty() => Ok(DeviceId::new(s, 0)),
            Some((backend, index)) if !backend.is_empty() => {
                let index = index.parse::<usize>().map_err(|_| {
                    Error::InvalidOperation(format!("Invalid device index in '{}'", s))
                })?;
                Ok(DeviceId::new(backend, index))
            }
            _ => Err(Error::InvalidOperation(format!("Invalid device name '{}'", s))),
        }
    }
}

/// One execution target of a backend, owning its op kernels.
///
/// Devices are created once per (backend, index) and shared as `Arc<Device>`.
pub struct Device {
    backend_name: String,
    index: usize,
    ops: OpRegistry,
}

impl Device {
    pub fn new(backend_name: &str, index: usize, ops: OpRegistry) -> Self {
        Self {
            backend_name: backend_name.to_string(),
            index,
            ops,
        }
    }

    pub fn id(&self) -> DeviceId {
        DeviceId::new(&self.backend_name, self.index)
    }

    pub fn name(&self) -> String {
        self.id().to_string()
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ops(&self) -> &OpRegistry {
        &self.ops
    }

    /// Kernel implementing `K` on this device.
    pub fn get_op<K: OpKind>(&self) -> Result<Arc<K::Kernel>, Error> {
        self.ops.get::<K>().ok_or_else(|| Error::OpNotRegistered {
            device: self.name(),
            op: K::NAME.to_string(),
        })
    }

    pub fn has_op<K: OpKind>(&self) -> bool {
        self.ops.contains(K::NAME)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name())
            .field("ops", &self.ops)
            .finish()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_parsing() {
        assert_eq!("native:2".parse::<DeviceId>().unwrap(), DeviceId::new("native", 2));
        assert_eq!("native".parse::<DeviceId>().unwrap(), DeviceId::new("native", 0));
        assert!("native:x".parse::<DeviceId>().is_err());
        assert!(":1".parse::<DeviceId>().is_err());
        assert_eq!(DeviceId::new("native", 1).to_string(), "native:1");
    }

    #[test]
    fn missing_op_is_reported() {
        let device = Device::new("bare", 0, OpRegistry::new());
        assert_eq!(device.name(), "bare:0");
        match device.get_op::<crate::backend::op::AddOp>() {
            Err(Error::OpNotRegistered { device, op }) => {
                assert_eq!(device, "bare:0");
                assert_eq!(op, "add");
            }
            other => panic!("expected OpNotRegistered, got {:?}", other.map(|_| ())),
        }
    }
}
