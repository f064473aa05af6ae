pub mod error;
pub mod monitor;
pub mod registry;

pub use crate::error::RegistryError;
pub use crate::monitor::{MonitorClient, DEFAULT_MONITOR_URL};
pub use crate::registry::{RegistryClient, DEFAULT_REGISTRY_URL};
