pub mod collector;
pub mod lifecycle;
pub mod registry;

pub use collector::{ArgumentCollector, CollectorError};
pub use lifecycle::{InstallStep, ItemCommand, ItemLifecycle, LifecycleError};
pub use registry::ItemRegistry;
