//! Control Plane Module
//!
//! The CSI controller service and the components it orchestrates.

pub mod api;
pub mod attach;
pub mod backends;
pub mod context;
pub mod controller;
pub mod csi;
pub mod metrics;
pub mod paginator;
pub mod volume_store;
pub mod zone;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiServer, ApiServerConfig, RestRouter};
pub use context::RequestContext;
pub use controller::Controller;
pub use metrics::ControllerMetrics;
