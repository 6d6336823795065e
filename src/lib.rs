//! FCD CSI Controller
//!
//! Controller half of a CSI plugin that provisions vSphere First Class Disks
//! (FCDs) and attaches them to node VMs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                    REST API (/csi.v1.Controller/*)                    │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                           Controller                                  │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────────────┐ ┌──────────────┐  │
//! │  │ Zone         │ │ Volume       │ │ Attach       │ │ List         │  │
//! │  │ Resolver     │ │ Store        │ │ Coordinator  │ │ Paginator    │  │
//! │  └──────┬───────┘ └──────┬───────┘ └──────┬───────┘ └──────┬───────┘  │
//! │         └────────────────┴────────┬───────┴────────────────┘          │
//! ├───────────────────────────────────┼──────────────────────────────────┤
//! │        Ports: ConnectionManager / Datacenter / VirtualMachine         │
//! ├───────────────────────────────────┼──────────────────────────────────┤
//! │                       Simulated inventory                             │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: controller service, its components and the REST API
//! - [`config`]: file configuration and inventory
//! - [`domain`]: disk model and backend ports
//! - [`error`]: error types and CSI status codes

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;

pub use config::Config;

pub use controlplane::{
    ApiServer, ApiServerConfig, Controller, ControllerMetrics, RequestContext, RestRouter,
};

pub use controlplane::backends::SimulatedConnectionManager;

pub use domain::ports::{
    BackendInstance, ConnectionManager, ConnectionManagerRef, Datacenter, VirtualMachine,
};

pub use error::{Code, DriverError, Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
