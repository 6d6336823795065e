//! API Module
//!
//! REST binding of the CSI controller service.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
