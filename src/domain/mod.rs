//! Domain layer - Disk model and collaborator port definitions
//!
//! This module defines the disk model and the traits (ports) that
//! virtualization-platform adapters implement, following hexagonal
//! architecture principles.

pub mod disk;
pub mod ports;

pub use disk::*;
pub use ports::*;
