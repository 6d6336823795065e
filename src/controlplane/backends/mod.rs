//! Backend Adapters
//!
//! Implementations of the connection, datacenter and virtual machine ports.

pub mod simulator;

pub use simulator::{
    FaultInjector, Operation, SimulatedConnectionManager, SimulatedDatacenter, SimulatedVm,
};
