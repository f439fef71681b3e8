//! tshark-backed adapter implementations.
//!
//! Each argument group becomes one `tshark` invocation; groups are chained
//! into a pipeline so every step's filter runs against the data already
//! narrowed by the steps before it. The discovery adapter parses the final
//! stage's field output into candidate records; the runner adapter writes
//! the filtered capture and surfaces diagnostic output.

mod discovery;
mod pipeline;
mod runner;

pub use discovery::{TsharkDiscovery, TsharkDiscoveryTask};
pub use runner::{TsharkRunTask, TsharkRunner};
