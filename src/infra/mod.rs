//! Process, network and filesystem adapters plus runtime bootstrap.

pub mod binary;
pub mod cdp;
pub mod error;
pub mod port;
pub mod process;
pub mod telemetry;
pub mod temp;
