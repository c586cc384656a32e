//! Render pipeline: option compilation, connection retry, protocol driving
//! and the public facade.

pub mod compile;
pub mod connect;
pub mod driver;
pub mod error;
pub mod legacy;
pub mod renderer;

pub use renderer::{BinaryReport, Renderer, RendererConfig};
