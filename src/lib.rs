//! HTML to PDF conversion by driving an external renderer process.
//!
//! [`Renderer`](application::Renderer) is the entry point: it launches
//! headless Chrome (or runs wkhtmltopdf), feeds it the page and returns the
//! document bytes, tearing the process and any staged files down on every
//! exit path.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;

pub use application::{Renderer, RendererConfig};
pub use domain::{Backend, RenderError, RenderOptions, RenderRequest, RenderSource};
