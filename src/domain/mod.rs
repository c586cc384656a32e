//! Domain layer types and invariants.

pub mod backend;
pub mod error;
pub mod options;
pub mod source;
pub mod version;

pub use backend::Backend;
pub use error::{RenderError, Stage};
pub use options::{Cover, HeaderFooter, Margins, Numeric, Outline, RenderOptions, Toc};
pub use source::{RenderRequest, RenderSource};
pub use version::BinaryVersion;
