use std::path::{Path, PathBuf};

use url::Url;

use super::{error::RenderError, options::RenderOptions};

/// What to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderSource {
    /// An HTML document held in memory; staged to a temp file before rendering.
    Html(String),
    /// A remote or `file://` URL loaded directly by the renderer.
    Url(String),
    /// A local HTML file.
    File(PathBuf),
}

impl RenderSource {
    pub fn kind(&self) -> &'static str {
        match self {
            RenderSource::Html(_) => "html",
            RenderSource::Url(_) => "url",
            RenderSource::File(_) => "file",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub source: RenderSource,
    pub options: RenderOptions,
}

impl RenderRequest {
    pub fn new(source: RenderSource, options: RenderOptions) -> Self {
        Self { source, options }
    }

    pub fn html(html: impl Into<String>, options: RenderOptions) -> Self {
        Self::new(RenderSource::Html(html.into()), options)
    }

    pub fn url(url: impl Into<String>, options: RenderOptions) -> Self {
        Self::new(RenderSource::Url(url.into()), options)
    }

    pub fn file(path: impl Into<PathBuf>, options: RenderOptions) -> Self {
        Self::new(RenderSource::File(path.into()), options)
    }
}

/// `file://` URL for a local path, resolving relative paths against the
/// working directory.
pub fn file_url(path: &Path) -> Result<String, RenderError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(RenderError::io(super::Stage::Staging))?
            .join(path)
    };
    Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|()| {
            RenderError::config(
                "source",
                format!("cannot express {} as a file URL", absolute.display()),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn absolute_paths_become_file_urls() {
        let url = file_url(Path::new("/tmp/report page.html")).expect("file url");
        assert_eq!(url, "file:///tmp/report%20page.html");
    }

    #[cfg(unix)]
    #[test]
    fn relative_paths_resolve_against_cwd() {
        let url = file_url(Path::new("report.html")).expect("file url");
        assert!(url.starts_with("file:///"));
        assert!(url.ends_with("/report.html"));
    }
}
