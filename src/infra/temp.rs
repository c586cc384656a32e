//! Request-scoped staging of HTML fragments and output files.
//!
//! Every file lives in a [`NamedTempFile`], so it is unlinked when the owning
//! [`TempAssets`] is dropped, whichever way the request ends.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use tempfile::{Builder, NamedTempFile};
use tracing::debug;

use crate::domain::{RenderError, source};

/// One staged file.
#[derive(Debug)]
pub struct TempAsset {
    file: NamedTempFile,
}

impl TempAsset {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Percent-encoded `file:///...` form handed to renderers that expect URLs.
    pub fn file_url(&self) -> Result<String, RenderError> {
        source::file_url(self.path())
    }
}

/// Owner of every temp file created for one request.
#[derive(Debug, Default)]
pub struct TempAssets {
    dir: Option<PathBuf>,
    assets: Vec<TempAsset>,
}

impl TempAssets {
    /// Stage files under `dir`, or the system temp dir when `None`.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            assets: Vec::new(),
        }
    }

    /// Write `content` to a fresh file named after `label` and return it.
    pub fn stage(&mut self, label: &str, suffix: &str, content: &str) -> io::Result<&TempAsset> {
        let mut file = self.builder_file(label, suffix)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        debug!(
            target = "pressroom::infra::temp",
            label,
            path = %file.path().display(),
            bytes = content.len(),
            "Staged temp asset"
        );
        Ok(self.push(file))
    }

    /// Create an empty file for a renderer to write into.
    pub fn reserve(&mut self, label: &str, suffix: &str) -> io::Result<&TempAsset> {
        let file = self.builder_file(label, suffix)?;
        Ok(self.push(file))
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.assets.iter().map(TempAsset::path)
    }

    fn builder_file(&self, label: &str, suffix: &str) -> io::Result<NamedTempFile> {
        let prefix = format!("pressroom_{label}_");
        let mut builder = Builder::new();
        builder.prefix(&prefix).suffix(suffix);
        match self.dir.as_deref() {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }

    fn push(&mut self, file: NamedTempFile) -> &TempAsset {
        self.assets.push(TempAsset { file });
        let last = self.assets.len() - 1;
        &self.assets[last]
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn staged_content_matches_input_exactly() {
        let mut assets = TempAssets::new(None);
        let content = "<p>Page <span class=\"page\"></span></p>\n\u{00e9}";
        let path = assets
            .stage("header", ".html", content)
            .expect("stage")
            .path()
            .to_path_buf();

        assert_eq!(fs::read_to_string(&path).expect("read"), content);
        assert!(path.extension().is_some_and(|ext| ext == "html"));
    }

    #[test]
    fn dropping_the_owner_removes_every_file() {
        let mut assets = TempAssets::new(None);
        assets.stage("body", ".html", "<html></html>").expect("stage");
        assets.reserve("output", ".pdf").expect("reserve");
        let paths: Vec<PathBuf> = assets.paths().map(Path::to_path_buf).collect();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.exists()));

        drop(assets);

        assert!(paths.iter().all(|p| !p.exists()));
    }

    #[test]
    fn honours_custom_directory() {
        let dir = TempDir::new().expect("temp dir");
        let mut assets = TempAssets::new(Some(dir.path().to_path_buf()));
        let asset = assets.stage("cover", ".html", "cover").expect("stage");
        assert!(asset.path().starts_with(dir.path()));
        assert!(asset.file_url().expect("url").starts_with("file:///"));
    }

    #[test]
    fn file_url_escapes_reserved_characters() {
        let root = TempDir::new().expect("temp dir");
        let dir = root.path().join("reports #1 ?50%");
        fs::create_dir(&dir).expect("create dir");
        let mut assets = TempAssets::new(Some(dir.clone()));
        let asset = assets.stage("page", ".html", "x").expect("stage");

        let url = url::Url::parse(&asset.file_url().expect("url")).expect("parse");
        assert_eq!(url.fragment(), None);
        assert_eq!(url.query(), None);
        assert_eq!(url.to_file_path().expect("file path"), asset.path());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let mut assets = TempAssets::new(Some(dir.path().join("absent")));
        assert!(assets.stage("body", ".html", "x").is_err());
        assert!(assets.is_empty());
    }
}
