//! wkhtmltopdf-family backend: one process run per document.

use std::{path::Path, time::Duration};

use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::compile::compile;
use crate::domain::{BinaryVersion, RenderError, RenderOptions, Stage};
use crate::infra::{process, temp::TempAssets};

/// Everything one legacy run needs.
#[derive(Debug, Clone, Copy)]
pub struct LegacyJob<'a> {
    pub binary: &'a Path,
    pub version: BinaryVersion,
    /// URL or local path handed to the binary as the input page.
    pub source: &'a str,
    pub options: &'a RenderOptions,
    pub deadline: Duration,
}

/// Run the binary and return the document it wrote.
///
/// Staged fragments and the output file live in `assets`, so they are
/// removed when the caller drops it.
pub async fn render(
    job: &LegacyJob<'_>,
    assets: &mut TempAssets,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, RenderError> {
    let compiled = compile(job.options, job.version, assets)?;
    let output = assets
        .reserve("output", ".pdf")
        .map_err(RenderError::io(Stage::Staging))?
        .path()
        .to_path_buf();

    let mut args = Vec::with_capacity(compiled.as_slice().len() + 3);
    args.push("-q".to_string());
    args.extend(compiled.into_vec());
    args.push(job.source.to_string());
    args.push(output.display().to_string());

    let run = process::run_to_completion(job.binary, &args, job.deadline, Stage::LegacyRun, cancel)
        .await?;
    let stderr = run.stderr.trim();

    if !run.status.success() {
        warn!(
            target = "pressroom::application::legacy",
            binary = %job.binary.display(),
            status = %run.status,
            stderr,
            "Renderer exited unsuccessfully"
        );
        let detail = if stderr.is_empty() {
            format!("exited with {}", run.status)
        } else {
            format!("exited with {}: {stderr}", run.status)
        };
        return Err(RenderError::process(Stage::LegacyRun, detail));
    }

    let document = fs::read(&output)
        .await
        .map_err(RenderError::io(Stage::LegacyRun))?;
    if document.iter().all(u8::is_ascii_whitespace) {
        return Err(RenderError::EmptyDocument {
            detail: stderr.to_string(),
        });
    }

    info!(
        target = "pressroom::application::legacy",
        binary = %job.binary.display(),
        version = %job.version,
        bytes = document.len(),
        elapsed_ms = run.elapsed.as_millis() as u64,
        "Legacy render complete"
    );
    Ok(document)
}
