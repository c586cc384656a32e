//! Renderer executable discovery and version probing.

use std::{
    env,
    ffi::OsStr,
    path::{Path, PathBuf},
    time::Duration,
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{BinaryVersion, RenderError, Stage};

use super::process;

pub const CHROME_EXE_NAMES: &[&str] = &[
    "google-chrome",
    "Google Chrome Canary",
    "Google Chrome",
    "chromium",
    "chromium-browser",
];

pub const WKHTMLTOPDF_EXE_NAMES: &[&str] = &["wkhtmltopdf"];

const WELL_KNOWN_DIRS: &[&str] = &[
    "/usr/bin",
    "/usr/local/bin",
    "/Applications/Google Chrome Canary.app/Contents/MacOS",
    "/Applications/Google Chrome.app/Contents/MacOS",
];

/// Directories searched for a renderer: `PATH`, the well-known install
/// locations, then `~/bin`. Duplicates are dropped, order is kept.
pub fn search_locations(path_var: Option<&OsStr>, home: Option<&Path>) -> Vec<PathBuf> {
    let mut locations: Vec<PathBuf> = path_var
        .map(|value| env::split_paths(value).collect())
        .unwrap_or_default();
    locations.extend(WELL_KNOWN_DIRS.iter().map(PathBuf::from));
    if let Some(home) = home {
        locations.push(home.join("bin"));
    }

    let mut unique = Vec::with_capacity(locations.len());
    for location in locations {
        if !location.as_os_str().is_empty() && !unique.contains(&location) {
            unique.push(location);
        }
    }
    unique
}

/// Resolve the renderer executable, preferring an explicitly configured path.
pub fn find_binary(configured: Option<&Path>, names: &[&str]) -> Result<PathBuf, RenderError> {
    if let Some(path) = configured {
        if !path.exists() {
            return Err(RenderError::BinaryNotFound {
                searched: path.display().to_string(),
            });
        }
        ensure_executable(path)?;
        return Ok(path.to_path_buf());
    }

    let home = env::var_os("HOME").map(PathBuf::from);
    let locations = search_locations(env::var_os("PATH").as_deref(), home.as_deref());
    find_in(&locations, names)
}

pub fn find_in(locations: &[PathBuf], names: &[&str]) -> Result<PathBuf, RenderError> {
    for name in names {
        if let Some(found) = locations
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
        {
            ensure_executable(&found)?;
            debug!(
                target = "pressroom::infra::binary",
                path = %found.display(),
                "Discovered renderer binary"
            );
            return Ok(found);
        }
    }

    Err(RenderError::BinaryNotFound {
        searched: format!("{} in {} locations", names.join(", "), locations.len()),
    })
}

#[cfg(unix)]
pub fn ensure_executable(path: &Path) -> Result<(), RenderError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = path
        .metadata()
        .map_err(|_| RenderError::BinaryNotFound {
            searched: path.display().to_string(),
        })?;
    if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
        Ok(())
    } else {
        Err(RenderError::BinaryNotExecutable {
            path: path.to_path_buf(),
        })
    }
}

#[cfg(not(unix))]
pub fn ensure_executable(path: &Path) -> Result<(), RenderError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(RenderError::BinaryNotExecutable {
            path: path.to_path_buf(),
        })
    }
}

/// Ask a wkhtmltopdf-family binary for its version, falling back to
/// [`BinaryVersion::DEFAULT`] on any failure.
pub async fn probe_version(
    binary: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> BinaryVersion {
    let run = match process::run_to_completion(
        binary,
        ["--version"],
        timeout,
        Stage::LegacyRun,
        cancel,
    )
    .await
    {
        Ok(run) => run,
        Err(err) => {
            warn!(
                target = "pressroom::infra::binary",
                binary = %binary.display(),
                error = %err,
                fallback = %BinaryVersion::DEFAULT,
                "Version probe failed; using fallback"
            );
            return BinaryVersion::DEFAULT;
        }
    };

    let output = String::from_utf8_lossy(&run.stdout);
    match BinaryVersion::from_version_output(&output) {
        Some(version) => {
            info!(
                target = "pressroom::infra::binary",
                binary = %binary.display(),
                version = %version,
                "Probed renderer version"
            );
            version
        }
        None => {
            warn!(
                target = "pressroom::infra::binary",
                binary = %binary.display(),
                output = %output.trim(),
                fallback = %BinaryVersion::DEFAULT,
                "Unrecognised version output; using fallback"
            );
            BinaryVersion::DEFAULT
        }
    }
}
