//! Public entry points tying staging, process supervision, connection and
//! printing together.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use base64::{Engine, engine::general_purpose::STANDARD};
use metrics::{counter, gauge, histogram};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::application::{
    compile::decode_basic_auth,
    connect::{RetryPolicy, connect},
    driver::{self, DriverTimeouts, PrintJob, PrintParameters, validate_callback_name},
    legacy::{self, LegacyJob},
};
use crate::domain::{
    Backend, BinaryVersion, RenderError, RenderOptions, RenderRequest, RenderSource, Stage,
    source::file_url,
};
use crate::infra::{
    binary::{self, CHROME_EXE_NAMES, WKHTMLTOPDF_EXE_NAMES},
    cdp::{CdpConnector, Connector, ControlChannel},
    port,
    process::{self, RendererHandle},
    temp::TempAssets,
};

const METRIC_RENDER_TOTAL: &str = "pressroom_render_total";
const METRIC_RENDER_MS: &str = "pressroom_render_ms";
const METRIC_DOCUMENT_BYTES: &str = "pressroom_document_bytes";
const METRIC_LAUNCH_TOTAL: &str = "pressroom_renderer_launch_total";
const METRIC_RENDERERS_RUNNING: &str = "pressroom_renderers_running";

#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub backend: Backend,
    /// Explicit executable; searched for on `PATH` when `None`.
    pub binary: Option<PathBuf>,
    pub host: String,
    pub port_attempts: u32,
    pub launch_settle: Duration,
    pub shutdown_grace: Duration,
    pub retry: RetryPolicy,
    pub driver: DriverTimeouts,
    pub request_deadline: Duration,
    pub version_probe_timeout: Duration,
    /// Skips probing when set.
    pub binary_version: Option<BinaryVersion>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Chrome,
            binary: None,
            host: "127.0.0.1".to_string(),
            port_attempts: 1000,
            launch_settle: Duration::from_millis(200),
            shutdown_grace: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            driver: DriverTimeouts::default(),
            request_deadline: Duration::from_secs(120),
            version_probe_timeout: Duration::from_secs(5),
            binary_version: None,
        }
    }
}

/// Result of [`Renderer::probe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryReport {
    pub backend: Backend,
    pub path: PathBuf,
    /// Only wkhtmltopdf versions affect argument compilation.
    pub version: Option<BinaryVersion>,
}

impl From<&crate::config::Settings> for RendererConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        let renderer = &settings.renderer;
        let timeouts = &settings.timeouts;
        let retry = &settings.retry;
        Self {
            backend: renderer.backend,
            binary: renderer.binary.clone(),
            host: renderer.host.clone(),
            port_attempts: renderer.port_attempts.get(),
            launch_settle: timeouts.launch_settle,
            shutdown_grace: timeouts.shutdown_grace,
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.get(),
                initial_delay: retry.initial_delay,
                multiplier: retry.multiplier,
                max_delay: retry.max_delay,
                settle: retry.settle,
            },
            driver: DriverTimeouts {
                command: timeouts.command,
                page_load: timeouts.page_load,
                pagination_settle: timeouts.pagination_settle,
            },
            request_deadline: timeouts.request,
            version_probe_timeout: timeouts.version_probe,
            binary_version: renderer.binary_version,
        }
    }
}

/// Converts HTML to PDF with a configured external renderer.
///
/// Cheap to clone; every call spawns and tears down its own process.
#[derive(Clone)]
pub struct Renderer {
    config: Arc<RendererConfig>,
    defaults: Arc<RenderOptions>,
    connector: Arc<dyn Connector>,
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("config", &self.config)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl Renderer {
    pub fn new(config: RendererConfig, defaults: RenderOptions) -> Result<Self, RenderError> {
        let connector = CdpConnector::new(config.driver.command)?;
        Ok(Self::with_connector(config, defaults, Arc::new(connector)))
    }

    /// Build a renderer that opens control channels through `connector`.
    pub fn with_connector(
        config: RendererConfig,
        defaults: RenderOptions,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            defaults: Arc::new(defaults),
            connector,
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn defaults(&self) -> &RenderOptions {
        &self.defaults
    }

    pub async fn render_from_html(
        &self,
        html: impl Into<String>,
        options: RenderOptions,
    ) -> Result<Vec<u8>, RenderError> {
        self.render(RenderRequest::html(html, options)).await
    }

    pub async fn render_from_url(
        &self,
        url: impl Into<String>,
        options: RenderOptions,
    ) -> Result<Vec<u8>, RenderError> {
        self.render(RenderRequest::url(url, options)).await
    }

    pub async fn render_from_file(
        &self,
        path: impl AsRef<Path>,
        options: RenderOptions,
    ) -> Result<Vec<u8>, RenderError> {
        self.render(RenderRequest::file(path.as_ref(), options))
            .await
    }

    pub async fn render(&self, request: RenderRequest) -> Result<Vec<u8>, RenderError> {
        self.render_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Render `request`, giving up when `cancel` fires or the configured
    /// request deadline passes. The renderer process and staged files are
    /// released either way.
    pub async fn render_with_cancel(
        &self,
        request: RenderRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>, RenderError> {
        let started_at = Instant::now();
        let backend = self.config.backend;
        let source_kind = request.source.kind();
        let options = request.options.merged_over(&self.defaults);

        let token = cancel.child_token();
        let pipeline = self.dispatch(&request.source, &options, &token);
        tokio::pin!(pipeline);

        let mut deadline_hit = false;
        let outcome = match time::timeout(self.config.request_deadline, &mut pipeline).await {
            Ok(outcome) => outcome,
            Err(_) => {
                deadline_hit = true;
                token.cancel();
                pipeline.await
            }
        };
        let outcome = match outcome {
            Err(RenderError::Cancelled { stage }) if deadline_hit => {
                Err(RenderError::Timeout { stage })
            }
            other => other,
        };

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_RENDER_MS, "backend" => backend.as_str()).record(elapsed_ms);
        match &outcome {
            Ok(document) => {
                counter!(METRIC_RENDER_TOTAL, "backend" => backend.as_str(), "outcome" => "ok")
                    .increment(1);
                histogram!(METRIC_DOCUMENT_BYTES).record(document.len() as f64);
                info!(
                    target = "pressroom::application::renderer",
                    backend = %backend,
                    source = source_kind,
                    bytes = document.len(),
                    elapsed_ms = elapsed_ms as u64,
                    "Render complete"
                );
            }
            Err(err) => {
                counter!(METRIC_RENDER_TOTAL, "backend" => backend.as_str(), "outcome" => err.code())
                    .increment(1);
                error!(
                    target = "pressroom::application::renderer",
                    backend = %backend,
                    source = source_kind,
                    error_code = err.code(),
                    error = %err,
                    elapsed_ms = elapsed_ms as u64,
                    "Render failed"
                );
            }
        }
        outcome
    }

    /// Locate the configured binary and, for wkhtmltopdf, its version.
    pub async fn probe(&self) -> Result<BinaryReport, RenderError> {
        let config = &self.config;
        match config.backend {
            Backend::Chrome => Ok(BinaryReport {
                backend: config.backend,
                path: binary::find_binary(config.binary.as_deref(), CHROME_EXE_NAMES)?,
                version: None,
            }),
            Backend::Wkhtmltopdf => {
                let path = binary::find_binary(config.binary.as_deref(), WKHTMLTOPDF_EXE_NAMES)?;
                let version = match config.binary_version {
                    Some(version) => version,
                    None => {
                        binary::probe_version(
                            &path,
                            config.version_probe_timeout,
                            &CancellationToken::new(),
                        )
                        .await
                    }
                };
                Ok(BinaryReport {
                    backend: config.backend,
                    path,
                    version: Some(version),
                })
            }
        }
    }

    async fn dispatch(
        &self,
        source: &RenderSource,
        options: &RenderOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RenderError> {
        let authorization = preflight(options)?;
        let mut assets = TempAssets::new(options.temp_dir.clone());
        match self.config.backend {
            Backend::Chrome => {
                self.render_chrome(source, options, authorization.as_deref(), &mut assets, cancel)
                    .await
            }
            Backend::Wkhtmltopdf => {
                self.render_legacy(source, options, &mut assets, cancel)
                    .await
            }
        }
    }

    async fn render_chrome(
        &self,
        source: &RenderSource,
        options: &RenderOptions,
        authorization: Option<&str>,
        assets: &mut TempAssets,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RenderError> {
        let config = &self.config;
        let callback = options.page_number_callback.as_deref();
        let binary = binary::find_binary(config.binary.as_deref(), CHROME_EXE_NAMES)?;
        let url = match source {
            RenderSource::Html(html) => assets
                .stage("page", ".html", html)
                .map_err(RenderError::io(Stage::Staging))?
                .file_url()?,
            RenderSource::Url(url) => url.clone(),
            RenderSource::File(path) => file_url(path)?,
        };
        let params = PrintParameters::from_options(options);

        let port = port::allocate(&config.host, config.port_attempts)?;
        let mut handle =
            process::launch(&binary, &config.host, port, config.launch_settle, cancel).await?;
        counter!(METRIC_LAUNCH_TOTAL).increment(1);
        let _running = RunningRenderer::track();

        let job = PrintJob {
            url: &url,
            params: &params,
            page_number_callback: callback,
            authorization,
        };
        let outcome = self.drive(&handle, &job, cancel).await;

        handle.terminate(config.shutdown_grace).await;
        outcome
    }

    async fn drive(
        &self,
        handle: &RendererHandle,
        job: &PrintJob<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RenderError> {
        let mut channel: Box<dyn ControlChannel> = connect(
            self.connector.as_ref(),
            handle.host(),
            handle.port(),
            &self.config.retry,
            cancel,
        )
        .await?;
        let outcome = driver::render(channel.as_mut(), job, &self.config.driver, cancel).await;
        channel.close().await;
        outcome
    }

    async fn render_legacy(
        &self,
        source: &RenderSource,
        options: &RenderOptions,
        assets: &mut TempAssets,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RenderError> {
        let config = &self.config;
        let binary = binary::find_binary(config.binary.as_deref(), WKHTMLTOPDF_EXE_NAMES)?;
        let version = match config.binary_version {
            Some(version) => version,
            None => binary::probe_version(&binary, config.version_probe_timeout, cancel).await,
        };
        let source = match source {
            RenderSource::Html(html) => assets
                .stage("page", ".html", html)
                .map_err(RenderError::io(Stage::Staging))?
                .path()
                .display()
                .to_string(),
            RenderSource::Url(url) => url.clone(),
            RenderSource::File(path) => path.display().to_string(),
        };

        let job = LegacyJob {
            binary: &binary,
            version,
            source: &source,
            options,
            deadline: config.request_deadline,
        };
        legacy::render(&job, assets, cancel).await
    }
}

/// Counts a launched renderer in the running gauge until dropped, which also
/// covers a render future dropped mid-flight.
struct RunningRenderer;

impl RunningRenderer {
    fn track() -> Self {
        gauge!(METRIC_RENDERERS_RUNNING).increment(1.0);
        Self
    }
}

impl Drop for RunningRenderer {
    fn drop(&mut self) {
        gauge!(METRIC_RENDERERS_RUNNING).decrement(1.0);
    }
}

/// Option checks that must pass before anything is looked up or spawned.
/// Returns the `Authorization` header value for `basic_auth`, if set.
fn preflight(options: &RenderOptions) -> Result<Option<String>, RenderError> {
    if let Some(name) = options.page_number_callback.as_deref() {
        validate_callback_name(name)?;
    }
    let Some(encoded) = options.basic_auth.as_deref() else {
        return Ok(None);
    };
    let (user, password) = decode_basic_auth(encoded)?;
    let credentials = STANDARD.encode(format!("{user}:{password}"));
    Ok(Some(format!("Basic {credentials}")))
}
