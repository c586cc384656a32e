use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::{Margins, Numeric, RenderOptions};

/// Command-line arguments for the pressroom binary.
#[derive(Debug, Parser)]
#[command(
    name = "pressroom",
    version,
    about = "Convert HTML to PDF with headless Chrome or wkhtmltopdf"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PRESSROOM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render an HTML file, URL or stdin to PDF.
    Render(Box<RenderArgs>),
    /// Locate the configured renderer binary and report its version.
    Probe(ProbeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct SettingsOverrides {
    /// Override the renderer backend (chrome|wkhtmltopdf).
    #[arg(long = "backend", value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Override the renderer executable path.
    #[arg(long = "binary", value_name = "PATH", value_hint = ValueHint::ExecutablePath)]
    pub binary: Option<PathBuf>,

    /// Pin the wkhtmltopdf version instead of probing it.
    #[arg(long = "binary-version", value_name = "VERSION")]
    pub binary_version: Option<String>,

    /// Override the overall request deadline.
    #[arg(long = "timeout-seconds", value_name = "SECONDS")]
    pub timeout_seconds: Option<u64>,

    /// Directory for staged fragments.
    #[arg(long = "temp-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub temp_dir: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: SettingsOverrides,

    #[command(flatten)]
    pub options: RenderOptionArgs,

    /// HTML file to render, a URL with --url, or `-` for HTML on stdin.
    #[arg(value_name = "INPUT", value_hint = ValueHint::AnyPath)]
    pub input: String,

    /// Treat INPUT as a URL.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub url: bool,

    /// Where to write the PDF; stdout when omitted or `-`.
    #[arg(short, long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub overrides: SettingsOverrides,
}

/// Per-request render options settable from the command line.
#[derive(Debug, Args, Default, Clone)]
pub struct RenderOptionArgs {
    /// Print in landscape orientation.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub landscape: bool,

    /// Print CSS backgrounds.
    #[arg(long = "print-background", action = clap::ArgAction::SetTrue)]
    pub print_background: bool,

    #[arg(long = "margin-top", value_name = "N")]
    pub margin_top: Option<f64>,

    #[arg(long = "margin-right", value_name = "N")]
    pub margin_right: Option<f64>,

    #[arg(long = "margin-bottom", value_name = "N")]
    pub margin_bottom: Option<f64>,

    #[arg(long = "margin-left", value_name = "N")]
    pub margin_left: Option<f64>,

    /// Paper size name for wkhtmltopdf (A4, Letter, ...).
    #[arg(long = "page-size", value_name = "NAME")]
    pub page_size: Option<String>,

    /// Document title for wkhtmltopdf.
    #[arg(long, value_name = "TEXT")]
    pub title: Option<String>,

    /// In-page function called with the page count before the final print.
    #[arg(long = "page-number-callback", value_name = "NAME")]
    pub page_number_callback: Option<String>,

    /// Raw argument passed to wkhtmltopdf ahead of the compiled flags.
    #[arg(
        long = "extra",
        value_name = "ARG",
        action = clap::ArgAction::Append,
        allow_hyphen_values = true
    )]
    pub extra: Vec<String>,
}

impl RenderOptionArgs {
    pub fn into_options(self) -> RenderOptions {
        let margin = |value: Option<f64>| value.map(Numeric::Float);
        RenderOptions {
            landscape: self.landscape.then_some(true),
            print_background: self.print_background.then_some(true),
            margin: Margins {
                top: margin(self.margin_top),
                right: margin(self.margin_right),
                bottom: margin(self.margin_bottom),
                left: margin(self.margin_left),
            },
            page_size: self.page_size,
            title: self.title,
            page_number_callback: self.page_number_callback,
            extra: self.extra,
            ..RenderOptions::default()
        }
    }
}
