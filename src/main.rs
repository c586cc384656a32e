use std::{
    path::{Path, PathBuf},
    process,
};

use pressroom::{
    application::{Renderer, RendererConfig, error::AppError},
    config::{self, ProbeArgs, RenderArgs},
    domain::RenderRequest,
    infra::{error::InfraError, telemetry},
};
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, code = error.code(), "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, code = error.code(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args.command.ok_or_else(|| {
        AppError::validation("no command given; see `pressroom --help`")
    })?;

    telemetry::init(&settings.logging)?;
    let renderer = Renderer::new(RendererConfig::from(&settings), settings.defaults.clone())?;

    match command {
        config::Command::Render(args) => run_render(&renderer, *args).await,
        config::Command::Probe(args) => run_probe(&renderer, args).await,
    }
}

async fn run_render(renderer: &Renderer, args: RenderArgs) -> Result<(), AppError> {
    let RenderArgs {
        options,
        input,
        url,
        output,
        ..
    } = args;
    let options = options.into_options();

    let request = if url {
        RenderRequest::url(input, options)
    } else if input == "-" {
        let mut html = String::new();
        io::stdin()
            .read_to_string(&mut html)
            .await
            .map_err(InfraError::from)?;
        if html.trim().is_empty() {
            return Err(AppError::validation("no HTML received on stdin"));
        }
        RenderRequest::html(html, options)
    } else {
        let path = PathBuf::from(&input);
        if !path.is_file() {
            return Err(AppError::validation(format!(
                "input `{input}` is not a file; pass --url to render a URL"
            )));
        }
        RenderRequest::file(path, options)
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(target = "pressroom::cli", "Interrupted; shutting renderer down");
            interrupt.cancel();
        }
    });

    let outcome = renderer.render_with_cancel(request, cancel).await;
    signal_task.abort();
    let document = outcome?;

    match output.as_deref() {
        None => write_stdout(&document).await?,
        Some(path) if path == Path::new("-") => write_stdout(&document).await?,
        Some(path) => {
            tokio::fs::write(path, &document)
                .await
                .map_err(InfraError::from)?;
            info!(
                target = "pressroom::cli",
                path = %path.display(),
                bytes = document.len(),
                "Document written"
            );
        }
    }
    Ok(())
}

async fn write_stdout(document: &[u8]) -> Result<(), AppError> {
    let mut stdout = io::stdout();
    stdout.write_all(document).await.map_err(InfraError::from)?;
    stdout.flush().await.map_err(InfraError::from)?;
    Ok(())
}

async fn run_probe(renderer: &Renderer, _args: ProbeArgs) -> Result<(), AppError> {
    let report = renderer.probe().await?;
    match report.version {
        Some(version) => println!(
            "{}\t{}\t{version}",
            report.backend,
            report.path.display()
        ),
        None => println!("{}\t{}", report.backend, report.path.display()),
    }
    Ok(())
}
