//! Page load and print over a connected [`ControlChannel`].
//!
//! With a page-number callback the page is printed twice: the first document
//! is only used to count pages, the callback is evaluated in the page with
//! that count, and the second document is the result.

use std::{future::Future, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use lopdf::Document as PdfDocument;
use metrics::counter;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::{HeaderFooter, Numeric, RenderError, RenderOptions, Stage};
use crate::infra::cdp::ControlChannel;

const METRIC_PRINT_PASSES: &str = "pressroom_print_passes_total";

const DEFAULT_PAPER_WIDTH_IN: f64 = 8.5;
const DEFAULT_PAPER_HEIGHT_IN: f64 = 11.0;
const DEFAULT_MARGIN_IN: f64 = 0.4;

/// `Page.printToPDF` parameters; lengths are in inches.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintParameters {
    pub print_background: bool,
    pub landscape: bool,
    pub paper_width: f64,
    pub paper_height: f64,
    pub margin_top: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    pub margin_right: f64,
    pub scale: f64,
    pub display_header_footer: bool,
    pub page_ranges: String,
    pub header_template: String,
    pub footer_template: String,
}

impl Default for PrintParameters {
    fn default() -> Self {
        Self {
            print_background: true,
            landscape: false,
            paper_width: DEFAULT_PAPER_WIDTH_IN,
            paper_height: DEFAULT_PAPER_HEIGHT_IN,
            margin_top: DEFAULT_MARGIN_IN,
            margin_bottom: DEFAULT_MARGIN_IN,
            margin_left: DEFAULT_MARGIN_IN,
            margin_right: DEFAULT_MARGIN_IN,
            scale: 1.0,
            display_header_footer: false,
            page_ranges: String::new(),
            header_template: String::new(),
            footer_template: String::new(),
        }
    }
}

impl PrintParameters {
    pub fn from_options(options: &RenderOptions) -> Self {
        let d = Self::default();
        let inches = |value: Option<Numeric>, fallback: f64| {
            value.map_or(fallback, |v| v.as_f64())
        };
        let template = |block: &Option<HeaderFooter>| {
            block
                .as_ref()
                .and_then(|b| b.content.clone())
                .unwrap_or_default()
        };

        Self {
            print_background: options.print_background.unwrap_or(d.print_background),
            landscape: options.is_landscape(),
            paper_width: inches(options.paper_width, d.paper_width),
            paper_height: inches(options.paper_height, d.paper_height),
            margin_top: inches(options.margin.top, d.margin_top),
            margin_bottom: inches(options.margin.bottom, d.margin_bottom),
            margin_left: inches(options.margin.left, d.margin_left),
            margin_right: inches(options.margin.right, d.margin_right),
            scale: inches(options.scale, d.scale),
            display_header_footer: options
                .display_header_footer
                .unwrap_or(d.display_header_footer),
            page_ranges: options.page_ranges.clone().unwrap_or_default(),
            header_template: template(&options.header),
            footer_template: template(&options.footer),
        }
    }

    /// Width and height of the printed page as the reader sees it.
    pub fn effective_page_size(&self) -> (f64, f64) {
        if self.landscape {
            (self.paper_height, self.paper_width)
        } else {
            (self.paper_width, self.paper_height)
        }
    }

    /// Call expression handing the page count and geometry to `callback`.
    pub fn callback_expression(&self, callback: &str, page_count: usize) -> String {
        let (width, height) = self.effective_page_size();
        format!(
            "{callback}({page_count}, {width}, {height}, {}, {}, {}, {})",
            self.margin_top, self.margin_right, self.margin_bottom, self.margin_left
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverTimeouts {
    pub command: Duration,
    pub page_load: Duration,
    pub pagination_settle: Duration,
}

impl Default for DriverTimeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(30),
            page_load: Duration::from_secs(30),
            pagination_settle: Duration::from_millis(200),
        }
    }
}

/// One page to load and print.
#[derive(Debug, Clone, Copy)]
pub struct PrintJob<'a> {
    pub url: &'a str,
    pub params: &'a PrintParameters,
    pub page_number_callback: Option<&'a str>,
    /// `Authorization` header value sent with every request the page makes.
    pub authorization: Option<&'a str>,
}

/// Accepts dotted JavaScript identifier paths such as `window.pager.apply`.
pub fn validate_callback_name(name: &str) -> Result<(), RenderError> {
    let valid_segment = |segment: &str| {
        let mut chars = segment.chars();
        chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    };
    if name.split('.').all(valid_segment) {
        Ok(())
    } else {
        Err(RenderError::config(
            "page_number_callback",
            format!("`{name}` is not a JavaScript function name"),
        ))
    }
}

async fn bounded<T>(
    stage: Stage,
    limit: Duration,
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T, RenderError>>,
) -> Result<T, RenderError> {
    tokio::select! {
        outcome = time::timeout(limit, work) => outcome.map_err(|_| RenderError::Timeout { stage })?,
        _ = cancel.cancelled() => Err(RenderError::Cancelled { stage }),
    }
}

async fn command(
    channel: &mut dyn ControlChannel,
    stage: Stage,
    method: &str,
    params: Value,
    timeouts: &DriverTimeouts,
    cancel: &CancellationToken,
) -> Result<Value, RenderError> {
    debug!(
        target = "pressroom::application::driver",
        stage = %stage,
        method,
        "Issuing command"
    );
    bounded(
        stage,
        timeouts.command,
        cancel,
        channel.send_command(method, params),
    )
    .await
}

async fn print(
    channel: &mut dyn ControlChannel,
    params: &PrintParameters,
    timeouts: &DriverTimeouts,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, RenderError> {
    let payload = serde_json::to_value(params)
        .map_err(|err| RenderError::protocol("Page.printToPDF", err.to_string()))?;
    let result = command(
        channel,
        Stage::Print,
        "Page.printToPDF",
        payload,
        timeouts,
        cancel,
    )
    .await?;
    counter!(METRIC_PRINT_PASSES).increment(1);

    let data = result
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| RenderError::protocol("Page.printToPDF", "response carries no `data`"))?;
    let document = STANDARD
        .decode(data)
        .map_err(|err| RenderError::protocol("Page.printToPDF", format!("invalid base64: {err}")))?;

    if document.iter().all(u8::is_ascii_whitespace) {
        return Err(RenderError::EmptyDocument {
            detail: "print returned no content".to_string(),
        });
    }
    Ok(document)
}

pub fn count_pages(document: &[u8]) -> Result<usize, RenderError> {
    let parsed = PdfDocument::load_mem(document).map_err(|err| {
        RenderError::protocol("Page.printToPDF", format!("unreadable first pass: {err}"))
    })?;
    Ok(parsed.get_pages().len())
}

async fn apply_callback(
    channel: &mut dyn ControlChannel,
    expression: String,
    timeouts: &DriverTimeouts,
    cancel: &CancellationToken,
) -> Result<(), RenderError> {
    let result = command(
        channel,
        Stage::Paginate,
        "Runtime.evaluate",
        json!({
            "expression": expression,
            "awaitPromise": true,
            "returnByValue": true,
        }),
        timeouts,
        cancel,
    )
    .await?;

    if let Some(details) = result.get("exceptionDetails") {
        let message = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("script threw");
        return Err(RenderError::protocol("Runtime.evaluate", message));
    }
    Ok(())
}

/// Load `job.url` and print it, returning the PDF bytes.
pub async fn render(
    channel: &mut dyn ControlChannel,
    job: &PrintJob<'_>,
    timeouts: &DriverTimeouts,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, RenderError> {
    if let Some(callback) = job.page_number_callback {
        validate_callback_name(callback)?;
    }

    command(channel, Stage::Navigate, "Page.enable", json!({}), timeouts, cancel).await?;
    command(channel, Stage::Navigate, "Network.enable", json!({}), timeouts, cancel).await?;
    if let Some(authorization) = job.authorization {
        command(
            channel,
            Stage::Navigate,
            "Network.setExtraHTTPHeaders",
            json!({ "headers": { "Authorization": authorization } }),
            timeouts,
            cancel,
        )
        .await?;
    }
    let navigated = command(
        channel,
        Stage::Navigate,
        "Page.navigate",
        json!({ "url": job.url }),
        timeouts,
        cancel,
    )
    .await?;
    if let Some(reason) = navigated.get("errorText").and_then(Value::as_str) {
        return Err(RenderError::protocol("Page.navigate", reason));
    }

    let load_started = time::Instant::now();
    bounded(
        Stage::LoadWait,
        timeouts.page_load,
        cancel,
        channel.next_event("Page.loadEventFired"),
    )
    .await?;
    info!(
        target = "pressroom::application::driver",
        url = job.url,
        load_ms = load_started.elapsed().as_millis() as u64,
        "Page loaded"
    );

    let first = print(channel, job.params, timeouts, cancel).await?;
    let Some(callback) = job.page_number_callback else {
        return Ok(first);
    };

    let page_count = count_pages(&first)?;
    info!(
        target = "pressroom::application::driver",
        callback,
        page_count,
        "Applying page-number callback"
    );
    apply_callback(
        channel,
        job.params.callback_expression(callback, page_count),
        timeouts,
        cancel,
    )
    .await?;

    tokio::select! {
        _ = time::sleep(timeouts.pagination_settle) => {}
        _ = cancel.cancelled() => return Err(RenderError::Cancelled { stage: Stage::Paginate }),
    }
    print(channel, job.params, timeouts, cancel).await
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};

    use async_trait::async_trait;
    use lopdf::{Object, dictionary};

    use crate::domain::Margins;

    use super::*;

    fn pdf_with_pages(count: usize) -> Vec<u8> {
        let mut doc = PdfDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = (0..count)
            .map(|_| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                })
                .into()
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).expect("save");
        out
    }

    /// Channel answering from per-method queues and recording every call.
    #[derive(Default)]
    struct ScriptedChannel {
        replies: HashMap<String, VecDeque<Result<Value, RenderError>>>,
        calls: Vec<(String, Value)>,
        never_loads: bool,
    }

    impl ScriptedChannel {
        fn reply(mut self, method: &str, result: Result<Value, RenderError>) -> Self {
            self.replies
                .entry(method.to_string())
                .or_default()
                .push_back(result);
            self
        }

        fn printing(self, documents: Vec<Vec<u8>>) -> Self {
            documents.into_iter().fold(self, |channel, document| {
                channel.reply(
                    "Page.printToPDF",
                    Ok(json!({ "data": STANDARD.encode(&document) })),
                )
            })
        }

        fn methods(&self) -> Vec<&str> {
            self.calls.iter().map(|(m, _)| m.as_str()).collect()
        }
    }

    #[async_trait]
    impl ControlChannel for ScriptedChannel {
        async fn send_command(&mut self, method: &str, params: Value) -> Result<Value, RenderError> {
            self.calls.push((method.to_string(), params));
            self.replies
                .get_mut(method)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Ok(json!({})))
        }

        async fn next_event(&mut self, _name: &str) -> Result<Value, RenderError> {
            if self.never_loads {
                std::future::pending::<()>().await;
            }
            Ok(json!({ "timestamp": 1.0 }))
        }

        async fn close(&mut self) {}
    }

    fn fast_timeouts() -> DriverTimeouts {
        DriverTimeouts {
            command: Duration::from_secs(1),
            page_load: Duration::from_millis(100),
            pagination_settle: Duration::ZERO,
        }
    }

    async fn run(
        channel: &mut ScriptedChannel,
        params: &PrintParameters,
        callback: Option<&str>,
    ) -> Result<Vec<u8>, RenderError> {
        let job = PrintJob {
            url: "file:///tmp/page.html",
            params,
            page_number_callback: callback,
            authorization: None,
        };
        render(channel, &job, &fast_timeouts(), &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn single_pass_follows_protocol_order() {
        let pdf = pdf_with_pages(1);
        let mut channel = ScriptedChannel::default().printing(vec![pdf.clone()]);
        let params = PrintParameters::default();

        let document = run(&mut channel, &params, None).await.expect("render");
        assert_eq!(document, pdf);
        assert_eq!(
            channel.methods(),
            ["Page.enable", "Network.enable", "Page.navigate", "Page.printToPDF"]
        );
        assert_eq!(channel.calls[2].1["url"], "file:///tmp/page.html");

        let printed = &channel.calls[3].1;
        assert_eq!(printed["printBackground"], true);
        assert_eq!(printed["paperWidth"], 8.5);
        assert_eq!(printed["paperHeight"], 11.0);
        assert_eq!(printed["marginLeft"], 0.4);
        assert_eq!(printed["pageRanges"], "");
    }

    #[tokio::test]
    async fn credentials_are_installed_before_navigation() {
        let mut channel = ScriptedChannel::default().printing(vec![pdf_with_pages(1)]);
        let params = PrintParameters::default();
        let job = PrintJob {
            url: "https://intranet.example/report",
            params: &params,
            page_number_callback: None,
            authorization: Some("Basic dXNlcjpzZWNyZXQ="),
        };
        render(&mut channel, &job, &fast_timeouts(), &CancellationToken::new())
            .await
            .expect("render");

        assert_eq!(
            channel.methods(),
            [
                "Page.enable",
                "Network.enable",
                "Network.setExtraHTTPHeaders",
                "Page.navigate",
                "Page.printToPDF"
            ]
        );
        assert_eq!(
            channel.calls[2].1["headers"]["Authorization"],
            "Basic dXNlcjpzZWNyZXQ="
        );
    }

    #[tokio::test]
    async fn empty_payload_is_an_empty_document() {
        let mut channel = ScriptedChannel::default().printing(vec![b"  \n".to_vec()]);
        let err = run(&mut channel, &PrintParameters::default(), None)
            .await
            .expect_err("empty");
        assert!(matches!(err, RenderError::EmptyDocument { .. }));
    }

    #[tokio::test]
    async fn missing_data_field_is_a_protocol_error() {
        let mut channel =
            ScriptedChannel::default().reply("Page.printToPDF", Ok(json!({ "stream": "x" })));
        let err = run(&mut channel, &PrintParameters::default(), None)
            .await
            .expect_err("no data");
        assert!(matches!(err, RenderError::Protocol { method, .. } if method == "Page.printToPDF"));
    }

    #[tokio::test]
    async fn load_deadline_times_out() {
        let mut channel = ScriptedChannel {
            never_loads: true,
            ..ScriptedChannel::default()
        };
        let err = run(&mut channel, &PrintParameters::default(), None)
            .await
            .expect_err("deadline");
        assert!(matches!(
            err,
            RenderError::Timeout {
                stage: Stage::LoadWait
            }
        ));
        assert!(!channel.methods().contains(&"Page.printToPDF"));
    }

    #[tokio::test]
    async fn callback_triggers_second_print() {
        let first = pdf_with_pages(3);
        let second = pdf_with_pages(3);
        let mut channel = ScriptedChannel::default()
            .printing(vec![first, second.clone()])
            .reply("Runtime.evaluate", Ok(json!({ "result": { "type": "undefined" } })));
        let params = PrintParameters {
            landscape: true,
            ..PrintParameters::default()
        };

        let document = run(&mut channel, &params, Some("applyPageNumbers"))
            .await
            .expect("render");
        assert_eq!(document, second);

        let methods = channel.methods();
        assert_eq!(
            methods.iter().filter(|m| **m == "Page.printToPDF").count(),
            2
        );
        assert_eq!(
            &methods[3..],
            ["Page.printToPDF", "Runtime.evaluate", "Page.printToPDF"]
        );
        assert_eq!(
            channel.calls[4].1["expression"],
            "applyPageNumbers(3, 11, 8.5, 0.4, 0.4, 0.4, 0.4)"
        );
    }

    #[tokio::test]
    async fn script_exception_fails_without_fallback() {
        let first = pdf_with_pages(2);
        let mut channel = ScriptedChannel::default().printing(vec![first]).reply(
            "Runtime.evaluate",
            Ok(json!({
                "result": { "type": "object" },
                "exceptionDetails": {
                    "text": "Uncaught",
                    "exception": { "description": "ReferenceError: applyPageNumbers is not defined" }
                }
            })),
        );

        let err = run(&mut channel, &PrintParameters::default(), Some("applyPageNumbers"))
            .await
            .expect_err("exception");
        match err {
            RenderError::Protocol { method, message } => {
                assert_eq!(method, "Runtime.evaluate");
                assert!(message.contains("ReferenceError"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreadable_first_pass_fails() {
        let mut channel = ScriptedChannel::default().printing(vec![b"%PDF-garbage".to_vec()]);
        let err = run(&mut channel, &PrintParameters::default(), Some("paginate"))
            .await
            .expect_err("unparsable");
        assert!(matches!(err, RenderError::Protocol { .. }));
        assert!(!channel.methods().contains(&"Runtime.evaluate"));
    }

    #[tokio::test]
    async fn protocol_error_names_the_method() {
        let mut channel = ScriptedChannel::default().reply(
            "Page.navigate",
            Err(RenderError::protocol("Page.navigate", "Cannot navigate")),
        );
        let err = run(&mut channel, &PrintParameters::default(), None)
            .await
            .expect_err("navigate");
        assert!(err.to_string().contains("Page.navigate"));
    }

    #[test]
    fn print_parameters_follow_options() {
        let options = RenderOptions {
            landscape: Some(true),
            margin: Margins {
                top: Some(Numeric::Float(1.0)),
                ..Margins::default()
            },
            header: Some(HeaderFooter {
                content: Some("<span class=\"title\"></span>".to_string()),
                ..HeaderFooter::default()
            }),
            display_header_footer: Some(true),
            ..RenderOptions::default()
        };
        let params = PrintParameters::from_options(&options);
        assert!(params.landscape);
        assert_eq!(params.margin_top, 1.0);
        assert_eq!(params.margin_bottom, 0.4);
        assert_eq!(params.header_template, "<span class=\"title\"></span>");
        assert_eq!(params.footer_template, "");

        let value = serde_json::to_value(&params).expect("json");
        assert_eq!(value["landscape"], true);
        assert_eq!(value["marginTop"], 1.0);
        assert_eq!(value["displayHeaderFooter"], true);
        assert_eq!(value["headerTemplate"], "<span class=\"title\"></span>");
    }

    #[test]
    fn callback_names_are_validated() {
        assert!(validate_callback_name("applyPageNumbers").is_ok());
        assert!(validate_callback_name("window.pager.$apply").is_ok());
        for bad in ["", "1abc", "alert(1);x", "a..b", "x y"] {
            assert!(validate_callback_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn counts_pages_of_generated_document() {
        assert_eq!(count_pages(&pdf_with_pages(4)).expect("count"), 4);
        assert!(count_pages(b"not a pdf").is_err());
    }
}
