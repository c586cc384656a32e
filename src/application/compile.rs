//! Translation of [`RenderOptions`] into wkhtmltopdf command-line arguments.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::debug;

use crate::domain::{
    BinaryVersion, Cover, HeaderFooter, Margins, Outline, RenderError, RenderOptions, Stage, Toc,
};
use crate::infra::temp::TempAssets;

/// Ordered argument tokens, ready to follow the binary name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledArguments(Vec<String>);

impl CompiledArguments {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.iter().any(|t| t == token)
    }
}

#[derive(Default)]
struct ArgumentList {
    tokens: Vec<String>,
}

fn flag_name(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("--{prefix}-{}", name.replace('_', "-")),
        None => format!("--{}", name.replace('_', "-")),
    }
}

impl ArgumentList {
    fn push(&mut self, token: impl Into<String>) {
        self.tokens.push(token.into());
    }

    fn flag(&mut self, name: &str, enabled: Option<bool>) {
        self.prefixed_flag(None, name, enabled);
    }

    fn prefixed_flag(&mut self, prefix: Option<&str>, name: &str, enabled: Option<bool>) {
        if enabled == Some(true) {
            self.push(flag_name(prefix, name));
        }
    }

    fn value<V: fmt::Display>(&mut self, name: &str, value: Option<V>) {
        self.prefixed_value(None, name, value);
    }

    fn prefixed_value<V: fmt::Display>(&mut self, prefix: Option<&str>, name: &str, value: Option<V>) {
        if let Some(value) = value {
            self.push(flag_name(prefix, name));
            self.push(value.to_string());
        }
    }

    fn repeated(&mut self, name: &str, values: &[String]) {
        for value in values {
            self.push(flag_name(None, name));
            self.push(value.clone());
        }
    }

    fn name_value(&mut self, name: &str, values: &[String]) {
        for value in values {
            self.push(flag_name(None, name));
            self.tokens
                .extend(value.split_whitespace().map(str::to_string));
        }
    }
}

/// Compile `options` for a binary of `version`.
///
/// Inline header, footer and cover HTML is staged through `assets`; the
/// returned arguments reference those files, so `assets` must outlive the
/// renderer run.
pub fn compile(
    options: &RenderOptions,
    version: BinaryVersion,
    assets: &mut TempAssets,
) -> Result<CompiledArguments, RenderError> {
    // Decoded up front so a bad credential fails before anything is staged.
    let credentials = options.basic_auth.as_deref().map(decode_basic_auth).transpose()?;

    let mut args = ArgumentList::default();
    args.tokens.extend(options.extra.iter().cloned());
    push_others(&mut args, options);
    push_global(&mut args, options);
    if let Some(outline) = &options.outline {
        push_outline(&mut args, outline);
    }
    for (prefix, block) in [("header", &options.header), ("footer", &options.footer)] {
        if let Some(block) = block {
            push_header_footer(&mut args, prefix, block, assets)?;
        }
    }
    if let Some(cover) = &options.cover {
        push_cover(&mut args, cover, version, assets)?;
    }
    if let Some(toc) = &options.toc {
        push_toc(&mut args, toc, version);
    }
    if let Some((user, password)) = credentials {
        args.push("--username");
        args.push(user);
        args.push("--password");
        args.push(password);
    }

    debug!(
        target = "pressroom::application::compile",
        version = %version,
        tokens = args.tokens.len(),
        staged = assets.len(),
        "Compiled render options"
    );
    Ok(CompiledArguments(args.tokens))
}

fn push_others(args: &mut ArgumentList, o: &RenderOptions) {
    args.value("proxy", o.proxy.as_deref());
    args.value("username", o.username.as_deref());
    args.value("password", o.password.as_deref());
    args.value("encoding", o.encoding.as_deref());
    args.value("user_style_sheet", o.user_style_sheet.as_deref());
    args.value("viewport_size", o.viewport_size.as_deref());
    args.value("window_status", o.window_status.as_deref());
    args.repeated("allow", &o.allow);
    args.name_value("cookie", &o.cookie);
    args.name_value("post", &o.post);
    args.value("redirect_delay", o.redirect_delay);
    args.value("zoom", o.zoom);
    args.value("page_offset", o.page_offset);
    args.value("javascript_delay", o.javascript_delay);

    for (name, enabled) in [
        ("book", o.book),
        ("default_header", o.default_header),
        ("disable_javascript", o.disable_javascript),
        ("enable_plugins", o.enable_plugins),
        ("disable_internal_links", o.disable_internal_links),
        ("disable_external_links", o.disable_external_links),
        ("keep_relative_links", o.keep_relative_links),
        ("no_background", o.no_background),
        ("no_images", o.no_images),
        ("print_media_type", o.print_media_type),
        ("disable_local_file_access", o.disable_local_file_access),
        ("enable_local_file_access", o.enable_local_file_access),
        ("disable_smart_shrinking", o.disable_smart_shrinking),
        ("use_xserver", o.use_xserver),
        ("no_stop_slow_scripts", o.no_stop_slow_scripts),
    ] {
        args.flag(name, enabled);
    }
}

fn push_global(args: &mut ArgumentList, o: &RenderOptions) {
    let orientation = match (o.orientation.as_deref(), o.landscape) {
        (Some(orientation), _) => Some(orientation),
        (None, Some(true)) => Some("Landscape"),
        (None, _) => None,
    };
    args.value("orientation", orientation);
    args.value("dpi", o.dpi);
    args.value("page_size", o.page_size.as_deref());
    args.value("page_width", o.page_width.as_deref());
    args.value("title", o.title.as_deref());
    args.value("log_level", o.log_level.as_deref());
    args.flag("lowquality", o.lowquality);
    args.flag("grayscale", o.grayscale);
    args.flag("no_pdf_compression", o.no_pdf_compression);
    args.flag("quiet", o.quiet);
    args.value("image_dpi", o.image_dpi);
    args.value("image_quality", o.image_quality);
    args.value("page_height", o.page_height.as_deref());
    push_margins(args, &o.margin);
}

fn push_margins(args: &mut ArgumentList, margin: &Margins) {
    let prefix = Some("margin");
    args.prefixed_value(prefix, "top", margin.top);
    args.prefixed_value(prefix, "bottom", margin.bottom);
    args.prefixed_value(prefix, "left", margin.left);
    args.prefixed_value(prefix, "right", margin.right);
}

fn push_outline(args: &mut ArgumentList, outline: &Outline) {
    args.flag("outline", outline.outline);
    args.value("outline_depth", outline.outline_depth);
}

fn push_header_footer(
    args: &mut ArgumentList,
    prefix: &'static str,
    block: &HeaderFooter,
    assets: &mut TempAssets,
) -> Result<(), RenderError> {
    let p = Some(prefix);
    args.prefixed_value(p, "center", block.center.as_deref());
    args.prefixed_value(p, "font_name", block.font_name.as_deref());
    args.prefixed_value(p, "left", block.left.as_deref());
    args.prefixed_value(p, "right", block.right.as_deref());
    args.prefixed_value(p, "font_size", block.font_size);
    args.prefixed_value(p, "spacing", block.spacing);
    args.prefixed_flag(p, "line", block.line);

    let html_url = match block.content.as_deref() {
        Some(content) => Some(
            assets
                .stage(prefix, ".html", content)
                .map_err(RenderError::io(Stage::Staging))?
                .file_url()?,
        ),
        None => block.html_url.clone().filter(|url| !url.trim().is_empty()),
    };
    args.prefixed_value(p, "html", html_url);
    Ok(())
}

fn page_object(name: &str, version: BinaryVersion) -> String {
    if version.uses_bare_page_objects() {
        name.to_string()
    } else {
        format!("--{name}")
    }
}

fn push_cover(
    args: &mut ArgumentList,
    cover: &Cover,
    version: BinaryVersion,
    assets: &mut TempAssets,
) -> Result<(), RenderError> {
    let target = match cover {
        Cover::Url(url) if url.trim().is_empty() => return Ok(()),
        Cover::Html(html) if html.trim().is_empty() => return Ok(()),
        Cover::Url(url) => url.clone(),
        Cover::Path(path) => path.display().to_string(),
        Cover::Html(html) => assets
            .stage("cover", ".html", html)
            .map_err(RenderError::io(Stage::Staging))?
            .path()
            .display()
            .to_string(),
    };
    args.push(page_object("cover", version));
    args.push(target);
    Ok(())
}

fn push_toc(args: &mut ArgumentList, toc: &Toc, version: BinaryVersion) {
    let p = Some("toc");
    args.push(page_object("toc", version));
    args.prefixed_value(p, "font_name", toc.font_name.as_deref());
    args.prefixed_value(p, "header_text", toc.header_text.as_deref());
    args.value("xsl_style_sheet", toc.xsl_style_sheet.as_deref());
    args.prefixed_value(p, "depth", toc.depth);
    args.prefixed_value(p, "header_fs", toc.header_fs);
    args.prefixed_value(p, "text_size_shrink", toc.text_size_shrink);
    for (level, size) in toc.font_size_by_level.iter().enumerate() {
        args.prefixed_value(p, &format!("l{}_font_size", level + 1), *size);
    }
    args.prefixed_value(p, "level_indentation", toc.level_indentation);
    for (level, indent) in toc.indentation_by_level.iter().enumerate() {
        args.prefixed_value(p, &format!("l{}_indentation", level + 1), *indent);
    }
    args.prefixed_flag(p, "no_dots", toc.no_dots);
    args.prefixed_flag(p, "disable_links", toc.disable_links);
    args.prefixed_flag(p, "disable_back_links", toc.disable_back_links);
    args.flag("disable_dotted_lines", toc.disable_dotted_lines);
    args.flag("disable_toc_links", toc.disable_toc_links);
}

/// Split base64 `user:password` into its two parts.
pub fn decode_basic_auth(encoded: &str) -> Result<(String, String), RenderError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|err| RenderError::config("basic_auth", format!("not valid base64: {err}")))?;
    let decoded = String::from_utf8(bytes)
        .map_err(|_| RenderError::config("basic_auth", "credentials are not valid UTF-8"))?;

    let parts: Vec<&str> = decoded.split(':').collect();
    match parts.as_slice() {
        [user, password] => Ok(((*user).to_string(), (*password).to_string())),
        _ => Err(RenderError::config(
            "basic_auth",
            format!(
                "expected `user:password`, found {} colon-separated parts",
                parts.len()
            ),
        )),
    }
}
