//! Typed render options shared by both renderer families.
//!
//! Every field is optional so that request-level options can be layered over
//! the configured defaults field by field. The `extra` list is the one
//! untyped escape hatch: its tokens reach the legacy binary verbatim.

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Deserializer, Serialize, de};

/// A number that remembers whether it was written as an integer.
///
/// The legacy binary parses some flags as integers (`--javascript-delay 500`)
/// and others as reals (`--margin-top 1.0`), so the textual form matters.
/// Numeric strings are accepted as well, since environment overrides arrive
/// as text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    pub fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(value) => value as f64,
            Numeric::Float(value) => value,
        }
    }
}

impl std::str::FromStr for Numeric {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if let Ok(value) = raw.parse::<i64>() {
            return Ok(Numeric::Int(value));
        }
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Numeric::Float(value)),
            _ => Err(format!("`{raw}` is not a number")),
        }
    }
}

impl<'de> Deserialize<'de> for Numeric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NumericVisitor;

        impl de::Visitor<'_> for NumericVisitor {
            type Value = Numeric;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number or a numeric string")
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Numeric, E> {
                Ok(Numeric::Int(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Numeric, E> {
                i64::try_from(value)
                    .map(Numeric::Int)
                    .map_err(|_| E::custom(format!("{value} is out of range")))
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<Numeric, E> {
                Ok(Numeric::Float(value))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Numeric, E> {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(NumericVisitor)
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Numeric::Int(value) => write!(f, "{value}"),
            Numeric::Float(value) if value.is_finite() && value.fract() == 0.0 => {
                write!(f, "{value:.1}")
            }
            Numeric::Float(value) => write!(f, "{value}"),
        }
    }
}

impl From<i64> for Numeric {
    fn from(value: i64) -> Self {
        Numeric::Int(value)
    }
}

impl From<i32> for Numeric {
    fn from(value: i32) -> Self {
        Numeric::Int(value.into())
    }
}

impl From<f64> for Numeric {
    fn from(value: f64) -> Self {
        Numeric::Float(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Margins {
    pub top: Option<Numeric>,
    pub bottom: Option<Numeric>,
    pub left: Option<Numeric>,
    pub right: Option<Numeric>,
}

/// Running header or footer block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderFooter {
    pub center: Option<String>,
    pub font_name: Option<String>,
    pub left: Option<String>,
    pub right: Option<String>,
    pub font_size: Option<Numeric>,
    pub spacing: Option<Numeric>,
    pub line: Option<bool>,
    /// Inline HTML. Staged to a temp file for the legacy binary and used as
    /// the print template for Chrome.
    pub content: Option<String>,
    /// Pre-existing HTML location, used when no inline content is given.
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Outline {
    pub outline: Option<bool>,
    pub outline_depth: Option<Numeric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cover {
    /// Remote page handed to the binary as-is.
    Url(String),
    /// Local file handed to the binary as-is.
    Path(PathBuf),
    /// Inline HTML staged to a temp file.
    Html(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toc {
    pub font_name: Option<String>,
    pub header_text: Option<String>,
    pub xsl_style_sheet: Option<String>,
    pub depth: Option<Numeric>,
    pub header_fs: Option<Numeric>,
    pub text_size_shrink: Option<Numeric>,
    /// `--toc-l1-font-size` through `--toc-l7-font-size`.
    pub font_size_by_level: [Option<Numeric>; 7],
    pub level_indentation: Option<Numeric>,
    /// `--toc-l1-indentation` through `--toc-l7-indentation`.
    pub indentation_by_level: [Option<Numeric>; 7],
    pub no_dots: Option<bool>,
    pub disable_links: Option<bool>,
    pub disable_back_links: Option<bool>,
    pub disable_dotted_lines: Option<bool>,
    pub disable_toc_links: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Raw arguments placed first on the legacy command line, unvalidated.
    pub extra: Vec<String>,

    pub proxy: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub encoding: Option<String>,
    pub user_style_sheet: Option<String>,
    pub viewport_size: Option<String>,
    pub window_status: Option<String>,
    pub allow: Vec<String>,
    pub cookie: Vec<String>,
    pub post: Vec<String>,
    pub redirect_delay: Option<Numeric>,
    pub zoom: Option<Numeric>,
    pub page_offset: Option<Numeric>,
    pub javascript_delay: Option<Numeric>,
    pub book: Option<bool>,
    pub default_header: Option<bool>,
    pub disable_javascript: Option<bool>,
    pub enable_plugins: Option<bool>,
    pub disable_internal_links: Option<bool>,
    pub disable_external_links: Option<bool>,
    pub keep_relative_links: Option<bool>,
    pub no_background: Option<bool>,
    pub no_images: Option<bool>,
    pub print_media_type: Option<bool>,
    pub disable_local_file_access: Option<bool>,
    pub enable_local_file_access: Option<bool>,
    pub disable_smart_shrinking: Option<bool>,
    pub use_xserver: Option<bool>,
    pub no_stop_slow_scripts: Option<bool>,

    pub orientation: Option<String>,
    pub dpi: Option<Numeric>,
    pub page_size: Option<String>,
    pub page_width: Option<String>,
    pub page_height: Option<String>,
    pub title: Option<String>,
    pub log_level: Option<String>,
    pub lowquality: Option<bool>,
    pub grayscale: Option<bool>,
    pub no_pdf_compression: Option<bool>,
    pub quiet: Option<bool>,
    pub image_dpi: Option<Numeric>,
    pub image_quality: Option<Numeric>,
    pub margin: Margins,

    pub outline: Option<Outline>,
    pub header: Option<HeaderFooter>,
    pub footer: Option<HeaderFooter>,
    pub cover: Option<Cover>,
    pub toc: Option<Toc>,
    /// Base64 of `user:password`.
    pub basic_auth: Option<String>,

    pub print_background: Option<bool>,
    pub landscape: Option<bool>,
    /// Inches.
    pub paper_width: Option<Numeric>,
    /// Inches.
    pub paper_height: Option<Numeric>,
    pub scale: Option<Numeric>,
    pub display_header_footer: Option<bool>,
    pub page_ranges: Option<String>,
    /// Name of an in-page function called with the page count before the
    /// final print.
    pub page_number_callback: Option<String>,

    /// Directory for staged HTML fragments; the system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
}

trait Overlay {
    fn overlay(self, base: &Self) -> Self;
}

impl<T: Clone> Overlay for Option<T> {
    fn overlay(self, base: &Self) -> Self {
        self.or_else(|| base.clone())
    }
}

impl<T: Clone> Overlay for Vec<T> {
    fn overlay(self, base: &Self) -> Self {
        if self.is_empty() { base.clone() } else { self }
    }
}

impl Overlay for Margins {
    fn overlay(self, base: &Self) -> Self {
        Margins {
            top: self.top.overlay(&base.top),
            bottom: self.bottom.overlay(&base.bottom),
            left: self.left.overlay(&base.left),
            right: self.right.overlay(&base.right),
        }
    }
}

impl RenderOptions {
    /// Layer these options over `defaults`: every field set here wins, unset
    /// fields fall back to the default. Nested blocks are taken whole.
    pub fn merged_over(self, defaults: &RenderOptions) -> RenderOptions {
        let RenderOptions {
            extra,
            proxy,
            username,
            password,
            encoding,
            user_style_sheet,
            viewport_size,
            window_status,
            allow,
            cookie,
            post,
            redirect_delay,
            zoom,
            page_offset,
            javascript_delay,
            book,
            default_header,
            disable_javascript,
            enable_plugins,
            disable_internal_links,
            disable_external_links,
            keep_relative_links,
            no_background,
            no_images,
            print_media_type,
            disable_local_file_access,
            enable_local_file_access,
            disable_smart_shrinking,
            use_xserver,
            no_stop_slow_scripts,
            orientation,
            dpi,
            page_size,
            page_width,
            page_height,
            title,
            log_level,
            lowquality,
            grayscale,
            no_pdf_compression,
            quiet,
            image_dpi,
            image_quality,
            margin,
            outline,
            header,
            footer,
            cover,
            toc,
            basic_auth,
            print_background,
            landscape,
            paper_width,
            paper_height,
            scale,
            display_header_footer,
            page_ranges,
            page_number_callback,
            temp_dir,
        } = self;
        let d = defaults;

        RenderOptions {
            extra: extra.overlay(&d.extra),
            proxy: proxy.overlay(&d.proxy),
            username: username.overlay(&d.username),
            password: password.overlay(&d.password),
            encoding: encoding.overlay(&d.encoding),
            user_style_sheet: user_style_sheet.overlay(&d.user_style_sheet),
            viewport_size: viewport_size.overlay(&d.viewport_size),
            window_status: window_status.overlay(&d.window_status),
            allow: allow.overlay(&d.allow),
            cookie: cookie.overlay(&d.cookie),
            post: post.overlay(&d.post),
            redirect_delay: redirect_delay.overlay(&d.redirect_delay),
            zoom: zoom.overlay(&d.zoom),
            page_offset: page_offset.overlay(&d.page_offset),
            javascript_delay: javascript_delay.overlay(&d.javascript_delay),
            book: book.overlay(&d.book),
            default_header: default_header.overlay(&d.default_header),
            disable_javascript: disable_javascript.overlay(&d.disable_javascript),
            enable_plugins: enable_plugins.overlay(&d.enable_plugins),
            disable_internal_links: disable_internal_links.overlay(&d.disable_internal_links),
            disable_external_links: disable_external_links.overlay(&d.disable_external_links),
            keep_relative_links: keep_relative_links.overlay(&d.keep_relative_links),
            no_background: no_background.overlay(&d.no_background),
            no_images: no_images.overlay(&d.no_images),
            print_media_type: print_media_type.overlay(&d.print_media_type),
            disable_local_file_access: disable_local_file_access
                .overlay(&d.disable_local_file_access),
            enable_local_file_access: enable_local_file_access.overlay(&d.enable_local_file_access),
            disable_smart_shrinking: disable_smart_shrinking.overlay(&d.disable_smart_shrinking),
            use_xserver: use_xserver.overlay(&d.use_xserver),
            no_stop_slow_scripts: no_stop_slow_scripts.overlay(&d.no_stop_slow_scripts),
            orientation: orientation.overlay(&d.orientation),
            dpi: dpi.overlay(&d.dpi),
            page_size: page_size.overlay(&d.page_size),
            page_width: page_width.overlay(&d.page_width),
            page_height: page_height.overlay(&d.page_height),
            title: title.overlay(&d.title),
            log_level: log_level.overlay(&d.log_level),
            lowquality: lowquality.overlay(&d.lowquality),
            grayscale: grayscale.overlay(&d.grayscale),
            no_pdf_compression: no_pdf_compression.overlay(&d.no_pdf_compression),
            quiet: quiet.overlay(&d.quiet),
            image_dpi: image_dpi.overlay(&d.image_dpi),
            image_quality: image_quality.overlay(&d.image_quality),
            margin: margin.overlay(&d.margin),
            outline: outline.overlay(&d.outline),
            header: header.overlay(&d.header),
            footer: footer.overlay(&d.footer),
            cover: cover.overlay(&d.cover),
            toc: toc.overlay(&d.toc),
            basic_auth: basic_auth.overlay(&d.basic_auth),
            print_background: print_background.overlay(&d.print_background),
            landscape: landscape.overlay(&d.landscape),
            paper_width: paper_width.overlay(&d.paper_width),
            paper_height: paper_height.overlay(&d.paper_height),
            scale: scale.overlay(&d.scale),
            display_header_footer: display_header_footer.overlay(&d.display_header_footer),
            page_ranges: page_ranges.overlay(&d.page_ranges),
            page_number_callback: page_number_callback.overlay(&d.page_number_callback),
            temp_dir: temp_dir.overlay(&d.temp_dir),
        }
    }

    /// Landscape either via the Chrome-style flag or the legacy orientation.
    pub fn is_landscape(&self) -> bool {
        match self.landscape {
            Some(flag) => flag,
            None => self
                .orientation
                .as_deref()
                .is_some_and(|value| value.eq_ignore_ascii_case("landscape")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_values_win_over_defaults() {
        let defaults = RenderOptions {
            title: Some("Default".to_string()),
            grayscale: Some(true),
            margin: Margins {
                top: Some(Numeric::Float(0.5)),
                left: Some(Numeric::Float(0.25)),
                ..Margins::default()
            },
            ..RenderOptions::default()
        };
        let request = RenderOptions {
            title: Some("Request".to_string()),
            margin: Margins {
                top: Some(Numeric::Float(1.0)),
                ..Margins::default()
            },
            ..RenderOptions::default()
        };

        let merged = request.merged_over(&defaults);
        assert_eq!(merged.title.as_deref(), Some("Request"));
        assert_eq!(merged.grayscale, Some(true));
        assert_eq!(merged.margin.top, Some(Numeric::Float(1.0)));
        assert_eq!(merged.margin.left, Some(Numeric::Float(0.25)));
    }

    #[test]
    fn explicit_false_is_not_overridden_by_default_true() {
        let defaults = RenderOptions {
            print_background: Some(true),
            ..RenderOptions::default()
        };
        let request = RenderOptions {
            print_background: Some(false),
            ..RenderOptions::default()
        };
        assert_eq!(
            request.merged_over(&defaults).print_background,
            Some(false)
        );
    }

    #[test]
    fn numeric_keeps_integer_and_real_forms() {
        assert_eq!(Numeric::Int(500).to_string(), "500");
        assert_eq!(Numeric::Float(1.0).to_string(), "1.0");
        assert_eq!(Numeric::Float(0.75).to_string(), "0.75");
    }

    #[test]
    fn numeric_deserializes_from_json_numbers() {
        let ints: Numeric = serde_json::from_str("3").expect("int");
        let reals: Numeric = serde_json::from_str("2.5").expect("float");
        assert_eq!(ints, Numeric::Int(3));
        assert_eq!(reals, Numeric::Float(2.5));
    }

    #[test]
    fn numeric_accepts_numeric_strings() {
        let ints: Numeric = serde_json::from_str("\"500\"").expect("int text");
        let reals: Numeric = serde_json::from_str("\" 1.5 \"").expect("float text");
        assert_eq!(ints, Numeric::Int(500));
        assert_eq!(reals, Numeric::Float(1.5));
        assert!(serde_json::from_str::<Numeric>("\"wide\"").is_err());
        assert!(serde_json::from_str::<Numeric>("\"NaN\"").is_err());
    }

    #[test]
    fn orientation_string_implies_landscape() {
        let options = RenderOptions {
            orientation: Some("Landscape".to_string()),
            ..RenderOptions::default()
        };
        assert!(options.is_landscape());

        let overridden = RenderOptions {
            landscape: Some(false),
            ..options
        };
        assert!(!overridden.is_landscape());
    }
}
