use std::{fmt, str::FromStr};

/// Renderer family a request is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Chrome,
    Wkhtmltopdf,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Chrome => "chrome",
            Backend::Wkhtmltopdf => "wkhtmltopdf",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" | "chromium" => Ok(Backend::Chrome),
            "wkhtmltopdf" | "legacy" => Ok(Backend::Wkhtmltopdf),
            other => Err(format!(
                "unknown backend `{other}` (expected chrome|wkhtmltopdf)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("Chrome".parse::<Backend>(), Ok(Backend::Chrome));
        assert_eq!(" wkhtmltopdf ".parse::<Backend>(), Ok(Backend::Wkhtmltopdf));
        assert_eq!("chromium".parse::<Backend>(), Ok(Backend::Chrome));
        assert!("prince".parse::<Backend>().is_err());
    }
}
