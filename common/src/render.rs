//! The render collaborator contract.
//!
//! The actual browser automation is out of scope for this crate; what
//! lives here is the interface the worker depends on, so tests can
//! substitute a deterministic fake instead of driving a real headless
//! browser.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::Visitor, Deserialize, Serialize};

/// How a page should be turned into a PDF.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RenderMode {
    PrintToPdf,
    ScreenshotToPdf,
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "print_to_pdf" => Ok(RenderMode::PrintToPdf),
            "screenshot_to_pdf" => Ok(RenderMode::ScreenshotToPdf),
            invalid => Err(format!("{invalid} is not a valid render_mode")),
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RenderMode::PrintToPdf => write!(f, "print_to_pdf"),
            RenderMode::ScreenshotToPdf => write!(f, "screenshot_to_pdf"),
        }
    }
}

struct RenderModeVisitor;

impl<'de> Visitor<'de> for RenderModeVisitor {
    type Value = RenderMode;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "one of: print_to_pdf, screenshot_to_pdf")
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        RenderMode::from_str(s).map_err(|_| serde::de::Error::invalid_value(serde::de::Unexpected::Str(s), &self))
    }
}

impl<'de> Deserialize<'de> for RenderMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(RenderModeVisitor)
    }
}

impl Serialize for RenderMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A classified render failure. The worker maps each variant to an
/// `error_code` string and decides retryability from it.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render target blocked by SSRF protection: {0}")]
    SsrfBlocked(String),
    #[error("render target returned a 4xx response: {0}")]
    Http4xx(String),
    #[error("anti-bot challenge detected on render target")]
    CaptchaDetected,
    #[error("render failed: {0}")]
    Other(String),
}

/// The render collaborator: given a URL and a mode, produce a PDF at
/// `output_path`, honoring a cooperative cancellation token so the
/// worker can enforce its outer job deadline.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        url: &str,
        mode: RenderMode,
        navigation_timeout: Duration,
        output_path: &std::path::Path,
    ) -> Result<(), RenderError>;

    /// Release any held browser resources (called on worker shutdown).
    async fn close(&self);
}
