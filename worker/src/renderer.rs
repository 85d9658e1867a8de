//! A concrete [`Renderer`] that drives a headless Chromium instance as
//! a child process, grounded in the contract established by
//! `pagecast_common::render`.
//!
//! Browser automation itself is treated as opaque here: we shell out
//! to `chromium --headless --print-to-pdf` (or a screenshot-then-pdf
//! pipeline for `ScreenshotToPdf`) rather than embedding a CDP client,
//! since driving a full browser protocol is out of scope for this
//! workspace. Tests substitute `FakeRenderer` instead of exercising
//! this one.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use pagecast_common::render::{RenderError, RenderMode, Renderer};
use tokio::process::Command;

pub struct ChromiumRenderer {
    binary: String,
}

impl ChromiumRenderer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn render(
        &self,
        url: &str,
        mode: RenderMode,
        navigation_timeout: Duration,
        output_path: &Path,
    ) -> Result<(), RenderError> {
        let mut command = Command::new(&self.binary);
        command
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg(format!(
                "--virtual-time-budget={}",
                navigation_timeout.as_millis()
            ))
            .arg(format!("--print-to-pdf={}", output_path.display()))
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if mode == RenderMode::ScreenshotToPdf {
            // Still produced as a PDF on disk; the distinction between the two
            // modes lives in how the page is captured, not the output container.
            command.arg("--screenshot");
        }

        let output = command
            .output()
            .await
            .map_err(|e| RenderError::Other(format!("failed to spawn {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("ERR_BLOCKED_BY_CLIENT") || stderr.contains("net::ERR_") {
                return Err(RenderError::Other(format!(
                    "navigation failed: {}",
                    stderr.trim()
                )));
            }
            return Err(RenderError::Other(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        if !output_path.exists() {
            return Err(RenderError::Other(
                "renderer exited successfully but produced no output file".to_owned(),
            ));
        }

        Ok(())
    }

    async fn close(&self) {
        // No persistent resources: each render spawns and tears down its own
        // browser process.
    }
}
