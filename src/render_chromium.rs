//! Headless Chromium renderer.
//!
//! Drives a single browser tab through the Chrome DevTools Protocol
//! (`chromiumoxide`). Page scripts run as they do in production, so the
//! readiness predicate and every global the snapshot reads are the live
//! values the site computes on load.
//!
//! Compiled with the `chromium` feature (on by default). The browser binary
//! is located by `chromiumoxide` (honours the `CHROME` environment variable).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::RenderConfig;
use crate::render::{snapshot_script, wait_until_ready, Readiness, Snapshot, SnapshotRequest};
use crate::traits::PageRenderer;

/// One browser, one tab. Every navigation reuses the same tab.
pub struct ChromiumRenderer {
    browser: Browser,
    page: Page,
    handler: Option<JoinHandle<()>>,
    base_url: String,
}

impl ChromiumRenderer {
    pub async fn launch(base_url: impl Into<String>, render: &RenderConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder();
        if !render.sandbox {
            builder = builder.no_sandbox();
        }
        let browser_config = builder
            .build()
            .map_err(|e| anyhow!("Invalid browser configuration: {}", e))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch headless Chromium")?;

        // The CDP connection only makes progress while its handler is polled
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler event error");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open browser tab")?;

        Ok(Self {
            browser,
            page,
            handler: Some(handle),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

/// Wrap a page predicate so that a throwing expression reads as "not ready
/// yet" rather than as an evaluation failure.
fn ready_script(predicate: &str) -> String {
    format!(
        "(() => {{ try {{ return Boolean({}); }} catch (e) {{ return false; }} }})()",
        predicate
    )
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    fn name(&self) -> &str {
        "chromium"
    }

    async fn render(&mut self, path: &str, request: &SnapshotRequest) -> Result<Snapshot> {
        let url = format!("{}{}", self.base_url, path);
        self.page
            .goto(url.clone())
            .await
            .with_context(|| format!("Failed to load {}", url))?;

        let readiness = match &request.ready {
            None => Readiness::Ready,
            Some(predicate) => {
                let page = &self.page;
                let script = ready_script(predicate);
                wait_until_ready(request.ready_timeout, request.poll_interval, || {
                    let script = script.clone();
                    async move {
                        let result = page.evaluate(script).await?;
                        Ok(result.into_value::<bool>()?)
                    }
                })
                .await
            }
        };

        let value: Value = self
            .page
            .evaluate(snapshot_script(request))
            .await
            .with_context(|| format!("Failed to read exposed values from {}", path))?
            .into_value()
            .with_context(|| format!("Exposed values from {} are not JSON", path))?;

        Ok(Snapshot::from_script_value(path, readiness, value))
    }

    async fn close(&mut self) -> Result<()> {
        let closed = self.browser.close().await;
        let _ = self.browser.wait().await;
        if let Some(mut handle) = self.handler.take() {
            if tokio::time::timeout(Duration::from_secs(5), &mut handle).await.is_err() {
                warn!("browser handler did not stop, aborting");
                handle.abort();
            }
        }
        closed.context("Failed to close browser")?;
        Ok(())
    }
}
