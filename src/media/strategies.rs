//! The built-in acquisition strategies, highest fidelity first.

use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;

use super::{MediaFailure, MediaHost, MediaStrategy, QualityHint, StrategyChain};
use crate::config::Config;
use crate::models::MediaRef;

/// Build the canonical chain, minus any strategies disabled in config.
pub fn default_chain(config: &Config, host: Arc<dyn MediaHost>) -> anyhow::Result<StrategyChain> {
    let candidates: Vec<Box<dyn MediaStrategy>> = vec![
        Box::new(DataChannel::new(host.clone())),
        Box::new(RenderedRaster::new(host.clone())),
        Box::new(NetworkFetch::new(
            &config.media.user_agent,
            std::env::var(&config.media.credentials_env).ok(),
        )?),
        Box::new(ReRender::new(host.clone())),
        Box::new(FullView::new(
            host.clone(),
            Duration::from_millis(config.media.full_view_settle_ms),
        )),
        Box::new(ElementSnapshot::new(host)),
    ];

    let mut chain = StrategyChain::new(config.export.media_acquire_timeout());
    for strategy in candidates {
        if config.media.is_enabled(strategy.name()) {
            chain.push(strategy);
        }
    }
    Ok(chain)
}

fn require_locator(media: &MediaRef) -> Result<&str, MediaFailure> {
    media
        .locator
        .as_deref()
        .ok_or_else(|| MediaFailure::unavailable("attachment has no resource locator"))
}

// ─── data-channel ───────────────────────────────────────────────────

pub struct DataChannel {
    host: Arc<dyn MediaHost>,
}

impl DataChannel {
    pub fn new(host: Arc<dyn MediaHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl MediaStrategy for DataChannel {
    fn name(&self) -> &'static str {
        "data-channel"
    }

    async fn attempt(&self, media: &MediaRef, _hint: QualityHint) -> Result<Vec<u8>, MediaFailure> {
        self.host.read_privileged(media).await
    }
}

// ─── rendered-raster ────────────────────────────────────────────────

pub struct RenderedRaster {
    host: Arc<dyn MediaHost>,
}

impl RenderedRaster {
    pub fn new(host: Arc<dyn MediaHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl MediaStrategy for RenderedRaster {
    fn name(&self) -> &'static str {
        "rendered-raster"
    }

    fn produces_raster(&self) -> bool {
        true
    }

    async fn attempt(&self, media: &MediaRef, hint: QualityHint) -> Result<Vec<u8>, MediaFailure> {
        self.host
            .snapshot_rendered(media, hint.raster_options())
            .await
    }
}

// ─── network-fetch ──────────────────────────────────────────────────

/// Fetches the attachment's locator directly.
///
/// `http(s)://` goes through reqwest with the configured cookie header;
/// `file://` and base64 `data:` locators are read locally.
pub struct NetworkFetch {
    client: reqwest::Client,
    cookie: Option<String>,
}

impl NetworkFetch {
    pub fn new(user_agent: &str, cookie: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client, cookie })
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, MediaFailure> {
        let mut request = self.client.get(url);
        if let Some(ref cookie) = self.cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request.send().await.map_err(classify_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                404 | 410 => MediaFailure::not_found(format!("HTTP {}", status)),
                401 | 403 => MediaFailure::access_denied(format!("HTTP {}", status)),
                408 | 504 => MediaFailure::timed_out(format!("HTTP {}", status)),
                _ => MediaFailure::transport(format!("HTTP {}", status)),
            });
        }

        let bytes = response.bytes().await.map_err(classify_reqwest)?;
        Ok(bytes.to_vec())
    }
}

fn classify_reqwest(err: reqwest::Error) -> MediaFailure {
    if err.is_timeout() {
        MediaFailure::timed_out(err.to_string())
    } else {
        MediaFailure::transport(err.to_string())
    }
}

fn decode_data_url(rest: &str) -> Result<Vec<u8>, MediaFailure> {
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| MediaFailure::decode("malformed data URL"))?;
    if !meta.ends_with(";base64") {
        return Err(MediaFailure::decode("only base64 data URLs carry images"));
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| MediaFailure::decode(e.to_string()))
}

#[async_trait]
impl MediaStrategy for NetworkFetch {
    fn name(&self) -> &'static str {
        "network-fetch"
    }

    async fn attempt(&self, media: &MediaRef, _hint: QualityHint) -> Result<Vec<u8>, MediaFailure> {
        let locator = require_locator(media)?;

        if let Some(rest) = locator.strip_prefix("data:") {
            decode_data_url(rest)
        } else if let Some(path) = locator.strip_prefix("file://") {
            tokio::fs::read(path)
                .await
                .map_err(|e| MediaFailure::from_io(&e))
        } else if locator.starts_with("http://") || locator.starts_with("https://") {
            self.fetch_http(locator).await
        } else {
            Err(MediaFailure::unavailable(format!(
                "unsupported locator scheme: {}",
                locator
            )))
        }
    }
}

// ─── re-render ──────────────────────────────────────────────────────

pub struct ReRender {
    host: Arc<dyn MediaHost>,
}

impl ReRender {
    pub fn new(host: Arc<dyn MediaHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl MediaStrategy for ReRender {
    fn name(&self) -> &'static str {
        "re-render"
    }

    fn produces_raster(&self) -> bool {
        true
    }

    async fn attempt(&self, media: &MediaRef, hint: QualityHint) -> Result<Vec<u8>, MediaFailure> {
        let locator = require_locator(media)?;
        self.host
            .render_locator(locator, hint.raster_options())
            .await
    }
}

// ─── full-view ──────────────────────────────────────────────────────

/// Opens the media's full-view presentation and snapshots it.
///
/// The presentation is closed by a drop guard, so the prior UI state is
/// restored on success, on failure, and when the chain's timeout drops
/// this future mid-flight.
pub struct FullView {
    host: Arc<dyn MediaHost>,
    settle: Duration,
}

impl FullView {
    pub fn new(host: Arc<dyn MediaHost>, settle: Duration) -> Self {
        Self { host, settle }
    }
}

struct CloseOnDrop<'a> {
    host: &'a dyn MediaHost,
}

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        self.host.close_full_view();
    }
}

#[async_trait]
impl MediaStrategy for FullView {
    fn name(&self) -> &'static str {
        "full-view"
    }

    fn produces_raster(&self) -> bool {
        true
    }

    async fn attempt(&self, media: &MediaRef, hint: QualityHint) -> Result<Vec<u8>, MediaFailure> {
        let _restore = CloseOnDrop {
            host: self.host.as_ref(),
        };
        self.host.open_full_view(media)?;

        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        self.host.snapshot_full_view(hint.raster_options()).await
    }
}

// ─── element-snapshot ───────────────────────────────────────────────

/// Last resort: captures whatever is visually present, placeholders included.
pub struct ElementSnapshot {
    host: Arc<dyn MediaHost>,
}

impl ElementSnapshot {
    pub fn new(host: Arc<dyn MediaHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl MediaStrategy for ElementSnapshot {
    fn name(&self) -> &'static str {
        "element-snapshot"
    }

    fn produces_raster(&self) -> bool {
        true
    }

    async fn attempt(&self, media: &MediaRef, hint: QualityHint) -> Result<Vec<u8>, MediaFailure> {
        self.host
            .snapshot_element(media, hint.raster_options())
            .await
    }
}
