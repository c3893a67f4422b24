//! Media acquisition chain.
//!
//! Acquiring pixel data for an embedded attachment has no single reliable
//! method, so acquisition runs an ordered list of [`MediaStrategy`]s until
//! one returns bytes:
//!
//! | Rank | Strategy | Source of pixels |
//! |------|----------|------------------|
//! | 0 | `data-channel` | Privileged same-process data channel |
//! | 1 | `rendered-raster` | Already-rendered raster element, snapshotted in place |
//! | 2 | `network-fetch` | Credentialed fetch of the locator |
//! | 3 | `re-render` | Fresh element pointed at the locator, snapshotted |
//! | 4 | `full-view` | Full-view presentation (side-effecting), snapshotted |
//! | 5 | `element-snapshot` | Visual snapshot of the bounding element |
//!
//! Every attempt runs under its own timeout. Failures are classified and
//! logged but never raised; the caller only sees the terminal
//! [`Acquisition`].

pub mod host;
pub mod strategies;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::models::MediaRef;
use crate::session::CancelHandle;

pub use host::{MediaHost, NoHost};

/// All strategy names in canonical priority order.
pub const STRATEGY_NAMES: [&str; 6] = [
    "data-channel",
    "rendered-raster",
    "network-fetch",
    "re-render",
    "full-view",
    "element-snapshot",
];

/// Requested fidelity of acquired media.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityHint {
    #[default]
    Full,
    Reduced,
}

impl QualityHint {
    /// Snapshot scale and output compression for raster-producing strategies.
    pub fn raster_options(self) -> RasterOptions {
        match self {
            QualityHint::Full => RasterOptions {
                scale: 2.0,
                jpeg_quality: 0.92,
            },
            QualityHint::Reduced => RasterOptions {
                scale: 1.0,
                jpeg_quality: 0.7,
            },
        }
    }
}

impl std::str::FromStr for QualityHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(QualityHint::Full),
            "reduced" => Ok(QualityHint::Reduced),
            other => Err(format!(
                "unknown quality '{}': expected full or reduced",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterOptions {
    pub scale: f32,
    pub jpeg_quality: f32,
}

/// Image container recognised from its leading signature bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
}

impl ImageFormat {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(ImageFormat::Png),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(ImageFormat::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => {
                Some(ImageFormat::Webp)
            }
            [b'B', b'M', ..] => Some(ImageFormat::Bmp),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Bmp => "image/bmp",
        }
    }
}

/// Classification of a single strategy failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    AccessDenied,
    TimedOut,
    Decode,
    /// The environment does not expose what this strategy needs.
    Unavailable,
    Transport,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::NotFound => "not found",
            FailureKind::AccessDenied => "access denied",
            FailureKind::TimedOut => "timed out",
            FailureKind::Decode => "decode error",
            FailureKind::Unavailable => "unavailable",
            FailureKind::Transport => "transport error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl MediaFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, detail)
    }

    pub fn access_denied(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::AccessDenied, detail)
    }

    pub fn timed_out(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::TimedOut, detail)
    }

    pub fn decode(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Decode, detail)
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Unavailable, detail)
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, detail)
    }

    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::access_denied(err.to_string()),
            std::io::ErrorKind::TimedOut => Self::timed_out(err.to_string()),
            _ => Self::transport(err.to_string()),
        }
    }
}

impl std::fmt::Display for MediaFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// One way of turning a [`MediaRef`] into image bytes.
///
/// Implementations keep any side effects local: a strategy that changes UI
/// state restores it before returning, whatever the outcome.
#[async_trait]
pub trait MediaStrategy: Send + Sync {
    /// Stable name, one of [`STRATEGY_NAMES`].
    fn name(&self) -> &'static str;

    /// Whether this strategy rasterizes, and therefore honours [`RasterOptions`].
    fn produces_raster(&self) -> bool {
        false
    }

    async fn attempt(&self, media: &MediaRef, hint: QualityHint) -> Result<Vec<u8>, MediaFailure>;
}

#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub strategy: &'static str,
    pub failure: MediaFailure,
}

/// Terminal outcome of running the chain for one attachment.
#[derive(Debug)]
pub enum Acquisition {
    Acquired {
        bytes: Vec<u8>,
        format: ImageFormat,
        strategy: &'static str,
        /// Position of the succeeding strategy in the chain (0 = highest priority).
        rank: usize,
    },
    Failed {
        reason: FailureKind,
        fallback_locator: Option<String>,
        attempts: Vec<AttemptFailure>,
    },
    /// Cancellation was observed before an attempt started.
    Cancelled,
}

/// Ordered strategy runner.
pub struct StrategyChain {
    strategies: Vec<Box<dyn MediaStrategy>>,
    timeout: Duration,
}

impl StrategyChain {
    pub fn new(timeout: Duration) -> Self {
        Self {
            strategies: Vec::new(),
            timeout,
        }
    }

    /// Append a strategy at the lowest priority so far.
    pub fn push(&mut self, strategy: Box<dyn MediaStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn with(mut self, strategy: Box<dyn MediaStrategy>) -> Self {
        self.push(strategy);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Strategies that rasterize and so receive the quality hint's [`RasterOptions`].
    pub fn raster_names(&self) -> Vec<&'static str> {
        self.strategies
            .iter()
            .filter(|s| s.produces_raster())
            .map(|s| s.name())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Try each strategy in order and stop at the first that yields a
    /// recognisable image.
    pub async fn acquire(
        &self,
        media: &MediaRef,
        hint: QualityHint,
        cancel: &CancelHandle,
    ) -> Acquisition {
        let mut attempts = Vec::new();

        for (rank, strategy) in self.strategies.iter().enumerate() {
            if cancel.is_cancelled() {
                return Acquisition::Cancelled;
            }

            if strategy.produces_raster() {
                let opts = hint.raster_options();
                debug!(
                    handle = %media.handle,
                    strategy = strategy.name(),
                    scale = opts.scale,
                    jpeg_quality = opts.jpeg_quality,
                    "raster attempt"
                );
            }

            let started = Instant::now();
            let result = match tokio::time::timeout(self.timeout, strategy.attempt(media, hint))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(MediaFailure::timed_out(format!(
                    "no result within {} ms",
                    self.timeout.as_millis()
                ))),
            };

            match result.and_then(decode) {
                Ok((bytes, format)) => {
                    debug!(
                        handle = %media.handle,
                        strategy = strategy.name(),
                        rank,
                        bytes = bytes.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "media acquired"
                    );
                    return Acquisition::Acquired {
                        bytes,
                        format,
                        strategy: strategy.name(),
                        rank,
                    };
                }
                Err(failure) => {
                    debug!(
                        handle = %media.handle,
                        strategy = strategy.name(),
                        kind = %failure.kind,
                        detail = %failure.detail,
                        "media strategy failed"
                    );
                    attempts.push(AttemptFailure {
                        strategy: strategy.name(),
                        failure,
                    });
                }
            }
        }

        let reason = terminal_reason(&attempts);
        warn!(
            handle = %media.handle,
            attempts = attempts.len(),
            reason = %reason,
            "all media strategies failed"
        );
        Acquisition::Failed {
            reason,
            fallback_locator: media.locator.clone(),
            attempts,
        }
    }
}

fn decode(bytes: Vec<u8>) -> Result<(Vec<u8>, ImageFormat), MediaFailure> {
    if bytes.is_empty() {
        return Err(MediaFailure::decode("empty payload"));
    }
    match ImageFormat::sniff(&bytes) {
        Some(format) => Ok((bytes, format)),
        None => Err(MediaFailure::decode("unrecognised image signature")),
    }
}

/// The most informative failure: the last one that was not a missing capability.
fn terminal_reason(attempts: &[AttemptFailure]) -> FailureKind {
    attempts
        .iter()
        .rev()
        .map(|a| a.failure.kind)
        .find(|k| *k != FailureKind::Unavailable)
        .unwrap_or(FailureKind::Unavailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00];

    struct Fixed {
        name: &'static str,
        result: Result<Vec<u8>, MediaFailure>,
        calls: Arc<AtomicUsize>,
        delay: Option<Duration>,
    }

    impl Fixed {
        fn ok(name: &'static str, bytes: &[u8], calls: &Arc<AtomicUsize>) -> Box<Self> {
            Box::new(Self {
                name,
                result: Ok(bytes.to_vec()),
                calls: calls.clone(),
                delay: None,
            })
        }

        fn err(name: &'static str, failure: MediaFailure, calls: &Arc<AtomicUsize>) -> Box<Self> {
            Box::new(Self {
                name,
                result: Err(failure),
                calls: calls.clone(),
                delay: None,
            })
        }
    }

    #[async_trait]
    impl MediaStrategy for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn attempt(&self, _media: &MediaRef, _hint: QualityHint) -> Result<Vec<u8>, MediaFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone()
        }
    }

    fn media() -> MediaRef {
        MediaRef {
            handle: "m1".to_string(),
            locator: Some("https://cdn.example/m1.jpg".to_string()),
        }
    }

    #[test]
    fn sniffs_common_formats() {
        assert_eq!(ImageFormat::sniff(JPEG), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(PNG), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(b"GIF89a...."), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::sniff(b"<html>"), None);
        assert_eq!(ImageFormat::sniff(&[]), None);
    }

    #[test]
    fn quality_maps_to_raster_options() {
        let full = QualityHint::Full.raster_options();
        let reduced = QualityHint::Reduced.raster_options();
        assert!(full.scale > reduced.scale);
        assert!(full.jpeg_quality > reduced.jpeg_quality);
        assert_eq!("reduced".parse::<QualityHint>(), Ok(QualityHint::Reduced));
        assert!("medium".parse::<QualityHint>().is_err());
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));
        let chain = StrategyChain::new(Duration::from_secs(1))
            .with(Fixed::err("data-channel", MediaFailure::unavailable("none"), &first))
            .with(Fixed::ok("rendered-raster", PNG, &second))
            .with(Fixed::ok("network-fetch", JPEG, &third));

        match chain.acquire(&media(), QualityHint::Full, &CancelHandle::new()).await {
            Acquisition::Acquired {
                strategy,
                rank,
                format,
                ..
            } => {
                assert_eq!(strategy, "rendered-raster");
                assert_eq!(rank, 1);
                assert_eq!(format, ImageFormat::Png);
            }
            other => panic!("expected acquisition, got {:?}", other),
        }
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn undecodable_bytes_fall_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = StrategyChain::new(Duration::from_secs(1))
            .with(Fixed::ok("network-fetch", b"<html>login</html>", &calls))
            .with(Fixed::ok("element-snapshot", JPEG, &calls));

        match chain.acquire(&media(), QualityHint::Reduced, &CancelHandle::new()).await {
            Acquisition::Acquired { strategy, .. } => assert_eq!(strategy, "element-snapshot"),
            other => panic!("expected acquisition, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn all_failures_yield_fallback_locator() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = StrategyChain::new(Duration::from_secs(1))
            .with(Fixed::err("data-channel", MediaFailure::unavailable("none"), &calls))
            .with(Fixed::err("network-fetch", MediaFailure::access_denied("403"), &calls))
            .with(Fixed::err("element-snapshot", MediaFailure::unavailable("none"), &calls));

        match chain.acquire(&media(), QualityHint::Full, &CancelHandle::new()).await {
            Acquisition::Failed {
                reason,
                fallback_locator,
                attempts,
            } => {
                assert_eq!(reason, FailureKind::AccessDenied);
                assert_eq!(fallback_locator.as_deref(), Some("https://cdn.example/m1.jpg"));
                assert_eq!(attempts.len(), 3);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_strategy_times_out_and_chain_continues() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slow = Box::new(Fixed {
            name: "full-view",
            result: Ok(JPEG.to_vec()),
            calls: calls.clone(),
            delay: Some(Duration::from_secs(5)),
        });
        let chain = StrategyChain::new(Duration::from_millis(20))
            .with(slow)
            .with(Fixed::ok("element-snapshot", PNG, &calls));

        match chain.acquire(&media(), QualityHint::Full, &CancelHandle::new()).await {
            Acquisition::Acquired { strategy, rank, .. } => {
                assert_eq!(strategy, "element-snapshot");
                assert_eq!(rank, 1);
            }
            other => panic!("expected acquisition, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancellation_checked_before_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = StrategyChain::new(Duration::from_secs(1))
            .with(Fixed::ok("data-channel", JPEG, &calls));
        let cancel = CancelHandle::new();
        cancel.cancel();

        assert!(matches!(
            chain.acquire(&media(), QualityHint::Full, &cancel).await,
            Acquisition::Cancelled
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_chain_fails_as_unavailable() {
        let chain = StrategyChain::new(Duration::from_secs(1));
        match chain.acquire(&media(), QualityHint::Full, &CancelHandle::new()).await {
            Acquisition::Failed { reason, .. } => assert_eq!(reason, FailureKind::Unavailable),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
