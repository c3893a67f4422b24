//! Environment capabilities used by the acquisition strategies.
//!
//! A [`MediaHost`] is whatever can actually touch the live view: a browser
//! automation bridge, an embedded webview, or the transcript replay host.
//! Every capability defaults to [`FailureKind::Unavailable`](super::FailureKind),
//! so a host only implements what its environment really exposes.

use async_trait::async_trait;

use super::{MediaFailure, RasterOptions};
use crate::models::MediaRef;

#[async_trait]
pub trait MediaHost: Send + Sync {
    /// Read the attachment's original bytes over a privileged channel.
    async fn read_privileged(&self, _media: &MediaRef) -> Result<Vec<u8>, MediaFailure> {
        Err(MediaFailure::unavailable("no privileged data channel"))
    }

    /// Snapshot a raster element that is already rendered in the view.
    async fn snapshot_rendered(
        &self,
        _media: &MediaRef,
        _opts: RasterOptions,
    ) -> Result<Vec<u8>, MediaFailure> {
        Err(MediaFailure::unavailable("no rendered raster"))
    }

    /// Render a fresh element pointed at `locator` and snapshot it.
    async fn render_locator(
        &self,
        _locator: &str,
        _opts: RasterOptions,
    ) -> Result<Vec<u8>, MediaFailure> {
        Err(MediaFailure::unavailable("cannot render detached elements"))
    }

    /// Open the full-view presentation for `media`.
    ///
    /// Must be paired with [`close_full_view`](MediaHost::close_full_view).
    fn open_full_view(&self, _media: &MediaRef) -> Result<(), MediaFailure> {
        Err(MediaFailure::unavailable("no full-view presentation"))
    }

    /// Restore the UI state that existed before `open_full_view`.
    fn close_full_view(&self) {}

    async fn snapshot_full_view(&self, _opts: RasterOptions) -> Result<Vec<u8>, MediaFailure> {
        Err(MediaFailure::unavailable("no full-view presentation"))
    }

    /// Generic visual snapshot of the element bounding `media`.
    async fn snapshot_element(
        &self,
        _media: &MediaRef,
        _opts: RasterOptions,
    ) -> Result<Vec<u8>, MediaFailure> {
        Err(MediaFailure::unavailable("no element snapshots"))
    }
}

/// Host with no capabilities; only `network-fetch` can succeed with it.
pub struct NoHost;

impl MediaHost for NoHost {}
