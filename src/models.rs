//! Core data models used throughout scrollback.
//!
//! These types represent the records, media attachments, and chunks that flow
//! through the harvest → chunk → render pipeline.

use serde::Serialize;

use crate::media::{FailureKind, ImageFormat};

/// Where a record's identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// Identifier exposed by the source itself (e.g. a message id attribute).
    Source,
    /// Content-derived fingerprint. Near-identical repeated content can collide.
    Fingerprint,
}

/// Stable identity of a record within one harvesting session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RecordId {
    pub kind: IdentityKind,
    pub value: String,
}

impl RecordId {
    pub fn source(value: impl Into<String>) -> Self {
        Self {
            kind: IdentityKind::Source,
            value: value.into(),
        }
    }

    pub fn fingerprint(value: impl Into<String>) -> Self {
        Self {
            kind: IdentityKind::Fingerprint,
            value: value.into(),
        }
    }

    pub fn is_fingerprint(&self) -> bool {
        self.kind == IdentityKind::Fingerprint
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            IdentityKind::Source => write!(f, "{}", self.value),
            IdentityKind::Fingerprint => write!(f, "fp:{}", self.value),
        }
    }
}

/// Sender classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    #[serde(rename = "self")]
    Outgoing,
    #[serde(rename = "other")]
    Incoming,
    #[serde(rename = "unknown")]
    Unknown,
}

/// Summary of a quoted / replied-to record. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplyRef {
    pub sender: Option<String>,
    pub excerpt: Option<String>,
    pub has_media: bool,
}

/// Opaque pointer to an embedded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaRef {
    /// Handle the media host uses to find the rendered element.
    pub handle: String,
    /// Best known resource locator (URL), if the source exposes one.
    pub locator: Option<String>,
}

/// Acquisition status of an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MediaStatus {
    Pending,
    Acquired {
        strategy: String,
        format: ImageFormat,
    },
    Failed {
        reason: FailureKind,
    },
}

/// A media attachment on a record.
///
/// The status moves `Pending → Acquired | Failed` exactly once; later
/// transitions are rejected.
#[derive(Debug, Clone, Serialize)]
pub struct MediaAttachment {
    reference: MediaRef,
    #[serde(skip)]
    bytes: Option<Vec<u8>>,
    fallback_locator: Option<String>,
    #[serde(flatten)]
    status: MediaStatus,
}

/// Returned when a settled attachment is asked to transition again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlreadySettled;

impl MediaAttachment {
    pub fn pending(reference: MediaRef) -> Self {
        Self {
            reference,
            bytes: None,
            fallback_locator: None,
            status: MediaStatus::Pending,
        }
    }

    pub fn reference(&self) -> &MediaRef {
        &self.reference
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    pub fn fallback_locator(&self) -> Option<&str> {
        self.fallback_locator.as_deref()
    }

    pub fn status(&self) -> &MediaStatus {
        &self.status
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, MediaStatus::Pending)
    }

    pub fn mark_acquired(
        &mut self,
        bytes: Vec<u8>,
        format: ImageFormat,
        strategy: &str,
    ) -> Result<(), AlreadySettled> {
        if !self.is_pending() {
            return Err(AlreadySettled);
        }
        self.bytes = Some(bytes);
        self.status = MediaStatus::Acquired {
            strategy: strategy.to_string(),
            format,
        };
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        reason: FailureKind,
        fallback_locator: Option<String>,
    ) -> Result<(), AlreadySettled> {
        if !self.is_pending() {
            return Err(AlreadySettled);
        }
        self.fallback_locator = fallback_locator;
        self.status = MediaStatus::Failed { reason };
        Ok(())
    }
}

/// One structured content unit extracted from the source.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub id: RecordId,
    pub role: Role,
    pub sender: Option<String>,
    pub timestamp: Option<String>,
    /// Label of the nearest preceding day separator, if any.
    pub day: Option<String>,
    pub text: Vec<String>,
    pub reply: Option<ReplyRef>,
    pub media: Option<MediaAttachment>,
}

impl Record {
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    pub fn media_acquired(&self) -> bool {
        matches!(
            self.media.as_ref().map(|m| m.status()),
            Some(MediaStatus::Acquired { .. })
        )
    }
}

/// A bounded, ordered, contiguous run of records destined for one document.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 1-based position in the output sequence.
    pub index: usize,
    /// Set only on the chunk flushed at end of session.
    pub is_final: bool,
    pub records: Vec<Record>,
}

impl Chunk {
    pub fn media_count(&self) -> usize {
        self.records.iter().filter(|r| r.has_media()).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
