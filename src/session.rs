//! Export session state and the single-session guard.
//!
//! A [`Session`] can only be created through [`Exporter::begin`], which
//! refuses to hand out a second one while the first is alive. Dropping the
//! session releases the slot.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ExportError, Result};
use crate::models::RecordId;

/// Cooperative cancellation flag, cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Harvester state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestState {
    Idle,
    ScrollingToBoundary,
    Collecting,
    Draining,
    Done,
    Cancelled,
}

impl HarvestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HarvestState::Done | HarvestState::Cancelled)
    }
}

/// Hands out at most one live [`Session`] at a time.
#[derive(Debug, Clone, Default)]
pub struct Exporter {
    active: Arc<AtomicBool>,
}

impl Exporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a new session, or fail with [`ExportError::SessionActive`].
    pub fn begin(&self, config: Config) -> Result<Session> {
        config
            .validate()
            .map_err(|e| ExportError::Config(e.to_string()))?;

        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ExportError::SessionActive);
        }

        let session = Session {
            id: Uuid::new_v4(),
            config,
            cancel: CancelHandle::new(),
            state: HarvestState::Idle,
            transitions: vec![HarvestState::Idle],
            seen: HashSet::new(),
            stats: SessionStats::default(),
            _permit: SessionPermit {
                active: self.active.clone(),
            },
        };
        info!(session = %session.id, "export session started");
        Ok(session)
    }
}

#[derive(Debug)]
struct SessionPermit {
    active: Arc<AtomicBool>,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Counters maintained while harvesting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub records: usize,
    pub media_acquired: usize,
    pub media_failed: usize,
    /// Items the extractor could not structure.
    pub skipped: usize,
    /// Records left out because they fell before the requested date window.
    pub out_of_window: usize,
    /// Records whose identity is a content fingerprint.
    pub fingerprinted: usize,
}

/// Process-local state for one harvesting session.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    config: Config,
    cancel: CancelHandle,
    state: HarvestState,
    transitions: Vec<HarvestState>,
    seen: HashSet<RecordId>,
    stats: SessionStats,
    _permit: SessionPermit,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle that can cancel this session from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> HarvestState {
        self.state
    }

    /// Every state the session has entered, in order.
    pub fn transitions(&self) -> &[HarvestState] {
        &self.transitions
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    pub(crate) fn transition(&mut self, next: HarvestState) {
        if self.state == next || self.state.is_terminal() {
            return;
        }
        debug!(session = %self.id, from = ?self.state, to = ?next, "harvest state");
        self.state = next;
        self.transitions.push(next);
    }

    pub fn has_seen(&self, id: &RecordId) -> bool {
        self.seen.contains(id)
    }

    /// Remember `id`; returns `false` if it was already known.
    pub(crate) fn mark_seen(&mut self, id: RecordId) -> bool {
        self.seen.insert(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_session_is_rejected_until_first_drops() {
        let exporter = Exporter::new();
        let first = exporter.begin(Config::default()).unwrap();
        assert!(exporter.is_busy());
        assert!(matches!(
            exporter.begin(Config::default()),
            Err(ExportError::SessionActive)
        ));
        drop(first);
        assert!(!exporter.is_busy());
        assert!(exporter.begin(Config::default()).is_ok());
    }

    #[test]
    fn invalid_config_does_not_take_the_slot() {
        let exporter = Exporter::new();
        let mut config = Config::default();
        config.export.max_media_per_chunk = 0;
        assert!(matches!(exporter.begin(config), Err(ExportError::Config(_))));
        assert!(!exporter.is_busy());
    }

    #[test]
    fn cancel_handle_is_shared() {
        let exporter = Exporter::new();
        let session = exporter.begin(Config::default()).unwrap();
        let handle = session.cancel_handle();
        assert!(!session.is_cancelled());
        handle.cancel();
        assert!(session.is_cancelled());
    }

    #[test]
    fn terminal_state_is_sticky() {
        let exporter = Exporter::new();
        let mut session = exporter.begin(Config::default()).unwrap();
        session.transition(HarvestState::Collecting);
        session.transition(HarvestState::Done);
        session.transition(HarvestState::Cancelled);
        assert_eq!(session.state(), HarvestState::Done);
        assert_eq!(
            session.transitions(),
            &[
                HarvestState::Idle,
                HarvestState::Collecting,
                HarvestState::Done
            ]
        );
    }

    #[test]
    fn dedup_set_reports_repeats() {
        let exporter = Exporter::new();
        let mut session = exporter.begin(Config::default()).unwrap();
        assert!(session.mark_seen(RecordId::source("1")));
        assert!(!session.mark_seen(RecordId::source("1")));
        assert!(session.has_seen(&RecordId::source("1")));
        assert!(!session.has_seen(&RecordId::fingerprint("1")));
    }
}
