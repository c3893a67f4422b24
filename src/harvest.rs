//! Incremental harvester.
//!
//! Drives a [`ScrollSource`] through an explicit state machine:
//!
//! ```text
//! Idle ─▶ ScrollingToBoundary ─▶ Collecting ─▶ Draining ─▶ Done
//!   └──────────────┴─────────────────┴────────────┴──────▶ Cancelled
//! ```
//!
//! While collecting, each iteration enumerates the materialized items,
//! extracts every unseen identity, resolves its media through the
//! [`StrategyChain`], and hands the finished record to a [`RecordSink`]. It
//! then advances the view by a fraction of its visible extent. Collecting
//! stops when the view stops moving for `stability_window` consecutive
//! steps, when `max_collect_iterations` is reached, when the optional date
//! window is left behind, or on cancellation.
//!
//! A record is only handed to the sink once its media outcome is known, so
//! at most one unresolved attachment exists at any time.

use chrono::{Datelike, Local, NaiveDate};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ExportError, Result};
use crate::extract::{Extraction, FieldExtractor};
use crate::media::{Acquisition, StrategyChain};
use crate::models::{AlreadySettled, Record};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::session::{HarvestState, Session};
use crate::source::ScrollSource;

/// Consumer of harvested records, in harvesting order.
pub trait RecordSink {
    fn accept(&mut self, record: Record) -> Result<()>;

    /// Flush anything buffered. Called once while draining.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// 1-based index of the output part the next record lands in.
    fn chunk_index(&self) -> usize {
        1
    }
}

impl RecordSink for Vec<Record> {
    fn accept(&mut self, record: Record) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestOutcome {
    Complete,
    /// Cancelled by the user; the sink holds a partial result.
    Cancelled,
}

/// Inclusive day range restricting which records are exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowPosition {
    Before,
    Within,
    After,
}

impl DateWindow {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self> {
        if from > to {
            return Err(ExportError::Config(format!(
                "date window start {} is after end {}",
                from, to
            )));
        }
        Ok(Self { from, to })
    }

    fn classify(&self, day: NaiveDate) -> WindowPosition {
        if day < self.from {
            WindowPosition::Before
        } else if day > self.to {
            WindowPosition::After
        } else {
            WindowPosition::Within
        }
    }
}

/// Parse a day-separator label such as `Today`, `March 3`, or `10 January 2024`.
///
/// Labels without a year are assumed to fall in `today`'s year.
pub fn parse_day_label(label: &str, today: NaiveDate) -> Option<NaiveDate> {
    let label = label.trim();
    match label.to_lowercase().as_str() {
        "today" => return Some(today),
        "yesterday" => return today.pred_opt(),
        _ => {}
    }

    const WITH_YEAR: [&str; 5] = ["%B %d, %Y", "%B %d %Y", "%d %B %Y", "%Y-%m-%d", "%d.%m.%Y"];
    for fmt in WITH_YEAR {
        if let Ok(date) = NaiveDate::parse_from_str(label, fmt) {
            return Some(date);
        }
    }

    let with_year = format!("{} {}", label, today.year());
    for fmt in ["%B %d %Y", "%d %B %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&with_year, fmt) {
            return Some(date);
        }
    }
    None
}

/// Position marker observed after each scroll command. Content loading
/// above the viewport changes `total` even when `position` comes back equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Marker {
    position: u64,
    total: u64,
}

enum Step {
    Continue,
    Stop,
}

pub struct Harvester<'a, S, E>
where
    S: ScrollSource,
    E: FieldExtractor<S::Item>,
{
    source: &'a mut S,
    extractor: &'a E,
    chain: &'a StrategyChain,
    progress: &'a dyn ProgressReporter,
    window: Option<DateWindow>,
    today: NaiveDate,
    last_percent: u8,
    warned_fingerprint: bool,
}

impl<'a, S, E> Harvester<'a, S, E>
where
    S: ScrollSource,
    E: FieldExtractor<S::Item>,
{
    pub fn new(source: &'a mut S, extractor: &'a E, chain: &'a StrategyChain) -> Self {
        Self {
            source,
            extractor,
            chain,
            progress: &NoProgress,
            window: None,
            today: Local::now().date_naive(),
            last_percent: 0,
            warned_fingerprint: false,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_window(mut self, window: Option<DateWindow>) -> Self {
        self.window = window;
        self
    }

    /// Reference date for relative labels like `Today`.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Run the session to completion, feeding records to `sink`.
    ///
    /// Only a missing source or a sink (renderer) failure is returned as an
    /// error; everything else degrades into the output.
    pub async fn run<K: RecordSink>(
        &mut self,
        session: &mut Session,
        sink: &mut K,
    ) -> Result<HarvestOutcome> {
        self.source.probe()?;
        info!(session = %session.id(), title = %self.source.title(), "harvest starting");

        if session.config().scroll.seek_boundary && !session.is_cancelled() {
            session.transition(HarvestState::ScrollingToBoundary);
            self.seek_boundary(session).await;

            let settle = Duration::from_millis(session.config().scroll.settle_delay_ms);
            if !settle.is_zero() && !session.is_cancelled() {
                tokio::time::sleep(settle).await;
            }
        }

        if !session.is_cancelled() {
            session.transition(HarvestState::Collecting);
            self.emit(session, sink.chunk_index(), 30, "Collecting records".to_string());
            self.collect(session, sink).await?;
        }

        session.transition(HarvestState::Draining);
        self.emit(session, sink.chunk_index(), 95, "Finishing export".to_string());
        sink.finish()?;

        let outcome = if session.is_cancelled() {
            session.transition(HarvestState::Cancelled);
            HarvestOutcome::Cancelled
        } else {
            session.transition(HarvestState::Done);
            HarvestOutcome::Complete
        };

        let stats = session.stats();
        info!(
            session = %session.id(),
            outcome = ?outcome,
            records = stats.records,
            media_acquired = stats.media_acquired,
            media_failed = stats.media_failed,
            skipped = stats.skipped,
            fingerprinted = stats.fingerprinted,
            "harvest finished"
        );
        Ok(outcome)
    }

    fn marker(&self) -> Marker {
        Marker {
            position: self.source.scroll_position(),
            total: self.source.scroll_extent().total,
        }
    }

    async fn seek_boundary(&mut self, session: &mut Session) {
        let budget = session.config().scroll.boundary_attempts;
        let window = session.config().scroll.stability_window;
        let delay = session.config().export.scroll_step_delay();

        let mut last = self.marker();
        let mut stable = 0;
        for attempt in 1..=budget {
            if session.is_cancelled() {
                return;
            }
            self.source.set_scroll_position(0);
            tokio::time::sleep(delay).await;

            let now = self.marker();
            if now == last {
                stable += 1;
                if stable >= window {
                    debug!(attempt, "start boundary reached");
                    return;
                }
            } else {
                stable = 0;
            }
            last = now;

            self.emit(
                session,
                1,
                attempt.min(30) as u8,
                format!("Loading older content (scroll {})", attempt),
            );
        }
        warn!(budget, "boundary attempt budget exhausted; collecting from current position");
    }

    async fn collect<K: RecordSink>(&mut self, session: &mut Session, sink: &mut K) -> Result<()> {
        let max_iterations = session.config().scroll.max_collect_iterations;
        let window = session.config().scroll.stability_window;
        let step_fraction = session.config().scroll.step_fraction;
        let delay = session.config().export.scroll_step_delay();

        let mut day: Option<String> = None;
        let mut in_window = false;
        let mut stalls = 0;

        for iteration in 1..=max_iterations {
            if session.is_cancelled() {
                return Ok(());
            }

            let items = self.source.list_materialized_items();
            for item in &items {
                if session.is_cancelled() {
                    return Ok(());
                }

                if let Some(label) = self.extractor.day_marker(item) {
                    if let Some(window) = self.window {
                        match parse_day_label(&label, self.today).map(|d| window.classify(d)) {
                            Some(WindowPosition::Before) => in_window = false,
                            Some(WindowPosition::After) => {
                                info!(day = %label, "left the requested date window");
                                return Ok(());
                            }
                            Some(WindowPosition::Within) | None => in_window = true,
                        }
                    }
                    day = Some(label);
                    continue;
                }

                if let Step::Stop = self.harvest_item(item, &day, in_window, session, sink).await? {
                    return Ok(());
                }
            }

            let before = self.marker();
            let visible = self.source.scroll_extent().visible;
            let step = ((visible as f64) * step_fraction).max(1.0) as u64;
            self.source
                .set_scroll_position(before.position.saturating_add(step));
            tokio::time::sleep(delay).await;

            let after = self.marker();
            if after == before {
                stalls += 1;
                if stalls >= window {
                    debug!(iteration, "view stopped advancing");
                    return Ok(());
                }
            } else {
                stalls = 0;
                let extent = self.source.scroll_extent();
                let seen = (after.position + extent.visible).min(extent.total.max(1));
                let percent = 30 + (65 * seen / extent.total.max(1)) as u8;
                self.emit(
                    session,
                    sink.chunk_index(),
                    percent,
                    format!("Collected {} records", session.stats().records),
                );
            }
        }

        warn!(
            max_iterations,
            "collect iteration ceiling reached; source may still hold more content"
        );
        Ok(())
    }

    async fn harvest_item<K: RecordSink>(
        &mut self,
        item: &S::Item,
        day: &Option<String>,
        in_window: bool,
        session: &mut Session,
        sink: &mut K,
    ) -> Result<Step> {
        let id = self.extractor.identify(item);
        if session.has_seen(&id) {
            return Ok(Step::Continue);
        }

        if self.window.is_some() && day.is_some() && !in_window {
            session.mark_seen(id);
            session.stats_mut().out_of_window += 1;
            return Ok(Step::Continue);
        }

        let mut record = match self.extractor.extract(item, id.clone()) {
            Extraction::Record(record) => record,
            Extraction::Unextractable(reason) => {
                debug!(id = %id, reason = %reason, "item skipped");
                session.mark_seen(id);
                session.stats_mut().skipped += 1;
                return Ok(Step::Continue);
            }
        };
        if record.day.is_none() {
            record.day = day.clone();
        }

        if let Some(media) = record.media.as_mut().filter(|m| m.is_pending()) {
            if session.is_cancelled() {
                return Ok(Step::Stop);
            }
            self.emit(
                session,
                sink.chunk_index(),
                self.last_percent,
                format!("Capturing image {}", session.stats().media_acquired + 1),
            );

            let reference = media.reference().clone();
            let quality = session.config().export.quality;
            match self
                .chain
                .acquire(&reference, quality, &session.cancel_handle())
                .await
            {
                Acquisition::Acquired {
                    bytes,
                    format,
                    strategy,
                    ..
                } => {
                    match media.mark_acquired(bytes, format, strategy) {
                        Ok(()) => session.stats_mut().media_acquired += 1,
                        Err(AlreadySettled) => {
                            warn!(handle = %reference.handle, "attachment already settled")
                        }
                    }
                }
                Acquisition::Failed {
                    reason,
                    fallback_locator,
                    ..
                } => {
                    match media.mark_failed(reason, fallback_locator) {
                        Ok(()) => session.stats_mut().media_failed += 1,
                        Err(AlreadySettled) => {
                            warn!(handle = %reference.handle, "attachment already settled")
                        }
                    }
                }
                Acquisition::Cancelled => return Ok(Step::Stop),
            }
        }

        if id.is_fingerprint() {
            session.stats_mut().fingerprinted += 1;
            if !self.warned_fingerprint {
                self.warned_fingerprint = true;
                warn!(
                    "source exposes no stable ids; using content fingerprints, \
                     near-identical repeated messages may be merged"
                );
            }
        }

        session.mark_seen(id);
        sink.accept(record)?;
        session.stats_mut().records += 1;

        self.emit(
            session,
            sink.chunk_index(),
            self.last_percent,
            format!("Collected {} records", session.stats().records),
        );
        Ok(Step::Continue)
    }

    fn emit(&mut self, session: &Session, chunk_index: usize, percent: u8, status: String) {
        self.last_percent = self.last_percent.max(percent.min(100));
        let stats = session.stats();
        self.progress.report(&ProgressEvent {
            record_count: stats.records,
            media_count: stats.media_acquired,
            chunk_index,
            percent_hint: self.last_percent,
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_relative_labels() {
        let today = day(2024, 3, 10);
        assert_eq!(parse_day_label("Today", today), Some(today));
        assert_eq!(parse_day_label("yesterday", today), Some(day(2024, 3, 9)));
    }

    #[test]
    fn parses_absolute_labels() {
        let today = day(2024, 3, 10);
        assert_eq!(parse_day_label("January 5, 2023", today), Some(day(2023, 1, 5)));
        assert_eq!(parse_day_label("10 January 2024", today), Some(day(2024, 1, 10)));
        assert_eq!(parse_day_label("2022-12-31", today), Some(day(2022, 12, 31)));
        assert_eq!(parse_day_label("March 3", today), Some(day(2024, 3, 3)));
        assert_eq!(parse_day_label("3 March", today), Some(day(2024, 3, 3)));
        assert_eq!(parse_day_label("Pinned message", today), None);
    }

    #[test]
    fn window_rejects_inverted_range() {
        assert!(DateWindow::new(day(2024, 2, 1), day(2024, 1, 1)).is_err());
        let w = DateWindow::new(day(2024, 1, 1), day(2024, 1, 31)).unwrap();
        assert_eq!(w.classify(day(2023, 12, 31)), WindowPosition::Before);
        assert_eq!(w.classify(day(2024, 1, 31)), WindowPosition::Within);
        assert_eq!(w.classify(day(2024, 2, 1)), WindowPosition::After);
    }
}
