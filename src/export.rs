//! Export orchestration: harvest → chunk → render → package.
//!
//! [`ChunkPipeline`] is the [`RecordSink`] the harvester feeds. It slices the
//! record stream with a [`ChunkAssembler`] and renders each chunk as soon as
//! it seals, so memory holds at most one open chunk of records plus the
//! rendered documents. [`export_session`] drives one session end to end and
//! packages the documents once the harvester has drained.

use chrono::{NaiveDate, Utc};
use tracing::info;
use uuid::Uuid;

use crate::chunk::ChunkAssembler;
use crate::error::Result;
use crate::extract::FieldExtractor;
use crate::harvest::{DateWindow, HarvestOutcome, Harvester, RecordSink};
use crate::media::StrategyChain;
use crate::models::{Chunk, Record};
use crate::progress::ProgressReporter;
use crate::render::{base_label, ChunkRenderer, Document, Package, Packager, RenderMeta, ZipPackager};
use crate::session::{HarvestState, Session, SessionStats};
use crate::source::ScrollSource;

/// Record sink that seals and renders chunks as records arrive.
pub struct ChunkPipeline<'a> {
    assembler: ChunkAssembler,
    renderer: &'a dyn ChunkRenderer,
    meta: RenderMeta,
    documents: Vec<Document>,
}

impl<'a> ChunkPipeline<'a> {
    pub fn new(
        max_records: usize,
        max_media: usize,
        renderer: &'a dyn ChunkRenderer,
        meta: RenderMeta,
    ) -> Self {
        Self {
            assembler: ChunkAssembler::new(max_records, max_media),
            renderer,
            meta,
            documents: Vec::new(),
        }
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn into_documents(self) -> Vec<Document> {
        self.documents
    }

    fn render(&mut self, chunk: Chunk) -> Result<()> {
        if chunk.is_final {
            self.meta.total = Some(chunk.index);
        }
        let doc = self.renderer.render(&chunk, &self.meta)?;
        info!(
            part = chunk.index,
            records = chunk.len(),
            media = chunk.media_count(),
            bytes = doc.content.len(),
            "chunk rendered"
        );
        self.documents.push(doc);
        Ok(())
    }
}

impl RecordSink for ChunkPipeline<'_> {
    fn accept(&mut self, record: Record) -> Result<()> {
        match self.assembler.push(record) {
            Some(chunk) => self.render(chunk),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> Result<()> {
        match self.assembler.finish() {
            Some(chunk) => self.render(chunk),
            None => Ok(()),
        }
    }

    fn chunk_index(&self) -> usize {
        self.assembler.current_index()
    }
}

/// Per-run options that are not part of the persistent configuration.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub window: Option<DateWindow>,
    /// Reference date for relative day labels. Defaults to the local date.
    pub today: Option<NaiveDate>,
}

/// What a finished (or cancelled) session produced.
#[derive(Debug)]
pub struct ExportSummary {
    pub session_id: Uuid,
    pub outcome: HarvestOutcome,
    pub stats: SessionStats,
    pub transitions: Vec<HarvestState>,
    pub label: String,
    /// `None` when no record was collected.
    pub package: Option<Package>,
}

impl ExportSummary {
    pub fn is_partial(&self) -> bool {
        self.outcome == HarvestOutcome::Cancelled
    }
}

/// Run `session` against `source` and package the rendered chunks.
///
/// The session is consumed; its single-session slot is released when this
/// returns.
pub async fn export_session<S, E>(
    mut session: Session,
    source: &mut S,
    extractor: &E,
    chain: &StrategyChain,
    renderer: &dyn ChunkRenderer,
    options: &ExportOptions,
    progress: &dyn ProgressReporter,
) -> Result<ExportSummary>
where
    S: ScrollSource,
    E: FieldExtractor<S::Item>,
{
    let title = source.title();
    let label = base_label(&title, options.window.as_ref());
    let meta = RenderMeta {
        title,
        exported_at: Utc::now(),
        window: options.window,
        total: None,
    };

    let mut pipeline = ChunkPipeline::new(
        session.config().export.max_records_per_chunk,
        session.config().export.max_media_per_chunk,
        renderer,
        meta,
    );

    let mut harvester = Harvester::new(source, extractor, chain)
        .with_progress(progress)
        .with_window(options.window);
    if let Some(today) = options.today {
        harvester = harvester.with_today(today);
    }
    let outcome = harvester.run(&mut session, &mut pipeline).await?;

    let documents = pipeline.into_documents();
    let package = if documents.is_empty() {
        None
    } else {
        Some(ZipPackager.package(documents, &label)?)
    };

    Ok(ExportSummary {
        session_id: session.id(),
        outcome,
        stats: session.stats().clone(),
        transitions: session.transitions().to_vec(),
        label,
        package,
    })
}
