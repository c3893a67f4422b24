//! Streaming chunk assembler.
//!
//! Partitions the record stream into [`Chunk`]s bounded by a record count
//! and a media count, without look-ahead. Bounds are checked after each
//! append, so a chunk seals as soon as either limit is reached and the next
//! record opens a new chunk. A record counts toward the media bound when it
//! carries an attachment at all, whether or not acquisition succeeded.
//!
//! Concatenating the emitted chunks in index order reproduces the input
//! sequence exactly.

use crate::models::{Chunk, Record};

#[derive(Debug)]
pub struct ChunkAssembler {
    max_records: usize,
    max_media: usize,
    current: Vec<Record>,
    current_media: usize,
    next_index: usize,
}

impl ChunkAssembler {
    /// Both bounds are clamped to at least one.
    pub fn new(max_records: usize, max_media: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            max_media: max_media.max(1),
            current: Vec::new(),
            current_media: 0,
            next_index: 1,
        }
    }

    /// Append `record`, returning the sealed chunk if a bound was reached.
    pub fn push(&mut self, record: Record) -> Option<Chunk> {
        if record.has_media() {
            self.current_media += 1;
        }
        self.current.push(record);

        if self.current.len() >= self.max_records || self.current_media >= self.max_media {
            Some(self.seal(false))
        } else {
            None
        }
    }

    /// Seal whatever remains at end of session.
    pub fn finish(&mut self) -> Option<Chunk> {
        if self.current.is_empty() {
            None
        } else {
            Some(self.seal(true))
        }
    }

    /// Index the next sealed chunk will carry.
    pub fn current_index(&self) -> usize {
        self.next_index
    }

    /// Number of chunks sealed so far.
    pub fn sealed(&self) -> usize {
        self.next_index - 1
    }

    fn seal(&mut self, is_final: bool) -> Chunk {
        let chunk = Chunk {
            index: self.next_index,
            is_final,
            records: std::mem::take(&mut self.current),
        };
        self.current_media = 0;
        self.next_index += 1;
        chunk
    }
}
