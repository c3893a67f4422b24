//! # Scrollback
//!
//! Harvests a conversation from a virtualized, scroll-loaded view and turns it
//! into one or more size-bounded export documents.
//!
//! The view only materializes a sliding window of its content, so the
//! harvester drives it step by step: it seeks the start of the conversation,
//! walks forward while deduplicating what it has already seen, and stops once
//! the view no longer moves. Every embedded image is resolved through an
//! ordered fallback chain of acquisition strategies. The growing record stream
//! is sliced into chunks bounded by record and image counts and each chunk is
//! rendered as soon as it seals.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │ ScrollSource │──▶│ Harvester  │──▶│ ChunkPipeline│──▶│ Packager │
//! │ + Extractor  │   │ (sessions) │   │ assemble +   │   │ file/zip │
//! └──────────────┘   └─────┬──────┘   │ render       │   └──────────┘
//!                          │          └──────────────┘
//!                          ▼
//!                   ┌──────────────┐
//!                   │StrategyChain │  data-channel → rendered-raster →
//!                   │ + MediaHost  │  network-fetch → re-render →
//!                   └──────────────┘  full-view → element-snapshot
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! scrollback inspect ./chat.json
//! scrollback export ./chat.json --format markdown --out ./exports
//! scrollback export ./chat.json --from 2024-01-01 --to 2024-01-31 --quality reduced
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Records, attachments, and chunks |
//! | [`error`] | Errors surfaced to the caller |
//! | [`source`] | The scrollable view abstraction |
//! | [`extract`] | Item identity and field extraction |
//! | [`media`] | Media acquisition strategies and the fallback chain |
//! | [`session`] | Single-session guard, cancellation, harvest state |
//! | [`harvest`] | The incremental harvester |
//! | [`chunk`] | Streaming chunk assembler |
//! | [`render`] | Document renderers and packaging |
//! | [`export`] | End-to-end export orchestration |
//! | [`progress`] | Progress reporting |
//! | [`transcript`] | Replay of recorded transcripts as a virtualized view |

pub mod chunk;
pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod harvest;
pub mod media;
pub mod models;
pub mod progress;
pub mod render;
pub mod session;
pub mod source;
pub mod transcript;
