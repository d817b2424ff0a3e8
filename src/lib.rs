//! Tankobon - Comic to Device-Optimized Ebook Conversion Library
//!
//! This crate provides an asynchronous, declarative API for converting
//! directories of comic and manga page images into ebook files tuned for a
//! specific reading device: pages are cropped, gamma-corrected, resized
//! and optionally split or decomposed into panels, then packaged as CBZ,
//! EPUB, fixed-layout panel-view EPUB, or a staged MOBI compiled by an
//! external tool.
//!
//! # Getting Started
//!
//! Configure a conversion with the [`TankobonConfig`] builder, then run it
//! with one of the `convert*` methods:
//!
//! ```rust,no_run
//! use tankobon::prelude::*;
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> tankobon::error::Result<()> {
//!     let config = TankobonConfig::builder()
//!         .metadata(EbookMetadata::default_with_title("My Series".to_string()))
//!         .source_path(PathBuf::from("./my_manga/volume_1"))
//!         .target_path(PathBuf::from("./converted"))
//!         .device("KV")
//!         .manga(true)
//!         .batch_split(BatchSplitMode::Automatic)
//!         .build()?;
//!
//!     let report = config.convert().await?;
//!     for warning in &report.page_warnings {
//!         eprintln!("skipped {}: {}", warning.page, warning.cause);
//!     }
//!     println!("{} volume(s) written", report.volumes_created);
//!     Ok(())
//! }
//! ```
//!
//! The run never fails because of a single bad page: decode and transform
//! problems are reported in the [`types::RunReport`] and the page is
//! skipped. Only configuration errors (including an unknown device
//! profile) abort before processing starts.

pub mod error;
pub mod events;
pub mod packager;
pub mod panel;
pub mod path_utils;
pub mod pipeline;
pub mod profile;
pub mod sequencer;
pub mod source;
pub mod tankobon;
pub mod transform;
pub mod types;

// Publicly expose the main `TankobonConfig` struct and its builder
pub use tankobon::{TankobonConfig, TankobonConfigBuilder};

// Re-export error and core types for direct access
pub use events::{CancelToken, EventSink, LogSink};
pub use profile::DeviceProfile;
pub use types::{
    BatchSplitMode, BorderPolicy, ColorPolicy, CroppingMode, Direction, EbookMetadata, FileFormat,
    GammaPolicy, PageEncoding, RunReport, SkipExistingMode, SplitterMode, VolumeStatus,
};

/// Prelude module for convenient imports.
///
/// Re-exports the most commonly used types so a single
/// `use tankobon::prelude::*;` covers typical usage.
pub mod prelude {
    pub use super::error::{Error, Result};
    pub use super::events::{CancelToken, EventSink, LogSink};
    pub use super::profile::DeviceProfile;
    pub use super::source::{DirectorySource, MemorySource, PageSource, SourceImage};
    pub use super::types::{
        BatchSplitMode, BorderPolicy, ColorPolicy, CroppingMode, Direction, EbookMetadata,
        FileFormat, GammaPolicy, PageEncoding, RunReport, SkipExistingMode, SplitterMode,
        VolumeStatus,
    };
    pub use super::{TankobonConfig, TankobonConfigBuilder};
}
