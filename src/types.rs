//! Core data types, enums, and reports for the Tankobon conversion library.
//!
//! This module defines the fundamental data structures used throughout
//! Tankobon:
//! - Pipeline data carriers (`Page`, `ProcessedPage`, `Volume`, `Package`)
//! - Per-page layout metadata (`PageLayout`, `CropBox`, `PanelRegion`)
//! - Enumerations for processing options (`CroppingMode`, `SplitterMode`,
//!   `BatchSplitMode`, `SkipExistingMode`, `FileFormat`, `Direction`)
//! - Comprehensive metadata (`EbookMetadata`)
//! - End-of-run reporting (`RunReport`, `VolumeStatus`)

use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::collections::HashMap;
use std::path::PathBuf;

/// Defines the output container for the generated ebook(s).
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileFormat {
    /// Pick the preferred format of the resolved device profile.
    #[default]
    Auto,
    /// Flat re-encoded image archive. Fast path, no layout markup.
    Cbz,
    /// Reflowable document with embedded images and generated navigation.
    Epub,
    /// Fixed-layout document presenting panel sub-images full screen.
    PanelView,
    /// Staged document tree compiled by an external ebook compiler.
    /// Falls back to [`FileFormat::Epub`] when no compiler is available.
    Mobi,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Cbz => "cbz",
            FileFormat::Epub | FileFormat::PanelView => "epub",
            FileFormat::Mobi => "mobi",
            // Auto is resolved against the device profile before any
            // output path is built.
            FileFormat::Auto => {
                debug_assert!(false, "extension requested for unresolved Auto format");
                "bin"
            }
        }
    }
}

/// Reading direction for the generated document.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    #[default]
    Ltr,
    Rtl,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ltr => "ltr",
            Direction::Rtl => "rtl",
        }
    }
}

/// Border/margin cropping mode applied before any other transform.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CroppingMode {
    Disabled,
    /// Trim uniform borders only.
    Margins,
    /// Trim uniform borders and a thin strip of isolated page-number marks.
    #[default]
    MarginsAndPageNumbers,
}

/// How the dominant border color is determined for cropping.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BorderPolicy {
    /// Sample the page corners and pick the dominant shade.
    #[default]
    Auto,
    White,
    Black,
}

/// Gamma correction policy.
#[derive(Debug, PartialEq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GammaPolicy {
    /// Derive gamma from the page's luminance histogram.
    #[default]
    Auto,
    /// Apply a fixed gamma value uniformly.
    Fixed(f32),
}

/// Double-page spread handling. The mode is fixed per run, not per page.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SplitterMode {
    Disabled,
    /// Cut the spread vertically into two sequential pages.
    #[default]
    Split,
    /// Rotate the whole spread 90 degrees into a single tall page.
    Rotate,
    /// Keep both the rotated spread and the two halves.
    Both,
}

/// Color handling for processed pages.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ColorPolicy {
    /// Convert to grayscale; the common case for manga scans.
    #[default]
    Grayscale,
    /// Keep color channels untouched.
    ForceColor,
}

/// Policy for mapping pages into output volumes.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BatchSplitMode {
    /// One volume for the whole input.
    #[default]
    DontSplit,
    /// Split when the accumulated estimated output size exceeds the
    /// configured target.
    Automatic,
    /// One volume per top-level input subdirectory, in directory order.
    PerDirectory,
}

/// What to do when a destination artifact already exists.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SkipExistingMode {
    /// Always reprocess, overwriting nothing (a fresh suffixed name is
    /// chosen if the destination exists).
    #[default]
    Reprocess,
    /// Omit the volume entirely.
    SkipIfExists,
    /// Copy the previously produced artifact through untouched.
    CopyThrough,
}

/// Pixel encoding for processed pages inside the output container.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PageEncoding {
    Jpeg { quality: u8 },
    Png,
}

impl Default for PageEncoding {
    fn default() -> Self {
        PageEncoding::Jpeg { quality: 85 }
    }
}

impl PageEncoding {
    pub fn extension(&self) -> &'static str {
        match self {
            PageEncoding::Jpeg { .. } => "jpg",
            PageEncoding::Png => "png",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            PageEncoding::Jpeg { .. } => "image/jpeg",
            PageEncoding::Png => "image/png",
        }
    }
}

/// Comprehensive metadata for an ebook, embedded into the output file(s).
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EbookMetadata {
    pub title: String,
    pub series: Option<String>,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub language: String,
    pub identifier: Option<String>,
    pub release_date: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub custom_fields: HashMap<String, String>,
}

impl EbookMetadata {
    /// Creates a default `EbookMetadata` with a title and language "en".
    pub fn default_with_title(title: String) -> Self {
        Self {
            title,
            language: "en".to_string(),
            ..Default::default()
        }
    }
}

/// Interior bounding box left after cropping, in source-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One panel sub-region of a page, in processed-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PanelRegion {
    pub y: u32,
    pub height: u32,
}

/// Which part of a split spread a page represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpreadPart {
    #[default]
    Whole,
    /// Rotated whole-spread representation.
    Rotated,
    /// First half in reading order.
    FirstHalf,
    /// Second half in reading order.
    SecondHalf,
}

/// Accumulated per-page layout metadata, serialized into the package.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PageLayout {
    pub cropped_box: Option<CropBox>,
    pub target_width: u32,
    pub target_height: u32,
    pub spread_part: SpreadPart,
    pub panel_regions: Vec<PanelRegion>,
}

/// A decoded page travelling through the transform stages.
///
/// Pages are owned by exactly one volume at a time; transform stages
/// consume-and-replace rather than mutating shared state, so splitting one
/// page into two never aliases pixel buffers.
#[derive(Debug, Clone)]
pub struct Page {
    pub image: DynamicImage,
    /// Original filename inside the source.
    pub source_name: String,
    /// Position in original extraction order.
    pub original_index: usize,
    /// Sub-ordering for pages produced from the same source page
    /// (spread halves, panels). Ordering by `(original_index, sub_index)`
    /// restores reading order regardless of worker completion order.
    pub sub_index: usize,
    /// Top-level source subdirectory, if any. Drives per-directory
    /// batch splitting.
    pub group: Option<String>,
    pub layout: PageLayout,
}

impl Page {
    pub fn new(image: DynamicImage, source_name: String, original_index: usize) -> Self {
        Self {
            image,
            source_name,
            original_index,
            sub_index: 0,
            group: None,
            layout: PageLayout::default(),
        }
    }

    /// Clones provenance into a derived page (split half, panel),
    /// assigning the next sub-order slot.
    pub fn derive(&self, image: DynamicImage, sub_index: usize) -> Self {
        Self {
            image,
            source_name: self.source_name.clone(),
            original_index: self.original_index,
            sub_index,
            group: self.group.clone(),
            layout: self.layout.clone(),
        }
    }
}

/// A fully transformed and encoded page, ready for packaging.
#[derive(Debug, Clone)]
pub struct ProcessedPage {
    pub bytes: Vec<u8>,
    pub encoding: PageEncoding,
    pub source_name: String,
    pub original_index: usize,
    pub sub_index: usize,
    pub group: Option<String>,
    pub layout: PageLayout,
}

/// An ordered sequence of processed pages destined for one output file.
#[derive(Debug, Clone)]
pub struct Volume {
    pub index: usize,
    pub title: String,
    pub pages: Vec<ProcessedPage>,
}

/// The terminal artifact description for one volume: pages plus
/// container-level metadata. One `Package` maps to exactly one output file.
#[derive(Debug, Clone)]
pub struct Package {
    pub volume: Volume,
    pub metadata: EbookMetadata,
    pub format: FileFormat,
    pub reading_direction: Direction,
    pub cover_index: usize,
    pub output_path: PathBuf,
}

/// Outcome classification for one volume, reported at end of run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum VolumeStatus {
    Completed { path: PathBuf },
    /// Produced, but via a fallback format because a collaborator was
    /// missing or failed.
    Degraded { path: PathBuf, cause: String },
    Skipped { cause: String },
    Copied { path: PathBuf },
    Failed { cause: String },
}

/// A warning scoped to a single page. Never escalates to the run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PageWarning {
    pub page: String,
    pub cause: String,
}

/// Aggregated end-of-run summary: every skip and fallback with its cause.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RunReport {
    pub page_warnings: Vec<PageWarning>,
    pub volume_statuses: Vec<(String, VolumeStatus)>,
    pub pages_processed: usize,
    pub volumes_created: usize,
}

impl RunReport {
    /// True when every volume completed without degradation or failure.
    pub fn is_clean(&self) -> bool {
        self.page_warnings.is_empty()
            && self
                .volume_statuses
                .iter()
                .all(|(_, s)| matches!(s, VolumeStatus::Completed { .. } | VolumeStatus::Copied { .. }))
    }
}
