use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::events::{CancelToken, EventSink, LogSink};
use crate::pipeline;
use crate::profile::{self, DeviceProfile};
use crate::source::{DirectorySource, PageSource};
use crate::transform::TransformOptions;
use crate::types::{
    BatchSplitMode, BorderPolicy, ColorPolicy, CroppingMode, Direction, EbookMetadata, FileFormat,
    GammaPolicy, PageEncoding, RunReport, SkipExistingMode, SplitterMode,
};

/// The main Tankobon conversion configuration, built declaratively using
/// the builder pattern.
///
/// This struct encapsulates all settings needed to turn a directory of
/// comic page images into one or more device-optimized ebook files:
/// source and target paths, the device profile, per-page transform
/// options, volume splitting and the output container.
///
/// ## Builder Pattern
///
/// Use [`TankobonConfig::builder()`](TankobonConfig::builder) to create a
/// new configuration:
///
/// ```rust,no_run
/// # use tankobon::prelude::*;
/// # use std::path::PathBuf;
/// let config = TankobonConfig::builder()
///     .metadata(EbookMetadata::default_with_title("My Manga".to_string()))
///     .source_path(PathBuf::from("./source"))
///     .target_path(PathBuf::from("./output"))
///     .device("KV")
///     .manga(true)
///     .build()
///     .expect("Invalid configuration");
/// ```
///
/// Defaults left untouched follow the resolved device profile: cropping
/// mode and gamma policy fall back to the profile's defaults, and
/// [`FileFormat::Auto`] picks the profile's preferred container.
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(setter(into, strip_option), build_fn(validate = "Self::validate"))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TankobonConfig {
    // --- Core Conversion Settings ---
    /// Ebook metadata embedded in the generated files. An empty title is
    /// replaced by the source's own name at run time.
    #[builder(default = "EbookMetadata::default_with_title(String::new())")]
    pub metadata: EbookMetadata,

    /// Source directory containing page images, scanned root first and
    /// then one group per subdirectory in natural order.
    #[builder(default)]
    pub source_path: PathBuf,

    /// Target directory where generated ebook files will be saved.
    #[builder(default)]
    pub target_path: PathBuf,

    /// Whether to create a subdirectory in the target path named after
    /// the ebook title.
    #[builder(default = "true")]
    pub create_output_directory: bool,

    /// Device profile identifier ("KV", "KPW5", "KoC", ...). Unknown
    /// identifiers abort the run before any page is touched.
    #[builder(default = "\"KV\".to_string()")]
    pub device: String,

    /// Overrides the profile's target width when non-zero.
    #[builder(default = "0")]
    pub custom_width: u32,

    /// Overrides the profile's target height when non-zero.
    #[builder(default = "0")]
    pub custom_height: u32,

    /// Output container. [`FileFormat::Auto`] resolves to the device
    /// profile's preferred format.
    #[builder(default = "FileFormat::Auto")]
    pub output_format: FileFormat,

    /// Right-to-left mode: reverses split-half ordering and marks the
    /// output as right-to-left reading.
    #[builder(default = "false")]
    pub manga: bool,

    // --- Per-Page Transform Settings ---
    /// Margin cropping mode. `None` uses the profile default.
    #[builder(default)]
    pub cropping: Option<CroppingMode>,

    /// How the border color is detected for cropping.
    #[builder(default)]
    pub border: BorderPolicy,

    /// Cropping aggressiveness; scales the gray-level tolerance.
    #[builder(default = "1.0")]
    pub cropping_power: f32,

    /// Fraction of the original page area a crop must keep; smaller
    /// results skip the crop entirely.
    #[builder(default = "0.0")]
    pub cropping_minimum: f32,

    /// Gamma correction policy. `None` uses the profile default.
    #[builder(default)]
    pub gamma: Option<GammaPolicy>,

    /// Double-page spread handling.
    #[builder(default = "SplitterMode::Split")]
    pub splitter: SplitterMode,

    /// Grayscale conversion or forced color passthrough.
    #[builder(default)]
    pub color: ColorPolicy,

    /// Enlarge pages smaller than the target resolution.
    #[builder(default = "false")]
    pub upscale: bool,

    /// Fill the target resolution exactly, disregarding aspect ratio.
    #[builder(default = "false")]
    pub stretch: bool,

    /// Pixel encoding for pages inside the output container.
    #[builder(default)]
    pub page_encoding: PageEncoding,

    // --- Volume and Output Settings ---
    /// Policy for mapping pages into output volumes.
    #[builder(default)]
    pub batch_split: BatchSplitMode,

    /// Size target in MiB for [`BatchSplitMode::Automatic`].
    #[builder(default = "400")]
    pub target_size_mb: u64,

    /// What to do when a destination artifact already exists.
    #[builder(default)]
    pub skip_existing: SkipExistingMode,

    /// Minimum digit count for volume numbers in titles.
    #[builder(default = "0")]
    pub pad_zeros: usize,

    /// Copy non-image sidecar files from the source root into the
    /// archive. CBZ output only.
    #[builder(default = "false")]
    pub copy_sidecars: bool,

    // --- Panel View Settings ---
    /// Merge all pages of a group into one tall strip before panel
    /// decomposition (webtoon sources).
    #[builder(default = "false")]
    pub panel_merge: bool,

    /// When set, every panel sub-image is additionally dumped here as PNG
    /// for inspection.
    #[builder(default)]
    pub panel_debug_dir: Option<PathBuf>,
}

impl TankobonConfig {
    /// Creates a new builder for configuring `TankobonConfig`.
    pub fn builder() -> TankobonConfigBuilder {
        TankobonConfigBuilder::default()
    }

    /// Validates the configuration without touching the filesystem beyond
    /// the source path check.
    ///
    /// All `convert*` methods call this automatically; manual invocation
    /// is useful for early error reporting. Errors from this check are
    /// fatal: nothing has been processed yet.
    pub fn preflight_check(&self) -> Result<&Self> {
        if self.target_path.as_os_str().is_empty() {
            return Err(Error::FatalConfig("Target path is required".to_string()));
        }
        if self.source_path.as_os_str().is_empty() {
            return Err(Error::FatalConfig("Source path is required".to_string()));
        }
        if !self.source_path.exists() {
            return Err(Error::NotFound(format!(
                "Source path does not exist: {:?}",
                self.source_path
            )));
        }
        if !self.source_path.is_dir() {
            return Err(Error::InvalidPath(
                self.source_path.clone(),
                "Source path is not a directory.".to_string(),
            ));
        }

        let profile = self.resolve_profile()?;
        let format = self.resolved_format(&profile);
        if self.copy_sidecars && format != FileFormat::Cbz {
            return Err(Error::FatalConfig(
                "Sidecar copying is only supported for CBZ output".to_string(),
            ));
        }
        if self.panel_merge && format != FileFormat::PanelView {
            return Err(Error::FatalConfig(
                "Strip merging requires panel-view output".to_string(),
            ));
        }
        Ok(self)
    }

    /// Resolves the configured device identifier, applying any custom
    /// resolution override.
    pub fn resolve_profile(&self) -> Result<DeviceProfile> {
        profile::resolve(&self.device, self.custom_width, self.custom_height)
    }

    /// The output format after resolving [`FileFormat::Auto`] against the
    /// profile. An explicitly requested format the device cannot consume
    /// is honored but logged.
    pub fn resolved_format(&self, profile: &DeviceProfile) -> FileFormat {
        match self.output_format {
            FileFormat::Auto => profile.preferred_format(),
            format => {
                if !profile.supports(format) {
                    log::warn!(
                        "device '{}' does not list {:?} as a supported format",
                        profile.id,
                        format
                    );
                }
                format
            }
        }
    }

    /// Reading direction derived from manga mode.
    pub fn reading_direction(&self) -> Direction {
        if self.manga { Direction::Rtl } else { Direction::Ltr }
    }

    pub(crate) fn transform_options(&self, profile: &DeviceProfile) -> TransformOptions {
        TransformOptions {
            cropping: self.cropping.unwrap_or(profile.default_cropping),
            border: self.border,
            cropping_power: self.cropping_power,
            cropping_minimum: self.cropping_minimum,
            gamma: self.gamma.unwrap_or(profile.default_gamma),
            splitter: self.splitter,
            color: self.color,
            upscale: self.upscale,
            stretch: self.stretch,
            manga: self.manga,
        }
    }

    // --- Core conversion entry points ---

    /// Runs the full pipeline from the configured source directory with
    /// default logging and no external cancellation.
    ///
    /// ```rust,no_run
    /// # use tankobon::prelude::*;
    /// # use std::path::PathBuf;
    /// # #[tokio::main]
    /// # async fn main() -> tankobon::error::Result<()> {
    /// let report = TankobonConfig::builder()
    ///     .source_path(PathBuf::from("./source"))
    ///     .target_path(PathBuf::from("./output"))
    ///     .device("KoC")
    ///     .build()?
    ///     .convert()
    ///     .await?;
    /// assert!(report.is_clean());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn convert(self) -> Result<RunReport> {
        self.convert_with(&LogSink, &CancelToken::new()).await
    }

    /// Runs the full pipeline from the configured source directory with a
    /// caller-supplied event sink and cancel token.
    pub async fn convert_with(
        self,
        sink: &dyn EventSink,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let source = DirectorySource::new(self.source_path.clone());
        self.convert_from(&source, sink, cancel).await
    }

    /// Runs the pipeline against any page source implementation. This is
    /// the lowest-level entry point; the other `convert*` methods wrap
    /// it.
    pub async fn convert_from(
        self,
        source: &dyn PageSource,
        sink: &dyn EventSink,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        pipeline::run(&self, source, sink, cancel).await
    }
}

impl TankobonConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(power) = self.cropping_power {
            if !(0.01..=2.0).contains(&power) {
                return Err("cropping_power must be between 0.01 and 2.0".to_string());
            }
        }
        if let Some(minimum) = self.cropping_minimum {
            if !(0.0..1.0).contains(&minimum) {
                return Err("cropping_minimum must be between 0.0 and 1.0".to_string());
            }
        }
        if let Some(Some(GammaPolicy::Fixed(gamma))) = self.gamma {
            if !(0.1..=5.0).contains(&gamma) {
                return Err("fixed gamma must be between 0.1 and 5.0".to_string());
            }
        }
        if let Some(PageEncoding::Jpeg { quality }) = self.page_encoding {
            if quality > 100 {
                return Err("JPEG quality must be between 0 and 100".to_string());
            }
        }
        if let Some(target) = self.target_size_mb {
            if target == 0 {
                return Err("target_size_mb must be at least 1".to_string());
            }
        }
        if let Some(pad) = self.pad_zeros {
            if pad > 4 {
                return Err("pad_zeros must be at most 4".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_defaults() {
        let config = TankobonConfig::builder().build().unwrap();
        assert_eq!(config.device, "KV");
        assert_eq!(config.output_format, FileFormat::Auto);
        assert_eq!(config.splitter, SplitterMode::Split);
        assert!(config.cropping.is_none());
        assert_eq!(config.target_size_mb, 400);
    }

    #[test]
    fn builder_rejects_out_of_range_values() {
        assert!(TankobonConfig::builder().cropping_power(5.0f32).build().is_err());
        assert!(TankobonConfig::builder().cropping_minimum(1.5f32).build().is_err());
        assert!(TankobonConfig::builder().target_size_mb(0u64).build().is_err());
        assert!(TankobonConfig::builder().pad_zeros(9usize).build().is_err());
        assert!(
            TankobonConfig::builder()
                .page_encoding(PageEncoding::Jpeg { quality: 150 })
                .build()
                .is_err()
        );
    }

    #[test]
    fn auto_format_follows_profile() {
        let config = TankobonConfig::builder().device("KoC").build().unwrap();
        let profile = config.resolve_profile().unwrap();
        assert_eq!(config.resolved_format(&profile), FileFormat::Epub);

        let config = TankobonConfig::builder()
            .device("KoC")
            .output_format(FileFormat::Cbz)
            .build()
            .unwrap();
        let profile = config.resolve_profile().unwrap();
        assert_eq!(config.resolved_format(&profile), FileFormat::Cbz);
    }

    #[test]
    fn profile_defaults_flow_into_transform_options() {
        let config = TankobonConfig::builder().manga(true).build().unwrap();
        let profile = config.resolve_profile().unwrap();
        let opts = config.transform_options(&profile);
        assert_eq!(opts.cropping, profile.default_cropping);
        assert_eq!(opts.gamma, profile.default_gamma);
        assert!(opts.manga);
        assert_eq!(config.reading_direction(), Direction::Rtl);
    }

    #[test]
    fn preflight_rejects_unknown_device() {
        let config = TankobonConfig::builder()
            .device("XYZ")
            .source_path(std::env::temp_dir())
            .target_path(std::env::temp_dir())
            .build()
            .unwrap();
        let err = config.preflight_check().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn preflight_rejects_sidecars_outside_cbz() {
        let config = TankobonConfig::builder()
            .device("KoC")
            .output_format(FileFormat::Epub)
            .copy_sidecars(true)
            .source_path(std::env::temp_dir())
            .target_path(std::env::temp_dir())
            .build()
            .unwrap();
        assert!(matches!(
            config.preflight_check(),
            Err(Error::FatalConfig(_))
        ));
    }
}
