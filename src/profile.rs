//! Device profile resolution.
//!
//! A profile maps a device identifier to its target resolution, the output
//! formats the device can consume, and the processing defaults the rest of
//! the pipeline inherits. Resolution happens exactly once per run; the
//! resulting [`DeviceProfile`] is shared read-only by every stage.

use crate::error::{Error, Result};
use crate::types::{CroppingMode, FileFormat, GammaPolicy};

/// Immutable description of a target reading device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceProfile {
    pub id: &'static str,
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    /// Formats the device can consume. The first entry is the preferred
    /// format used when the configuration asks for [`FileFormat::Auto`].
    pub formats: &'static [FileFormat],
    pub default_cropping: CroppingMode,
    pub default_gamma: GammaPolicy,
    /// Number of panel-view tiles per screen (2 or 4); 0 when the device
    /// does not support panel view.
    pub panel_tiles: u8,
}

impl DeviceProfile {
    /// Preferred output format for this device.
    pub fn preferred_format(&self) -> FileFormat {
        self.formats.first().copied().unwrap_or(FileFormat::Cbz)
    }

    /// Whether the device can consume the given format directly.
    pub fn supports(&self, format: FileFormat) -> bool {
        self.formats.contains(&format)
    }
}

const KINDLE_FORMATS: &[FileFormat] = &[FileFormat::Mobi, FileFormat::PanelView, FileFormat::Epub];
const EPUB_FORMATS: &[FileFormat] = &[FileFormat::Epub, FileFormat::Cbz];
const CBZ_FORMATS: &[FileFormat] = &[FileFormat::Cbz, FileFormat::Epub];

macro_rules! profile {
    ($id:literal, $name:literal, $w:literal x $h:literal, $formats:expr, $tiles:literal) => {
        DeviceProfile {
            id: $id,
            name: $name,
            width: $w,
            height: $h,
            formats: $formats,
            default_cropping: CroppingMode::MarginsAndPageNumbers,
            default_gamma: GammaPolicy::Auto,
            panel_tiles: $tiles,
        }
    };
}

/// Built-in device table. Resolutions follow the devices' physical screens.
const PROFILES: &[DeviceProfile] = &[
    profile!("K578", "Kindle", 600 x 800, KINDLE_FORMATS, 4),
    profile!("KPW", "Kindle Paperwhite 1/2", 758 x 1024, KINDLE_FORMATS, 4),
    profile!("KV", "Kindle Paperwhite 3/4/Voyage/Oasis", 1072 x 1448, KINDLE_FORMATS, 4),
    profile!("KPW5", "Kindle Paperwhite 5", 1236 x 1648, KINDLE_FORMATS, 4),
    profile!("KO", "Kindle Oasis 2/3", 1264 x 1680, KINDLE_FORMATS, 4),
    profile!("KDX", "Kindle DX/DXG", 824 x 1200, CBZ_FORMATS, 0),
    profile!("KoMT", "Kobo Mini/Touch", 600 x 800, EPUB_FORMATS, 0),
    profile!("KoG", "Kobo Glo", 768 x 1024, EPUB_FORMATS, 0),
    profile!("KoGHD", "Kobo Glo HD", 1072 x 1448, EPUB_FORMATS, 0),
    profile!("KoA", "Kobo Aura", 758 x 1024, EPUB_FORMATS, 0),
    profile!("KoAH2O", "Kobo Aura H2O", 1080 x 1430, EPUB_FORMATS, 0),
    profile!("KoAO", "Kobo Aura One", 1404 x 1872, EPUB_FORMATS, 0),
    profile!("KoN", "Kobo Nia", 758 x 1024, EPUB_FORMATS, 0),
    profile!("KoC", "Kobo Clara HD", 1072 x 1448, EPUB_FORMATS, 0),
    profile!("KoL", "Kobo Libra H2O", 1264 x 1680, EPUB_FORMATS, 0),
    profile!("KoF", "Kobo Forma", 1440 x 1920, EPUB_FORMATS, 0),
    profile!("OTHER", "Other reader", 0 x 0, CBZ_FORMATS, 0),
];

/// Resolves a device identifier to its profile.
///
/// A non-zero `custom_width`/`custom_height` replaces the profile's
/// resolution without changing any other defaults. Unknown identifiers are
/// fatal: no target resolution means no pipeline.
pub fn resolve(id: &str, custom_width: u32, custom_height: u32) -> Result<DeviceProfile> {
    let mut profile = PROFILES
        .iter()
        .find(|p| p.id.eq_ignore_ascii_case(id))
        .cloned()
        .ok_or_else(|| Error::UnknownProfile(id.to_string()))?;

    if custom_width != 0 {
        profile.width = custom_width;
    }
    if custom_height != 0 {
        profile.height = custom_height;
    }
    if profile.width == 0 || profile.height == 0 {
        return Err(Error::FatalConfig(format!(
            "Profile '{}' has no fixed resolution; supply custom width and height",
            profile.id
        )));
    }
    Ok(profile)
}

/// Lists the identifiers of all built-in profiles.
pub fn known_profiles() -> Vec<&'static str> {
    PROFILES.iter().map(|p| p.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_profile() {
        let profile = resolve("KV", 0, 0).unwrap();
        assert_eq!(profile.width, 1072);
        assert_eq!(profile.height, 1448);
        assert_eq!(profile.preferred_format(), FileFormat::Mobi);
        assert_eq!(profile.panel_tiles, 4);
    }

    #[test]
    fn resolve_is_case_insensitive() {
        assert_eq!(resolve("kpw5", 0, 0).unwrap().id, "KPW5");
    }

    #[test]
    fn unknown_profile_is_fatal() {
        let err = resolve("XYZ", 0, 0).unwrap_err();
        assert!(matches!(err, Error::UnknownProfile(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn custom_resolution_overrides_only_dimensions() {
        let base = resolve("KoA", 0, 0).unwrap();
        let custom = resolve("KoA", 1000, 0).unwrap();
        assert_eq!(custom.width, 1000);
        assert_eq!(custom.height, base.height);
        assert_eq!(custom.formats, base.formats);
        assert_eq!(custom.default_cropping, base.default_cropping);
    }

    #[test]
    fn known_profiles_lists_every_entry() {
        let ids = known_profiles();
        assert!(ids.contains(&"KV"));
        assert!(ids.contains(&"KoN"));
        for id in ids {
            let profile = resolve(id, 800, 1280).unwrap();
            assert!(!profile.name.is_empty());
        }
    }

    #[test]
    fn other_profile_requires_custom_resolution() {
        assert!(resolve("OTHER", 0, 0).is_err());
        let profile = resolve("OTHER", 800, 1280).unwrap();
        assert_eq!((profile.width, profile.height), (800, 1280));
    }
}
