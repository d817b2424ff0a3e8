//! Panel decomposition: cutting tall or dense pages into per-panel
//! sub-images for panel-view output.
//!
//! Pages are optionally merged into one tall strip first (webtoon sources
//! arrive as arbitrarily cut slices), then cut into horizontal bands. Cut
//! positions start from equal spacing and snap to nearby blank rows so
//! panels are not severed mid-art.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImage, GenericImageView, GrayImage};
use std::path::Path;

use crate::error::{Error, Result};
use crate::profile::DeviceProfile;
use crate::transform;
use crate::types::{BorderPolicy, Page, PanelRegion};

/// Hard ceiling on merged strip height; webtoon sources can otherwise
/// produce images no decoder will accept.
const MAX_MERGED_HEIGHT: u32 = 131_072;
/// A row is blank when at least this fraction of it is background.
const BLANK_ROW_FRACTION: f64 = 0.99;
/// Gray-level distance from the detected background shade still counted
/// as background.
const BLANK_TOLERANCE: u8 = 25;
/// How far a cut may wander from its equal-spacing target, as a fraction
/// of the band height.
const SNAP_WINDOW: f64 = 0.10;

/// Stacks pages vertically into a single strip.
///
/// All pages are refit to the modal width of the batch before stacking so
/// slices cut at different widths line up. Fails when the stack would
/// exceed the decoder-safe height ceiling.
pub fn merge_vertical(pages: Vec<Page>) -> Result<Page> {
    let first = match pages.first() {
        Some(page) => page.clone(),
        None => return Err(Error::NotFound("no pages to merge".to_string())),
    };

    let mut width_votes: std::collections::HashMap<u32, usize> = std::collections::HashMap::new();
    for page in &pages {
        *width_votes.entry(page.image.width()).or_insert(0) += 1;
    }
    let modal_width = width_votes
        .into_iter()
        .max_by_key(|&(width, count)| (count, width))
        .map(|(width, _)| width)
        .unwrap_or(first.image.width());

    let refit: Vec<DynamicImage> = pages
        .into_iter()
        .map(|page| {
            if page.image.width() == modal_width {
                page.image
            } else {
                let scaled_height = (page.image.height() as u64 * modal_width as u64
                    / page.image.width().max(1) as u64) as u32;
                page.image
                    .resize_exact(modal_width, scaled_height.max(1), FilterType::CatmullRom)
            }
        })
        .collect();

    let total_height: u64 = refit.iter().map(|img| img.height() as u64).sum();
    if total_height > MAX_MERGED_HEIGHT as u64 {
        return Err(Error::Unsupported(format!(
            "merged strip would be {} pixels tall (limit {})",
            total_height, MAX_MERGED_HEIGHT
        )));
    }

    let mut strip = image::RgbaImage::new(modal_width, total_height as u32);
    let mut offset = 0u32;
    for img in refit {
        strip.copy_from(&img.to_rgba8(), 0, offset)?;
        offset += img.height();
    }

    let mut merged = first.derive(DynamicImage::ImageRgba8(strip), 0);
    merged.source_name = format!("{}+merged", merged.source_name);
    Ok(merged)
}

fn row_is_blank(gray: &GrayImage, y: u32, background: u8) -> bool {
    let w = gray.width();
    if w == 0 {
        return true;
    }
    let matching = (0..w)
        .filter(|&x| gray.get_pixel(x, y)[0].abs_diff(background) <= BLANK_TOLERANCE)
        .count();
    matching as f64 / w as f64 >= BLANK_ROW_FRACTION
}

/// Computes the horizontal band layout for a page.
///
/// Starts from `tiles` equal bands and snaps each interior cut to the
/// closest blank row within the snap window; when no blank row is close,
/// the equal-spacing cut stands. Blankness is measured against the
/// detected background shade, so dark-background strips snap to their
/// gutters too. Always returns exactly `tiles` regions covering the full
/// height.
pub fn panel_bands(gray: &GrayImage, tiles: u8) -> Vec<PanelRegion> {
    let h = gray.height();
    let tiles = tiles.max(1) as u32;
    if tiles == 1 || h < tiles {
        return vec![PanelRegion { y: 0, height: h }];
    }

    let background = transform::detect_border_color(gray, BorderPolicy::Auto);
    let band = h / tiles;
    let window = ((band as f64) * SNAP_WINDOW) as u32;
    let mut cuts: Vec<u32> = Vec::with_capacity(tiles as usize - 1);
    for i in 1..tiles {
        let target = i * band;
        let lo = target.saturating_sub(window).max(1);
        let hi = (target + window).min(h - 1);
        let snapped = (lo..=hi)
            .filter(|&y| row_is_blank(gray, y, background))
            .min_by_key(|&y| y.abs_diff(target))
            .unwrap_or(target);
        cuts.push(snapped);
    }
    cuts.dedup();

    let mut regions = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0u32;
    for cut in cuts {
        if cut > start {
            regions.push(PanelRegion {
                y: start,
                height: cut - start,
            });
            start = cut;
        }
    }
    regions.push(PanelRegion {
        y: start,
        height: h - start,
    });
    regions
}

/// Replaces one page with its panel sub-pages.
///
/// Each band is cut out, rescaled to fit the device box, and assigned the
/// next sub-order slot after the page's own; the source page's layout
/// records the band geometry. With `panel_tiles == 0` the page passes
/// through untouched.
pub fn decompose(
    page: Page,
    profile: &DeviceProfile,
    upscale: bool,
    debug_dir: Option<&Path>,
) -> Result<Vec<Page>> {
    if profile.panel_tiles == 0 {
        return Ok(vec![page]);
    }

    let gray = page.image.to_luma8();
    let regions = panel_bands(&gray, profile.panel_tiles);
    if regions.len() <= 1 {
        return Ok(vec![page]);
    }

    let base_sub = page.sub_index * regions.len();
    let mut panels = Vec::with_capacity(regions.len());
    for (i, region) in regions.iter().enumerate() {
        let band = page
            .image
            .crop_imm(0, region.y, page.image.width(), region.height);
        let band = transform::resize_to_profile(band, profile, upscale, false);
        let mut panel = page.derive(band, base_sub + i);
        panel.layout.panel_regions = vec![*region];
        panel.layout.target_width = panel.image.width();
        panel.layout.target_height = panel.image.height();
        if let Some(dir) = debug_dir {
            let name = format!("{}.panel{}.png", page.source_name, i);
            panel.image.save(dir.join(name))?;
        }
        panels.push(panel);
    }
    Ok(panels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile;
    use image::Luma;

    fn gray_page(w: u32, h: u32, shade: u8) -> Page {
        Page::new(
            DynamicImage::ImageLuma8(GrayImage::from_pixel(w, h, Luma([shade]))),
            "p.png".to_string(),
            0,
        )
    }

    #[test]
    fn merge_uses_modal_width_and_stacks() {
        let pages = vec![
            gray_page(400, 100, 200),
            gray_page(400, 150, 200),
            gray_page(200, 100, 200),
        ];
        let merged = merge_vertical(pages).unwrap();
        assert_eq!(merged.image.width(), 400);
        // The 200-wide slice is refit to 400 wide, doubling its height.
        assert_eq!(merged.image.height(), 100 + 150 + 200);
    }

    #[test]
    fn merge_refuses_decoder_hostile_heights() {
        let pages = vec![gray_page(10, 100_000, 255), gray_page(10, 40_000, 255)];
        assert!(matches!(
            merge_vertical(pages),
            Err(Error::Unsupported(_))
        ));
    }

    /// White page with dark content columns on every row except `gutter`.
    fn gutter_page(w: u32, h: u32, background: u8, content: u8, gutter: u32) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([background]));
        for y in 0..h {
            if y == gutter {
                continue;
            }
            for x in w / 10..w - w / 10 {
                img.put_pixel(x, y, Luma([content]));
            }
        }
        img
    }

    #[test]
    fn bands_snap_to_blank_rows() {
        // Content everywhere except a single gutter near the halfway mark.
        let img = gutter_page(100, 400, 255, 0, 215);
        let bands = panel_bands(&img, 2);
        assert_eq!(bands.len(), 2);
        assert_eq!(bands[0].y, 0);
        assert_eq!(bands[0].height, 215);
        assert_eq!(bands[1].y, 215);
        assert_eq!(bands[1].height, 185);
    }

    #[test]
    fn bands_snap_on_dark_backgrounds() {
        // Dark-mode strip: bright panels separated by a dark gutter.
        let img = gutter_page(100, 400, 30, 220, 215);
        let bands = panel_bands(&img, 2);
        assert_eq!(bands.len(), 2);
        assert_eq!(bands[0].height, 215);
        assert_eq!(bands[1].height, 185);
    }

    #[test]
    fn bands_cover_full_height_without_blank_rows() {
        // Vertical stripes: every row half dark, half bright, so no row
        // matches the averaged background shade.
        let mut img = GrayImage::new(100, 401);
        for y in 0..401 {
            for x in 0..100 {
                img.put_pixel(x, y, Luma([if x % 2 == 0 { 0 } else { 255 }]));
            }
        }
        let bands = panel_bands(&img, 4);
        let total: u32 = bands.iter().map(|b| b.height).sum();
        assert_eq!(total, 401);
        assert_eq!(bands.len(), 4);
    }

    #[test]
    fn decompose_replaces_page_with_ordered_panels() {
        let device = profile::resolve("KV", 0, 0).unwrap();
        let mut page = gray_page(800, 2000, 128);
        page.original_index = 3;
        let panels = decompose(page, &device, false, None).unwrap();
        assert_eq!(panels.len(), device.panel_tiles as usize);
        for (i, panel) in panels.iter().enumerate() {
            assert_eq!(panel.original_index, 3);
            assert_eq!(panel.sub_index, i);
            assert_eq!(panel.layout.panel_regions.len(), 1);
            assert!(panel.image.height() <= device.height);
        }
    }

    #[test]
    fn decompose_passes_through_without_tiles() {
        let device = profile::resolve("KoG", 0, 0).unwrap();
        assert_eq!(device.panel_tiles, 0);
        let panels = decompose(gray_page(800, 2000, 128), &device, false, None).unwrap();
        assert_eq!(panels.len(), 1);
    }
}
