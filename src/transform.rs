//! Per-page image transforms: border cropping, gamma correction, resizing
//! and double-page splitting.
//!
//! Transforms are pure pixel operations with no I/O; decode and encode sit
//! at the module edge as the codec collaborator boundary. Every operation
//! consumes its page and returns replacements, so a split never aliases
//! pixel buffers.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, GenericImageView, GrayImage, ImageEncoder};
use rayon::prelude::*;
use std::io::Cursor;

use crate::error::{Error, Result};
use crate::events::CancelToken;
use crate::profile::DeviceProfile;
use crate::types::{
    BorderPolicy, ColorPolicy, CropBox, CroppingMode, GammaPolicy, Page, PageEncoding,
    SplitterMode, SpreadPart,
};

/// Inset in pixels when sampling corners for border color detection.
const CORNER_INSET: u32 = 3;
/// Base gray-level tolerance scaled by the cropping power.
const CROP_BASE_TOLERANCE: f32 = 16.0;
/// A row/column counts as border when at least this fraction of its
/// pixels matches the border color.
const BORDER_ROW_FRACTION: f64 = 0.995;
/// Fraction of the page height treated as the page-number strip.
const PAGE_NUMBER_STRIP: f64 = 0.06;
/// Maximum dark-ink fraction for a strip row to still be croppable.
const PAGE_NUMBER_INK_LIMIT: f64 = 0.02;
/// Luminance midpoint targeted by automatic gamma.
const AUTO_GAMMA_TARGET: f32 = 0.45;

/// Immutable per-run transform settings, resolved from the configuration
/// and the device profile before any page is touched.
#[derive(Debug, Clone)]
pub struct TransformOptions {
    pub cropping: CroppingMode,
    pub border: BorderPolicy,
    pub cropping_power: f32,
    /// Floor fraction of the original area below which cropping is skipped.
    pub cropping_minimum: f32,
    pub gamma: GammaPolicy,
    pub splitter: SplitterMode,
    pub color: ColorPolicy,
    pub upscale: bool,
    pub stretch: bool,
    /// Right-to-left reading order; reverses split-half ordering.
    pub manga: bool,
}

/// Applies the full per-page transform chain.
///
/// Order is fixed: spread splitting first (halves are then treated as
/// independent pages), then crop, gamma correction and resizing on each
/// resulting page. Returns one page, two halves, or three pages (rotated
/// spread plus halves) depending on the splitter mode. The cancel token
/// is observed between stages so an aborted run stops mid-page.
pub fn transform_page(
    page: Page,
    opts: &TransformOptions,
    profile: &DeviceProfile,
    cancel: &CancelToken,
) -> Result<Vec<Page>> {
    let pages = split_spread(page, opts.splitter, opts.manga);
    let mut out = Vec::with_capacity(pages.len());
    for mut page in pages {
        page.image = match opts.color {
            ColorPolicy::Grayscale => DynamicImage::ImageLuma8(page.image.into_luma8()),
            ColorPolicy::ForceColor => page.image,
        };
        if opts.cropping != CroppingMode::Disabled {
            let gray = page.image.to_luma8();
            if let Some(cropped) = crop_box(
                &gray,
                opts.border,
                opts.cropping,
                opts.cropping_power,
                opts.cropping_minimum,
            ) {
                page.image = page
                    .image
                    .crop_imm(cropped.x, cropped.y, cropped.width, cropped.height);
                page.layout.cropped_box = Some(cropped);
            }
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let gamma = match opts.gamma {
            GammaPolicy::Fixed(g) => g,
            GammaPolicy::Auto => auto_gamma(&page.image.to_luma8()),
        };
        page.image = apply_gamma(page.image, gamma);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        page.image = resize_to_profile(page.image, profile, opts.upscale, opts.stretch);
        page.layout.target_width = page.image.width();
        page.layout.target_height = page.image.height();
        out.push(page);
    }
    Ok(out)
}

/// Detects the dominant border shade of the page.
pub fn detect_border_color(gray: &GrayImage, policy: BorderPolicy) -> u8 {
    match policy {
        BorderPolicy::Black => 0,
        BorderPolicy::White => 255,
        BorderPolicy::Auto => {
            let (w, h) = gray.dimensions();
            if w <= 2 * CORNER_INSET || h <= 2 * CORNER_INSET {
                return 255;
            }
            let corners = [
                (CORNER_INSET, CORNER_INSET),
                (w - 1 - CORNER_INSET, CORNER_INSET),
                (CORNER_INSET, h - 1 - CORNER_INSET),
                (w - 1 - CORNER_INSET, h - 1 - CORNER_INSET),
            ];
            let sum: u32 = corners.iter().map(|&(x, y)| gray.get_pixel(x, y)[0] as u32).sum();
            (sum / corners.len() as u32) as u8
        }
    }
}

fn row_match_count(gray: &GrayImage, y: u32, border: u8, tolerance: u8) -> u32 {
    (0..gray.width())
        .filter(|&x| gray.get_pixel(x, y)[0].abs_diff(border) <= tolerance)
        .count() as u32
}

fn col_match_count(gray: &GrayImage, x: u32, border: u8, tolerance: u8) -> u32 {
    (0..gray.height())
        .filter(|&y| gray.get_pixel(x, y)[0].abs_diff(border) <= tolerance)
        .count() as u32
}

/// Computes the largest interior bounding box whose surrounding rows and
/// columns match the detected border color.
///
/// Returns `None` when cropping should be skipped: nothing to trim, the
/// page is entirely border, or the interior box falls below the minimum
/// area ratio (the fail-safe against over-cropping sparse art).
pub fn crop_box(
    gray: &GrayImage,
    border_policy: BorderPolicy,
    mode: CroppingMode,
    power: f32,
    minimum_ratio: f32,
) -> Option<CropBox> {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let border = detect_border_color(gray, border_policy);
    let tolerance = (CROP_BASE_TOLERANCE * power.max(0.0)).min(128.0) as u8;

    let strip_rows = ((h as f64) * PAGE_NUMBER_STRIP) as u32;
    // Ink budget in whole pixels; a fractional compare rejects rows
    // sitting exactly at the limit.
    let ink_limit = ((w as f64) * PAGE_NUMBER_INK_LIMIT).ceil() as u32;
    let row_croppable = |y: u32| -> bool {
        let matching = row_match_count(gray, y, border, tolerance);
        if matching as f64 / w as f64 >= BORDER_ROW_FRACTION {
            return true;
        }
        // Isolated page-number marks near the page edge are croppable too.
        if mode == CroppingMode::MarginsAndPageNumbers
            && (y < strip_rows || y >= h - strip_rows.min(h))
        {
            return w - matching <= ink_limit;
        }
        false
    };

    // Border classification per row/column is independent; scan in
    // parallel, then walk in from the edges.
    let rows: Vec<bool> = (0..h).into_par_iter().map(row_croppable).collect();
    let cols: Vec<bool> = (0..w)
        .into_par_iter()
        .map(|x| col_match_count(gray, x, border, tolerance) as f64 / h as f64 >= BORDER_ROW_FRACTION)
        .collect();

    let top = rows.iter().take_while(|&&b| b).count() as u32;
    let bottom = rows.iter().rev().take_while(|&&b| b).count() as u32;
    let left = cols.iter().take_while(|&&b| b).count() as u32;
    let right = cols.iter().rev().take_while(|&&b| b).count() as u32;

    if top + bottom >= h || left + right >= w {
        return None;
    }
    if top == 0 && bottom == 0 && left == 0 && right == 0 {
        return None;
    }

    let cropped = CropBox {
        x: left,
        y: top,
        width: w - left - right,
        height: h - top - bottom,
    };
    let ratio =
        (cropped.width as f64 * cropped.height as f64) / (w as f64 * h as f64);
    if ratio < minimum_ratio as f64 {
        return None;
    }
    Some(cropped)
}

/// Derives a gamma value from the page's luminance histogram, targeting a
/// canonical midpoint. Pages already near the target keep gamma 1.0.
pub fn auto_gamma(gray: &GrayImage) -> f32 {
    let mut histogram = [0u32; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }
    let total: u32 = histogram.iter().sum();
    if total == 0 {
        return 1.0;
    }
    let mut seen = 0u32;
    let mut median = 0usize;
    for (value, &count) in histogram.iter().enumerate() {
        seen += count;
        if seen * 2 >= total {
            median = value;
            break;
        }
    }
    let normalized = (median as f32 + 1.0) / 256.0;
    if normalized >= 0.999 {
        return 1.0;
    }
    let gamma = AUTO_GAMMA_TARGET.ln() / normalized.ln();
    let gamma = gamma.clamp(0.5, 3.0);
    if (gamma - 1.0).abs() < 0.05 { 1.0 } else { gamma }
}

/// Applies a power-law transform on normalized pixel intensity.
pub fn apply_gamma(image: DynamicImage, gamma: f32) -> DynamicImage {
    if (gamma - 1.0).abs() < f32::EPSILON {
        return image;
    }
    let lut: Vec<u8> = (0..256u32)
        .map(|v| ((v as f32 / 255.0).powf(gamma) * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();
    match image {
        DynamicImage::ImageLuma8(mut img) => {
            img.pixels_mut().for_each(|p| p[0] = lut[p[0] as usize]);
            DynamicImage::ImageLuma8(img)
        }
        other => {
            let mut img = other.into_rgb8();
            img.pixels_mut().for_each(|p| {
                p[0] = lut[p[0] as usize];
                p[1] = lut[p[1] as usize];
                p[2] = lut[p[2] as usize];
            });
            DynamicImage::ImageRgb8(img)
        }
    }
}

/// Resizes a page against the profile's target box.
///
/// Shrinks to fit when larger; enlarges (preserving aspect, never beyond
/// the box) only when `upscale` is set; `stretch` fills the box exactly,
/// disregarding aspect ratio.
pub fn resize_to_profile(
    image: DynamicImage,
    profile: &DeviceProfile,
    upscale: bool,
    stretch: bool,
) -> DynamicImage {
    let (w, h) = image.dimensions();
    if stretch {
        return image.resize_exact(
            profile.width,
            profile.height,
            image::imageops::FilterType::Lanczos3,
        );
    }
    let larger = w > profile.width || h > profile.height;
    if larger || (upscale && (w < profile.width && h < profile.height)) {
        return image.resize(
            profile.width,
            profile.height,
            image::imageops::FilterType::Lanczos3,
        );
    }
    image
}

/// True when the page's aspect ratio indicates a double-page spread.
pub fn is_spread(width: u32, height: u32) -> bool {
    width > height
}

/// Replaces a spread page according to the splitter mode.
///
/// Mode `Split` cuts vertically into two pages in reading order (right
/// half first under manga mode); `Rotate` turns the spread into a single
/// tall page; `Both` yields the rotated representation followed by the two
/// halves, leaving the choice to packaging. Non-spread pages and
/// `Disabled` pass through unchanged.
pub fn split_spread(page: Page, mode: SplitterMode, manga: bool) -> Vec<Page> {
    let (w, h) = page.image.dimensions();
    if mode == SplitterMode::Disabled || !is_spread(w, h) {
        return vec![page];
    }

    let halves = |page: &Page, base_sub: usize| -> Vec<Page> {
        let left_width = w / 2;
        let left = page.image.crop_imm(0, 0, left_width, h);
        let right = page.image.crop_imm(left_width, 0, w - left_width, h);
        let (first, second) = if manga { (right, left) } else { (left, right) };
        let mut first = page.derive(first, base_sub);
        first.layout.spread_part = SpreadPart::FirstHalf;
        let mut second = page.derive(second, base_sub + 1);
        second.layout.spread_part = SpreadPart::SecondHalf;
        vec![first, second]
    };

    let rotated = |page: &Page, sub: usize| -> Page {
        let image = if manga {
            page.image.rotate270()
        } else {
            page.image.rotate90()
        };
        let mut rotated = page.derive(image, sub);
        rotated.layout.spread_part = SpreadPart::Rotated;
        rotated
    };

    match mode {
        SplitterMode::Split => halves(&page, 0),
        SplitterMode::Rotate => vec![rotated(&page, 0)],
        SplitterMode::Both => {
            let mut pages = vec![rotated(&page, 0)];
            pages.extend(halves(&page, 1));
            pages
        }
        SplitterMode::Disabled => unreachable!(),
    }
}

// --- Codec collaborator boundary ---

/// Decodes raw image bytes into a pixel buffer.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(Error::Image)
}

/// Encodes a pixel buffer with the given page encoding.
pub fn encode(image: &DynamicImage, encoding: PageEncoding) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    match encoding {
        PageEncoding::Jpeg { quality } => {
            // JPEG has no grayscale-with-alpha or 16-bit path; normalize.
            let (data, color): (Vec<u8>, ExtendedColorType) = match image {
                DynamicImage::ImageLuma8(img) => (img.as_raw().clone(), ExtendedColorType::L8),
                other => (other.to_rgb8().into_raw(), ExtendedColorType::Rgb8),
            };
            let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), quality);
            encoder.write_image(&data, image.width(), image.height(), color)?;
        }
        PageEncoding::Png => {
            let (data, color): (Vec<u8>, ExtendedColorType) = match image {
                DynamicImage::ImageLuma8(img) => (img.as_raw().clone(), ExtendedColorType::L8),
                other => (other.to_rgb8().into_raw(), ExtendedColorType::Rgb8),
            };
            let encoder = PngEncoder::new(Cursor::new(&mut bytes));
            encoder.write_image(&data, image.width(), image.height(), color)?;
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile;
    use image::{GenericImage, Luma, Rgba};

    fn page_from(image: DynamicImage, name: &str, index: usize) -> Page {
        Page::new(image, name.to_string(), index)
    }

    /// White page with a centered dark content block.
    fn bordered_page(w: u32, h: u32, margin: u32) -> DynamicImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([255u8]));
        for y in margin..h - margin {
            for x in margin..w - margin {
                img.put_pixel(x, y, Luma([40u8]));
            }
        }
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn detects_white_and_black_borders() {
        let white = GrayImage::from_pixel(50, 50, Luma([250u8]));
        let black = GrayImage::from_pixel(50, 50, Luma([5u8]));
        assert!(detect_border_color(&white, BorderPolicy::Auto) > 200);
        assert!(detect_border_color(&black, BorderPolicy::Auto) < 50);
        assert_eq!(detect_border_color(&white, BorderPolicy::Black), 0);
    }

    #[test]
    fn crops_uniform_margins() {
        let page = bordered_page(200, 300, 20);
        let cropped = crop_box(
            &page.to_luma8(),
            BorderPolicy::Auto,
            CroppingMode::Margins,
            1.0,
            0.0,
        )
        .expect("margins should be cropped");
        assert_eq!(cropped.x, 20);
        assert_eq!(cropped.y, 20);
        assert_eq!(cropped.width, 160);
        assert_eq!(cropped.height, 260);
    }

    #[test]
    fn minimum_area_ratio_guards_sparse_art() {
        // Tiny content block: cropping would keep ~1% of the page.
        let mut img = GrayImage::from_pixel(200, 200, Luma([255u8]));
        for y in 95..105 {
            for x in 95..105 {
                img.put_pixel(x, y, Luma([0u8]));
            }
        }
        let result = crop_box(&img, BorderPolicy::Auto, CroppingMode::Margins, 1.0, 0.5);
        assert!(result.is_none(), "crop below minimum area must be skipped");
        // With no floor the same page crops aggressively.
        assert!(crop_box(&img, BorderPolicy::Auto, CroppingMode::Margins, 1.0, 0.0).is_some());
    }

    #[test]
    fn page_number_strip_is_croppable() {
        let mut img = bordered_page(200, 300, 20).to_luma8();
        // A small isolated mark inside the bottom margin, like a page number.
        for x in 98..102 {
            img.put_pixel(x, 292, Luma([0u8]));
        }
        // Margins-only mode stops at the mark.
        let margins = crop_box(&img, BorderPolicy::Auto, CroppingMode::Margins, 1.0, 0.0).unwrap();
        assert!(margins.y + margins.height > 280);
        // Page-number mode crops through it.
        let full = crop_box(
            &img,
            BorderPolicy::Auto,
            CroppingMode::MarginsAndPageNumbers,
            1.0,
            0.0,
        )
        .unwrap();
        assert_eq!(full.height, 260);
    }

    #[test]
    fn auto_gamma_brightens_dark_pages() {
        let dark = GrayImage::from_pixel(100, 100, Luma([40u8]));
        let gamma = auto_gamma(&dark);
        assert!(gamma < 1.0, "dark page should get gamma < 1, got {}", gamma);

        let balanced = GrayImage::from_pixel(100, 100, Luma([115u8]));
        assert_eq!(auto_gamma(&balanced), 1.0);
    }

    #[test]
    fn gamma_lut_preserves_endpoints_and_order() {
        let mut img = GrayImage::new(3, 1);
        img.put_pixel(0, 0, Luma([0u8]));
        img.put_pixel(1, 0, Luma([128u8]));
        img.put_pixel(2, 0, Luma([255u8]));
        let out = apply_gamma(DynamicImage::ImageLuma8(img), 0.7).to_luma8();
        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(2, 0)[0], 255);
        assert!(out.get_pixel(1, 0)[0] > 128, "gamma < 1 brightens midtones");
    }

    #[test]
    fn stretch_fills_target_exactly() {
        let profile = profile::resolve("KV", 0, 0).unwrap();
        let img = DynamicImage::ImageLuma8(GrayImage::new(300, 500));
        let out = resize_to_profile(img, &profile, false, true);
        assert_eq!((out.width(), out.height()), (profile.width, profile.height));
    }

    #[test]
    fn no_upscale_keeps_small_pages_untouched() {
        let profile = profile::resolve("KV", 0, 0).unwrap();
        let img = DynamicImage::ImageLuma8(GrayImage::new(300, 500));
        let out = resize_to_profile(img, &profile, false, false);
        assert_eq!((out.width(), out.height()), (300, 500));
    }

    #[test]
    fn upscale_never_exceeds_target_box() {
        let profile = profile::resolve("KV", 0, 0).unwrap();
        let img = DynamicImage::ImageLuma8(GrayImage::new(300, 500));
        let out = resize_to_profile(img, &profile, true, false);
        assert!(out.width() <= profile.width);
        assert!(out.height() <= profile.height);
        assert!(out.width() > 300 || out.height() > 500);
    }

    #[test]
    fn oversized_pages_shrink_to_fit() {
        let profile = profile::resolve("K578", 0, 0).unwrap();
        let img = DynamicImage::ImageLuma8(GrayImage::new(1200, 1600));
        let out = resize_to_profile(img, &profile, false, false);
        assert!(out.width() <= profile.width);
        assert!(out.height() <= profile.height);
    }

    #[test]
    fn split_round_trip_reconstructs_spread() {
        // Distinct halves so reassembly order is observable.
        let mut img = image::RgbaImage::from_pixel(400, 200, Rgba([255, 255, 255, 255]));
        for y in 0..200 {
            for x in 0..200 {
                img.put_pixel(x, y, Rgba([200, 0, 0, 255]));
            }
        }
        let spread = DynamicImage::ImageRgba8(img);
        let page = page_from(spread.clone(), "spread.png", 0);
        let halves = split_spread(page, SplitterMode::Split, false);
        assert_eq!(halves.len(), 2);

        let mut rebuilt = image::RgbaImage::new(400, 200);
        rebuilt.copy_from(&halves[0].image.to_rgba8(), 0, 0).unwrap();
        rebuilt
            .copy_from(&halves[1].image.to_rgba8(), halves[0].image.width(), 0)
            .unwrap();
        assert_eq!(rebuilt, spread.to_rgba8());
    }

    #[test]
    fn manga_mode_orders_right_half_first() {
        let mut img = image::GrayImage::from_pixel(400, 200, Luma([255u8]));
        for y in 0..200 {
            for x in 200..400 {
                img.put_pixel(x, y, Luma([0u8]));
            }
        }
        let page = page_from(DynamicImage::ImageLuma8(img), "spread.png", 4);
        let halves = split_spread(page, SplitterMode::Split, true);
        // Right (dark) half must come first in reading order.
        assert_eq!(halves[0].image.to_luma8().get_pixel(10, 10)[0], 0);
        assert_eq!(halves[1].image.to_luma8().get_pixel(10, 10)[0], 255);
        assert_eq!(halves[0].sub_index, 0);
        assert_eq!(halves[1].sub_index, 1);
        assert_eq!(halves[0].original_index, 4);
    }

    #[test]
    fn both_mode_yields_rotated_plus_halves() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(400, 200));
        let page = page_from(img, "spread.png", 0);
        let pages = split_spread(page, SplitterMode::Both, false);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].layout.spread_part, SpreadPart::Rotated);
        assert_eq!(pages[0].image.width(), 200);
        assert_eq!(pages[0].image.height(), 400);
        assert_eq!(pages[1].layout.spread_part, SpreadPart::FirstHalf);
        assert_eq!(pages[2].layout.spread_part, SpreadPart::SecondHalf);
    }

    #[test]
    fn tall_pages_pass_through_splitter() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(200, 400));
        let page = page_from(img, "tall.png", 0);
        let pages = split_spread(page, SplitterMode::Split, false);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].layout.spread_part, SpreadPart::Whole);
    }

    #[test]
    fn encode_decode_round_trip() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(50, 60, Luma([128u8])));
        let png = encode(&img, PageEncoding::Png).unwrap();
        let decoded = decode(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (50, 60));
        let jpeg = encode(&img, PageEncoding::Jpeg { quality: 85 }).unwrap();
        assert!(decode(&jpeg).is_ok());
    }

    #[test]
    fn corrupt_bytes_fail_decode() {
        assert!(decode(&[0u8, 1, 2, 3]).is_err());
    }

    #[test]
    fn transform_records_layout_metadata() {
        let profile = profile::resolve("K578", 0, 0).unwrap();
        let opts = TransformOptions {
            cropping: CroppingMode::Margins,
            border: BorderPolicy::Auto,
            cropping_power: 1.0,
            cropping_minimum: 0.0,
            gamma: GammaPolicy::Fixed(1.0),
            splitter: SplitterMode::Disabled,
            color: ColorPolicy::Grayscale,
            upscale: false,
            stretch: false,
            manga: false,
        };
        let page = page_from(bordered_page(200, 300, 20), "p1.png", 0);
        let out = transform_page(page, &opts, &profile, &CancelToken::new()).unwrap();
        assert_eq!(out.len(), 1);
        let layout = &out[0].layout;
        assert!(layout.cropped_box.is_some());
        assert_eq!(layout.target_width, out[0].image.width());
        assert_eq!(layout.target_height, out[0].image.height());
    }

    #[test]
    fn cancelled_token_aborts_transform() {
        let profile = profile::resolve("K578", 0, 0).unwrap();
        let opts = TransformOptions {
            cropping: CroppingMode::Disabled,
            border: BorderPolicy::Auto,
            cropping_power: 1.0,
            cropping_minimum: 0.0,
            gamma: GammaPolicy::Auto,
            splitter: SplitterMode::Disabled,
            color: ColorPolicy::Grayscale,
            upscale: false,
            stretch: false,
            manga: false,
        };
        let token = CancelToken::new();
        token.cancel();
        let page = page_from(bordered_page(100, 150, 10), "p1.png", 0);
        assert!(matches!(
            transform_page(page, &opts, &profile, &token),
            Err(Error::Cancelled)
        ));
    }
}
