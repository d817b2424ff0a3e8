//! Common test utilities for the Tankobon crate.
//!
//! Provides functions for setting up isolated test directories, creating
//! synthetic page images on disk and in memory, and inspecting generated
//! archives.

use image::{DynamicImage, GrayImage, Luma};
use rand::{Rng, distributions::Alphanumeric};
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tankobon::prelude::*;
use tokio::fs;
use zip::ZipArchive;

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";

/// Creates a clean, uniquely named test directory with source and target
/// subdirectories. Returns the base, source and target paths.
#[allow(dead_code)]
pub async fn setup_test_dirs(sub_path: &str) -> (PathBuf, PathBuf, PathBuf) {
    let rand_string: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let test_dir = PathBuf::from(TEST_TMP_DIR).join(format!("{}-{}", sub_path, rand_string));
    if test_dir.exists() {
        fs::remove_dir_all(&test_dir).await.unwrap();
    }
    let source_dir = test_dir.join("source");
    let target_dir = test_dir.join("target");
    fs::create_dir_all(&source_dir).await.unwrap();
    fs::create_dir_all(&target_dir).await.unwrap();
    (test_dir, source_dir, target_dir)
}

/// Encodes a uniform grayscale page to PNG bytes.
#[allow(dead_code)]
pub fn png_page(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([shade])));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Encodes a wide spread whose left half is white and right half black,
/// so split ordering is observable after conversion.
#[allow(dead_code)]
pub fn png_spread(width: u32, height: u32) -> Vec<u8> {
    let mut img = GrayImage::from_pixel(width, height, Luma([255u8]));
    for y in 0..height {
        for x in width / 2..width {
            img.put_pixel(x, y, Luma([0u8]));
        }
    }
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Writes a uniform grayscale PNG page to disk.
#[allow(dead_code)]
pub async fn write_page(path: &Path, width: u32, height: u32, shade: u8) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.unwrap();
    }
    fs::write(path, png_page(width, height, shade)).await.unwrap();
}

/// Builds an in-memory page source from `(name, group, bytes)` triples.
#[allow(dead_code)]
pub fn memory_source(name: &str, images: Vec<(&str, Option<&str>, Vec<u8>)>) -> MemorySource {
    MemorySource {
        name: name.to_string(),
        images: images
            .into_iter()
            .map(|(name, group, bytes)| SourceImage {
                name: name.to_string(),
                group: group.map(String::from),
                bytes,
            })
            .collect(),
    }
}

/// Lists entry names of a zip archive in stored order.
#[allow(dead_code)]
pub fn zip_entries(path: &Path) -> Vec<String> {
    let file = File::open(path).unwrap();
    let mut archive = ZipArchive::new(file).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Reads one entry of a zip archive.
#[allow(dead_code)]
pub fn zip_entry_bytes(path: &Path, name: &str) -> Vec<u8> {
    let file = File::open(path).unwrap();
    let mut archive = ZipArchive::new(file).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut bytes = Vec::new();
    std::io::copy(&mut entry, &mut bytes).unwrap();
    bytes
}

/// Shorthand for a config builder pre-wired to the test directories.
#[allow(dead_code)]
pub fn base_config(source: &Path, target: &Path, title: &str) -> TankobonConfigBuilder {
    let mut builder = TankobonConfig::builder();
    builder
        .metadata(EbookMetadata::default_with_title(title.to_string()))
        .source_path(source.to_path_buf())
        .target_path(target.to_path_buf())
        .create_output_directory(false)
        .page_encoding(PageEncoding::Png);
    builder
}
