//! Extraction boundary: turning a comic source into an ordered page list.
//!
//! Archive handling (CBZ/CBR/7z/PDF) is an external collaborator concern;
//! this crate only defines the [`PageSource`] contract plus a directory
//! implementation for already-extracted sources. Anything that can produce
//! an ordered list of `(filename, raw bytes)` can feed the pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio::fs::read_dir;
use tokio::spawn;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::path_utils::{compare_numeric, is_hidden, is_image_file};

/// Limits the number of concurrently scanned directories.
const MAX_CONCURRENT_DIRS: usize = 64;

/// One raw page image as delivered by extraction, before decoding.
#[derive(Debug, Clone)]
pub struct SourceImage {
    /// Original filename, kept as provenance through the pipeline.
    pub name: String,
    /// Top-level subdirectory the image came from, if any. Drives
    /// per-directory batch splitting.
    pub group: Option<String>,
    pub bytes: Vec<u8>,
}

/// Contract for extraction collaborators.
///
/// `extract` must return images in reading order; the pipeline preserves
/// this order through every later stage.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn extract(&self) -> Result<Vec<SourceImage>>;

    /// Human-readable identity of the source, used for default titles and
    /// skip-existing bookkeeping.
    fn identity(&self) -> String;
}

/// Reads pages from a directory tree: loose images at the root first, then
/// one group per immediate subdirectory, both in natural numeric order.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn image_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut paths = read_dir(dir).await?;
        while let Some(entry) = paths.next_entry().await? {
            let path = entry.path();
            if is_hidden(&path) || !path.is_file() || !is_image_file(&path) {
                continue;
            }
            entries.push(path);
        }
        entries.sort_by(|a, b| compare_numeric(a, b));
        Ok(entries)
    }

    async fn subdirectories(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut paths = read_dir(&self.root).await?;
        while let Some(entry) = paths.next_entry().await? {
            let path = entry.path();
            if path.is_dir() && !is_hidden(&path) {
                dirs.push(path);
            }
        }
        dirs.sort_by(|a, b| compare_numeric(a, b));
        Ok(dirs)
    }
}

#[async_trait]
impl PageSource for DirectorySource {
    async fn extract(&self) -> Result<Vec<SourceImage>> {
        if !self.root.is_dir() {
            return Err(Error::InvalidPath(
                self.root.clone(),
                "source is not a directory".to_string(),
            ));
        }

        // (ordering key, group) per directory to scan; root first.
        let mut dirs: Vec<(PathBuf, Option<String>)> = vec![(self.root.clone(), None)];
        for dir in self.subdirectories().await? {
            let group = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            dirs.push((dir, Some(group)));
        }

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_DIRS));
        let mut handles: Vec<JoinHandle<Result<(usize, Vec<SourceImage>)>>> = Vec::new();

        for (index, (dir, group)) in dirs.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            handles.push(spawn(async move {
                let _permit = semaphore.acquire().await?;
                let mut images = Vec::new();
                for path in Self::image_files(&dir).await? {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    let bytes = tokio::fs::read(&path).await.map_err(|e| Error::Page {
                        page: name.clone(),
                        reason: e.to_string(),
                    })?;
                    images.push(SourceImage {
                        name,
                        group: group.clone(),
                        bytes,
                    });
                }
                Ok((index, images))
            }));
        }

        let results = try_join_all(handles)
            .await
            .map_err(|e| Error::AsyncTaskError(format!("directory scan failed: {}", e)))?;

        // Re-join by directory index, never by completion order.
        let mut per_dir: Vec<Vec<SourceImage>> = vec![Vec::new(); results.len()];
        for res in results {
            let (index, images) = res?;
            per_dir[index] = images;
        }

        let images: Vec<SourceImage> = per_dir.into_iter().flatten().collect();
        if images.is_empty() {
            return Err(Error::NotFound(format!(
                "no page images found in {:?}",
                self.root
            )));
        }
        Ok(images)
    }

    fn identity(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.root.to_string_lossy().to_string())
    }
}

/// In-memory source, mainly for tests and callers that already hold
/// decoded archives.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub name: String,
    pub images: Vec<SourceImage>,
}

#[async_trait]
impl PageSource for MemorySource {
    async fn extract(&self) -> Result<Vec<SourceImage>> {
        if self.images.is_empty() {
            return Err(Error::NotFound("memory source is empty".to_string()));
        }
        Ok(self.images.clone())
    }

    fn identity(&self) -> String {
        self.name.clone()
    }
}
