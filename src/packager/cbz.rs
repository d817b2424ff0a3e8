use crate::error::{Error, Result};
use crate::packager::Packager;
use crate::types::{Direction, Package, ProcessedPage};
use async_trait::async_trait;
use chrono::prelude::*;
use memmap2::MmapOptions;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Packager for CBZ (Comic Book ZIP) output.
///
/// Pages land as sequentially numbered entries; a ComicInfo.xml carries
/// the volume metadata and non-image sidecar files are copied through
/// verbatim at the archive root.
pub struct CbzPackager {
    zip: Option<ZipWriter<File>>,
    options: SimpleFileOptions,
    page_index: usize,
    path: PathBuf,
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

impl CbzPackager {
    /// Renders and embeds the ComicInfo.xml metadata entry.
    pub async fn write_metadata(&mut self, package: &Package) -> Result<&mut Self> {
        const TEMPLATE: &str = include_str!("../../templates/ComicInfo.xml");

        let metadata = &package.metadata;
        let mut xml = TEMPLATE.to_string();
        xml = xml.replace("%title%", &escape_xml(&package.volume.title));
        xml = xml.replace(
            "%series%",
            &escape_xml(metadata.series.as_deref().unwrap_or(&metadata.title)),
        );
        xml = xml.replace("%volume%", &(package.volume.index + 1).to_string());
        xml = xml.replace("%pagecount%", &package.volume.pages.len().to_string());
        xml = xml.replace(
            "%description%",
            &escape_xml(metadata.description.as_deref().unwrap_or("")),
        );
        xml = xml.replace("%language%", &escape_xml(&metadata.language));
        xml = xml.replace(
            "%publisher%",
            &escape_xml(metadata.publisher.as_deref().unwrap_or("")),
        );
        xml = xml.replace(
            "%identifier%",
            &escape_xml(metadata.identifier.as_deref().unwrap_or("")),
        );
        xml = xml.replace("%writer%", &escape_xml(&metadata.authors.join(", ")));
        xml = xml.replace(
            "%manga%",
            match package.reading_direction {
                Direction::Rtl => "YesAndRightToLeft",
                Direction::Ltr => "No",
            },
        );

        let release_date = metadata.release_date.unwrap_or_else(Utc::now);
        xml = xml.replace("%year%", &release_date.year().to_string());
        xml = xml.replace("%month%", &release_date.month().to_string());
        xml = xml.replace("%day%", &release_date.day().to_string());

        // Custom fields go into Notes as key-value lines.
        let notes: String = metadata
            .custom_fields
            .iter()
            .map(|(key, value)| format!("{}: {}", escape_xml(key), escape_xml(value)))
            .collect::<Vec<_>>()
            .join("\n");
        xml = xml.replace("%notes%", &notes);

        let zip = self
            .zip
            .as_mut()
            .ok_or_else(|| Error::Unsupported("Zip writer not available".to_string()))?;
        zip.start_file("ComicInfo.xml", self.options)?;
        zip.write_all(xml.as_bytes())?;
        Ok(self)
    }

    /// Copies a non-image sidecar file into the archive root, memory-mapped
    /// so large files never pass through an intermediate buffer.
    pub async fn add_sidecar(&mut self, path: &Path) -> Result<&mut Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                Error::InvalidPath(path.to_path_buf(), "sidecar has no filename".to_string())
            })?;

        let file = tokio::fs::File::open(path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open sidecar '{}': {}", path.display(), e),
            ))
        })?;
        let file_std = file.into_std().await;
        let mmap = spawn_blocking(move || unsafe { MmapOptions::new().map(&file_std) })
            .await
            .map_err(|e| Error::AsyncTaskError(e.to_string()))??;

        let zip = self
            .zip
            .as_mut()
            .ok_or_else(|| Error::Unsupported("Zip writer not available".to_string()))?;
        zip.start_file(name, self.options)?;
        zip.write_all(&mmap[..])?;
        Ok(self)
    }
}

#[async_trait]
impl Packager for CbzPackager {
    fn new(package: &Package) -> Result<Self> {
        let options: SimpleFileOptions = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o755);

        if let Some(parent) = package.output_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&package.output_path)?;

        Ok(CbzPackager {
            zip: Some(ZipWriter::new(file)),
            options,
            page_index: 0,
            path: package.output_path.clone(),
        })
    }

    async fn add_page(&mut self, page: &ProcessedPage) -> Result<&mut Self> {
        let file_name = format!(
            "page_{:03}.{}",
            self.page_index + 1,
            page.encoding.extension()
        );

        let zip = self
            .zip
            .as_mut()
            .ok_or_else(|| Error::Unsupported("Zip writer not available".to_string()))?;
        zip.start_file(file_name, self.options)?;
        zip.write_all(&page.bytes)?;

        self.page_index += 1;
        Ok(self)
    }

    async fn finish(mut self) -> Result<PathBuf> {
        let zip = self
            .zip
            .take()
            .ok_or_else(|| Error::Unsupported("Zip writer not available".to_string()))?;

        spawn_blocking(move || zip.finish().map(|_| ()).map_err(Error::Zip))
            .await
            .map_err(|e| Error::AsyncTaskError(e.to_string()))??;
        Ok(self.path)
    }
}
