//! Packager module: turning a finished [`Package`] into one output file.
//!
//! Each supported container implements the [`Packager`] trait; the
//! [`write_package`] dispatcher picks the implementation for the package's
//! format and drives the shared add-pages/finish sequence. The staged MOBI
//! path additionally involves an external ebook compiler and falls back to
//! EPUB when that collaborator is missing.

use crate::error::{Error, Result};
use crate::types::{FileFormat, Package, ProcessedPage};
use async_trait::async_trait;
use std::path::PathBuf;

pub mod cbz;
pub mod epub;
pub mod panelview;
pub mod staged;

pub use staged::{EbookCompiler, KindleGen};

/// Common interface for all output containers.
///
/// A packager is created per volume, fed the volume's pages in reading
/// order, and finished exactly once. Pages arrive already encoded; no
/// packager touches pixels.
#[async_trait]
pub trait Packager {
    /// Creates a packager writing to the package's output path.
    fn new(package: &Package) -> Result<Self>
    where
        Self: Sized;

    /// Appends one page to the container.
    async fn add_page(&mut self, page: &ProcessedPage) -> Result<&mut Self>
    where
        Self: Sized;

    /// Finalizes the container and returns the written path.
    async fn finish(self) -> Result<PathBuf>;
}

/// Result of writing one package: where the artifact landed and, when a
/// fallback format had to be used, why.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub fallback: Option<String>,
}

/// Writes a package with the container its format demands.
///
/// `sidecars` are non-image files copied through verbatim; only the CBZ
/// container carries them. `compiler` is consulted for staged MOBI output.
pub async fn write_package(
    package: &Package,
    sidecars: &[PathBuf],
    compiler: Option<&dyn EbookCompiler>,
) -> Result<WriteOutcome> {
    match package.format {
        FileFormat::Cbz => {
            let mut packager = cbz::CbzPackager::new(package)?;
            for page in &package.volume.pages {
                packager.add_page(page).await?;
            }
            // A ComicInfo.xml shipped with the source wins over the
            // generated one.
            let has_comic_info = sidecars
                .iter()
                .any(|p| p.file_name().is_some_and(|n| n.eq_ignore_ascii_case("ComicInfo.xml")));
            if !has_comic_info {
                packager.write_metadata(package).await?;
            }
            for sidecar in sidecars {
                packager.add_sidecar(sidecar).await?;
            }
            let path = packager.finish().await?;
            Ok(WriteOutcome {
                path,
                fallback: None,
            })
        }
        FileFormat::Epub => {
            let mut packager = epub::EpubPackager::new(package)?;
            for page in &package.volume.pages {
                packager.add_page(page).await?;
            }
            let path = packager.finish().await?;
            Ok(WriteOutcome {
                path,
                fallback: None,
            })
        }
        FileFormat::PanelView => {
            let mut packager = panelview::PanelViewPackager::new(package)?;
            for page in &package.volume.pages {
                packager.add_page(page).await?;
            }
            let path = packager.finish().await?;
            Ok(WriteOutcome {
                path,
                fallback: None,
            })
        }
        FileFormat::Mobi => staged::write_staged(package, compiler).await,
        FileFormat::Auto => Err(Error::FatalConfig(
            "output format must be resolved before packaging".to_string(),
        )),
    }
}
