use std::fs::File;
use std::io::Cursor;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::packager::Packager;
use crate::types::{Direction, Package, ProcessedPage};
use async_trait::async_trait;
use epub_builder::{EpubBuilder, EpubContent, EpubVersion, ZipLibrary};

/// Generates the XHTML wrapper for one image page.
fn generate_xhtml(image_source: &str, page_title: &str) -> String {
    const TEMPLATE: &str = include_str!("../../templates/Epub.xhtml");
    TEMPLATE
        .replace("%title%", page_title)
        .replace("%src%", image_source)
        .replace("%alt%", page_title)
}

/// Packager for reflowable EPUB 3 output with embedded page images and
/// generated navigation.
pub struct EpubPackager {
    epub: EpubBuilder<ZipLibrary>,
    path: PathBuf,
    page_index: usize,
    cover_index: usize,
}

impl EpubPackager {
    fn apply_metadata(&mut self, package: &Package) -> Result<()> {
        let metadata = &package.metadata;
        self.epub.metadata("title", &package.volume.title)?;
        for author in &metadata.authors {
            self.epub.metadata("author", author)?;
        }
        self.epub.set_lang(&metadata.language);
        if let Some(description) = &metadata.description {
            self.epub.metadata("description", description)?;
        }
        if let Some(series) = &metadata.series {
            self.epub.metadata("subject", series)?;
        }
        // Not every builder backend records reading direction; a miss here
        // must not fail the volume.
        if package.reading_direction == Direction::Rtl
            && self.epub.metadata("direction", "rtl").is_err()
        {
            log::warn!(
                "epub backend cannot record right-to-left progression for '{}'",
                package.volume.title
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Packager for EpubPackager {
    fn new(package: &Package) -> Result<Self> {
        let mut epub = EpubBuilder::new(ZipLibrary::new()?)?;
        epub.epub_version(EpubVersion::V30);
        epub.stylesheet(include_bytes!("../../templates/Epub.css").as_slice())?;

        if let Some(parent) = package.output_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut packager = EpubPackager {
            epub,
            path: package.output_path.clone(),
            page_index: 0,
            cover_index: package.cover_index,
        };
        packager.apply_metadata(package)?;
        Ok(packager)
    }

    async fn add_page(&mut self, page: &ProcessedPage) -> Result<&mut Self> {
        let number = self.page_index + 1;
        let image_name = format!("images/page_{:03}.{}", number, page.encoding.extension());
        let page_title = format!("Page {}", number);

        if self.page_index == self.cover_index {
            let cover_name = format!("images/cover.{}", page.encoding.extension());
            self.epub
                .add_cover_image(cover_name, Cursor::new(&page.bytes[..]), page.encoding.mime())?;
        }

        self.epub.add_resource(
            &image_name,
            Cursor::new(&page.bytes[..]),
            page.encoding.mime(),
        )?;

        let xhtml = generate_xhtml(&image_name, &page_title);
        let xhtml_name = format!("page_{:03}.xhtml", number);
        self.epub.add_content(
            EpubContent::new(xhtml_name, xhtml.as_bytes()).title(&page_title),
        )?;

        self.page_index += 1;
        Ok(self)
    }

    async fn finish(mut self) -> Result<PathBuf> {
        let file = File::create(&self.path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create EPUB file '{}': {}", self.path.display(), e),
            ))
        })?;
        self.epub.generate(file)?;
        Ok(self.path)
    }
}
