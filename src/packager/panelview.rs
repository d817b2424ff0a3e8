use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::packager::Packager;
use crate::types::{Direction, Package, ProcessedPage};
use async_trait::async_trait;
use tokio::task::spawn_blocking;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Packager for fixed-layout (pre-paginated) EPUB output.
///
/// The generic builder backend has no fixed-layout support, so this
/// container is assembled entry by entry: each page gets an XHTML wrapper
/// with a viewport matching the image's pixel dimensions, and the package
/// document declares pre-paginated rendition plus the spine's
/// page-progression direction. Panel sub-pages produced upstream thus
/// display one panel per screen.
pub struct PanelViewPackager {
    zip: Option<ZipWriter<File>>,
    options: SimpleFileOptions,
    path: PathBuf,
    title: String,
    language: String,
    identifier: String,
    direction: Direction,
    cover_index: usize,
    page_index: usize,
    manifest: Vec<ManifestItem>,
    spine: Vec<String>,
}

struct ManifestItem {
    id: String,
    href: String,
    media_type: String,
    properties: Option<String>,
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl PanelViewPackager {
    fn zip_mut(&mut self) -> Result<&mut ZipWriter<File>> {
        self.zip
            .as_mut()
            .ok_or_else(|| Error::Unsupported("Zip writer not available".to_string()))
    }

    fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let options = self.options;
        let zip = self.zip_mut()?;
        zip.start_file(name, options)?;
        zip.write_all(bytes)?;
        Ok(())
    }

    fn nav_document(&self) -> String {
        let items: String = self
            .spine
            .iter()
            .enumerate()
            .map(|(i, id)| {
                format!(
                    "      <li><a href=\"text/{}.xhtml\">Page {}</a></li>\n",
                    id,
                    i + 1
                )
            })
            .collect();
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n\
             <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\
             <head><title>{}</title></head>\n<body>\n  <nav epub:type=\"toc\">\n    <ol>\n{}    </ol>\n  </nav>\n</body>\n</html>\n",
            escape_xml(&self.title),
            items
        )
    }

    fn package_document(&self) -> String {
        let manifest: String = self
            .manifest
            .iter()
            .map(|item| {
                let properties = item
                    .properties
                    .as_deref()
                    .map(|p| format!(" properties=\"{}\"", p))
                    .unwrap_or_default();
                format!(
                    "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"{}/>\n",
                    item.id, item.href, item.media_type, properties
                )
            })
            .collect();
        let spine: String = self
            .spine
            .iter()
            .map(|id| format!("    <itemref idref=\"x{}\"/>\n", id))
            .collect();
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
             <package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\" unique-identifier=\"bookid\" prefix=\"rendition: http://www.idpf.org/vocab/rendition/#\">\n\
             \x20 <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n\
             \x20   <dc:identifier id=\"bookid\">{identifier}</dc:identifier>\n\
             \x20   <dc:title>{title}</dc:title>\n\
             \x20   <dc:language>{language}</dc:language>\n\
             \x20   <meta property=\"rendition:layout\">pre-paginated</meta>\n\
             \x20   <meta property=\"rendition:orientation\">portrait</meta>\n\
             \x20   <meta property=\"rendition:spread\">none</meta>\n\
             \x20 </metadata>\n\
             \x20 <manifest>\n\
             \x20   <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n\
             {manifest}\
             \x20 </manifest>\n\
             \x20 <spine page-progression-direction=\"{direction}\">\n\
             {spine}\
             \x20 </spine>\n\
             </package>\n",
            identifier = escape_xml(&self.identifier),
            title = escape_xml(&self.title),
            language = escape_xml(&self.language),
            direction = self.direction.as_str(),
            manifest = manifest,
            spine = spine,
        )
    }
}

#[async_trait]
impl Packager for PanelViewPackager {
    fn new(package: &Package) -> Result<Self> {
        if let Some(parent) = package.output_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&package.output_path)?;
        let mut zip = ZipWriter::new(file);

        // The mimetype entry must come first and uncompressed.
        zip.start_file(
            "mimetype",
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        )?;
        zip.write_all(b"application/epub+zip")?;

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o755);
        zip.start_file("META-INF/container.xml", options)?;
        zip.write_all(CONTAINER_XML.as_bytes())?;

        let identifier = package
            .metadata
            .identifier
            .clone()
            .unwrap_or_else(|| format!("urn:tankobon:{}", package.volume.title));

        Ok(PanelViewPackager {
            zip: Some(zip),
            options,
            path: package.output_path.clone(),
            title: package.volume.title.clone(),
            language: package.metadata.language.clone(),
            identifier,
            direction: package.reading_direction,
            cover_index: package.cover_index,
            page_index: 0,
            manifest: Vec::new(),
            spine: Vec::new(),
        })
    }

    async fn add_page(&mut self, page: &ProcessedPage) -> Result<&mut Self> {
        const TEMPLATE: &str = include_str!("../../templates/PanelPage.xhtml");

        let id = format!("page_{:03}", self.page_index + 1);
        let image_href = format!("images/{}.{}", id, page.encoding.extension());
        let xhtml_href = format!("text/{}.xhtml", id);
        let title = format!("Page {}", self.page_index + 1);

        let xhtml = TEMPLATE
            .replace("%title%", &title)
            .replace("%src%", &format!("../{}", image_href))
            .replace("%alt%", &title)
            .replace("%width%", &page.layout.target_width.to_string())
            .replace("%height%", &page.layout.target_height.to_string());

        self.write_entry(&format!("OEBPS/{}", image_href), &page.bytes)?;
        self.write_entry(&format!("OEBPS/{}", xhtml_href), xhtml.as_bytes())?;

        let cover = self.page_index == self.cover_index;
        self.manifest.push(ManifestItem {
            id: format!("img_{}", id),
            href: image_href,
            media_type: page.encoding.mime().to_string(),
            properties: cover.then(|| "cover-image".to_string()),
        });
        self.manifest.push(ManifestItem {
            id: format!("x{}", id),
            href: xhtml_href,
            media_type: "application/xhtml+xml".to_string(),
            properties: None,
        });
        self.spine.push(id);

        self.page_index += 1;
        Ok(self)
    }

    async fn finish(mut self) -> Result<PathBuf> {
        let nav = self.nav_document();
        self.write_entry("OEBPS/nav.xhtml", nav.as_bytes())?;
        let opf = self.package_document();
        self.write_entry("OEBPS/content.opf", opf.as_bytes())?;

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
