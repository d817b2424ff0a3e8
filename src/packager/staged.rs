use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::packager::panelview::PanelViewPackager;
use crate::packager::{Packager, WriteOutcome};
use crate::types::Package;

/// External ebook compiler turning a staged fixed-layout EPUB into the
/// device's native format.
///
/// The compiler is a collaborator, not a bundled tool: implementations
/// wrap whatever binary is installed on the host. A missing binary must
/// surface as [`Error::CollaboratorUnavailable`] so the caller can fall
/// back instead of failing the volume.
pub trait EbookCompiler: Send + Sync {
    fn name(&self) -> &str;

    /// Compiles `staged` into `output`. Both paths share a parent
    /// directory.
    fn compile(&self, staged: &Path, output: &Path) -> Result<()>;
}

/// Compiler wrapper around Amazon's `kindlegen` binary.
#[derive(Debug, Clone)]
pub struct KindleGen {
    binary: PathBuf,
}

impl KindleGen {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for KindleGen {
    fn default() -> Self {
        Self::new("kindlegen")
    }
}

impl EbookCompiler for KindleGen {
    fn name(&self) -> &str {
        "kindlegen"
    }

    fn compile(&self, staged: &Path, output: &Path) -> Result<()> {
        let output_name = output.file_name().ok_or_else(|| {
            Error::InvalidPath(output.to_path_buf(), "output has no filename".to_string())
        })?;

        let status = Command::new(&self.binary)
            .arg(staged)
            .arg("-o")
            .arg(output_name)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::CollaboratorUnavailable(format!(
                        "'{}' not found on this host",
                        self.binary.display()
                    ))
                } else {
                    Error::Io(e)
                }
            })?;

        // kindlegen exits 1 for warnings while still producing output.
        if output.exists() {
            return Ok(());
        }
        Err(Error::Volume {
            volume: 0,
            title: output_name.to_string_lossy().to_string(),
            reason: format!(
                "compiler exited with {}: {}",
                status.status,
                String::from_utf8_lossy(&status.stderr)
            ),
        })
    }
}

fn staging_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    output.with_file_name(format!("{}.staging.epub", stem))
}

/// Destination for the degraded EPUB artifact, suffixed so a previous
/// run's fallback is never overwritten.
fn fallback_path(output: &Path) -> PathBuf {
    let candidate = output.with_extension("epub");
    if !candidate.exists() {
        return candidate;
    }
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let dir = output.parent().unwrap_or_else(|| Path::new("."));
    for n in 1.. {
        let numbered = dir.join(format!("{} ({}).epub", stem, n));
        if !numbered.exists() {
            return numbered;
        }
    }
    unreachable!()
}

/// Writes a staged MOBI package.
///
/// The volume is first staged as a fixed-layout EPUB next to the final
/// destination, then handed to the external compiler. When the compiler
/// is absent or fails, the staged EPUB itself becomes the artifact
/// (renamed to a plain `.epub`) and the outcome records the fallback
/// cause; the caller reports the volume as degraded, not failed.
pub async fn write_staged(
    package: &Package,
    compiler: Option<&dyn EbookCompiler>,
) -> Result<WriteOutcome> {
    let staged = staging_path(&package.output_path);
    let mut staged_package = package.clone();
    staged_package.output_path = staged.clone();

    let mut packager = PanelViewPackager::new(&staged_package)?;
    for page in &package.volume.pages {
        packager.add_page(page).await?;
    }
    let staged = packager.finish().await?;

    let compile_result = match compiler {
        Some(compiler) => compiler.compile(&staged, &package.output_path),
        None => Err(Error::CollaboratorUnavailable(
            "no ebook compiler configured".to_string(),
        )),
    };

    match compile_result {
        Ok(()) => {
            tokio::fs::remove_file(&staged).await?;
            Ok(WriteOutcome {
                path: package.output_path.clone(),
                fallback: None,
            })
        }
        Err(cause) => {
            let destination = fallback_path(&package.output_path);
            tokio::fs::rename(&staged, &destination).await?;
            Ok(WriteOutcome {
                path: destination,
                fallback: Some(cause.to_string()),
            })
        }
    }
}
