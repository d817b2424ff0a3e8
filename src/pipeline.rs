//! The conversion pipeline: extraction, parallel per-page transforms,
//! sequencing into volumes and concurrent packaging.
//!
//! Failure scoping is the load-bearing rule here. Configuration and
//! profile problems abort before any page is decoded; a bad page is
//! warned about and skipped; a failing volume is reported and the other
//! volumes continue. Page order is restored from `(original_index,
//! sub_index)` after the parallel stage, so worker completion order never
//! leaks into the output.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::try_join_all;
use image::DynamicImage;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, spawn_blocking};

use crate::error::{Error, Result};
use crate::events::{CancelToken, EventSink};
use crate::packager::{self, KindleGen};
use crate::panel;
use crate::path_utils::{is_hidden, is_image_file, sanitize_filename};
use crate::profile::DeviceProfile;
use crate::sequencer::{self, OutputDecision, OutputRegistry};
use crate::source::{PageSource, SourceImage};
use crate::tankobon::TankobonConfig;
use crate::transform::{self, TransformOptions};
use crate::types::{
    BatchSplitMode, FileFormat, Package, Page, PageEncoding, PageWarning, ProcessedPage,
    RunReport, SkipExistingMode, Volume, VolumeStatus,
};

/// Concurrent volume packaging is I/O heavy; cap it below the transform
/// pool size.
const MAX_CONCURRENT_VOLUMES: usize = 4;

enum PagePayload {
    Raw(Vec<u8>),
    Decoded(DynamicImage),
}

struct PageInput {
    index: usize,
    name: String,
    group: Option<String>,
    payload: PagePayload,
}

struct VolumePlan {
    title: String,
    path: PathBuf,
    /// Group this volume draws its pages from; `None` under
    /// [`BatchSplitMode::DontSplit`] means all pages.
    group: Option<Option<String>>,
}

/// Runs the full conversion and returns the end-of-run report.
pub async fn run(
    config: &TankobonConfig,
    source: &dyn PageSource,
    sink: &dyn EventSink,
    cancel: &CancelToken,
) -> Result<RunReport> {
    config.preflight_check()?;
    let profile = config.resolve_profile()?;
    let format = config.resolved_format(&profile);
    let opts = config.transform_options(&profile);

    let title = if config.metadata.title.is_empty() {
        source.identity()
    } else {
        config.metadata.title.clone()
    };

    let output_dir = if config.create_output_directory {
        config.target_path.join(sanitize_filename(&title))
    } else {
        config.target_path.clone()
    };
    if !output_dir.exists() {
        tokio::fs::create_dir_all(&output_dir).await?;
    }
    if let Some(debug_dir) = &config.panel_debug_dir {
        tokio::fs::create_dir_all(debug_dir).await?;
    }

    sink.stage("extracting pages");
    let mut images = source.extract().await?;
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let mut report = RunReport::default();
    let registry = OutputRegistry::new();

    // With volume boundaries known up front, skip-existing decisions are
    // made before any page is decoded, so skipped and copied-through
    // volumes never reach the transform stage.
    let mut plans: Vec<VolumePlan> = Vec::new();
    if config.batch_split != BatchSplitMode::Automatic {
        let groups: Vec<Option<String>> = match config.batch_split {
            BatchSplitMode::DontSplit => vec![None],
            _ => distinct_groups(&images),
        };
        let total = groups.len();
        let mut kept_groups: Vec<Option<String>> = Vec::new();
        for (i, group) in groups.into_iter().enumerate() {
            let volume_title = sequencer::volume_title(&title, i + 1, total, config.pad_zeros);
            let path = sequencer::output_path(&output_dir, &volume_title, format);
            match registry.decide(&path, config.skip_existing) {
                OutputDecision::Process(path) => {
                    let plan_group = match config.batch_split {
                        BatchSplitMode::DontSplit => None,
                        _ => Some(group.clone()),
                    };
                    kept_groups.push(group);
                    plans.push(VolumePlan {
                        title: volume_title,
                        path,
                        group: plan_group,
                    });
                }
                OutputDecision::Skip { existing } => {
                    let status = VolumeStatus::Skipped {
                        cause: format!("artifact already exists at {:?}", existing),
                    };
                    sink.volume_status(&volume_title, &status);
                    report.volume_statuses.push((volume_title, status));
                }
                OutputDecision::CopyThrough { existing } => {
                    let status = VolumeStatus::Copied { path: existing };
                    sink.volume_status(&volume_title, &status);
                    report.volume_statuses.push((volume_title, status));
                }
            }
        }
        if config.batch_split == BatchSplitMode::PerDirectory {
            images.retain(|img| kept_groups.contains(&img.group));
        } else if plans.is_empty() {
            // DontSplit with the single volume skipped or copied.
            images.clear();
        }
    } else if config.skip_existing != SkipExistingMode::Reprocess {
        // Automatic boundaries depend on encoded sizes, but a previous
        // run's artifacts are recognizable by title; volumes skipped or
        // copied through never reach the transform stage.
        let existing = existing_artifacts(&output_dir, &title, format).await?;
        if !existing.is_empty() {
            for path in existing {
                let volume_title = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| title.clone());
                let status = match config.skip_existing {
                    SkipExistingMode::SkipIfExists => VolumeStatus::Skipped {
                        cause: format!("artifact already exists at {:?}", path),
                    },
                    _ => VolumeStatus::Copied { path },
                };
                sink.volume_status(&volume_title, &status);
                report.volume_statuses.push((volume_title, status));
            }
            images.clear();
        }
    }

    // Assemble worker inputs, merging webtoon slices first when asked.
    let inputs = if config.panel_merge && format == FileFormat::PanelView {
        merge_groups(images, sink, &mut report)
    } else {
        images
            .into_iter()
            .enumerate()
            .map(|(index, img)| PageInput {
                index,
                name: img.name,
                group: img.group,
                payload: PagePayload::Raw(img.bytes),
            })
            .collect()
    };

    sink.stage("transforming pages");
    let pages = transform_stage(
        inputs,
        &opts,
        &profile,
        format,
        config.page_encoding,
        config.upscale,
        config.panel_debug_dir.clone(),
        sink,
        cancel,
        &mut report,
    )
    .await?;
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let pages = sequencer::select_spread_representation(pages, format);
    report.pages_processed = pages.len();

    // Map pages into volumes: planned boundaries for the deterministic
    // modes, size accumulation for Automatic.
    let mut jobs: Vec<(Volume, PathBuf)> = Vec::new();
    if config.batch_split == BatchSplitMode::Automatic {
        let volumes = sequencer::sequence(
            pages,
            &title,
            BatchSplitMode::Automatic,
            config.target_size_mb,
            config.pad_zeros,
        );
        for volume in volumes {
            let path = sequencer::output_path(&output_dir, &volume.title, format);
            match registry.decide(&path, config.skip_existing) {
                OutputDecision::Process(path) => jobs.push((volume, path)),
                OutputDecision::Skip { existing } => {
                    let status = VolumeStatus::Skipped {
                        cause: format!("artifact already exists at {:?}", existing),
                    };
                    sink.volume_status(&volume.title, &status);
                    report.volume_statuses.push((volume.title, status));
                }
                OutputDecision::CopyThrough { existing } => {
                    let status = VolumeStatus::Copied { path: existing };
                    sink.volume_status(&volume.title, &status);
                    report.volume_statuses.push((volume.title, status));
                }
            }
        }
    } else {
        let mut pages = pages;
        for (i, plan) in plans.into_iter().enumerate() {
            let volume_pages: Vec<ProcessedPage> = match &plan.group {
                None => std::mem::take(&mut pages),
                Some(group) => {
                    let (matching, rest): (Vec<_>, Vec<_>) =
                        pages.into_iter().partition(|p| &p.group == group);
                    pages = rest;
                    matching
                }
            };
            if volume_pages.is_empty() {
                continue;
            }
            jobs.push((
                Volume {
                    index: i,
                    title: plan.title,
                    pages: volume_pages,
                },
                plan.path,
            ));
        }
    }

    let sidecars = if config.copy_sidecars && format == FileFormat::Cbz {
        collect_sidecars(&config.source_path).await?
    } else {
        Vec::new()
    };

    sink.stage("packaging volumes");
    let statuses = packaging_stage(config, jobs, format, &title, sidecars, cancel).await?;
    for (volume_title, status) in statuses {
        sink.volume_status(&volume_title, &status);
        if matches!(
            status,
            VolumeStatus::Completed { .. } | VolumeStatus::Degraded { .. }
        ) {
            report.volumes_created += 1;
        }
        report.volume_statuses.push((volume_title, status));
    }

    Ok(report)
}

fn distinct_groups(images: &[SourceImage]) -> Vec<Option<String>> {
    let mut groups: Vec<Option<String>> = Vec::new();
    for img in images {
        if groups.last() != Some(&img.group) {
            groups.push(img.group.clone());
        }
    }
    groups
}

/// Decodes and stacks each group into one tall strip. A group that fails
/// to merge is passed through as individual pages with a warning.
fn merge_groups(
    images: Vec<SourceImage>,
    sink: &dyn EventSink,
    report: &mut RunReport,
) -> Vec<PageInput> {
    let mut inputs: Vec<PageInput> = Vec::new();
    let mut current: Vec<(usize, SourceImage, DynamicImage)> = Vec::new();

    let flush = |batch: &mut Vec<(usize, SourceImage, DynamicImage)>,
                     inputs: &mut Vec<PageInput>,
                     report: &mut RunReport| {
        if batch.is_empty() {
            return;
        }
        let pages: Vec<Page> = batch
            .iter()
            .map(|(index, img, decoded)| {
                let mut page = Page::new(decoded.clone(), img.name.clone(), *index);
                page.group = img.group.clone();
                page
            })
            .collect();
        let first = &batch[0];
        match panel::merge_vertical(pages) {
            Ok(merged) => inputs.push(PageInput {
                index: first.0,
                name: merged.source_name.clone(),
                group: merged.group.clone(),
                payload: PagePayload::Decoded(merged.image),
            }),
            Err(e) => {
                sink.page_warning(&first.1.name, &format!("strip merge failed: {}", e));
                report.page_warnings.push(PageWarning {
                    page: first.1.name.clone(),
                    cause: format!("strip merge failed: {}", e),
                });
                for (index, img, decoded) in batch.drain(..) {
                    inputs.push(PageInput {
                        index,
                        name: img.name,
                        group: img.group,
                        payload: PagePayload::Decoded(decoded),
                    });
                }
            }
        }
        batch.clear();
    };

    for (index, img) in images.into_iter().enumerate() {
        if current.last().map(|(_, prev, _)| &prev.group) != Some(&img.group)
            && !current.is_empty()
        {
            flush(&mut current, &mut inputs, report);
        }
        match transform::decode(&img.bytes) {
            Ok(decoded) => current.push((index, img, decoded)),
            Err(e) => {
                sink.page_warning(&img.name, &e.to_string());
                report.page_warnings.push(PageWarning {
                    page: img.name,
                    cause: e.to_string(),
                });
            }
        }
    }
    flush(&mut current, &mut inputs, report);
    inputs
}

#[allow(clippy::too_many_arguments)]
async fn transform_stage(
    inputs: Vec<PageInput>,
    opts: &TransformOptions,
    profile: &DeviceProfile,
    format: FileFormat,
    encoding: PageEncoding,
    upscale: bool,
    debug_dir: Option<PathBuf>,
    sink: &dyn EventSink,
    cancel: &CancelToken,
    report: &mut RunReport,
) -> Result<Vec<ProcessedPage>> {
    let semaphore = Arc::new(Semaphore::new(num_cpus::get().max(1)));
    type PageOutcome = (usize, Vec<ProcessedPage>, Option<PageWarning>);
    let mut handles: Vec<JoinHandle<Result<PageOutcome>>> = Vec::new();

    for input in inputs {
        let semaphore = Arc::clone(&semaphore);
        let opts = opts.clone();
        let profile = profile.clone();
        let debug_dir = debug_dir.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await?;
            spawn_blocking(move || {
                process_one(input, &opts, &profile, format, encoding, upscale, debug_dir, &cancel)
            })
            .await?
        }));
    }

    let results = try_join_all(handles)
        .await
        .map_err(|e| Error::AsyncTaskError(format!("transform task failed: {}", e)))?;

    // Re-join by input index, never by completion order.
    let mut ordered: Vec<(usize, Vec<ProcessedPage>)> = Vec::with_capacity(results.len());
    for result in results {
        let (index, pages, warning) = result?;
        if let Some(warning) = warning {
            sink.page_warning(&warning.page, &warning.cause);
            report.page_warnings.push(warning);
        } else if let Some(page) = pages.first() {
            sink.page_done(&page.source_name);
        }
        ordered.push((index, pages));
    }
    ordered.sort_by_key(|(index, _)| *index);

    let mut pages: Vec<ProcessedPage> = ordered.into_iter().flat_map(|(_, p)| p).collect();
    sequencer::restore_order(&mut pages);
    Ok(pages)
}

/// The per-page worker: decode, transform, panel-decompose for panel-view
/// output, and encode while the pixel data is hot. A failure here is
/// page-scoped and reported as a warning, except cancellation which
/// aborts the run.
#[allow(clippy::too_many_arguments)]
fn process_one(
    input: PageInput,
    opts: &TransformOptions,
    profile: &DeviceProfile,
    format: FileFormat,
    encoding: PageEncoding,
    upscale: bool,
    debug_dir: Option<PathBuf>,
    cancel: &CancelToken,
) -> Result<(usize, Vec<ProcessedPage>, Option<PageWarning>)> {
    let PageInput {
        index,
        name,
        group,
        payload,
    } = input;
    let warn_name = name.clone();
    let outcome = (|| -> Result<Vec<ProcessedPage>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let image = match payload {
            PagePayload::Raw(bytes) => transform::decode(&bytes)?,
            PagePayload::Decoded(image) => image,
        };
        let mut page = Page::new(image, name, index);
        page.group = group;

        let transformed = transform_page_chain(page, opts, profile, format, upscale, debug_dir.as_deref(), cancel)?;

        let mut processed = Vec::with_capacity(transformed.len());
        for page in transformed {
            let bytes = transform::encode(&page.image, encoding)?;
            processed.push(ProcessedPage {
                bytes,
                encoding,
                source_name: page.source_name,
                original_index: page.original_index,
                sub_index: page.sub_index,
                group: page.group,
                layout: page.layout,
            });
        }
        Ok(processed)
    })();

    match outcome {
        Ok(pages) => Ok((index, pages, None)),
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(e) => Ok((
            index,
            Vec::new(),
            Some(PageWarning {
                page: warn_name,
                cause: e.to_string(),
            }),
        )),
    }
}

fn transform_page_chain(
    page: Page,
    opts: &TransformOptions,
    profile: &DeviceProfile,
    format: FileFormat,
    upscale: bool,
    debug_dir: Option<&std::path::Path>,
    cancel: &CancelToken,
) -> Result<Vec<Page>> {
    let pages = transform::transform_page(page, opts, profile, cancel)?;
    if format != FileFormat::PanelView || profile.panel_tiles == 0 {
        return Ok(pages);
    }
    let mut panels = Vec::new();
    for page in pages {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        panels.extend(panel::decompose(page, profile, upscale, debug_dir)?);
    }
    Ok(panels)
}

/// Artifacts a previous run left for this title: the plain-title file
/// plus any `Title [i/n]` volume file carrying the format's extension.
async fn existing_artifacts(
    dir: &std::path::Path,
    title: &str,
    format: FileFormat,
) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let base = sequencer::output_path(dir, title, format);
    if base.exists() {
        found.push(base);
    }
    if dir.is_dir() {
        let prefix = format!("{} [", sanitize_filename(title));
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_file()
                && name.starts_with(&prefix)
                && path.extension().and_then(|e| e.to_str()) == Some(format.extension())
            {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Non-image, non-hidden files at the source root, copied through into
/// CBZ output verbatim.
async fn collect_sidecars(source_path: &std::path::Path) -> Result<Vec<PathBuf>> {
    let mut sidecars = Vec::new();
    if !source_path.is_dir() {
        return Ok(sidecars);
    }
    let mut entries = tokio::fs::read_dir(source_path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && !is_hidden(&path) && !is_image_file(&path) {
            sidecars.push(path);
        }
    }
    sidecars.sort();
    Ok(sidecars)
}

async fn packaging_stage(
    config: &TankobonConfig,
    jobs: Vec<(Volume, PathBuf)>,
    format: FileFormat,
    title: &str,
    sidecars: Vec<PathBuf>,
    cancel: &CancelToken,
) -> Result<Vec<(String, VolumeStatus)>> {
    let max_concurrent = num_cpus::get().min(MAX_CONCURRENT_VOLUMES);
    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut handles: Vec<JoinHandle<Result<(usize, String, VolumeStatus)>>> = Vec::new();

    for (volume, path) in jobs {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let semaphore = Arc::clone(&semaphore);
        let mut metadata = config.metadata.clone();
        if metadata.title.is_empty() {
            metadata.title = title.to_string();
        }
        let direction = config.reading_direction();
        let sidecars = sidecars.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await?;
            let index = volume.index;
            let volume_title = volume.title.clone();
            let package = Package {
                volume,
                metadata,
                format,
                reading_direction: direction,
                cover_index: 0,
                output_path: path,
            };
            let compiler = KindleGen::default();
            let status = match packager::write_package(&package, &sidecars, Some(&compiler)).await
            {
                Ok(outcome) => match outcome.fallback {
                    None => VolumeStatus::Completed { path: outcome.path },
                    Some(cause) => VolumeStatus::Degraded {
                        path: outcome.path,
                        cause,
                    },
                },
                Err(e) => VolumeStatus::Failed {
                    cause: e.to_string(),
                },
            };
            Ok((index, volume_title, status))
        }));
    }

    let results = try_join_all(handles)
        .await
        .map_err(|e| Error::AsyncTaskError(format!("packaging task failed: {}", e)))?;

    let mut statuses: Vec<(usize, String, VolumeStatus)> = Vec::with_capacity(results.len());
    for result in results {
        statuses.push(result?);
    }
    statuses.sort_by_key(|(index, _, _)| *index);
    Ok(statuses
        .into_iter()
        .map(|(_, title, status)| (title, status))
        .collect())
}
