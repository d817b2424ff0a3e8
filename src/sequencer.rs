//! Page sequencing: restoring reading order, choosing spread
//! representations, mapping pages into volumes and deciding what to do
//! with already-existing outputs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::path_utils::sanitize_filename;
use crate::types::{
    BatchSplitMode, FileFormat, ProcessedPage, SkipExistingMode, SpreadPart, Volume,
};

/// Restores total reading order after parallel processing. Ordering is by
/// `(original_index, sub_index)`, never by worker completion order.
pub fn restore_order(pages: &mut [ProcessedPage]) {
    pages.sort_by_key(|p| (p.original_index, p.sub_index));
}

/// Resolves dual spread representations down to one per source page.
///
/// Splitter mode `Both` leaves a rotated whole-spread page and two halves
/// in the stream. Panel-view output presents the halves; every other
/// format presents the rotated spread. Pages without a dual representation
/// pass through.
pub fn select_spread_representation(
    pages: Vec<ProcessedPage>,
    format: FileFormat,
) -> Vec<ProcessedPage> {
    let dual: HashSet<usize> = {
        let rotated: HashSet<usize> = pages
            .iter()
            .filter(|p| p.layout.spread_part == SpreadPart::Rotated)
            .map(|p| p.original_index)
            .collect();
        pages
            .iter()
            .filter(|p| p.layout.spread_part == SpreadPart::FirstHalf)
            .map(|p| p.original_index)
            .filter(|i| rotated.contains(i))
            .collect()
    };

    pages
        .into_iter()
        .filter(|page| {
            if !dual.contains(&page.original_index) {
                return true;
            }
            match (format, page.layout.spread_part) {
                (FileFormat::PanelView, SpreadPart::Rotated) => false,
                (FileFormat::PanelView, _) => true,
                (_, SpreadPart::Rotated) => true,
                (_, _) => false,
            }
        })
        .collect()
}

/// Formats a volume title as `Title [i/n]`, zero-padded to at least
/// `pad_zeros` digits. A run producing a single volume keeps the plain
/// title.
pub fn volume_title(title: &str, index: usize, total: usize, pad_zeros: usize) -> String {
    if total <= 1 {
        return title.to_string();
    }
    let width = pad_zeros.max(total.to_string().len());
    format!(
        "{} [{:0width$}/{:0width$}]",
        title,
        index,
        total,
        width = width
    )
}

/// Destination file for one volume inside the output directory.
pub fn output_path(dir: &Path, title: &str, format: FileFormat) -> PathBuf {
    dir.join(format!("{}.{}", sanitize_filename(title), format.extension()))
}

/// Maps an ordered page stream into volumes.
///
/// `DontSplit` yields one volume. `Automatic` starts a new volume when the
/// accumulated encoded size crosses the target, never leaving a volume
/// empty. `PerDirectory` cuts on group boundaries in stream order.
/// Volume titles are assigned after the count is known.
pub fn sequence(
    pages: Vec<ProcessedPage>,
    title: &str,
    mode: BatchSplitMode,
    target_size_mb: u64,
    pad_zeros: usize,
) -> Vec<Volume> {
    let mut buckets: Vec<Vec<ProcessedPage>> = Vec::new();

    match mode {
        BatchSplitMode::DontSplit => buckets.push(pages),
        BatchSplitMode::Automatic => {
            let target_bytes = target_size_mb.max(1) * 1024 * 1024;
            let mut current: Vec<ProcessedPage> = Vec::new();
            let mut accumulated = 0u64;
            for page in pages {
                if accumulated + page.bytes.len() as u64 > target_bytes && !current.is_empty() {
                    buckets.push(std::mem::take(&mut current));
                    accumulated = 0;
                }
                accumulated += page.bytes.len() as u64;
                current.push(page);
            }
            if !current.is_empty() {
                buckets.push(current);
            }
        }
        BatchSplitMode::PerDirectory => {
            let mut current_group: Option<Option<String>> = None;
            for page in pages {
                if current_group.as_ref() != Some(&page.group) {
                    current_group = Some(page.group.clone());
                    buckets.push(Vec::new());
                }
                buckets.last_mut().unwrap().push(page);
            }
        }
    }

    buckets.retain(|b| !b.is_empty());
    let total = buckets.len();
    buckets
        .into_iter()
        .enumerate()
        .map(|(i, pages)| Volume {
            index: i,
            title: volume_title(title, i + 1, total, pad_zeros),
            pages,
        })
        .collect()
}

/// What to do with one volume's destination file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDecision {
    /// Produce the volume at this (possibly freshened) path.
    Process(PathBuf),
    /// An artifact already exists; omit the volume.
    Skip { existing: PathBuf },
    /// An artifact already exists; reuse it untouched.
    CopyThrough { existing: PathBuf },
}

/// Tracks destination paths claimed during a run so concurrent volumes
/// never collide, and applies the skip-existing policy exactly once per
/// volume.
#[derive(Debug, Default)]
pub struct OutputRegistry {
    claimed: Mutex<HashSet<PathBuf>>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn freshen(path: &Path, claimed: &HashSet<PathBuf>) -> PathBuf {
        if !path.exists() && !claimed.contains(path) {
            return path.to_path_buf();
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        for n in 1.. {
            let candidate = dir.join(format!("{} ({}).{}", stem, n, ext));
            if !candidate.exists() && !claimed.contains(&candidate) {
                return candidate;
            }
        }
        unreachable!()
    }

    pub fn decide(&self, path: &Path, mode: SkipExistingMode) -> OutputDecision {
        let mut claimed = self.claimed.lock().unwrap();
        match mode {
            SkipExistingMode::Reprocess => {
                let fresh = Self::freshen(path, &claimed);
                claimed.insert(fresh.clone());
                OutputDecision::Process(fresh)
            }
            SkipExistingMode::SkipIfExists => {
                if path.exists() {
                    OutputDecision::Skip {
                        existing: path.to_path_buf(),
                    }
                } else {
                    let fresh = Self::freshen(path, &claimed);
                    claimed.insert(fresh.clone());
                    OutputDecision::Process(fresh)
                }
            }
            SkipExistingMode::CopyThrough => {
                if path.exists() {
                    OutputDecision::CopyThrough {
                        existing: path.to_path_buf(),
                    }
                } else {
                    let fresh = Self::freshen(path, &claimed);
                    claimed.insert(fresh.clone());
                    OutputDecision::Process(fresh)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PageEncoding, PageLayout};

    fn page(index: usize, sub: usize, size: usize, group: Option<&str>) -> ProcessedPage {
        ProcessedPage {
            bytes: vec![0u8; size],
            encoding: PageEncoding::default(),
            source_name: format!("p{}.jpg", index),
            original_index: index,
            sub_index: sub,
            group: group.map(String::from),
            layout: PageLayout::default(),
        }
    }

    #[test]
    fn order_is_restored_by_index_not_arrival() {
        let mut pages = vec![page(2, 0, 1, None), page(0, 1, 1, None), page(0, 0, 1, None)];
        restore_order(&mut pages);
        let order: Vec<(usize, usize)> =
            pages.iter().map(|p| (p.original_index, p.sub_index)).collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (2, 0)]);
    }

    #[test]
    fn titles_are_zero_padded() {
        assert_eq!(volume_title("Title", 1, 1, 2), "Title");
        assert_eq!(volume_title("Title", 3, 12, 0), "Title [03/12]");
        assert_eq!(volume_title("Title", 3, 5, 3), "Title [003/005]");
    }

    #[test]
    fn dont_split_yields_single_volume() {
        let pages = vec![page(0, 0, 10, None), page(1, 0, 10, None)];
        let volumes = sequence(pages, "Book", BatchSplitMode::DontSplit, 400, 0);
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].title, "Book");
        assert_eq!(volumes[0].pages.len(), 2);
    }

    #[test]
    fn automatic_split_respects_target_size() {
        // 1 MiB target, pages of 600 KiB: two per volume never fits.
        let pages: Vec<ProcessedPage> =
            (0..5).map(|i| page(i, 0, 600 * 1024, None)).collect();
        let volumes = sequence(pages, "Book", BatchSplitMode::Automatic, 1, 0);
        assert_eq!(volumes.len(), 5);
        assert!(volumes.iter().all(|v| v.pages.len() == 1));
        assert_eq!(volumes[0].title, "Book [1/5]");
    }

    #[test]
    fn automatic_split_never_emits_empty_volume() {
        // A single page larger than the target still gets a volume.
        let pages = vec![page(0, 0, 3 * 1024 * 1024, None)];
        let volumes = sequence(pages, "Book", BatchSplitMode::Automatic, 1, 0);
        assert_eq!(volumes.len(), 1);
    }

    #[test]
    fn per_directory_split_follows_groups() {
        let pages = vec![
            page(0, 0, 1, None),
            page(1, 0, 1, Some("ch1")),
            page(2, 0, 1, Some("ch1")),
            page(3, 0, 1, Some("ch2")),
        ];
        let volumes = sequence(pages, "Book", BatchSplitMode::PerDirectory, 400, 0);
        assert_eq!(volumes.len(), 3);
        assert_eq!(volumes[1].pages.len(), 2);
        assert_eq!(volumes[2].pages[0].group.as_deref(), Some("ch2"));
    }

    #[test]
    fn spread_selection_is_format_dependent() {
        let mut rotated = page(1, 0, 1, None);
        rotated.layout.spread_part = SpreadPart::Rotated;
        let mut first = page(1, 1, 1, None);
        first.layout.spread_part = SpreadPart::FirstHalf;
        let mut second = page(1, 2, 1, None);
        second.layout.spread_part = SpreadPart::SecondHalf;
        let stream = vec![page(0, 0, 1, None), rotated, first, second];

        let epub = select_spread_representation(stream.clone(), FileFormat::Epub);
        assert_eq!(epub.len(), 2);
        assert_eq!(epub[1].layout.spread_part, SpreadPart::Rotated);

        let panel = select_spread_representation(stream, FileFormat::PanelView);
        assert_eq!(panel.len(), 3);
        assert!(panel
            .iter()
            .all(|p| p.layout.spread_part != SpreadPart::Rotated));
    }

    #[test]
    fn registry_freshens_claimed_collisions() {
        let registry = OutputRegistry::new();
        let path = PathBuf::from("/nonexistent-dir/Book.cbz");
        let first = registry.decide(&path, SkipExistingMode::Reprocess);
        let second = registry.decide(&path, SkipExistingMode::Reprocess);
        assert_eq!(first, OutputDecision::Process(path.clone()));
        assert_eq!(
            second,
            OutputDecision::Process(PathBuf::from("/nonexistent-dir/Book (1).cbz"))
        );
    }

    #[test]
    fn skip_and_copy_modes_process_missing_outputs() {
        let registry = OutputRegistry::new();
        let path = PathBuf::from("/nonexistent-dir/Book.cbz");
        assert!(matches!(
            registry.decide(&path, SkipExistingMode::SkipIfExists),
            OutputDecision::Process(_)
        ));
        let registry = OutputRegistry::new();
        assert!(matches!(
            registry.decide(&path, SkipExistingMode::CopyThrough),
            OutputDecision::Process(_)
        ));
    }
}
