use crate::pdf;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

static PAGE_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^page_(\d+)\.pdf$").expect("static regex"));

/// Why the original document was shipped instead of the merged one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum MergeFallback {
    NotSmaller { merged_bytes: u64, original_bytes: u64 },
    IncompletePages { found: u32, expected: u32 },
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub bytes: Vec<u8>,
    pub page_count: u32,
    pub fallback: Option<MergeFallback>,
}

impl MergeOutcome {
    pub fn kept_original(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Page files in `dir`, sorted by page number (numerically, so page 10
/// follows page 9).
pub fn list_page_files(dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut pages = Vec::new();
    let entries = std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("reading {}", dir.display()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(caps) = PAGE_FILE.captures(name) else {
            continue;
        };
        let Ok(n) = caps[1].parse::<u32>() else {
            continue;
        };
        pages.push((n, entry.path()));
    }
    pages.sort_by_key(|(n, _)| *n);
    Ok(pages)
}

/// Reassembles the page files of `pages_dir` into one document. The result is
/// never larger than `original`: if merging does not shrink it, or cannot be
/// done, the original bytes are returned unchanged.
pub fn merge(pages_dir: &Path, original: &Path, expected_pages: u32) -> Result<MergeOutcome> {
    let original_bytes = std::fs::read(original)
        .with_context(|| format!("reading original: {}", original.display()))?;
    let original_len = original_bytes.len() as u64;

    let keep = |fallback: MergeFallback| {
        warn!("shipping the original document unchanged: {fallback:?}");
        MergeOutcome {
            bytes: original_bytes.clone(),
            page_count: expected_pages,
            fallback: Some(fallback),
        }
    };

    let files = list_page_files(pages_dir)?;
    let numbers_ok = files
        .iter()
        .enumerate()
        .all(|(i, (n, _))| *n == i as u32 + 1);
    if files.len() as u32 != expected_pages || !numbers_ok {
        return Ok(keep(MergeFallback::IncompletePages {
            found: files.len() as u32,
            expected: expected_pages,
        }));
    }

    let mut parts = Vec::with_capacity(files.len());
    for (_, path) in &files {
        parts.push(std::fs::read(path).with_context(|| format!("reading {}", path.display()))?);
    }

    let merged = match pdf::concatenate(&parts) {
        Ok(m) => m,
        Err(err) => {
            return Ok(keep(MergeFallback::Failed {
                error: format!("{err:#}"),
            }));
        }
    };

    let merged_len = merged.len() as u64;
    if merged_len >= original_len {
        return Ok(keep(MergeFallback::NotSmaller {
            merged_bytes: merged_len,
            original_bytes: original_len,
        }));
    }

    info!(pages = files.len(), merged_len, original_len, "merged document");
    Ok(MergeOutcome {
        bytes: merged,
        page_count: expected_pages,
        fallback: None,
    })
}
