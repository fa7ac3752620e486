use crate::error::{PageError, ToolError};
use crate::thumbnail::Thumbnailer;
use crate::tools::{Chosen, Tool, ToolRunner};
use crate::util::{copy_atomic, file_size, page_file_name, thumbnail_file_name, write_atomic};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One page's unit of work. `work_dir` is private to this page.
#[derive(Debug, Clone)]
pub struct PageTask {
    pub page: u32,
    pub input: PathBuf,
    pub work_dir: PathBuf,
}

/// Outcome for one page. `chosen_size <= original_size` always holds.
#[derive(Debug, Clone, Serialize)]
pub struct CompressionResult {
    pub page: u32,
    pub original_size: u64,
    pub chosen_size: u64,
    pub chosen: Chosen,
    pub output_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_tools: Vec<Tool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub tool: Tool,
    pub path: PathBuf,
    pub size: u64,
}

/// Smallest candidate that is strictly smaller than the original. Candidates
/// are in configured order and ties keep the earlier one.
pub fn select_best(original_size: u64, candidates: &[Candidate]) -> Option<&Candidate> {
    let mut best: Option<&Candidate> = None;
    for c in candidates {
        if best.is_none_or(|b| c.size < b.size) {
            best = Some(c);
        }
    }
    best.filter(|b| b.size < original_size)
}

pub struct PageCompressor<'a> {
    pub tools: &'a [Tool],
    pub runner: &'a dyn ToolRunner,
    pub thumbnailer: Option<&'a dyn Thumbnailer>,
    pub pages_dir: &'a Path,
    pub thumbnails_dir: &'a Path,
}

impl PageCompressor<'_> {
    pub fn compress_page(&self, task: &PageTask) -> Result<CompressionResult, PageError> {
        let page = task.page;
        let original_size =
            file_size(&task.input).map_err(|e| PageError::fs(page, "measuring page input", e))?;

        let outcomes = self.run_tools(task);

        let mut candidates = Vec::with_capacity(outcomes.len());
        let mut failed_tools = Vec::new();
        for (tool, outcome) in outcomes {
            match outcome {
                Ok((path, size)) => {
                    debug!(page, %tool, size, original_size, "candidate");
                    candidates.push(Candidate { tool, path, size });
                }
                Err(err) => {
                    warn!(page, "tool chain dropped: {err}");
                    failed_tools.push(tool);
                }
            }
        }

        let best = select_best(original_size, &candidates);
        let (chosen, source) = match best {
            Some(c) => (Chosen::Tool(c.tool), c.path.as_path()),
            None => {
                if candidates.is_empty() {
                    warn!(page, "all tools failed; keeping original page");
                } else {
                    let smallest = candidates.iter().map(|c| c.size).min().unwrap_or(0);
                    warn!(
                        page,
                        "no tool beat the original ({smallest} >= {original_size} bytes); keeping original page"
                    );
                }
                (Chosen::KeptOriginal, task.input.as_path())
            }
        };

        let output_path = self.pages_dir.join(page_file_name(page));
        let chosen_size = copy_atomic(source, &output_path)
            .map_err(|e| PageError::fs(page, "writing page output", e))?;

        let thumbnail = self.thumbnailer.and_then(|t| self.thumbnail(t, page, &output_path));

        info!(page, %chosen, original_size, chosen_size, "page done");

        Ok(CompressionResult {
            page,
            original_size,
            chosen_size,
            chosen,
            output_path,
            thumbnail,
            failed_tools,
        })
    }

    /// Runs every configured chain concurrently; results come back in
    /// configured order regardless of completion order.
    fn run_tools(&self, task: &PageTask) -> Vec<(Tool, Result<(PathBuf, u64), ToolError>)> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .tools
                .iter()
                .map(|&tool| {
                    let output = task.work_dir.join(format!("{}.pdf", tool.name()));
                    let input = task.input.as_path();
                    let runner = self.runner;
                    let handle = scope.spawn(move || {
                        runner.run(tool, input, &output).map(|size| (output, size))
                    });
                    (tool, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(tool, h)| {
                    let res = h
                        .join()
                        .unwrap_or_else(|_| Err(ToolError::execution(tool, "runner thread panicked")));
                    (tool, res)
                })
                .collect()
        })
    }

    fn thumbnail(&self, t: &dyn Thumbnailer, page: u32, pdf: &Path) -> Option<PathBuf> {
        let dest = self.thumbnails_dir.join(thumbnail_file_name(page));
        let res = t
            .render_first_page(pdf)
            .and_then(|jpeg| write_atomic(&dest, &jpeg).map_err(Into::into));
        match res {
            Ok(()) => Some(dest),
            Err(err) => {
                warn!(page, "thumbnail failed: {err:#}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(tool: Tool, size: u64) -> Candidate {
        Candidate {
            tool,
            path: PathBuf::from(format!("{tool}.pdf")),
            size,
        }
    }

    #[test]
    fn picks_smallest() {
        let c = [cand(Tool::Ghostscript, 90), cand(Tool::Qpdf, 40), cand(Tool::QpdfMutool, 60)];
        assert_eq!(select_best(100, &c).map(|c| c.tool), Some(Tool::Qpdf));
    }

    #[test]
    fn tie_goes_to_first_configured() {
        let c = [cand(Tool::QpdfMutool, 50), cand(Tool::Ghostscript, 50)];
        for _ in 0..10 {
            assert_eq!(select_best(100, &c).map(|c| c.tool), Some(Tool::QpdfMutool));
        }
    }

    #[test]
    fn equal_to_original_is_not_a_win() {
        let c = [cand(Tool::Qpdf, 100)];
        assert!(select_best(100, &c).is_none());
    }

    #[test]
    fn no_candidates_no_winner() {
        assert!(select_best(100, &[]).is_none());
    }

    #[test]
    fn zero_byte_original_never_has_a_winner() {
        let c = [cand(Tool::Qpdf, 0)];
        assert!(select_best(0, &c).is_none());
    }
}
