use crate::compressor::CompressionResult;
use crate::tools::{Chosen, Tool};
use crate::util::{format_bytes, now_rfc3339};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// A page that produced no output at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageFailure {
    pub page: u32,
    pub error: String,
}

/// Accumulator for one batch. Only the aggregating thread mutates it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStatistics {
    pub pages: u32,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub wins: BTreeMap<Chosen, u32>,
    pub failures: Vec<PageFailure>,
}

impl BatchStatistics {
    pub fn record(&mut self, result: &CompressionResult) {
        self.pages += 1;
        self.original_bytes += result.original_size;
        self.compressed_bytes += result.chosen_size;
        *self.wins.entry(result.chosen).or_insert(0) += 1;
    }

    pub fn record_failure(&mut self, failure: PageFailure) {
        self.failures.push(failure);
    }

    /// Pages that went through the pipeline, successful or not.
    pub fn attempted(&self) -> u32 {
        self.pages + self.failures.len() as u32
    }
}

#[derive(Debug, Clone)]
pub struct DocumentStatistics {
    pub total_pages: u32,
    /// Size of the real input file, not the sum of split pages.
    pub original_file_bytes: u64,
    pub pages_done: u32,
    pub pages_original_bytes: u64,
    pub pages_compressed_bytes: u64,
    pub wins: BTreeMap<Chosen, u32>,
    pub failures: Vec<PageFailure>,
    pub batches: u32,
    pub started: Instant,
    pub started_at: String,
}

impl DocumentStatistics {
    pub fn new(total_pages: u32, original_file_bytes: u64) -> Self {
        Self {
            total_pages,
            original_file_bytes,
            pages_done: 0,
            pages_original_bytes: 0,
            pages_compressed_bytes: 0,
            wins: BTreeMap::new(),
            failures: Vec::new(),
            batches: 0,
            started: Instant::now(),
            started_at: now_rfc3339(),
        }
    }

    pub fn absorb(&mut self, batch: BatchStatistics) {
        self.batches += 1;
        self.pages_done += batch.pages;
        self.pages_original_bytes += batch.original_bytes;
        self.pages_compressed_bytes += batch.compressed_bytes;
        for (chosen, n) in batch.wins {
            *self.wins.entry(chosen).or_insert(0) += n;
        }
        self.failures.extend(batch.failures);
    }

    pub fn wins_for(&self, tool: Tool) -> u32 {
        self.wins.get(&Chosen::Tool(tool)).copied().unwrap_or(0)
    }

    pub fn kept_original(&self) -> u32 {
        self.wins.get(&Chosen::KeptOriginal).copied().unwrap_or(0)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `final_bytes` is the shipped document size when a merge ran; otherwise
    /// the page outputs stand in for it. The baseline is always the input
    /// file, never the sum of split pages, which carry per-page overhead.
    pub fn summary(&self, final_bytes: Option<u64>) -> Summary {
        let compressed_bytes = final_bytes.unwrap_or(self.pages_compressed_bytes);
        let original_bytes = self.original_file_bytes;
        Summary {
            page_count: self.total_pages,
            pages_compressed: self.pages_done,
            pages_failed: self.failures.len() as u32,
            original_bytes,
            compressed_bytes,
            pages_original_bytes: self.pages_original_bytes,
            pages_compressed_bytes: self.pages_compressed_bytes,
            saved_percent: saved_percent(original_bytes, compressed_bytes),
            elapsed_seconds: self.elapsed().as_secs_f64(),
            tool_wins: self
                .wins
                .iter()
                .filter_map(|(c, n)| match c {
                    Chosen::Tool(t) => Some((t.name().to_string(), *n)),
                    Chosen::KeptOriginal => None,
                })
                .collect(),
            kept_original: self.kept_original(),
        }
    }
}

/// Percentage of `original` saved. `None` when there is nothing to compare
/// against, so no NaN or infinity ever reaches output.
pub fn saved_percent(original: u64, compressed: u64) -> Option<f64> {
    if original == 0 {
        return None;
    }
    Some((1.0 - compressed as f64 / original as f64) * 100.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub page_count: u32,
    pub pages_compressed: u32,
    pub pages_failed: u32,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    /// Sums over the split pages and their chosen outputs.
    pub pages_original_bytes: u64,
    pub pages_compressed_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_percent: Option<f64>,
    pub elapsed_seconds: f64,
    pub tool_wins: BTreeMap<String, u32>,
    pub kept_original: u32,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pages:       {} ({} failed)", self.page_count, self.pages_failed)?;
        writeln!(
            f,
            "original:    {} ({} bytes)",
            format_bytes(self.original_bytes),
            self.original_bytes
        )?;
        writeln!(
            f,
            "compressed:  {} ({} bytes)",
            format_bytes(self.compressed_bytes),
            self.compressed_bytes
        )?;
        match self.saved_percent {
            Some(p) => writeln!(f, "saved:       {p:.1}%")?,
            None => writeln!(f, "saved:       n/a")?,
        }
        writeln!(f, "elapsed:     {:.1}s", self.elapsed_seconds)?;
        write!(f, "wins:       ")?;
        for (tool, n) in &self.tool_wins {
            write!(f, " {tool}={n}")?;
        }
        write!(f, " kept-original={}", self.kept_original)
    }
}
