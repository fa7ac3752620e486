use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPlan {
    pub page_count: u32,
    pub batch_size: u32,
    pub batches: Vec<PageRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start_page: u32, // 1-based inclusive
    pub end_page: u32,   // 1-based inclusive
}

impl PageRange {
    pub fn len(&self) -> u32 {
        self.end_page + 1 - self.start_page
    }

    pub fn is_empty(&self) -> bool {
        self.end_page < self.start_page
    }

    pub fn pages(&self) -> impl Iterator<Item = u32> {
        self.start_page..=self.end_page
    }
}

impl BatchPlan {
    /// Consecutive batches of at most `batch_size` pages; only the last may be
    /// shorter.
    pub fn from_page_count(page_count: u32, batch_size: usize) -> BatchPlan {
        let size = u32::try_from(batch_size).unwrap_or(u32::MAX).max(1);

        let mut batches = Vec::new();
        let mut p = 1u32;
        while p <= page_count {
            let end = p.saturating_add(size - 1).min(page_count);
            batches.push(PageRange {
                start_page: p,
                end_page: end,
            });
            p = end + 1;
        }

        BatchPlan {
            page_count,
            batch_size: size,
            batches,
        }
    }
}
