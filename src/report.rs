use crate::{
    batch_plan::BatchPlan,
    compressor::CompressionResult,
    merger::MergeFallback,
    preflight::InputProbe,
    stats::{PageFailure, Summary},
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub input: InputProbe,
    pub started: String,
    pub finished: String,
    pub plan: BatchPlan,
    pub summary: Summary,
    pub pages: Vec<CompressionResult>,
    pub failed_pages: Vec<PageFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub output: String,
    pub bytes: u64,
    pub kept_original: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<MergeFallback>,
}
