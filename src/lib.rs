pub mod batch_plan;
pub mod cli;
pub mod compressor;
pub mod config;
pub mod error;
pub mod merger;
pub mod metadata;
pub mod pdf;
pub mod pipeline;
pub mod preflight;
pub mod report;
pub mod stats;
pub mod thumbnail;
pub mod tools;
pub mod util;
