use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// Reads the human-readable document info of a PDF.
pub trait MetadataReader {
    fn read_info(&self, pdf: &Path) -> Result<String>;
}

/// Document info via poppler's `pdfinfo`.
pub struct Pdfinfo {
    executable: String,
}

impl Pdfinfo {
    pub fn new(cfg: &Config) -> Self {
        Self {
            executable: cfg.metadata.executable.clone(),
        }
    }
}

impl MetadataReader for Pdfinfo {
    fn read_info(&self, pdf: &Path) -> Result<String> {
        let out = Command::new(&self.executable)
            .arg(pdf)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawning {}", self.executable))?;
        if !out.status.success() {
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.executable,
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}
