use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Renders the first page of a PDF as JPEG bytes.
pub trait Thumbnailer: Sync {
    fn render_first_page(&self, pdf: &Path) -> Result<Vec<u8>>;
}

/// Thumbnails via poppler's `pdftoppm`.
pub struct Pdftoppm {
    executable: String,
    width: u32,
    quality: u8,
}

impl Pdftoppm {
    pub fn new(cfg: &Config) -> Self {
        Self {
            executable: cfg.thumbnails.executable.clone(),
            width: cfg.thumbnails.width,
            quality: cfg.thumbnails.jpeg_quality,
        }
    }
}

impl Thumbnailer for Pdftoppm {
    fn render_first_page(&self, pdf: &Path) -> Result<Vec<u8>> {
        let scratch = tempfile::Builder::new()
            .prefix("thumb-")
            .tempdir()
            .with_context(|| "creating thumbnail scratch dir")?;
        let prefix = scratch.path().join("thumb");
        debug!(pdf = %pdf.display(), width = self.width, "render thumbnail");

        let out = Command::new(&self.executable)
            .args(["-jpeg", "-jpegopt"])
            .arg(format!("quality={}", self.quality))
            .args(["-f", "1", "-l", "1", "-singlefile"])
            .arg("-scale-to-x")
            .arg(self.width.to_string())
            .args(["-scale-to-y", "-1"])
            .arg(pdf)
            .arg(&prefix)
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

        let jpg = prefix.with_extension("jpg");
        std::fs::read(&jpg).with_context(|| format!("reading {}", jpg.display()))
    }
}
