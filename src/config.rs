use crate::error::SetupError;
use crate::tools::Tool;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub tools: Tools,
    #[serde(default)]
    pub ghostscript: Ghostscript,
    #[serde(default)]
    pub qpdf: Qpdf,
    #[serde(default)]
    pub mutool: Mutool,
    #[serde(default)]
    pub thumbnails: Thumbnails,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> std::result::Result<(), SetupError> {
        if self.global.batch_size == 0 {
            return Err(SetupError::InvalidConfig("global.batch_size must be >= 1".into()));
        }
        if self.global.concurrency == 0 {
            return Err(SetupError::InvalidConfig("global.concurrency must be >= 1".into()));
        }
        if self.tools.enabled.is_empty() {
            return Err(SetupError::InvalidConfig("tools.enabled must name at least one tool".into()));
        }
        for (i, t) in self.tools.enabled.iter().enumerate() {
            if self.tools.enabled[..i].contains(t) {
                return Err(SetupError::InvalidConfig(format!(
                    "tools.enabled lists {} twice",
                    t.name()
                )));
            }
        }
        if !(1..=4).contains(&self.mutool.garbage_level) {
            return Err(SetupError::InvalidConfig("mutool.garbage_level must be 1..=4".into()));
        }
        if self.qpdf.compression_level > 9 {
            return Err(SetupError::InvalidConfig("qpdf.compression_level must be 0..=9".into()));
        }
        if self.thumbnails.width == 0 {
            return Err(SetupError::InvalidConfig("thumbnails.width must be >= 1".into()));
        }
        Ok(())
    }

    pub fn out_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.out_dir)
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.out_dir().join(&self.paths.pages_dir)
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.out_dir().join(&self.paths.thumbnails_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub batch_size: usize,
    pub concurrency: usize,
    pub merge: bool,
    pub keep_pages: bool,
    pub metadata: bool,
    pub thumbnails: bool,
    pub print_summary: bool,
    pub write_report_json: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 4,
            merge: true,
            keep_pages: true,
            metadata: true,
            thumbnails: true,
            print_summary: true,
            write_report_json: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub out_dir: String,
    pub pages_dir: String,
    pub thumbnails_dir: String,
    /// Parent for the private temp dir; empty means the system temp dir.
    pub temp_parent: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            pages_dir: "pages".into(),
            thumbnails_dir: "thumbnails".into(),
            temp_parent: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub max_input_file_bytes: u64,
    pub max_input_pages: u32,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_file_bytes: 2 * 1024 * 1024 * 1024,
            max_input_pages: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tools {
    /// Enabled tool chains; the order is the tie-break order.
    pub enabled: Vec<Tool>,
    pub timeout_seconds: u64,
}
impl Default for Tools {
    fn default() -> Self {
        Self {
            enabled: vec![Tool::Ghostscript, Tool::Qpdf, Tool::QpdfMutool],
            timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ghostscript {
    pub executable: String,
    pub pdf_settings: String,
    pub image_resolution: u32,
    pub mono_image_resolution: u32,
    pub jpeg_quality: u8,
}
impl Default for Ghostscript {
    fn default() -> Self {
        Self {
            executable: "gs".into(),
            pdf_settings: "/ebook".into(),
            image_resolution: 150,
            mono_image_resolution: 300,
            jpeg_quality: 75,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Qpdf {
    pub executable: String,
    pub compression_level: u8,
}
impl Default for Qpdf {
    fn default() -> Self {
        Self {
            executable: "qpdf".into(),
            compression_level: 9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutool {
    pub executable: String,
    pub garbage_level: u8,
}
impl Default for Mutool {
    fn default() -> Self {
        Self {
            executable: "mutool".into(),
            garbage_level: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thumbnails {
    pub executable: String,
    pub width: u32,
    pub jpeg_quality: u8,
}
impl Default for Thumbnails {
    fn default() -> Self {
        Self {
            executable: "pdftoppm".into(),
            width: 200,
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub executable: String,
}
impl Default for Metadata {
    fn default() -> Self {
        Self {
            executable: "pdfinfo".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}
