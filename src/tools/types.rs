use crate::config::Config;
use serde::{Deserialize, Serialize, Serializer};
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::process::ExitStatus;

/// A configured compressor chain. The set is closed: tools are never built
/// from free-form command strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tool {
    /// Lossy pdfwrite re-distillation with image downsampling.
    Ghostscript,
    /// Lossless structural rewrite with object streams and max flate.
    Qpdf,
    /// The qpdf rewrite followed by a mutool garbage-collecting clean.
    QpdfMutool,
}

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Tool::Ghostscript => "ghostscript",
            Tool::Qpdf => "qpdf",
            Tool::QpdfMutool => "qpdf-mutool",
        }
    }

    /// Sub-steps run in order, each reading the previous step's output.
    pub fn steps(self) -> &'static [Step] {
        match self {
            Tool::Ghostscript => &[Step::GhostscriptDistill],
            Tool::Qpdf => &[Step::QpdfRewrite],
            Tool::QpdfMutool => &[Step::QpdfRewrite, Step::MutoolClean],
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    GhostscriptDistill,
    QpdfRewrite,
    MutoolClean,
}

impl Step {
    pub fn program(self, cfg: &Config) -> &str {
        match self {
            Step::GhostscriptDistill => &cfg.ghostscript.executable,
            Step::QpdfRewrite => &cfg.qpdf.executable,
            Step::MutoolClean => &cfg.mutool.executable,
        }
    }

    pub fn args(self, cfg: &Config, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        match self {
            Step::GhostscriptDistill => {
                let gs = &cfg.ghostscript;
                for a in [
                    "-sDEVICE=pdfwrite".to_string(),
                    "-dCompatibilityLevel=1.5".to_string(),
                    format!("-dPDFSETTINGS={}", gs.pdf_settings),
                    "-dDownsampleColorImages=true".to_string(),
                    format!("-dColorImageResolution={}", gs.image_resolution),
                    "-dDownsampleGrayImages=true".to_string(),
                    format!("-dGrayImageResolution={}", gs.image_resolution),
                    "-dDownsampleMonoImages=true".to_string(),
                    format!("-dMonoImageResolution={}", gs.mono_image_resolution),
                    format!("-dJPEGQ={}", gs.jpeg_quality),
                    "-dNOPAUSE".to_string(),
                    "-dQUIET".to_string(),
                    "-dBATCH".to_string(),
                    "-dSAFER".to_string(),
                ] {
                    args.push(a.into());
                }
                let mut out = OsString::from("-sOutputFile=");
                out.push(output);
                args.push(out);
                args.push(input.into());
            }
            Step::QpdfRewrite => {
                for a in [
                    "--object-streams=generate".to_string(),
                    "--compress-streams=y".to_string(),
                    "--recompress-flate".to_string(),
                    format!("--compression-level={}", cfg.qpdf.compression_level),
                ] {
                    args.push(a.into());
                }
                args.push(input.into());
                args.push(output.into());
            }
            Step::MutoolClean => {
                args.push("clean".into());
                args.push(format!("-{}", "g".repeat(cfg.mutool.garbage_level as usize)).into());
                args.push("-z".into());
                args.push(input.into());
                args.push(output.into());
            }
        }
        args
    }

    /// qpdf exits 3 when it succeeded with warnings.
    pub fn succeeded(self, status: ExitStatus) -> bool {
        match self {
            Step::QpdfRewrite => matches!(status.code(), Some(0) | Some(3)),
            _ => status.success(),
        }
    }
}

/// Which candidate ended up as a page's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Chosen {
    Tool(Tool),
    KeptOriginal,
}

impl fmt::Display for Chosen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chosen::Tool(t) => f.write_str(t.name()),
            Chosen::KeptOriginal => f.write_str("kept-original"),
        }
    }
}

impl Serialize for Chosen {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
