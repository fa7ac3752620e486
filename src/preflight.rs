use crate::config::Config;
use crate::error::SetupError;
use crate::pdf::PdfDocument;
use crate::util::find_executable;
use serde::Serialize;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct InputProbe {
    pub path: String,
    pub file_bytes: u64,
    pub page_count: u32,
}

/// Opens and sanity-checks the input document.
pub fn probe_input(cfg: &Config, input: &Path) -> Result<(InputProbe, PdfDocument), SetupError> {
    let invalid = |reason: String| SetupError::InputInvalid {
        path: input.to_path_buf(),
        reason,
    };

    if !input.is_file() {
        return Err(SetupError::InputNotFound(input.to_path_buf()));
    }

    match input.extension().and_then(|s| s.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => {}
        Some(_) => return Err(invalid("file extension is not .pdf".into())),
        None => warn!("input has no extension; assuming PDF: {}", input.display()),
    }

    let file_bytes = std::fs::metadata(input)
        .map_err(|e| invalid(format!("stat failed: {e}")))?
        .len();
    if file_bytes > cfg.limits.max_input_file_bytes {
        return Err(invalid(format!(
            "{file_bytes} bytes exceeds limits.max_input_file_bytes"
        )));
    }

    let doc = PdfDocument::open(input).map_err(|e| invalid(format!("{e:#}")))?;
    let page_count = doc.page_count();
    if page_count == 0 {
        return Err(invalid("document has zero pages".into()));
    }
    if page_count > cfg.limits.max_input_pages {
        return Err(invalid(format!(
            "{page_count} pages exceeds limits.max_input_pages"
        )));
    }

    Ok((
        InputProbe {
            path: input.display().to_string(),
            file_bytes,
            page_count,
        },
        doc,
    ))
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutableStatus {
    pub name: String,
    pub needed_by: String,
    pub resolved: Option<String>,
}

/// Executables the configured run will spawn, each with what needs it.
pub fn required_executables(cfg: &Config) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    let mut add = |name: &str, needed_by: &str| match out.iter_mut().find(|(n, _)| n == name) {
        Some((_, by)) => {
            by.push_str(", ");
            by.push_str(needed_by);
        }
        None => out.push((name.to_string(), needed_by.to_string())),
    };

    for tool in &cfg.tools.enabled {
        for step in tool.steps() {
            add(step.program(cfg), tool.name());
        }
    }
    if cfg.global.thumbnails {
        add(&cfg.thumbnails.executable, "thumbnails");
    }
    if cfg.global.metadata {
        add(&cfg.metadata.executable, "metadata");
    }
    out
}

pub fn executable_report(cfg: &Config) -> Vec<ExecutableStatus> {
    required_executables(cfg)
        .into_iter()
        .map(|(name, needed_by)| {
            let resolved = find_executable(&name).map(|p| p.display().to_string());
            ExecutableStatus {
                name,
                needed_by,
                resolved,
            }
        })
        .collect()
}

/// Fails on the first required executable missing from the environment.
pub fn check_executables(cfg: &Config) -> Result<(), SetupError> {
    for status in executable_report(cfg) {
        if status.resolved.is_none() {
            return Err(SetupError::MissingExecutable {
                name: status.name,
                needed_by: status.needed_by,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_executables_are_listed_once() {
        let cfg = Config::default();
        let req = required_executables(&cfg);
        let qpdf: Vec<_> = req.iter().filter(|(n, _)| n == "qpdf").collect();
        assert_eq!(qpdf.len(), 1);
        assert_eq!(qpdf[0].1, "qpdf, qpdf-mutool");
        assert!(req.iter().any(|(n, _)| n == "pdftoppm"));
        assert!(req.iter().any(|(n, _)| n == "pdfinfo"));
    }

    #[test]
    fn disabled_features_need_nothing() {
        let mut cfg = Config::default();
        cfg.global.thumbnails = false;
        cfg.global.metadata = false;
        let req = required_executables(&cfg);
        assert!(!req.iter().any(|(n, _)| n == "pdftoppm" || n == "pdfinfo"));
    }

    #[test]
    fn missing_tool_fails_fast() {
        let mut cfg = Config::default();
        cfg.ghostscript.executable = "no-such-gs-pdf-squeeze".into();
        let err = check_executables(&cfg).unwrap_err();
        assert!(matches!(err, SetupError::MissingExecutable { .. }));
    }

    #[test]
    fn missing_input_is_not_found() {
        let cfg = Config::default();
        let err = probe_input(&cfg, Path::new("/no/such/file.pdf")).unwrap_err();
        assert!(matches!(err, SetupError::InputNotFound(_)));
    }

    #[test]
    fn garbage_input_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("bad.pdf");
        std::fs::write(&p, b"not a pdf").unwrap();
        let err = probe_input(&Config::default(), &p).unwrap_err();
        assert!(matches!(err, SetupError::InputInvalid { .. }));
    }
}
