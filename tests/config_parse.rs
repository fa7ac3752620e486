use pdf_squeeze::config::Config;
use pdf_squeeze::tools::Tool;

#[test]
fn parse_example_config() {
    let raw = include_str!("../pdf-squeeze.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert_eq!(cfg.global.batch_size, 100);
    assert_eq!(
        cfg.tools.enabled,
        vec![Tool::Ghostscript, Tool::Qpdf, Tool::QpdfMutool]
    );
    assert!(cfg.validate().is_ok());
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let cfg: Config = toml::from_str("[global]\nbatch_size = 10\nconcurrency = 2\nmerge = false\nkeep_pages = true\nmetadata = false\nthumbnails = false\nprint_summary = false\nwrite_report_json = false\n").expect("parse TOML");
    assert_eq!(cfg.global.batch_size, 10);
    assert_eq!(cfg.paths.out_dir, "out");
    assert_eq!(cfg.tools.timeout_seconds, 300);
}

#[test]
fn tool_order_is_preserved() {
    let cfg: Config = toml::from_str("[tools]\nenabled = [\"qpdf\", \"ghostscript\"]\ntimeout_seconds = 0\n").expect("parse TOML");
    assert_eq!(cfg.tools.enabled, vec![Tool::Qpdf, Tool::Ghostscript]);
}

#[test]
fn unknown_tool_is_rejected() {
    let res: Result<Config, _> = toml::from_str("[tools]\nenabled = [\"rm -rf\"]\ntimeout_seconds = 0\n");
    assert!(res.is_err());
}

#[test]
fn zero_batch_size_or_concurrency_is_invalid() {
    let mut cfg = Config::default();
    cfg.global.batch_size = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.global.concurrency = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn duplicate_tools_are_invalid() {
    let mut cfg = Config::default();
    cfg.tools.enabled = vec![Tool::Qpdf, Tool::Qpdf];
    assert!(cfg.validate().is_err());
}
