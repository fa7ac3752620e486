#![allow(dead_code)]

use anyhow::Result;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};
use pdf_squeeze::config::Config;
use pdf_squeeze::error::ToolError;
use pdf_squeeze::metadata::MetadataReader;
use pdf_squeeze::thumbnail::Thumbnailer;
use pdf_squeeze::tools::{Tool, ToolRunner};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Deterministic filler that does not deflate.
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut x = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            (x >> 24) as u8
        })
        .collect()
}

fn image_stream(payload: Vec<u8>) -> Stream {
    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => 8,
        "Height" => 8,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "DCTDecode",
    };
    Stream::new(dict, payload)
}

/// A document with one page per entry; each page carries an image payload of
/// that many bytes and the text `Page N`.
pub fn build_pdf(payloads: &[usize]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for (i, &len) in payloads.iter().enumerate() {
        let n = i + 1;
        let image_id = doc.add_object(image_stream(noise(len, n as u64)));
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
                Operation::new("BT", vec![]),
                Operation::new("Tj", vec![Object::string_literal(format!("Page {n}"))]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
        let resources = dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        };
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources,
        });
        kids.push(Object::Reference(page_id));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => payloads.len() as i64,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(612), Object::Integer(792)],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

/// Text drawn on page `page` of the PDF at `path`.
pub fn page_text(path: &Path, page: u32) -> String {
    let doc = Document::load(path).unwrap();
    let id = *doc.get_pages().get(&page).unwrap();
    String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).into_owned()
}

pub fn page_count(path: &Path) -> u32 {
    Document::load(path).unwrap().get_pages().len() as u32
}

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Keep this fraction of every image payload.
    Shrink(f64),
    /// Add this many bytes of junk.
    Grow(usize),
    Fail,
}

/// Tool runner driven by a per-(page, tool) script instead of processes.
pub struct ScriptedRunner {
    pub default: Behavior,
    pub script: HashMap<(u32, Tool), Behavior>,
    pub delay: Option<fn(u32) -> Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new(default: Behavior) -> Self {
        Self {
            default,
            script: HashMap::new(),
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn on(mut self, page: u32, tool: Tool, b: Behavior) -> Self {
        self.script.insert((page, tool), b);
        self
    }

    fn apply(&self, b: Behavior, tool: Tool, input: &Path, output: &Path) -> Result<u64, ToolError> {
        let fail = |e: String| ToolError::execution(tool, e);
        let mut doc = Document::load(input).map_err(|e| fail(e.to_string()))?;
        match b {
            Behavior::Fail => return Err(fail("scripted failure".into())),
            Behavior::Shrink(f) => {
                for obj in doc.objects.values_mut() {
                    if let Object::Stream(s) = obj
                        && matches!(s.dict.get(b"Filter"), Ok(Object::Name(n)) if n == b"DCTDecode")
                    {
                        let keep = (s.content.len() as f64 * f) as usize;
                        let content = s.content[..keep].to_vec();
                        s.set_content(content);
                    }
                }
            }
            Behavior::Grow(n) => {
                doc.add_object(image_stream(noise(n, 99)));
            }
        }
        doc.save(output).map_err(|e| fail(e.to_string()))?;
        Ok(std::fs::metadata(output).map_err(|e| fail(e.to_string()))?.len())
    }
}

pub fn page_of(path: &Path) -> u32 {
    let name = path.file_stem().unwrap().to_str().unwrap();
    name.trim_start_matches("page_").parse().unwrap()
}

impl ToolRunner for ScriptedRunner {
    fn run(&self, tool: Tool, input: &Path, output: &Path) -> Result<u64, ToolError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let page = page_of(input);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay(page));
        }
        let b = self.script.get(&(page, tool)).copied().unwrap_or(self.default);
        let res = self.apply(b, tool, input, output);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        res
    }
}

pub struct FakeThumbnailer;

impl Thumbnailer for FakeThumbnailer {
    fn render_first_page(&self, _pdf: &Path) -> Result<Vec<u8>> {
        Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])
    }
}

pub struct FakeMetadata;

impl MetadataReader for FakeMetadata {
    fn read_info(&self, pdf: &Path) -> Result<String> {
        Ok(format!("Pages: {}\n", page_count(pdf)))
    }
}

/// Config rooted in `dir`, with the two-tool set used by the scenarios.
pub fn test_config(dir: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.out_dir = dir.join("out").display().to_string();
    cfg.paths.temp_parent = dir.join("tmp").display().to_string();
    cfg.tools.enabled = vec![Tool::Ghostscript, Tool::Qpdf];
    cfg.global.thumbnails = false;
    cfg.global.metadata = false;
    cfg.global.print_summary = false;
    cfg
}

pub fn write_input(dir: &Path, name: &str, payloads: &[usize]) -> std::path::PathBuf {
    let p = dir.join(name);
    std::fs::write(&p, build_pdf(payloads)).unwrap();
    p
}
