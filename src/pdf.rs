//! Page split and concatenate on top of lopdf.

use anyhow::{anyhow, Context, Result};
use lopdf::{dictionary, Document, Object, ObjectId};
use std::path::Path;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

#[derive(Debug)]
pub struct PdfDocument {
    doc: Document,
}

impl PdfDocument {
    pub fn open(path: &Path) -> Result<Self> {
        let doc = Document::load(path).with_context(|| format!("loading PDF: {}", path.display()))?;
        Ok(Self { doc })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes).with_context(|| "loading PDF from memory")?;
        Ok(Self { doc })
    }

    pub fn page_count(&self) -> u32 {
        self.doc.get_pages().len() as u32
    }

    /// Extracts page `page` (1-based) as a standalone single-page document.
    pub fn split_page(&self, page: u32) -> Result<Vec<u8>> {
        let count = self.page_count();
        if page == 0 || page > count {
            return Err(anyhow!("page {page} out of range (document has {count} pages)"));
        }

        let mut doc = self.doc.clone();
        let page_id = *doc
            .get_pages()
            .get(&page)
            .ok_or_else(|| anyhow!("page {page} missing from page tree"))?;
        flatten_inherited(&mut doc, page_id)?;

        let others: Vec<u32> = (1..=count).filter(|&p| p != page).collect();
        if !others.is_empty() {
            doc.delete_pages(&others);
        }
        doc.prune_objects();
        doc.compress();

        let mut buf = Vec::new();
        doc.save_to(&mut buf)
            .with_context(|| format!("serializing page {page}"))?;
        Ok(buf)
    }
}

/// Joins documents in the given order into one document.
pub fn concatenate(parts: &[Vec<u8>]) -> Result<Vec<u8>> {
    if parts.is_empty() {
        return Err(anyhow!("nothing to concatenate"));
    }
    if parts.len() == 1 {
        Document::load_mem(&parts[0]).context("loading the only part")?;
        return Ok(parts[0].clone());
    }

    let mut out = Document::with_version("1.5");
    let pages_id = out.new_object_id();
    let mut kids: Vec<ObjectId> = Vec::new();
    let mut next_id = out.max_id + 1;

    for (i, bytes) in parts.iter().enumerate() {
        let mut doc = Document::load_mem(bytes)
            .with_context(|| format!("loading part {} for concatenation", i + 1))?;
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        for &id in &page_ids {
            flatten_inherited(&mut doc, id)?;
        }

        for (id, object) in doc.objects {
            if page_ids.contains(&id) {
                let Object::Dictionary(mut dict) = object else {
                    return Err(anyhow!("part {}: page object is not a dictionary", i + 1));
                };
                dict.set("Parent", Object::Reference(pages_id));
                out.objects.insert(id, Object::Dictionary(dict));
                continue;
            }
            match object.type_name().unwrap_or(b"") {
                b"Catalog" | b"Pages" | b"Outlines" | b"Outline" => {}
                _ => {
                    out.objects.insert(id, object);
                }
            }
        }
        kids.extend(page_ids);
    }

    out.max_id = next_id.saturating_sub(1).max(pages_id.0);
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids.iter().map(|&id| Object::Reference(id)).collect::<Vec<_>>(),
        "Count" => kids.len() as i64,
    };
    out.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = out.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    out.trailer.set("Root", Object::Reference(catalog_id));

    out.prune_objects();
    out.compress();

    let mut buf = Vec::new();
    out.save_to(&mut buf)
        .with_context(|| "serializing concatenated document")?;
    Ok(buf)
}

/// Copies inheritable attributes from ancestor page-tree nodes onto the page,
/// so the page survives being detached from its original tree.
fn flatten_inherited(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    let mut found: Vec<(&[u8], Object)> = Vec::new();
    {
        let page = doc.get_dictionary(page_id)?;
        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
        let mut depth = 0;
        while let Some(pid) = parent {
            // Guard against cyclic Parent chains in damaged files.
            depth += 1;
            if depth > 64 {
                break;
            }
            let Ok(node) = doc.get_dictionary(pid) else {
                break;
            };
            for key in INHERITABLE {
                if page.get(key).is_err()
                    && !found.iter().any(|(k, _)| *k == key)
                    && let Ok(v) = node.get(key)
                {
                    found.push((key, v.clone()));
                }
            }
            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        }
    }
    if found.is_empty() {
        return Ok(());
    }
    let page = doc.get_dictionary_mut(page_id)?;
    for (key, value) in found {
        page.set(key.to_vec(), value);
    }
    Ok(())
}
