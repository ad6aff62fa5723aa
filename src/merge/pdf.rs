//! PDF side of the merge — load/validate page PDFs and stitch them into
//! one document with lopdf.
//!
//! The merge renumbers every object, collects all page objects under a
//! single Pages node and relinks one Catalog. Input order is preserved:
//! renumbering is monotonic across documents, so iterating page ids in
//! order reproduces the caller's ordering.

use anyhow::{bail, Context, Result};
use lopdf::{Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::path::Path;

/// Open a per-page PDF and verify it is usable: it parses, has at least
/// one page, and yields first-page text. A file that fails any of these
/// is a repair candidate.
pub fn load_validated(path: &Path) -> Result<Document> {
    let doc = Document::load(path)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    if doc.get_pages().is_empty() {
        bail!("{} contains no pages", path.display());
    }
    doc.extract_text(&[1])
        .with_context(|| format!("failed to extract text from {}", path.display()))?;
    Ok(doc)
}

/// Merge documents into one, preserving the order of `docs`.
pub fn merge_documents(docs: Vec<Document>) -> Result<Document> {
    if docs.is_empty() {
        bail!("nothing to merge");
    }

    let mut max_id = 1;
    let mut documents_pages: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut documents_objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for mut doc in docs {
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        for (_, object_id) in doc.get_pages() {
            let page = doc
                .get_object(object_id)
                .context("page object missing from its own document")?
                .clone();
            documents_pages.insert(object_id, page);
        }
        documents_objects.extend(doc.objects);
    }

    let mut merged = Document::with_version("1.5");
    let mut catalog_object: Option<(ObjectId, Object)> = None;
    let mut pages_object: Option<(ObjectId, Object)> = None;

    for (object_id, object) in documents_objects {
        let kind = object_kind(&object).map(<[u8]>::to_vec);
        match kind.as_deref() {
            Some(b"Catalog") => {
                catalog_object.get_or_insert((object_id, object));
            }
            Some(b"Pages") => {
                // Fold every source Pages dictionary into one.
                if let Ok(dict) = object.as_dict() {
                    let mut dict = dict.clone();
                    if let Some((_, ref existing)) = pages_object {
                        if let Ok(existing) = existing.as_dict() {
                            dict.extend(existing);
                        }
                    }
                    let id = pages_object
                        .as_ref()
                        .map(|(id, _)| *id)
                        .unwrap_or(object_id);
                    pages_object = Some((id, Object::Dictionary(dict)));
                }
            }
            // Page objects are re-inserted below with relinked parents;
            // outlines from single-page OCR output are dropped.
            Some(b"Page") => {}
            Some(b"Outlines") | Some(b"Outline") => {}
            _ => {
                merged.objects.insert(object_id, object);
            }
        }
    }

    let (pages_id, pages_dict) =
        pages_object.context("no Pages object found in any input")?;
    let (catalog_id, catalog_dict) =
        catalog_object.context("no Catalog object found in any input")?;

    for (object_id, object) in &documents_pages {
        if let Ok(dict) = object.as_dict() {
            let mut dict = dict.clone();
            dict.set("Parent", pages_id);
            merged.objects.insert(*object_id, Object::Dictionary(dict));
        }
    }

    if let Ok(dict) = pages_dict.as_dict() {
        let mut dict = dict.clone();
        dict.set("Count", documents_pages.len() as u32);
        dict.set(
            "Kids",
            documents_pages
                .keys()
                .map(|id| Object::Reference(*id))
                .collect::<Vec<_>>(),
        );
        merged.objects.insert(pages_id, Object::Dictionary(dict));
    }

    if let Ok(dict) = catalog_dict.as_dict() {
        let mut dict = dict.clone();
        dict.set("Pages", pages_id);
        dict.remove(b"Outlines");
        merged.objects.insert(catalog_id, Object::Dictionary(dict));
    }

    merged.trailer.set("Root", catalog_id);
    merged.max_id = merged.objects.len() as u32;
    merged.renumber_objects();
    merged.adjust_zero_pages();
    merged.compress();
    Ok(merged)
}

fn object_kind(object: &Object) -> Option<&[u8]> {
    let dict = object.as_dict().ok()?;
    match dict.get(b"Type").ok()? {
        Object::Name(name) => Some(name.as_slice()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream};

    fn one_page_doc(text: &str) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 48.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().unwrap(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            "Resources" => resources_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    #[test]
    fn merge_preserves_page_count_and_order() {
        let docs = vec![
            one_page_doc("alpha"),
            one_page_doc("beta"),
            one_page_doc("gamma"),
        ];
        let merged = merge_documents(docs).unwrap();
        assert_eq!(merged.get_pages().len(), 3);

        let first = merged.extract_text(&[1]).unwrap();
        let last = merged.extract_text(&[3]).unwrap();
        assert!(first.contains("alpha"), "got {:?}", first);
        assert!(last.contains("gamma"), "got {:?}", last);
    }

    #[test]
    fn merged_document_survives_a_save_load_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged.pdf");

        let mut merged =
            merge_documents(vec![one_page_doc("one"), one_page_doc("two")]).unwrap();
        merged.save(&path).unwrap();

        let reloaded = load_validated(&path).unwrap();
        assert_eq!(reloaded.get_pages().len(), 2);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(merge_documents(Vec::new()).is_err());
    }

    #[test]
    fn garbage_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.5 this is not really a pdf").unwrap();
        assert!(load_validated(&path).is_err());
    }
}
