//! Page-level edits on whole PDF documents: keep, delete, rotate, combine,
//! compress.
//!
//! Page numbers are 1-based, as produced by [`crate::pages::parse_page_range`].

use anyhow::{Context, Result};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::Error;

/// page attributes a page may take from its ancestors in the page tree
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];
/// guards the parent walk against cyclic page trees
const MAX_TREE_DEPTH: usize = 64;

pub fn load(path: &Path) -> Result<Document> {
    Document::load(path).with_context(|| format!("Failed to open {}", path.display()))
}

pub fn page_count(doc: &Document) -> u32 {
    doc.get_pages().len() as u32
}

/// remove pages one at a time; `descending` must be highest first so the
/// numbers of pages still to be removed do not shift
pub fn remove_pages(doc: &mut Document, descending: &[u32]) {
    debug_assert!(descending.windows(2).all(|w| w[0] > w[1]));
    for &page in descending {
        doc.delete_pages(&[page]);
    }
}

/// keep only the `selected` pages, in document order
pub fn keep_pages(doc: &mut Document, selected: &[u32]) {
    let total = page_count(doc);
    let selected: BTreeSet<u32> = selected.iter().copied().collect();
    let drop: Vec<u32> = (1..=total).rev().filter(|p| !selected.contains(p)).collect();
    remove_pages(doc, &drop);
    doc.prune_objects();
}

/// look up `key` on a page or, failing that, on its nearest ancestor
fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn page_dict_mut(doc: &mut Document, page_id: ObjectId) -> Result<&mut Dictionary> {
    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .with_context(|| format!("Page object {} {} is not a dictionary", page_id.0, page_id.1))
}

/// copy inherited attributes onto the page itself so it survives being
/// moved under another page tree
fn flatten_inherited(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    for key in INHERITABLE {
        if doc.get_dictionary(page_id)?.has(key) {
            continue;
        }
        if let Some(value) = inherited(doc, page_id, key) {
            page_dict_mut(doc, page_id)?.set(key, value);
        }
    }
    Ok(())
}

/// add `degrees` (a multiple of 90) to the rotation of each listed page
pub fn rotate_pages(doc: &mut Document, pages: &[u32], degrees: i64) -> Result<()> {
    if degrees % 90 != 0 {
        return Err(Error::InvalidInput(format!(
            "rotation must be a multiple of 90 degrees, got {degrees}"
        ))
        .into());
    }
    let page_ids = doc.get_pages();
    for page in pages {
        let &page_id = page_ids
            .get(page)
            .with_context(|| format!("Page {} not found", page))?;
        let current = inherited(doc, page_id, b"Rotate")
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(0);
        page_dict_mut(doc, page_id)?.set("Rotate", (current + degrees).rem_euclid(360));
    }
    Ok(())
}

/// a new document holding page `page` of `source` and only the objects it
/// uses; inherited attributes are copied onto the page
pub fn single_page(source: &Document, page: u32) -> Result<Document> {
    let pages = source.get_pages();
    let &page_id = pages
        .get(&page)
        .with_context(|| format!("Page {} not found", page))?;

    let mut page_dict = source.get_dictionary(page_id)?.clone();
    for key in INHERITABLE {
        if !page_dict.has(key) {
            if let Some(value) = inherited(source, page_id, key) {
                page_dict.set(key, value);
            }
        }
    }
    page_dict.remove(b"Parent");

    // links to other pages or tree nodes would pull in the whole document
    let mut fenced: BTreeSet<ObjectId> = pages.values().copied().collect();
    fenced.extend(source.objects.iter().filter_map(|(&id, obj)| {
        obj.as_dict()
            .ok()
            .and_then(|d| d.get(b"Type").ok())
            .and_then(|t| t.as_name_str().ok())
            .is_some_and(|t| t == "Pages")
            .then_some(id)
    }));

    let mut doc = Document::with_version(source.version.clone());
    let mut pending = Vec::new();
    collect_references(&Object::Dictionary(page_dict.clone()), &mut pending);
    while let Some(id) = pending.pop() {
        if fenced.contains(&id) || doc.objects.contains_key(&id) {
            continue;
        }
        if let Ok(object) = source.get_object(id) {
            collect_references(object, &mut pending);
            doc.objects.insert(id, object.clone());
        }
    }

    doc.max_id = source.max_id;
    let pages_id = doc.new_object_id();
    page_dict.set("Parent", pages_id);
    doc.objects.insert(page_id, Object::Dictionary(page_dict));
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.renumber_objects();
    Ok(doc)
}

fn collect_references(object: &Object, out: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => items.iter().for_each(|o| collect_references(o, out)),
        Object::Dictionary(dict) => dict.iter().for_each(|(_, o)| collect_references(o, out)),
        Object::Stream(stream) => stream
            .dict
            .iter()
            .for_each(|(_, o)| collect_references(o, out)),
        _ => {}
    }
}

fn pages_root(doc: &Document) -> Result<ObjectId> {
    doc.catalog()
        .context("Document has no catalog")?
        .get(b"Pages")
        .and_then(Object::as_reference)
        .context("Catalog has no page tree")
}

/// append every page of `src` to the end of `dest`
fn append(dest: &mut Document, mut src: Document) -> Result<()> {
    for page_id in src.get_pages().into_values().collect::<Vec<_>>() {
        flatten_inherited(&mut src, page_id)?;
    }
    src.renumber_objects_with(dest.max_id + 1);
    let src_pages: Vec<ObjectId> = src.get_pages().into_values().collect();

    dest.objects.extend(src.objects);
    dest.max_id = dest.max_id.max(src.max_id);

    let root_id = pages_root(dest)?;
    {
        let root = dest
            .get_object_mut(root_id)
            .and_then(Object::as_dict_mut)
            .context("Page tree root is not a dictionary")?;
        let kids = root
            .get_mut(b"Kids")
            .and_then(Object::as_array_mut)
            .context("Page tree root has no Kids")?;
        kids.extend(src_pages.iter().map(|&id| Object::Reference(id)));
        let count = root.get(b"Count").and_then(Object::as_i64).unwrap_or(0);
        root.set("Count", count + src_pages.len() as i64);
    }
    for page_id in src_pages {
        page_dict_mut(dest, page_id)?.set("Parent", root_id);
    }
    Ok(())
}

/// move inherited attributes from the page tree onto the pages, leaving the
/// root without any values that appended pages could pick up
fn detach_root_attributes(doc: &mut Document) -> Result<()> {
    for page_id in doc.get_pages().into_values().collect::<Vec<_>>() {
        flatten_inherited(doc, page_id)?;
    }
    let root_id = pages_root(doc)?;
    let root = doc
        .get_object_mut(root_id)
        .and_then(Object::as_dict_mut)
        .context("Page tree root is not a dictionary")?;
    for key in INHERITABLE {
        root.remove(key);
    }
    Ok(())
}

/// concatenate documents in the given order
pub fn combine(docs: Vec<Document>) -> Result<Document> {
    let mut docs = docs.into_iter();
    let mut combined = docs.next().context("No documents to combine")?;
    detach_root_attributes(&mut combined)?;
    for (i, doc) in docs.enumerate() {
        append(&mut combined, doc).with_context(|| format!("Failed to append document {}", i + 2))?;
    }
    // drops the appended catalogs and page tree roots
    combined.prune_objects();
    combined.renumber_objects();
    Ok(combined)
}

/// deflate every stream that is not compressed yet and drop unreachable
/// objects
pub fn compress(doc: &mut Document) {
    doc.prune_objects();
    doc.compress();
}

/// set the document info dictionary: producer plus optional title/author
pub fn write_info(doc: &mut Document, title: Option<&str>, author: Option<&str>) {
    let literal = |s: &str| Object::String(s.as_bytes().to_vec(), StringFormat::Literal);
    let mut info = Dictionary::new();
    info.set(
        "Producer",
        literal(&format!("pagefit {}", env!("CARGO_PKG_VERSION"))),
    );
    if let Some(t) = title {
        info.set("Title", literal(t));
    }
    if let Some(a) = author {
        info.set("Author", literal(a));
    }
    let info_id = doc.add_object(Object::Dictionary(info));
    doc.trailer.set("Info", info_id);
}

/// write to `output`, or to stdout when it is "-"
pub fn save(doc: &mut Document, output: &Path) -> Result<()> {
    if output == Path::new("-") {
        let stdout = std::io::stdout();
        let mut out = std::io::BufWriter::new(stdout.lock());
        doc.save_to(&mut out)
            .context("Failed to write PDF to stdout")?;
    } else {
        doc.save(output)
            .with_context(|| format!("Failed to save {}", output.display()))?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream};

    /// build a document whose pages say "<label>-<n>", optionally nesting
    /// the pages under an intermediate node that carries MediaBox/Rotate
    pub(crate) fn make_pdf(num_pages: u32, label: &str, nested: bool) -> Document {
        let mut doc = Document::with_version("1.5");
        let root_id = doc.new_object_id();
        let parent_id = if nested { doc.new_object_id() } else { root_id };

        let mut kids = Vec::new();
        for n in 1..=num_pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new(
                        "Tj",
                        vec![Object::string_literal(format!("{label}-{n}"))],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => parent_id,
                "Contents" => content_id,
            };
            if !nested {
                page.set("MediaBox", vec![0.into(), 0.into(), 612.into(), 792.into()]);
            }
            kids.push(Object::Reference(doc.add_object(page)));
        }

        if nested {
            doc.objects.insert(
                parent_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Pages",
                    "Parent" => root_id,
                    "Kids" => kids,
                    "Count" => num_pages as i64,
                    "MediaBox" => vec![0.into(), 0.into(), 300.into(), 400.into()],
                    "Rotate" => 90,
                }),
            );
            doc.objects.insert(
                root_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Pages",
                    "Kids" => vec![Object::Reference(parent_id)],
                    "Count" => num_pages as i64,
                }),
            );
        } else {
            doc.objects.insert(
                root_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Pages",
                    "Kids" => kids,
                    "Count" => num_pages as i64,
                }),
            );
        }
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => root_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    /// the text label drawn on each page, in page order
    pub(crate) fn page_labels(doc: &Document) -> Vec<String> {
        doc.get_pages()
            .values()
            .map(|&id| {
                let content = Content::decode(&doc.get_page_content(id).unwrap()).unwrap();
                let op = content.operations.iter().find(|op| op.operator == "Tj").unwrap();
                String::from_utf8(op.operands[0].as_str().unwrap().to_vec()).unwrap()
            })
            .collect()
    }

    fn reload(doc: &mut Document) -> Document {
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        Document::load_mem(&buf).unwrap()
    }

    #[test]
    fn remove_pages_descending() {
        let mut doc = make_pdf(5, "p", false);
        remove_pages(&mut doc, &[4, 2]);
        assert_eq!(page_labels(&doc), ["p-1", "p-3", "p-5"]);
        let doc = reload(&mut doc);
        assert_eq!(page_count(&doc), 3);
    }

    #[test]
    fn keep_pages_in_document_order() {
        let mut doc = make_pdf(6, "p", false);
        keep_pages(&mut doc, &[2, 5, 6]);
        assert_eq!(page_labels(&reload(&mut doc)), ["p-2", "p-5", "p-6"]);
    }

    #[test]
    fn keep_pages_ignores_selection_order_and_duplicates() {
        let mut doc = make_pdf(6, "p", false);
        keep_pages(&mut doc, &[6, 2, 6, 2]);
        assert_eq!(page_labels(&reload(&mut doc)), ["p-2", "p-6"]);
    }

    #[test]
    fn rotate_adds_to_existing_rotation() {
        let mut doc = make_pdf(3, "p", false);
        rotate_pages(&mut doc, &[1, 3], 90).unwrap();
        rotate_pages(&mut doc, &[3], 270).unwrap();
        let pages = doc.get_pages();
        let rotation = |n: u32| {
            doc.get_dictionary(pages[&n])
                .unwrap()
                .get(b"Rotate")
                .and_then(Object::as_i64)
                .ok()
        };
        assert_eq!(rotation(1), Some(90));
        assert_eq!(rotation(2), None);
        assert_eq!(rotation(3), Some(0));
    }

    #[test]
    fn rotate_starts_from_inherited_rotation() {
        let mut doc = make_pdf(2, "p", true);
        rotate_pages(&mut doc, &[1], 180).unwrap();
        let pages = doc.get_pages();
        let dict = doc.get_dictionary(pages[&1]).unwrap();
        assert_eq!(dict.get(b"Rotate").unwrap().as_i64().unwrap(), 270);
    }

    #[test]
    fn rotate_rejects_odd_angles() {
        let mut doc = make_pdf(1, "p", false);
        let err = rotate_pages(&mut doc, &[1], 45).unwrap_err();
        assert!(err.to_string().contains("45"));
        assert!(rotate_pages(&mut doc, &[2], 90).is_err());
    }

    #[test]
    fn combine_keeps_input_order() {
        let docs = vec![
            make_pdf(2, "a", false),
            make_pdf(1, "b", false),
            make_pdf(2, "c", false),
        ];
        let mut combined = combine(docs).unwrap();
        let combined = reload(&mut combined);
        assert_eq!(page_labels(&combined), ["a-1", "a-2", "b-1", "c-1", "c-2"]);
    }

    #[test]
    fn combine_preserves_inherited_attributes() {
        let docs = vec![make_pdf(1, "a", false), make_pdf(2, "b", true)];
        let mut combined = combine(docs).unwrap();
        let combined = reload(&mut combined);
        let pages = combined.get_pages();
        let last = combined.get_dictionary(pages[&3]).unwrap();
        let media_box = last.get(b"MediaBox").unwrap().as_array().unwrap();
        assert_eq!(media_box[2].as_i64().unwrap(), 300);
        assert_eq!(last.get(b"Rotate").unwrap().as_i64().unwrap(), 90);
    }

    #[test]
    fn combine_does_not_leak_first_root_attributes() {
        let mut first = make_pdf(1, "a", false);
        let root_id = pages_root(&first).unwrap();
        let root = first.get_object_mut(root_id).unwrap().as_dict_mut().unwrap();
        root.set("Rotate", 90);
        root.set("CropBox", vec![0.into(), 0.into(), 100.into(), 100.into()]);

        let mut combined = combine(vec![first, make_pdf(1, "b", false)]).unwrap();
        let combined = reload(&mut combined);
        let pages = combined.get_pages();
        let rotate = |n: u32| {
            inherited(&combined, pages[&n], b"Rotate").and_then(|o| o.as_i64().ok())
        };
        assert_eq!(rotate(1), Some(90));
        assert_eq!(rotate(2), None);
        assert!(inherited(&combined, pages[&1], b"CropBox").is_some());
        assert!(inherited(&combined, pages[&2], b"CropBox").is_none());
        assert_eq!(page_labels(&combined), ["a-1", "b-1"]);
    }

    #[test]
    fn single_page_takes_only_what_it_uses() {
        let source = make_pdf(4, "p", true);
        let mut doc = single_page(&source, 3).unwrap();
        let doc = reload(&mut doc);
        assert_eq!(page_labels(&doc), ["p-3"]);

        let pages = doc.get_pages();
        let page = doc.get_dictionary(pages[&1]).unwrap();
        assert_eq!(page.get(b"Rotate").unwrap().as_i64().unwrap(), 90);
        let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
        assert_eq!(media_box[3].as_i64().unwrap(), 400);
        // catalog, tree root, page, its content stream
        assert_eq!(doc.objects.len(), 4);
        assert!(single_page(&source, 5).is_err());
    }

    #[test]
    fn compress_deflates_content_streams() {
        let mut doc = make_pdf(1, "p", false);
        let page_id = doc.get_pages()[&1];
        let content_id = doc.get_page_contents(page_id)[0];
        let padding = "0 0 m 100 100 l S\n".repeat(200);
        doc.get_object_mut(content_id)
            .unwrap()
            .as_stream_mut()
            .unwrap()
            .set_content(padding.into_bytes());

        compress(&mut doc);
        let doc = reload(&mut doc);
        let page_id = doc.get_pages()[&1];
        let content_id = doc.get_page_contents(page_id)[0];
        let stream = doc.get_object(content_id).unwrap().as_stream().unwrap();
        assert_eq!(
            stream.dict.get(b"Filter").unwrap().as_name_str().unwrap(),
            "FlateDecode"
        );
    }

    #[test]
    fn combine_requires_input() {
        assert!(combine(Vec::new()).is_err());
    }

    #[test]
    fn info_dictionary() {
        let mut doc = make_pdf(1, "p", false);
        write_info(&mut doc, Some("Scans"), None);
        let doc = reload(&mut doc);
        let info_id = doc.trailer.get(b"Info").unwrap().as_reference().unwrap();
        let info = doc.get_dictionary(info_id).unwrap();
        assert_eq!(info.get(b"Title").unwrap().as_str().unwrap(), b"Scans");
        assert!(info.get(b"Author").is_err());
        let producer = info.get(b"Producer").unwrap().as_str().unwrap();
        assert!(producer.starts_with(b"pagefit "));
    }
}
