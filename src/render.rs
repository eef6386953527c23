//! Highlight renderer.
//!
//! Adds one `/Highlight` annotation per matched word to a copy of the source
//! PDF. Existing content streams and annotations are left as they are; pages
//! without matches are not touched at all.
//!
//! OCR boxes are normalized with a top-left origin. They are scaled to the
//! page's visible box (`/CropBox`, else `/MediaBox`, both inheritable) and
//! flipped into PDF user space, whose origin is bottom-left:
//!
//! ```text
//! x0 = left * W            y0 = top * H
//! x1 = (left + width) * W  y1 = (top + height) * H
//! ```

use std::collections::BTreeMap;

use lopdf::{dictionary, text_string, Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::models::{ExtractedWord, NormalizedBox};

/// US Letter, used when a page declares no box at all.
const DEFAULT_PAGE_BOX: PageBox = PageBox {
    llx: 0.0,
    lly: 0.0,
    urx: 612.0,
    ury: 792.0,
};

/// Guard against malformed `/Parent` cycles.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Colour and opacity of the highlight marks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighlightStyle {
    pub color: [f32; 3],
    pub opacity: f32,
}

impl Default for HighlightStyle {
    fn default() -> Self {
        Self::from(&RenderConfig::default())
    }
}

impl From<&RenderConfig> for HighlightStyle {
    fn from(config: &RenderConfig) -> Self {
        Self {
            color: config.color,
            opacity: config.opacity,
        }
    }
}

/// Visible area of a page in PDF user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub llx: f64,
    pub lly: f64,
    pub urx: f64,
    pub ury: f64,
}

impl PageBox {
    pub fn width(&self) -> f64 {
        self.urx - self.llx
    }

    pub fn height(&self) -> f64 {
        self.ury - self.lly
    }
}

/// A highlight rectangle in page coordinates with a top-left origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighlightRect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl HighlightRect {
    pub fn from_normalized(bbox: &NormalizedBox, page_width: f64, page_height: f64) -> Self {
        Self {
            x0: bbox.left * page_width,
            y0: bbox.top * page_height,
            x1: (bbox.left + bbox.width) * page_width,
            y1: (bbox.top + bbox.height) * page_height,
        }
    }

    /// `[llx, lly, urx, ury]` in PDF user space for `page`.
    fn to_user_space(self, page: &PageBox) -> [f32; 4] {
        [
            (page.llx + self.x0) as f32,
            (page.ury - self.y1) as f32,
            (page.llx + self.x1) as f32,
            (page.ury - self.y0) as f32,
        ]
    }
}

/// Return a copy of `document` with every word in `words` highlighted.
pub fn render(
    document: &[u8],
    words: &[ExtractedWord],
    style: &HighlightStyle,
) -> Result<Vec<u8>, RenderError> {
    let mut doc = Document::load_mem(document).map_err(|e| RenderError::Load(e.to_string()))?;
    let pages = doc.get_pages();

    let mut by_page: BTreeMap<u32, Vec<&ExtractedWord>> = BTreeMap::new();
    for word in words {
        by_page.entry(word.page).or_default().push(word);
    }

    for (page_no, page_words) in by_page {
        let page_id = *pages.get(&page_no).ok_or(RenderError::PageOutOfRange {
            page: page_no,
            pages: pages.len(),
        })?;
        let page_box = page_box(&doc, page_id);
        debug!(page = page_no, words = page_words.len(), "adding highlights");

        let mut annots = Vec::with_capacity(page_words.len());
        for word in page_words {
            let rect = HighlightRect::from_normalized(&word.bbox, page_box.width(), page_box.height())
                .to_user_space(&page_box);
            annots.push(add_highlight(&mut doc, page_id, rect, &word.text, style));
        }
        append_annotations(&mut doc, page_id, annots)?;
    }

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| RenderError::Save(e.to_string()))?;
    Ok(out)
}

/// Resolve the page's visible box, walking `/Parent` for inherited values.
pub fn page_box(doc: &Document, page_id: ObjectId) -> PageBox {
    let mut current = Some(page_id);
    for _ in 0..MAX_INHERITANCE_DEPTH {
        let Some(id) = current else { break };
        let Ok(dict) = doc.get_dictionary(id) else { break };
        for key in [b"CropBox".as_slice(), b"MediaBox".as_slice()] {
            if let Some(found) = dict.get(key).ok().and_then(|o| read_box(doc, o)) {
                return found;
            }
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    DEFAULT_PAGE_BOX
}

fn read_box(doc: &Document, obj: &Object) -> Option<PageBox> {
    let values: Vec<f64> = resolve(doc, obj)?
        .as_array()
        .ok()?
        .iter()
        .filter_map(|o| number(resolve(doc, o)?))
        .collect();
    if values.len() != 4 {
        return None;
    }
    let page = PageBox {
        llx: values[0].min(values[2]),
        lly: values[1].min(values[3]),
        urx: values[0].max(values[2]),
        ury: values[1].max(values[3]),
    };
    (page.width() > 0.0 && page.height() > 0.0).then_some(page)
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn reals(values: &[f32]) -> Object {
    Object::Array(values.iter().map(|v| Object::Real(*v)).collect())
}

/// Create the annotation and its appearance stream; returns the annotation id.
fn add_highlight(
    doc: &mut Document,
    page_id: ObjectId,
    rect: [f32; 4],
    text: &str,
    style: &HighlightStyle,
) -> ObjectId {
    let [llx, lly, urx, ury] = rect;
    let [r, g, b] = style.color;

    let content = format!(
        "q /GS0 gs {} {} {} rg {} {} {} {} re f Q",
        r,
        g,
        b,
        llx,
        lly,
        urx - llx,
        ury - lly
    );
    let appearance = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => reals(&rect),
            "Resources" => dictionary! {
                "ExtGState" => dictionary! {
                    "GS0" => dictionary! {
                        "Type" => "ExtGState",
                        "BM" => "Multiply",
                        "CA" => Object::Real(style.opacity),
                        "ca" => Object::Real(style.opacity),
                    },
                },
            },
        },
        content.into_bytes(),
    );
    let appearance_id = doc.add_object(appearance);

    doc.add_object(dictionary! {
        "Type" => "Annot",
        "Subtype" => "Highlight",
        "Rect" => reals(&rect),
        "QuadPoints" => reals(&[llx, ury, urx, ury, llx, lly, urx, lly]),
        "C" => reals(&style.color),
        "CA" => Object::Real(style.opacity),
        "F" => 4,
        "P" => page_id,
        "Contents" => text_string(text),
        "AP" => dictionary! { "N" => appearance_id },
    })
}

/// Append annotation references to the page's `/Annots`, wherever it lives.
fn append_annotations(
    doc: &mut Document,
    page_id: ObjectId,
    annots: Vec<ObjectId>,
) -> Result<(), RenderError> {
    let refs: Vec<Object> = annots.into_iter().map(Object::Reference).collect();
    let existing = doc
        .get_dictionary(page_id)
        .map_err(|e| RenderError::Load(e.to_string()))?
        .get(b"Annots")
        .ok()
        .cloned();

    match existing {
        Some(Object::Reference(array_id)) => {
            let array = doc
                .get_object_mut(array_id)
                .and_then(Object::as_array_mut)
                .map_err(|e| RenderError::Load(format!("page /Annots: {}", e)))?;
            array.extend(refs);
        }
        Some(Object::Array(mut array)) => {
            array.extend(refs);
            page_dict_mut(doc, page_id)?.set("Annots", Object::Array(array));
        }
        _ => {
            page_dict_mut(doc, page_id)?.set("Annots", Object::Array(refs));
        }
    }
    Ok(())
}

fn page_dict_mut(doc: &mut Document, page_id: ObjectId) -> Result<&mut Dictionary, RenderError> {
    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| RenderError::Load(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    fn word(text: &str, page: u32, bbox: (f64, f64, f64, f64)) -> ExtractedWord {
        ExtractedWord {
            text: text.to_string(),
            bbox: NormalizedBox::new(bbox.0, bbox.1, bbox.2, bbox.3).unwrap(),
            page,
            line: None,
        }
    }

    /// Two-page document; page 1 already carries a link annotation.
    fn sample_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tj", vec![Object::string_literal("invoice 123")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let link_id = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![0.into(), 0.into(), 10.into(), 10.into()],
        });
        let page1 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Annots" => vec![Object::Reference(link_id)],
        });
        let page2 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 400.into(), 500.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page1.into(), page2.into()],
                "Count" => 2,
                "MediaBox" => vec![0.into(), 0.into(), 800.into(), 1000.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn annotations(doc: &Document, page: u32) -> Vec<Dictionary> {
        let page_id = doc.get_pages()[&page];
        let page_dict = doc.get_dictionary(page_id).unwrap();
        let Ok(annots) = page_dict.get(b"Annots") else {
            return Vec::new();
        };
        let annots = match annots {
            Object::Reference(id) => doc.get_object(*id).unwrap(),
            other => other,
        };
        annots
            .as_array()
            .unwrap()
            .iter()
            .map(|o| {
                doc.get_dictionary(o.as_reference().unwrap())
                    .unwrap()
                    .clone()
            })
            .collect()
    }

    fn floats(obj: &Object) -> Vec<f64> {
        obj.as_array()
            .unwrap()
            .iter()
            .map(|o| number(o).unwrap())
            .collect()
    }

    #[test]
    fn normalized_box_scales_to_page_pixels() {
        let bbox = NormalizedBox::new(0.1, 0.2, 0.3, 0.1).unwrap();
        let rect = HighlightRect::from_normalized(&bbox, 800.0, 1000.0);
        assert!(close(rect.x0, 80.0));
        assert!(close(rect.y0, 200.0));
        assert!(close(rect.x1, 320.0));
        assert!(close(rect.y1, 300.0));
    }

    #[test]
    fn user_space_flips_y_and_applies_origin() {
        let rect = HighlightRect {
            x0: 80.0,
            y0: 200.0,
            x1: 320.0,
            y1: 300.0,
        };
        let page = PageBox {
            llx: 10.0,
            lly: 20.0,
            urx: 810.0,
            ury: 1020.0,
        };
        assert_eq!(rect.to_user_space(&page), [90.0, 720.0, 330.0, 820.0]);
    }

    #[test]
    fn highlights_land_on_their_page_only() {
        let words = vec![word("invoice", 1, (0.1, 0.2, 0.3, 0.1))];
        let out = render(&sample_pdf(), &words, &HighlightStyle::default()).unwrap();
        let doc = Document::load_mem(&out).unwrap();

        let page1 = annotations(&doc, 1);
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].get(b"Subtype").unwrap().as_name().unwrap(), b"Link");
        let highlight = &page1[1];
        assert_eq!(
            highlight.get(b"Subtype").unwrap().as_name().unwrap(),
            b"Highlight"
        );
        let rect = floats(highlight.get(b"Rect").unwrap());
        // Inherited 800x1000 MediaBox, (80,200)-(320,300) from the top.
        assert!(close(rect[0], 80.0));
        assert!(close(rect[1], 700.0));
        assert!(close(rect[2], 320.0));
        assert!(close(rect[3], 800.0));

        assert!(annotations(&doc, 2).is_empty());
    }

    #[test]
    fn page_box_prefers_own_media_box() {
        let doc = Document::load_mem(&sample_pdf()).unwrap();
        let pages = doc.get_pages();
        assert_eq!(page_box(&doc, pages[&1]).width(), 800.0);
        assert_eq!(page_box(&doc, pages[&2]).height(), 500.0);
    }

    #[test]
    fn content_stream_is_preserved() {
        let source = sample_pdf();
        let before = Document::load_mem(&source).unwrap();
        let page_id = before.get_pages()[&1];
        let original = before.get_page_content(page_id).unwrap();

        let words = vec![word("invoice", 1, (0.1, 0.2, 0.3, 0.1))];
        let out = render(&source, &words, &HighlightStyle::default()).unwrap();
        let after = Document::load_mem(&out).unwrap();
        let page_id = after.get_pages()[&1];
        assert_eq!(after.get_page_content(page_id).unwrap(), original);
    }

    #[test]
    fn rerender_gives_same_highlights() {
        let words = vec![
            word("invoice", 1, (0.1, 0.2, 0.3, 0.1)),
            word("invoice", 2, (0.5, 0.5, 0.2, 0.05)),
        ];
        let style = HighlightStyle::default();
        let first = Document::load_mem(&render(&sample_pdf(), &words, &style).unwrap()).unwrap();
        let second = Document::load_mem(&render(&sample_pdf(), &words, &style).unwrap()).unwrap();
        for page in [1, 2] {
            let rects = |doc: &Document| -> Vec<Vec<f64>> {
                annotations(doc, page)
                    .iter()
                    .filter_map(|a| a.get(b"QuadPoints").ok().map(floats))
                    .collect()
            };
            assert_eq!(rects(&first), rects(&second));
        }
    }

    #[test]
    fn indirect_annots_array_is_extended_in_place() {
        let mut doc = Document::load_mem(&sample_pdf()).unwrap();
        let page_id = doc.get_pages()[&1];
        let existing = doc
            .get_dictionary(page_id)
            .unwrap()
            .get(b"Annots")
            .unwrap()
            .clone();
        let array_id = doc.add_object(existing);
        doc.get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("Annots", array_id);
        let mut source = Vec::new();
        doc.save_to(&mut source).unwrap();

        let words = vec![word("invoice", 1, (0.1, 0.2, 0.3, 0.1))];
        let out = render(&source, &words, &HighlightStyle::default()).unwrap();
        let doc = Document::load_mem(&out).unwrap();

        let page_id = doc.get_pages()[&1];
        let annots = doc.get_dictionary(page_id).unwrap().get(b"Annots").unwrap();
        assert!(matches!(annots, Object::Reference(_)));
        let subtypes: Vec<Vec<u8>> = annotations(&doc, 1)
            .iter()
            .map(|a| a.get(b"Subtype").unwrap().as_name().unwrap().to_vec())
            .collect();
        assert_eq!(subtypes, vec![b"Link".to_vec(), b"Highlight".to_vec()]);
    }

    #[test]
    fn non_ascii_contents_are_utf16() {
        let words = vec![
            word("Straße", 1, (0.1, 0.2, 0.3, 0.1)),
            word("invoice", 1, (0.1, 0.4, 0.3, 0.1)),
        ];
        let out = render(&sample_pdf(), &words, &HighlightStyle::default()).unwrap();
        let doc = Document::load_mem(&out).unwrap();
        let contents: Vec<Object> = annotations(&doc, 1)
            .iter()
            .filter_map(|a| a.get(b"Contents").ok().cloned())
            .collect();

        assert!(contents[0].as_str().unwrap().starts_with(&[0xFE, 0xFF]));
        assert_eq!(lopdf::decode_text_string(&contents[0]).unwrap(), "Straße");
        assert_eq!(contents[1].as_str().unwrap(), b"invoice");
    }

    #[test]
    fn missing_page_and_garbage_are_errors() {
        let words = vec![word("x", 9, (0.1, 0.1, 0.1, 0.1))];
        assert!(matches!(
            render(&sample_pdf(), &words, &HighlightStyle::default()),
            Err(RenderError::PageOutOfRange { page: 9, pages: 2 })
        ));
        assert!(matches!(
            render(b"not a pdf", &[], &HighlightStyle::default()),
            Err(RenderError::Load(_))
        ));
    }
}
