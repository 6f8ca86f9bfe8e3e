// src/pdf_extract.rs

use crate::config::ExtractionConfig;
use crate::label::{self, ParsedLabel};
use lopdf::Document;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// The bytes could not be read as a PDF at all. Callers show this as
/// "could not read this file"; no partial label exists.
#[derive(Error, Debug)]
pub enum LabelDecodeError {
    #[error("not a readable PDF: {0}")]
    Malformed(String),
    #[error("PDF is encrypted")]
    Encrypted,
    #[error("PDF has no pages")]
    NoPages,
    #[error("PDF decoding took longer than {0:?}")]
    TimedOut(Duration),
    #[error("PDF decoding worker failed: {0}")]
    Worker(String),
}

impl LabelDecodeError {
    pub fn user_message(&self) -> &'static str {
        "could not read this file"
    }
}

/// Bounds applied to a single extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionLimits {
    pub max_pages: usize,
    pub timeout: Duration,
}

impl From<&ExtractionConfig> for ExtractionLimits {
    fn from(cfg: &ExtractionConfig) -> Self {
        Self {
            max_pages: cfg.max_pages.max(1),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }
}

/// Decode a PDF into one linear string: text runs on a page joined by a
/// single space, pages joined by a newline.
pub fn extract_full_text(pdf_bytes: &[u8], max_pages: usize) -> Result<String, LabelDecodeError> {
    let doc =
        Document::load_mem(pdf_bytes).map_err(|e| LabelDecodeError::Malformed(e.to_string()))?;

    if doc.is_encrypted() {
        return Err(LabelDecodeError::Encrypted);
    }

    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(LabelDecodeError::NoPages);
    }

    if looks_like_scanned(&doc) {
        warn!("Label looks image-only; fields will likely fall back to sentinels");
    }

    if pages.len() > max_pages {
        warn!(
            total_pages = pages.len(),
            max_pages, "Label has more pages than allowed, ignoring the rest"
        );
    }

    let mut page_texts = Vec::with_capacity(pages.len().min(max_pages));
    for &page_num in pages.keys().take(max_pages) {
        match doc.extract_text(&[page_num]) {
            Ok(raw) => page_texts.push(join_runs(&raw)),
            Err(e) => {
                warn!(page = page_num, error = %e, "lopdf could not decode page text, trying pdf-extract");
                return Ok(fallback_text(pdf_bytes, max_pages));
            }
        }
    }

    Ok(page_texts.join("\n"))
}

/// lopdf ends every text object with a newline; those become single spaces.
fn join_runs(raw: &str) -> String {
    raw.lines()
        .filter(|run| !run.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-document extraction with pdf-extract. Form feeds, when present,
/// mark page breaks. The structure already decoded, so failure here only
/// costs the text.
fn fallback_text(pdf_bytes: &[u8], max_pages: usize) -> String {
    match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(text) => text
            .split('\x0c')
            .take(max_pages)
            .map(join_runs)
            .filter(|page| !page.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Err(e) => {
            warn!(error = %e, "pdf-extract failed too; continuing with empty text");
            String::new()
        }
    }
}

/// Heuristic: inspect the PDF object tree for signs that every page
/// is just a single image with no text operators.
///
/// A page with XObject images but **no** Font resources is almost
/// certainly a scan or a photo of a label.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let mut image_only_pages = 0;

    for object_id in pages.values() {
        let Ok(page_obj) = doc.get_object(*object_id) else {
            continue;
        };
        let Ok(page_dict) = page_obj.as_dict() else {
            continue;
        };

        let resources = page_dict
            .get(b"Resources")
            .ok()
            .and_then(|r| doc.dereference(r).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok());

        let has_resource = |key: &[u8]| {
            resources
                .and_then(|res| res.get(key).ok())
                .and_then(|obj| doc.dereference(obj).ok())
                .and_then(|(_, resolved)| resolved.as_dict().ok())
                .is_some_and(|dict| !dict.is_empty())
        };

        if has_resource(b"XObject") && !has_resource(b"Font") {
            image_only_pages += 1;
        }
    }

    let ratio = image_only_pages as f64 / pages.len() as f64;
    info!(
        total_pages = pages.len(),
        image_only = image_only_pages,
        ratio = format!("{ratio:.2}"),
        "Scanned-page analysis"
    );

    ratio >= 0.8
}

/// Full synchronous pipeline: decode, then run the label rules.
pub fn parse_label_bytes(pdf_bytes: &[u8], max_pages: usize) -> Result<ParsedLabel, LabelDecodeError> {
    let span = tracing::info_span!("label", bytes = pdf_bytes.len());
    let _guard = span.enter();

    let text = extract_full_text(pdf_bytes, max_pages)?;
    let parsed = label::extract_label(&text);
    let (filled, total) = parsed.coverage();
    info!(
        filled,
        total,
        chars = text.len(),
        order_id = %parsed.order_id,
        tracking = %parsed.tracking_number,
        courier = %parsed.courier,
        "Extraction result"
    );
    Ok(parsed)
}

/// Run the pipeline off the async runtime, bounded by `limits.timeout`.
///
/// On timeout the blocking decode keeps running to completion in the
/// background; its result is discarded.
pub async fn parse_shipping_label(
    pdf_bytes: Vec<u8>,
    limits: ExtractionLimits,
) -> Result<ParsedLabel, LabelDecodeError> {
    let max_pages = limits.max_pages;
    let task = tokio::task::spawn_blocking(move || parse_label_bytes(&pdf_bytes, max_pages));

    match tokio::time::timeout(limits.timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(LabelDecodeError::Worker(join_err.to_string())),
        Err(_) => {
            warn!(timeout = ?limits.timeout, "Label extraction timed out");
            Err(LabelDecodeError::TimedOut(limits.timeout))
        }
    }
}

/// In-memory PDFs for tests.
#[cfg(test)]
pub(crate) mod test_pdf {
    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};

    /// One page per entry; each string is drawn as its own text object.
    pub fn build(pages: &[&[&str]]) -> Vec<u8> {
        build_doc(pages, false)
    }

    /// A document whose trailer declares an encryption dictionary.
    pub fn build_encrypted(pages: &[&[&str]]) -> Vec<u8> {
        build_doc(pages, true)
    }

    fn build_doc(pages: &[&[&str]], encrypted: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });

        let mut kids: Vec<Object> = Vec::new();
        for runs in pages {
            let mut operations = Vec::new();
            for (i, run) in runs.iter().enumerate() {
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new("Tf", vec!["F1".into(), 10.into()]));
                operations.push(Operation::new(
                    "Td",
                    vec![40.into(), (780 - 14 * i as i64).into()],
                ));
                operations.push(Operation::new("Tj", vec![Object::string_literal(*run)]));
                operations.push(Operation::new("ET", vec![]));
            }
            let content = Content { operations };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                },
            });
            kids.push(page_id.into());
        }

        let page_count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        if encrypted {
            let encrypt_id = doc.add_object(dictionary! {
                "Filter" => "Standard",
                "V" => 1,
                "R" => 2,
                "O" => Object::string_literal(vec![0u8; 32]),
                "U" => Object::string_literal(vec![0u8; 32]),
                "P" => -4,
            });
            doc.trailer.set("Encrypt", encrypt_id);
        }

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }
}
