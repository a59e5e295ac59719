//! PDF backend
//!
//! Encodes laid-out pages with lopdf using the standard Type 1 fonts, so
//! no font files are embedded.

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use purple_core::domain::detection::Detections;
use purple_core::domain::run::Run;
use thiserror::Error;

use super::layout::{self, Page, Style};
use super::renderer::{self, Branding};

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN_LEFT: i64 = 50;
const FIRST_LINE_Y: i64 = 790;
const LINE_HEIGHT: i64 = 14;
const FOOTER_Y: i64 = 40;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("PDF encoding failed: {0}")]
    Pdf(String),
}

/// Turns a run into document bytes
///
/// Implementations are synchronous and CPU bound; callers run them on the
/// blocking pool.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, run: &Run, detections: &Detections) -> Result<Vec<u8>, RenderError>;
}

pub struct PdfRenderer {
    company_name: String,
}

impl PdfRenderer {
    pub fn new(company_name: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
        }
    }

    /// Encodes already paginated content
    pub fn encode(pages: &[Page]) -> Result<Vec<u8>, RenderError> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let regular = doc.add_object(type1_font("Helvetica"));
        let bold = doc.add_object(type1_font("Helvetica-Bold"));
        let mono = doc.add_object(type1_font("Courier"));
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular,
                "F2" => bold,
                "F3" => mono,
            },
        });

        let mut kids = Vec::with_capacity(pages.len());
        for page in pages {
            let content = Content {
                operations: page_operations(page),
            };
            let bytes = content
                .encode()
                .map_err(|e| RenderError::Pdf(e.to_string()))?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, bytes));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::from(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(PAGE_WIDTH),
                    Object::Integer(PAGE_HEIGHT),
                ],
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.compress();

        let mut out = Vec::new();
        doc.save_to(&mut out)
            .map_err(|e| RenderError::Pdf(e.to_string()))?;
        Ok(out)
    }
}

impl DocumentRenderer for PdfRenderer {
    fn render(&self, run: &Run, detections: &Detections) -> Result<Vec<u8>, RenderError> {
        let doc = renderer::build_document(run, detections, Branding::new(&self.company_name));
        let pages = layout::paginate(&doc);
        drop(doc);

        let bytes = Self::encode(&pages)?;
        tracing::debug!(
            "Rendered run {} into {} page(s), {} bytes",
            run.id,
            pages.len(),
            bytes.len()
        );
        Ok(bytes)
    }
}

fn type1_font(name: &str) -> lopdf::Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => Object::Name(name.as_bytes().to_vec()),
        "Encoding" => "WinAnsiEncoding",
    }
}

fn page_operations(page: &Page) -> Vec<Operation> {
    let mut ops = Vec::new();
    let mut y = FIRST_LINE_Y;

    for line in &page.lines {
        let (font, size) = match line.style {
            Style::Title => ("F2", 16),
            Style::Warning => ("F2", 11),
            Style::Heading => ("F2", 12),
            Style::Body => ("F1", 10),
            Style::Table => ("F3", 8),
            Style::Footer => ("F1", 8),
        };
        let line_y = if line.style == Style::Footer { FOOTER_Y } else { y };

        if line.style == Style::Warning {
            ops.push(Operation::new(
                "rg",
                vec![Object::Real(0.8), Object::Real(0.1), Object::Real(0.1)],
            ));
        }
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new("Tf", vec![font.into(), Object::Integer(size)]));
        ops.push(Operation::new(
            "Td",
            vec![Object::Integer(MARGIN_LEFT), Object::Integer(line_y)],
        ));
        ops.push(Operation::new(
            "Tj",
            vec![Object::string_literal(printable(&line.text))],
        ));
        ops.push(Operation::new("ET", vec![]));
        if line.style == Style::Warning {
            ops.push(Operation::new(
                "rg",
                vec![Object::Integer(0), Object::Integer(0), Object::Integer(0)],
            ));
        }

        y -= match line.style {
            Style::Title => LINE_HEIGHT + 6,
            Style::Heading => LINE_HEIGHT + 2,
            _ => LINE_HEIGHT,
        };
    }

    ops
}

/// Replaces characters the standard fonts cannot show
fn printable(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}
