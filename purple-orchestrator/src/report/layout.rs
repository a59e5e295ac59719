//! Page layout
//!
//! Flattens a [`ReportDocument`] into fixed-height pages of styled text
//! lines. Every page ends with a footer carrying the page number.

use super::renderer::{DetectionSection, PARTIAL_NOTICE, ReportDocument};

/// Body lines per page, footer excluded
pub const LINES_PER_PAGE: usize = 48;

/// Characters that fit on one monospaced line
pub const LINE_WIDTH: usize = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Title,
    Warning,
    Heading,
    Body,
    /// Monospaced, used for tables
    Table,
    Footer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub style: Style,
    pub text: String,
}

impl Line {
    fn new(style: Style, text: impl Into<String>) -> Self {
        Self {
            style,
            text: truncate(&text.into(), LINE_WIDTH),
        }
    }

    fn blank() -> Self {
        Self::new(Style::Body, "")
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    pub lines: Vec<Line>,
}

/// Lays the document out in section order
///
/// Header, metadata, executive summary, tactic coverage, detection coverage,
/// technique detail, with a footer on every page.
pub fn paginate(doc: &ReportDocument) -> Vec<Page> {
    let lines = flatten(doc);
    let chunks: Vec<&[Line]> = lines.chunks(LINES_PER_PAGE).collect();
    let total = chunks.len().max(1);

    let footer = |number: usize| {
        Line::new(
            Style::Footer,
            format!(
                "{} | Confidential | Page {} of {}",
                doc.branding.company_name, number, total
            ),
        )
    };

    if chunks.is_empty() {
        return vec![Page {
            lines: vec![footer(1)],
        }];
    }

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut lines = chunk.to_vec();
            lines.push(footer(i + 1));
            Page { lines }
        })
        .collect()
}

fn flatten(doc: &ReportDocument) -> Vec<Line> {
    let mut out = Vec::new();

    out.push(Line::new(Style::Title, &doc.title));
    out.push(Line::new(Style::Body, &doc.branding.company_name));
    if doc.partial {
        out.push(Line::new(Style::Warning, PARTIAL_NOTICE));
    }
    out.push(Line::blank());

    out.push(Line::new(Style::Heading, "Operation Details"));
    for (key, value) in &doc.metadata {
        out.push(Line::new(Style::Table, format!("{:<14} {}", key, value)));
    }
    out.push(Line::blank());

    let stats = &doc.statistics;
    out.push(Line::new(Style::Heading, "Executive Summary"));
    out.push(Line::new(
        Style::Body,
        format!(
            "{} techniques executed: {} successful, {} failed, {} timed out.",
            stats.total, stats.successful, stats.failed, stats.timed_out
        ),
    ));
    out.push(Line::new(
        Style::Body,
        format!("Success rate: {:.1}%", stats.success_rate),
    ));
    out.push(Line::blank());

    out.push(Line::new(Style::Heading, "Tactic Coverage"));
    if doc.tactic_coverage.is_empty() {
        out.push(Line::new(Style::Body, "No techniques were executed."));
    } else {
        out.push(Line::new(
            Style::Table,
            format!("{:<28} {:>6} {:>10} {:>8}", "Tactic", "Steps", "Successful", "Share"),
        ));
        for tactic in &doc.tactic_coverage {
            out.push(Line::new(
                Style::Table,
                format!(
                    "{:<28} {:>6} {:>10} {:>7.1}%",
                    truncate(&tactic.tactic, 28),
                    tactic.steps,
                    tactic.successful,
                    tactic.percent
                ),
            ));
        }
    }
    out.push(Line::blank());

    out.push(Line::new(Style::Heading, "Detection Coverage"));
    match &doc.detection {
        DetectionSection::Summary(summary) => {
            out.push(Line::new(
                Style::Body,
                format!(
                    "Detected: {}  Evaded: {}  Pending: {}",
                    summary.detected, summary.evaded, summary.pending
                ),
            ));
            out.push(Line::new(
                Style::Body,
                format!("Detection coverage: {:.1}%", summary.coverage_percent()),
            ));
        }
        DetectionSection::Unavailable(reason) => {
            out.push(Line::new(
                Style::Warning,
                format!("Detection correlation unavailable: {}", reason),
            ));
        }
    }
    out.push(Line::blank());

    out.push(Line::new(Style::Heading, "Technique Details"));
    if doc.techniques.is_empty() {
        out.push(Line::new(Style::Body, "No techniques were executed."));
    } else {
        out.push(Line::new(
            Style::Table,
            format!(
                "{:<10} {:<30} {:<22} {:<8} {}",
                "ID", "Technique", "Tactic", "Result", "Detection"
            ),
        ));
        for row in &doc.techniques {
            out.push(Line::new(
                Style::Table,
                format!(
                    "{:<10} {:<30} {:<22} {:<8} {}",
                    truncate(&row.technique_id, 10),
                    truncate(&row.technique_name, 30),
                    truncate(&row.tactic, 22),
                    row.outcome.to_string(),
                    row.detection
                ),
            ));
        }
    }

    out
}

/// Cuts `text` to `max` characters, marking the cut with `~`
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('~');
    cut
}
