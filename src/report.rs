use chrono::{DateTime, Utc};

use crate::record::{ExtractionStatus, FieldStatus, Record};
use crate::schema;

/// Field values longer than this are truncated in report views. Display
/// concern only; stored records keep the full value.
const DISPLAY_LIMIT: usize = 100;

pub struct ReportData {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub start_idx: usize,
    pub end_idx: usize,
    pub total_medicines: usize,
    pub successful_extractions: usize,
    pub partial_extractions: usize,
    pub failed_extractions: usize,
    pub medicines: Vec<MedicineView>,
}

pub struct MedicineView {
    pub name: String,
    pub extraction_status: ExtractionStatus,
    pub fields: Vec<FieldView>,
}

pub struct FieldView {
    pub name: String,
    pub label: &'static str,
    pub value: Option<String>,
    pub status: FieldStatus,
}

/// Summarize an already-persisted window of records. Counts come straight
/// from each record's extraction status; nothing is re-extracted.
pub fn aggregate(records: &[Record], start_idx: usize, end_idx: usize) -> ReportData {
    let count = |status: ExtractionStatus| records.iter().filter(|r| r.status == status).count();
    let generated_at = Utc::now();

    ReportData {
        report_id: format!(
            "batch_{}_{}_{}",
            start_idx,
            end_idx,
            generated_at.format("%Y%m%d%H%M%S")
        ),
        generated_at,
        start_idx,
        end_idx,
        total_medicines: records.len(),
        successful_extractions: count(ExtractionStatus::Success),
        partial_extractions: count(ExtractionStatus::Partial),
        failed_extractions: count(ExtractionStatus::Failed),
        medicines: records.iter().map(medicine_view).collect(),
    }
}

fn medicine_view(record: &Record) -> MedicineView {
    MedicineView {
        name: record.name.clone(),
        extraction_status: record.status,
        fields: record
            .fields
            .iter()
            .map(|f| FieldView {
                name: f.name.clone(),
                label: schema::label_for(&f.name),
                value: f.value.as_deref().map(truncate_display),
                status: f.status,
            })
            .collect(),
    }
}

fn truncate_display(s: &str) -> String {
    if s.chars().count() <= DISPLAY_LIMIT {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(DISPLAY_LIMIT).collect();
        format!("{}...", truncated)
    }
}

/// Render the report as a standalone HTML document.
pub fn render_html(report: &ReportData) -> String {
    let mut rows = String::new();
    for m in &report.medicines {
        let mut field_rows = String::new();
        for f in &m.fields {
            field_rows.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td class=\"{}\">{}</td></tr>\n",
                escape(&f.name),
                escape(f.label),
                f.status.as_str(),
                escape(f.value.as_deref().unwrap_or("-")),
            ));
        }
        rows.push_str(&format!(
            "<section>\n<h2>{} <span class=\"{}\">[{}]</span></h2>\n\
             <table><tr><th>field</th><th>label</th><th>value</th></tr>\n{}</table>\n</section>\n",
            escape(&m.name),
            m.extraction_status.as_str(),
            m.extraction_status.as_str(),
            field_rows,
        ));
    }

    format!(
        "<!DOCTYPE html>\n<html lang=\"ko\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>medicollect report {id}</title>\n\
         <style>\n\
         body {{ font-family: sans-serif; margin: 2em; }}\n\
         table {{ border-collapse: collapse; margin-bottom: 1em; }}\n\
         td, th {{ border: 1px solid #ccc; padding: 4px 8px; text-align: left; }}\n\
         .success {{ color: #2a7; }} .partial {{ color: #c80; }} .failed, .error {{ color: #c33; }}\n\
         </style>\n</head>\n<body>\n\
         <h1>Collection report {start}-{end}</h1>\n\
         <p>report_id: {id}<br>generated: {time}</p>\n\
         <p>total: {total} | success: {ok} | partial: {partial} | failed: {failed}</p>\n\
         {rows}\
         </body>\n</html>\n",
        id = escape(&report.report_id),
        start = report.start_idx,
        end = report.end_idx,
        time = report.generated_at.format("%Y-%m-%d %H:%M:%S"),
        total = report.total_medicines,
        ok = report.successful_extractions,
        partial = report.partial_extractions,
        failed = report.failed_extractions,
        rows = rows,
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ── Tests ──
