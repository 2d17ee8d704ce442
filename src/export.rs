use crate::roster::AttendanceChoice;
use anyhow::Context;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use std::path::Path;
use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const CSV_HEADER: &str = "date,class,student_id,register_number,name,attendance\n";

const DOCX_CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const DOCX_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

#[derive(Debug, Clone)]
pub struct ExportRow {
    pub date: String,
    pub class_name: String,
    pub student_id: String,
    pub register_number: Option<String>,
    pub display_name: Option<String>,
    pub choice: AttendanceChoice,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub row_count: usize,
    pub sha256: String,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("end date {end} is before start date {start}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
    #[error("no attendance records between {start} and {end}")]
    NoRecords { start: NaiveDate, end: NaiveDate },
    #[error("export failed: {0:#}")]
    Io(#[from] anyhow::Error),
}

impl ExportError {
    pub fn code(&self) -> &'static str {
        match self {
            ExportError::InvertedRange { .. } => "bad_params",
            ExportError::NoRecords { .. } => "not_found",
            ExportError::Io(_) => "export_failed",
        }
    }
}

/// Submitted records in `[start, end]`, ordered by date, class, then roster order.
/// Records for students not on that class's roster keep their id with no name.
pub fn query_records(
    conn: &Connection,
    class_id: Option<&str>,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<Vec<ExportRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT r.date, c.name, r.student_id, s.register_number, s.display_name, r.choice
             FROM attendance_records r
             JOIN classes c ON c.id = r.class_id
             LEFT JOIN students s ON s.id = r.student_id AND s.class_id = r.class_id
             WHERE r.date BETWEEN ? AND ?
               AND (?3 IS NULL OR r.class_id = ?3)
             ORDER BY r.date, c.name, r.class_id, s.sort_order IS NULL, s.sort_order, r.student_id",
        )
        .context("failed to prepare attendance export query")?;
    let start_s = start.format("%Y-%m-%d").to_string();
    let end_s = end.format("%Y-%m-%d").to_string();
    let rows = stmt
        .query_map((&start_s, &end_s, class_id), |r| {
            let raw: String = r.get(5)?;
            let choice = raw.parse::<AttendanceChoice>().map_err(|m| {
                rusqlite::Error::FromSqlConversionFailure(5, Type::Text, m.into())
            })?;
            Ok(ExportRow {
                date: r.get(0)?,
                class_name: r.get(1)?,
                student_id: r.get(2)?,
                register_number: r.get(3)?,
                display_name: r.get(4)?,
                choice,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to read attendance records")?;
    Ok(rows)
}

pub fn export_range_csv(
    conn: &Connection,
    class_id: Option<&str>,
    start: NaiveDate,
    end: NaiveDate,
    out_path: &Path,
) -> Result<ExportSummary, ExportError> {
    if end < start {
        return Err(ExportError::InvertedRange { start, end });
    }
    let rows = query_records(conn, class_id, start, end)?;
    if rows.is_empty() {
        return Err(ExportError::NoRecords { start, end });
    }

    let mut csv = String::from(CSV_HEADER);
    for row in &rows {
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_quote(&row.date),
            csv_quote(&row.class_name),
            csv_quote(&row.student_id),
            csv_quote(row.register_number.as_deref().unwrap_or("")),
            csv_quote(row.display_name.as_deref().unwrap_or("")),
            csv_quote(row.choice.as_str())
        ));
    }
    write_output(out_path, csv.as_bytes())?;
    Ok(ExportSummary {
        row_count: rows.len(),
        sha256: sha256_hex(csv.as_bytes()),
    })
}

/// Single-day report as a minimal WordprocessingML package.
pub fn export_day_docx(
    conn: &Connection,
    class_id: Option<&str>,
    date: NaiveDate,
    out_path: &Path,
) -> Result<ExportSummary, ExportError> {
    let rows = query_records(conn, class_id, date, date)?;
    if rows.is_empty() {
        return Err(ExportError::NoRecords {
            start: date,
            end: date,
        });
    }

    let bytes = build_docx(&day_document_xml(date, &rows))?;
    write_output(out_path, &bytes)?;
    Ok(ExportSummary {
        row_count: rows.len(),
        sha256: sha256_hex(&bytes),
    })
}

fn day_document_xml(date: NaiveDate, rows: &[ExportRow]) -> String {
    let present = rows
        .iter()
        .filter(|r| r.choice == AttendanceChoice::Present)
        .count();
    let mut body = String::new();
    body.push_str(&paragraph(&format!(
        "Attendance for {}",
        date.format("%A, %d %B %Y")
    )));
    body.push_str(&paragraph(&format!(
        "Present: {}  Absent: {}  Total: {}",
        present,
        rows.len() - present,
        rows.len()
    )));

    body.push_str("<w:tbl><w:tblPr><w:tblStyle w:val=\"TableGrid\"/><w:tblW w:w=\"0\" w:type=\"auto\"/></w:tblPr>");
    body.push_str(&table_row(&["Class", "Name", "Register Number", "Attendance"]));
    for r in rows {
        let name = r.display_name.as_deref().unwrap_or(&r.student_id);
        body.push_str(&table_row(&[
            &r.class_name,
            name,
            r.register_number.as_deref().unwrap_or(""),
            r.choice.as_str(),
        ]));
    }
    body.push_str("</w:tbl>");

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    )
}

fn paragraph(text: &str) -> String {
    format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", xml_escape(text))
}

fn table_row(cells: &[&str]) -> String {
    let mut out = String::from("<w:tr>");
    for c in cells {
        out.push_str("<w:tc>");
        out.push_str(&paragraph(c));
        out.push_str("</w:tc>");
    }
    out.push_str("</w:tr>");
    out
}

fn build_docx(document_xml: &str) -> anyhow::Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, contents) in [
        ("[Content_Types].xml", DOCX_CONTENT_TYPES),
        ("_rels/.rels", DOCX_RELS),
        ("word/document.xml", document_xml),
    ] {
        zip.start_file(name, opts)
            .with_context(|| format!("failed to start {} entry", name))?;
        zip.write_all(contents.as_bytes())
            .with_context(|| format!("failed to write {} entry", name))?;
    }
    let cursor = zip.finish().context("failed to finalize docx package")?;
    Ok(cursor.into_inner())
}

fn write_output(out_path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    std::fs::write(out_path, bytes)
        .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))?;
    Ok(())
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
