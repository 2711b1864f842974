//! Multi-format text extraction (PDF, Word, spreadsheets, Markdown, text).
//!
//! Two layers:
//!
//! - [`extract_text`] decodes an in-memory buffer for a given
//!   [`SourceFormat`] and reports decoder failures as [`ExtractError`].
//! - [`extract_file`] reads a file from disk with bounded retries and a size
//!   limit, then folds every failure into [`Extraction::Empty`]. A single bad
//!   file never aborts an ingestion run; the pipeline counts it as skipped.

use std::borrow::Cow;
use std::io::{Cursor, Read};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::time::Duration;

use quick_xml::events::{BytesStart, Event};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ExtractConfig;
use crate::models::SourceFormat;

/// Maximum sheets to render from one workbook.
const MAX_SHEETS: usize = 100;
/// Maximum cells to render per sheet (avoids unbounded memory).
const MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Last valid spreadsheet column (`XFD`), zero-based.
const MAX_COLUMN: usize = 16_383;
/// Pause between read attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {0:?}")]
    Unsupported(SourceFormat),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("spreadsheet extraction failed: {0}")]
    Spreadsheet(String),
    #[error("read failed after {attempts} attempt(s): {source}")]
    Read {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
    #[error("{0:?} decoder panicked")]
    Panicked(SourceFormat),
}

fn ooxml(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Ooxml(e.to_string())
}

/// Per-file outcome consumed by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Decoded text, not yet normalized. May still be blank.
    Text(String),
    /// Nothing could be extracted; `reason` says why.
    Empty { reason: String },
}

impl Extraction {
    /// The extracted text, or an empty string for a failed extraction.
    pub fn into_text(self) -> String {
        match self {
            Extraction::Text(text) => text,
            Extraction::Empty { .. } => String::new(),
        }
    }
}

/// Reads and decodes one source file. Never fails: errors become
/// [`Extraction::Empty`] and are logged at `warn`.
pub fn extract_file(path: &Path, format: SourceFormat, settings: &ExtractConfig) -> Extraction {
    let result = if format.is_supported() {
        read_with_retry(path, settings.read_attempts, || {
            read_bounded(path, settings.max_file_bytes)
        })
        .and_then(|bytes| guard_panics(format, || extract_text(&bytes, format)))
    } else {
        Err(ExtractError::Unsupported(format))
    };

    match result {
        Ok(text) => Extraction::Text(text),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "extraction failed, skipping file");
            Extraction::Empty {
                reason: e.to_string(),
            }
        }
    }
}

/// Extracts plain text from an in-memory file of the given format.
pub fn extract_text(bytes: &[u8], format: SourceFormat) -> Result<String, ExtractError> {
    match format {
        SourceFormat::Pdf => extract_pdf(bytes),
        SourceFormat::Docx => extract_docx(bytes),
        SourceFormat::Spreadsheet => extract_xlsx(bytes),
        SourceFormat::LegacySpreadsheet => extract_xls(bytes),
        SourceFormat::Markdown => Ok(markdown_to_text(&decode_text(bytes))),
        SourceFormat::PlainText => Ok(decode_text(bytes).into_owned()),
        SourceFormat::Unsupported => Err(ExtractError::Unsupported(format)),
    }
}

/// Runs a decoder, turning a panic into [`ExtractError::Panicked`].
fn guard_panics<F>(format: SourceFormat, decode: F) -> Result<String, ExtractError>
where
    F: FnOnce() -> Result<String, ExtractError>,
{
    std::panic::catch_unwind(AssertUnwindSafe(decode))
        .unwrap_or(Err(ExtractError::Panicked(format)))
}

// ============ Reading ============

/// Runs `read` up to `attempts` times, retrying only I/O failures.
fn read_with_retry<F>(path: &Path, attempts: u32, mut read: F) -> Result<Vec<u8>, ExtractError>
where
    F: FnMut() -> Result<Vec<u8>, ExtractError>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match read() {
            Err(ExtractError::Read { source, .. }) if attempt < attempts => {
                debug!(path = %path.display(), attempt, error = %source, "read failed, retrying");
                attempt += 1;
                std::thread::sleep(RETRY_BACKOFF);
            }
            Err(ExtractError::Read { source, .. }) => {
                return Err(ExtractError::Read { attempts, source })
            }
            other => return other,
        }
    }
}

fn read_bounded(path: &Path, limit: u64) -> Result<Vec<u8>, ExtractError> {
    let io = |source: std::io::Error| ExtractError::Read {
        attempts: 1,
        source,
    };
    let file = std::fs::File::open(path).map_err(io)?;
    let size = file.metadata().map_err(io)?.len();
    if size > limit {
        return Err(ExtractError::TooLarge { size, limit });
    }
    let mut bytes = Vec::with_capacity(size as usize);
    file.take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(io)?;
    if bytes.len() as u64 > limit {
        return Err(ExtractError::TooLarge {
            size: bytes.len() as u64,
            limit,
        });
    }
    Ok(bytes)
}

/// Lossy UTF-8: invalid sequences become U+FFFD, a leading BOM is dropped.
fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes)
}

// ============ PDF ============

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed documents.
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| ExtractError::Panicked(SourceFormat::Pdf))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(join_pages(pages))
}

fn join_pages(pages: Vec<String>) -> String {
    pages
        .into_iter()
        .filter(|page| !page.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// ============ OOXML helpers ============

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_zip(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(ooxml)
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name).map_err(ooxml)?;
    let mut out = Vec::new();
    entry.take(max_bytes).read_to_end(&mut out).map_err(ooxml)?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

fn attr_value(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == local {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

// ============ Word ============

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    Ok(docx_paragraphs(&xml)?.join("\n"))
}

/// Paragraph texts in document order; empty paragraphs are dropped.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                current.push_str(&te.unescape().map_err(ooxml)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !current.is_empty() {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs)
}

// ============ Spreadsheets ============

/// A rendered sheet: name plus rows of cell text, column order preserved.
struct Sheet {
    name: String,
    rows: Vec<Vec<String>>,
}

/// `# Sheet: <name>` then comma-delimited rows; sheets separated by a blank line.
fn render_sheets(sheets: &[Sheet]) -> String {
    sheets
        .iter()
        .map(render_sheet)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_sheet(sheet: &Sheet) -> String {
    let width = sheet.rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = format!("# Sheet: {}", sheet.name);
    for row in &sheet.rows {
        let fields: Vec<Cow<'_, str>> = (0..width)
            .map(|i| csv_field(row.get(i).map(String::as_str).unwrap_or("")))
            .collect();
        out.push('\n');
        out.push_str(&fields.join(","));
    }
    out
}

fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn push_row(rows: &mut Vec<Vec<String>>, row: Vec<String>) {
    if row.iter().any(|cell| !cell.is_empty()) {
        rows.push(row);
    }
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let shared_strings = if has_entry(&archive, "xl/sharedStrings.xml") {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let mut sheets = Vec::new();
    for (name, entry) in workbook_sheets(&mut archive)?.into_iter().take(MAX_SHEETS) {
        if !has_entry(&archive, &entry) {
            debug!(sheet = %name, entry = %entry, "worksheet part missing");
            continue;
        }
        let xml = read_zip_entry_bounded(&mut archive, &entry, MAX_XML_ENTRY_BYTES)?;
        let rows = xlsx_sheet_rows(&xml, &shared_strings)?;
        sheets.push(Sheet { name, rows });
    }
    Ok(render_sheets(&sheets))
}

/// `(sheet name, zip entry)` pairs in workbook order.
///
/// Falls back to the numbered worksheet parts when the workbook part is
/// missing, naming sheets `Sheet<n>`.
fn workbook_sheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, ExtractError> {
    if !has_entry(archive, "xl/workbook.xml") {
        return Ok(numbered_worksheets(archive));
    }
    let workbook = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
    let targets = if has_entry(archive, "xl/_rels/workbook.xml.rels") {
        let rels =
            read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels", MAX_XML_ENTRY_BYTES)?;
        read_relationships(&rels)?
    } else {
        Vec::new()
    };

    let mut sheets = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(workbook.as_slice());
    let mut buf = Vec::new();
    let mut position = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                position += 1;
                let name = attr_value(&e, b"name").unwrap_or_else(|| format!("Sheet{}", position));
                let entry = attr_value(&e, b"id")
                    .and_then(|rid| {
                        targets
                            .iter()
                            .find(|(id, _)| *id == rid)
                            .map(|(_, target)| resolve_target(target))
                    })
                    .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", position));
                sheets.push((name, entry));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

fn numbered_worksheets(archive: &Archive<'_>) -> Vec<(String, String)> {
    let mut names: Vec<(u32, String)> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|n| {
            let number = n
                .trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX);
            (number, n.to_string())
        })
        .collect();
    names.sort();
    names
        .into_iter()
        .enumerate()
        .map(|(i, (_, entry))| (format!("Sheet{}", i + 1), entry))
        .collect()
}

/// `(Id, Target)` pairs from a relationships part.
fn read_relationships(xml: &[u8]) -> Result<Vec<(String, String)>, ExtractError> {
    let mut out = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr_value(&e, b"Id"), attr_value(&e, b"Target"))
                {
                    out.push((id, target));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    // Phonetic runs (<rPh>) repeat the reading of the string; skip them.
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => in_phonetic = true,
                b"t" if !in_phonetic => in_text = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                current.push_str(&te.unescape().map_err(ooxml)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"rPh" => in_phonetic = false,
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Zero-based column index from a cell reference such as `AB12`.
///
/// `Ok(None)` when the reference has no column letters. Columns past `XFD`
/// are rejected.
fn column_index(cell_ref: &str) -> Result<Option<usize>, ExtractError> {
    let mut index = 0usize;
    let mut letters = 0;
    for b in cell_ref.bytes().take_while(|b| b.is_ascii_alphabetic()) {
        letters += 1;
        index = index
            .checked_mul(26)
            .and_then(|i| i.checked_add((b.to_ascii_uppercase() - b'A' + 1) as usize))
            .filter(|&i| i <= MAX_COLUMN + 1)
            .ok_or_else(|| ooxml(format!("cell reference out of range: {cell_ref}")))?;
    }
    Ok((letters > 0).then(|| index - 1))
}

fn render_cell(cell_type: &str, raw: &str, shared_strings: &[String]) -> String {
    match cell_type {
        "s" => raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i))
            .cloned()
            .unwrap_or_default(),
        "b" => match raw.trim() {
            "1" => "True".to_string(),
            "0" => "False".to_string(),
            other => other.to_string(),
        },
        _ => raw.to_string(),
    }
}

fn xlsx_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<String>>, ExtractError> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut column = 0usize;
    let mut cell_type = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut in_inline = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    column = match attr_value(&e, b"r") {
                        Some(r) => column_index(&r)?,
                        None => None,
                    }
                    .unwrap_or(row.len());
                    cell_type = attr_value(&e, b"t").unwrap_or_default();
                    value.clear();
                }
                b"v" => in_value = true,
                b"is" => in_inline = true,
                b"t" if in_inline => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                value.push_str(&te.unescape().map_err(ooxml)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"is" => in_inline = false,
                b"c" => {
                    let text = render_cell(&cell_type, &value, shared_strings);
                    if row.len() <= column {
                        row.resize(column + 1, String::new());
                    }
                    row[column] = text;
                    cell_count += 1;
                }
                b"row" => push_row(&mut rows, std::mem::take(&mut row)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    push_row(&mut rows, row);
    Ok(rows)
}

fn extract_xls(bytes: &[u8]) -> Result<String, ExtractError> {
    use calamine::Reader;

    let spreadsheet = |e: calamine::XlsError| ExtractError::Spreadsheet(e.to_string());
    let mut workbook = calamine::Xls::new(Cursor::new(bytes)).map_err(spreadsheet)?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names().into_iter().take(MAX_SHEETS) {
        let range = workbook.worksheet_range(&name).map_err(spreadsheet)?;
        let mut rows = Vec::new();
        let mut cell_count = 0usize;
        for cells in range.rows() {
            if cell_count >= MAX_CELLS_PER_SHEET {
                break;
            }
            cell_count += cells.len();
            push_row(&mut rows, cells.iter().map(xls_cell_text).collect());
        }
        sheets.push(Sheet { name, rows });
    }
    Ok(render_sheets(&sheets))
}

fn xls_cell_text(cell: &calamine::Data) -> String {
    match cell {
        calamine::Data::Bool(true) => "True".to_string(),
        calamine::Data::Bool(false) => "False".to_string(),
        other => other.to_string(),
    }
}

// ============ Markdown ============

/// Strips Markdown to plain text, one line per block, block order preserved.
fn markdown_to_text(source: &str) -> String {
    use pulldown_cmark::{Event as Md, Options, Parser, TagEnd};

    let options = Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS;
    let mut out = String::new();
    for event in Parser::new_ext(source, options) {
        match event {
            Md::Text(text) | Md::Code(text) => out.push_str(&text),
            Md::SoftBreak | Md::HardBreak => out.push('\n'),
            Md::Rule => end_block(&mut out),
            Md::End(TagEnd::TableCell) => out.push('\t'),
            Md::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::CodeBlock
                | TagEnd::Item
                | TagEnd::TableHead
                | TagEnd::TableRow,
            ) => end_block(&mut out),
            _ => {}
        }
    }
    out
}

fn end_block(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}
