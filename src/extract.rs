//! Document text extraction for uploaded files.
//!
//! Dispatches on the filename suffix and converts the raw bytes into a single
//! plain-text representation suitable for prompting. Tabular formats are
//! truncated to a row cap to bound prompt size, and the number of dropped rows
//! is reported so the display layer can mention the truncation.

use std::io::{BufReader, Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Default cap on rows kept from tabular input (header + 19 data rows).
pub const DEFAULT_TABLE_ROW_CAP: usize = 20;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("file is not valid UTF-8 text: {0}")]
    Decode(#[from] std::string::FromUtf8Error),
    #[error("failed to extract PDF text: {0}")]
    Pdf(#[from] pdf_extract::OutputError),
    #[error("failed to parse tabular data: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to read spreadsheet: {0}")]
    Spreadsheet(String),
    #[error("failed to serialise truncated table: {0}")]
    TableWrite(String),
}

/// Recognised upload formats, decided purely by filename suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Text,
    Pdf,
    Csv,
    Spreadsheet,
}

impl DocumentFormat {
    /// Case-insensitive suffix dispatch; `None` for unrecognised suffixes.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".txt") {
            Some(Self::Text)
        } else if lower.ends_with(".pdf") {
            Some(Self::Pdf)
        } else if lower.ends_with(".csv") {
            Some(Self::Csv)
        } else if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
            Some(Self::Spreadsheet)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Pdf => "pdf",
            Self::Csv => "csv",
            Self::Spreadsheet => "spreadsheet",
        }
    }
}

/// Result of extracting a document.
///
/// `skipped_rows` is non-zero only for tabular input that exceeded the row cap.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub skipped_rows: usize,
}

impl Extraction {
    fn plain(text: String) -> Self {
        Self {
            text,
            skipped_rows: 0,
        }
    }
}

/// Extract plain text from an uploaded file.
///
/// The byte source is consumed in a single pass; callers hand over ownership
/// and the bytes are released when extraction returns.
pub fn extract(filename: &str, bytes: Vec<u8>, row_cap: usize) -> Result<Extraction, ExtractError> {
    match DocumentFormat::from_filename(filename) {
        Some(DocumentFormat::Text) => Ok(Extraction::plain(String::from_utf8(bytes)?)),
        Some(DocumentFormat::Pdf) => {
            let text = pdf_extract::extract_text_from_mem(&bytes)?;
            Ok(Extraction::plain(text))
        }
        Some(DocumentFormat::Csv) => extract_csv(&bytes, row_cap),
        Some(DocumentFormat::Spreadsheet) => extract_xlsx(bytes, row_cap),
        None => Err(ExtractError::UnsupportedFormat(filename.to_string())),
    }
}

/// Parse CSV input and re-serialise at most `row_cap` rows (header included).
fn extract_csv(bytes: &[u8], row_cap: usize) -> Result<Extraction, ExtractError> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader.headers()?.clone();

    let mut rows: Vec<csv::StringRecord> = vec![headers];
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record?;
        if rows.len() < row_cap {
            rows.push(record);
        } else {
            skipped += 1;
        }
    }

    Ok(Extraction {
        text: write_table(rows.iter().map(|r| r.iter()))?,
        skipped_rows: skipped,
    })
}

/// Read an XLSX archive and re-serialise the first worksheet as CSV text.
///
/// XLSX is a ZIP of XML parts: cell values live in the worksheet, while text
/// cells usually point into the shared-strings table.
fn extract_xlsx(bytes: Vec<u8>, row_cap: usize) -> Result<Extraction, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;

    let shared = match read_archive_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let sheet_name = first_worksheet_name(&archive)
        .ok_or_else(|| ExtractError::Spreadsheet("archive contains no worksheet".to_string()))?;
    let sheet_xml = read_archive_entry(&mut archive, &sheet_name)?
        .ok_or_else(|| ExtractError::Spreadsheet(format!("missing worksheet part {sheet_name}")))?;

    let (rows, skipped) = parse_worksheet(&sheet_xml, &shared, row_cap)?;
    Ok(Extraction {
        text: write_table(rows.iter().map(|r| r.iter().map(|c| c.as_str())))?,
        skipped_rows: skipped,
    })
}

fn read_archive_entry(
    archive: &mut zip::ZipArchive<Cursor<Vec<u8>>>,
    name: &str,
) -> Result<Option<Vec<u8>>, ExtractError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ExtractError::Spreadsheet(e.to_string())),
    };
    let mut buf = Vec::new();
    entry
        .read_to_end(&mut buf)
        .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;
    Ok(Some(buf))
}

/// The original implementation reads the default (first) sheet. Sheet parts
/// are conventionally numbered, so prefer `sheet1.xml` and otherwise fall back
/// to the lexicographically first worksheet part.
fn first_worksheet_name(archive: &zip::ZipArchive<Cursor<Vec<u8>>>) -> Option<String> {
    let mut candidates: Vec<&str> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/") && n.ends_with(".xml"))
        .collect();
    if candidates.iter().any(|n| *n == "xl/worksheets/sheet1.xml") {
        return Some("xl/worksheets/sheet1.xml".to_string());
    }
    candidates.sort_unstable();
    candidates.first().map(|n| n.to_string())
}

/// Parse `xl/sharedStrings.xml` into the ordered string table.
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = Reader::from_reader(BufReader::new(xml));
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_entry = false;
    let mut in_text = false;

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?
        {
            Event::Start(e) => match e.name().as_ref() {
                b"si" => {
                    in_entry = true;
                    current.clear();
                }
                b"t" if in_entry => in_text = true,
                _ => {}
            },
            Event::Text(t) if in_text => {
                let text = t
                    .xml_content()
                    .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;
                current.push_str(&text);
            }
            Event::End(e) => match e.name().as_ref() {
                b"t" => in_text = false,
                b"si" => {
                    in_entry = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Parse worksheet rows, resolving shared and inline strings, keeping at most
/// `row_cap` rows and counting the rest.
fn parse_worksheet(
    xml: &[u8],
    shared: &[String],
    row_cap: usize,
) -> Result<(Vec<Vec<String>>, usize), ExtractError> {
    let mut reader = Reader::from_reader(BufReader::new(xml));
    let mut buf = Vec::new();

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut skipped = 0usize;
    let mut cells: Vec<String> = Vec::new();
    let mut cell_type = CellType::Raw;
    let mut cell_column: Option<usize> = None;
    let mut in_value = false;
    let mut value = String::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?
        {
            Event::Start(e) => match e.name().as_ref() {
                b"row" => cells.clear(),
                b"c" => {
                    cell_type = cell_type_attr(&e)?;
                    cell_column = cell_column_attr(&e)?;
                    value.clear();
                }
                b"v" => in_value = true,
                // Inline strings nest the text in <is><t>.
                b"t" if cell_type == CellType::Inline => in_value = true,
                _ => {}
            },
            // Self-closing <c/> carries no value at all.
            Event::Empty(e) if e.name().as_ref() == b"c" => {
                push_cell(&mut cells, cell_column_attr(&e)?, String::new());
            }
            Event::Text(t) if in_value => {
                let text = t
                    .xml_content()
                    .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;
                value.push_str(&text);
            }
            Event::End(e) => match e.name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let resolved = match cell_type {
                        CellType::Shared => {
                            let idx: usize = value.trim().parse().map_err(|_| {
                                ExtractError::Spreadsheet(format!(
                                    "invalid shared string index: {value}"
                                ))
                            })?;
                            shared
                                .get(idx)
                                .ok_or_else(|| {
                                    ExtractError::Spreadsheet(format!(
                                        "shared string index {idx} out of range"
                                    ))
                                })?
                                .clone()
                        }
                        CellType::Inline | CellType::Raw => std::mem::take(&mut value),
                    };
                    push_cell(&mut cells, cell_column, resolved);
                }
                b"row" => {
                    if rows.len() < row_cap {
                        rows.push(std::mem::take(&mut cells));
                    } else {
                        skipped += 1;
                        cells.clear();
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    // Ragged rows confuse the CSV writer; pad to the widest kept row.
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    for row in &mut rows {
        row.resize(width, String::new());
    }
    Ok((rows, skipped))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellType {
    /// Value is an index into the shared-strings table (`t="s"`).
    Shared,
    /// Value is inline text (`t="inlineStr"`).
    Inline,
    /// Numeric or literal value, taken verbatim.
    Raw,
}

fn cell_type_attr(e: &quick_xml::events::BytesStart) -> Result<CellType, ExtractError> {
    let attr = e
        .try_get_attribute("t")
        .map_err(|err| ExtractError::Spreadsheet(err.to_string()))?;
    Ok(match attr {
        Some(a) => match a.value.as_ref() {
            b"s" => CellType::Shared,
            b"inlineStr" => CellType::Inline,
            _ => CellType::Raw,
        },
        None => CellType::Raw,
    })
}

/// Column index (0-based) from a cell reference like `BC12`.
fn cell_column_attr(e: &quick_xml::events::BytesStart) -> Result<Option<usize>, ExtractError> {
    let attr = e
        .try_get_attribute("r")
        .map_err(|err| ExtractError::Spreadsheet(err.to_string()))?;
    let Some(attr) = attr else { return Ok(None) };
    let mut column = 0usize;
    let mut saw_letter = false;
    for b in attr.value.iter() {
        match b {
            b'A'..=b'Z' => {
                column = column * 26 + usize::from(b - b'A') + 1;
                saw_letter = true;
            }
            b'a'..=b'z' => {
                column = column * 26 + usize::from(b - b'a') + 1;
                saw_letter = true;
            }
            b'0'..=b'9' => break,
            _ => return Ok(None),
        }
    }
    Ok(saw_letter.then(|| column - 1))
}

/// Place a cell at its referenced column, padding gaps left by absent cells.
fn push_cell(cells: &mut Vec<String>, column: Option<usize>, value: String) {
    if let Some(col) = column {
        while cells.len() < col {
            cells.push(String::new());
        }
    }
    cells.push(value);
}

/// Serialise rows back into canonical comma-delimited text.
fn write_table<'a, R, C>(rows: R) -> Result<String, ExtractError>
where
    R: Iterator<Item = C>,
    C: Iterator<Item = &'a str>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.write_record(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ExtractError::TableWrite(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ExtractError::TableWrite(e.to_string()))
}
