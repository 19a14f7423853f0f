//! OOXML workbook reader (`.xlsx` / `.xlsm`).
//!
//! Resolves sheets through `xl/workbook.xml` and its relationships, loads
//! shared strings and date styles once, then streams each worksheet row by
//! row into a caller-supplied sink so ingestion can stop at its row budget
//! without materializing the rest of the sheet.

use crate::ingestion::cell::{parse_iso_datetime, serial_to_datetime, CellValue};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::ops::ControlFlow;
use thiserror::Error;
use zip::result::ZipError;
use zip::ZipArchive;

/// Excel's column limit (XFD).
const MAX_COLUMNS: usize = 16_384;

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("not a ZIP container")]
    NotZip,
    #[error("ZIP error: {0}")]
    Zip(String),
    #[error("missing workbook part: {0}")]
    MissingPart(String),
    #[error("part '{path}' is too large: {size} bytes (limit: {limit} bytes)")]
    PartTooLarge { path: String, size: u64, limit: u64 },
    #[error("XML parse error: {0}")]
    Xml(String),
    #[error("invalid cell address: {0}")]
    InvalidAddress(String),
    #[error("shared string index {0} out of bounds")]
    SharedStringOutOfBounds(usize),
}

#[derive(Debug, Clone)]
struct SheetDescriptor {
    name: String,
    rel_id: Option<String>,
    sheet_id: Option<u32>,
}

pub struct XlsxWorkbook {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    /// (sheet name, worksheet part path) in workbook order.
    sheets: Vec<(String, String)>,
    shared_strings: Vec<String>,
    /// Indexed by `cellXfs` position: does that style render a date?
    date_styles: Vec<bool>,
    date1904: bool,
    max_part_bytes: u64,
}

impl XlsxWorkbook {
    pub fn open(bytes: Vec<u8>, max_part_bytes: u64) -> Result<Self, WorkbookError> {
        let archive = ZipArchive::new(Cursor::new(bytes)).map_err(|err| match err {
            ZipError::InvalidArchive(_) | ZipError::UnsupportedArchive(_) => WorkbookError::NotZip,
            other => WorkbookError::Zip(other.to_string()),
        })?;

        let mut workbook = XlsxWorkbook {
            archive,
            sheets: Vec::new(),
            shared_strings: Vec::new(),
            date_styles: Vec::new(),
            date1904: false,
            max_part_bytes,
        };

        let workbook_xml = workbook
            .read_part("xl/workbook.xml")?
            .ok_or_else(|| WorkbookError::MissingPart("xl/workbook.xml".to_string()))?;
        let (descriptors, date1904) = parse_workbook_xml(&workbook_xml)?;
        workbook.date1904 = date1904;

        let relationships = match workbook.read_part("xl/_rels/workbook.xml.rels")? {
            Some(xml) => parse_relationships(&xml)?,
            None => HashMap::new(),
        };
        workbook.sheets = descriptors
            .iter()
            .enumerate()
            .map(|(idx, sheet)| (sheet.name.clone(), resolve_sheet_target(sheet, &relationships, idx)))
            .collect();

        if let Some(xml) = workbook.read_part("xl/sharedStrings.xml")? {
            workbook.shared_strings = parse_shared_strings(&xml)?;
        }
        if let Some(xml) = workbook.read_part("xl/styles.xml")? {
            workbook.date_styles = parse_date_styles(&xml)?;
        }

        Ok(workbook)
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Stream the rows of sheet `index` (workbook order) into `on_row`, in
    /// document order. Rows are dense from column A; missing cells are `Empty`.
    /// Returning `ControlFlow::Break` from the sink stops parsing.
    pub fn read_sheet<F>(&mut self, index: usize, mut on_row: F) -> Result<(), WorkbookError>
    where
        F: FnMut(Vec<CellValue>) -> ControlFlow<()>,
    {
        let path = match self.sheets.get(index) {
            Some((_, path)) => path.clone(),
            None => return Err(WorkbookError::MissingPart(format!("sheet #{}", index + 1))),
        };
        let xml = self
            .read_part(&path)?
            .ok_or_else(|| WorkbookError::MissingPart(path.clone()))?;

        let mut reader = Reader::from_reader(xml.as_slice());
        reader.config_mut().trim_text(false);
        let mut buf = Vec::new();
        let mut row: Option<Vec<CellValue>> = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) if e.name().as_ref() == b"row" => {
                    row = Some(Vec::new());
                }
                Ok(Event::End(e)) if e.name().as_ref() == b"row" => {
                    if let Some(cells) = row.take() {
                        if on_row(cells).is_break() {
                            return Ok(());
                        }
                    }
                }
                Ok(Event::Start(e)) if e.name().as_ref() == b"c" => {
                    let attrs = CellAttrs::from_element(&e)?;
                    let value = self.read_cell(&mut reader, &attrs)?;
                    if let Some(cells) = row.as_mut() {
                        let col = match attrs.reference.as_deref() {
                            Some(reference) => column_index(reference)
                                .ok_or_else(|| WorkbookError::InvalidAddress(reference.to_string()))?,
                            None => cells.len(),
                        };
                        if col >= MAX_COLUMNS {
                            return Err(WorkbookError::InvalidAddress(
                                attrs.reference.unwrap_or_default(),
                            ));
                        }
                        if col >= cells.len() {
                            cells.resize(col + 1, CellValue::Empty);
                        }
                        cells[col] = value;
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(WorkbookError::Xml(e.to_string())),
                _ => {}
            }
            buf.clear();
        }

        Ok(())
    }

    fn read_cell(&self, reader: &mut Reader<&[u8]>, attrs: &CellAttrs) -> Result<CellValue, WorkbookError> {
        let mut buf = Vec::new();
        let mut value_text: Option<String> = None;
        let mut inline_text: Option<String> = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) if e.name().as_ref() == b"v" => {
                    let text = reader.read_text(e.name()).map_err(to_xml_err)?;
                    value_text = Some(unescape(&text)?);
                }
                Ok(Event::Start(e)) if e.name().as_ref() == b"is" => {
                    inline_text = Some(read_rich_text(reader, b"is")?);
                }
                Ok(Event::End(e)) if e.name().as_ref() == b"c" => break,
                Ok(Event::Eof) => {
                    return Err(WorkbookError::Xml("unexpected EOF inside cell".into()));
                }
                Err(e) => return Err(to_xml_err(e)),
                _ => {}
            }
            buf.clear();
        }

        if let Some(text) = inline_text {
            return Ok(CellValue::Text(text));
        }
        self.convert_value(value_text.as_deref(), attrs)
    }

    fn convert_value(&self, raw: Option<&str>, attrs: &CellAttrs) -> Result<CellValue, WorkbookError> {
        let raw = match raw {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(CellValue::Empty),
        };
        let trimmed = raw.trim();

        match attrs.cell_type.as_deref() {
            Some("s") => {
                let idx = trimmed
                    .parse::<usize>()
                    .map_err(|e| WorkbookError::Xml(e.to_string()))?;
                self.shared_strings
                    .get(idx)
                    .map(|s| CellValue::Text(s.clone()))
                    .ok_or(WorkbookError::SharedStringOutOfBounds(idx))
            }
            Some("b") => Ok(match trimmed {
                "1" | "true" => CellValue::Boolean(true),
                "0" | "false" => CellValue::Boolean(false),
                _ => CellValue::Text(raw.to_string()),
            }),
            Some("d") => Ok(parse_iso_datetime(trimmed)
                .map(CellValue::Date)
                .unwrap_or_else(|| CellValue::Text(raw.to_string()))),
            Some("e") | Some("str") | Some("inlineStr") => Ok(CellValue::Text(raw.to_string())),
            _ => match trimmed.parse::<f64>() {
                Ok(n) if self.is_date_style(attrs.style) => Ok(serial_to_datetime(n, self.date1904)
                    .map(CellValue::Date)
                    .unwrap_or(CellValue::Number(n))),
                Ok(n) => Ok(CellValue::Number(n)),
                Err(_) => Ok(CellValue::Text(raw.to_string())),
            },
        }
    }

    fn is_date_style(&self, style: Option<usize>) -> bool {
        style
            .and_then(|idx| self.date_styles.get(idx).copied())
            .unwrap_or(false)
    }

    /// Read a part, enforcing the per-part size limit. `Ok(None)` when absent.
    fn read_part(&mut self, name: &str) -> Result<Option<Vec<u8>>, WorkbookError> {
        let mut file = match self.archive.by_name(name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(WorkbookError::Zip(e.to_string())),
        };

        let size = file.size();
        if size > self.max_part_bytes {
            return Err(WorkbookError::PartTooLarge {
                path: name.to_string(),
                size,
                limit: self.max_part_bytes,
            });
        }

        let mut buf = Vec::with_capacity(size as usize);
        // `take` guards against entries whose header understates their size.
        (&mut file)
            .take(self.max_part_bytes + 1)
            .read_to_end(&mut buf)
            .map_err(|e| WorkbookError::Zip(format!("{}: {}", name, e)))?;
        if buf.len() as u64 > self.max_part_bytes {
            return Err(WorkbookError::PartTooLarge {
                path: name.to_string(),
                size: buf.len() as u64,
                limit: self.max_part_bytes,
            });
        }
        Ok(Some(buf))
    }
}

/// True when a ZIP archive is itself an OOXML workbook rather than an archive of files.
pub fn is_workbook_package<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> bool {
    archive.by_name("[Content_Types].xml").is_ok() && archive.by_name("xl/workbook.xml").is_ok()
}

struct CellAttrs {
    reference: Option<String>,
    cell_type: Option<String>,
    style: Option<usize>,
}

impl CellAttrs {
    fn from_element(element: &BytesStart<'_>) -> Result<Self, WorkbookError> {
        Ok(CellAttrs {
            reference: get_attr_value(element, b"r")?,
            cell_type: get_attr_value(element, b"t")?,
            style: get_attr_value(element, b"s")?.and_then(|s| s.parse().ok()),
        })
    }
}

fn parse_workbook_xml(xml: &[u8]) -> Result<(Vec<SheetDescriptor>, bool), WorkbookError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    let mut date1904 = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"workbookPr" => {
                if let Some(flag) = get_attr_value(&e, b"date1904")? {
                    date1904 = flag == "1" || flag.eq_ignore_ascii_case("true");
                }
            }
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"sheet" => {
                let name = get_attr_value(&e, b"name")?;
                let sheet_id = get_attr_value(&e, b"sheetId")?.and_then(|id| id.parse::<u32>().ok());
                let rel_id = get_attr_value(&e, b"r:id")?;
                if let Some(name) = name {
                    sheets.push(SheetDescriptor {
                        name,
                        rel_id,
                        sheet_id,
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(to_xml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok((sheets, date1904))
}

fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>, WorkbookError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut map = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"Relationship" => {
                let id = get_attr_value(&e, b"Id")?;
                let target = get_attr_value(&e, b"Target")?;
                let rel_type = get_attr_value(&e, b"Type")?;
                if let (Some(id), Some(target), Some(rel_type)) = (id, target, rel_type) {
                    if rel_type.contains("worksheet") {
                        map.insert(id, target);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(to_xml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(map)
}

fn resolve_sheet_target(
    sheet: &SheetDescriptor,
    relationships: &HashMap<String, String>,
    index: usize,
) -> String {
    if let Some(target) = sheet.rel_id.as_ref().and_then(|id| relationships.get(id)) {
        return normalize_target(target);
    }

    let guessed = sheet
        .sheet_id
        .map(|id| format!("xl/worksheets/sheet{}.xml", id))
        .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", index + 1));
    normalize_target(&guessed)
}

fn normalize_target(target: &str) -> String {
    let trimmed = target.trim_start_matches('/');
    if trimmed.starts_with("xl/") {
        trimmed.to_string()
    } else {
        format!("xl/{}", trimmed)
    }
}

fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, WorkbookError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut strings = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"si" => {
                strings.push(read_rich_text(&mut reader, b"si")?);
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Eof) => break,
            Err(e) => return Err(to_xml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

/// Concatenate the `<t>` runs inside `end` (an `<si>` or `<is>`), skipping
/// phonetic (`<rPh>`) runs.
fn read_rich_text(reader: &mut Reader<&[u8]>, end: &[u8]) -> Result<String, WorkbookError> {
    let mut buf = Vec::new();
    let mut value = String::new();
    let mut in_phonetic = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"rPh" => in_phonetic = true,
            Ok(Event::End(e)) if e.name().as_ref() == b"rPh" => in_phonetic = false,
            Ok(Event::Start(e)) if e.name().as_ref() == b"t" => {
                let text = reader.read_text(e.name()).map_err(to_xml_err)?;
                if !in_phonetic {
                    value.push_str(&unescape(&text)?);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == end => break,
            Ok(Event::Eof) => {
                return Err(WorkbookError::Xml("unexpected EOF inside rich text".into()));
            }
            Err(e) => return Err(to_xml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(value)
}

/// One flag per `cellXfs` entry: whether its number format displays a date.
fn parse_date_styles(xml: &[u8]) -> Result<Vec<bool>, WorkbookError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut custom_formats: HashMap<u32, String> = HashMap::new();
    let mut xf_formats: Vec<u32> = Vec::new();
    let mut in_cell_xfs = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"numFmt" => {
                let id = get_attr_value(&e, b"numFmtId")?.and_then(|id| id.parse::<u32>().ok());
                let code = get_attr_value(&e, b"formatCode")?;
                if let (Some(id), Some(code)) = (id, code) {
                    custom_formats.insert(id, code);
                }
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"cellXfs" => in_cell_xfs = true,
            Ok(Event::End(e)) if e.name().as_ref() == b"cellXfs" => in_cell_xfs = false,
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if in_cell_xfs && e.name().as_ref() == b"xf" => {
                let id = get_attr_value(&e, b"numFmtId")?
                    .and_then(|id| id.parse::<u32>().ok())
                    .unwrap_or(0);
                xf_formats.push(id);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(to_xml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(xf_formats
        .into_iter()
        .map(|id| is_date_format(id, custom_formats.get(&id).map(String::as_str)))
        .collect())
}

fn is_date_format(num_fmt_id: u32, code: Option<&str>) -> bool {
    if matches!(num_fmt_id, 14..=22 | 27..=36 | 45..=47 | 50..=58) {
        return true;
    }
    match code {
        Some(code) => format_code_has_date_tokens(code),
        None => false,
    }
}

/// Look for date/time tokens outside quoted literals, escapes and `[...]` sections.
fn format_code_has_date_tokens(code: &str) -> bool {
    let mut chars = code.chars();
    let mut in_quotes = false;
    let mut in_brackets = false;

    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => {}
            '\\' => {
                chars.next();
            }
            '[' => in_brackets = true,
            ']' => in_brackets = false,
            _ if in_brackets => {}
            c if matches!(c.to_ascii_lowercase(), 'y' | 'm' | 'd' | 'h' | 's') => return true,
            _ => {}
        }
    }
    false
}

/// Zero-based column of an A1-style reference (`"C12"` -> 2).
fn column_index(reference: &str) -> Option<usize> {
    let letters: Vec<u8> = reference
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let rest = &reference[letters.len()..];
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut col: usize = 0;
    for b in letters {
        col = col
            .checked_mul(26)?
            .checked_add((b.to_ascii_uppercase() - b'A' + 1) as usize)?;
    }
    Some(col - 1)
}

fn get_attr_value(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, WorkbookError> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| WorkbookError::Xml(e.to_string()))?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value().map_err(to_xml_err)?.into_owned()));
        }
    }
    Ok(None)
}

fn unescape(text: &str) -> Result<String, WorkbookError> {
    quick_xml::escape::unescape(text)
        .map(|s| s.into_owned())
        .map_err(|e| WorkbookError::Xml(e.to_string()))
}

fn to_xml_err(err: quick_xml::Error) -> WorkbookError {
    WorkbookError::Xml(err.to_string())
}
