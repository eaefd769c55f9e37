//! CSV and XLSX row primitives used by the bulk import/export handlers.
//!
//! An XLSX file is a zip archive of sheet XML; reading supports both
//! shared and inline strings, writing emits a minimal single-sheet
//! workbook with inline strings only.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use anyhow::{anyhow, Context};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// A parsed cell. Numeric cells are kept numeric so spreadsheet serial
/// dates stay detectable downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn display(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Cell::Text(s) if s.trim().is_empty())
    }
}

/// One data row keyed by header name.
pub type RowMap = HashMap<String, Cell>;

pub fn read_csv_rows(path: &Path) -> anyhow::Result<Vec<RowMap>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("open csv {}", path.display()))?;
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut map = RowMap::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            map.insert(
                header.trim().to_string(),
                Cell::Text(value.trim().to_string()),
            );
        }
        rows.push(map);
    }
    Ok(rows)
}

pub fn read_xlsx_rows(path: &Path) -> anyhow::Result<Vec<RowMap>> {
    let file = File::open(path).with_context(|| format!("open xlsx {}", path.display()))?;
    let mut archive = ZipArchive::new(file)?;
    let shared = read_shared_strings(&mut archive)?;

    let sheet_path = first_sheet_path(&mut archive)?;
    let mut xml = String::new();
    archive.by_name(&sheet_path)?.read_to_string(&mut xml)?;

    let grid = parse_sheet(&xml, &shared)?;
    Ok(grid_to_maps(grid))
}

pub fn write_csv(path: &Path, headers: &[&str], rows: &[Vec<String>]) -> anyhow::Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_xlsx(
    path: &Path,
    sheet_name: &str,
    headers: &[&str],
    rows: &[Vec<String>],
) -> anyhow::Result<()> {
    let sheet_xml = render_sheet_xml(headers, rows)?;

    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(CONTENT_TYPES_XML.as_bytes())?;

    zip.start_file("_rels/.rels", options)?;
    zip.write_all(ROOT_RELS_XML.as_bytes())?;

    zip.start_file("xl/workbook.xml", options)?;
    let workbook = WORKBOOK_XML_TEMPLATE.replace(
        "{sheet_name}",
        quick_xml::escape::escape(sheet_name).as_ref(),
    );
    zip.write_all(workbook.as_bytes())?;

    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    zip.write_all(WORKBOOK_RELS_XML.as_bytes())?;

    zip.start_file("xl/worksheets/sheet1.xml", options)?;
    zip.write_all(&sheet_xml)?;

    zip.finish()?;
    Ok(())
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_XML_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{sheet_name}" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

fn render_sheet_xml(headers: &[&str], rows: &[Vec<String>]) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut xml = Writer::new(&mut out);

    xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    let mut worksheet = BytesStart::new("worksheet");
    worksheet.push_attribute((
        "xmlns",
        "http://schemas.openxmlformats.org/spreadsheetml/2006/main",
    ));
    xml.write_event(Event::Start(worksheet))?;
    xml.write_event(Event::Start(BytesStart::new("sheetData")))?;

    let header_row: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    for (r, row) in std::iter::once(&header_row).chain(rows.iter()).enumerate() {
        let row_ref = (r + 1).to_string();
        let mut row_el = BytesStart::new("row");
        row_el.push_attribute(("r", row_ref.as_str()));
        xml.write_event(Event::Start(row_el))?;
        for (c, value) in row.iter().enumerate() {
            let cell_ref = format!("{}{}", column_ref(c), r + 1);
            let mut cell = BytesStart::new("c");
            cell.push_attribute(("r", cell_ref.as_str()));
            cell.push_attribute(("t", "inlineStr"));
            xml.write_event(Event::Start(cell))?;
            xml.write_event(Event::Start(BytesStart::new("is")))?;
            xml.write_event(Event::Start(BytesStart::new("t")))?;
            xml.write_event(Event::Text(BytesText::new(value)))?;
            xml.write_event(Event::End(BytesEnd::new("t")))?;
            xml.write_event(Event::End(BytesEnd::new("is")))?;
            xml.write_event(Event::End(BytesEnd::new("c")))?;
        }
        xml.write_event(Event::End(BytesEnd::new("row")))?;
    }

    xml.write_event(Event::End(BytesEnd::new("sheetData")))?;
    xml.write_event(Event::End(BytesEnd::new("worksheet")))?;
    Ok(out)
}

fn first_sheet_path<R: Read + Seek>(archive: &mut ZipArchive<R>) -> anyhow::Result<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort();
    names
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("workbook has no worksheets"))
}

fn read_shared_strings<R: Read + Seek>(archive: &mut ZipArchive<R>) -> anyhow::Result<Vec<String>> {
    let mut xml = String::new();
    match archive.by_name("xl/sharedStrings.xml") {
        Ok(mut entry) => {
            entry.read_to_string(&mut xml)?;
        }
        Err(zip::result::ZipError::FileNotFound) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    let mut reader = Reader::from_str(&xml);
    let mut strings = Vec::new();
    let mut buf = String::new();
    let mut in_si = false;
    let mut in_t = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"si" => {
                    in_si = true;
                    buf.clear();
                }
                b"t" => in_t = true,
                _ => {}
            },
            Event::Text(t) => {
                if in_si && in_t {
                    buf.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    strings.push(std::mem::take(&mut buf));
                    in_si = false;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Number,
    Shared,
    Inline,
    Other,
}

fn parse_sheet(xml: &str, shared: &[String]) -> anyhow::Result<Vec<Vec<Cell>>> {
    let mut reader = Reader::from_str(xml);

    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let mut current: Vec<Cell> = Vec::new();
    let mut col = 0usize;
    let mut kind = CellKind::Number;
    let mut in_value = false;
    let mut in_inline_text = false;
    let mut pending = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"row" => current = Vec::new(),
                b"c" => {
                    let (c, k) = cell_attrs(&e, current.len())?;
                    col = c;
                    kind = k;
                    pending.clear();
                }
                b"v" => in_value = true,
                b"t" if kind == CellKind::Inline => in_inline_text = true,
                _ => {}
            },
            Event::Text(t) => {
                if in_value || in_inline_text {
                    pending.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"v" => in_value = false,
                b"t" => in_inline_text = false,
                b"c" => {
                    let cell = match kind {
                        CellKind::Shared => {
                            let idx: usize = pending.trim().parse().unwrap_or(0);
                            Cell::Text(shared.get(idx).cloned().unwrap_or_default())
                        }
                        CellKind::Number => match pending.trim().parse::<f64>() {
                            Ok(n) => Cell::Number(n),
                            Err(_) => Cell::Text(pending.trim().to_string()),
                        },
                        _ => Cell::Text(pending.clone()),
                    };
                    place(&mut current, col, cell);
                    pending.clear();
                }
                b"row" => rows.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows)
}

fn cell_attrs(e: &BytesStart, fallback_col: usize) -> anyhow::Result<(usize, CellKind)> {
    let mut col = fallback_col;
    let mut kind = CellKind::Number;
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"r" => col = column_index(&attr.unescape_value()?),
            b"t" => {
                kind = match attr.unescape_value()?.as_ref() {
                    "s" => CellKind::Shared,
                    "inlineStr" => CellKind::Inline,
                    "n" => CellKind::Number,
                    _ => CellKind::Other,
                }
            }
            _ => {}
        }
    }
    Ok((col, kind))
}

/// Drop a cell at its column index, padding skipped columns with blanks.
/// Cells may arrive out of order when the sheet was written by hand.
fn place(row: &mut Vec<Cell>, col: usize, cell: Cell) {
    if col < row.len() {
        row[col] = cell;
    } else {
        row.resize(col, Cell::Text(String::new()));
        row.push(cell);
    }
}

fn grid_to_maps(grid: Vec<Vec<Cell>>) -> Vec<RowMap> {
    let mut iter = grid.into_iter();
    let Some(header_row) = iter.next() else {
        return Vec::new();
    };
    let headers: Vec<String> = header_row.iter().map(|c| c.display().trim().to_string()).collect();

    let mut rows = Vec::new();
    for cells in iter {
        if cells.iter().all(Cell::is_blank) {
            continue;
        }
        let mut map = RowMap::new();
        for (idx, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let cell = cells.get(idx).cloned().unwrap_or(Cell::Text(String::new()));
            map.insert(header.clone(), cell);
        }
        rows.push(map);
    }
    rows
}

/// "A1" -> 0, "AB3" -> 27. Letters only; the row digits are ignored.
fn column_index(cell_ref: &str) -> usize {
    let mut index = 0usize;
    for b in cell_ref.bytes() {
        if b.is_ascii_uppercase() {
            index = index * 26 + (b - b'A' + 1) as usize;
        } else {
            break;
        }
    }
    index.saturating_sub(1)
}

fn column_ref(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}
