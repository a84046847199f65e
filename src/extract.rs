//! Byte-level text extraction for the supported document formats.
//!
//! Each decoder takes the raw file bytes and returns plain UTF-8 text. The
//! [`loader`](crate::loader) layer owns file I/O and error attribution; this
//! module never touches the filesystem.
//!
//! | Format | Decoder |
//! |--------|---------|
//! | PDF | `pdf-extract` |
//! | DOCX | `zip` + `quick-xml`, one line per paragraph |
//! | XLSX | `zip` + `quick-xml`, one [`SheetText`] per worksheet |
//! | HTML | `scraper`, visible body text only |
//! | EML | `mail-parser`, subject plus text bodies |
//! | DOC | OOXML sniffing, then printable-run recovery |
//! | TXT | strict UTF-8 |

use std::io::Read;

use quick_xml::events::Event;
use scraper::{ElementRef, Html, Selector};

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Shortest byte run kept when recovering text from a binary `.doc`.
const DOC_MIN_RUN: usize = 6;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("email parsing failed: {0}")]
    Email(String),
    #[error("no recoverable text in legacy document")]
    Binary,
    #[error("text is not valid UTF-8")]
    Encoding,
}

/// Text of one worksheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetText {
    pub name: String,
    pub text: String,
}

/// Decoded email: subject line and the readable body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailText {
    pub subject: Option<String>,
    pub text: String,
}

pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

pub fn extract_txt(bytes: &[u8]) -> Result<String, ExtractError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::Encoding)
}

// ============ OOXML ============

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

pub fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    docx_paragraphs(&doc_xml)
}

/// Collect `w:t` runs, breaking lines at `w:p` ends and `w:br`/`w:tab` marks.
fn docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut line = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                line.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        out.push_str(trimmed);
                        out.push('\n');
                    }
                    line.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"br" => line.push('\n'),
                b"tab" => line.push('\t'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !line.trim().is_empty() {
        out.push_str(line.trim());
    }
    Ok(out.trim_end().to_string())
}

/// One [`SheetText`] per worksheet, in workbook order. Rows become lines and
/// cells within a row are joined by ` | `. Empty sheets are omitted.
pub fn extract_xlsx(bytes: &[u8]) -> Result<Vec<SheetText>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if archive.index_for_name("xl/sharedStrings.xml").is_some() {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };
    let display_names = if archive.index_for_name("xl/workbook.xml").is_some() {
        let xml = read_zip_entry_bounded(&mut archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
        workbook_sheet_names(&xml)?
    } else {
        Vec::new()
    };

    let files = list_worksheet_files(&archive);
    if files.is_empty() {
        return Err(ExtractError::Ooxml("workbook has no worksheets".to_string()));
    }

    let mut sheets = Vec::new();
    for (idx, file) in files.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, &file, MAX_XML_ENTRY_BYTES)?;
        let text = sheet_rows(&xml, &shared_strings)?;
        if text.trim().is_empty() {
            continue;
        }
        let name = display_names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", idx + 1));
        sheets.push(SheetText { name, text });
    }
    Ok(sheets)
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(current.take().unwrap_or_default()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn workbook_sheet_names(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut names = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"name" {
                        if let Ok(v) = attr.unescape_value() {
                            names.push(v.into_owned());
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

fn list_worksheet_files(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Shared,
    Inline,
    Literal,
}

fn sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    let mut lines: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell = String::new();
    let mut kind = CellKind::Literal;
    let mut in_value = false;
    let mut cell_count = 0usize;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    kind = CellKind::Literal;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Literal,
                            };
                        }
                    }
                    cell.clear();
                }
                b"v" => in_value = true,
                b"t" if kind == CellKind::Inline => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                cell.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let raw = cell.trim();
                    let value = match kind {
                        CellKind::Shared => raw
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i))
                            .cloned()
                            .unwrap_or_default(),
                        CellKind::Inline | CellKind::Literal => raw.to_string(),
                    };
                    if !value.trim().is_empty() {
                        row.push(value.trim().to_string());
                        cell_count += 1;
                    }
                    cell.clear();
                }
                b"row" => {
                    if !row.is_empty() {
                        lines.push(row.join(" | "));
                    }
                    row.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        lines.push(row.join(" | "));
    }
    Ok(lines.join("\n"))
}

// ============ HTML ============

const SKIPPED_ELEMENTS: [&str; 6] = ["script", "style", "noscript", "iframe", "svg", "head"];

/// Visible text of an HTML document, one text node per line.
pub fn extract_html(bytes: &[u8]) -> String {
    let html = String::from_utf8_lossy(bytes);
    html_to_text(&html)
}

fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts = Vec::new();

    let root = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .unwrap_or_else(|| document.root_element());
    collect_text(root, &mut parts);

    parts.join("\n")
}

fn collect_text(element: ElementRef<'_>, parts: &mut Vec<String>) {
    use scraper::node::Node;

    if SKIPPED_ELEMENTS.contains(&element.value().name()) {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    collect_text(child_element, parts);
                }
            }
            _ => {}
        }
    }
}

// ============ Email ============

pub fn extract_eml(bytes: &[u8]) -> Result<EmailText, ExtractError> {
    let message = mail_parser::MessageParser::default()
        .parse(bytes)
        .ok_or_else(|| ExtractError::Email("not an RFC 5322 message".to_string()))?;

    let subject = message
        .subject()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let mut bodies = Vec::new();
    let mut pos = 0;
    while let Some(body) = message.body_text(pos) {
        let trimmed = body.trim();
        if !trimmed.is_empty() {
            bodies.push(trimmed.to_string());
        }
        pos += 1;
    }
    if bodies.is_empty() {
        let mut pos = 0;
        while let Some(html) = message.body_html(pos) {
            let text = html_to_text(&html);
            if !text.trim().is_empty() {
                bodies.push(text);
            }
            pos += 1;
        }
    }

    let mut text = String::new();
    if let Some(s) = &subject {
        text.push_str(s);
        text.push_str("\n\n");
    }
    text.push_str(&bodies.join("\n\n"));
    Ok(EmailText {
        subject,
        text: text.trim().to_string(),
    })
}

// ============ Legacy Word ============

/// Text of a `.doc` file. Files that are really OOXML are decoded as DOCX;
/// genuine Word 97 binaries fall back to recovering printable runs, both
/// 8-bit and UTF-16LE.
pub fn extract_doc(bytes: &[u8]) -> Result<String, ExtractError> {
    if bytes.starts_with(ZIP_MAGIC) {
        return extract_docx(bytes);
    }

    let mut runs = printable_runs_utf16le(bytes);
    if runs.is_empty() {
        runs = printable_runs_8bit(bytes);
    }
    if runs.is_empty() {
        return Err(ExtractError::Binary);
    }
    Ok(runs.join("\n"))
}

fn is_doc_char(c: char) -> bool {
    c.is_alphanumeric() || c.is_ascii_punctuation() || c == ' ' || c == '\t'
}

fn keep_run(run: &str) -> bool {
    let trimmed = run.trim();
    trimmed.chars().count() >= DOC_MIN_RUN && trimmed.chars().any(|c| c.is_alphabetic())
}

fn printable_runs_8bit(bytes: &[u8]) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    for &b in bytes {
        let c = b as char;
        if b.is_ascii() && is_doc_char(c) {
            current.push(c);
        } else {
            if keep_run(&current) {
                runs.push(current.trim().to_string());
            }
            current.clear();
        }
    }
    if keep_run(&current) {
        runs.push(current.trim().to_string());
    }
    runs
}

fn printable_runs_utf16le(bytes: &[u8]) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    for pair in bytes.chunks_exact(2) {
        let unit = u16::from_le_bytes([pair[0], pair[1]]);
        match char::from_u32(unit as u32) {
            Some(c) if pair[1] == 0 && is_doc_char(c) => current.push(c),
            _ => {
                if keep_run(&current) {
                    runs.push(current.trim().to_string());
                }
                current.clear();
            }
        }
    }
    if keep_run(&current) {
        runs.push(current.trim().to_string());
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pdf(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_docx(b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn txt_rejects_invalid_utf8_and_strips_bom() {
        assert!(matches!(extract_txt(&[0xff, 0xfe, 0x00]), Err(ExtractError::Encoding)));
        assert_eq!(extract_txt(b"\xEF\xBB\xBFhello").unwrap(), "hello");
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let doc = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
<w:p><w:r><w:t>Council meeting</w:t></w:r><w:r><w:t xml:space="preserve"> minutes</w:t></w:r></w:p>
<w:p><w:r><w:t>Item &amp; agenda</w:t></w:r></w:p>
</w:body></w:document>"#;
        let bytes = zip_with(&[("word/document.xml", doc)]);
        let text = extract_docx(&bytes).unwrap();
        assert_eq!(text, "Council meeting minutes\nItem & agenda");
    }

    #[test]
    fn xlsx_one_unit_per_sheet() {
        let workbook = r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"
 xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="Orders" sheetId="1" r:id="rId1"/><sheet name="Notes" sheetId="2" r:id="rId2"/></sheets>
</workbook>"#;
        let shared = r#"<sst><si><t>Widget</t></si><si><r><t>Gad</t></r><r><t>get</t></r></si></sst>"#;
        let sheet1 = r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1"><v>42</v></c></row>
<row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2" t="inlineStr"><is><t>backorder</t></is></c></row>
</sheetData></worksheet>"#;
        let sheet2 = r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="inlineStr"><is><t>Ship by Friday</t></is></c></row>
</sheetData></worksheet>"#;
        let bytes = zip_with(&[
            ("xl/workbook.xml", workbook),
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet1),
            ("xl/worksheets/sheet2.xml", sheet2),
        ]);

        let sheets = extract_xlsx(&bytes).unwrap();
        assert_eq!(
            sheets,
            vec![
                SheetText {
                    name: "Orders".into(),
                    text: "Widget | 42\nGadget | backorder".into(),
                },
                SheetText {
                    name: "Notes".into(),
                    text: "Ship by Friday".into(),
                },
            ]
        );
    }

    #[test]
    fn html_skips_scripts_and_head() {
        let html = br#"<html><head><title>T</title><style>p{}</style></head>
<body><h1>Parks</h1><script>var x = 1;</script><p>Open <b>daily</b></p></body></html>"#;
        let text = extract_html(html);
        assert_eq!(text, "Parks\nOpen\ndaily");
    }

    #[test]
    fn eml_subject_and_body() {
        let raw = b"From: clerk@example.org\r\nTo: desk@example.org\r\nSubject: Road closure\r\n\
Content-Type: text/plain; charset=utf-8\r\n\r\nMain Street is closed on Monday.\r\n";
        let email = extract_eml(raw).unwrap();
        assert_eq!(email.subject.as_deref(), Some("Road closure"));
        assert!(email.text.starts_with("Road closure"));
        assert!(email.text.contains("Main Street is closed on Monday."));
    }

    #[test]
    fn doc_recovers_utf16_runs() {
        let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        for unit in "Annual budget summary".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes.extend_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        let text = extract_doc(&bytes).unwrap();
        assert!(text.contains("Annual budget summary"));
    }

    #[test]
    fn doc_with_no_text_is_binary_error() {
        let bytes = vec![0u8, 1, 2, 3, 250, 251, 252];
        assert!(matches!(extract_doc(&bytes), Err(ExtractError::Binary)));
    }
}
