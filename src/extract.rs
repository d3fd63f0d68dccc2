//! Plain-text extraction for course documents.
//!
//! [`extract`] picks a decoder from the file extension, falling back to the
//! declared content type, and returns trimmed UTF-8 text or `None`. Decoder
//! failures never escape: a malformed or unsupported file is simply "no
//! text". Callers bound the input size before downloading; nothing here
//! enforces a byte ceiling on the buffer itself, only on decompressed ZIP
//! entries.
//!
//! | Format | Decoder |
//! |--------|---------|
//! | PDF | `pdf-extract` |
//! | DOCX | `word/document.xml` runs, one line per paragraph |
//! | PPTX | `ppt/slides/slideN.xml` runs in slide-number order |
//! | XLSX | each sheet's rows, non-empty cells joined with ` \| ` |
//! | HTML | `scraper` text nodes minus script/style |
//! | Text, CSV, JSON, Markdown | passthrough |
//! | RTF | regex removal of control words and groups |

use std::io::Read;

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use regex::Regex;
use scraper::{Html, Node};
use thiserror::Error;
use tracing::debug;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
const XLSX_CELL_SEPARATOR: &str = " | ";
/// Zip-bomb guard for a single decompressed entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Container formats with a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocFormat {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Html,
    Text,
    Rtf,
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("RTF extraction failed: {0}")]
    Rtf(String),
}

/// Extract text from `bytes`. `None` means no text is available.
pub fn extract(bytes: &[u8], filename: &str, content_type: &str) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let format = detect_format(filename, content_type)?;
    match extract_as(bytes, format) {
        Ok(text) => normalize(&text),
        Err(e) => {
            debug!(filename, ?format, error = %e, "decoder failed");
            None
        }
    }
}

/// Choose a decoder: extension first, then content type.
pub fn detect_format(filename: &str, content_type: &str) -> Option<DocFormat> {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    let by_ext = match ext.as_deref() {
        Some("pdf") => Some(DocFormat::Pdf),
        Some("docx") => Some(DocFormat::Docx),
        Some("pptx") => Some(DocFormat::Pptx),
        Some("xlsx") => Some(DocFormat::Xlsx),
        Some("html" | "htm") => Some(DocFormat::Html),
        Some("txt" | "csv" | "json" | "md" | "markdown" | "tsv") => Some(DocFormat::Text),
        Some("rtf") => Some(DocFormat::Rtf),
        _ => None,
    };
    if by_ext.is_some() {
        return by_ext;
    }

    let ct = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match ct.as_str() {
        MIME_PDF => Some(DocFormat::Pdf),
        MIME_DOCX => Some(DocFormat::Docx),
        MIME_PPTX => Some(DocFormat::Pptx),
        MIME_XLSX => Some(DocFormat::Xlsx),
        "text/html" | "application/xhtml+xml" => Some(DocFormat::Html),
        "text/plain" | "text/csv" | "application/json" | "text/markdown" => Some(DocFormat::Text),
        "application/rtf" | "text/rtf" => Some(DocFormat::Rtf),
        _ => None,
    }
}

/// Run one decoder without normalization.
pub fn extract_as(bytes: &[u8], format: DocFormat) -> Result<String, ExtractError> {
    match format {
        DocFormat::Pdf => extract_pdf(bytes),
        DocFormat::Docx => extract_docx(bytes),
        DocFormat::Pptx => extract_pptx(bytes),
        DocFormat::Xlsx => extract_xlsx(bytes),
        DocFormat::Html => Ok(html_to_text(&decode_utf8(bytes))),
        DocFormat::Text => Ok(decode_utf8(bytes)),
        DocFormat::Rtf => extract_rtf(bytes),
    }
}

fn normalize(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn decode_utf8(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs.
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(result) => result.map_err(|e| ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("decoder panicked".to_string())),
    }
}

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

/// Entries named `<prefix>N.xml`, sorted by N.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .filter(|n| !n[prefix.len()..].contains('/'))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    collect_paragraph_runs(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let slides = numbered_entries(&archive, "ppt/slides/slide");
    let mut out = String::new();
    for name in slides {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = collect_paragraph_runs(&xml)?;
        if text.trim().is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(text.trim());
    }
    Ok(out)
}

/// Concatenate `<*:t>` text runs, breaking lines at `<*:p>` ends.
///
/// WordprocessingML (`w:`) and DrawingML (`a:`) share the local names.
fn collect_paragraph_runs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"br" | b"cr" => out.push('\n'),
                b"tab" => out.push('\t'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::CData(cd)) if in_text => {
                out.push_str(&String::from_utf8_lossy(&cd.into_inner()));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };
    let sheets = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut out = String::new();
    for name in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let rows = extract_sheet_rows(&xml, &shared_strings)?;
        if rows.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&rows.join("\n"));
    }
    Ok(out)
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
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    let text = te
                        .unescape()
                        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                    s.push_str(&text);
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

#[derive(Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Shared,
    Inline,
    Value,
}

fn extract_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<String>, ExtractError> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut kind = CellKind::Value;
    let mut in_value = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    kind = CellKind::Value;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Value,
                            };
                        }
                    }
                }
                b"v" => in_value = true,
                b"t" if kind == CellKind::Inline => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                let raw = raw.trim();
                let value = match kind {
                    CellKind::Shared => raw
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i))
                        .cloned()
                        .unwrap_or_default(),
                    CellKind::Inline | CellKind::Value => raw.to_string(),
                };
                if !value.trim().is_empty() {
                    row.push(value.trim().to_string());
                    cell_count += 1;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join(XLSX_CELL_SEPARATOR));
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
        rows.push(row.join(XLSX_CELL_SEPARATOR));
    }
    Ok(rows)
}

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
    "blockquote", "pre", "table", "ul", "ol",
];

/// Strip markup, dropping script/style content and collapsing whitespace.
/// Block elements start a new line.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        match node.value() {
            Node::Element(el) if BLOCK_ELEMENTS.contains(&el.name()) => out.push('\n'),
            Node::Text(text) => {
                let hidden = node
                    .parent()
                    .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
                    .map(|name| matches!(name.as_str(), "script" | "style" | "noscript" | "template"))
                    .unwrap_or(false);
                if !hidden {
                    out.push_str(text);
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
    collapse_whitespace(&out)
}

fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

static RTF_DESTINATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\\(?:\*|fonttbl|colortbl|stylesheet|info|pict|header|footer)[^{}]*(?:\{[^{}]*\}[^{}]*)*\}")
        .expect("valid regex")
});
static RTF_LINE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:par|line)\b ?").expect("valid regex"));
static RTF_TAB: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\tab\b ?").expect("valid regex"));
static RTF_HEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\'([0-9a-fA-F]{2})").expect("valid regex"));
static RTF_CONTROL_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\[a-zA-Z]+-?\d* ?").expect("valid regex"));
static RTF_CONTROL_SYMBOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\[^a-zA-Z\\{}]").expect("valid regex"));

fn extract_rtf(bytes: &[u8]) -> Result<String, ExtractError> {
    let source = decode_utf8(bytes);
    if !source.trim_start().starts_with("{\\rtf") {
        return Err(ExtractError::Rtf("missing {\\rtf header".to_string()));
    }
    let text = RTF_DESTINATION.replace_all(&source, "");
    let text = RTF_LINE_BREAK.replace_all(&text, "\n");
    let text = RTF_TAB.replace_all(&text, "\t");
    let text = RTF_HEX.replace_all(&text, |caps: &regex::Captures| {
        u8::from_str_radix(&caps[1], 16)
            .map(|b| char::from(b).to_string())
            .unwrap_or_default()
    });
    let text = RTF_CONTROL_WORD.replace_all(&text, "");
    let text = RTF_CONTROL_SYMBOL.replace_all(&text, "");
    let text = text
        .replace("\\\\", "\u{0}")
        .replace("\\{", "\u{1}")
        .replace("\\}", "\u{2}")
        .replace(['{', '}'], "")
        .replace('\u{0}', "\\")
        .replace('\u{1}', "{")
        .replace('\u{2}', "}");
    Ok(text
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn detects_by_extension_before_content_type() {
        assert_eq!(
            detect_format("notes.docx", "application/octet-stream"),
            Some(DocFormat::Docx)
        );
        assert_eq!(detect_format("Syllabus.PDF", "text/plain"), Some(DocFormat::Pdf));
        assert_eq!(detect_format("download", MIME_XLSX), Some(DocFormat::Xlsx));
        assert_eq!(
            detect_format("page", "text/html; charset=utf-8"),
            Some(DocFormat::Html)
        );
        assert_eq!(detect_format("photo.png", "image/png"), None);
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let docx = zip_with(&[(
            "word/document.xml",
            r#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Week 3 </w:t></w:r><w:r><w:t>reading list</w:t></w:r></w:p><w:p><w:r><w:t>Chapter &amp; verse</w:t></w:r></w:p></w:body></w:document>"#,
        )]);
        let text = extract(&docx, "reading.docx", MIME_DOCX).unwrap();
        assert_eq!(text, "Week 3 reading list\nChapter & verse");
    }

    #[test]
    fn pptx_slides_follow_numeric_order() {
        let slide = |t: &str| {
            format!(
                r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#,
                t
            )
        };
        let s10 = slide("tenth slide");
        let s2 = slide("second slide");
        let s1 = slide("first slide");
        let pptx = zip_with(&[
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide2.xml", &s2),
            ("ppt/slides/slide1.xml", &s1),
        ]);
        let text = extract(&pptx, "deck.pptx", MIME_PPTX).unwrap();
        let first = text.find("first slide").unwrap();
        let second = text.find("second slide").unwrap();
        let tenth = text.find("tenth slide").unwrap();
        assert!(first < second && second < tenth, "got: {}", text);
    }

    #[test]
    fn xlsx_rows_join_non_empty_cells() {
        let shared = r#"<sst xmlns="x"><si><t>Exam</t></si><si><t>Weight</t></si><si><r><t>Mid</t></r><r><t>term</t></r></si></sst>"#;
        let sheet = r#"<worksheet xmlns="x"><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
            <row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"/><c r="C2"><v>30</v></c></row>
            <row r="3"><c r="A3" t="inlineStr"><is><t>Final</t></is></c><c r="B3"><v>40</v></c></row>
        </sheetData></worksheet>"#;
        let xlsx = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let text = extract(&xlsx, "grades.xlsx", MIME_XLSX).unwrap();
        assert_eq!(text, "Exam | Weight\nMidterm | 30\nFinal | 40");
    }

    #[test]
    fn html_drops_scripts_and_keeps_blocks() {
        let html = "<html><head><style>p{color:red}</style><script>var x = 1;</script></head>\
                    <body><h1>Lab  Safety</h1><p>Wear <b>goggles</b> at all times.</p></body></html>";
        let text = extract(html.as_bytes(), "lab.html", "text/html").unwrap();
        assert!(text.contains("Lab Safety"));
        assert!(text.contains("Wear goggles at all times."));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color:red"));
    }

    #[test]
    fn plain_text_passes_through_trimmed() {
        let text = extract(b"\xEF\xBB\xBF  id,score\n1,95\n\n", "scores.csv", "text/csv").unwrap();
        assert_eq!(text, "id,score\n1,95");
    }

    #[test]
    fn decoder_errors_name_the_format() {
        let err = extract_as(b"plain words", DocFormat::Rtf).unwrap_err();
        assert!(matches!(err, ExtractError::Rtf(_)));
        assert_eq!(err.to_string(), "RTF extraction failed: missing {\\rtf header");

        let err = extract_as(b"not a zip", DocFormat::Docx).unwrap_err();
        assert!(err.to_string().starts_with("OOXML extraction failed: "));
    }

    #[test]
    fn rtf_control_words_are_stripped() {
        let rtf = br"{\rtf1\ansi{\fonttbl\f0\fswiss Helvetica;}\f0\pard This is {\b bold} text.\par Caf\'e9 hours.}";
        let text = extract(rtf, "memo.rtf", "application/rtf").unwrap();
        assert_eq!(text, "This is bold text.\nCaf\u{e9} hours.");
    }

    #[test]
    fn corrupt_inputs_yield_none() {
        assert_eq!(extract(b"not a pdf", "a.pdf", MIME_PDF), None);
        assert_eq!(extract(b"not a zip", "a.docx", MIME_DOCX), None);
        assert_eq!(extract(b"not a zip", "a.xlsx", MIME_XLSX), None);
        assert_eq!(extract(b"", "a.txt", "text/plain"), None);
        assert_eq!(extract(b"   \n ", "a.txt", "text/plain"), None);
        assert_eq!(extract(b"plain words", "a.rtf", "application/rtf"), None);
        assert_eq!(extract(b"\x89PNG", "a.png", "image/png"), None);
    }

    #[test]
    fn docx_without_document_part_is_none() {
        let docx = zip_with(&[("word/styles.xml", "<styles/>")]);
        assert_eq!(extract(&docx, "empty.docx", MIME_DOCX), None);
    }
}
