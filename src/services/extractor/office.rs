//! PDF and Office Open XML (docx, pptx, xlsx) text extraction.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::Event;
use zip::ZipArchive;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Decompressed size cap for a single archive entry.
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const MAX_SHEETS: usize = 100;
const MAX_CELLS_PER_SHEET: usize = 100_000;

/// Binary document formats with a dedicated reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
}

impl DocumentFormat {
    /// Detect from the file extension, then from the declared content type.
    pub fn detect(extension: Option<&str>, content_type: Option<&str>) -> Option<Self> {
        let by_extension = extension.and_then(|ext| match ext {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "pptx" => Some(Self::Pptx),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        });
        by_extension.or_else(|| {
            let mime = content_type?.split(';').next()?.trim().to_ascii_lowercase();
            match mime.as_str() {
                MIME_PDF => Some(Self::Pdf),
                MIME_DOCX => Some(Self::Docx),
                MIME_PPTX => Some(Self::Pptx),
                MIME_XLSX => Some(Self::Xlsx),
                _ => None,
            }
        })
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pdf => "PDF",
            Self::Docx => "DOCX",
            Self::Pptx => "PPTX",
            Self::Xlsx => "XLSX",
        }
    }

    /// Blocking; run it off the async executor.
    pub fn extract(self, bytes: &[u8]) -> Result<String, String> {
        match self {
            Self::Pdf => pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string()),
            Self::Docx => extract_docx(bytes),
            Self::Pptx => extract_pptx(bytes),
            Self::Xlsx => extract_xlsx(bytes),
        }
    }
}

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, String> {
    ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| format!("{name}: {e}"))?;
    let mut out = Vec::new();
    entry
        .take(MAX_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| format!("{name}: {e}"))?;
    if out.len() as u64 >= MAX_ENTRY_BYTES {
        return Err(format!("{name} exceeds {MAX_ENTRY_BYTES} bytes"));
    }
    Ok(out)
}

/// Entry names matching `{prefix}{n}.xml`, ordered by `n`.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| {
        name[prefix.len()..]
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Text of every `<*:t>` element, one line per `<*:p>` paragraph.
fn paragraph_text(xml: &[u8]) -> Result<String, String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) if matches!(e.local_name().as_ref(), b"tab" | b"br") => {
                out.push(' ');
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    paragraph_text(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, String> {
    let mut archive = open_archive(bytes)?;
    let slides = numbered_entries(&archive, "ppt/slides/slide");
    if slides.is_empty() {
        return Err("no slides found".to_string());
    }

    let mut out = String::new();
    for name in slides {
        let xml = read_entry(&mut archive, &name)?;
        out.push_str(&paragraph_text(&xml)?);
        out.push('\n');
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, String> {
    let mut archive = open_archive(bytes)?;
    let has_shared = archive.file_names().any(|n| n == "xl/sharedStrings.xml");
    let shared = if has_shared {
        shared_strings(&read_entry(&mut archive, "xl/sharedStrings.xml")?)?
    } else {
        Vec::new()
    };
    let sheets = numbered_entries(&archive, "xl/worksheets/sheet");
    if sheets.is_empty() {
        return Err("no worksheets found".to_string());
    }

    let mut out = String::new();
    for name in sheets.into_iter().take(MAX_SHEETS) {
        let xml = read_entry(&mut archive, &name)?;
        out.push_str(&sheet_rows(&xml, &shared)?);
    }
    Ok(out)
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                current.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell values joined by spaces, one line per row.
fn sheet_rows(xml: &[u8], shared: &[String]) -> Result<String, String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut shared_cell = false;
    let mut in_value = false;
    let mut cells = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| {
                        a.key.local_name().as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_value => {
                let raw = t.unescape().map_err(|e| e.to_string())?;
                let value = raw.trim();
                if shared_cell {
                    if let Some(text) = value.parse::<usize>().ok().and_then(|i| shared.get(i)) {
                        row.push(text.clone());
                    }
                } else if !value.is_empty() {
                    row.push(value.to_string());
                }
                cells += 1;
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared_cell = false,
                b"row" if !row.is_empty() => {
                    out.push_str(&row.join(" "));
                    out.push('\n');
                    row.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        if cells >= MAX_CELLS_PER_SHEET {
            break;
        }
        buf.clear();
    }
    if !row.is_empty() {
        out.push_str(&row.join(" "));
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    /// Zip archive holding the given entries.
    pub fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    pub fn docx(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!(r#"<w:p><w:r><w:t xml:space="preserve">{p}</w:t></w:r></w:p>"#))
            .collect();
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
        );
        archive(&[("word/document.xml", &xml)])
    }
}
