//! Text extraction for uploaded documents (TXT, PDF, DOCX).
//!
//! Callers supply bytes plus a [`FileType`]; this module returns plain UTF-8
//! text with NUL bytes removed, or an [`ExtractionError`]. Nothing here
//! panics on malformed input.

use std::io::Read;
use std::path::Path;

use encoding_rs::{WINDOWS_1251, WINDOWS_1252};
use quick_xml::events::Event;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::models::{FileInfo, FileType};
use crate::text::{line_count, word_count};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Extracted text together with the file facts recorded for it.
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    pub text: String,
    pub info: FileInfo,
}

/// Extracts plain text from `bytes` of the given type.
pub fn extract(bytes: &[u8], file_type: FileType) -> Result<String, ExtractionError> {
    let text = match file_type {
        FileType::Txt => decode_text(bytes),
        FileType::Pdf => extract_pdf(bytes)?,
        FileType::Docx => extract_docx(bytes)?,
    };
    let text = text.replace('\0', "");
    if text.trim().is_empty() {
        return Err(ExtractionError::NoText(file_type));
    }
    debug!(file_type = %file_type, chars = text.chars().count(), "extracted text");
    Ok(text)
}

/// Size-checks, hashes, and extracts an in-memory upload.
pub fn extract_document(
    bytes: &[u8],
    file_type: FileType,
    filename: &str,
    max_size_bytes: u64,
) -> Result<ExtractedFile, ExtractionError> {
    let size_bytes = bytes.len() as u64;
    if size_bytes > max_size_bytes {
        return Err(ExtractionError::TooLarge {
            size_bytes,
            limit_bytes: max_size_bytes,
        });
    }

    let text = extract(bytes, file_type)?;
    let info = FileInfo {
        filename: filename.to_string(),
        size_bytes,
        sha256: format!("{:x}", Sha256::digest(bytes)),
        file_type,
        text_length: text.chars().count(),
        word_count: word_count(&text),
        line_count: line_count(&text),
    };
    Ok(ExtractedFile { text, info })
}

/// Reads a file from disk, inferring its type from the extension.
pub fn extract_file(path: &Path, max_size_bytes: u64) -> Result<ExtractedFile, ExtractionError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_type = FileType::from_extension(&filename)
        .ok_or_else(|| ExtractionError::UnsupportedType(filename.clone()))?;

    let io_err = |source| ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    };
    let size_bytes = std::fs::metadata(path).map_err(io_err)?.len();
    if size_bytes > max_size_bytes {
        return Err(ExtractionError::TooLarge {
            size_bytes,
            limit_bytes: max_size_bytes,
        });
    }
    let bytes = std::fs::read(path).map_err(io_err)?;
    extract_document(&bytes, file_type, &filename, max_size_bytes)
}

/// UTF-8 (BOM stripped), then windows-1251, then windows-1252 (the WHATWG
/// reading of ISO-8859-1); lossy UTF-8 if none decode cleanly.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    for encoding in [WINDOWS_1251, WINDOWS_1252] {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
            debug!(encoding = encoding.name(), "decoded text file");
            return text.into_owned();
        }
    }
    warn!("text file matched no known encoding; decoding lossily");
    String::from_utf8_lossy(bytes).into_owned()
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    // lopdf may transparently decrypt empty-password files and drop the
    // trailer entry, so look at the raw trailers as well.
    if declares_encryption(bytes) {
        return Err(ExtractionError::Encrypted);
    }
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| ExtractionError::corrupt(FileType::Pdf, e))?;
    if doc.is_encrypted() {
        return Err(ExtractionError::Encrypted);
    }

    let mut pages = Vec::new();
    for page_number in doc.get_pages().keys() {
        match doc.extract_text(&[*page_number]) {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    pages.push(text.to_string());
                }
            }
            Err(e) => warn!(page = page_number, error = %e, "skipping unreadable PDF page"),
        }
    }
    Ok(pages.join("\n\n"))
}

/// True when a trailer dictionary (classic `trailer << >>` or the dictionary
/// of a `/Type /XRef` stream) carries an `/Encrypt` key. Page content that
/// merely mentions `/Encrypt` does not count.
fn declares_encryption(bytes: &[u8]) -> bool {
    let classic = find_all(bytes, b"trailer").filter_map(|at| {
        let rest = &bytes[at + b"trailer".len()..];
        let start = rest.iter().position(|b| !b.is_ascii_whitespace())?;
        dictionary_at(&rest[start..])
    });
    let xref_streams = find_all(bytes, b"/XRef").filter_map(|at| {
        let obj = bytes[..at].windows(3).rposition(|w| w == b"obj")?;
        let rest = &bytes[obj + 3..at];
        let start = rest.iter().position(|&b| b == b'<')?;
        dictionary_at(&bytes[obj + 3 + start..])
    });
    classic
        .chain(xref_streams)
        .any(|dict| has_key(dict, b"/Encrypt"))
}

/// The balanced `<< ... >>` dictionary at the start of `bytes`, if any.
fn dictionary_at(bytes: &[u8]) -> Option<&[u8]> {
    if !bytes.starts_with(b"<<") {
        return None;
    }
    let mut depth = 0usize;
    let mut i = 0;
    while i + 1 < bytes.len() {
        match &bytes[i..i + 2] {
            b"<<" => {
                depth += 1;
                i += 2;
            }
            b">>" => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return Some(&bytes[..i]);
                }
            }
            _ => i += 1,
        }
    }
    None
}

/// `key` as a whole name, so `/Encrypt` does not match `/EncryptMetadata`.
fn has_key(dict: &[u8], key: &[u8]) -> bool {
    find_all(dict, key).any(|at| {
        dict.get(at + key.len())
            .map_or(true, |b| !b.is_ascii_alphanumeric())
    })
}

fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(move |(_, w)| *w == needle)
        .map(|(at, _)| at)
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractionError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractionError::corrupt(FileType::Docx, format!("{name}: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractionError::corrupt(FileType::Docx, e))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractionError::corrupt(
            FileType::Docx,
            format!("ZIP entry {name} exceeds size limit ({max_bytes} bytes)"),
        ));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractionError::corrupt(FileType::Docx, e))?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    docx_body_text(&doc_xml)
}

/// Walks `word/document.xml` in document order. Paragraphs become blocks;
/// each table row becomes one `cell | cell` block with empty cells skipped.
fn docx_body_text(xml: &[u8]) -> Result<String, ExtractionError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut blocks: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut row: Option<Vec<String>> = None;
    let mut cell: Option<String> = None;

    let mut buf = Vec::new();
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ExtractionError::corrupt(FileType::Docx, e))?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => paragraph.clear(),
                b"tr" => row = Some(Vec::new()),
                b"tc" => cell = Some(String::new()),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| ExtractionError::corrupt(FileType::Docx, e))?;
                paragraph.push_str(&text);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = paragraph.trim();
                    if !text.is_empty() {
                        match cell.as_mut() {
                            Some(cell) => {
                                if !cell.is_empty() {
                                    cell.push(' ');
                                }
                                cell.push_str(text);
                            }
                            None => blocks.push(text.to_string()),
                        }
                    }
                    paragraph.clear();
                }
                b"tc" => {
                    if let (Some(text), Some(row)) = (cell.take(), row.as_mut()) {
                        if !text.is_empty() {
                            row.push(text);
                        }
                    }
                }
                b"tr" => {
                    if let Some(cells) = row.take() {
                        if !cells.is_empty() {
                            blocks.push(cells.join(" | "));
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(blocks.join("\n\n"))
}
