//! Content Extractor — plain text out of one uploaded file.
//!
//! `.txt` is decoded as UTF-8, `.pdf` goes through pdf-extract on a blocking
//! thread, `.docx` is read straight from `word/document.xml`. Anything else
//! yields a placeholder string so one odd file does not sink the batch.

use std::io::{Cursor, Read};

use bytes::Bytes;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use crate::ingest::ExtractError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Pdf,
    Docx,
    Unsupported(String),
}

/// Classifies by the text after the last `.`, case-insensitively.
pub fn file_kind(file_name: &str) -> FileKind {
    let extension = file_name.rsplit('.').next().unwrap_or_default().to_lowercase();
    match extension.as_str() {
        "txt" => FileKind::Text,
        "pdf" => FileKind::Pdf,
        "docx" => FileKind::Docx,
        _ => FileKind::Unsupported(extension),
    }
}

pub fn unsupported_placeholder(extension: &str) -> String {
    format!("지원하지 않는 파일 형식입니다: .{extension}")
}

pub async fn extract(file_name: &str, bytes: Bytes) -> Result<String, ExtractError> {
    let text = match file_kind(file_name) {
        FileKind::Text => String::from_utf8_lossy(&bytes).into_owned(),
        FileKind::Pdf => {
            let file = file_name.to_string();
            tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
                .await
                .map_err(|e| ExtractError::Pdf {
                    file: file.clone(),
                    reason: e.to_string(),
                })?
                .map_err(|e| ExtractError::Pdf {
                    file,
                    reason: e.to_string(),
                })?
        }
        FileKind::Docx => extract_docx(&bytes).map_err(|reason| ExtractError::Docx {
            file: file_name.to_string(),
            reason,
        })?,
        FileKind::Unsupported(extension) => unsupported_placeholder(&extension),
    };
    debug!("Extracted {} chars from {file_name}", text.chars().count());
    Ok(text)
}

/// Collects the visible text of a DOCX body: runs are concatenated, paragraphs
/// and explicit breaks become newlines, tabs stay tabs.
fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| e.to_string())?
        .read_to_string(&mut xml)
        .map_err(|e| e.to_string())?;
    document_xml_text(&xml)
}

fn document_xml_text(xml: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_text_run = true,
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text_run = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => text.push('\t'),
                b"w:br" | b"w:cr" => text.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text_run => {
                text.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(text.trim_end().to_string())
}
