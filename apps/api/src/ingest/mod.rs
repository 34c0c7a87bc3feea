// Upload ingestion: turns uploaded files and spreadsheets into batch items.
// Format parsing is kept behind `extract` and `spreadsheet`; nothing here
// calls the generative backend.

pub mod extract;
pub mod handlers;
pub mod spreadsheet;

use thiserror::Error;

pub use extract::extract;
pub use spreadsheet::MISSING_COLUMNS_MESSAGE;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("{file}: could not read PDF text ({reason})")]
    Pdf { file: String, reason: String },

    #[error("{file}: could not read DOCX document ({reason})")]
    Docx { file: String, reason: String },

    #[error("{}", MISSING_COLUMNS_MESSAGE)]
    MissingColumns,

    #[error("{file}: could not read spreadsheet ({reason})")]
    Spreadsheet { file: String, reason: String },

    #[error("could not build spreadsheet template: {0}")]
    Template(String),
}

/// Record identifier for an individually uploaded file: the file name up to
/// its first `.`, trimmed. `20501.홍길동.txt` → `20501`.
pub fn record_id_from_filename(file_name: &str) -> String {
    file_name
        .split('.')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}
