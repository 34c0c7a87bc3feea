//! Spreadsheet import and the downloadable input template.
//!
//! The first row is the header row. `학번` and `활동내용` are required, `이름`
//! is informational only. CSV goes through the csv crate, every workbook
//! format calamine understands goes through calamine (first sheet only).

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use rust_xlsxwriter::Workbook;
use tracing::debug;

use crate::ingest::ExtractError;
use crate::records::orchestrator::BatchItem;

pub const MISSING_COLUMNS_MESSAGE: &str =
    "엑셀 파일의 헤더(첫 번째 행)에 \"학번\"과 \"활동내용\"이 포함되어 있는지 확인해주세요.";

pub const ID_HEADER: &str = "학번";
pub const NAME_HEADER: &str = "이름";
pub const CONTENT_HEADER: &str = "활동내용";

pub const TEMPLATE_SHEET_NAME: &str = "활동 기록";
pub const TEMPLATE_FILE_STEM: &str = "특기사항_입력_양식";

const TEMPLATE_ROWS: [[&str; 3]; 2] = [
    ["20501", "김민준", "여기에 학생의 활동 내용을 상세히 입력하세요."],
    ["20502", "이서아", "보고서, 탐구활동, 발표 등 구체적인 내용을 작성합니다."],
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Parses an uploaded spreadsheet into batch items, in row order.
///
/// Cells are trimmed and rows without a `학번` are skipped. A header row
/// missing either required column, or a sheet with no usable rows, is
/// rejected with [`ExtractError::MissingColumns`].
pub fn parse_rows(file_name: &str, bytes: &[u8]) -> Result<Vec<BatchItem>, ExtractError> {
    let rows = if file_name.to_lowercase().ends_with(".csv") {
        csv_rows(file_name, bytes)?
    } else {
        workbook_rows(file_name, bytes)?
    };

    let mut rows = rows.into_iter();
    let header = rows.next().ok_or(ExtractError::MissingColumns)?;
    let column = |name: &str| header.iter().position(|h| h.trim() == name);
    let (id_col, content_col) = match (column(ID_HEADER), column(CONTENT_HEADER)) {
        (Some(id), Some(content)) => (id, content),
        _ => return Err(ExtractError::MissingColumns),
    };

    let items: Vec<BatchItem> = rows
        .filter_map(|row| {
            let id = row.get(id_col).map(|s| s.trim()).unwrap_or_default();
            if id.is_empty() {
                return None;
            }
            let content = row.get(content_col).map(|s| s.trim()).unwrap_or_default();
            Some(BatchItem {
                id: id.to_string(),
                content: content.to_string(),
            })
        })
        .collect();

    if items.is_empty() {
        return Err(ExtractError::MissingColumns);
    }
    debug!("Parsed {} rows from {file_name}", items.len());
    Ok(items)
}

fn csv_rows(file_name: &str, bytes: &[u8]) -> Result<Vec<Vec<String>>, ExtractError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(str::to_string).collect())
                .map_err(|e| ExtractError::Spreadsheet {
                    file: file_name.to_string(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

fn workbook_rows(file_name: &str, bytes: &[u8]) -> Result<Vec<Vec<String>>, ExtractError> {
    let spreadsheet_error = |reason: String| ExtractError::Spreadsheet {
        file: file_name.to_string(),
        reason,
    };

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| spreadsheet_error(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| spreadsheet_error("workbook has no sheets".to_string()))?
        .map_err(|e| spreadsheet_error(e.to_string()))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

/// The input template as an `.xlsx` workbook.
pub fn template_xlsx() -> Result<Vec<u8>, ExtractError> {
    let template_error = |e: rust_xlsxwriter::XlsxError| ExtractError::Template(e.to_string());

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(TEMPLATE_SHEET_NAME).map_err(template_error)?;

    for (col, header) in [ID_HEADER, NAME_HEADER, CONTENT_HEADER].iter().enumerate() {
        worksheet
            .write_string(0, col as u16, *header)
            .map_err(template_error)?;
    }
    for (row, values) in TEMPLATE_ROWS.iter().enumerate() {
        for (col, value) in values.iter().enumerate() {
            worksheet
                .write_string(row as u32 + 1, col as u16, *value)
                .map_err(template_error)?;
        }
    }
    worksheet.set_column_width(2, 60).map_err(template_error)?;

    workbook.save_to_buffer().map_err(template_error)
}

/// The input template as UTF-8 CSV with a BOM, so spreadsheet apps pick the
/// right encoding.
pub fn template_csv() -> Result<Vec<u8>, ExtractError> {
    let mut writer = csv::Writer::from_writer(UTF8_BOM.to_vec());
    let template_error = |e: csv::Error| ExtractError::Template(e.to_string());

    writer
        .write_record([ID_HEADER, NAME_HEADER, CONTENT_HEADER])
        .map_err(template_error)?;
    for values in TEMPLATE_ROWS {
        writer.write_record(values).map_err(template_error)?;
    }
    writer
        .into_inner()
        .map_err(|e| ExtractError::Template(e.to_string()))
}
