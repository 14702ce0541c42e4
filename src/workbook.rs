//! XLSX workbook builder

use crate::error::{ExportError, Result, ValidationError};
use crate::models::{CellValue, ColumnSpec, Row, SheetSpec, WorkbookSpec};
use rust_xlsxwriter::{Color, Format, Workbook, Worksheet, XlsxError};
use std::collections::HashSet;

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const MAX_SHEET_NAME: usize = 31;
const INVALID_SHEET_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

const MIN_COLUMN_WIDTH: f64 = 10.0;
const MAX_COLUMN_WIDTH: f64 = 50.0;
const HEADER_FILL: u32 = 0xE0E0E0;

#[derive(Debug, Clone, Copy, Default)]
pub struct TabularWorkbookBuilder;

impl TabularWorkbookBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Serialize `spec` to XLSX bytes. Nothing touches the filesystem.
    pub fn build(&self, spec: &WorkbookSpec) -> Result<Vec<u8>> {
        if spec.sheets.is_empty() {
            return Err(ValidationError::EmptyWorkbook.into());
        }

        let header_format = Format::new()
            .set_bold()
            .set_background_color(Color::RGB(HEADER_FILL));

        let mut workbook = Workbook::new();
        let mut used_names = HashSet::new();
        for (index, sheet) in spec.sheets.iter().enumerate() {
            let name = sanitize_sheet_name(&sheet.name, index + 1, &mut used_names);
            let worksheet = build_sheet(sheet, &name, &header_format).map_err(xlsx_error)?;
            workbook.push_worksheet(worksheet);
        }

        workbook.save_to_buffer().map_err(xlsx_error)
    }
}

fn xlsx_error(e: XlsxError) -> ExportError {
    ExportError::serialization("xlsx", e)
}

fn build_sheet(sheet: &SheetSpec, name: &str, header_format: &Format) -> std::result::Result<Worksheet, XlsxError> {
    let mut worksheet = Worksheet::new();
    worksheet.set_name(name)?;

    for (col, column) in sheet.columns.iter().enumerate() {
        let col = col as u16;
        worksheet.write_string_with_format(0, col, &column.header, header_format)?;
        worksheet.set_column_width(col, column_width(column, &sheet.rows))?;
    }

    for (r, row) in sheet.rows.iter().enumerate() {
        let row_num = (r + 1) as u32;
        for (col, column) in sheet.columns.iter().enumerate() {
            match SheetSpec::cell(row, &column.key) {
                CellValue::Number(n) => {
                    worksheet.write_number(row_num, col as u16, *n)?;
                }
                CellValue::Text(t) => {
                    worksheet.write_string(row_num, col as u16, t)?;
                }
                CellValue::Empty => {}
            }
        }
    }

    Ok(worksheet)
}

/// Explicit width, or the longest header/cell text plus 2, kept within 10..=50
pub fn column_width(column: &ColumnSpec, rows: &[Row]) -> f64 {
    if let Some(width) = column.width {
        return width;
    }
    let longest = rows
        .iter()
        .map(|row| SheetSpec::cell(row, &column.key))
        .filter(|cell| !cell.is_empty())
        .map(|cell| cell.display_text().chars().count())
        .chain(std::iter::once(column.header.chars().count()))
        .max()
        .unwrap_or(0);
    (longest as f64 + 2.0).clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH)
}

/// Excel sheet name rules: at most 31 chars, none of `[]:*?/\`, no leading
/// or trailing apostrophe, unique within the workbook (case-insensitive).
pub fn sanitize_sheet_name(raw: &str, position: usize, used: &mut HashSet<String>) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !INVALID_SHEET_CHARS.contains(c) && !c.is_control())
        .collect();
    let truncated: String = cleaned.chars().take(MAX_SHEET_NAME).collect();
    let trimmed = truncated.trim().trim_matches('\'').trim();
    let base = if trimmed.is_empty() {
        format!("Sheet{}", position)
    } else {
        trimmed.to_string()
    };

    let mut candidate = base.clone();
    let mut n = 2;
    while used.contains(&candidate.to_lowercase()) {
        let suffix = format!(" ({})", n);
        let keep = MAX_SHEET_NAME - suffix.chars().count();
        candidate = format!("{}{}", base.chars().take(keep).collect::<String>(), suffix);
        n += 1;
    }
    used.insert(candidate.to_lowercase());
    candidate
}
