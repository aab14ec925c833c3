use rust_xlsxwriter::{Format, Workbook};

use crate::error::Result;
use crate::export::columns::{Cell, Column};
use crate::models::Issue;

pub const SHEET_NAME: &str = "Issues";

/// Longest string a single worksheet cell accepts.
const MAX_CELL_CHARS: usize = 32_767;

pub fn render_excel(issues: &[Issue], columns: &[Column]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();

    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (col, column) in columns.iter().enumerate() {
        let col = col as u16;
        worksheet.write_string_with_format(0, col, column.header(), &header_format)?;
        worksheet.set_column_width(col, column_width(column))?;
    }

    for (row, issue) in issues.iter().enumerate() {
        let row = row as u32 + 1;
        for (col, column) in columns.iter().enumerate() {
            let col = col as u16;
            match column.cell(issue) {
                Cell::Number(n) => {
                    worksheet.write_number(row, col, n as f64)?;
                }
                Cell::Text(text) if text.is_empty() => {}
                Cell::Text(text) => {
                    worksheet.write_string(row, col, truncate_cell(text))?;
                }
            }
        }
    }

    worksheet.set_freeze_panes(1, 0)?;
    if !issues.is_empty() && !columns.is_empty() {
        worksheet.autofilter(0, 0, issues.len() as u32, columns.len() as u16 - 1)?;
    }

    Ok(workbook.save_to_buffer()?)
}

fn column_width(column: &Column) -> f64 {
    match column {
        Column::Number | Column::State | Column::CommentCount => 10.0,
        Column::Title | Column::Url => 50.0,
        Column::Comments | Column::Body => 80.0,
        _ => 20.0,
    }
}

fn truncate_cell(text: String) -> String {
    if text.chars().count() <= MAX_CELL_CHARS {
        text
    } else {
        text.chars().take(MAX_CELL_CHARS).collect()
    }
}
