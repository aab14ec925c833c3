use csv::{QuoteStyle, WriterBuilder};

use crate::error::{Error, Result};
use crate::export::columns::Column;
use crate::models::Issue;

/// Renders issues as CSV with every field quoted.
pub fn render_csv(issues: &[Issue], columns: &[Column]) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(Vec::new());

    writer.write_record(columns.iter().map(Column::header))?;
    for issue in issues {
        writer.write_record(columns.iter().map(|column| column.cell(issue).to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))
}
