use crate::domain::model::LocationRow;
use crate::utils::error::{FinderError, Result};
use csv::{Terminator, WriterBuilder};

/// Serializes rows as headerless geofeed CSV, one `\n`-terminated line each.
pub fn render_rows(rows: &[LocationRow]) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    for row in rows {
        writer.write_record(row.fields())?;
    }

    writer
        .into_inner()
        .map_err(|e| FinderError::ProcessingError {
            message: format!("Cannot finish CSV output: {}", e),
        })
}
