//! Plain-text status table.

use std::io::Write;

use bytesize::ByteSize;

use super::json::{OutputError, StatusReport};

const NEVER: &str = "-";

/// Renders a [`StatusReport`] as aligned columns.
#[derive(Debug)]
pub struct TableOutput<'a> {
    report: &'a StatusReport,
}

impl<'a> TableOutput<'a> {
    /// Wrap a report.
    #[must_use]
    pub fn new(report: &'a StatusReport) -> Self {
        Self { report }
    }

    /// Write the table followed by a totals line.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), OutputError> {
        let rows: Vec<[String; 5]> = self
            .report
            .records
            .iter()
            .map(|r| {
                [
                    r.path.clone(),
                    ByteSize::b(r.size).to_string(),
                    r.last_triggered_at
                        .map_or_else(|| NEVER.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
                    r.attempt_count.to_string(),
                    if r.pending { "yes" } else { "no" }.to_string(),
                ]
            })
            .collect();

        let header = ["PATH", "SIZE", "LAST TRIGGER", "FAILED", "PENDING"];
        let mut widths = header.map(str::len);
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        if !rows.is_empty() {
            write_row(writer, &header.map(String::from), &widths)?;
            for row in &rows {
                write_row(writer, row, &widths)?;
            }
            writeln!(writer)?;
        }

        let summary = &self.report.summary;
        writeln!(
            writer,
            "{} files tracked ({}), {} pending, {} with failed attempts",
            summary.tracked_files,
            ByteSize::b(summary.total_size),
            summary.pending,
            summary.failing
        )?;
        match summary.last_trigger {
            Some(at) => writeln!(writer, "Last trigger: {}", at.to_rfc3339())?,
            None => writeln!(writer, "Last trigger: never")?,
        }
        writeln!(writer, "Database: {}", self.report.db_path)?;
        Ok(())
    }
}

fn write_row<W: Write>(writer: &mut W, row: &[String; 5], widths: &[usize; 5]) -> std::io::Result<()> {
    let line = row
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    writeln!(writer, "{}", line.trim_end())
}
