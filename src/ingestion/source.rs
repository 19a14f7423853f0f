//! Sheet Source Trait - common interface over the workbook readers

use crate::ingestion::archive::MemberFormat;
use crate::ingestion::cell::CellValue;
use crate::ingestion::csv_reader::DelimitedSheet;
use crate::ingestion::xlsx_reader::{WorkbookError, XlsxWorkbook};
use std::ops::ControlFlow;
use thiserror::Error;

/// Receives rows in source order; `Break` stops the reader early.
pub type RowSink<'a> = dyn FnMut(Vec<CellValue>) -> ControlFlow<()> + 'a;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Workbook(#[from] WorkbookError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// A readable member: one or more named sheets of raw cells.
///
/// Implementations:
/// - XlsxWorkbook: OOXML workbooks, one sheet per worksheet part
/// - DelimitedSheet: CSV/TSV text, a single sheet
pub trait SheetSource: Send {
    /// Sheet names in workbook order.
    fn sheet_names(&self) -> Vec<String>;

    /// Stream the rows of sheet `index` into `sink`.
    fn stream_sheet(&mut self, index: usize, sink: &mut RowSink<'_>) -> Result<(), ReadError>;
}

impl SheetSource for XlsxWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        XlsxWorkbook::sheet_names(self)
    }

    fn stream_sheet(&mut self, index: usize, sink: &mut RowSink<'_>) -> Result<(), ReadError> {
        self.read_sheet(index, |row| sink(row))?;
        Ok(())
    }
}

impl SheetSource for DelimitedSheet {
    fn sheet_names(&self) -> Vec<String> {
        vec![self.name().to_string()]
    }

    fn stream_sheet(&mut self, _index: usize, sink: &mut RowSink<'_>) -> Result<(), ReadError> {
        self.read_rows(|row| sink(row))?;
        Ok(())
    }
}

/// Open a member's bytes with the reader for its format.
pub fn open_source(
    format: MemberFormat,
    name: &str,
    bytes: Vec<u8>,
    max_part_bytes: u64,
) -> Result<Box<dyn SheetSource>, ReadError> {
    match format {
        MemberFormat::Workbook => Ok(Box::new(XlsxWorkbook::open(bytes, max_part_bytes)?)),
        MemberFormat::Csv => Ok(Box::new(DelimitedSheet::new(name, bytes, b','))),
        MemberFormat::Tsv => Ok(Box::new(DelimitedSheet::new(name, bytes, b'\t'))),
    }
}
