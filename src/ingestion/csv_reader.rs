//! Delimited text reader - CSV and TSV members as a single sheet

use crate::ingestion::cell::CellValue;
use csv::ReaderBuilder;
use std::ops::ControlFlow;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// One delimited-text member. Every non-empty cell is kept verbatim as text.
pub struct DelimitedSheet {
    name: String,
    bytes: Vec<u8>,
    delimiter: u8,
}

impl DelimitedSheet {
    pub fn new(name: &str, bytes: Vec<u8>, delimiter: u8) -> Self {
        Self {
            name: name.to_string(),
            bytes,
            delimiter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stream every record, header included, into `on_row`.
    pub fn read_rows<F>(&self, mut on_row: F) -> Result<(), csv::Error>
    where
        F: FnMut(Vec<CellValue>) -> ControlFlow<()>,
    {
        let data = self.bytes.strip_prefix(UTF8_BOM).unwrap_or(&self.bytes[..]);

        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(data);

        for result in rdr.byte_records() {
            let record = result?;
            let row = record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        CellValue::Empty
                    } else {
                        CellValue::Text(String::from_utf8_lossy(field).into_owned())
                    }
                })
                .collect();
            if on_row(row).is_break() {
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(sheet: &DelimitedSheet) -> Vec<Vec<String>> {
        let mut rows = Vec::new();
        sheet
            .read_rows(|row| {
                rows.push(row.iter().map(CellValue::to_text).collect());
                ControlFlow::Continue(())
            })
            .unwrap();
        rows
    }

    #[test]
    fn test_bom_and_ragged_rows() {
        let sheet = DelimitedSheet::new(
            "orders",
            b"\xEF\xBB\xBFName,Qty\nWidget,3\nGadget\n\"a, b\",7,extra\n".to_vec(),
            b',',
        );
        let rows = collect(&sheet);
        assert_eq!(rows[0], vec!["Name", "Qty"]);
        assert_eq!(rows[2], vec!["Gadget"]);
        assert_eq!(rows[3], vec!["a, b", "7", "extra"]);
    }

    #[test]
    fn test_values_are_verbatim_text() {
        let sheet = DelimitedSheet::new("t", b"a\tb\n 007 \t1.50\n".to_vec(), b'\t');
        let mut cells = Vec::new();
        sheet
            .read_rows(|row| {
                cells.push(row);
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(cells[1][0], CellValue::Text(" 007 ".to_string()));
        assert_eq!(cells[1][1], CellValue::Text("1.50".to_string()));
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let sheet = DelimitedSheet::new("t", b"name\ncaf\xE9\n".to_vec(), b',');
        let rows = collect(&sheet);
        assert_eq!(rows[1], vec!["caf\u{FFFD}"]);
    }

    #[test]
    fn test_break_stops_reading() {
        let sheet = DelimitedSheet::new("t", b"h\n1\n2\n3\n".to_vec(), b',');
        let mut seen = 0;
        sheet
            .read_rows(|_| {
                seen += 1;
                if seen == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(seen, 2);
    }
}
