use std::io::Cursor;

use anyhow::{Context, Result};
use calamine::{Data, Range};

/// One raw cell as handed to the normalizers. Everything downstream of the
/// row source operates on this closed union, never on parser-library values.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Number(_) => false,
            Cell::Text(t) => t.trim().is_empty(),
        }
    }

    /// Trimmed textual rendering, `None` when blank. Whole numbers render
    /// without a trailing `.0` so code-like values survive Excel's numeric
    /// cells as well as they can.
    pub fn text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Number(n) => Some(format_number(*n)),
            Cell::Text(t) => {
                let t = t.trim();
                if t.is_empty() {
                    None
                } else {
                    Some(t.to_string())
                }
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::DateTime(dt) => Cell::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
    }
}

/// Sequential row reader shared by the header detector and the transformers:
/// one forward pass over the file, one `Vec<Cell>` alive at a time.
pub enum RowSource {
    Sheet(SheetRows),
    Csv(CsvRows),
}

impl RowSource {
    pub fn from_range(range: Range<Data>) -> Self {
        RowSource::Sheet(SheetRows::new(range))
    }

    pub fn from_csv_bytes(bytes: Vec<u8>) -> Self {
        RowSource::Csv(CsvRows::new(bytes))
    }

    /// Yields `(row_index, cells)` with a zero-based monotone index, or
    /// `None` once the file is exhausted.
    pub fn next_row(&mut self) -> Result<Option<(usize, Vec<Cell>)>> {
        match self {
            RowSource::Sheet(s) => Ok(s.next_row()),
            RowSource::Csv(c) => c.next_row(),
        }
    }
}

/// Spreadsheet arm: the occupied range is computed once by calamine; each row
/// is then read cell-by-cell through positional addressing. No per-row object
/// for the whole sheet is ever built.
pub struct SheetRows {
    range: Range<Data>,
    next: usize,
}

impl SheetRows {
    pub fn new(range: Range<Data>) -> Self {
        SheetRows { range, next: 0 }
    }

    /// Restart iteration from an arbitrary row index; addressing is O(1).
    pub fn seek(&mut self, row: usize) {
        self.next = row;
    }

    fn next_row(&mut self) -> Option<(usize, Vec<Cell>)> {
        if self.next >= self.range.height() {
            return None;
        }
        let row = self.next;
        self.next += 1;
        let width = self.range.width();
        let mut cells = Vec::with_capacity(width);
        for col in 0..width {
            let cell = self
                .range
                .get((row, col))
                .map(cell_from_data)
                .unwrap_or(Cell::Empty);
            cells.push(cell);
        }
        Some((row, cells))
    }
}

/// Count of rows with at least one non-blank cell; used when picking the
/// best sheet of a multi-sheet workbook.
pub fn populated_rows(range: &Range<Data>) -> usize {
    let mut count = 0;
    for row in 0..range.height() {
        let occupied = (0..range.width()).any(|col| {
            range
                .get((row, col))
                .map(|d| !matches!(d, Data::Empty))
                .unwrap_or(false)
        });
        if occupied {
            count += 1;
        }
    }
    count
}

/// CSV arm: the csv crate's streaming tokenizer (quoted fields, embedded
/// commas, escaped quotes, LF/CRLF) decodes one logical record at a time into
/// a reused buffer.
pub struct CsvRows {
    reader: csv::Reader<Cursor<Vec<u8>>>,
    record: csv::StringRecord,
    next: usize,
}

impl CsvRows {
    pub fn new(bytes: Vec<u8>) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(Cursor::new(bytes));
        CsvRows {
            reader,
            record: csv::StringRecord::new(),
            next: 0,
        }
    }

    fn next_row(&mut self) -> Result<Option<(usize, Vec<Cell>)>> {
        let more = self
            .reader
            .read_record(&mut self.record)
            .with_context(|| format!("read csv record {}", self.next))?;
        if !more {
            return Ok(None);
        }
        let row = self.next;
        self.next += 1;
        let cells = self
            .record
            .iter()
            .map(|field| {
                if field.trim().is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(field.to_string())
                }
            })
            .collect();
        Ok(Some((row, cells)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_rows(data: &str) -> Vec<Vec<Cell>> {
        let mut src = RowSource::from_csv_bytes(data.as_bytes().to_vec());
        let mut out = Vec::new();
        while let Some((_, cells)) = src.next_row().unwrap() {
            out.push(cells);
        }
        out
    }

    #[test]
    fn csv_handles_quotes_and_crlf() {
        let rows = csv_rows("HCPCS,Description\r\n99284,\"ER visit, level 4\"\r\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], Cell::Text("99284".to_string()));
        assert_eq!(rows[1][1], Cell::Text("ER visit, level 4".to_string()));
    }

    #[test]
    fn csv_escaped_quotes_and_blank_fields() {
        let rows = csv_rows("a,\"say \"\"hi\"\"\",\nx,,z\n");
        assert_eq!(rows[0][1], Cell::Text("say \"hi\"".to_string()));
        assert_eq!(rows[0][2], Cell::Empty);
        assert_eq!(rows[1][1], Cell::Empty);
    }

    #[test]
    fn csv_row_indices_are_monotone() {
        let mut src = RowSource::from_csv_bytes(b"a\nb\nc\n".to_vec());
        let mut idx = Vec::new();
        while let Some((i, _)) = src.next_row().unwrap() {
            idx.push(i);
        }
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn sheet_rows_read_by_address() {
        let mut range = Range::new((0, 0), (2, 1));
        range.set_value((0, 0), Data::String("HCPCS".to_string()));
        range.set_value((0, 1), Data::String("Rate".to_string()));
        range.set_value((1, 0), Data::String("E0114".to_string()));
        range.set_value((1, 1), Data::Float(125.5));
        range.set_value((2, 0), Data::Int(99284));

        let mut src = RowSource::from_range(range);
        let (_, header) = src.next_row().unwrap().unwrap();
        assert_eq!(header[0], Cell::Text("HCPCS".to_string()));
        let (_, row1) = src.next_row().unwrap().unwrap();
        assert_eq!(row1[1], Cell::Number(125.5));
        let (_, row2) = src.next_row().unwrap().unwrap();
        assert_eq!(row2[0].text().as_deref(), Some("99284"));
        assert_eq!(row2[1], Cell::Empty);
        assert!(src.next_row().unwrap().is_none());
    }

    #[test]
    fn sheet_seek_restarts_iteration() {
        let mut range = Range::new((0, 0), (2, 0));
        for r in 0..3u32 {
            range.set_value((r, 0), Data::Int(i64::from(r)));
        }
        let mut rows = SheetRows::new(range);
        rows.next_row();
        rows.next_row();
        rows.seek(1);
        let (idx, cells) = rows.next_row().unwrap();
        assert_eq!(idx, 1);
        assert_eq!(cells[0], Cell::Number(1.0));
    }

    #[test]
    fn whole_numbers_render_without_decimal_point() {
        assert_eq!(Cell::Number(99213.0).text().as_deref(), Some("99213"));
        assert_eq!(Cell::Number(1.25).text().as_deref(), Some("1.25"));
    }
}
