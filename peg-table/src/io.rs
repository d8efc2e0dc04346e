use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::TableIoError;
use crate::row::{AuthoredRow, Field};

/// Column sets the table file has had over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    /// Nine columns, before per-block repeat counts existed.
    V1,
    /// Ten columns with `Block Repeats` in second position.
    V2,
}

impl FormatVersion {
    pub const CURRENT: FormatVersion = FormatVersion::V2;

    pub fn columns(&self) -> Vec<Field> {
        match self {
            Self::V1 => Field::COLUMNS
                .into_iter()
                .filter(|f| *f != Field::BlockRepeats)
                .collect(),
            Self::V2 => Field::COLUMNS.to_vec(),
        }
    }

    /// Header names are compared case-insensitively and ignoring surrounding whitespace.
    fn detect(header: &[String]) -> Option<Self> {
        [Self::V2, Self::V1].into_iter().find(|version| {
            let columns = version.columns();
            columns.len() == header.len()
                && columns
                    .iter()
                    .zip(header)
                    .all(|(c, h)| c.header().eq_ignore_ascii_case(h.trim()))
        })
    }

    /// Maps a record of this version onto V2 cells.
    fn upgrade(&self, mut cells: Vec<String>) -> Vec<String> {
        let width = self.columns().len();
        cells.resize(width, String::new());
        if *self == Self::V1 {
            cells.insert(1, String::new());
        }
        cells
    }
}

/// Rows read from a table file together with the version they were stored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTable {
    pub version: FormatVersion,
    pub rows: Vec<AuthoredRow>,
}

pub fn read_table<R: Read>(reader: R) -> Result<LoadedTable, TableIoError> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut records = csv.records();

    let header: Vec<String> = match records.next() {
        Some(record) => record?.iter().map(str::to_string).collect(),
        None => return Err(TableIoError::MissingHeader),
    };
    let version =
        FormatVersion::detect(&header).ok_or(TableIoError::HeaderMismatch { found: header })?;
    debug!(?version, "detected table format");

    let width = version.columns().len();
    let mut rows = Vec::new();
    for (index, record) in records.enumerate() {
        let record = record?;
        if record.len() > width {
            warn!(
                line = index + 2,
                extra = record.len() - width,
                "ignoring cells beyond the last column"
            );
        }
        let cells = version.upgrade(record.iter().take(width).map(str::to_string).collect());
        let row = AuthoredRow::from_cells(cells);
        if !row.is_blank() {
            rows.push(row);
        }
    }

    Ok(LoadedTable { version, rows })
}

pub fn load_table(path: impl AsRef<Path>) -> Result<LoadedTable, TableIoError> {
    read_table(File::open(path)?)
}

/// Writes rows in the current format. Blank rows are skipped.
pub fn write_table<W: Write>(writer: W, rows: &[AuthoredRow]) -> Result<(), TableIoError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(FormatVersion::CURRENT.columns().iter().map(Field::header))?;
    for row in rows.iter().filter(|r| !r.is_blank()) {
        csv.write_record(row.cells())?;
    }
    csv.flush()?;
    Ok(())
}

pub fn save_table(path: impl AsRef<Path>, rows: &[AuthoredRow]) -> Result<(), TableIoError> {
    write_table(File::create(path)?, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_header_gets_empty_block_repeats() {
        let file = "block,stimulus,response,latency,correct response,feedback text,feedback duration,stimulus color,background color\n\
                    1,Hello,a,NA,a,,,,\n";
        let loaded = read_table(file.as_bytes()).unwrap();
        assert_eq!(loaded.version, FormatVersion::V1);
        assert_eq!(loaded.rows.len(), 1);
        let row = &loaded.rows[0];
        assert_eq!(row.block, "1");
        assert_eq!(row.block_repeats, "");
        assert_eq!(row.stimulus, "Hello");
        assert_eq!(row.correct_response, "a");
    }

    #[test]
    fn unknown_header_is_rejected() {
        let err = read_table("Block,Label,Stimulus\n1,x,y\n".as_bytes()).unwrap_err();
        assert!(matches!(err, TableIoError::HeaderMismatch { .. }));
        assert!(matches!(
            read_table("".as_bytes()).unwrap_err(),
            TableIoError::MissingHeader
        ));
    }

    #[test]
    fn short_rows_are_padded_and_blank_rows_dropped() {
        let mut file = String::from(
            "Block,Block Repeats,Stimulus,Response,Latency,Correct Response,Feedback Text,Feedback Duration,Stimulus Color,Background Color\n",
        );
        file.push_str("2,,Fix,NA,500\n");
        file.push_str(",,,,,,,,,\n");
        let loaded = read_table(file.as_bytes()).unwrap();
        assert_eq!(loaded.version, FormatVersion::V2);
        assert_eq!(loaded.rows.len(), 1);
        assert_eq!(loaded.rows[0].latency, "500");
        assert_eq!(loaded.rows[0].background_color, "");
    }

    #[test]
    fn commas_inside_cells_survive_writing() {
        let row = AuthoredRow::from_cells(["101", "2", "Is it <b>red</b>?", "f,j", "NA", "f", "[correct] Yes, right", "", "", ""]);
        let mut buf = Vec::new();
        write_table(&mut buf, &[row.clone(), AuthoredRow::default()]).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.contains("\"f,j\""));
        assert_eq!(text.lines().count(), 2);

        let loaded = read_table(buf.as_slice()).unwrap();
        assert_eq!(loaded.rows, vec![row]);
    }
}
