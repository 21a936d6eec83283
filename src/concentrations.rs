//! Per-region concentration files: a CSV with a `dh` datetime column and one
//! column per measurement.

use crate::domain::Region;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

pub const INDEX_COLUMN: &str = "dh";

#[derive(Debug, thiserror::Error)]
pub enum ConcentrationError {
    #[error("no concentration data for region '{0}'")]
    NotFound(Region),
    #[error("cannot find '{0}' measure !")]
    MissingColumn(String),
    #[error("malformed concentration file: {0}")]
    Malformed(String),
    #[error("concentration data is not utf-8")]
    NotUtf8,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<csv::Error> for ConcentrationError {
    fn from(error: csv::Error) -> Self {
        ConcentrationError::Malformed(error.to_string())
    }
}

pub fn file_path(data_dir: &Path, region: &Region) -> PathBuf {
    data_dir.join(format!("{}_conc.dat", region))
}

/// Writes decrypted upload contents verbatim.
pub async fn write(data_dir: &Path, region: &Region, contents: Vec<u8>) -> Result<(), ConcentrationError> {
    let contents = String::from_utf8(contents).map_err(|_| ConcentrationError::NotUtf8)?;
    tokio::fs::create_dir_all(data_dir).await?;
    tokio::fs::write(file_path(data_dir, region), contents).await?;

    Ok(())
}

/// Selected columns of a concentration file.
#[derive(Debug, PartialEq, Serialize)]
pub struct Extract {
    pub index: Vec<String>,
    pub data: BTreeMap<String, Vec<Option<f64>>>,
}

fn parse_cell(cell: &str, column: &str, line: usize) -> Result<Option<f64>, ConcentrationError> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }

    cell.parse::<f64>().map(Some).map_err(|_| {
        ConcentrationError::Malformed(format!("line {}: '{}' is not a number in column '{}'", line, cell, column))
    })
}

/// Extracts `measures` plus the datetime index from CSV text. Fails on the
/// first requested measure that is not a column. Repeated measures are
/// extracted once.
pub fn extract(contents: &str, measures: &[String]) -> Result<Extract, ConcentrationError> {
    let mut reader = csv::Reader::from_reader(contents.as_bytes());
    let headers = reader.headers()?.clone();
    let position = |name: &str| headers.iter().position(|h| h.trim() == name);

    let index_at = position(INDEX_COLUMN)
        .ok_or_else(|| ConcentrationError::Malformed(format!("no '{}' column", INDEX_COLUMN)))?;
    let mut columns: Vec<(String, usize)> = Vec::with_capacity(measures.len());
    for measure in measures {
        if columns.iter().any(|(m, _)| m == measure) {
            continue;
        }
        let at = position(measure).ok_or_else(|| ConcentrationError::MissingColumn(measure.clone()))?;
        columns.push((measure.clone(), at));
    }

    let mut extract = Extract {
        index: Vec::new(),
        data: columns.iter().map(|(m, _)| (m.clone(), Vec::new())).collect(),
    };

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let line = row + 2;
        extract.index.push(record.get(index_at).unwrap_or_default().to_string());
        for (measure, at) in &columns {
            let value = parse_cell(record.get(*at).unwrap_or_default(), measure, line)?;
            if let Some(values) = extract.data.get_mut(measure) {
                values.push(value);
            }
        }
    }

    Ok(extract)
}

pub async fn read(data_dir: &Path, region: &Region, measures: &[String]) -> Result<Extract, ConcentrationError> {
    let contents = match tokio::fs::read_to_string(file_path(data_dir, region)).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConcentrationError::NotFound(region.clone()))
        }
        Err(e) => return Err(e.into()),
    };

    extract(&contents, measures)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "dh,NO2_A,PM10_B,O3_C
2016-01-01 00:00:00,12.0,,80
2016-01-01 01:00:00,14.5,20.0,nan
";

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extracts_requested_columns() {
        let extract = extract(SAMPLE, &names(&["PM10_B", "NO2_A"])).unwrap();

        assert_eq!(extract.index, names(&["2016-01-01 00:00:00", "2016-01-01 01:00:00"]));
        assert_eq!(extract.data.len(), 2);
        assert_eq!(extract.data["NO2_A"], vec![Some(12.0), Some(14.5)]);
        assert_eq!(extract.data["PM10_B"], vec![None, Some(20.0)]);
    }

    #[test]
    fn nan_cells_are_missing_values() {
        let extract = extract(SAMPLE, &names(&["O3_C"])).unwrap();
        assert_eq!(extract.data["O3_C"], vec![Some(80.0), None]);
    }

    #[test]
    fn unknown_column_is_reported_by_name() {
        match extract(SAMPLE, &names(&["NO2_A", "SO2_Z"])) {
            Err(ConcentrationError::MissingColumn(name)) => assert_eq!(name, "SO2_Z"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn repeated_measures_are_extracted_once() {
        let extract = extract(SAMPLE, &names(&["NO2_A", "PM10_B", "NO2_A"])).unwrap();

        assert_eq!(extract.data.len(), 2);
        assert_eq!(extract.data["NO2_A"], vec![Some(12.0), Some(14.5)]);
        assert_eq!(extract.data["PM10_B"].len(), extract.index.len());
    }

    #[test]
    fn requires_the_index_column() {
        assert!(matches!(
            extract("date,NO2\n1,2\n", &[]),
            Err(ConcentrationError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_non_numeric_cells() {
        assert!(matches!(
            extract("dh,NO2\n2016,abc\n", &names(&["NO2"])),
            Err(ConcentrationError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn writes_then_reads_region_file() {
        let dir = tempfile::tempdir().unwrap();
        let region: Region = "paca".parse().unwrap();

        assert!(matches!(
            read(dir.path(), &region, &[]).await,
            Err(ConcentrationError::NotFound(_))
        ));

        write(dir.path(), &region, SAMPLE.as_bytes().to_vec()).await.unwrap();
        assert!(dir.path().join("paca_conc.dat").exists());

        let extract = read(dir.path(), &region, &names(&["NO2_A"])).await.unwrap();
        assert_eq!(extract.index.len(), 2);
    }
}
