//! # Data Loading and Validation Module
//!
//! This module is the entry point for caller-provided data. It validates a response
//! vector, a dense design matrix and per-column group labels, and derives the
//! cached cross-products the sweep reads from. It also reads the same three inputs
//! from tab-separated files for the command-line tool.
//!
//! - Data file: a header row, then one row per observation. The response column
//!   (default `y`) is the response; every other column is a design column, in file order.
//! - Groups file: a header `feature<TAB>group`, then one row per design column.

use crate::groups::GroupPartition;
use crate::quadratic::{GroupBlock, QuadraticForms};
use ndarray::{Array1, Array2};
use std::collections::HashMap;
use thiserror::Error;

/// A validated regression problem and its cached cross-products.
#[derive(Debug, Clone)]
pub struct RegressionData {
    pub y: Array1<f64>,
    pub x: Array2<f64>,
    pub partition: GroupPartition,
    pub forms: QuadraticForms,
    /// Cached blocks, one per group, in partition order.
    pub blocks: Vec<GroupBlock>,
    /// Design column names, when loaded from a file.
    pub feature_names: Vec<String>,
}

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to read tab-separated input: {0}")]
    CsvError(#[from] csv::Error),
    #[error("The design matrix is empty ({rows} rows, {columns} columns).")]
    EmptyDesign { rows: usize, columns: usize },
    #[error("Length mismatch for {what}: expected {expected}, found {found}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Non-finite values (NaN or Infinity) were found in {0}.")]
    NonFiniteValues(&'static str),
    #[error("The required column '{0}' was not found in the input file.")]
    ColumnNotFound(String),
    #[error("Could not parse '{value}' in column '{column}' (row {row}) as a number.")]
    ParseError {
        column: String,
        row: usize,
        value: String,
    },
    #[error("Feature '{0}' has no group label in the groups file.")]
    MissingGroup(String),
    #[error("Feature '{0}' is listed more than once in the groups file.")]
    DuplicateGroup(String),
    #[error("The groups file names '{0}', which is not a design column.")]
    UnknownFeature(String),
}

impl RegressionData {
    /// Validates the inputs and computes `XᵗX`, `Xᵗy`, `yᵗy` and the per-group blocks.
    pub fn new(y: Array1<f64>, x: Array2<f64>, labels: &[i64]) -> Result<Self, DataError> {
        let (n, p) = x.dim();
        if n == 0 || p == 0 {
            return Err(DataError::EmptyDesign {
                rows: n,
                columns: p,
            });
        }
        if y.len() != n {
            return Err(DataError::DimensionMismatch {
                what: "response vector",
                expected: n,
                found: y.len(),
            });
        }
        if labels.len() != p {
            return Err(DataError::DimensionMismatch {
                what: "group labels",
                expected: p,
                found: labels.len(),
            });
        }
        if !y.iter().all(|v| v.is_finite()) {
            return Err(DataError::NonFiniteValues("the response vector"));
        }
        if !x.iter().all(|v| v.is_finite()) {
            return Err(DataError::NonFiniteValues("the design matrix"));
        }

        let partition = GroupPartition::from_labels(labels);
        let forms = QuadraticForms::new(x.view(), y.view());
        let blocks = partition
            .groups()
            .iter()
            .map(|group| forms.group_block(&group.members))
            .collect();
        let feature_names = (1..=p).map(|j| format!("x{j}")).collect();

        Ok(Self {
            y,
            x,
            partition,
            forms,
            blocks,
            feature_names,
        })
    }

    pub fn num_observations(&self) -> usize {
        self.y.len()
    }

    pub fn num_coefficients(&self) -> usize {
        self.x.ncols()
    }
}

/// Loads a data file and a groups file into a validated problem.
pub fn load_regression_data(
    data_path: &str,
    groups_path: &str,
    response: &str,
) -> Result<RegressionData, DataError> {
    let table = internal::read_numeric_table(data_path)?;
    let response_index = table
        .headers
        .iter()
        .position(|h| h == response)
        .ok_or_else(|| DataError::ColumnNotFound(response.to_string()))?;

    let n = table.rows.len();
    let feature_names: Vec<String> = table
        .headers
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != response_index)
        .map(|(_, h)| h.clone())
        .collect();
    let p = feature_names.len();

    let y = Array1::from_iter(table.rows.iter().map(|row| row[response_index]));
    let x = Array2::from_shape_fn((n, p), |(i, j)| {
        let column = if j < response_index { j } else { j + 1 };
        table.rows[i][column]
    });

    let labels = internal::read_group_labels(groups_path, &feature_names)?;

    let mut data = RegressionData::new(y, x, &labels)?;
    data.feature_names = feature_names;
    log::info!(
        "Loaded {} observations, {} coefficients in {} groups.",
        data.num_observations(),
        data.num_coefficients(),
        data.partition.num_groups()
    );
    Ok(data)
}

/// Internal module for file parsing details.
mod internal {
    use super::*;
    use csv::ReaderBuilder;

    pub(super) struct NumericTable {
        pub(super) headers: Vec<String>,
        pub(super) rows: Vec<Vec<f64>>,
    }

    pub(super) fn read_numeric_table(path: &str) -> Result<NumericTable, DataError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut rows = Vec::new();
        for (row_index, record) in reader.records().enumerate() {
            let record = record?;
            let row = record
                .iter()
                .zip(&headers)
                .map(|(field, column)| {
                    field.trim().parse::<f64>().map_err(|_| DataError::ParseError {
                        column: column.clone(),
                        row: row_index + 1,
                        value: field.to_string(),
                    })
                })
                .collect::<Result<Vec<f64>, DataError>>()?;
            rows.push(row);
        }
        Ok(NumericTable { headers, rows })
    }

    pub(super) fn read_group_labels(
        path: &str,
        feature_names: &[String],
    ) -> Result<Vec<i64>, DataError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let feature_column = headers
            .iter()
            .position(|h| h == "feature")
            .ok_or_else(|| DataError::ColumnNotFound("feature".to_string()))?;
        let group_column = headers
            .iter()
            .position(|h| h == "group")
            .ok_or_else(|| DataError::ColumnNotFound("group".to_string()))?;

        let position: HashMap<&str, usize> = feature_names
            .iter()
            .enumerate()
            .map(|(j, name)| (name.as_str(), j))
            .collect();
        let mut labels: Vec<Option<i64>> = vec![None; feature_names.len()];

        for (row_index, record) in reader.records().enumerate() {
            let record = record?;
            let feature = record.get(feature_column).unwrap_or("").trim();
            let raw_label = record.get(group_column).unwrap_or("").trim();
            let label = raw_label.parse::<i64>().map_err(|_| DataError::ParseError {
                column: "group".to_string(),
                row: row_index + 1,
                value: raw_label.to_string(),
            })?;

            let j = *position
                .get(feature)
                .ok_or_else(|| DataError::UnknownFeature(feature.to_string()))?;
            if labels[j].replace(label).is_some() {
                return Err(DataError::DuplicateGroup(feature.to_string()));
            }
        }

        labels
            .into_iter()
            .zip(feature_names)
            .map(|(label, name)| label.ok_or_else(|| DataError::MissingGroup(name.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::fs;

    #[test]
    fn rejects_mismatched_lengths() {
        let x = Array2::zeros((3, 2));
        let err = RegressionData::new(array![1.0, 2.0], x.clone(), &[1, 2]).unwrap_err();
        assert!(matches!(
            err,
            DataError::DimensionMismatch {
                what: "response vector",
                expected: 3,
                found: 2
            }
        ));

        let err = RegressionData::new(array![1.0, 2.0, 3.0], x, &[1]).unwrap_err();
        assert!(matches!(err, DataError::DimensionMismatch { what: "group labels", .. }));
    }

    #[test]
    fn rejects_empty_and_non_finite_inputs() {
        let err = RegressionData::new(Array1::zeros(0), Array2::zeros((0, 2)), &[1, 1]).unwrap_err();
        assert!(matches!(err, DataError::EmptyDesign { rows: 0, columns: 2 }));

        let x = array![[1.0, f64::NAN], [0.0, 1.0]];
        let err = RegressionData::new(array![1.0, 2.0], x, &[1, 2]).unwrap_err();
        assert!(matches!(err, DataError::NonFiniteValues(_)));
    }

    #[test]
    fn builds_one_block_per_group() {
        let x = array![[1.0, 0.0, 2.0], [0.0, 1.0, 1.0]];
        let data = RegressionData::new(array![1.0, 2.0], x, &[5, 3, 5]).unwrap();

        assert_eq!(data.blocks.len(), 2);
        // Label 3 sorts first.
        assert_eq!(data.blocks[0].xtx, array![[1.0]]);
        assert_eq!(data.blocks[1].xtx, array![[1.0, 2.0], [2.0, 5.0]]);
        assert_eq!(data.num_observations(), 2);
        assert_eq!(data.num_coefficients(), 3);
    }

    #[test]
    fn loads_tab_separated_files() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("data.tsv");
        let groups_path = dir.path().join("groups.tsv");
        fs::write(
            &data_path,
            "a\ty\tb\tc\n1.0\t2.0\t0.5\t-1\n0.0\t1.5\t1.0\t2\n2.0\t-0.5\t0.0\t0.25\n",
        )
        .unwrap();
        fs::write(&groups_path, "feature\tgroup\nc\t2\na\t1\nb\t1\n").unwrap();

        let data = load_regression_data(
            data_path.to_str().unwrap(),
            groups_path.to_str().unwrap(),
            "y",
        )
        .unwrap();

        assert_eq!(data.y, array![2.0, 1.5, -0.5]);
        assert_eq!(data.x, array![[1.0, 0.5, -1.0], [0.0, 1.0, 2.0], [2.0, 0.0, 0.25]]);
        assert_eq!(data.feature_names, vec!["a", "b", "c"]);
        assert_eq!(data.partition.labels(), &[1, 1, 2]);
    }

    #[test]
    fn groups_file_must_cover_every_feature_once() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("data.tsv");
        fs::write(&data_path, "y\ta\tb\n1\t2\t3\n").unwrap();
        let data_path = data_path.to_str().unwrap();

        let missing = dir.path().join("missing.tsv");
        fs::write(&missing, "feature\tgroup\na\t1\n").unwrap();
        let err = load_regression_data(data_path, missing.to_str().unwrap(), "y").unwrap_err();
        assert!(matches!(err, DataError::MissingGroup(ref name) if name == "b"));

        let duplicate = dir.path().join("duplicate.tsv");
        fs::write(&duplicate, "feature\tgroup\na\t1\nb\t1\na\t2\n").unwrap();
        let err = load_regression_data(data_path, duplicate.to_str().unwrap(), "y").unwrap_err();
        assert!(matches!(err, DataError::DuplicateGroup(ref name) if name == "a"));

        let unknown = dir.path().join("unknown.tsv");
        fs::write(&unknown, "feature\tgroup\na\t1\nb\t1\nz\t3\n").unwrap();
        let err = load_regression_data(data_path, unknown.to_str().unwrap(), "y").unwrap_err();
        assert!(matches!(err, DataError::UnknownFeature(ref name) if name == "z"));
    }

    #[test]
    fn reports_unparseable_values_and_missing_response() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("data.tsv");
        let groups_path = dir.path().join("groups.tsv");
        fs::write(&data_path, "y\ta\n1\tabc\n").unwrap();
        fs::write(&groups_path, "feature\tgroup\na\t1\n").unwrap();

        let err = load_regression_data(
            data_path.to_str().unwrap(),
            groups_path.to_str().unwrap(),
            "y",
        )
        .unwrap_err();
        assert!(matches!(err, DataError::ParseError { row: 1, .. }));

        fs::write(&data_path, "y\ta\n1\t0.5\n").unwrap();
        let err = load_regression_data(
            data_path.to_str().unwrap(),
            groups_path.to_str().unwrap(),
            "response",
        )
        .unwrap_err();
        assert!(matches!(err, DataError::ColumnNotFound(ref c) if c == "response"));
    }
}
