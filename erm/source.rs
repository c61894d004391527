//! # Data Sources and Feature Embedding
//!
//! A [`DataSource`] turns raw tabular input into the numeric matrices a model
//! fits: the input matrix `X` (one column per embedded input feature) and the
//! target matrix `Y` (one column per embedded target feature). Features are
//! configured as a list of [`FeatureSpec`]s on each side, `U` for inputs and
//! `V` for targets.
//!
//! [`TableSource`] is the in-crate implementation over a [`Table`] of named
//! numeric columns, which can be read from any delimited text file.
//!
//! - Strict Parsing: every cell must parse as a finite `f64`. Empty cells,
//!   non-numeric text, and infinities are reported with the offending column.
//! - Lazy Embedding: feature specs are only evaluated when `get_xy` is called,
//!   so adding features is cheap and the model decides when to re-read.

use ndarray::{Array1, Array2, ArrayView1};
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for data loading and feature embedding failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the delimited-text reader: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("The column '{0}' was not found in the input. Please check spelling and case.")]
    ColumnNotFound(String),

    #[error("The column name '{0}' appears more than once in the input.")]
    DuplicateColumn(String),

    #[error("Column '{column_name}' contains the non-numeric value '{value}' at data row {row}.")]
    NonNumericValue {
        column_name: String,
        value: String,
        row: usize,
    },

    #[error(
        "Missing values were found in column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),

    #[error(
        "Non-finite values (NaN or Infinity) were found in column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),

    #[error("Column '{column_name}' has {found} rows, but the table has {expected}.")]
    RaggedColumn {
        column_name: String,
        found: usize,
        expected: usize,
    },

    #[error("The input contains no data rows.")]
    NoRows,

    #[error("Applying '{transform}' to column '{column_name}' produced non-finite values.")]
    NonFiniteFeature {
        column_name: String,
        transform: FeatureTransform,
    },
}

/// A set of named, equally long numeric columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Array1<f64>>,
    nrows: usize,
}

impl Table {
    /// Builds a table from `(name, values)` pairs. All columns must share one length.
    pub fn new(columns: Vec<(String, Array1<f64>)>) -> Result<Self, DataError> {
        let nrows = columns.first().map_or(0, |(_, values)| values.len());
        let mut seen = HashSet::new();
        let mut names = Vec::with_capacity(columns.len());
        let mut values = Vec::with_capacity(columns.len());

        for (name, column) in columns {
            if !seen.insert(name.clone()) {
                return Err(DataError::DuplicateColumn(name));
            }
            if column.len() != nrows {
                return Err(DataError::RaggedColumn {
                    column_name: name,
                    found: column.len(),
                    expected: nrows,
                });
            }
            if column.iter().any(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteValuesFound(name));
            }
            names.push(name);
            values.push(column);
        }

        Ok(Self {
            names,
            columns: values,
            nrows,
        })
    }

    /// Reads a delimited text file with a header row.
    pub fn from_csv_path(path: impl AsRef<Path>, delimiter: u8) -> Result<Self, DataError> {
        let file = File::open(path)?;
        Self::from_reader(file, delimiter)
    }

    /// Reads delimited text with a header row from any reader.
    pub fn from_reader<R: io::Read>(reader: R, delimiter: u8) -> Result<Self, DataError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let names: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|name| name.to_string())
            .collect();
        let mut raw: Vec<Vec<f64>> = vec![Vec::new(); names.len()];

        for (row, record) in csv_reader.records().enumerate() {
            let record = record?;
            for (col, name) in names.iter().enumerate() {
                let cell = record.get(col).unwrap_or("");
                raw[col].push(parse_cell(name, cell, row + 1)?);
            }
        }

        if raw.first().is_none_or(|column| column.is_empty()) {
            return Err(DataError::NoRows);
        }

        Self::new(
            names
                .into_iter()
                .zip(raw.into_iter().map(Array1::from))
                .collect(),
        )
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>, DataError> {
        self.names
            .iter()
            .position(|candidate| candidate == name)
            .map(|index| self.columns[index].view())
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
    }

    /// All columns stacked into an `nrows × ncols` matrix, in header order.
    pub fn to_matrix(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.nrows, self.ncols()), |(i, j)| self.columns[j][i])
    }
}

fn parse_cell(column_name: &str, cell: &str, row: usize) -> Result<f64, DataError> {
    if cell.is_empty() || cell.eq_ignore_ascii_case("na") {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }
    let value: f64 = cell.parse().map_err(|_| DataError::NonNumericValue {
        column_name: column_name.to_string(),
        value: cell.to_string(),
        row,
    })?;
    if !value.is_finite() {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(value)
}

/// How a raw column is turned into one or more model columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureTransform {
    Identity,
    /// Integer power of the raw value.
    Power(i32),
    /// `ln(1 + x)`.
    Log1p,
    /// Centered and scaled to unit sample standard deviation.
    Standardize,
    /// One indicator column per distinct value, in ascending order of value.
    OneHot,
}

impl fmt::Display for FeatureTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureTransform::Identity => write!(f, "identity"),
            FeatureTransform::Power(k) => write!(f, "power({k})"),
            FeatureTransform::Log1p => write!(f, "log1p"),
            FeatureTransform::Standardize => write!(f, "standardize"),
            FeatureTransform::OneHot => write!(f, "one-hot"),
        }
    }
}

/// One configured feature: a column and a transform, or a constant when `column` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSpec {
    pub column: Option<String>,
    pub transform: FeatureTransform,
}

impl FeatureSpec {
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            column: Some(name.into()),
            transform: FeatureTransform::Identity,
        }
    }

    /// The constant feature (an intercept column of ones).
    pub fn intercept() -> Self {
        Self {
            column: None,
            transform: FeatureTransform::Identity,
        }
    }

    pub fn with_transform(mut self, transform: FeatureTransform) -> Self {
        self.transform = transform;
        self
    }

    /// Evaluates this feature against `table`, producing one or more columns.
    pub fn embed(&self, table: &Table) -> Result<Vec<Array1<f64>>, DataError> {
        let Some(name) = &self.column else {
            return Ok(vec![Array1::ones(table.nrows())]);
        };
        let raw = table.column(name)?;

        let columns = match self.transform {
            FeatureTransform::Identity => vec![raw.to_owned()],
            FeatureTransform::Power(k) => vec![raw.mapv(|v| v.powi(k))],
            FeatureTransform::Log1p => vec![raw.mapv(f64::ln_1p)],
            FeatureTransform::Standardize => {
                let mean = raw.mean().unwrap_or(0.0);
                let sd = if raw.len() > 1 { raw.std(1.0) } else { 0.0 };
                if sd > 0.0 && sd.is_finite() {
                    vec![raw.mapv(|v| (v - mean) / sd)]
                } else {
                    vec![raw.mapv(|v| v - mean)]
                }
            }
            FeatureTransform::OneHot => {
                let mut levels: Vec<f64> = raw.to_vec();
                levels.sort_by(f64::total_cmp);
                levels.dedup();
                levels
                    .into_iter()
                    .map(|level| raw.mapv(|v| if v == level { 1.0 } else { 0.0 }))
                    .collect()
            }
        };

        if columns.iter().any(|c| c.iter().any(|v| !v.is_finite())) {
            return Err(DataError::NonFiniteFeature {
                column_name: name.clone(),
                transform: self.transform,
            });
        }
        Ok(columns)
    }
}

impl fmt::Display for FeatureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            None => write!(f, "intercept"),
            Some(name) if self.transform == FeatureTransform::Identity => write!(f, "{name}"),
            Some(name) => write!(f, "{}({name})", self.transform),
        }
    }
}

/// Capacity hints and verbosity forwarded from the model to `get_xy`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedHints {
    /// Expected number of input columns after embedding.
    pub u_est_num_cols: usize,
    /// Expected number of target columns after embedding.
    pub v_est_num_cols: usize,
    pub verbose: bool,
}

/// The contract between a model and wherever its data comes from.
pub trait DataSource {
    /// Embeds all configured features into `(X, Y)`, both with one row per observation.
    fn get_xy(&mut self, hints: &EmbedHints) -> Result<(Array2<f64>, Array2<f64>), DataError>;

    /// Configured input features.
    fn get_u(&self) -> &[FeatureSpec];

    /// Configured target features.
    fn get_v(&self) -> &[FeatureSpec];

    fn add_feature_u(&mut self, spec: FeatureSpec) -> Result<(), DataError>;

    fn add_feature_v(&mut self, spec: FeatureSpec) -> Result<(), DataError>;

    /// Replaces the feature configuration with the source's automatic default embedding.
    fn embed_all(&mut self) -> Result<(), DataError>;

    fn num_input_features(&self) -> usize {
        self.get_u().len()
    }

    fn num_target_features(&self) -> usize {
        self.get_v().len()
    }
}

/// A [`DataSource`] over an in-memory [`Table`].
#[derive(Debug, Clone)]
pub struct TableSource {
    table: Table,
    target_columns: Vec<String>,
    u: Vec<FeatureSpec>,
    v: Vec<FeatureSpec>,
}

impl TableSource {
    /// Wraps `table`; `target_columns` names the columns `embed_all` treats as targets.
    pub fn new(table: Table, target_columns: Vec<String>) -> Result<Self, DataError> {
        for name in &target_columns {
            table.column(name)?;
        }
        Ok(Self {
            table,
            target_columns,
            u: Vec::new(),
            v: Vec::new(),
        })
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    fn check_spec(&self, spec: &FeatureSpec) -> Result<(), DataError> {
        if let Some(name) = &spec.column {
            self.table.column(name)?;
        }
        Ok(())
    }

    fn embed_side(
        &self,
        specs: &[FeatureSpec],
        capacity: usize,
    ) -> Result<Array2<f64>, DataError> {
        let mut columns: Vec<Array1<f64>> = Vec::with_capacity(capacity.max(specs.len()));
        for spec in specs {
            columns.extend(spec.embed(&self.table)?);
        }
        let nrows = self.table.nrows();
        Ok(Array2::from_shape_fn((nrows, columns.len()), |(i, j)| {
            columns[j][i]
        }))
    }
}

impl DataSource for TableSource {
    fn get_xy(&mut self, hints: &EmbedHints) -> Result<(Array2<f64>, Array2<f64>), DataError> {
        let x = self.embed_side(&self.u, hints.u_est_num_cols)?;
        let y = self.embed_side(&self.v, hints.v_est_num_cols)?;
        if hints.verbose {
            log::info!(
                "Embedded {} input columns from {} features and {} target columns from {} features over {} rows.",
                x.ncols(),
                self.u.len(),
                y.ncols(),
                self.v.len(),
                x.nrows()
            );
        }
        Ok((x, y))
    }

    fn get_u(&self) -> &[FeatureSpec] {
        &self.u
    }

    fn get_v(&self) -> &[FeatureSpec] {
        &self.v
    }

    fn add_feature_u(&mut self, spec: FeatureSpec) -> Result<(), DataError> {
        self.check_spec(&spec)?;
        self.u.push(spec);
        Ok(())
    }

    fn add_feature_v(&mut self, spec: FeatureSpec) -> Result<(), DataError> {
        self.check_spec(&spec)?;
        self.v.push(spec);
        Ok(())
    }

    fn embed_all(&mut self) -> Result<(), DataError> {
        let targets: HashSet<&str> = self.target_columns.iter().map(String::as_str).collect();
        let mut u = vec![FeatureSpec::intercept()];
        u.extend(
            self.table
                .names()
                .iter()
                .filter(|name| !targets.contains(name.as_str()))
                .map(|name| FeatureSpec::column(name.clone())),
        );
        let v = self
            .target_columns
            .iter()
            .map(|name| FeatureSpec::column(name.clone()))
            .collect();
        self.u = u;
        self.v = v;
        Ok(())
    }
}
