//! Molecule dataset loading for the resampling harness.
//!
//! Loads pre-featurized molecules from JSONL: one record per line with a
//! stable identifier, the structure string, the numeric target properties and
//! one fixed-length vector per representation. How those columns were
//! produced (descriptor calculators, fingerprinting, embedding models) is not
//! this crate's concern.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or slicing a dataset
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Dataset file not found: {0}")]
    NotFound(PathBuf),

    #[error("Dataset contains no records")]
    Empty,

    #[error("Malformed record on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Duplicate record id: {0}")]
    DuplicateId(String),

    #[error("Target property not present in dataset: {0}")]
    MissingTarget(String),

    #[error("Representation not present in dataset: {0}")]
    MissingRepresentation(String),

    #[error("Record {id} lacks representation {representation}")]
    IncompleteRecord { id: String, representation: String },

    #[error("Record {id}: {representation} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        id: String,
        representation: String,
        expected: usize,
        actual: usize,
    },

    #[error("Record index {0} out of range")]
    IndexOutOfRange(usize),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A single featurized molecule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MoleculeRecord {
    /// Stable identifier
    pub id: String,
    /// Canonical structure string (SMILES)
    pub smiles: String,
    /// Target property values keyed by property name
    #[serde(default)]
    pub targets: BTreeMap<String, f64>,
    /// Feature vectors keyed by representation name
    #[serde(default)]
    pub representations: BTreeMap<String, Vec<f64>>,
}

/// Ordered, read-only collection of molecule records
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<MoleculeRecord>,
    dimensions: BTreeMap<String, usize>,
}

impl Dataset {
    /// Build a dataset from in-memory records, validating representation shapes
    ///
    /// # Errors
    ///
    /// Returns an error if the records are empty, ids collide, or a
    /// representation's dimensionality differs between records.
    pub fn from_records(records: Vec<MoleculeRecord>) -> Result<Self, DataError> {
        let mut dataset = Self {
            records,
            dimensions: BTreeMap::new(),
        };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Load a dataset from a JSONL file
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, a line fails to parse, or the
    /// resulting records are inconsistent.
    pub fn from_jsonl<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DataError::NotFound(path.to_path_buf()));
        }

        let reader = BufReader::new(std::fs::File::open(path)?);
        let mut records = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: MoleculeRecord = serde_json::from_str(&line)
                .map_err(|source| DataError::Malformed { line: i + 1, source })?;
            records.push(record);
        }

        tracing::debug!(path = %path.display(), records = records.len(), "Loaded dataset");
        Self::from_records(records)
    }

    /// Check structural invariants and cache per-representation dimensions
    ///
    /// # Errors
    ///
    /// See [`Dataset::from_records`].
    pub fn validate(&mut self) -> Result<(), DataError> {
        if self.records.is_empty() {
            return Err(DataError::Empty);
        }

        let mut ids = HashSet::new();
        for record in &self.records {
            if !ids.insert(record.id.as_str()) {
                return Err(DataError::DuplicateId(record.id.clone()));
            }
        }

        let mut dimensions = BTreeMap::new();
        for record in &self.records {
            for (name, vector) in &record.representations {
                dimensions.entry(name.clone()).or_insert(vector.len());
            }
        }

        for record in &self.records {
            for (name, &expected) in &dimensions {
                let vector = record.representations.get(name).ok_or_else(|| {
                    DataError::IncompleteRecord {
                        id: record.id.clone(),
                        representation: name.clone(),
                    }
                })?;
                if vector.len() != expected {
                    return Err(DataError::DimensionMismatch {
                        id: record.id.clone(),
                        representation: name.clone(),
                        expected,
                        actual: vector.len(),
                    });
                }
            }
        }

        self.dimensions = dimensions;
        Ok(())
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the dataset has no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over records in dataset order
    pub fn iter(&self) -> impl Iterator<Item = &MoleculeRecord> {
        self.records.iter()
    }

    /// Record at `index`
    #[must_use]
    pub fn record(&self, index: usize) -> Option<&MoleculeRecord> {
        self.records.get(index)
    }

    /// Structure string of the record at `index`
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange` for an invalid index.
    pub fn structure(&self, index: usize) -> Result<&str, DataError> {
        self.records
            .get(index)
            .map(|r| r.smiles.as_str())
            .ok_or(DataError::IndexOutOfRange(index))
    }

    /// Whether every record carries the target property
    #[must_use]
    pub fn has_target(&self, target: &str) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.targets.contains_key(target))
    }

    /// Whether the representation exists
    #[must_use]
    pub fn has_representation(&self, representation: &str) -> bool {
        self.dimensions.contains_key(representation)
    }

    /// Names of all representations, sorted
    #[must_use]
    pub fn representations(&self) -> Vec<String> {
        self.dimensions.keys().cloned().collect()
    }

    /// Fixed dimensionality of a representation
    #[must_use]
    pub fn dimension(&self, representation: &str) -> Option<usize> {
        self.dimensions.get(representation).copied()
    }

    /// Stack the representation vectors of `indices` into a row-major matrix
    ///
    /// # Errors
    ///
    /// Returns an error if the representation is unknown or an index is out
    /// of range.
    pub fn features(&self, representation: &str, indices: &[usize]) -> Result<Array2<f64>, DataError> {
        let dim = self
            .dimension(representation)
            .ok_or_else(|| DataError::MissingRepresentation(representation.to_string()))?;

        let mut matrix = Array2::zeros((indices.len(), dim));
        for (row, &index) in indices.iter().enumerate() {
            let record = self
                .records
                .get(index)
                .ok_or(DataError::IndexOutOfRange(index))?;
            let vector = record.representations.get(representation).ok_or_else(|| {
                DataError::IncompleteRecord {
                    id: record.id.clone(),
                    representation: representation.to_string(),
                }
            })?;
            for (col, value) in vector.iter().enumerate() {
                matrix[[row, col]] = *value;
            }
        }
        Ok(matrix)
    }

    /// Target values of `indices`, in the given order
    ///
    /// # Errors
    ///
    /// Returns an error if a record lacks the target or an index is out of
    /// range.
    pub fn targets(&self, target: &str, indices: &[usize]) -> Result<Array1<f64>, DataError> {
        indices
            .iter()
            .map(|&index| {
                let record = self
                    .records
                    .get(index)
                    .ok_or(DataError::IndexOutOfRange(index))?;
                record
                    .targets
                    .get(target)
                    .copied()
                    .ok_or_else(|| DataError::MissingTarget(target.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Array1::from)
    }

    /// `(structure, value)` pairs for `indices`, as handed to external predictors
    ///
    /// # Errors
    ///
    /// Returns an error if a record lacks the target or an index is out of
    /// range.
    pub fn examples(&self, target: &str, indices: &[usize]) -> Result<Vec<(String, f64)>, DataError> {
        let values = self.targets(target, indices)?;
        indices
            .iter()
            .zip(values.iter())
            .map(|(&index, &value)| Ok((self.structure(index)?.to_string(), value)))
            .collect()
    }
}
