//! Loading of sparse symmetric test operators from triplet files.
//!
//! The format is a plain-text coordinate list:
//!
//! ```text
//! % comment lines start with '%' or '#'
//! 4 5            <- dimension n and number of entries
//! 0 0 2.0        <- row col value, 0-based
//! 1 0 -1.0
//! ...
//! ```
//!
//! Each unordered position may appear once, in either triangle; off-diagonal entries are
//! mirrored so the resulting matrix is symmetric.

use faer::sparse::{SparseColMat, Triplet};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};
use thiserror::Error;

/// Represents all possible errors that can occur during loading and parsing.
#[derive(Error, Debug)]
pub enum DataLoaderError {
    /// Wraps a standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Occurs when a string cannot be parsed into an integer.
    #[error("Parse error on line {line}: failed to parse integer from '{token}'")]
    ParseInt { line: usize, token: String },
    /// Occurs when a string cannot be parsed into a float.
    #[error("Parse error on line {line}: failed to parse float from '{token}'")]
    ParseFloat { line: usize, token: String },
    /// Occurs if the `n nnz` header line is missing or malformed.
    #[error("Format error: the 'n nnz' header line was not found or was malformed.")]
    HeaderMissing,
    /// An entry line does not have exactly three fields.
    #[error("Format error on line {line}: expected 'row col value'.")]
    MalformedEntry { line: usize },
    /// An index lies outside the declared dimension.
    #[error("Entry ({row}, {col}) on line {line} is outside a {n}x{n} matrix.")]
    IndexOutOfBounds {
        line: usize,
        row: usize,
        col: usize,
        n: usize,
    },
    /// The same unordered position was given twice.
    #[error("Entry ({row}, {col}) on line {line} duplicates an earlier entry.")]
    DuplicateEntry { line: usize, row: usize, col: usize },
    /// The header's entry count disagrees with the body.
    #[error("Header declares {declared} entries, but the file contains {found}.")]
    EntryCountMismatch { declared: usize, found: usize },
    /// Occurs if the sparse matrix construction fails internally.
    #[error("Internal error: Failed to construct the sparse matrix from triplets.")]
    SparseMatrixConstructionError,
}

/// Reads a symmetric sparse matrix from a triplet file.
pub fn load_symmetric_triplets(
    path: impl AsRef<Path>,
) -> Result<SparseColMat<usize, f64>, DataLoaderError> {
    let reader = BufReader::new(File::open(path)?);
    parse_symmetric_triplets(reader)
}

/// Parses the triplet format from any buffered reader.
pub fn parse_symmetric_triplets(
    reader: impl BufRead,
) -> Result<SparseColMat<usize, f64>, DataLoaderError> {
    let mut header: Option<(usize, usize)> = None;
    // Keyed by (max(row, col), min(row, col)) to detect the same position in either triangle.
    let mut entries: BTreeMap<(usize, usize), f64> = BTreeMap::new();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() || parts[0].starts_with('%') || parts[0].starts_with('#') {
            continue;
        }

        let Some((n, _)) = header else {
            if parts.len() != 2 {
                return Err(DataLoaderError::HeaderMissing);
            }
            header = Some((parse_usize(parts[0], line_no)?, parse_usize(parts[1], line_no)?));
            continue;
        };

        if parts.len() != 3 {
            return Err(DataLoaderError::MalformedEntry { line: line_no });
        }
        let row = parse_usize(parts[0], line_no)?;
        let col = parse_usize(parts[1], line_no)?;
        let val: f64 = parts[2]
            .parse()
            .map_err(|_| DataLoaderError::ParseFloat {
                line: line_no,
                token: parts[2].to_string(),
            })?;
        if row >= n || col >= n {
            return Err(DataLoaderError::IndexOutOfBounds {
                line: line_no,
                row,
                col,
                n,
            });
        }
        if entries.insert((row.max(col), row.min(col)), val).is_some() {
            return Err(DataLoaderError::DuplicateEntry {
                line: line_no,
                row,
                col,
            });
        }
    }

    let (n, declared) = header.ok_or(DataLoaderError::HeaderMissing)?;
    if declared != entries.len() {
        return Err(DataLoaderError::EntryCountMismatch {
            declared,
            found: entries.len(),
        });
    }

    let mut triplets = Vec::with_capacity(2 * entries.len());
    for (&(row, col), &val) in &entries {
        triplets.push(Triplet { row, col, val });
        if row != col {
            triplets.push(Triplet {
                row: col,
                col: row,
                val,
            });
        }
    }

    SparseColMat::try_new_from_triplets(n, n, &triplets)
        .map_err(|_| DataLoaderError::SparseMatrixConstructionError)
}

fn parse_usize(token: &str, line: usize) -> Result<usize, DataLoaderError> {
    token.parse().map_err(|_| DataLoaderError::ParseInt {
        line,
        token: token.to_string(),
    })
}
