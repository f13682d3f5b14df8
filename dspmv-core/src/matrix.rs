//! Matrix Market–style COO reading. Deliberately thin: `spec.md` §1 treats the
//! reader as an external collaborator ("a straightforward three-column parser").
use std::path::Path;

use anyhow::{anyhow, Context};

use crate::error::{ResultExt, SystemError, TypedResult};

/// One nonzero of the global matrix, 0-based, after conversion from the
/// 1-based on-disk representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Element {
    pub row: usize,
    pub col: usize,
    pub val: f64,
}

/// The global N×N matrix in coordinate form.
#[derive(Debug, Clone)]
pub struct GlobalMatrix {
    pub n: usize,
    pub elements: Vec<Element>,
}

impl GlobalMatrix {
    /// Parses a Matrix Market–style file: any number of leading `%`-comment
    /// lines, a header `N N M`, then `M` lines of 1-based `row col val`.
    pub fn read_matrix_market(path: impl AsRef<Path>) -> TypedResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading {}", path.as_ref().display()))
            .typ(SystemError::Io)?;
        let mut lines = text.lines().filter(|l| !l.trim_start().starts_with('%'));

        let header = lines
            .next()
            .ok_or_else(|| anyhow!("missing matrix header"))
            .typ(SystemError::MatrixFormat)?;
        let mut header_fields = header.split_whitespace();
        let n_rows: usize = next_field(&mut header_fields, "rows")?;
        let n_cols: usize = next_field(&mut header_fields, "cols")?;
        let nnz: usize = next_field(&mut header_fields, "nonzero count")?;

        if n_rows != n_cols {
            return Err(anyhow!("matrix is not square: {n_rows} rows, {n_cols} cols"))
                .typ(SystemError::MatrixFormat);
        }

        let mut elements = Vec::with_capacity(nnz);
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let row: usize = next_field(&mut fields, "row")?;
            let col: usize = next_field(&mut fields, "col")?;
            let val: f64 = next_field(&mut fields, "val")?;
            elements.push(Element {
                row: row
                    .checked_sub(1)
                    .ok_or_else(|| anyhow!("row index must be >= 1"))
                    .typ(SystemError::MatrixFormat)?,
                col: col
                    .checked_sub(1)
                    .ok_or_else(|| anyhow!("col index must be >= 1"))
                    .typ(SystemError::MatrixFormat)?,
                val,
            });
        }

        if elements.len() != nnz {
            return Err(anyhow!(
                "header declared {nnz} nonzeros, found {}",
                elements.len()
            ))
            .typ(SystemError::MatrixFormat);
        }

        Ok(GlobalMatrix { n: n_rows, elements })
    }

    /// Reference dense-free multiply `y = A * x` used by the verification
    /// contract of `spec.md` §6, with the canonical `x[i] = i + 1` payload.
    pub fn reference_multiply_canonical_x(&self) -> Vec<f64> {
        let mut y = vec![0.0; self.n];
        for e in &self.elements {
            y[e.row] += e.val * (e.col + 1) as f64;
        }
        y
    }
}

fn next_field<T: std::str::FromStr>(
    fields: &mut std::str::SplitWhitespace<'_>,
    what: &str,
) -> TypedResult<T> {
    fields
        .next()
        .ok_or_else(|| anyhow!("missing {what} field"))
        .typ(SystemError::MatrixFormat)?
        .parse()
        .map_err(|_| anyhow!("malformed {what} field"))
        .typ(SystemError::MatrixFormat)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_header_and_comments() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "%% a comment").unwrap();
        writeln!(f, "3 3 3").unwrap();
        writeln!(f, "1 1 2.0").unwrap();
        writeln!(f, "2 2 2.0").unwrap();
        writeln!(f, "3 3 2.0").unwrap();
        let m = GlobalMatrix::read_matrix_market(f.path()).unwrap();
        assert_eq!(m.n, 3);
        assert_eq!(m.elements.len(), 3);
        assert_eq!(m.elements[0], Element { row: 0, col: 0, val: 2.0 });
    }

    #[test]
    fn rejects_non_square() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "2 3 0").unwrap();
        let err = GlobalMatrix::read_matrix_market(f.path()).unwrap_err();
        assert_eq!(err.kind(), SystemError::MatrixFormat);
    }

    #[test]
    fn reference_multiply_identity() {
        let m = GlobalMatrix {
            n: 2,
            elements: vec![
                Element { row: 0, col: 0, val: 1.0 },
                Element { row: 1, col: 1, val: 1.0 },
            ],
        };
        assert_eq!(m.reference_multiply_canonical_x(), vec![1.0, 2.0]);
    }
}
