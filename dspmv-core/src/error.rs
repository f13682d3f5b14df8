//! Error handling for this crate, and for the planner and engine crates built on it.
use thiserror::Error;

/// A Result whose error carries a [`SystemError`] alongside its source.
pub type TypedResult<T> = Result<T, TypedError>;

/// The kind of failure that occurred, independent of its underlying cause.
///
/// This implementation is custom, not a wrapper around `std::io::ErrorKind`: the
/// taxonomy here follows the error categories a distributed SpMV run can fail in
/// (configuration, matrix-market parsing, partition-file parsing, invariant
/// violations during load, transport failures), not low-level OS error numbers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemError {
    #[error("configuration error")]
    Config,
    #[error("malformed matrix-market file")]
    MatrixFormat,
    #[error("malformed partition file")]
    PartitionFormat,
    #[error("partition file invariant violated")]
    Invariant,
    #[error("halo transport failure")]
    Communication,
    #[error("I/O error")]
    Io,
}

/// Combination of a [`SystemError`] with the `anyhow` error that caused it.
#[derive(Error, Debug)]
#[error("{kind}: {source:?}")]
pub struct TypedError {
    kind: SystemError,
    source: anyhow::Error,
}

impl TypedError {
    /// Creates a new `TypedError` from a kind and its underlying cause.
    pub fn new(kind: SystemError, source: anyhow::Error) -> Self {
        Self { kind, source }
    }

    /// Returns the [`SystemError`] variant of this error.
    pub fn kind(&self) -> SystemError {
        self.kind
    }

    /// Returns the underlying `anyhow` error.
    pub fn source(&self) -> &anyhow::Error {
        &self.source
    }
}

/// Converts any error into a [`TypedResult`] tagged with a [`SystemError`] kind.
pub trait ResultExt<T> {
    fn typ(self, kind: SystemError) -> TypedResult<T>;
}

impl<T, E: Into<anyhow::Error>> ResultExt<T> for Result<T, E> {
    fn typ(self, kind: SystemError) -> TypedResult<T> {
        self.map_err(|e| TypedError {
            kind,
            source: e.into(),
        })
    }
}

/// Shorthand to return early with a [`TypedError`] built from a format string.
///
/// ```
/// # use dspmv_core::error::{SystemError, TypedResult};
/// # use dspmv_core::problem;
/// fn check(n: usize) -> TypedResult<()> {
///     if n == 0 {
///         problem!(Config, "n must be positive, got {n}");
///     }
///     Ok(())
/// }
/// assert!(check(0).is_err());
/// ```
#[macro_export]
macro_rules! problem {
    ($kind:ident, $($tail:tt)*) => {{
        #[allow(unused_imports)]
        use $crate::error::SystemError::*;
        let cause = ::anyhow::anyhow!($($tail)*);
        return $crate::error::TypedResult::Err($crate::error::TypedError::new($kind, cause));
    }};
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::anyhow;

    fn problem_manual() -> TypedResult<()> {
        Err(TypedError::new(SystemError::Config, anyhow!("bad n")))
    }

    fn problem_macro() -> TypedResult<()> {
        problem!(Config, "bad n");
    }

    #[test]
    fn macro_matches_manual_construction() {
        assert_eq!(
            problem_manual().unwrap_err().to_string(),
            problem_macro().unwrap_err().to_string()
        );
    }

    #[test]
    fn typ_preserves_kind() {
        let r: Result<(), std::num::ParseIntError> = "x".parse::<i32>().map(|_| ());
        let typed = r.typ(SystemError::MatrixFormat);
        assert_eq!(typed.unwrap_err().kind(), SystemError::MatrixFormat);
    }
}
