//! The error type shared by every fallible operation in this crate.

use thiserror::Error;

/// Shorthand for results whose error type is this crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while building, fitting, or searching a staged event tree.
///
/// All of these are input-contract violations: the computations here are deterministic, so
/// retrying an operation that failed will fail again the same way.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    /// A variable was declared with no levels, with the same level twice, or with a name that
    /// another variable already uses.
    #[error("invalid levels for variable `{variable}`: {reason}")]
    InvalidLevels {
        /// Name of the offending variable.
        variable: String,
        /// What was wrong with its levels.
        reason: String,
    },

    /// A path element is not one of the levels of the variable at that depth.
    #[error("`{value}` is not a level of variable `{variable}`")]
    InvalidPath {
        /// Name of the variable at the depth where the path went wrong.
        variable: String,
        /// The value that was not found.
        value: String,
    },

    /// A path has more elements than the tree has variables.
    #[error("path of length {length} is deeper than the tree ({depth} variables)")]
    PathTooLong {
        /// Number of elements in the path.
        length: usize,
        /// Number of variables in the tree.
        depth: usize,
    },

    /// A variable name was looked up which the tree does not contain.
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    /// Counts, probabilities, or scores were requested from a model that was never fitted.
    #[error("the model has not been fitted to any data")]
    UnfittedModel,

    /// The data handed to the aggregator does not carry a variable that the tree orders.
    #[error("variable `{0}` is not present in the data")]
    MissingData(String),

    /// A stage operation referenced a label that the variable doesn't use, or a stage vector
    /// whose length doesn't evenly divide the number of positions at that depth.
    #[error("bad stage assignment for variable #{variable}: {reason}")]
    BadStageAssignment {
        /// Position of the variable in the tree's order.
        variable: usize,
        /// What was wrong with the request.
        reason: String,
    },

    /// Two probability vectors with different support sizes were compared.
    #[error("cannot compare probability vectors of lengths {left} and {right}")]
    DegenerateDistance {
        /// Length of the first vector.
        left: usize,
        /// Length of the second vector.
        right: usize,
    },

    /// A joint count table has the wrong number of cells, or a negative or non-finite count.
    #[error("invalid counts: {0}")]
    InvalidCounts(String),

    /// A data record has a different number of fields than the header.
    #[error("record has {found} fields but the header names {expected} variables")]
    InvalidRecord {
        /// Number of variables named by the header.
        expected: usize,
        /// Number of fields in the record.
        found: usize,
    },

    /// The smoothing pseudo-count must be finite and non-negative.
    #[error("smoothing parameter must be finite and non-negative, got {0}")]
    InvalidSmoothing(f64),

    /// BIC needs at least one observation.
    #[error("the data holds no observations")]
    EmptyData,
}

impl Error {
    pub(crate) fn bad_stages(variable: usize, reason: impl Into<String>) -> Self {
        Error::BadStageAssignment {
            variable,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_levels(variable: &str, reason: impl Into<String>) -> Self {
        Error::InvalidLevels {
            variable: variable.to_owned(),
            reason: reason.into(),
        }
    }
}
