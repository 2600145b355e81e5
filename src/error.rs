//! Error types for zentinel-rewrite.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for zentinel-rewrite operations.
///
/// Every variant is a load-time failure: once a ruleset compiles, per-request
/// evaluation degrades to empty values instead of erroring.
#[derive(Debug, Error)]
pub enum Error {
    /// Error parsing a rewrite directive.
    #[error("parse error at {location}: {message}")]
    Parse {
        /// Human-readable error message.
        message: String,
        /// Location in the source (file:line:col or line:col).
        location: String,
        /// The source text that caused the error (if available).
        source_text: Option<String>,
    },

    /// Error loading a rewrite configuration file.
    #[error("failed to load rewrite config {path}: {source}")]
    ConfigFileLoad {
        /// Path to the file that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Error compiling a rule or condition pattern.
    #[error("invalid regex pattern '{pattern}': {source}")]
    RegexCompile {
        /// The pattern that failed to compile.
        pattern: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// A substitution references a map that was never declared.
    #[error("unknown map: {name}")]
    UnknownMap {
        /// The unresolved map name.
        name: String,
    },

    /// An `int:` map spec names a function that does not exist.
    #[error("unknown internal map function: int:{name}")]
    UnknownMapFunction {
        /// The unknown function name.
        name: String,
    },

    /// A map provider spec is malformed (bad prefix, wrong parameter count).
    #[error("invalid map '{name}': {message}")]
    InvalidMap {
        /// The map name from the directive.
        name: String,
        /// Error message.
        message: String,
    },

    /// Error reading a txt:/rnd: map table from disk.
    #[error("failed to read map file {path}: {source}")]
    MapFileLoad {
        /// Path to the table file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Unknown rule or condition flag.
    #[error("unknown flag: {name}")]
    UnknownFlag {
        /// The unknown flag name.
        name: String,
    },

    /// Invalid flag argument.
    #[error("invalid argument for flag '{flag}': {message}")]
    InvalidFlagArgument {
        /// The flag name.
        flag: String,
        /// Error message.
        message: String,
    },

    /// Configuration error outside any single directive.
    #[error("configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },
}

impl Error {
    /// Create a parse error with location information.
    pub fn parse(message: impl Into<String>, location: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            location: location.into(),
            source_text: None,
        }
    }

    /// Create a parse error with location and source text.
    pub fn parse_with_source(
        message: impl Into<String>,
        location: impl Into<String>,
        source_text: impl Into<String>,
    ) -> Self {
        Self::Parse {
            message: message.into(),
            location: location.into(),
            source_text: Some(source_text.into()),
        }
    }

    /// Attach a source location to a location-free error, turning it into a
    /// parse error. Used when directive bodies are compiled after parsing.
    pub fn at(self, location: &SourceLocation) -> Self {
        match self {
            Self::Parse { .. } => self,
            other => Self::Parse {
                message: other.to_string(),
                location: location.to_string(),
                source_text: None,
            },
        }
    }
}

/// Source location for error reporting.
#[derive(Debug, Clone, Default)]
pub struct SourceLocation {
    /// File path (if known).
    pub file: Option<PathBuf>,
    /// Line number (1-indexed).
    pub line: usize,
    /// Column number (1-indexed).
    pub column: usize,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:{}:{}", file.display(), self.line, self.column)
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}
