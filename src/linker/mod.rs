//! GNU linker-script ingestion.
//!
//! The pipeline is lexer → parser → evaluator → region resolver. Scripts are
//! parsed into a tagged-union syntax tree, expressions are evaluated under a
//! layered symbol environment, and the `MEMORY` blocks become the canonical
//! region table. Multiple scripts behave as if concatenated in order.
//!
//! This layer is strict: a syntax error or an unresolvable `ORIGIN`/`LENGTH`
//! expression fails the whole analysis. Oddities that do not prevent a region
//! table from being built (unknown directives, duplicate regions, suspicious
//! hierarchies) are collected as warnings instead.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod regions;

use thiserror::Error;

pub use regions::{resolve_regions, synthesize_default_regions, ResolvedRegions};

/// Position of a token within a script, for error reporting. Lines and
/// columns are 1-based.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

/// Syntactic failure in a linker script. Fatal.
#[derive(Clone, Debug, Error)]
#[error("{file}:{line}:{col}: {message}\n  | {excerpt}")]
pub struct LinkerParseError {
    pub file: String,
    pub line: u32,
    pub col: u32,
    pub message: String,
    /// The offending source line, trimmed.
    pub excerpt: String,
}

impl LinkerParseError {
    pub fn new(file: &str, source: &str, span: Span, message: impl Into<String>) -> Self {
        let excerpt = source
            .lines()
            .nth(span.line.saturating_sub(1) as usize)
            .unwrap_or("")
            .trim()
            .to_string();
        Self {
            file: file.to_string(),
            line: span.line,
            col: span.col,
            message: message.into(),
            excerpt,
        }
    }
}

/// Evaluation failure while resolving a region's origin or length. Fatal.
#[derive(Clone, Debug, Error)]
pub enum LinkerEvalError {
    #[error("undefined symbol `{name}`, first used at {file}:{line}:{col}")]
    UndefinedSymbol {
        name: String,
        file: String,
        line: u32,
        col: u32,
    },
    #[error("unknown memory region `{name}` referenced at {file}:{line}:{col}")]
    UnknownRegion {
        name: String,
        file: String,
        line: u32,
        col: u32,
    },
    #[error("arithmetic overflow evaluating expression at {file}:{line}:{col}")]
    Overflow { file: String, line: u32, col: u32 },
    #[error("division by zero at {file}:{line}:{col}")]
    DivisionByZero { file: String, line: u32, col: u32 },
    #[error("memory region `{name}`: {reason}")]
    InvalidRegion { name: String, reason: String },
}
