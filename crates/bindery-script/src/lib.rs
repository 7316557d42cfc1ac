//! Script syntax for markup bindings and event handlers.
//!
//! Three entry points cover what the engine needs: a single expression, a
//! statement list for handler bodies, and a property value split into
//! literal text and `{...}` binding segments.

pub mod ast;
mod error;
mod lexer;
mod parser;
mod property;

pub use ast::*;
pub use error::ParseError;

use parser::Parser;

/// Parses a single expression, e.g. the body of a `{...}` binding.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    Parser::new(source, 0)?.parse_complete_expression()
}

/// Parses a handler body into its top-level statements.
pub fn parse_statements(source: &str) -> Result<Vec<Stmt>, ParseError> {
    Parser::new(source, 0)?.parse_program()
}

/// Splits a property value into literal and expression segments.
pub fn parse_property(source: &str) -> Result<Vec<Segment>, ParseError> {
    property::split_segments(source)
}

#[cfg(test)]
#[path = "tests/parser_tests.rs"]
mod tests;
