//! Lexer, parser and syntax tree for the snippet language.
//!
//! The language is the Python-compatible subset that data-analysis snippets
//! are written in; anything outside it is a syntax error rather than a
//! runtime surprise.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::Program;
pub use parser::{parse, MAX_NESTING};
