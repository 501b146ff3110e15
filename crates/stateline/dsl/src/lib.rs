//! Grammars and creation-time validation for Stateline definitions
//!
//! Three small languages live here:
//!
//! - [`paths`] — the dot/bracket path grammar (`$.order.items[0]`,
//!   `$$.Map.Item.Value`) used by the path dialect
//! - [`lexer`]/[`parser`]/[`ast`] — the expression language evaluated
//!   inside `{% ... %}` delimiters by the expression dialect
//! - [`validator`] — whole-definition validation at creation time, so a
//!   definition that builds successfully can only fail at runtime for
//!   runtime reasons
//!
//! The engine crate owns evaluation; this crate owns syntax.

#![deny(unsafe_code)]

pub mod ast;
pub mod errors;
pub mod lexer;
pub mod parser;
pub mod paths;
pub mod timestamp;
pub mod validator;

// Re-export main types
pub use ast::{BinOp, Expr};
pub use errors::{DslError, DslResult};
pub use parser::{expression_body, is_expression, parse_delimited, parse_expression};
pub use paths::{Path, PathError, PathRoot, PathSegment};
pub use timestamp::parse_timestamp;
pub use validator::{parse_definition, validate};
