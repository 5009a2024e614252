//! ClickHouse dialect support: statement rewriting and parameter binding.
pub mod functions;
pub mod params;
pub mod rewriter;
pub mod scanner;

pub use params::{bind, ParamType, QueryParams};
pub use rewriter::{rewrite, RewritePass, RewriteWarning, Rewriter, Rewritten};
