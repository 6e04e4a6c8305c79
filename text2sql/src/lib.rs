//! Natural-language to SQL resolution over a live schema catalog.
//!
//! Questions are tokenised, matched against catalog identifiers and turned
//! into one of a fixed set of query templates rendered for the connection's
//! engine.

pub mod dialect;
pub mod matcher;
pub mod resolver;
pub mod template;
pub mod tokenizer;

pub use dialect::Dialect;
pub use resolver::{
    preview_sql, QueryResolver, ResolveContext, ResolverConfig, SchemaAwareResolver,
};
pub use template::Template;
