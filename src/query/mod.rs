//! Query layer: predicate parsing and Filter/Exclude evaluation
//!
//! - [`predicate`] - `path__operation` keys, operations and leaf evaluation
//! - [`filter`] - Recursive walk over fields, lists and relations

pub mod filter;
pub mod predicate;

pub use filter::{Exclude, Filter};
pub use predicate::{valid_operations, LeafError, Operation, Operator, Predicate, Quantifier};
