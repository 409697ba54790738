//! Container types with reference-language semantics that need more than a `Vec`.

pub mod dict;
pub mod range;

pub use dict::Dict;
pub use range::Range;
