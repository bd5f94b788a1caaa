//! Pluggable collaborators consulted by the resolver.

pub mod parser;
pub mod region;
pub mod taxonomy;
pub mod type_determiner;

pub use parser::CategoryParser;
pub use region::{RegionKeywordConfig, RegionKeywords};
pub use taxonomy::{PlaidTaxonomyMapper, TaxonomyMapper, TaxonomyMapping, UNKNOWN_CATEGORY};
pub use type_determiner::{
    is_loan_payment_text, CategoryTypeDeterminer, TypeDeterminer, LOAN_PAYMENT_KEYWORDS,
};
