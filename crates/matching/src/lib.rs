//! Text matchers used by the detection stack: fuzzy merchant matching,
//! keyword-cluster semantic matching, and the keyword rule parser.

pub mod parser;
pub mod semantic;
pub mod string_matcher;
pub(crate) mod util;

pub use parser::{
    CategoryRule, KeywordCategoryParser, MatchType as RuleMatchType, ParseInput, ParsedCategory,
    RuleSetError,
};
pub use semantic::{
    tokenize, ClusterError, MatchContext, SemanticConfig, SemanticMatcher, SemanticMethod,
    SemanticResult,
};
pub use string_matcher::{normalize, MatchResult, MatcherConfig, StringMatcher, MAX_TEXT_LEN};
