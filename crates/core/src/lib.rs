pub mod account;
pub mod amount;
pub mod category;
pub mod classification;
pub mod confidence;
pub mod transaction;

pub use account::{AccountInfo, AccountKind};
pub use amount::{Amount, AmountError, MAX_ABS_AMOUNT};
pub use classification::{
    CategoryResolution, ClassificationSource, ResolvedClassification, TypeResolution,
};
pub use confidence::{clamp_unit, ConfidenceTier};
pub use transaction::{non_blank, ImportSource, TransactionRecord, TransactionType};
