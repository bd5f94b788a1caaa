use serde::{Deserialize, Serialize};

use crate::confidence::clamp_unit;
use crate::transaction::TransactionType;

/// Provenance of a resolved type or category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationSource {
    AccountType,
    Hybrid,
    Indicator,
    Category,
    CategoryOverride,
    Account,
    Amount,
    Plaid,
    Importer,
    Ml,
    RuleOverride,
    Default,
}

impl std::fmt::Display for ClassificationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassificationSource::AccountType => write!(f, "ACCOUNT_TYPE"),
            ClassificationSource::Hybrid => write!(f, "HYBRID"),
            ClassificationSource::Indicator => write!(f, "INDICATOR"),
            ClassificationSource::Category => write!(f, "CATEGORY"),
            ClassificationSource::CategoryOverride => write!(f, "CATEGORY_OVERRIDE"),
            ClassificationSource::Account => write!(f, "ACCOUNT"),
            ClassificationSource::Amount => write!(f, "AMOUNT"),
            ClassificationSource::Plaid => write!(f, "PLAID"),
            ClassificationSource::Importer => write!(f, "IMPORTER"),
            ClassificationSource::Ml => write!(f, "ML"),
            ClassificationSource::RuleOverride => write!(f, "RULE_OVERRIDE"),
            ClassificationSource::Default => write!(f, "DEFAULT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TypeResolution {
    pub transaction_type: TransactionType,
    pub source: ClassificationSource,
    pub confidence: f64,
}

impl TypeResolution {
    pub fn new(transaction_type: TransactionType, source: ClassificationSource, confidence: f64) -> Self {
        Self {
            transaction_type,
            source,
            confidence: clamp_unit(confidence),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResolution {
    pub category: String,
    pub subcategory: Option<String>,
    pub source: ClassificationSource,
    pub confidence: f64,
}

impl CategoryResolution {
    pub fn new(category: impl Into<String>, source: ClassificationSource, confidence: f64) -> Self {
        Self {
            category: category.into(),
            subcategory: None,
            source,
            confidence: clamp_unit(confidence),
        }
    }

    pub fn with_subcategory(mut self, subcategory: Option<String>) -> Self {
        self.subcategory = subcategory;
        self
    }
}

/// Final output of the resolver for one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedClassification {
    pub transaction_type: TransactionType,
    pub category: String,
    pub subcategory: Option<String>,
    /// Confidence of the category decision.
    pub confidence: f64,
    /// Provenance of the category decision.
    pub source: ClassificationSource,
    pub type_confidence: f64,
    pub type_source: ClassificationSource,
}

impl ResolvedClassification {
    pub fn from_parts(ty: TypeResolution, category: CategoryResolution) -> Self {
        Self {
            transaction_type: ty.transaction_type,
            category: category.category,
            subcategory: category.subcategory,
            confidence: category.confidence,
            source: category.source,
            type_confidence: ty.confidence,
            type_source: ty.source,
        }
    }
}
