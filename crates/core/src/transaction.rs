use serde::{Deserialize, Serialize};

use super::account::AccountInfo;
use super::amount::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Expense,
    Income,
    Investment,
    Loan,
    Transfer,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Expense => write!(f, "EXPENSE"),
            TransactionType::Income => write!(f, "INCOME"),
            TransactionType::Investment => write!(f, "INVESTMENT"),
            TransactionType::Loan => write!(f, "LOAN"),
            TransactionType::Transfer => write!(f, "TRANSFER"),
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "EXPENSE" => Ok(TransactionType::Expense),
            "INCOME" => Ok(TransactionType::Income),
            "INVESTMENT" => Ok(TransactionType::Investment),
            "LOAN" => Ok(TransactionType::Loan),
            "TRANSFER" => Ok(TransactionType::Transfer),
            other => Err(format!("Unknown transaction type: '{other}'")),
        }
    }
}

/// Where a transaction entered the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportSource {
    Plaid,
    Csv,
    Excel,
    Pdf,
    Manual,
    Other(String),
}

impl ImportSource {
    /// Sources whose category arrives in a provider taxonomy that must be mapped.
    pub fn is_provider_taxonomy(&self) -> bool {
        matches!(self, ImportSource::Plaid)
    }

    /// File imports whose category was already produced by the import parser.
    pub fn is_file_import(&self) -> bool {
        matches!(self, ImportSource::Csv | ImportSource::Excel | ImportSource::Pdf)
    }
}

impl std::fmt::Display for ImportSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportSource::Plaid => write!(f, "PLAID"),
            ImportSource::Csv => write!(f, "CSV"),
            ImportSource::Excel => write!(f, "EXCEL"),
            ImportSource::Pdf => write!(f, "PDF"),
            ImportSource::Manual => write!(f, "MANUAL"),
            ImportSource::Other(s) => write!(f, "{s}"),
        }
    }
}

impl std::str::FromStr for ImportSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("Empty import source".to_string());
        }
        Ok(match trimmed.to_uppercase().as_str() {
            "PLAID" => ImportSource::Plaid,
            "CSV" => ImportSource::Csv,
            "EXCEL" | "XLS" | "XLSX" => ImportSource::Excel,
            "PDF" => ImportSource::Pdf,
            "MANUAL" => ImportSource::Manual,
            _ => ImportSource::Other(trimmed.to_string()),
        })
    }
}

/// A raw transaction as delivered by an importer, before classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub merchant: Option<String>,
    pub description: Option<String>,
    pub amount: Option<Amount>,
    pub payment_channel: Option<String>,
    /// Bank supplied debit/credit marker ("DEBIT", "CR", ...).
    pub indicator: Option<String>,
    /// Importer/provider primary category.
    pub category: Option<String>,
    /// Importer/provider detailed category.
    pub subcategory: Option<String>,
    pub import_source: Option<ImportSource>,
    pub account: Option<AccountInfo>,
}

impl TransactionRecord {
    pub fn merchant_or_description(&self) -> Option<&str> {
        non_blank(self.merchant.as_deref()).or_else(|| non_blank(self.description.as_deref()))
    }

    /// Merchant and description joined with a space, lowercased.
    pub fn combined_text(&self) -> String {
        [self.merchant.as_deref(), self.description.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn transaction_type_roundtrip() {
        for ty in [
            TransactionType::Expense,
            TransactionType::Income,
            TransactionType::Investment,
            TransactionType::Loan,
            TransactionType::Transfer,
        ] {
            assert_eq!(TransactionType::from_str(&ty.to_string()).unwrap(), ty);
        }
        assert!(TransactionType::from_str("bogus").is_err());
    }

    #[test]
    fn import_source_parsing() {
        assert_eq!(ImportSource::from_str("plaid").unwrap(), ImportSource::Plaid);
        assert_eq!(ImportSource::from_str("xlsx").unwrap(), ImportSource::Excel);
        assert_eq!(
            ImportSource::from_str("ofx").unwrap(),
            ImportSource::Other("ofx".into())
        );
        assert!(ImportSource::from_str(" ").is_err());
        assert!(ImportSource::Csv.is_file_import());
        assert!(!ImportSource::Plaid.is_file_import());
    }

    #[test]
    fn combined_text_skips_blanks() {
        let tx = TransactionRecord {
            merchant: Some("  ".into()),
            description: Some("Coffee Shop".into()),
            ..Default::default()
        };
        assert_eq!(tx.combined_text(), "coffee shop");
        assert_eq!(tx.merchant_or_description(), Some("Coffee Shop"));
    }

    #[test]
    fn serde_uses_screaming_case() {
        let json = serde_json::to_string(&TransactionType::Investment).unwrap();
        assert_eq!(json, "\"INVESTMENT\"");
    }
}
