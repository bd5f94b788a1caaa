use serde::{Deserialize, Serialize};

/// Account metadata attached to a transaction. All fields are free text as
/// delivered by the bank or aggregator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_type: Option<String>,
    pub account_subtype: Option<String>,
    /// ISO 4217 code, e.g. "USD".
    pub currency: Option<String>,
}

impl AccountInfo {
    pub fn new(account_type: &str) -> Self {
        Self {
            account_type: Some(account_type.to_string()),
            ..Self::default()
        }
    }

    pub fn with_subtype(mut self, subtype: &str) -> Self {
        self.account_subtype = Some(subtype.to_string());
        self
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = Some(currency.to_string());
        self
    }

    pub fn kind(&self) -> AccountKind {
        AccountKind::detect(self.account_type.as_deref(), self.account_subtype.as_deref())
    }
}

/// Broad account families inferred from type/subtype substrings. Flags are not
/// exclusive: a "credit card" account may also look like a loan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountKind {
    pub checking_or_savings: bool,
    pub credit_card: bool,
    pub investment: bool,
    pub certificate: bool,
    pub loan: bool,
}

const INVESTMENT_TERMS: &[&str] = &[
    "investment",
    "401k",
    "403b",
    "ira",
    "hsa",
    "529",
    "brokerage",
    "stocks",
    "bonds",
    "mutual fund",
    "mutualfund",
    "etf",
    "retirement",
    "certificate",
];

const LOAN_TERMS: &[&str] = &[
    "loan",
    "mortgage",
    "studentloan",
    "carloan",
    "autoloan",
    "personalloan",
    "homeloan",
];

impl AccountKind {
    pub fn detect(account_type: Option<&str>, account_subtype: Option<&str>) -> Self {
        let ty = account_type.unwrap_or("").trim().to_lowercase();
        let sub = account_subtype.unwrap_or("").trim().to_lowercase();

        let checking_or_savings = ["checking", "savings", "depository", "money market", "moneymarket"]
            .iter()
            .any(|t| ty.contains(t));

        let credit_line = ["credit line", "creditline", "line of credit", "lineofcredit"]
            .iter()
            .any(|t| ty.contains(t) || sub.contains(t));
        let credit_card = ["credit card", "creditcard", "charge card"]
            .iter()
            .any(|t| ty.contains(t))
            || (!credit_line && ty.contains("credit"));

        let certificate = has_word(&ty, "cd")
            || has_word(&sub, "cd")
            || ty.contains("certificate")
            || sub.contains("certificate");
        let investment = certificate
            || INVESTMENT_TERMS.iter().any(|t| ty.contains(t))
            || ["401k", "403b", "ira", "hsa", "529", "brokerage"]
                .iter()
                .any(|t| sub.contains(t));

        let loan = LOAN_TERMS.iter().any(|t| ty.contains(t))
            || sub.contains("loan")
            || sub.contains("mortgage");

        Self {
            checking_or_savings,
            credit_card,
            investment,
            certificate,
            loan,
        }
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::default()
    }
}

fn has_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|w| w == word)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(ty: &str) -> AccountKind {
        AccountInfo::new(ty).kind()
    }

    #[test]
    fn depository_accounts() {
        assert!(kind("Checking").checking_or_savings);
        assert!(kind("depository").checking_or_savings);
        assert!(kind("Money Market").checking_or_savings);
        assert!(!kind("Checking").credit_card);
    }

    #[test]
    fn credit_card_but_not_credit_line() {
        assert!(kind("credit card").credit_card);
        assert!(kind("credit").credit_card);
        assert!(!kind("line of credit").credit_card);
        assert!(!kind("Credit Line").credit_card);
    }

    #[test]
    fn investment_accounts() {
        assert!(kind("401k").investment);
        assert!(kind("Brokerage").investment);
        assert!(AccountInfo::new("depository").with_subtype("cd").kind().investment);
        assert!(AccountInfo::new("depository").with_subtype("cd").kind().certificate);
        // "cd" must be a whole word
        assert!(!kind("card").investment);
    }

    #[test]
    fn loan_accounts() {
        assert!(kind("mortgage").loan);
        assert!(kind("Student Loan").loan);
        assert!(AccountInfo::new("other").with_subtype("auto loan").kind().loan);
    }

    #[test]
    fn missing_type_is_unknown() {
        assert!(AccountInfo::default().kind().is_unknown());
    }
}
