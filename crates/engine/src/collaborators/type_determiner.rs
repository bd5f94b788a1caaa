use ledgerlens_core::{
    category, non_blank, AccountKind, ClassificationSource, TransactionRecord, TransactionType,
    TypeResolution,
};

/// Payment wording that marks a debt payment (cards, mortgages, loans).
pub const LOAN_PAYMENT_KEYWORDS: &[&str] = &[
    "credit card",
    "creditcard",
    "cc payment",
    "card payment",
    "visa payment",
    "mastercard payment",
    "amex payment",
    "american express",
    "discover payment",
    "chase payment",
    "capital one",
    "citi payment",
    "mortgage",
    "mortgage payment",
    "home mortgage",
    "student loan",
    "navient",
    "sallie mae",
    "car loan",
    "auto loan",
    "vehicle loan",
    "car payment",
    "auto payment",
    "personal loan",
    "ploc",
    "home loan",
    "home equity",
    "heloc",
    "second mortgage",
    "loan payment",
    "loanpay",
    "installment loan",
    "payday loan",
    "title loan",
    "business loan",
    "commercial loan",
];

pub fn is_loan_payment_text(text: &str) -> bool {
    LOAN_PAYMENT_KEYWORDS.iter().any(|k| text.contains(k))
}

/// Category-driven type decision, the last rule of the type chain.
pub trait TypeDeterminer: Send + Sync {
    fn determine(&self, tx: &TransactionRecord) -> TypeResolution;
}

/// Default determiner: category overrides, then investment and income
/// categories, then the amount sign, then EXPENSE.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryTypeDeterminer;

impl CategoryTypeDeterminer {
    fn category_override(
        cat: &str,
        detailed: &str,
        text: &str,
        kind: &AccountKind,
        amount_sign: i8,
    ) -> Option<(TransactionType, ClassificationSource)> {
        use ClassificationSource::{Category, CategoryOverride};
        use TransactionType::*;

        match cat {
            category::PAYMENT => {
                if kind.checking_or_savings && amount_sign > 0 {
                    Some((Income, CategoryOverride))
                } else if kind.credit_card && amount_sign > 0 {
                    Some((Expense, CategoryOverride))
                } else if detailed == category::UTILITIES {
                    Some((Expense, CategoryOverride))
                } else if ["check", "wire", "transfer"].iter().any(|w| text.contains(w)) {
                    Some((Expense, CategoryOverride))
                } else if is_loan_payment_text(text) || kind.loan {
                    Some((Loan, Category))
                } else {
                    Some((Expense, CategoryOverride))
                }
            }
            category::DEPOSIT if amount_sign > 0 => Some((Income, CategoryOverride)),
            category::INVESTMENT => Some((Investment, Category)),
            category::INCOME | category::SALARY => Some((Income, Category)),
            category::UTILITIES => Some((Expense, Category)),
            _ if detailed == category::INVESTMENT => Some((Investment, Category)),
            _ if detailed == category::INCOME || detailed == category::SALARY => {
                Some((Income, Category))
            }
            _ => None,
        }
    }
}

impl TypeDeterminer for CategoryTypeDeterminer {
    fn determine(&self, tx: &TransactionRecord) -> TypeResolution {
        let cat = non_blank(tx.category.as_deref())
            .map(|c| c.trim().to_lowercase())
            .unwrap_or_default();
        let detailed = non_blank(tx.subcategory.as_deref())
            .map(|c| c.trim().to_lowercase())
            .unwrap_or_default();
        let kind = tx.account.as_ref().map(|a| a.kind()).unwrap_or_default();
        let amount_sign: i8 = match tx.amount {
            Some(a) if a.is_positive() => 1,
            Some(a) if a.is_negative() => -1,
            _ => 0,
        };
        let text = tx.combined_text();

        // Confidence reflects how much evidence was available.
        let (evidence_source, confidence): (_, f64) = if !kind.is_unknown() {
            (ClassificationSource::Account, 0.9)
        } else if !cat.is_empty() {
            (ClassificationSource::Category, 0.8)
        } else if amount_sign != 0 {
            (ClassificationSource::Amount, 0.7)
        } else {
            (ClassificationSource::Default, 0.5)
        };

        if let Some((ty, source)) = Self::category_override(&cat, &detailed, &text, &kind, amount_sign) {
            return TypeResolution::new(ty, source, confidence.max(0.8));
        }
        if amount_sign > 0 {
            let source = if evidence_source == ClassificationSource::Default {
                ClassificationSource::Amount
            } else {
                evidence_source
            };
            return TypeResolution::new(TransactionType::Income, source, confidence);
        }
        TypeResolution::new(TransactionType::Expense, evidence_source, confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerlens_core::{AccountInfo, Amount};

    fn tx(category: Option<&str>, amount: Option<&str>, account: Option<&str>, description: &str) -> TransactionRecord {
        TransactionRecord {
            description: Some(description.to_string()),
            category: category.map(str::to_string),
            amount: amount.map(|a| Amount::parse(a).unwrap()),
            account: account.map(AccountInfo::new),
            ..Default::default()
        }
    }

    fn determine(t: &TransactionRecord) -> (TransactionType, ClassificationSource) {
        let r = CategoryTypeDeterminer.determine(t);
        (r.transaction_type, r.source)
    }

    #[test]
    fn payment_on_checking_credit_is_income() {
        let t = tx(Some("payment"), Some("1200"), Some("checking"), "ACME INC PAYMENT");
        assert_eq!(
            determine(&t),
            (TransactionType::Income, ClassificationSource::CategoryOverride)
        );
    }

    #[test]
    fn payment_variants() {
        let t = tx(Some("payment"), Some("-450"), None, "ROCKET MORTGAGE PAYMENT");
        assert_eq!(determine(&t).0, TransactionType::Loan);
        let t = tx(Some("payment"), Some("-100"), None, "WIRE TRANSFER OUT");
        assert_eq!(determine(&t).0, TransactionType::Expense);
        let t = tx(Some("payment"), Some("-80"), None, "Seattle City Light");
        assert_eq!(determine(&t).0, TransactionType::Expense);
        let t = tx(Some("payment"), Some("-80"), Some("auto loan"), "monthly");
        assert_eq!(determine(&t).0, TransactionType::Loan);
    }

    #[test]
    fn category_driven_types() {
        assert_eq!(
            determine(&tx(Some("Investment"), Some("-500"), None, "buy")).0,
            TransactionType::Investment
        );
        assert_eq!(
            determine(&tx(Some("salary"), None, None, "payroll")).0,
            TransactionType::Income
        );
        assert_eq!(
            determine(&tx(Some("deposit"), Some("20"), None, "mobile deposit")),
            (TransactionType::Income, ClassificationSource::CategoryOverride)
        );
        assert_eq!(
            determine(&tx(Some("utilities"), Some("50"), None, "pse")).0,
            TransactionType::Expense
        );
    }

    #[test]
    fn amount_and_default_fallbacks() {
        let r = CategoryTypeDeterminer.determine(&tx(None, Some("15"), None, "refund"));
        assert_eq!(r.transaction_type, TransactionType::Income);
        assert_eq!(r.source, ClassificationSource::Amount);
        assert_eq!(r.confidence, 0.7);

        let r = CategoryTypeDeterminer.determine(&tx(None, None, None, "mystery"));
        assert_eq!(r.transaction_type, TransactionType::Expense);
        assert_eq!(r.source, ClassificationSource::Default);
        assert_eq!(r.confidence, 0.5);

        let r = CategoryTypeDeterminer.determine(&tx(Some("dining"), Some("-12"), Some("checking"), "cafe"));
        assert_eq!(r.transaction_type, TransactionType::Expense);
        assert_eq!(r.source, ClassificationSource::Account);
        assert_eq!(r.confidence, 0.9);
    }

    #[test]
    fn loan_keywords() {
        assert!(is_loan_payment_text("navient student loan pmt"));
        assert!(is_loan_payment_text("heloc draw"));
        assert!(!is_loan_payment_text("grocery outlet"));
    }
}
