use std::sync::Arc;

use ledgerlens_core::{ClassificationSource, TransactionType, TypeResolution};

use super::{RuleContext, TypeRule};
use crate::collaborators::{is_loan_payment_text, RegionKeywords, TypeDeterminer};

/// Account metadata decides the type outright for card, investment, loan and
/// depository accounts.
pub struct AccountTypeRule {
    regions: Arc<dyn RegionKeywords>,
    payment_type: TransactionType,
}

impl AccountTypeRule {
    pub fn new(regions: Arc<dyn RegionKeywords>, payment_type: TransactionType) -> Self {
        Self {
            regions,
            payment_type,
        }
    }
}

impl TypeRule for AccountTypeRule {
    fn name(&self) -> &'static str {
        "account_type"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<TypeResolution> {
        let kind = &ctx.kind;
        let sign = ctx.amount_sign;
        let ty = if kind.investment {
            TransactionType::Investment
        } else if kind.credit_card {
            match sign {
                1 => TransactionType::Expense,
                -1 => TransactionType::Loan,
                _ => return None,
            }
        } else if kind.loan {
            TransactionType::Loan
        } else if kind.checking_or_savings {
            match sign {
                1 => TransactionType::Income,
                -1 if self.regions.is_credit_card_payment(&ctx.text, ctx.tx.account.as_ref())
                    || is_loan_payment_text(&ctx.text) =>
                {
                    self.payment_type
                }
                -1 => TransactionType::Expense,
                _ => return None,
            }
        } else {
            return None;
        };
        Some(TypeResolution::new(ty, ClassificationSource::AccountType, 0.95))
    }
}

/// Card and loan payment wording, for transactions without usable account
/// metadata.
pub struct CreditCardPaymentRule {
    regions: Arc<dyn RegionKeywords>,
    payment_type: TransactionType,
}

impl CreditCardPaymentRule {
    pub fn new(regions: Arc<dyn RegionKeywords>, payment_type: TransactionType) -> Self {
        Self {
            regions,
            payment_type,
        }
    }
}

impl TypeRule for CreditCardPaymentRule {
    fn name(&self) -> &'static str {
        "credit_card_payment"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<TypeResolution> {
        if ctx.text.is_empty() {
            return None;
        }
        let hit = self.regions.is_credit_card_payment(&ctx.text, ctx.tx.account.as_ref())
            || is_loan_payment_text(&ctx.text);
        hit.then(|| TypeResolution::new(self.payment_type, ClassificationSource::Hybrid, 0.9))
    }
}

/// Bank debit/credit marker. Never overrides an investment or loan type that
/// the category determiner would assign.
pub struct IndicatorRule {
    determiner: Arc<dyn TypeDeterminer>,
}

impl IndicatorRule {
    pub fn new(determiner: Arc<dyn TypeDeterminer>) -> Self {
        Self { determiner }
    }
}

impl TypeRule for IndicatorRule {
    fn name(&self) -> &'static str {
        "indicator"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<TypeResolution> {
        let indicator = ctx.tx.indicator.as_deref()?.trim().to_lowercase();
        let ty = match indicator.as_str() {
            "debit" | "dr" | "db" => TransactionType::Expense,
            "credit" | "cr" => TransactionType::Income,
            _ => return None,
        };
        let base = self.determiner.determine(ctx.tx).transaction_type;
        if matches!(base, TransactionType::Investment | TransactionType::Loan) {
            return None;
        }
        Some(TypeResolution::new(ty, ClassificationSource::Indicator, 0.85))
    }
}

/// Delegates to the category-driven [`TypeDeterminer`].
pub struct CategoryFallbackRule {
    determiner: Arc<dyn TypeDeterminer>,
}

impl CategoryFallbackRule {
    pub fn new(determiner: Arc<dyn TypeDeterminer>) -> Self {
        Self { determiner }
    }
}

impl TypeRule for CategoryFallbackRule {
    fn name(&self) -> &'static str {
        "category_fallback"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<TypeResolution> {
        Some(self.determiner.determine(ctx.tx))
    }
}
