use std::sync::OnceLock;

use ledgerlens_core::{category, CategoryResolution, ClassificationSource};
use regex::Regex;

use super::{CategorizationRule, Lookup, RuleContext};
use crate::collaborators::UNKNOWN_CATEGORY;
use crate::coordinator::DetectionOutcome;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(
    re_utility,
    r"\b(utility|utilities|electric(al|ity)?|water|sewer|power|energy|city light|puget sound|comcast|xfinity)\b"
);
re!(re_transfer, r"\b(check|wire|transfers?)\b");
re!(re_salary, r"\b(salary|payroll)\b");
re!(re_rent, r"\b(rent|rental)\b");
re!(re_deposit, r"\bdeposits?\b");

fn provider_source(ctx: &RuleContext<'_>) -> bool {
    ctx.tx.import_source.as_ref().is_some_and(|s| s.is_provider_taxonomy())
}

/// Rewrites a "payment" signal on a checking account into what the money
/// actually was. Off unless `resolver.payment_correction` is set.
pub struct PaymentCorrectionRule;

impl PaymentCorrectionRule {
    fn importer_signal(ctx: &RuleContext<'_>) -> bool {
        ctx.category.as_deref() == Some(category::PAYMENT)
            || ctx.subcategory.as_deref() == Some(category::PAYMENT)
    }
}

impl CategorizationRule for PaymentCorrectionRule {
    fn name(&self) -> &'static str {
        "payment_correction"
    }

    fn lookups(&self, ctx: &RuleContext<'_>) -> &'static [Lookup] {
        if ctx.kind.checking_or_savings && !Self::importer_signal(ctx) {
            &[Lookup::Parser]
        } else {
            &[]
        }
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<CategoryResolution> {
        if !ctx.kind.checking_or_savings {
            return None;
        }
        let signalled = Self::importer_signal(ctx)
            || ctx.parsed.as_ref().is_some_and(|(c, _)| c == category::PAYMENT);
        if !signalled {
            return None;
        }

        let text = ctx.text.as_str();
        let (cat, sub) = if re_utility().is_match(text) {
            (category::UTILITIES, None)
        } else if re_transfer().is_match(text) {
            (category::TRANSFER, None)
        } else if ctx.amount_sign <= 0 {
            return None;
        } else if re_salary().is_match(text) {
            (category::INCOME, Some(category::SALARY))
        } else if re_rent().is_match(text) {
            (category::INCOME, Some("rentIncome"))
        } else if re_deposit().is_match(text) {
            (category::DEPOSIT, None)
        } else {
            (category::INCOME, None)
        };
        tracing::debug!(category = cat, "payment signal corrected");
        Some(
            CategoryResolution::new(cat, ClassificationSource::RuleOverride, 0.9)
                .with_subcategory(sub.map(str::to_string)),
        )
    }
}

/// Maps provider taxonomy codes (e.g. Plaid `FOOD_AND_DRINK`/`GROCERIES`).
pub struct ProviderTaxonomyRule;

impl ProviderTaxonomyRule {
    fn applies(ctx: &RuleContext<'_>) -> bool {
        provider_source(ctx) && !category::is_blank_or_other(ctx.category.as_deref())
    }
}

impl CategorizationRule for ProviderTaxonomyRule {
    fn name(&self) -> &'static str {
        "provider_taxonomy"
    }

    fn lookups(&self, ctx: &RuleContext<'_>) -> &'static [Lookup] {
        if Self::applies(ctx) {
            &[Lookup::Taxonomy]
        } else {
            &[]
        }
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<CategoryResolution> {
        if !Self::applies(ctx) {
            return None;
        }
        let mapping = ctx.taxonomy.as_ref()?;
        if mapping.primary == category::OTHER || mapping.primary == UNKNOWN_CATEGORY {
            return None;
        }
        let sub = (mapping.detailed != mapping.primary).then(|| mapping.detailed.clone());
        Some(
            CategoryResolution::new(mapping.primary.as_str(), ClassificationSource::Plaid, 0.95)
                .with_subcategory(sub),
        )
    }
}

/// The free-text parser and the importer agree. For file imports the importer
/// category already is the parser's output.
pub struct ParserAgreementRule;

impl ParserAgreementRule {
    fn file_import(ctx: &RuleContext<'_>) -> bool {
        ctx.tx.import_source.as_ref().is_some_and(|s| s.is_file_import())
    }

    fn importer<'c>(ctx: &'c RuleContext<'_>) -> Option<&'c str> {
        if provider_source(ctx) {
            return None;
        }
        ctx.category.as_deref().filter(|c| *c != category::OTHER)
    }
}

impl CategorizationRule for ParserAgreementRule {
    fn name(&self) -> &'static str {
        "parser_agreement"
    }

    fn lookups(&self, ctx: &RuleContext<'_>) -> &'static [Lookup] {
        if Self::importer(ctx).is_some() && !Self::file_import(ctx) {
            &[Lookup::Parser]
        } else {
            &[]
        }
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<CategoryResolution> {
        let importer = Self::importer(ctx)?;
        let (parsed, parsed_sub) = if Self::file_import(ctx) {
            (importer.to_string(), ctx.subcategory.clone())
        } else {
            ctx.parsed.clone()?
        };
        if !parsed.eq_ignore_ascii_case(importer) {
            tracing::trace!(%parsed, importer, "parser disagrees with importer");
            return None;
        }
        Some(
            CategoryResolution::new(importer, ClassificationSource::Hybrid, 0.95)
                .with_subcategory(parsed_sub.or_else(|| ctx.subcategory.clone())),
        )
    }
}

/// Importer category taken as-is.
pub struct ImporterCategoryRule;

impl CategorizationRule for ImporterCategoryRule {
    fn name(&self) -> &'static str {
        "importer_category"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<CategoryResolution> {
        if ctx.tx.import_source.as_ref().is_some_and(|s| s.is_provider_taxonomy()) {
            return None;
        }
        let importer = ctx.category.as_deref().filter(|c| *c != category::OTHER)?;
        Some(
            CategoryResolution::new(importer, ClassificationSource::Importer, 0.7)
                .with_subcategory(ctx.subcategory.clone()),
        )
    }
}

/// Detection coordinator outcome, when confident enough.
pub struct MlRule {
    threshold: f64,
}

impl MlRule {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl CategorizationRule for MlRule {
    fn name(&self) -> &'static str {
        "ml"
    }

    fn lookups(&self, _ctx: &RuleContext<'_>) -> &'static [Lookup] {
        &[Lookup::Detection]
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<CategoryResolution> {
        let DetectionOutcome::Detected(detection) = ctx.detection.as_ref()? else {
            return None;
        };
        (detection.confidence >= self.threshold).then(|| {
            CategoryResolution::new(&*detection.category, ClassificationSource::Ml, detection.confidence)
        })
    }
}

/// Category implied by the account family.
pub struct AccountCategoryRule;

impl CategorizationRule for AccountCategoryRule {
    fn name(&self) -> &'static str {
        "account_category"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<CategoryResolution> {
        let kind = &ctx.kind;
        let cat = if kind.investment {
            category::INVESTMENT
        } else if kind.loan || (kind.credit_card && ctx.amount_sign < 0) {
            category::PAYMENT
        } else {
            return None;
        };
        Some(CategoryResolution::new(cat, ClassificationSource::Account, 0.6))
    }
}
