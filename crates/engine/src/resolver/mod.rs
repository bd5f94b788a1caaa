//! Hybrid type and category resolution.
//!
//! Two ordered rule chains, each first-accepted-wins. A rule result is
//! accepted only when its confidence is strictly above `resolver.rule_floor`.
//!
//! Type chain: account type, credit card payment, indicator, category
//! fallback, then EXPENSE/DEFAULT.
//!
//! Category chain: payment correction (optional), provider taxonomy, parser
//! agreement, importer category, ML, account category, then `other`/DEFAULT.
//!
//! Rules never call out themselves. Each one names the [`Lookup`]s it reads
//! and the resolver fills them in on first use: the free-text parser and the
//! taxonomy mapper run on the blocking pool under a time limit, the detection
//! coordinator additionally behind a circuit breaker. A lookup that panics,
//! stalls or is rejected stays empty and the rules reading it pass.

pub mod category_rules;
pub mod type_rules;

use std::sync::Arc;
use std::time::Duration;

use ledgerlens_core::category::{self, canonical_opt, normalize_opt};
use ledgerlens_core::{
    AccountKind, CategoryResolution, ClassificationSource, ResolvedClassification,
    TransactionRecord, TransactionType, TypeResolution,
};
use ledgerlens_matching::KeywordCategoryParser;

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::collaborators::{
    CategoryParser, CategoryTypeDeterminer, PlaidTaxonomyMapper, RegionKeywords, TaxonomyMapper,
    TaxonomyMapping, TypeDeterminer,
};
use crate::config::EngineConfig;
use crate::coordinator::{DetectionCoordinator, DetectionInput, DetectionOutcome};

use category_rules::{
    AccountCategoryRule, ImporterCategoryRule, MlRule, ParserAgreementRule, PaymentCorrectionRule,
    ProviderTaxonomyRule,
};
use type_rules::{AccountTypeRule, CategoryFallbackRule, CreditCardPaymentRule, IndicatorRule};

// ── Rules ────────────────────────────────────────────────────────────────────

/// Everything a rule may look at for one transaction.
pub struct RuleContext<'a> {
    pub tx: &'a TransactionRecord,
    /// Merchant and description, lowercased.
    pub text: String,
    pub kind: AccountKind,
    /// -1, 0 or 1. Zero when the amount is zero or missing.
    pub amount_sign: i8,
    /// Importer category, mapped onto the category vocabulary.
    pub category: Option<String>,
    pub subcategory: Option<String>,
    /// [`Lookup::Detection`].
    pub detection: Option<DetectionOutcome>,
    /// [`Lookup::Parser`]: `(category, subcategory)` from the free-text parser.
    pub parsed: Option<(String, Option<String>)>,
    /// [`Lookup::Taxonomy`].
    pub taxonomy: Option<TaxonomyMapping>,
}

impl<'a> RuleContext<'a> {
    pub fn new(tx: &'a TransactionRecord) -> Self {
        let amount_sign = match tx.amount {
            Some(a) if a.is_positive() => 1,
            Some(a) if a.is_negative() => -1,
            _ => 0,
        };
        Self {
            tx,
            text: tx.combined_text(),
            kind: tx.account.as_ref().map(|a| a.kind()).unwrap_or_default(),
            amount_sign,
            category: canonical_opt(tx.category.as_deref()),
            subcategory: normalize_opt(tx.subcategory.as_deref()),
            detection: None,
            parsed: None,
            taxonomy: None,
        }
    }
}

pub trait TypeRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<TypeResolution>;
}

/// Collaborator output a category rule reads from its [`RuleContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Detection,
    Parser,
    Taxonomy,
}

pub trait CategorizationRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lookups the rule will read for this transaction. The resolver fills
    /// each one before [`CategorizationRule::evaluate`] runs.
    fn lookups(&self, _ctx: &RuleContext<'_>) -> &'static [Lookup] {
        &[]
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<CategoryResolution>;
}

// ── Resolver ─────────────────────────────────────────────────────────────────

pub struct CategoryTypeResolver {
    coordinator: Arc<DetectionCoordinator>,
    breaker: CircuitBreaker,
    parser: Arc<dyn CategoryParser>,
    mapper: Arc<dyn TaxonomyMapper>,
    collaborator_timeout: Duration,
    type_rules: Vec<Box<dyn TypeRule>>,
    category_rules: Vec<Box<dyn CategorizationRule>>,
    rule_floor: f64,
}

impl CategoryTypeResolver {
    /// Resolver with the default collaborators.
    pub fn new(coordinator: Arc<DetectionCoordinator>, config: &EngineConfig) -> Self {
        Self::builder(coordinator, config).build()
    }

    pub fn builder(coordinator: Arc<DetectionCoordinator>, config: &EngineConfig) -> ResolverBuilder {
        ResolverBuilder {
            coordinator,
            config: config.clone(),
            mapper: Arc::new(PlaidTaxonomyMapper),
            parser: Arc::new(KeywordCategoryParser::default()),
            regions: Arc::new(config.regions.clone()),
            determiner: Arc::new(CategoryTypeDeterminer),
        }
    }

    pub fn coordinator(&self) -> &Arc<DetectionCoordinator> {
        &self.coordinator
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    pub fn type_rule_names(&self) -> Vec<&'static str> {
        self.type_rules.iter().map(|r| r.name()).collect()
    }

    pub fn category_rule_names(&self) -> Vec<&'static str> {
        self.category_rules.iter().map(|r| r.name()).collect()
    }

    /// Resolves the category, then the type. When the importer supplied no
    /// usable category, the resolved one is handed to the type chain as its
    /// category hint.
    pub async fn resolve(&self, tx: &TransactionRecord) -> ResolvedClassification {
        let category = self.resolve_category(tx).await;
        let ty = match type_hint(tx, &category) {
            Some(hinted) => self.resolve_type(&hinted),
            None => self.resolve_type(tx),
        };
        tracing::debug!(
            transaction_type = %ty.transaction_type,
            type_source = %ty.source,
            category = %category.category,
            source = %category.source,
            confidence = category.confidence,
            "transaction resolved"
        );
        ResolvedClassification::from_parts(ty, category)
    }

    pub fn resolve_type(&self, tx: &TransactionRecord) -> TypeResolution {
        let ctx = RuleContext::new(tx);
        for rule in &self.type_rules {
            match rule.evaluate(&ctx) {
                Some(r) if r.confidence > self.rule_floor => {
                    tracing::trace!(rule = rule.name(), transaction_type = %r.transaction_type, "type rule accepted");
                    return r;
                }
                Some(r) => {
                    tracing::trace!(rule = rule.name(), confidence = r.confidence, "type rule below floor");
                }
                None => {}
            }
        }
        TypeResolution::new(TransactionType::Expense, ClassificationSource::Default, 0.5)
    }

    pub async fn resolve_category(&self, tx: &TransactionRecord) -> CategoryResolution {
        let mut ctx = RuleContext::new(tx);
        let mut filled: Vec<Lookup> = Vec::new();
        for rule in &self.category_rules {
            for &lookup in rule.lookups(&ctx) {
                if !filled.contains(&lookup) {
                    self.fill(lookup, &mut ctx).await;
                    filled.push(lookup);
                }
            }
            match rule.evaluate(&ctx) {
                Some(r) if r.confidence > self.rule_floor => {
                    tracing::trace!(rule = rule.name(), category = %r.category, "category rule accepted");
                    return r;
                }
                Some(r) => {
                    tracing::trace!(rule = rule.name(), confidence = r.confidence, "category rule below floor");
                }
                None => {}
            }
        }
        CategoryResolution::new(category::OTHER, ClassificationSource::Default, 0.3)
    }

    async fn fill(&self, lookup: Lookup, ctx: &mut RuleContext<'_>) {
        let tx = ctx.tx;
        match lookup {
            Lookup::Detection => ctx.detection = self.detect(tx).await,
            Lookup::Parser => {
                let parser = Arc::clone(&self.parser);
                let (merchant, description) = (tx.merchant.clone(), tx.description.clone());
                let amount = tx.amount.map(|a| a.to_f64());
                ctx.parsed = self
                    .guarded("parser", move || {
                        parser.parse(merchant.as_deref(), description.as_deref(), amount)
                    })
                    .await
                    .flatten();
            }
            Lookup::Taxonomy => {
                let mapper = Arc::clone(&self.mapper);
                let record = tx.clone();
                ctx.taxonomy = self
                    .guarded("taxonomy", move || {
                        mapper.map(
                            record.category.as_deref(),
                            record.subcategory.as_deref(),
                            record.merchant.as_deref(),
                            record.description.as_deref(),
                        )
                    })
                    .await;
            }
        }
    }

    /// Runs a collaborator call on the blocking pool. `None` when it panics or
    /// outlives `resolver.collaborator_timeout_ms`; a call that times out is
    /// left to finish on its own.
    async fn guarded<T, F>(&self, collaborator: &'static str, call: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(call);
        match tokio::time::timeout(self.collaborator_timeout, task).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::error!(collaborator, "collaborator failed, skipping its rules: {e}");
                None
            }
            Err(_) => {
                tracing::warn!(
                    collaborator,
                    timeout = ?self.collaborator_timeout,
                    "collaborator timed out, skipping its rules"
                );
                None
            }
        }
    }

    /// Runs the coordinator through the breaker. `None` when the breaker
    /// rejects the call, the call times out, or the detector task dies.
    async fn detect(&self, tx: &TransactionRecord) -> Option<DetectionOutcome> {
        let coordinator = Arc::clone(&self.coordinator);
        let record = tx.clone();
        let task = tokio::task::spawn_blocking(move || {
            coordinator.detect(&DetectionInput::from_record(&record))
        });
        let result = self
            .breaker
            .call(task, |joined| joined.as_ref().map_or(true, |o| o.is_error()))
            .await;
        match result {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                tracing::error!("detection task failed: {e}");
                None
            }
            Err(e) => {
                tracing::debug!("skipping ml rule: {e}");
                None
            }
        }
    }
}

fn type_hint(tx: &TransactionRecord, resolved: &CategoryResolution) -> Option<TransactionRecord> {
    if resolved.source == ClassificationSource::Default {
        return None;
    }
    let provider = tx.import_source.as_ref().is_some_and(|s| s.is_provider_taxonomy());
    if !provider && !category::is_blank_or_other(tx.category.as_deref()) {
        return None;
    }
    Some(TransactionRecord {
        category: Some(resolved.category.clone()),
        subcategory: resolved.subcategory.clone().or_else(|| tx.subcategory.clone()),
        ..tx.clone()
    })
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Swaps in custom collaborators before the rule chains are assembled.
pub struct ResolverBuilder {
    coordinator: Arc<DetectionCoordinator>,
    config: EngineConfig,
    mapper: Arc<dyn TaxonomyMapper>,
    parser: Arc<dyn CategoryParser>,
    regions: Arc<dyn RegionKeywords>,
    determiner: Arc<dyn TypeDeterminer>,
}

impl ResolverBuilder {
    pub fn taxonomy_mapper(mut self, mapper: Arc<dyn TaxonomyMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn parser(mut self, parser: Arc<dyn CategoryParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn regions(mut self, regions: Arc<dyn RegionKeywords>) -> Self {
        self.regions = regions;
        self
    }

    pub fn type_determiner(mut self, determiner: Arc<dyn TypeDeterminer>) -> Self {
        self.determiner = determiner;
        self
    }

    pub fn build(self) -> CategoryTypeResolver {
        let resolver = &self.config.resolver;
        let payment_type = resolver.credit_card_payment_type;

        let type_rules: Vec<Box<dyn TypeRule>> = vec![
            Box::new(AccountTypeRule::new(Arc::clone(&self.regions), payment_type)),
            Box::new(CreditCardPaymentRule::new(Arc::clone(&self.regions), payment_type)),
            Box::new(IndicatorRule::new(Arc::clone(&self.determiner))),
            Box::new(CategoryFallbackRule::new(Arc::clone(&self.determiner))),
        ];

        let mut category_rules: Vec<Box<dyn CategorizationRule>> = Vec::new();
        if resolver.payment_correction {
            category_rules.push(Box::new(PaymentCorrectionRule));
        }
        category_rules.push(Box::new(ProviderTaxonomyRule));
        category_rules.push(Box::new(ParserAgreementRule));
        category_rules.push(Box::new(ImporterCategoryRule));
        category_rules.push(Box::new(MlRule::new(resolver.ml_rule_threshold)));
        category_rules.push(Box::new(AccountCategoryRule));

        CategoryTypeResolver {
            coordinator: self.coordinator,
            breaker: CircuitBreaker::new("ml-detection", self.config.breaker.clone()),
            parser: self.parser,
            mapper: self.mapper,
            collaborator_timeout: Duration::from_millis(resolver.collaborator_timeout_ms),
            type_rules,
            category_rules,
            rule_floor: resolver.rule_floor,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
