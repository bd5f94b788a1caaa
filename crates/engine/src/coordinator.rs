use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use ledgerlens_core::category::{self, is_expense_category};
use ledgerlens_core::{clamp_unit, non_blank, Amount, TransactionRecord};
use ledgerlens_matching::MatchContext;
use ledgerlens_model::{FeatureInput, Predictor};

use crate::config::DetectionConfig;
use crate::store::ClassifierStore;

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionMethod {
    FuzzyMatch,
    SemanticMatch,
    MlPrediction,
    Combined,
    None,
    Error,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionMethod::FuzzyMatch => write!(f, "FUZZY_MATCH"),
            DetectionMethod::SemanticMatch => write!(f, "SEMANTIC_MATCH"),
            DetectionMethod::MlPrediction => write!(f, "ML_PREDICTION"),
            DetectionMethod::Combined => write!(f, "COMBINED"),
            DetectionMethod::None => write!(f, "NONE"),
            DetectionMethod::Error => write!(f, "ERROR"),
        }
    }
}

/// One detector's (or the fused) category decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub category: String,
    pub confidence: f64,
    pub method: DetectionMethod,
    pub reason: String,
}

impl Detection {
    fn new(category: impl Into<String>, confidence: f64, method: DetectionMethod, reason: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            confidence: clamp_unit(confidence),
            method,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    Detected(Detection),
    NoMatch(String),
    Error(String),
}

impl DetectionOutcome {
    pub fn category(&self) -> Option<&str> {
        match self {
            DetectionOutcome::Detected(d) => Some(&d.category),
            _ => None,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            DetectionOutcome::Detected(d) => d.confidence,
            _ => 0.0,
        }
    }

    pub fn method(&self) -> DetectionMethod {
        match self {
            DetectionOutcome::Detected(d) => d.method,
            DetectionOutcome::NoMatch(_) => DetectionMethod::None,
            DetectionOutcome::Error(_) => DetectionMethod::Error,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            DetectionOutcome::Detected(d) => &d.reason,
            DetectionOutcome::NoMatch(reason) | DetectionOutcome::Error(reason) => reason,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DetectionOutcome::Error(_))
    }

    pub fn is_high_confidence(&self) -> bool {
        self.confidence() >= 0.7
    }

    pub fn is_medium_confidence(&self) -> bool {
        (0.5..0.7).contains(&self.confidence())
    }

    pub fn is_low_confidence(&self) -> bool {
        (0.3..0.5).contains(&self.confidence())
    }
}

/// Detector input. Blank strings are treated as absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectionInput<'a> {
    pub merchant: Option<&'a str>,
    pub description: Option<&'a str>,
    pub amount: Option<Amount>,
    pub channel: Option<&'a str>,
    pub account_type: Option<&'a str>,
    pub account_subtype: Option<&'a str>,
}

impl<'a> DetectionInput<'a> {
    pub fn from_record(tx: &'a TransactionRecord) -> Self {
        let account = tx.account.as_ref();
        Self {
            merchant: non_blank(tx.merchant.as_deref()),
            description: non_blank(tx.description.as_deref()),
            amount: tx.amount,
            channel: non_blank(tx.payment_channel.as_deref()),
            account_type: account.and_then(|a| non_blank(a.account_type.as_deref())),
            account_subtype: account.and_then(|a| non_blank(a.account_subtype.as_deref())),
        }
    }

    fn is_empty(&self) -> bool {
        non_blank(self.merchant).is_none()
            && non_blank(self.description).is_none()
            && self.amount.is_none()
            && non_blank(self.channel).is_none()
    }

    fn amount_sign(&self) -> i8 {
        match self.amount {
            Some(a) if a.is_positive() => 1,
            Some(a) if a.is_negative() => -1,
            _ => 0,
        }
    }
}

// ── Coordinator ──────────────────────────────────────────────────────────────

/// Runs the fuzzy, semantic and ML detectors and fuses their answers.
pub struct DetectionCoordinator {
    store: Arc<ClassifierStore>,
    predictor: Arc<dyn Predictor>,
    config: DetectionConfig,
}

impl DetectionCoordinator {
    pub fn new(store: Arc<ClassifierStore>, config: DetectionConfig) -> Self {
        let predictor: Arc<dyn Predictor> = store.classifier().clone();
        Self::with_predictor(store, predictor, config)
    }

    pub fn with_predictor(
        store: Arc<ClassifierStore>,
        predictor: Arc<dyn Predictor>,
        config: DetectionConfig,
    ) -> Self {
        Self {
            store,
            predictor,
            config,
        }
    }

    pub fn store(&self) -> &Arc<ClassifierStore> {
        &self.store
    }

    /// Detects a category. Never panics: a failure anywhere in the detector
    /// stack comes back as [`DetectionOutcome::Error`].
    pub fn detect(&self, input: &DetectionInput<'_>) -> DetectionOutcome {
        if input.is_empty() {
            return DetectionOutcome::NoMatch("no inputs provided".to_string());
        }
        match catch_unwind(AssertUnwindSafe(|| self.run_detectors(input))) {
            Ok(outcome) => {
                tracing::debug!(
                    method = %outcome.method(),
                    category = outcome.category().unwrap_or("-"),
                    confidence = outcome.confidence(),
                    "detection finished"
                );
                outcome
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(merchant = ?input.merchant, "detection failed: {message}");
                DetectionOutcome::Error(format!("error during detection: {message}"))
            }
        }
    }

    fn run_detectors(&self, input: &DetectionInput<'_>) -> DetectionOutcome {
        let fuzzy = self.fuzzy_detection(input);
        let semantic = self.semantic_detection(input);
        let ml = self.ml_detection(input);
        let high = self.store.string_matcher().config().high_threshold;
        fuse(fuzzy, semantic, ml, input.amount_sign(), high)
    }

    fn fuzzy_detection(&self, input: &DetectionInput<'_>) -> Option<Detection> {
        let (query, field) = match (non_blank(input.merchant), non_blank(input.description)) {
            (Some(m), _) => (m, "merchant"),
            (None, Some(d)) => (d, "description"),
            (None, None) => return None,
        };
        let names = self.store.merchants().names();
        let Some(matched) = self.store.string_matcher().find_best_match(query, &names[..]) else {
            tracing::debug!(query, "no fuzzy match");
            return None;
        };
        let Some(category) = self.store.merchants().get(&matched.candidate) else {
            tracing::warn!(candidate = %matched.candidate, "fuzzy match without a category");
            return None;
        };
        if fuzzy_false_positive(&category, query) {
            tracing::warn!(query, %category, "fuzzy match rejected as a false positive");
            return None;
        }
        tracing::debug!(query, %category, score = matched.combined, "fuzzy match");
        Some(Detection::new(
            category,
            matched.combined,
            DetectionMethod::FuzzyMatch,
            format!("matched {field}: {}", matched.candidate),
        ))
    }

    fn semantic_detection(&self, input: &DetectionInput<'_>) -> Option<Detection> {
        let context = MatchContext {
            amount: input.amount.map(Amount::to_f64),
            channel: input.channel,
            account_type: input.account_type,
            account_subtype: input.account_subtype,
        };
        let result = self
            .store
            .semantic()
            .find_best_semantic_match_with_context(input.merchant, input.description, &context)?;
        tracing::debug!(category = %result.category, similarity = result.similarity, method = %result.method, "semantic match");
        Some(Detection::new(
            result.category,
            result.similarity,
            DetectionMethod::SemanticMatch,
            format!("semantic similarity ({})", result.method),
        ))
    }

    fn ml_detection(&self, input: &DetectionInput<'_>) -> Option<Detection> {
        let amount = feature_amount(input.amount);
        let features = FeatureInput::new(input.merchant, input.description, amount.as_deref(), input.channel);
        let prediction = self.predictor.predict(&features);
        let category = prediction.category?;
        if prediction.confidence < self.config.ml_acceptance_threshold {
            tracing::debug!(%category, confidence = prediction.confidence, "ml prediction below acceptance threshold");
            return None;
        }
        Some(Detection::new(
            category,
            prediction.confidence,
            DetectionMethod::MlPrediction,
            "ml model prediction",
        ))
    }

    /// Trains the classifier with a labelled transaction. Failures are logged
    /// and swallowed.
    pub fn train_model(&self, input: &DetectionInput<'_>, category: Option<&str>) {
        let Some(category) = non_blank(category) else {
            tracing::debug!("skipping training: blank category");
            return;
        };
        let amount = feature_amount(input.amount);
        let features = FeatureInput::new(input.merchant, input.description, amount.as_deref(), input.channel);
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.predictor.train(&features, Some(category)))) {
            tracing::error!("training failed: {}", panic_message(payload.as_ref()));
        }
    }

    /// Adds a merchant to the fuzzy-match dictionary.
    pub fn add_known_merchant(&self, merchant: &str, category: &str) -> bool {
        let added = self.store.merchants().insert(merchant, category);
        if added {
            tracing::info!(merchant, category, "known merchant added");
        }
        added
    }

    pub fn known_merchant_count(&self) -> usize {
        self.store.merchants().len()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ── Fusion ───────────────────────────────────────────────────────────────────

/// Fuzzy matches that are known to mislead: warehouse store locations
/// matching an employer, and airport carts matching a public utility.
fn fuzzy_false_positive(category: &str, text: &str) -> bool {
    let text = text.to_lowercase();
    match category {
        category::INCOME => text.contains("whse") || text.contains("warehouse"),
        category::UTILITIES => {
            text.contains("airport")
                || text.contains("seattleap")
                || text.contains("seattle ap")
                || (text.contains("seattle") && (text.contains("cart") || text.contains("chair")))
        }
        _ => false,
    }
}

/// Exact decimal text of the amount. Display rounds to cents, which would move
/// values such as 9.995 into the next amount bucket.
fn feature_amount(amount: Option<Amount>) -> Option<String> {
    amount.map(|a| a.value().to_string())
}

/// Combines detector results into one outcome. `amount_sign` is -1, 0 or 1.
fn fuse(
    fuzzy: Option<Detection>,
    semantic: Option<Detection>,
    ml: Option<Detection>,
    amount_sign: i8,
    high_threshold: f64,
) -> DetectionOutcome {
    let allowed = |d: &Detection| !(amount_sign < 0 && d.category == category::INCOME);

    if let (Some(f), Some(s), Some(m)) = (&fuzzy, &semantic, &ml) {
        if f.category == s.category && s.category == m.category && allowed(f) {
            let confidence = f.confidence.max(s.confidence).max(m.confidence);
            return DetectionOutcome::Detected(Detection::new(
                f.category.clone(),
                confidence,
                DetectionMethod::Combined,
                "fuzzy, semantic and ml agree",
            ));
        }
    }
    if let Some(f) = fuzzy.as_ref().filter(|f| f.confidence >= high_threshold && allowed(f)) {
        return DetectionOutcome::Detected(f.clone());
    }
    if let Some(s) = semantic.as_ref().filter(|s| allowed(s)) {
        return DetectionOutcome::Detected(s.clone());
    }

    let candidates: Vec<Detection> = [fuzzy, semantic, ml].into_iter().flatten().collect();
    match candidates.as_slice() {
        [] => DetectionOutcome::NoMatch("no detection method found a match".to_string()),
        [only] if allowed(only) => DetectionOutcome::Detected(only.clone()),
        [_] => DetectionOutcome::NoMatch("income rejected for a negative amount".to_string()),
        _ => vote(&candidates, amount_sign, high_threshold),
    }
}

/// Weighted vote between disagreeing detectors.
fn vote(candidates: &[Detection], amount_sign: i8, high_threshold: f64) -> DetectionOutcome {
    let mut scores: HashMap<&str, f64> = HashMap::new();
    for d in candidates {
        let mut weight = if d.method == DetectionMethod::FuzzyMatch && d.confidence >= high_threshold {
            0.7
        } else {
            0.5
        };
        let is_income = d.category == category::INCOME;
        if amount_sign < 0 {
            if is_income {
                weight *= 0.1;
            } else if !is_expense_category(&d.category) {
                weight *= 0.8;
            }
        } else if amount_sign > 0 && is_income {
            weight *= 1.2;
        }
        *scores.entry(d.category.as_str()).or_insert(0.0) += d.confidence * weight;
    }

    let mut ranked: Vec<(&str, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    let best = ranked
        .into_iter()
        .find(|(cat, _)| !(amount_sign < 0 && *cat == category::INCOME));

    match best {
        Some((cat, score)) => DetectionOutcome::Detected(Detection::new(
            cat,
            score.min(1.0),
            DetectionMethod::Combined,
            format!("combined {} methods", candidates.len()),
        )),
        None => DetectionOutcome::NoMatch("income rejected for a negative amount".to_string()),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use ledgerlens_model::PredictionResult;

    fn coordinator() -> DetectionCoordinator {
        let store = Arc::new(ClassifierStore::in_memory(&EngineConfig::default()));
        DetectionCoordinator::new(store, DetectionConfig::default())
    }

    fn input<'a>(merchant: Option<&'a str>, description: Option<&'a str>, amount: Option<f64>, channel: Option<&'a str>) -> DetectionInput<'a> {
        DetectionInput {
            merchant,
            description,
            amount: amount.map(|a| Amount::from_f64(a).unwrap()),
            channel,
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct RecordingPredictor {
        amounts: parking_lot::Mutex<Vec<Option<String>>>,
    }

    impl Predictor for RecordingPredictor {
        fn predict(&self, input: &FeatureInput<'_>) -> PredictionResult {
            self.amounts.lock().push(input.amount.map(str::to_string));
            PredictionResult::empty()
        }

        fn train(&self, input: &FeatureInput<'_>, _: Option<&str>) {
            self.amounts.lock().push(input.amount.map(str::to_string));
        }
    }

    fn det(category: &str, confidence: f64, method: DetectionMethod) -> Detection {
        Detection::new(category, confidence, method, "test")
    }

    struct PanickingPredictor;

    impl Predictor for PanickingPredictor {
        fn predict(&self, _: &FeatureInput<'_>) -> PredictionResult {
            panic!("model exploded")
        }

        fn train(&self, _: &FeatureInput<'_>, _: Option<&str>) {
            panic!("training exploded")
        }
    }

    #[test]
    fn known_merchant_is_a_fuzzy_match() {
        let outcome = coordinator().detect(&input(Some("SAFEWAY #1234"), None, Some(-42.10), None));
        assert_eq!(outcome.method(), DetectionMethod::FuzzyMatch);
        assert_eq!(outcome.category(), Some("groceries"));
        assert!(outcome.confidence() >= 0.85);
        assert!(outcome.reason().contains("merchant"));
    }

    #[test]
    fn description_is_used_when_merchant_is_blank() {
        let outcome = coordinator().detect(&input(Some("  "), Some("NETFLIX.COM"), Some(-15.49), None));
        assert_eq!(outcome.category(), Some("subscriptions"));
        assert!(outcome.reason().contains("description"));
    }

    #[test]
    fn semantic_match_with_context() {
        let outcome = coordinator().detect(&input(Some("COFFEE SHOP"), Some("Coffee"), Some(-4.50), Some("POS")));
        assert_eq!(outcome.method(), DetectionMethod::SemanticMatch);
        assert_eq!(outcome.category(), Some("dining"));
    }

    #[test]
    fn all_detectors_agreeing_is_combined() {
        let c = coordinator();
        for _ in 0..5 {
            c.train_model(&input(Some("SAFEWAY"), Some("Grocery purchase"), Some(-80.0), Some("POS")), Some("groceries"));
        }
        let outcome = c.detect(&input(Some("SAFEWAY"), Some("Grocery purchase"), Some(-75.50), Some("POS")));
        assert_eq!(outcome.method(), DetectionMethod::Combined);
        assert_eq!(outcome.category(), Some("groceries"));
        assert_eq!(outcome.confidence(), 1.0);
    }

    #[test]
    fn empty_input_is_none() {
        let outcome = coordinator().detect(&DetectionInput::default());
        assert_eq!(outcome.method(), DetectionMethod::None);
        assert_eq!(outcome.confidence(), 0.0);
    }

    #[test]
    fn unknown_text_is_none() {
        let outcome = coordinator().detect(&input(Some("qqzx vvkj"), None, None, None));
        assert_eq!(outcome, DetectionOutcome::NoMatch("no detection method found a match".into()));
    }

    #[test]
    fn detector_panic_becomes_error() {
        let store = Arc::new(ClassifierStore::in_memory(&EngineConfig::default()));
        let c = DetectionCoordinator::with_predictor(store, Arc::new(PanickingPredictor), DetectionConfig::default());
        let outcome = c.detect(&input(Some("SAFEWAY"), None, None, None));
        assert!(outcome.is_error());
        assert_eq!(outcome.method(), DetectionMethod::Error);
        assert!(outcome.reason().contains("model exploded"));
        // Training failures are swallowed.
        c.train_model(&input(Some("SAFEWAY"), None, None, None), Some("groceries"));
    }

    #[test]
    fn warehouse_never_matches_income() {
        let c = coordinator();
        assert!(c.add_known_merchant("Zorblax Warehouse", "income"));
        let outcome = c.detect(&input(Some("ZORBLAX WAREHOUSE"), None, Some(-60.0), None));
        assert_ne!(outcome.category(), Some("income"));
    }

    #[test]
    fn false_positive_guards() {
        assert!(fuzzy_false_positive("income", "COSTCO WHSE #0001"));
        assert!(fuzzy_false_positive("utilities", "SEATTLEAP CART/CHAIR"));
        assert!(fuzzy_false_positive("utilities", "Seattle chair rental"));
        assert!(!fuzzy_false_positive("utilities", "Seattle City Light"));
        assert!(!fuzzy_false_positive("groceries", "COSTCO WHSE"));
    }

    #[test]
    fn known_merchants_can_be_added() {
        let c = coordinator();
        let before = c.known_merchant_count();
        assert!(c.add_known_merchant("Blue Door Bakery", "dining"));
        assert!(!c.add_known_merchant("", "dining"));
        assert_eq!(c.known_merchant_count(), before + 1);
        let outcome = c.detect(&input(Some("BLUE DOOR BAKERY"), None, Some(-8.0), None));
        assert_eq!(outcome.category(), Some("dining"));
    }

    #[test]
    fn fuse_prefers_high_fuzzy_over_semantic() {
        let outcome = fuse(
            Some(det("groceries", 0.9, DetectionMethod::FuzzyMatch)),
            Some(det("shopping", 0.95, DetectionMethod::SemanticMatch)),
            None,
            -1,
            0.85,
        );
        assert_eq!(outcome.category(), Some("groceries"));
        assert_eq!(outcome.method(), DetectionMethod::FuzzyMatch);
    }

    #[test]
    fn fuse_votes_between_low_fuzzy_and_ml() {
        let outcome = fuse(
            Some(det("shopping", 0.6, DetectionMethod::FuzzyMatch)),
            None,
            Some(det("groceries", 0.8, DetectionMethod::MlPrediction)),
            -1,
            0.85,
        );
        assert_eq!(outcome.method(), DetectionMethod::Combined);
        assert_eq!(outcome.category(), Some("groceries"));
        assert!((outcome.confidence() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn fuse_never_returns_income_for_negative_amounts() {
        let outcome = fuse(
            Some(det("income", 0.99, DetectionMethod::FuzzyMatch)),
            None,
            Some(det("dining", 0.55, DetectionMethod::MlPrediction)),
            -1,
            0.85,
        );
        assert_eq!(outcome.category(), Some("dining"));

        let outcome = fuse(None, Some(det("income", 0.9, DetectionMethod::SemanticMatch)), None, -1, 0.85);
        assert_eq!(outcome.method(), DetectionMethod::None);

        // Positive amounts keep income.
        let outcome = fuse(None, Some(det("income", 0.9, DetectionMethod::SemanticMatch)), None, 1, 0.85);
        assert_eq!(outcome.category(), Some("income"));
    }

    #[test]
    fn fuse_vote_boosts_income_for_credits() {
        let outcome = fuse(
            Some(det("income", 0.6, DetectionMethod::FuzzyMatch)),
            None,
            Some(det("transfer", 0.65, DetectionMethod::MlPrediction)),
            1,
            0.85,
        );
        // income 0.6*0.5*1.2 = 0.36 beats transfer 0.65*0.5 = 0.325
        assert_eq!(outcome.category(), Some("income"));
    }

    #[test]
    fn outcome_tiers() {
        let o = DetectionOutcome::Detected(det("dining", 0.75, DetectionMethod::SemanticMatch));
        assert!(o.is_high_confidence());
        let o = DetectionOutcome::Detected(det("dining", 0.55, DetectionMethod::SemanticMatch));
        assert!(o.is_medium_confidence());
        let o = DetectionOutcome::Detected(det("dining", 0.35, DetectionMethod::SemanticMatch));
        assert!(o.is_low_confidence());
        assert!(!DetectionOutcome::Error("x".into()).is_high_confidence());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_detection_and_training() {
        let c = Arc::new(coordinator());
        let mut set = tokio::task::JoinSet::new();
        for i in 0..32 {
            let c = Arc::clone(&c);
            set.spawn_blocking(move || {
                let category = if i % 2 == 0 { "groceries" } else { "dining" };
                c.train_model(&input(Some("SAFEWAY"), Some("weekly shop"), Some(-30.0), Some("POS")), Some(category));
                let outcome = c.detect(&input(Some("SAFEWAY"), Some("weekly shop"), Some(-30.0), Some("POS")));
                assert!(!outcome.is_error());
                assert!((0.0..=1.0).contains(&outcome.confidence()));
            });
        }
        while let Some(joined) = set.join_next().await {
            joined.unwrap();
        }
        assert_eq!(c.store().statistics().total_training_samples, 32);
    }

    #[test]
    fn classifier_sees_the_exact_amount() {
        let recorder = Arc::new(RecordingPredictor::default());
        let store = Arc::new(ClassifierStore::in_memory(&EngineConfig::default()));
        let c = DetectionCoordinator::with_predictor(store, recorder.clone(), DetectionConfig::default());
        let record = TransactionRecord {
            merchant: Some("CORNER KIOSK".into()),
            amount: Some(Amount::parse("9.995").unwrap()),
            ..Default::default()
        };
        let input = DetectionInput::from_record(&record);
        c.train_model(&input, Some("shopping"));
        c.detect(&input);

        let seen = recorder.amounts.lock().clone();
        assert_eq!(seen, vec![Some("9.995".to_string()); 2]);
        assert_eq!(ledgerlens_model::features::amount_bucket("9.995"), Some("0-10"));
    }
}
