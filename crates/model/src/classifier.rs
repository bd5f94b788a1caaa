use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use ledgerlens_core::clamp_unit;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::features::{FeatureInput, Features};
use crate::persist::{self, CounterMap, ModelError, ModelSnapshot, SNAPSHOT_VERSION};

pub const MERCHANT_WEIGHT: f64 = 0.4;
pub const KEYWORD_WEIGHT: f64 = 0.3;
pub const AMOUNT_WEIGHT: f64 = 0.15;
pub const CHANNEL_WEIGHT: f64 = 0.15;

const TOP_K: usize = 3;

// ── Counter tables ───────────────────────────────────────────────────────────

#[derive(Default)]
struct CounterRow {
    cells: DashMap<String, AtomicU64>,
}

impl CounterRow {
    fn increment(&self, category: &str) {
        if let Some(cell) = self.cells.get(category) {
            cell.fetch_add(1, Ordering::AcqRel);
            return;
        }
        self.cells
            .entry(category.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::AcqRel);
    }

    fn counts(&self) -> Vec<(String, u64)> {
        self.cells
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Acquire)))
            .collect()
    }
}

/// feature -> category -> count, sharded at both levels. Adding a key locks
/// one shard; increments of existing keys only take a shard read lock.
#[derive(Default)]
struct FeatureTable {
    rows: DashMap<String, Arc<CounterRow>>,
}

impl FeatureTable {
    fn row(&self, feature: &str) -> Arc<CounterRow> {
        if let Some(row) = self.rows.get(feature) {
            return Arc::clone(row.value());
        }
        Arc::clone(self.rows.entry(feature.to_string()).or_default().value())
    }

    fn increment(&self, feature: &str, category: &str) {
        self.row(feature).increment(category);
    }

    fn counts(&self, feature: &str) -> Option<Vec<(String, u64)>> {
        let row = self.rows.get(feature).map(|r| Arc::clone(r.value()))?;
        Some(row.counts())
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn snapshot(&self) -> CounterMap {
        let rows: Vec<(String, Arc<CounterRow>)> = self
            .rows
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        rows.into_iter()
            .map(|(feature, row)| (feature, row.counts().into_iter().collect::<BTreeMap<_, _>>()))
            .collect()
    }

    fn replace(&self, counts: &CounterMap) {
        self.rows.clear();
        for (feature, cells) in counts {
            let row = CounterRow {
                cells: cells
                    .iter()
                    .map(|(cat, n)| (cat.clone(), AtomicU64::new(*n)))
                    .collect(),
            };
            self.rows.insert(feature.clone(), Arc::new(row));
        }
    }

    /// Adds `weight * count / row_total` for every category seen with `feature`.
    fn accumulate(&self, feature: &str, weight: f64, scores: &mut HashMap<String, f64>) {
        let Some(counts) = self.counts(feature) else {
            return;
        };
        let total: u64 = counts.iter().map(|(_, n)| n).sum();
        if total == 0 {
            return;
        }
        for (category, n) in counts {
            if n > 0 {
                *scores.entry(category).or_insert(0.0) += weight * n as f64 / total as f64;
            }
        }
    }
}

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryScore {
    pub category: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub category: Option<String>,
    pub confidence: f64,
    /// Up to three best categories, highest first.
    pub alternatives: Vec<CategoryScore>,
}

impl PredictionResult {
    pub fn empty() -> Self {
        Self {
            category: None,
            confidence: 0.0,
            alternatives: Vec::new(),
        }
    }

    pub fn is_high_confidence(&self) -> bool {
        self.confidence >= 0.7
    }

    pub fn is_medium_confidence(&self) -> bool {
        (0.5..0.7).contains(&self.confidence)
    }

    pub fn is_low_confidence(&self) -> bool {
        (0.3..0.5).contains(&self.confidence)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_training_samples: u64,
    pub merchants: usize,
    pub keywords: usize,
    pub amount_ranges: usize,
    pub payment_channels: usize,
}

/// Anything that can score and learn from transactions. Implemented by
/// [`IncrementalClassifier`]; the detection layer holds it as a trait object.
pub trait Predictor: Send + Sync {
    fn predict(&self, input: &FeatureInput<'_>) -> PredictionResult;
    fn train(&self, input: &FeatureInput<'_>, category: Option<&str>);
}

// ── Classifier ───────────────────────────────────────────────────────────────

/// Online frequency classifier over four feature families.
pub struct IncrementalClassifier {
    merchants: FeatureTable,
    keywords: FeatureTable,
    amounts: FeatureTable,
    channels: FeatureTable,
    total: AtomicU64,
    model_path: Option<PathBuf>,
    autosave_every: u64,
    save_lock: Mutex<()>,
}

impl Default for IncrementalClassifier {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl IncrementalClassifier {
    /// A classifier that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            merchants: FeatureTable::default(),
            keywords: FeatureTable::default(),
            amounts: FeatureTable::default(),
            channels: FeatureTable::default(),
            total: AtomicU64::new(0),
            model_path: None,
            autosave_every: 0,
            save_lock: Mutex::new(()),
        }
    }

    /// A classifier persisted at `model_path`, saved automatically every
    /// `autosave_every` samples (0 disables autosave).
    pub fn with_path(model_path: impl Into<PathBuf>, autosave_every: u64) -> Self {
        Self {
            model_path: Some(model_path.into()),
            autosave_every,
            ..Self::in_memory()
        }
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    pub fn total_samples(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Records one labelled sample. Blank categories are ignored.
    pub fn train(&self, input: &FeatureInput<'_>, category: Option<&str>) {
        let Some(category) = category.map(str::trim).filter(|c| !c.is_empty()) else {
            return;
        };
        let category = category.to_lowercase();
        let features = input.extract();

        if let Some(merchant) = &features.merchant {
            self.merchants.increment(merchant, &category);
        }
        for keyword in &features.keywords {
            self.keywords.increment(keyword, &category);
        }
        if let Some(bucket) = features.amount_bucket {
            self.amounts.increment(bucket, &category);
        }
        if let Some(channel) = &features.channel {
            self.channels.increment(channel, &category);
        }

        let total = self.total.fetch_add(1, Ordering::AcqRel) + 1;
        if self.autosave_every > 0 && self.model_path.is_some() && total % self.autosave_every == 0 {
            if let Err(e) = self.save_model() {
                tracing::warn!("autosave of category model failed: {e}");
            }
        }
    }

    pub fn predict(&self, input: &FeatureInput<'_>) -> PredictionResult {
        self.predict_features(&input.extract())
    }

    fn predict_features(&self, features: &Features) -> PredictionResult {
        let mut scores: HashMap<String, f64> = HashMap::new();

        if let Some(merchant) = &features.merchant {
            self.merchants.accumulate(merchant, MERCHANT_WEIGHT, &mut scores);
        }
        for keyword in &features.keywords {
            self.keywords.accumulate(keyword, KEYWORD_WEIGHT, &mut scores);
        }
        if let Some(bucket) = features.amount_bucket {
            self.amounts.accumulate(bucket, AMOUNT_WEIGHT, &mut scores);
        }
        if let Some(channel) = &features.channel {
            self.channels.accumulate(channel, CHANNEL_WEIGHT, &mut scores);
        }

        if scores.is_empty() {
            return PredictionResult::empty();
        }

        let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let confidence = clamp_unit(ranked[0].1);
        let alternatives = ranked
            .iter()
            .take(TOP_K)
            .map(|(category, score)| CategoryScore {
                category: category.clone(),
                score: clamp_unit(*score),
            })
            .collect();
        let category = ranked.swap_remove(0).0;
        tracing::debug!(%category, confidence, "classifier prediction");

        PredictionResult {
            category: Some(category),
            confidence,
            alternatives,
        }
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            total_training_samples: self.total_samples(),
            merchants: self.merchants.len(),
            keywords: self.keywords.len(),
            amount_ranges: self.amounts.len(),
            payment_channels: self.channels.len(),
        }
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Some(Utc::now()),
            total_training_samples: self.total_samples(),
            merchant_category_counts: self.merchants.snapshot(),
            keyword_category_counts: self.keywords.snapshot(),
            amount_range_category_counts: self.amounts.snapshot(),
            payment_channel_category_counts: self.channels.snapshot(),
        }
    }

    /// Replaces all counters with the contents of `snapshot`.
    pub fn restore(&self, snapshot: &ModelSnapshot) {
        self.merchants.replace(&snapshot.merchant_category_counts);
        self.keywords.replace(&snapshot.keyword_category_counts);
        self.amounts.replace(&snapshot.amount_range_category_counts);
        self.channels.replace(&snapshot.payment_channel_category_counts);
        self.total.store(snapshot.total_training_samples, Ordering::Release);
    }

    pub fn save_model(&self) -> Result<(), ModelError> {
        let path = self.model_path.as_deref().ok_or(ModelError::PersistenceDisabled)?;
        let _guard = self.save_lock.lock();
        let snapshot = self.snapshot();
        persist::write_snapshot(path, &snapshot)?;
        tracing::info!(
            samples = snapshot.total_training_samples,
            merchants = snapshot.merchant_category_counts.len(),
            keywords = snapshot.keyword_category_counts.len(),
            "category model saved to {}",
            path.display()
        );
        Ok(())
    }

    /// Loads the model file if it exists. Returns whether anything was loaded.
    pub fn load_model(&self) -> Result<bool, ModelError> {
        let Some(path) = self.model_path.as_deref() else {
            return Ok(false);
        };
        let _guard = self.save_lock.lock();
        match persist::read_snapshot(path)? {
            Some(snapshot) => {
                self.restore(&snapshot);
                tracing::info!(
                    samples = snapshot.total_training_samples,
                    "category model loaded from {}",
                    path.display()
                );
                Ok(true)
            }
            None => {
                tracing::info!("no category model at {}, starting empty", path.display());
                Ok(false)
            }
        }
    }
}

impl Predictor for IncrementalClassifier {
    fn predict(&self, input: &FeatureInput<'_>) -> PredictionResult {
        IncrementalClassifier::predict(self, input)
    }

    fn train(&self, input: &FeatureInput<'_>, category: Option<&str>) {
        IncrementalClassifier::train(self, input, category)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tx<'a>(merchant: &'a str, description: &'a str, amount: &'a str, channel: &'a str) -> FeatureInput<'a> {
        FeatureInput::new(Some(merchant), Some(description), Some(amount), Some(channel))
    }

    fn trained() -> IncrementalClassifier {
        let model = IncrementalClassifier::in_memory();
        for amount in ["75.00", "82.10", "90.00"] {
            model.train(&tx("SAFEWAY", "Grocery purchase", amount, "POS"), Some("groceries"));
        }
        model.train(&tx("STARBUCKS", "Coffee", "4.50", "POS"), Some("dining"));
        model
    }

    #[test]
    fn predicts_trained_category() {
        let model = trained();
        let result = model.predict(&tx("SAFEWAY", "Grocery purchase", "75.50", "POS"));
        assert_eq!(result.category.as_deref(), Some("groceries"));
        assert!(result.confidence > 0.0);
        assert!(result.confidence <= 1.0);
        assert!(result.alternatives.len() <= 3);
        assert_eq!(result.alternatives[0].category, "groceries");
    }

    #[test]
    fn full_feature_agreement_is_confident() {
        let model = trained();
        // merchant 0.4 + two keywords 0.6 + amount 0.15 + channel 0.75*0.15, capped at 1.
        let result = model.predict(&tx("SAFEWAY", "Grocery purchase", "80", "POS"));
        assert_eq!(result.confidence, 1.0);
        assert!(result.is_high_confidence());
    }

    #[test]
    fn empty_model_predicts_nothing() {
        let model = IncrementalClassifier::in_memory();
        let result = model.predict(&tx("SAFEWAY", "Grocery", "10", "POS"));
        assert_eq!(result, PredictionResult::empty());
    }

    #[test]
    fn unknown_features_predict_nothing() {
        let model = trained();
        let result = model.predict(&FeatureInput::new(Some("UNSEEN"), Some("zz"), None, None));
        assert!(result.category.is_none());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn blank_category_is_ignored() {
        let model = IncrementalClassifier::in_memory();
        model.train(&tx("SAFEWAY", "Grocery", "10", "POS"), None);
        model.train(&tx("SAFEWAY", "Grocery", "10", "POS"), Some("   "));
        assert_eq!(model.total_samples(), 0);
        assert_eq!(model.statistics().merchants, 0);
    }

    #[test]
    fn unparsable_amount_skips_only_amount_feature() {
        let model = IncrementalClassifier::in_memory();
        model.train(&tx("SAFEWAY", "Grocery", "not-a-number", "POS"), Some("groceries"));
        let stats = model.statistics();
        assert_eq!(stats.total_training_samples, 1);
        assert_eq!(stats.merchants, 1);
        assert_eq!(stats.amount_ranges, 0);
        assert_eq!(stats.payment_channels, 1);
    }

    #[test]
    fn ties_break_by_category_name() {
        let model = IncrementalClassifier::in_memory();
        model.train(&FeatureInput::new(Some("SHOP"), None, None, None), Some("zeta"));
        model.train(&FeatureInput::new(Some("SHOP"), None, None, None), Some("alpha"));
        let result = model.predict(&FeatureInput::new(Some("SHOP"), None, None, None));
        assert_eq!(result.category.as_deref(), Some("alpha"));
        assert!((result.confidence - 0.2).abs() < 1e-9);
        assert_eq!(result.alternatives[1].category, "zeta");
    }

    #[test]
    fn confidence_tiers() {
        let mut r = PredictionResult::empty();
        r.confidence = 0.75;
        assert!(r.is_high_confidence());
        r.confidence = 0.6;
        assert!(r.is_medium_confidence());
        r.confidence = 0.35;
        assert!(r.is_low_confidence());
        r.confidence = 0.1;
        assert!(!r.is_low_confidence() && !r.is_medium_confidence());
    }

    #[test]
    fn save_load_roundtrip_predicts_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join(persist::MODEL_FILE_NAME);

        let model = IncrementalClassifier::with_path(&path, 0);
        for amount in ["75.00", "82.10", "90.00"] {
            model.train(&tx("SAFEWAY", "Grocery purchase", amount, "POS"), Some("groceries"));
        }
        model.train(&tx("SAFEWAY", "Gift cards", "50", "POS"), Some("shopping"));
        let query = tx("SAFEWAY", "Grocery purchase", "75.50", "POS");
        let before = model.predict(&query);
        model.save_model().unwrap();

        let fresh = IncrementalClassifier::with_path(&path, 0);
        assert!(fresh.load_model().unwrap());
        assert_eq!(fresh.predict(&query), before);
        assert_eq!(fresh.statistics(), model.statistics());
    }

    #[test]
    fn load_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let model = IncrementalClassifier::with_path(dir.path().join("absent.json"), 0);
        assert!(!model.load_model().unwrap());
        assert_eq!(model.total_samples(), 0);
    }

    #[test]
    fn load_replaces_existing_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(persist::MODEL_FILE_NAME);
        let saved = IncrementalClassifier::with_path(&path, 0);
        saved.train(&tx("QFC", "Grocery", "20", "POS"), Some("groceries"));
        saved.save_model().unwrap();

        let model = IncrementalClassifier::with_path(&path, 0);
        model.train(&tx("SHELL", "Fuel", "40", "POS"), Some("transportation"));
        assert!(model.load_model().unwrap());
        assert_eq!(model.total_samples(), 1);
        let shell = model.predict(&FeatureInput::new(Some("SHELL"), None, None, None));
        assert!(shell.category.is_none());
    }

    #[test]
    fn in_memory_save_is_disabled() {
        let model = IncrementalClassifier::in_memory();
        assert!(matches!(model.save_model(), Err(ModelError::PersistenceDisabled)));
        assert!(!model.load_model().unwrap());
    }

    #[test]
    fn autosave_every_n_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(persist::MODEL_FILE_NAME);
        let model = IncrementalClassifier::with_path(&path, 3);
        model.train(&tx("A", "one", "1", "pos"), Some("x"));
        model.train(&tx("B", "two", "2", "pos"), Some("x"));
        assert!(!path.exists());
        model.train(&tx("C", "three", "3", "pos"), Some("x"));
        assert!(path.exists());
        let snapshot = persist::read_snapshot(&path).unwrap().unwrap();
        assert_eq!(snapshot.total_training_samples, 3);
    }

    #[test]
    fn autosave_failure_does_not_fail_training() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        // Parent "directory" is a regular file, so saving must fail.
        let model = IncrementalClassifier::with_path(blocker.join(persist::MODEL_FILE_NAME), 1);
        model.train(&tx("A", "one", "1", "pos"), Some("x"));
        assert_eq!(model.total_samples(), 1);
    }

    #[test]
    fn concurrent_training_loses_no_updates() {
        let model = IncrementalClassifier::in_memory();
        let threads = 8;
        let per_thread = 250;
        std::thread::scope(|s| {
            for t in 0..threads {
                let model = &model;
                s.spawn(move || {
                    for i in 0..per_thread {
                        let category = if i % 2 == 0 { "groceries" } else { "dining" };
                        let blank = if t == 0 && i % 10 == 0 { Some(" ") } else { Some(category) };
                        model.train(&tx("SAFEWAY", "shared words", "12", "POS"), blank);
                        let p = model.predict(&tx("SAFEWAY", "shared words", "12", "POS"));
                        assert!(p.confidence.is_finite());
                        assert!((0.0..=1.0).contains(&p.confidence));
                    }
                });
            }
        });

        let skipped = (0..per_thread).filter(|i| i % 10 == 0).count() as u64;
        let expected = threads * per_thread as u64 - skipped;
        assert_eq!(model.total_samples(), expected);
        let merchant_total: u64 = model.snapshot().merchant_category_counts["safeway"].values().sum();
        assert_eq!(merchant_total, expected);
    }

    #[test]
    fn new_keys_do_not_disturb_readers() {
        let model = trained();
        std::thread::scope(|s| {
            for t in 0..4 {
                let model = &model;
                s.spawn(move || {
                    for i in 0..100 {
                        let merchant = format!("NEW SHOP {t} {i}");
                        model.train(&tx(&merchant, &format!("item{i}"), "30", "ONLINE"), Some("shopping"));
                    }
                });
            }
            for _ in 0..4 {
                let model = &model;
                s.spawn(move || {
                    for _ in 0..100 {
                        let p = model.predict(&tx("SAFEWAY", "Grocery purchase", "80.00", "POS"));
                        assert_eq!(p.category.as_deref(), Some("groceries"));
                    }
                });
            }
        });
        assert!(model.statistics().merchants >= 402);
    }
}
