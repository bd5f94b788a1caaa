use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ledgerlens_matching::{SemanticMatcher, StringMatcher};
use ledgerlens_model::{IncrementalClassifier, ModelError, Statistics};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::config::EngineConfig;

const DEFAULT_KNOWN_MERCHANTS: &str = include_str!("../data/known_merchants.toml");

#[derive(Deserialize)]
struct MerchantFile {
    #[serde(default)]
    merchants: BTreeMap<String, Vec<String>>,
}

fn merchant_key(name: &str) -> Option<String> {
    let key = name.trim().to_lowercase();
    (!key.is_empty()).then_some(key)
}

/// Known merchant name -> category. Keys are lowercased and trimmed.
pub struct MerchantDictionary {
    entries: DashMap<String, String>,
    /// Sorted keys of `entries`, replaced whenever a new name is added.
    names: RwLock<Arc<[String]>>,
}

impl Default for MerchantDictionary {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            names: RwLock::new(Arc::from(Vec::new())),
        }
    }
}

impl MerchantDictionary {
    /// The bundled seed table. Categories load in name order; a merchant
    /// listed under more than one keeps the first.
    pub fn bundled() -> Self {
        let file: MerchantFile =
            toml::from_str(DEFAULT_KNOWN_MERCHANTS).expect("bundled known_merchants.toml is valid");
        let dict = Self::default();
        let mut names = Vec::new();
        for (category, merchants) in &file.merchants {
            let Some(category) = merchant_key(category) else {
                continue;
            };
            for key in merchants.iter().filter_map(|n| merchant_key(n)) {
                match dict.entries.entry(key) {
                    Entry::Occupied(existing) => {
                        tracing::warn!(
                            merchant = %existing.key(),
                            kept = %existing.get(),
                            ignored = %category,
                            "merchant listed under two categories"
                        );
                    }
                    Entry::Vacant(slot) => {
                        names.push(slot.key().clone());
                        slot.insert(category.clone());
                    }
                }
            }
        }
        names.sort();
        *dict.names.write() = names.into();
        dict
    }

    /// Adds or replaces an entry. Blank names or categories are ignored.
    pub fn insert(&self, merchant: &str, category: &str) -> bool {
        let (Some(key), Some(category)) = (merchant_key(merchant), merchant_key(category)) else {
            return false;
        };
        if self.entries.insert(key.clone(), category).is_none() {
            let mut names = self.names.write();
            if let Err(pos) = names.binary_search(&key) {
                let mut updated = names.to_vec();
                updated.insert(pos, key);
                *names = updated.into();
            }
        }
        true
    }

    pub fn get(&self, merchant: &str) -> Option<String> {
        self.entries.get(&merchant_key(merchant)?).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted merchant names, for deterministic matching. Shared, not copied.
    pub fn names(&self) -> Arc<[String]> {
        self.names.read().clone()
    }
}

/// Long-lived shared state of the engine: matchers, the cluster registry,
/// the known-merchant dictionary and the classifier counters.
///
/// Built once at startup and handed to the coordinator and resolver behind an
/// `Arc`.
pub struct ClassifierStore {
    string_matcher: StringMatcher,
    semantic: SemanticMatcher,
    merchants: MerchantDictionary,
    classifier: Arc<IncrementalClassifier>,
}

impl ClassifierStore {
    /// Builds the store and loads the persisted model, if any. A model that
    /// cannot be read is logged and replaced by an empty one.
    pub fn open(config: &EngineConfig) -> Self {
        let classifier = match config.model.model_path() {
            Some(path) => IncrementalClassifier::with_path(path, config.model.autosave_every),
            None => IncrementalClassifier::in_memory(),
        };
        if let Err(e) = classifier.load_model() {
            tracing::warn!("could not load category model, starting empty: {e}");
        }
        Self::with_classifier(config, classifier)
    }

    /// A store whose model lives only in memory.
    pub fn in_memory(config: &EngineConfig) -> Self {
        Self::with_classifier(config, IncrementalClassifier::in_memory())
    }

    pub fn with_classifier(config: &EngineConfig, classifier: IncrementalClassifier) -> Self {
        let store = Self {
            string_matcher: StringMatcher::new(config.matching.clone()),
            semantic: SemanticMatcher::with_default_clusters(config.semantic.clone()),
            merchants: MerchantDictionary::bundled(),
            classifier: Arc::new(classifier),
        };
        tracing::info!(
            merchants = store.merchants.len(),
            clusters = store.semantic.categories().len(),
            samples = store.classifier.total_samples(),
            "classifier store ready"
        );
        store
    }

    pub fn string_matcher(&self) -> &StringMatcher {
        &self.string_matcher
    }

    pub fn semantic(&self) -> &SemanticMatcher {
        &self.semantic
    }

    pub fn merchants(&self) -> &MerchantDictionary {
        &self.merchants
    }

    pub fn classifier(&self) -> &Arc<IncrementalClassifier> {
        &self.classifier
    }

    pub fn statistics(&self) -> Statistics {
        self.classifier.statistics()
    }

    pub fn save_model(&self) -> Result<(), ModelError> {
        self.classifier.save_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_dictionary_loads() {
        let dict = MerchantDictionary::bundled();
        assert!(dict.len() > 100);
        assert_eq!(dict.get("SAFEWAY").as_deref(), Some("groceries"));
        assert_eq!(dict.get("  Netflix ").as_deref(), Some("subscriptions"));
        let names = dict.names();
        assert!(names.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn insert_normalizes_and_rejects_blanks() {
        let dict = MerchantDictionary::default();
        assert!(dict.insert("  Blue Door Bakery ", "Dining"));
        assert_eq!(dict.get("blue door bakery").as_deref(), Some("dining"));
        assert!(!dict.insert("  ", "dining"));
        assert!(!dict.insert("x", ""));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn names_follow_inserts_in_order() {
        let dict = MerchantDictionary::default();
        dict.insert("Zeta Bikes", "shopping");
        dict.insert("alpha books", "shopping");
        let before = dict.names();
        dict.insert("ALPHA BOOKS", "entertainment");
        assert!(Arc::ptr_eq(&before, &dict.names()));
        dict.insert("mid market", "groceries");
        assert_eq!(&dict.names()[..], ["alpha books", "mid market", "zeta bikes"]);
        assert_eq!(dict.get("alpha books").as_deref(), Some("entertainment"));
    }

    #[test]
    fn bundled_categories_resolve_the_same_every_time() {
        let first = MerchantDictionary::bundled();
        let second = MerchantDictionary::bundled();
        assert_eq!(first.names(), second.names());
        for name in first.names().iter() {
            assert_eq!(first.get(name), second.get(name));
        }
    }

    #[test]
    fn concurrent_inserts_and_lookups() {
        let dict = MerchantDictionary::bundled();
        let seeded = dict.len();
        std::thread::scope(|s| {
            for t in 0..4 {
                let dict = &dict;
                s.spawn(move || {
                    for i in 0..50 {
                        assert!(dict.insert(&format!("shop {t}-{i}"), "shopping"));
                    }
                });
            }
            for _ in 0..4 {
                let dict = &dict;
                s.spawn(move || {
                    for _ in 0..50 {
                        assert_eq!(dict.get("safeway").as_deref(), Some("groceries"));
                        let names = dict.names();
                        assert!(names.windows(2).all(|w| w[0] < w[1]));
                    }
                });
            }
        });
        assert_eq!(dict.len(), seeded + 200);
        assert_eq!(dict.names().len(), seeded + 200);
    }

    #[test]
    fn open_with_unreadable_model_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ledgerlens_model::MODEL_FILE_NAME), "{broken").unwrap();
        let mut config = EngineConfig::default();
        config.model.dir = Some(dir.path().to_path_buf());
        let store = ClassifierStore::open(&config);
        assert_eq!(store.statistics().total_training_samples, 0);
    }

    #[test]
    fn in_memory_store_cannot_save() {
        let store = ClassifierStore::in_memory(&EngineConfig::default());
        assert!(matches!(store.save_model(), Err(ModelError::PersistenceDisabled)));
    }
}
