use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use ledgerlens_core::{clamp_unit, AccountKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::string_matcher::MAX_TEXT_LEN;

const DEFAULT_CLUSTERS: &str = include_str!("../data/clusters.toml");
const MAX_WORDS: usize = 1_000;
const MIN_TOKEN_LEN: usize = 2;
const MAX_TOKEN_LEN: usize = 100;

/// Abbreviations seen in bank descriptions and the words they stand for.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("cafe", &["coffee"]),
    ("caffe", &["cafe", "coffee"]),
    ("resto", &["restaurant"]),
    ("rstrnt", &["restaurant"]),
    ("groc", &["grocery"]),
    ("mkt", &["market"]),
    ("mkts", &["market"]),
    ("pmt", &["payment"]),
    ("pymt", &["payment"]),
    ("xfer", &["transfer"]),
    ("xfr", &["transfer"]),
    ("trf", &["transfer"]),
    ("dep", &["deposit"]),
    ("pharm", &["pharmacy"]),
    ("rx", &["pharmacy"]),
    ("util", &["utility"]),
    ("elec", &["electric"]),
    ("subscr", &["subscription"]),
    ("div", &["dividend"]),
    ("invest", &["investment"]),
];

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_toast_pos, r"(?i)\bTST\s*\*|\bTST\s");
re!(re_square_pos, r"(?i)\bSQ\s*\*");
re!(re_square_business, r"(?i)\bsquare\s+(payment|invoice|subscription|terminal)");

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Failed to parse cluster TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// Minimum similarity for a category to be returned.
    pub threshold: f64,
    /// Upper bound on the summed context boost.
    pub max_context_boost: f64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            max_context_boost: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SemanticMethod {
    Cluster,
    ContextAware,
    ToastPos,
    SquarePos,
}

impl std::fmt::Display for SemanticMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SemanticMethod::Cluster => write!(f, "SEMANTIC"),
            SemanticMethod::ContextAware => write!(f, "SEMANTIC_CONTEXT_AWARE"),
            SemanticMethod::ToastPos => write!(f, "POS_CODE_TST"),
            SemanticMethod::SquarePos => write!(f, "POS_CODE_SQ"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticResult {
    pub category: String,
    /// Similarity after context boosts, in `[0, 1]`.
    pub similarity: f64,
    pub method: SemanticMethod,
}

/// Transaction context used to nudge cluster similarity.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchContext<'a> {
    pub amount: Option<f64>,
    pub channel: Option<&'a str>,
    pub account_type: Option<&'a str>,
    pub account_subtype: Option<&'a str>,
}

// ── Cluster registry ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Cluster {
    entries: HashSet<String>,
    /// Multi-word entries with their word counts, longest first.
    phrases: Vec<(String, usize)>,
}

impl Cluster {
    fn from_entries(entries: HashSet<String>) -> Self {
        let mut phrases: Vec<(String, usize)> = entries
            .iter()
            .filter_map(|e| {
                let n = e.split(' ').count();
                (n >= 2).then(|| (e.clone(), n))
            })
            .collect();
        phrases.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Self { entries, phrases }
    }
}

#[derive(Deserialize)]
struct ClusterFile {
    clusters: BTreeMap<String, Vec<String>>,
}

/// Keyword-cluster matcher. The registry is a sharded map shared by every
/// caller; writers replace a category's cluster wholesale so readers always
/// see a complete set.
pub struct SemanticMatcher {
    clusters: DashMap<String, Arc<Cluster>>,
    config: SemanticConfig,
}

impl Default for SemanticMatcher {
    fn default() -> Self {
        Self::with_default_clusters(SemanticConfig::default())
    }
}

impl SemanticMatcher {
    /// An empty registry.
    pub fn new(config: SemanticConfig) -> Self {
        Self {
            clusters: DashMap::new(),
            config,
        }
    }

    /// A registry seeded with the bundled cluster table.
    pub fn with_default_clusters(config: SemanticConfig) -> Self {
        let matcher = Self::new(config);
        matcher
            .load_clusters_toml(DEFAULT_CLUSTERS)
            .expect("bundled clusters.toml is valid");
        matcher
    }

    pub fn config(&self) -> &SemanticConfig {
        &self.config
    }

    /// Merges every `[clusters]` entry of a TOML document into the registry.
    /// Returns the number of categories touched.
    pub fn load_clusters_toml(&self, content: &str) -> Result<usize, ClusterError> {
        let file: ClusterFile = toml::from_str(content)?;
        let count = file.clusters.len();
        for (category, keywords) in file.clusters {
            self.add_semantic_cluster(&category, &keywords);
        }
        Ok(count)
    }

    /// Registers `category` or merges `keywords` into its existing cluster.
    /// Blank categories and keyword lists without any usable keyword are ignored.
    pub fn add_semantic_cluster<S: AsRef<str>>(&self, category: &str, keywords: &[S]) {
        let Some(category) = canonical_category(category) else {
            return;
        };
        let additions: HashSet<String> = keywords
            .iter()
            .filter_map(|k| canonical_phrase(k.as_ref()))
            .collect();
        if additions.is_empty() {
            return;
        }

        // The entry guard serializes merges into this category only.
        let mut slot = self.clusters.entry(category.clone()).or_default();
        let mut entries = slot.entries.clone();
        let before = entries.len();
        entries.extend(additions);
        tracing::debug!(%category, added = entries.len() - before, "semantic cluster updated");
        *slot = Arc::new(Cluster::from_entries(entries));
    }

    /// A copy of the keywords registered for `category`.
    pub fn semantic_cluster(&self, category: &str) -> Option<HashSet<String>> {
        let category = canonical_category(category)?;
        self.clusters.get(&category).map(|c| c.entries.clone())
    }

    /// Registered category names, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clusters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    // ── Matching ──────────────────────────────────────────────────────────────

    pub fn find_best_semantic_match(
        &self,
        merchant: Option<&str>,
        description: Option<&str>,
    ) -> Option<SemanticResult> {
        let text = combine(merchant, description)?;
        if let Some(pos) = pos_code_match(&text) {
            return Some(pos);
        }
        let features = TextFeatures::new(&text)?;
        self.best_over_clusters(&features, |_| 0.0, SemanticMethod::Cluster)
    }

    pub fn find_best_semantic_match_with_context(
        &self,
        merchant: Option<&str>,
        description: Option<&str>,
        context: &MatchContext<'_>,
    ) -> Option<SemanticResult> {
        let text = combine(merchant, description)?;
        if let Some(pos) = pos_code_match(&text) {
            return Some(pos);
        }
        let features = TextFeatures::new(&text)?;
        let cap = self.config.max_context_boost.max(0.0);
        self.best_over_clusters(
            &features,
            |category| context_boost(category, context).min(cap),
            SemanticMethod::ContextAware,
        )
    }

    fn best_over_clusters(
        &self,
        features: &TextFeatures,
        boost: impl Fn(&str) -> f64,
        method: SemanticMethod,
    ) -> Option<SemanticResult> {
        let mut snapshot: Vec<(String, Arc<Cluster>)> = self
            .clusters
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));

        let mut best: Option<(String, f64)> = None;
        for (category, cluster) in &snapshot {
            let base = base_similarity(features, cluster);
            if base <= 0.0 {
                continue;
            }
            let score = clamp_unit(base + boost(category));
            if best.as_ref().map_or(true, |(_, s)| score > *s) {
                best = Some((category.clone(), score));
            }
        }

        let (category, similarity) = best?;
        if similarity >= self.config.threshold {
            tracing::trace!(%category, similarity, "semantic match");
            Some(SemanticResult {
                category,
                similarity,
                method,
            })
        } else {
            None
        }
    }
}

// ── Tokenization ─────────────────────────────────────────────────────────────

/// Lowercase words of length 2..=100 with diacritics folded, bigrams of
/// adjacent words, and synonym expansions.
pub fn tokenize(merchant: Option<&str>, description: Option<&str>) -> HashSet<String> {
    let Some(text) = combine(merchant, description) else {
        return HashSet::new();
    };
    let Some(features) = TextFeatures::new(&text) else {
        return HashSet::new();
    };
    let mut tokens: HashSet<String> = features.words.iter().cloned().collect();
    tokens.extend(features.bigrams());
    for word in &features.words {
        tokens.extend(synonyms(word).iter().map(|s| s.to_string()));
    }
    tokens
}

fn combine(merchant: Option<&str>, description: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [merchant, description]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join(" ").chars().take(MAX_TEXT_LEN).collect())
}

fn words_of(text: &str) -> Vec<String> {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| (MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&w.chars().count()))
        .take(MAX_WORDS)
        .map(str::to_string)
        .collect()
}

fn canonical_phrase(text: &str) -> Option<String> {
    let words = words_of(text);
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

fn canonical_category(category: &str) -> Option<String> {
    let trimmed = category.trim().to_lowercase();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn synonyms(word: &str) -> &'static [&'static str] {
    SYNONYMS
        .iter()
        .find(|(abbrev, _)| *abbrev == word)
        .map(|(_, expansions)| *expansions)
        .unwrap_or(&[])
}

struct TextFeatures {
    words: Vec<String>,
    /// Words joined by single spaces and padded with a space on both sides.
    padded: String,
}

impl TextFeatures {
    fn new(text: &str) -> Option<Self> {
        let words = words_of(text);
        if words.is_empty() {
            return None;
        }
        let padded = format!(" {} ", words.join(" "));
        Some(Self { words, padded })
    }

    fn joined(&self) -> &str {
        self.padded.trim()
    }

    fn bigrams(&self) -> impl Iterator<Item = String> + '_ {
        self.words.windows(2).map(|w| format!("{} {}", w[0], w[1]))
    }

    /// Bigrams in which at least one word was replaced by a synonym.
    fn expanded_bigrams(&self) -> Vec<String> {
        let mut out = Vec::new();
        for pair in self.words.windows(2) {
            let left: Vec<&str> = std::iter::once(pair[0].as_str())
                .chain(synonyms(&pair[0]).iter().copied())
                .collect();
            let right: Vec<&str> = std::iter::once(pair[1].as_str())
                .chain(synonyms(&pair[1]).iter().copied())
                .collect();
            for (i, l) in left.iter().enumerate() {
                for (j, r) in right.iter().enumerate() {
                    if i > 0 || j > 0 {
                        out.push(format!("{l} {r}"));
                    }
                }
            }
        }
        out
    }
}

// ── Similarity ───────────────────────────────────────────────────────────────

fn base_similarity(features: &TextFeatures, cluster: &Cluster) -> f64 {
    // Multi-word phrase inside the text, longest first.
    for (phrase, n) in &cluster.phrases {
        if features.padded.contains(&format!(" {phrase} ")) {
            return (0.85 + (*n as f64 - 2.0) * 0.05).min(0.95);
        }
    }

    if cluster.entries.contains(features.joined()) {
        return 0.85;
    }

    if features
        .expanded_bigrams()
        .iter()
        .any(|b| cluster.entries.contains(b))
    {
        return 0.80;
    }

    let unique: HashSet<&str> = features.words.iter().map(String::as_str).collect();
    let hits = unique
        .iter()
        .filter(|w| {
            cluster.entries.contains(**w) || synonyms(w).iter().any(|s| cluster.entries.contains(*s))
        })
        .count();
    if hits == 0 {
        return 0.0;
    }
    let mut score = hits as f64 / unique.len() as f64;
    if hits >= 2 {
        score += 0.20;
    } else if unique.len() <= 3 {
        score += 0.10;
    }
    clamp_unit(score)
}

fn pos_code_match(text: &str) -> Option<SemanticResult> {
    if re_toast_pos().is_match(text) {
        return Some(SemanticResult {
            category: "dining".to_string(),
            similarity: 0.95,
            method: SemanticMethod::ToastPos,
        });
    }
    if re_square_pos().is_match(text) && !re_square_business().is_match(text) {
        return Some(SemanticResult {
            category: "dining".to_string(),
            similarity: 0.90,
            method: SemanticMethod::SquarePos,
        });
    }
    None
}

// ── Context boosts ───────────────────────────────────────────────────────────

fn context_boost(category: &str, ctx: &MatchContext<'_>) -> f64 {
    let in_set = |set: &[&str]| set.contains(&category);
    let mut boost = 0.0;

    let channel = ctx.channel.unwrap_or("").trim().to_lowercase();
    let channel_words: Vec<&str> = channel
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let amount = ctx.amount.filter(|a| a.is_finite());

    if channel_words.contains(&"ach") {
        if in_set(&["utilities", "payment", "transfer"]) {
            boost += 0.15;
        }
        if amount.is_some_and(|a| a > 0.0) && in_set(&["deposit", "income", "investment"]) {
            boost += 0.10;
        }
    }
    if channel_words.contains(&"pos")
        || channel.contains("point of sale")
        || channel == "in store"
        || channel == "in_store"
    {
        if in_set(&["shopping", "dining", "groceries"]) {
            boost += 0.12;
        }
    }
    if channel.contains("online") || channel == "web" || channel == "ecommerce" {
        if in_set(&["subscriptions", "entertainment"]) {
            boost += 0.35;
        } else if category == "shopping" {
            boost += 0.10;
        }
    }

    let kind = AccountKind::detect(ctx.account_type, None);
    if kind.investment && category == "investment" {
        boost += 0.20;
    }
    if (kind.loan || kind.credit_card) && category == "payment" {
        boost += 0.40;
    }
    if kind.checking_or_savings && in_set(&["utilities", "groceries", "dining", "shopping"]) {
        boost += 0.05;
    }

    if let Some(a) = amount {
        if a > 1000.0 && in_set(&["investment", "income"]) {
            boost += 0.10;
        }
        if a < 0.0 && a > -100.0 && in_set(&["groceries", "dining", "shopping"]) {
            boost += 0.08;
        }
        if a < 0.0 && a > -10.0 {
            boost += match category {
                "dining" => 0.30,
                "groceries" => 0.15,
                "shopping" => 0.05,
                _ => 0.0,
            };
        }
    }

    let subtype = ctx.account_subtype.unwrap_or("").trim().to_lowercase();
    if !subtype.is_empty() {
        let sub_kind = AccountKind::detect(None, Some(&subtype));
        if (sub_kind.certificate || subtype.contains("money market")) && category == "investment" {
            boost += 0.15;
        }
        if (subtype.contains("credit") || subtype.contains("card")) && category == "payment" {
            boost += 0.35;
        }
    }

    boost
}

// ── Tests ────────────────────────────────────────────────────────────────────
