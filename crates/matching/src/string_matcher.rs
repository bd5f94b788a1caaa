use std::collections::HashSet;
use std::sync::OnceLock;

use ledgerlens_core::{clamp_unit, ConfidenceTier};
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::util::{edit_ratio, jaro_winkler};

/// Inputs longer than this are truncated before matching.
pub const MAX_TEXT_LEN: usize = 10_000;

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_leading_article, r"^(the|a|an)\s+");
re!(re_store_label, r"\s*store\s*#?\d+");
re!(re_location_label, r"\s*loc\s*#?\d+");
re!(re_store_number, r"\s*#\d+");
re!(re_long_digits, r"\s*\d{4,}");
re!(re_corporate_suffix, r"\s+(inc|llc|corp|ltd|limited|company|co)\.?$");
re!(re_domain_suffix, r"\.(com|net|org|co\.uk)$");
re!(re_dotted_abbrev, r"\b(\w)\.(\w)\.");
re!(re_non_alnum, r"[^a-z0-9\s]");
re!(re_spaces, r"\s+");

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub high_threshold: f64,
    pub medium_threshold: f64,
    pub low_threshold: f64,
    pub affix_weight: f64,
    pub edit_weight: f64,
    pub token_weight: f64,
    /// Score floor applied when both strings have exactly the same token set.
    pub perfect_token_floor: f64,
    pub max_candidates: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.85,
            medium_threshold: 0.70,
            low_threshold: 0.55,
            affix_weight: 0.4,
            edit_weight: 0.3,
            token_weight: 0.3,
            perfect_token_floor: 0.75,
            max_candidates: 10_000,
        }
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

/// A scored candidate. All component scores are in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// The candidate exactly as supplied by the caller.
    pub candidate: String,
    pub edit_ratio: f64,
    pub token_ratio: f64,
    pub affix_ratio: f64,
    pub combined: f64,
}

// ── Normalization ────────────────────────────────────────────────────────────

/// Canonical form of a merchant string: lowercase ASCII words with diacritics,
/// punctuation, store numbers and corporate suffixes removed.
///
/// Passes are repeated until the output stops changing, so
/// `normalize(normalize(x)) == normalize(x)` always holds.
pub fn normalize(text: &str) -> String {
    let mut current = normalize_pass(text);
    // Every pass after the first works on ASCII and never grows the string,
    // so this converges in a handful of iterations.
    for _ in 0..16 {
        let next = normalize_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn normalize_pass(text: &str) -> String {
    let truncated: String = text.chars().take(MAX_TEXT_LEN).collect();
    let folded: String = truncated
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    let mut s = folded.trim().to_string();
    if s.is_empty() {
        return s;
    }

    s = re_leading_article().replace(&s, "").into_owned();
    s = re_store_label().replace_all(&s, "").into_owned();
    s = re_location_label().replace_all(&s, "").into_owned();
    s = re_store_number().replace_all(&s, "").into_owned();
    s = re_long_digits().replace_all(&s, "").into_owned();
    s = re_corporate_suffix().replace(s.trim_end(), "").into_owned();
    s = re_domain_suffix().replace(s.trim_end(), "").into_owned();
    s = re_dotted_abbrev().replace_all(&s, "$1$2").into_owned();
    s = re_non_alnum().replace_all(&s, "").into_owned();
    s = re_spaces().replace_all(&s, " ").into_owned();
    s.trim().to_string()
}

// ── Scoring ──────────────────────────────────────────────────────────────────

/// Jaccard overlap of whitespace tokens; 1.0 whenever the token sets are equal.
fn token_ratio(a: &str, b: &str) -> f64 {
    let left: HashSet<&str> = a.split_whitespace().collect();
    let right: HashSet<&str> = b.split_whitespace().collect();
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    if left == right {
        return 1.0;
    }
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    intersection as f64 / union as f64
}

/// Jaro-Winkler over the forward and reversed strings, so a shared suffix
/// earns the same bonus as a shared prefix.
fn affix_ratio(a: &str, b: &str) -> f64 {
    let forward = jaro_winkler(a, b);
    let ra: String = a.chars().rev().collect();
    let rb: String = b.chars().rev().collect();
    forward.max(jaro_winkler(&ra, &rb))
}

// ── Matcher ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct StringMatcher {
    config: MatcherConfig,
}

impl StringMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn normalize(&self, text: &str) -> String {
        normalize(text)
    }

    /// Best candidate at or above the low threshold.
    pub fn find_best_match<S: AsRef<str>>(&self, query: &str, candidates: &[S]) -> Option<MatchResult> {
        let best = self
            .score_all(query, candidates)
            .into_iter()
            .max_by(|a, b| a.combined.partial_cmp(&b.combined).unwrap_or(std::cmp::Ordering::Equal))?;
        if best.combined >= self.config.low_threshold {
            tracing::trace!(candidate = %best.candidate, score = best.combined, "fuzzy match");
            Some(best)
        } else {
            None
        }
    }

    /// Every candidate scoring at or above `threshold`, best first.
    pub fn find_all_matches<S: AsRef<str>>(
        &self,
        query: &str,
        candidates: &[S],
        threshold: f64,
    ) -> Vec<MatchResult> {
        let mut matches: Vec<MatchResult> = self
            .score_all(query, candidates)
            .into_iter()
            .filter(|m| m.combined >= threshold)
            .collect();
        matches.sort_by(|a, b| b.combined.partial_cmp(&a.combined).unwrap_or(std::cmp::Ordering::Equal));
        matches
    }

    pub fn tier(&self, score: f64) -> ConfidenceTier {
        ConfidenceTier::from_score(
            score,
            self.config.high_threshold,
            self.config.medium_threshold,
            self.config.low_threshold,
        )
    }

    pub fn is_high_confidence(&self, score: f64) -> bool {
        self.tier(score) == ConfidenceTier::High
    }

    fn score_all<S: AsRef<str>>(&self, query: &str, candidates: &[S]) -> Vec<MatchResult> {
        let normalized_query = normalize(query);
        if normalized_query.is_empty() {
            return Vec::new();
        }
        if candidates.len() > self.config.max_candidates {
            tracing::warn!(
                count = candidates.len(),
                limit = self.config.max_candidates,
                "candidate list truncated"
            );
        }

        candidates
            .iter()
            .take(self.config.max_candidates)
            .filter(|c| !c.as_ref().trim().is_empty())
            .filter_map(|c| {
                let normalized = normalize(c.as_ref());
                if normalized.is_empty() {
                    return None;
                }
                Some(self.score_pair(&normalized_query, &normalized, c.as_ref()))
            })
            .collect()
    }

    fn score_pair(&self, query: &str, candidate: &str, original: &str) -> MatchResult {
        let cfg = &self.config;
        let affix = clamp_unit(affix_ratio(query, candidate));
        let edit = clamp_unit(edit_ratio(query, candidate));
        let token = clamp_unit(token_ratio(query, candidate));

        let weight_sum = cfg.affix_weight + cfg.edit_weight + cfg.token_weight;
        let mut combined = if weight_sum > 0.0 {
            (affix * cfg.affix_weight + edit * cfg.edit_weight + token * cfg.token_weight) / weight_sum
        } else {
            0.0
        };
        if token >= 1.0 {
            combined = combined.max(cfg.perfect_token_floor);
        }

        MatchResult {
            candidate: original.to_string(),
            edit_ratio: edit,
            token_ratio: token,
            affix_ratio: affix,
            combined: clamp_unit(combined),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> StringMatcher {
        StringMatcher::default()
    }

    #[test]
    fn normalize_strips_noise() {
        assert_eq!(normalize("SAFEWAY #1234"), "safeway");
        assert_eq!(normalize("  The Home Depot  "), "home depot");
        assert_eq!(normalize("Starbucks Store #42"), "starbucks");
        assert_eq!(normalize("Acme, Inc."), "acme");
        assert_eq!(normalize("AMAZON.COM"), "amazon");
        assert_eq!(normalize("Café Crème"), "cafe creme");
        assert_eq!(normalize("QFC 00123456"), "qfc");
        assert_eq!(normalize("S.A. Foods"), "sa foods");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            "SAFEWAY #1234",
            "The The Store",
            "a an the x",
            "Foo Co. Inc.",
            "Ünïcödé   Mërchant LLC",
            "x.y.z.w.",
            "loc#12 store #9 #7 12345",
            "!!!",
            "trader joe's #552",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "input: {input}");
        }
    }

    #[test]
    fn normalize_truncates_long_input() {
        let long = "a".repeat(MAX_TEXT_LEN * 2);
        assert!(normalize(&long).len() <= MAX_TEXT_LEN);
    }

    #[test]
    fn exact_match_scores_high() {
        let m = matcher();
        let result = m
            .find_best_match("SAFEWAY", &["SAFEWAY", "TARGET", "WALMART"])
            .unwrap();
        assert_eq!(result.candidate, "SAFEWAY");
        assert!(result.combined >= 0.85);
        assert!(m.is_high_confidence(result.combined));
    }

    #[test]
    fn store_number_does_not_hurt_match() {
        let result = matcher()
            .find_best_match("SAFEWAY #1234", &["SAFEWAY", "TARGET", "WALMART"])
            .unwrap();
        assert_eq!(result.candidate, "SAFEWAY");
        assert!(result.combined >= 0.85);
    }

    #[test]
    fn word_order_is_tolerated() {
        let result = matcher()
            .find_best_match("foods whole", &["whole foods", "target"])
            .unwrap();
        assert_eq!(result.candidate, "whole foods");
        assert!(result.combined >= 0.75);
        assert_eq!(result.token_ratio, 1.0);
    }

    #[test]
    fn unrelated_query_has_no_match() {
        assert!(matcher()
            .find_best_match("zzzzqqq", &["SAFEWAY", "TARGET"])
            .is_none());
    }

    #[test]
    fn malformed_input_is_no_match() {
        let m = matcher();
        assert!(m.find_best_match("", &["SAFEWAY"]).is_none());
        assert!(m.find_best_match("###", &["SAFEWAY"]).is_none());
        assert!(m.find_best_match("SAFEWAY", &["", "   "]).is_none());
        let empty: [&str; 0] = [];
        assert!(m.find_best_match("SAFEWAY", &empty).is_none());
    }

    #[test]
    fn candidate_cap_is_respected() {
        let m = StringMatcher::new(MatcherConfig {
            max_candidates: 2,
            ..MatcherConfig::default()
        });
        assert!(m.find_best_match("safeway", &["target", "walmart", "safeway"]).is_none());
    }

    #[test]
    fn find_all_matches_sorted_descending() {
        let results = matcher().find_all_matches(
            "starbucks coffee",
            &["starbucks", "starbucks coffee", "target", "starbuck coffee"],
            0.5,
        );
        assert!(results.len() >= 2);
        assert_eq!(results[0].candidate, "starbucks coffee");
        for pair in results.windows(2) {
            assert!(pair[0].combined >= pair[1].combined);
        }
        assert!(results.iter().all(|r| r.candidate != "target"));
    }

    #[test]
    fn scores_are_clamped() {
        for r in matcher().find_all_matches("abc", &["abc", "abd", "xyz"], 0.0) {
            for score in [r.combined, r.edit_ratio, r.token_ratio, r.affix_ratio] {
                assert!((0.0..=1.0).contains(&score));
            }
        }
    }

    #[test]
    fn tiers() {
        let m = matcher();
        assert_eq!(m.tier(0.9), ConfidenceTier::High);
        assert_eq!(m.tier(0.72), ConfidenceTier::Medium);
        assert_eq!(m.tier(0.6), ConfidenceTier::Low);
        assert_eq!(m.tier(0.2), ConfidenceTier::VeryLow);
    }
}
