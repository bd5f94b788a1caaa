use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::edit_ratio;

const DEFAULT_RULES: &str = include_str!("../data/category_rules.toml");

#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("Failed to parse rule TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    pub pattern: String,
    #[serde(default)]
    pub match_type: MatchType,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub amount_min: Option<f64>,
    #[serde(default)]
    pub amount_max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Contains,
    Exact,
    Regex,
    Fuzzy {
        threshold: f64,
    },
}

impl std::str::FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contains" => Ok(MatchType::Contains),
            "exact" => Ok(MatchType::Exact),
            "regex" => Ok(MatchType::Regex),
            s if s.starts_with("fuzzy:") => {
                let threshold = s[6..]
                    .parse::<f64>()
                    .map_err(|_| "Invalid fuzzy threshold".to_string())?;
                Ok(MatchType::Fuzzy { threshold })
            }
            other => Err(format!("Unknown match type: '{other}'")),
        }
    }
}

/// The text a rule is evaluated against.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseInput<'a> {
    pub merchant: Option<&'a str>,
    pub description: Option<&'a str>,
    pub amount: Option<f64>,
}

impl ParseInput<'_> {
    fn text(&self) -> String {
        [self.merchant, self.description]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCategory {
    pub category: String,
    pub subcategory: Option<String>,
    pub rule: String,
}

#[derive(Deserialize)]
struct RuleFile {
    #[serde(default)]
    rule: Vec<CategoryRule>,
}

/// Internal pairing of a rule with its precompiled regex (if applicable).
struct CompiledRule {
    rule: CategoryRule,
    compiled_regex: Option<regex::Regex>,
}

/// Priority-ordered keyword rules mapping free text to a category, used to
/// label imported rows before any statistical model is consulted.
pub struct KeywordCategoryParser {
    rules: Vec<CompiledRule>,
}

impl Default for KeywordCategoryParser {
    fn default() -> Self {
        Self::from_toml(DEFAULT_RULES).expect("bundled category_rules.toml is valid")
    }
}

impl KeywordCategoryParser {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        let mut compiled: Vec<CompiledRule> = rules
            .into_iter()
            .map(|rule| {
                let compiled_regex = if let MatchType::Regex = &rule.match_type {
                    match regex::RegexBuilder::new(&rule.pattern)
                        .case_insensitive(true)
                        .build()
                    {
                        Ok(re) => Some(re),
                        Err(e) => {
                            tracing::warn!(rule = %rule.name, "invalid rule regex: {e}");
                            None
                        }
                    }
                } else {
                    None
                };
                CompiledRule { rule, compiled_regex }
            })
            .collect();
        // Highest priority first.
        compiled.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
        Self { rules: compiled }
    }

    pub fn from_toml(toml_content: &str) -> Result<Self, RuleSetError> {
        let file: RuleFile = toml::from_str(toml_content)?;
        Ok(Self::new(file.rule))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn find_matching_rule(&self, input: &ParseInput<'_>) -> Option<&CategoryRule> {
        let text = input.text();
        if text.is_empty() {
            return None;
        }
        let lowered = text.to_lowercase();
        self.rules
            .iter()
            .find(|cr| rule_matches(cr, &text, &lowered, input.amount))
            .map(|cr| &cr.rule)
    }

    pub fn parse(&self, input: &ParseInput<'_>) -> Option<ParsedCategory> {
        self.find_matching_rule(input).map(|rule| ParsedCategory {
            category: rule.category.trim().to_lowercase(),
            subcategory: rule.subcategory.clone(),
            rule: rule.name.clone(),
        })
    }
}

fn rule_matches(cr: &CompiledRule, text: &str, lowered: &str, amount: Option<f64>) -> bool {
    let rule = &cr.rule;

    // Optional amount range filter, on the magnitude.
    if rule.amount_min.is_some() || rule.amount_max.is_some() {
        let Some(amount) = amount.map(f64::abs) else {
            return false;
        };
        if rule.amount_min.is_some_and(|min| amount < min) {
            return false;
        }
        if rule.amount_max.is_some_and(|max| amount > max) {
            return false;
        }
    }

    let pattern = rule.pattern.to_lowercase();
    match &rule.match_type {
        MatchType::Contains => lowered.contains(&pattern),
        MatchType::Exact => lowered.trim() == pattern.trim(),
        MatchType::Regex => cr
            .compiled_regex
            .as_ref()
            .is_some_and(|re| re.is_match(text)),
        MatchType::Fuzzy { threshold } => edit_ratio(lowered, &pattern) >= *threshold,
    }
}
