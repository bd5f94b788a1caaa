use std::sync::OnceLock;

use ledgerlens_core::Amount;
use regex::Regex;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
];

/// Upper bounds (exclusive) and labels of the amount buckets.
const AMOUNT_BUCKETS: &[(f64, &str)] = &[
    (10.0, "0-10"),
    (25.0, "10-25"),
    (50.0, "25-50"),
    (100.0, "50-100"),
    (250.0, "100-250"),
    (500.0, "250-500"),
    (1000.0, "500-1000"),
];
const TOP_BUCKET: &str = "1000+";

fn re_store_number() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"\s*#\d+").expect("invalid regex"))
}

/// Raw, unvalidated feature text for one transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureInput<'a> {
    pub merchant: Option<&'a str>,
    pub description: Option<&'a str>,
    pub amount: Option<&'a str>,
    pub channel: Option<&'a str>,
}

impl<'a> FeatureInput<'a> {
    pub fn new(
        merchant: Option<&'a str>,
        description: Option<&'a str>,
        amount: Option<&'a str>,
        channel: Option<&'a str>,
    ) -> Self {
        Self {
            merchant,
            description,
            amount,
            channel,
        }
    }

    pub fn extract(&self) -> Features {
        Features {
            merchant: self.merchant.and_then(merchant_key),
            keywords: self.description.map(keywords).unwrap_or_default(),
            amount_bucket: self.amount.and_then(amount_bucket),
            channel: self.channel.and_then(channel_key),
        }
    }
}

/// Feature keys as stored in the counter tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features {
    pub merchant: Option<String>,
    pub keywords: Vec<String>,
    pub amount_bucket: Option<&'static str>,
    pub channel: Option<String>,
}

impl Features {
    pub fn is_empty(&self) -> bool {
        self.merchant.is_none()
            && self.keywords.is_empty()
            && self.amount_bucket.is_none()
            && self.channel.is_none()
    }
}

pub fn merchant_key(merchant: &str) -> Option<String> {
    let lowered = merchant.trim().to_lowercase();
    let stripped = re_store_number().replace_all(&lowered, "");
    let key = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    (!key.is_empty()).then_some(key)
}

pub fn keywords(description: &str) -> Vec<String> {
    description
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Bucket label for the magnitude of `amount`. Unparsable or out-of-range
/// amounts have no bucket.
pub fn amount_bucket(amount: &str) -> Option<&'static str> {
    let value = Amount::parse(amount).ok()?.abs().to_f64();
    Some(
        AMOUNT_BUCKETS
            .iter()
            .find(|(upper, _)| value < *upper)
            .map(|(_, label)| *label)
            .unwrap_or(TOP_BUCKET),
    )
}

pub fn channel_key(channel: &str) -> Option<String> {
    let key = channel.trim().to_lowercase();
    (!key.is_empty()).then_some(key)
}
