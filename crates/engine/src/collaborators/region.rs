use std::collections::BTreeMap;

use ledgerlens_core::AccountInfo;
use serde::{Deserialize, Serialize};

/// Source of credit-card-payment keywords, keyed by region code.
pub trait RegionKeywords: Send + Sync {
    fn default_region(&self) -> &str;

    /// Keywords for `region`, or the default region's list when it has none.
    fn credit_card_keywords(&self, region: &str) -> &[String];

    /// Region code for an account: currency first, then US-only account
    /// types, then the default region.
    fn detect_region(&self, account: Option<&AccountInfo>) -> String {
        account
            .and_then(region_from_account)
            .unwrap_or_else(|| self.default_region().to_string())
    }

    /// Whether `text` (already lowercased) mentions a credit card payment for
    /// the account's region. The default region's keywords are tried too.
    fn is_credit_card_payment(&self, text: &str, account: Option<&AccountInfo>) -> bool {
        let region = self.detect_region(account);
        let hit = |keywords: &[String]| keywords.iter().any(|k| text.contains(k.as_str()));
        if hit(self.credit_card_keywords(&region)) {
            return true;
        }
        region != self.default_region() && hit(self.credit_card_keywords(self.default_region()))
    }
}

fn region_from_account(account: &AccountInfo) -> Option<String> {
    let from_currency = account
        .currency
        .as_deref()
        .and_then(|c| match c.trim().to_uppercase().as_str() {
            "USD" => Some("US"),
            "GBP" => Some("UK"),
            "CAD" => Some("CA"),
            "AUD" => Some("AU"),
            "INR" => Some("IN"),
            "EUR" => Some("EU"),
            _ => None,
        });
    if let Some(region) = from_currency {
        return Some(region.to_string());
    }
    let ty = account.account_type.as_deref()?.to_lowercase();
    ["401k", "403b", "ira", "hsa", "529"]
        .iter()
        .any(|t| ty.contains(t))
        .then(|| "US".to_string())
}

/// `[regions]` section: default region plus per-region keyword lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionKeywordConfig {
    pub default_region: String,
    pub credit_card_keywords: BTreeMap<String, Vec<String>>,
}

impl Default for RegionKeywordConfig {
    fn default() -> Self {
        let table: &[(&str, &[&str])] = &[
            (
                "US",
                &[
                    "citi autopay", "citi card", "citicard", "chase autopay", "chase credit",
                    "wells fargo autopay", "wf autopay", "bofa autopay", "bank of america",
                    "discover autopay", "discover e-payment", "amex autopay", "american express",
                    "capital one autopay", "web id:", "ppd id:", "e-payment", "epayment",
                ],
            ),
            (
                "UK",
                &[
                    "barclaycard payment", "hsbc card payment", "lloyds card payment",
                    "natwest card payment", "direct debit", "dd payment",
                ],
            ),
            (
                "CA",
                &[
                    "rbc card payment", "td card payment", "scotiabank card payment",
                    "bmo card payment", "cibc card payment", "autopay",
                ],
            ),
            (
                "IN",
                &[
                    "hdfc card payment", "icici card payment", "axis card payment",
                    "sbi card payment", "autopay", "auto debit",
                ],
            ),
        ];
        Self {
            default_region: "US".to_string(),
            credit_card_keywords: table
                .iter()
                .map(|(region, words)| {
                    (region.to_string(), words.iter().map(|w| w.to_string()).collect())
                })
                .collect(),
        }
    }
}

impl RegionKeywordConfig {
    /// Adds the built-in keyword lists for regions the config leaves out.
    pub fn with_default_regions(mut self) -> Self {
        for (region, words) in Self::default().credit_card_keywords {
            let present = self
                .credit_card_keywords
                .keys()
                .any(|k| k.trim().eq_ignore_ascii_case(&region));
            if !present {
                self.credit_card_keywords.insert(region, words);
            }
        }
        self
    }

    /// Uppercases region codes and lowercases keywords so lookups and
    /// substring checks need no further folding.
    pub fn normalized(mut self) -> Self {
        self.default_region = self.default_region.trim().to_uppercase();
        self.credit_card_keywords = self
            .credit_card_keywords
            .into_iter()
            .map(|(region, words)| {
                let words = words
                    .into_iter()
                    .map(|w| w.trim().to_lowercase())
                    .filter(|w| !w.is_empty())
                    .collect();
                (region.trim().to_uppercase(), words)
            })
            .collect();
        self
    }
}

impl RegionKeywords for RegionKeywordConfig {
    fn default_region(&self) -> &str {
        &self.default_region
    }

    fn credit_card_keywords(&self, region: &str) -> &[String] {
        self.credit_card_keywords
            .get(region)
            .or_else(|| self.credit_card_keywords.get(&self.default_region))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_from_currency_then_account_type() {
        let cfg = RegionKeywordConfig::default();
        let gbp = AccountInfo::new("checking").with_currency("gbp");
        assert_eq!(cfg.detect_region(Some(&gbp)), "UK");
        assert_eq!(cfg.detect_region(Some(&AccountInfo::new("Roth IRA"))), "US");
        assert_eq!(cfg.detect_region(Some(&AccountInfo::new("savings").with_currency("JPY"))), "US");
        assert_eq!(cfg.detect_region(None), "US");
    }

    #[test]
    fn regional_keywords_with_default_fallback() {
        let cfg = RegionKeywordConfig::default();
        let uk = AccountInfo::new("checking").with_currency("GBP");
        assert!(cfg.is_credit_card_payment("barclaycard payment thank you", Some(&uk)));
        // US keywords still apply to a UK account.
        assert!(cfg.is_credit_card_payment("chase autopay 0412", Some(&uk)));
        assert!(!cfg.is_credit_card_payment("tesco stores", Some(&uk)));
        // AU has no list of its own.
        let au = AccountInfo::new("checking").with_currency("AUD");
        assert!(cfg.is_credit_card_payment("amex autopay", Some(&au)));
    }

    #[test]
    fn normalized_folds_case() {
        let mut cfg = RegionKeywordConfig {
            default_region: " us ".into(),
            credit_card_keywords: BTreeMap::new(),
        };
        cfg.credit_card_keywords
            .insert("us".into(), vec!["  My Bank AUTOPAY ".into(), " ".into()]);
        let cfg = cfg.normalized();
        assert_eq!(cfg.default_region, "US");
        assert_eq!(cfg.credit_card_keywords("US"), ["my bank autopay".to_string()]);
        assert!(cfg.is_credit_card_payment("my bank autopay 123", None));
    }
}
