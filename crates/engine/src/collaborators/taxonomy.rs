use std::collections::HashMap;
use std::sync::OnceLock;

use ledgerlens_core::category;

pub const UNKNOWN_CATEGORY: &str = "UNKNOWN_CATEGORY";

/// A provider category pair mapped into the internal vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyMapping {
    pub primary: String,
    pub detailed: String,
}

/// Maps a provider taxonomy (primary + detailed codes) onto internal categories.
pub trait TaxonomyMapper: Send + Sync {
    fn map(
        &self,
        primary: Option<&str>,
        detailed: Option<&str>,
        merchant: Option<&str>,
        description: Option<&str>,
    ) -> TaxonomyMapping;
}

fn primary_map() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| {
        HashMap::from([
            ("FOOD_AND_DRINK", category::DINING),
            ("GENERAL_MERCHANDISE", category::SHOPPING),
            ("GENERAL_SERVICES", category::UTILITIES),
            ("GOVERNMENT_AND_NON_PROFIT", category::OTHER),
            ("HOME_IMPROVEMENT", category::OTHER),
            ("MEDICAL", category::HEALTHCARE),
            ("PERSONAL_CARE", category::OTHER),
            ("TRANSPORTATION", category::TRANSPORTATION),
            ("TRAVEL", category::TRAVEL),
            ("RENT_AND_UTILITIES", category::RENT),
            ("ENTERTAINMENT", category::ENTERTAINMENT),
            ("INCOME", category::INCOME),
            ("TRANSFER_IN", category::INCOME),
            ("TRANSFER_OUT", category::OTHER),
            ("LOAN_PAYMENTS", category::OTHER),
            ("BANK_FEES", category::OTHER),
            ("GAS_STATIONS", category::TRANSPORTATION),
            ("GROCERIES", category::GROCERIES),
            ("SUBSCRIPTIONS", category::SUBSCRIPTIONS),
            ("INVESTMENT", category::INVESTMENT),
        ])
    })
}

fn detailed_map() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| {
        let groups: &[(&str, &[&str])] = &[
            (
                category::DINING,
                &["RESTAURANTS", "FAST_FOOD", "COFFEE_SHOPS", "COFFEE", "FOOD_DELIVERY", "ALCOHOL_AND_BARS", "BEER_WINE_AND_LIQUOR"],
            ),
            (category::GROCERIES, &["GROCERIES", "SUPERMARKETS"]),
            (
                category::TRANSPORTATION,
                &["GAS_STATIONS", "GAS", "PUBLIC_TRANSPORTATION", "PUBLIC_TRANSIT", "TAXI", "TAXIS_AND_RIDE_SHARES", "RIDE_SHARE", "PARKING", "TOLLS"],
            ),
            (
                category::SHOPPING,
                &["GENERAL_MERCHANDISE", "ONLINE_MARKETPLACES", "DEPARTMENT_STORES", "CLOTHING_AND_ACCESSORIES", "ELECTRONICS"],
            ),
            (
                category::ENTERTAINMENT,
                &["ENTERTAINMENT", "MOVIES_AND_DVDS", "GAMES_AND_GAMING", "SPORTS_AND_RECREATION"],
            ),
            (
                category::SUBSCRIPTIONS,
                &["MUSIC_AND_AUDIO", "SOFTWARE_SUBSCRIPTIONS", "STREAMING_SERVICES", "MUSIC_STREAMING", "NEWS_SUBSCRIPTIONS", "GAMING_SUBSCRIPTIONS"],
            ),
            (
                category::TRAVEL,
                &["HOTELS_AND_ACCOMMODATIONS", "LODGING", "AIR_TRAVEL", "FLIGHTS", "RENTAL_CARS", "TRAVEL_AGENCIES"],
            ),
            (category::RENT, &["RENT"]),
            (
                category::UTILITIES,
                &["UTILITIES", "ELECTRICITY", "WATER", "GAS_AND_HEATING", "GAS_AND_ELECTRICITY", "INTERNET_AND_PHONE", "INTERNET_AND_CABLE", "TELEPHONE", "CABLE"],
            ),
            (
                category::INCOME,
                &["SALARY", "WAGES", "PAYROLL", "DIVIDENDS", "INTEREST_EARNED", "GIG_ECONOMY", "RENTAL_INCOME", "INVESTMENT_INCOME"],
            ),
            (
                category::HEALTHCARE,
                &["PRIMARY_CARE", "DENTAL_CARE", "PHARMACIES", "PHARMACIES_AND_SUPPLEMENTS", "HOSPITALS", "HEALTH_INSURANCE"],
            ),
            (
                category::INVESTMENT,
                &["CD_DEPOSIT", "CERTIFICATE_OF_DEPOSIT", "STOCKS", "BONDS", "MUTUAL_FUNDS", "ETF", "BROKERAGE", "RETIREMENT"],
            ),
        ];
        groups
            .iter()
            .flat_map(|(cat, codes)| codes.iter().map(move |code| (*code, *cat)))
            .collect()
    })
}

const INVESTMENT_TERMS: &[&str] = &[
    "cd deposit",
    "certificate of deposit",
    "cd maturity",
    "cd interest",
    " stock",
    " bond",
    "mutual fund",
    " etf",
    "401k",
    " ira",
    "retirement",
    "brokerage",
];

const MERCHANT_HINTS: &[(&str, &[&str])] = &[
    (
        category::DINING,
        &["mcdonald", "starbucks", "kfc", "burger", "pizza", "coffee", "restaurant", "dining"],
    ),
    (category::GROCERIES, &["kroger", "supermarket", "grocer"]),
    (category::TRANSPORTATION, &["uber", "lyft", "taxi", "fuel", "gas station"]),
    (category::SUBSCRIPTIONS, &["netflix", "spotify", "subscription"]),
];

/// Plaid personal-finance-category mapper.
///
/// The detailed code wins over the primary one. Codes in the
/// `PRIMARY_DETAILED` form (e.g. `FOOD_AND_DRINK_GROCERIES`) are accepted and
/// reduced to the detailed part. Investment wording in the merchant or
/// description overrides an entertainment guess.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaidTaxonomyMapper;

impl PlaidTaxonomyMapper {
    fn lookup_detailed(primary: Option<&str>, detailed: &str) -> Option<&'static str> {
        let code = detailed.trim().to_uppercase();
        if let Some(hit) = detailed_map().get(code.as_str()) {
            return Some(*hit);
        }
        let prefix = primary.map(|p| format!("{}_", p.trim().to_uppercase()))?;
        let stripped = code.strip_prefix(&prefix)?;
        detailed_map().get(stripped).copied()
    }
}

impl TaxonomyMapper for PlaidTaxonomyMapper {
    fn map(
        &self,
        primary: Option<&str>,
        detailed: Option<&str>,
        merchant: Option<&str>,
        description: Option<&str>,
    ) -> TaxonomyMapping {
        let primary = primary.filter(|s| !s.trim().is_empty());
        let detailed = detailed.filter(|s| !s.trim().is_empty());

        let mut mapped_detailed: Option<String> = detailed
            .and_then(|d| Self::lookup_detailed(primary, d))
            .map(str::to_string);
        let mut mapped_primary = mapped_detailed.clone().or_else(|| {
            primary.map(|p| {
                let upper = p.trim().to_uppercase();
                if upper == UNKNOWN_CATEGORY {
                    category::OTHER.to_string()
                } else {
                    primary_map()
                        .get(upper.as_str())
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| p.trim().to_lowercase())
                }
            })
        });

        let text = format!(
            " {} {}",
            merchant.unwrap_or_default(),
            description.unwrap_or_default()
        )
        .to_lowercase();

        if INVESTMENT_TERMS.iter().any(|t| text.contains(t)) {
            mapped_detailed = Some(category::INVESTMENT.to_string());
            if mapped_primary.as_deref().map_or(true, |p| p == category::ENTERTAINMENT) {
                mapped_primary = Some(category::INVESTMENT.to_string());
            }
        }

        if mapped_detailed.is_none() {
            mapped_detailed = MERCHANT_HINTS
                .iter()
                .find(|(_, words)| words.iter().any(|w| text.contains(w)))
                .map(|(cat, _)| cat.to_string());
        }

        let all_blank = primary.is_none()
            && detailed.is_none()
            && merchant.map_or(true, |m| m.trim().is_empty())
            && description.map_or(true, |d| d.trim().is_empty());
        let primary = mapped_primary.unwrap_or_else(|| {
            if all_blank {
                UNKNOWN_CATEGORY.to_string()
            } else {
                category::OTHER.to_string()
            }
        });
        let detailed = mapped_detailed.unwrap_or_else(|| primary.clone());

        tracing::trace!(%primary, %detailed, "taxonomy mapping");
        TaxonomyMapping { primary, detailed }
    }
}
