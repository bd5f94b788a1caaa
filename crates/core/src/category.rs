//! The lowercase category vocabulary shared by every detector.

pub const GROCERIES: &str = "groceries";
pub const DINING: &str = "dining";
pub const TRANSPORTATION: &str = "transportation";
pub const SHOPPING: &str = "shopping";
pub const ENTERTAINMENT: &str = "entertainment";
pub const HEALTHCARE: &str = "healthcare";
pub const RENT: &str = "rent";
pub const UTILITIES: &str = "utilities";
pub const SUBSCRIPTIONS: &str = "subscriptions";
pub const TRAVEL: &str = "travel";
pub const INCOME: &str = "income";
pub const SALARY: &str = "salary";
pub const INVESTMENT: &str = "investment";
pub const PAYMENT: &str = "payment";
pub const DEPOSIT: &str = "deposit";
pub const TRANSFER: &str = "transfer";
pub const CASH: &str = "cash";
pub const OTHER: &str = "other";

/// Categories that represent money leaving the account.
pub const EXPENSE_CATEGORIES: &[&str] = &[
    GROCERIES,
    DINING,
    TRANSPORTATION,
    SHOPPING,
    ENTERTAINMENT,
    HEALTHCARE,
    RENT,
    UTILITIES,
    SUBSCRIPTIONS,
    TRAVEL,
    "home improvement",
    "pet",
    "tech",
    OTHER,
    PAYMENT,
    CASH,
    TRANSFER,
];

/// Lowercases, trims and collapses inner whitespace. Blank input yields `None`.
pub fn normalize_category(raw: &str) -> Option<String> {
    let joined = raw
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Same as [`normalize_category`] for optional input.
pub fn normalize_opt(raw: Option<&str>) -> Option<String> {
    raw.and_then(normalize_category)
}

/// Importer and bank category labels that name a vocabulary entry differently.
/// Keys are normalized (see [`normalize_category`]).
const ALIASES: &[(&str, &str)] = &[
    ("restaurant", DINING),
    ("restaurants", DINING),
    ("food & dining", DINING),
    ("food and dining", DINING),
    ("food & drink", DINING),
    ("food and drink", DINING),
    ("fast food", DINING),
    ("coffee shops", DINING),
    ("coffee", DINING),
    ("grocery", GROCERIES),
    ("supermarkets", GROCERIES),
    ("supermarket", GROCERIES),
    ("gas", TRANSPORTATION),
    ("fuel", TRANSPORTATION),
    ("gas & fuel", TRANSPORTATION),
    ("auto & transport", TRANSPORTATION),
    ("transport", TRANSPORTATION),
    ("public transportation", TRANSPORTATION),
    ("rideshare", TRANSPORTATION),
    ("merchandise", SHOPPING),
    ("general merchandise", SHOPPING),
    ("retail", SHOPPING),
    ("medical", HEALTHCARE),
    ("health", HEALTHCARE),
    ("health & fitness", HEALTHCARE),
    ("pharmacy", HEALTHCARE),
    ("bills & utilities", UTILITIES),
    ("utility", UTILITIES),
    ("subscription", SUBSCRIPTIONS),
    ("streaming", SUBSCRIPTIONS),
    ("airlines", TRAVEL),
    ("hotels", TRAVEL),
    ("paycheck", INCOME),
    ("payroll", INCOME),
    ("investments", INVESTMENT),
    ("payments", PAYMENT),
    ("credit card payment", PAYMENT),
    ("transfers", TRANSFER),
    ("deposits", DEPOSIT),
    ("atm", CASH),
    ("cash & atm", CASH),
    ("mortgage & rent", RENT),
    ("pets", "pet"),
    ("electronics & software", "tech"),
];

/// [`normalize_category`], then mapped onto the vocabulary when the label is a
/// known alias. Unknown labels come back normalized.
pub fn canonical_category(raw: &str) -> Option<String> {
    let normalized = normalize_category(raw)?;
    match ALIASES.iter().find(|(alias, _)| *alias == normalized) {
        Some((_, canonical)) => Some((*canonical).to_string()),
        None => Some(normalized),
    }
}

/// Same as [`canonical_category`] for optional input.
pub fn canonical_opt(raw: Option<&str>) -> Option<String> {
    raw.and_then(canonical_category)
}

pub fn is_expense_category(category: &str) -> bool {
    let lower = category.trim().to_lowercase();
    EXPENSE_CATEGORIES.contains(&lower.as_str())
}

/// True when the value carries no usable category signal.
pub fn is_blank_or_other(category: Option<&str>) -> bool {
    match category.map(str::trim) {
        None | Some("") => true,
        Some(c) => c.eq_ignore_ascii_case(OTHER),
    }
}
