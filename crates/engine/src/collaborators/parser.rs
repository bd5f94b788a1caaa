use ledgerlens_matching::{KeywordCategoryParser, ParseInput};

/// Free-text category parser used as a second opinion on importer categories.
pub trait CategoryParser: Send + Sync {
    /// Returns `(category, subcategory)` when the text is recognised.
    fn parse(
        &self,
        merchant: Option<&str>,
        description: Option<&str>,
        amount: Option<f64>,
    ) -> Option<(String, Option<String>)>;
}

impl CategoryParser for KeywordCategoryParser {
    fn parse(
        &self,
        merchant: Option<&str>,
        description: Option<&str>,
        amount: Option<f64>,
    ) -> Option<(String, Option<String>)> {
        let input = ParseInput {
            merchant,
            description,
            amount,
        };
        let parsed = KeywordCategoryParser::parse(self, &input)?;
        tracing::trace!(rule = %parsed.rule, category = %parsed.category, "parser hit");
        Some((parsed.category, parsed.subcategory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_rules_through_trait() {
        let parser: &dyn CategoryParser = &KeywordCategoryParser::default();
        assert_eq!(
            parser.parse(Some("SAFEWAY #1234"), None, Some(-20.0)),
            Some(("groceries".to_string(), None))
        );
        assert_eq!(
            parser.parse(None, Some("ACME CORP PAYROLL"), Some(2500.0)),
            Some(("income".to_string(), Some("salary".to_string())))
        );
        assert_eq!(parser.parse(None, Some("zzz"), None), None);
    }
}
