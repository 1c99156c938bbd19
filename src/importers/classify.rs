//! Category text classification
//!
//! Broker exports describe each row with free category text. The pattern
//! table below maps that text onto the closed [`TransactionKind`] set; rows
//! matching nothing are rejected at ingestion.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::db::TransactionKind;
use crate::error::ReconcileError;

/// First match wins, so withholding tax on interest classifies as a fee
static PATTERNS: Lazy<Vec<(Regex, TransactionKind)>> = Lazy::new(|| {
    [
        (r"(?i)^insättning$", TransactionKind::Deposit),
        (r"(?i)^uttag$", TransactionKind::Withdrawal),
        (r"(?i)^köp$", TransactionKind::Purchase),
        (r"(?i)^sälj$", TransactionKind::Sale),
        (r"(?i)^utdelning$", TransactionKind::Dividend),
        (
            r"(?i)utländsk källskatt|prelskatt|preliminärskatt|avgift",
            TransactionKind::Fee,
        ),
        (r"(?i)ränt", TransactionKind::Interest),
        (
            r"(?i)inleverans|värdepappersinsättning",
            TransactionKind::AssetDeposit,
        ),
        (r"(?i)byte|^övrigt$", TransactionKind::ListingChange),
    ]
    .into_iter()
    .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, kind)))
    .collect()
});

/// Map raw category text onto a transaction kind
pub fn classify(category: &str) -> Result<TransactionKind, ReconcileError> {
    let normalized: String = category.trim().nfc().collect();

    if let Some((_, kind)) = PATTERNS.iter().find(|(re, _)| re.is_match(&normalized)) {
        return Ok(*kind);
    }

    normalized
        .parse::<TransactionKind>()
        .map_err(|_| ReconcileError::UnknownTransactionKind {
            category: category.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swedish_categories() {
        assert_eq!(classify("Insättning").unwrap(), TransactionKind::Deposit);
        assert_eq!(classify("Uttag").unwrap(), TransactionKind::Withdrawal);
        assert_eq!(classify("Köp").unwrap(), TransactionKind::Purchase);
        assert_eq!(classify("Sälj").unwrap(), TransactionKind::Sale);
        assert_eq!(classify("Utdelning").unwrap(), TransactionKind::Dividend);
        assert_eq!(classify("Räntor").unwrap(), TransactionKind::Interest);
        assert_eq!(classify("Utländsk källskatt 15%").unwrap(), TransactionKind::Fee);
        assert_eq!(classify("Preliminärskatt").unwrap(), TransactionKind::Fee);
        assert_eq!(classify("Byte av aktier").unwrap(), TransactionKind::ListingChange);
        assert_eq!(classify("Övrigt").unwrap(), TransactionKind::ListingChange);
        assert_eq!(classify("Inleverans").unwrap(), TransactionKind::AssetDeposit);
    }

    #[test]
    fn test_case_and_whitespace_are_ignored() {
        assert_eq!(classify("  köp ").unwrap(), TransactionKind::Purchase);
        assert_eq!(classify("UTTAG").unwrap(), TransactionKind::Withdrawal);
    }

    #[test]
    fn test_decomposed_text_is_normalized() {
        // "Köp" written with a combining diaeresis
        let decomposed = "Ko\u{0308}p";
        assert_eq!(classify(decomposed).unwrap(), TransactionKind::Purchase);
    }

    #[test]
    fn test_canonical_names_are_accepted() {
        assert_eq!(classify("BUY").unwrap(), TransactionKind::Purchase);
        assert_eq!(classify("asset_deposit").unwrap(), TransactionKind::AssetDeposit);
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let err = classify("Lån").unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::UnknownTransactionKind { ref category } if category == "Lån"
        ));
    }

    #[test]
    fn test_every_pattern_compiles() {
        assert_eq!(PATTERNS.len(), 9);
    }
}
