//! Fuzzy industry matching.
//!
//! Free-text industries typed by users ("Fashon", "real-estate agency") are
//! mapped onto the canonical names the catalog is tagged with.

use serde::Serialize;

/// Canonical industry names.
pub static CANONICAL_INDUSTRIES: &[&str] = &[
    "apparel",
    "beauty",
    "beverage",
    "cosmetics",
    "ecommerce",
    "electronics",
    "fashion",
    "food",
    "gadgets",
    "home decor",
    "hospitality",
    "jewelry",
    "property",
    "real estate",
    "restaurant",
    "retail",
    "skincare",
    "technology",
];

/// A canonical industry matched from free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndustryMatch {
    /// Canonical industry name.
    pub industry: &'static str,
    /// Edit distance between the normalized input and the name; zero for
    /// exact and substring matches.
    pub distance: usize,
}

fn normalize(input: &str) -> String {
    input
        .trim()
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Largest edit distance accepted for an input of `len` characters.
fn max_distance(len: usize) -> usize {
    (len / 3).max(1)
}

/// Map free text to a canonical industry.
///
/// Exact and substring matches win; otherwise the closest name by Levenshtein
/// distance is returned if it is within a third of the input length. Ties
/// resolve to the alphabetically first name.
#[must_use]
pub fn match_industry(input: &str) -> Option<IndustryMatch> {
    let needle = normalize(input);
    if needle.is_empty() {
        return None;
    }

    if let Some(industry) = CANONICAL_INDUSTRIES
        .iter()
        .copied()
        .find(|name| *name == needle)
        .or_else(|| {
            CANONICAL_INDUSTRIES
                .iter()
                .copied()
                .find(|name| needle.contains(name))
        })
    {
        return Some(IndustryMatch {
            industry,
            distance: 0,
        });
    }

    CANONICAL_INDUSTRIES
        .iter()
        .copied()
        .map(|name| IndustryMatch {
            industry: name,
            distance: strsim::levenshtein(&needle, name),
        })
        .min_by_key(|m| m.distance)
        .filter(|m| m.distance <= max_distance(needle.chars().count()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_names_match_with_zero_distance() {
        assert_eq!(
            match_industry("Fashion"),
            Some(IndustryMatch {
                industry: "fashion",
                distance: 0
            })
        );
        assert_eq!(match_industry("real-estate").unwrap().industry, "real estate");
    }

    #[test]
    fn longer_text_containing_a_name_matches() {
        assert_eq!(match_industry("boutique jewelry store").unwrap().industry, "jewelry");
    }

    #[test]
    fn typos_match_the_closest_name() {
        let m = match_industry("fashon").unwrap();
        assert_eq!(m.industry, "fashion");
        assert_eq!(m.distance, 1);

        assert_eq!(match_industry("electronis").unwrap().industry, "electronics");
    }

    #[test]
    fn distant_input_does_not_match() {
        assert!(match_industry("aerospace").is_none());
        assert!(match_industry("").is_none());
        assert!(match_industry("   ").is_none());
    }
}
