//! The enhancement catalog.
//!
//! A fixed table of named transformations. Each entry carries a credit cost,
//! a prompt template and the industries it applies to. The table is never
//! mutated at runtime.

use serde::{Deserialize, Serialize};

use crate::error::{LabError, Result};

/// Industry tag that makes an option apply everywhere.
pub const ALL_INDUSTRIES: &str = "all";

/// Placeholder substituted with the caller's industry in prompt templates.
pub const INDUSTRY_PLACEHOLDER: &str = "{industry}";

/// Which external backend runs an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// OpenAI image edit.
    OpenAiEdit,
    /// The product-enhancement webhook.
    ProductWebhook,
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnhancementOption {
    /// Stable id, also recorded as the transformation type.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Short description.
    pub description: &'static str,
    /// Industry tags, or [`ALL_INDUSTRIES`].
    pub industries: &'static [&'static str],
    /// Fixed credit cost.
    pub cost: i64,
    /// Prompt template; may contain [`INDUSTRY_PLACEHOLDER`].
    #[serde(skip)]
    pub prompt_template: &'static str,
    /// Backend that performs the transformation.
    pub backend: Backend,
}

impl EnhancementOption {
    /// Whether the option is tagged for every industry.
    #[must_use]
    pub fn applies_to_all(&self) -> bool {
        self.industries.contains(&ALL_INDUSTRIES)
    }

    /// Case-insensitive substring match of `industry` against the tags, in
    /// either direction ("fashion" matches "fashion retail" and vice versa).
    #[must_use]
    pub fn matches_industry(&self, industry: &str) -> bool {
        let needle = industry.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.industries.iter().any(|tag| {
            let tag = tag.to_lowercase();
            tag.contains(&needle) || needle.contains(&tag)
        })
    }

    /// Render the prompt for `industry`.
    ///
    /// Without an industry the placeholder and its trailing space are dropped.
    #[must_use]
    pub fn render_prompt(&self, industry: Option<&str>) -> String {
        match industry.map(str::trim).filter(|s| !s.is_empty()) {
            Some(industry) => self.prompt_template.replace(INDUSTRY_PLACEHOLDER, industry),
            None => self
                .prompt_template
                .replace("{industry} ", "")
                .replace(INDUSTRY_PLACEHOLDER, ""),
        }
    }
}

const fn option(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    industries: &'static [&'static str],
    cost: i64,
    prompt_template: &'static str,
    backend: Backend,
) -> EnhancementOption {
    EnhancementOption {
        id,
        name,
        description,
        industries,
        cost,
        prompt_template,
        backend,
    }
}

/// The catalog, in display order.
pub static CATALOG: &[EnhancementOption] = &[
    option(
        "cartoon-style",
        "Cartoon Style",
        "Turn the photo into a bright 3D animated cartoon",
        &[ALL_INDUSTRIES],
        1,
        "Transform this image into a vibrant 3D animated cartoon style with soft lighting, \
         expressive features and clean outlines. Keep the composition and subject recognizable.",
        Backend::OpenAiEdit,
    ),
    option(
        "anime-style",
        "Anime Style",
        "Redraw the photo as hand-painted anime art",
        &[ALL_INDUSTRIES],
        1,
        "Redraw this image as detailed hand-painted anime artwork with cel shading and a \
         painterly background. Preserve the pose and framing.",
        Backend::OpenAiEdit,
    ),
    option(
        "era-1920s",
        "Roaring Twenties",
        "Age the photo into a 1920s sepia portrait",
        &[ALL_INDUSTRIES],
        1,
        "Restyle this image as an authentic 1920s photograph: sepia tone, film grain, soft \
         vignette and period-appropriate clothing and hair.",
        Backend::OpenAiEdit,
    ),
    option(
        "era-1980s",
        "Eighties Retro",
        "Give the photo a neon 1980s look",
        &[ALL_INDUSTRIES],
        1,
        "Restyle this image with a 1980s aesthetic: neon accents, saturated colors, analog \
         film texture and period fashion.",
        Backend::OpenAiEdit,
    ),
    option(
        "studio-lighting",
        "Studio Lighting",
        "Relight the subject with clean three-point studio lighting",
        &[ALL_INDUSTRIES],
        2,
        "Relight this {industry} photo with professional three-point studio lighting, soft \
         shadows and balanced exposure. Do not change the subject.",
        Backend::OpenAiEdit,
    ),
    option(
        "white-background",
        "Clean White Background",
        "Isolate the product on a pure white catalog background",
        &["ecommerce", "retail", "fashion", "jewelry"],
        2,
        "Place this {industry} product on a seamless pure white background with a subtle \
         contact shadow, suitable for an online catalog listing.",
        Backend::ProductWebhook,
    ),
    option(
        "lifestyle-scene",
        "Lifestyle Scene",
        "Stage the product in a realistic lifestyle setting",
        &["fashion", "apparel", "jewelry", "home decor"],
        2,
        "Stage this {industry} product in a warm, realistic lifestyle scene with natural \
         light and tasteful props that complement it.",
        Backend::ProductWebhook,
    ),
    option(
        "model-showcase",
        "Model Showcase",
        "Show the garment worn by a photorealistic model",
        &["fashion", "apparel"],
        3,
        "Show this {industry} item worn by a photorealistic model in an editorial studio \
         setting. Keep the garment's color, cut and texture exact.",
        Backend::ProductWebhook,
    ),
    option(
        "food-styling",
        "Food Styling",
        "Make the dish look freshly plated and appetizing",
        &["food", "restaurant", "beverage"],
        2,
        "Enhance this {industry} photo like a professional food stylist: fresh garnish, \
         appetizing highlights, shallow depth of field and a rustic table.",
        Backend::ProductWebhook,
    ),
    option(
        "twilight-exterior",
        "Twilight Exterior",
        "Turn a daytime property photo into a twilight shot",
        &["real estate", "property", "hospitality"],
        3,
        "Convert this {industry} exterior photo into a dusk twilight shot with warm interior \
         lights, a deep blue sky and crisp architectural lines.",
        Backend::ProductWebhook,
    ),
    option(
        "tech-minimal",
        "Minimal Tech",
        "Present the device on a sleek minimal gradient",
        &["electronics", "technology", "gadgets"],
        2,
        "Present this {industry} device on a sleek minimal gradient backdrop with precise \
         reflections and product-launch lighting.",
        Backend::ProductWebhook,
    ),
    option(
        "beauty-glow",
        "Beauty Glow",
        "Add a soft luminous glow for cosmetics shots",
        &["beauty", "cosmetics", "skincare"],
        2,
        "Give this {industry} product shot a soft luminous glow, pastel backdrop, water \
         droplets and a premium editorial finish.",
        Backend::ProductWebhook,
    ),
];

/// Options for `industry`: every "all" option plus any whose tags match.
///
/// An empty or absent industry returns the whole catalog. Catalog order is
/// kept and each option appears at most once.
#[must_use]
pub fn enhancements_for_industry(industry: Option<&str>) -> Vec<&'static EnhancementOption> {
    let industry = industry.map(str::trim).filter(|s| !s.is_empty());
    match industry {
        None => CATALOG.iter().collect(),
        Some(industry) => CATALOG
            .iter()
            .filter(|opt| opt.applies_to_all() || opt.matches_industry(industry))
            .collect(),
    }
}

/// Look up an option by id.
#[must_use]
pub fn find_enhancement(id: &str) -> Option<&'static EnhancementOption> {
    CATALOG.iter().find(|opt| opt.id == id)
}

/// Look up an option by id, failing for unknown ids.
///
/// # Errors
///
/// Returns [`LabError::UnknownEnhancement`] if no option has this id.
pub fn require_enhancement(id: &str) -> Result<&'static EnhancementOption> {
    find_enhancement(id).ok_or_else(|| LabError::UnknownEnhancement { id: id.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ids(options: &[&EnhancementOption]) -> Vec<&'static str> {
        options.iter().map(|o| o.id).collect()
    }

    #[test]
    fn ids_are_unique() {
        let unique: HashSet<_> = CATALOG.iter().map(|o| o.id).collect();
        assert_eq!(unique.len(), CATALOG.len());
    }

    #[test]
    fn empty_industry_returns_everything() {
        assert_eq!(enhancements_for_industry(None).len(), CATALOG.len());
        assert_eq!(enhancements_for_industry(Some("  ")).len(), CATALOG.len());
    }

    #[test]
    fn fashion_gets_all_options_plus_fashion_tags() {
        let found = enhancements_for_industry(Some("fashion"));
        for opt in CATALOG.iter().filter(|o| o.applies_to_all()) {
            assert!(found.contains(&opt), "missing {}", opt.id);
        }
        let found_ids = ids(&found);
        assert!(found_ids.contains(&"white-background"));
        assert!(found_ids.contains(&"lifestyle-scene"));
        assert!(found_ids.contains(&"model-showcase"));
        assert!(!found_ids.contains(&"food-styling"));
        assert!(!found_ids.contains(&"twilight-exterior"));
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        let found = ids(&enhancements_for_industry(Some("REAL")));
        assert!(found.contains(&"twilight-exterior"));

        let found = ids(&enhancements_for_industry(Some("Fashion Retail")));
        assert!(found.contains(&"model-showcase"));
        assert!(found.contains(&"white-background"));
    }

    #[test]
    fn unknown_industry_gets_only_universal_options() {
        let found = enhancements_for_industry(Some("aerospace"));
        assert!(!found.is_empty());
        assert!(found.iter().all(|o| o.applies_to_all()));
    }

    #[test]
    fn catalog_order_is_preserved() {
        let found = ids(&enhancements_for_industry(Some("fashion")));
        let positions: Vec<_> = found
            .iter()
            .map(|id| CATALOG.iter().position(|o| o.id == *id).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn render_prompt_substitutes_industry() {
        let opt = find_enhancement("white-background").unwrap();
        assert!(opt.render_prompt(Some("jewelry")).contains("this jewelry product"));
        assert!(opt.render_prompt(None).starts_with("Place this product on"));
        assert!(!opt.render_prompt(None).contains(INDUSTRY_PLACEHOLDER));
    }

    #[test]
    fn require_enhancement_rejects_unknown_ids() {
        assert_eq!(require_enhancement("cartoon-style").unwrap().cost, 1);
        assert_eq!(
            require_enhancement("nope"),
            Err(LabError::UnknownEnhancement { id: "nope".into() })
        );
    }
}
