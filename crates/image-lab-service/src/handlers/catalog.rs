//! Enhancement catalog and industry lookup.

use axum::extract::Query;
use axum::Json;
use serde::{Deserialize, Serialize};

use image_lab_core::{enhancements_for_industry, match_industry, EnhancementOption, IndustryMatch};

use crate::error::ApiError;

/// Catalog query.
#[derive(Debug, Deserialize)]
pub struct EnhancementsQuery {
    /// Industry to filter by; absent returns the whole catalog.
    pub industry: Option<String>,
}

/// Catalog response.
#[derive(Debug, Serialize)]
pub struct EnhancementsResponse {
    /// The industry filter applied.
    pub industry: Option<String>,
    /// Matching options, in catalog order.
    pub enhancements: Vec<&'static EnhancementOption>,
}

/// List the enhancement options for an industry.
pub async fn list_enhancements(
    Query(query): Query<EnhancementsQuery>,
) -> Json<EnhancementsResponse> {
    let industry = query
        .industry
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let enhancements = enhancements_for_industry(industry.as_deref());

    Json(EnhancementsResponse {
        industry,
        enhancements,
    })
}

/// Industry match query.
#[derive(Debug, Deserialize)]
pub struct MatchQuery {
    /// Free-text industry.
    pub q: String,
}

/// Industry match response.
#[derive(Debug, Serialize)]
pub struct MatchResponse {
    /// The input.
    pub query: String,
    /// The closest canonical industry, if any is close enough.
    #[serde(rename = "match")]
    pub matched: Option<IndustryMatch>,
}

/// Map free text to a canonical industry.
pub async fn match_industry_handler(
    Query(query): Query<MatchQuery>,
) -> Result<Json<MatchResponse>, ApiError> {
    if query.q.trim().is_empty() {
        return Err(ApiError::BadRequest("q must not be empty".into()));
    }
    let matched = match_industry(&query.q);
    Ok(Json(MatchResponse {
        query: query.q,
        matched,
    }))
}
