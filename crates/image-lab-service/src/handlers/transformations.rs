//! Transformation handlers.
//!
//! A request is paid for in two steps around the backend call: the charge is
//! decided (and rejected with 402 if unaffordable) before the call, and
//! applied after it. A result simulated because the backend failed is not
//! charged unless `charge_simulated` is set.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use image_lab_core::{
    require_enhancement, Backend, ChargePlan, TransformResult, Transformation, TransformationId,
    TransformationOutcome, TransformationStatus, UserId, CUSTOM_TRANSFORMATION,
};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::PageQuery;
use crate::ledger::{simulated_waiver, ChargeSubject, Settlement};
use crate::state::AppState;
use crate::transform::InvocationRequest;

/// Transformation request.
#[derive(Debug, Deserialize)]
pub struct CreateTransformationRequest {
    /// Input image path as returned by the upload endpoint.
    pub image_path: String,
    /// Catalog option to apply.
    pub enhancement_id: Option<String>,
    /// Free-text prompt; extra instructions when an option is given.
    pub prompt: Option<String>,
    /// Industry context for the prompt.
    pub industry: Option<String>,
    /// Output size, e.g. `1024x1024`.
    pub size: Option<String>,
    /// Skip charging.
    #[serde(default)]
    pub test_mode: bool,
    /// Skip the backend call and return the original image.
    #[serde(default)]
    pub simulate: bool,
}

/// Edit request. The edit runs on the parent's input image.
#[derive(Debug, Default, Deserialize)]
pub struct EditTransformationRequest {
    /// Catalog option to apply.
    pub enhancement_id: Option<String>,
    /// Free-text prompt.
    pub prompt: Option<String>,
    /// Industry context for the prompt.
    pub industry: Option<String>,
    /// Output size.
    pub size: Option<String>,
    /// Skip charging.
    #[serde(default)]
    pub test_mode: bool,
    /// Skip the backend call.
    #[serde(default)]
    pub simulate: bool,
}

/// A transformation with public URLs.
#[derive(Debug, Serialize)]
pub struct TransformationView {
    /// The record.
    #[serde(flatten)]
    pub transformation: Transformation,
    /// URL of the input image.
    pub input_url: String,
    /// URLs of the outputs.
    pub output_urls: Vec<String>,
}

impl TransformationView {
    fn new(state: &AppState, transformation: Transformation) -> Self {
        Self {
            input_url: state.uploads.url_for(&transformation.input_path),
            output_urls: transformation
                .output_paths
                .iter()
                .map(|p| state.uploads.url_for(p))
                .collect(),
            transformation,
        }
    }
}

/// Transformation response.
#[derive(Debug, Serialize)]
pub struct TransformationResponse {
    /// The finished record.
    pub transformation: TransformationView,
    /// Result descriptor.
    pub result: TransformResult,
    /// How the request was paid for.
    pub charge: Settlement,
}

/// List response.
#[derive(Debug, Serialize)]
pub struct ListTransformationsResponse {
    /// Transformations (newest first).
    pub transformations: Vec<TransformationView>,
    /// Whether there are more.
    pub has_more: bool,
}

/// What to run, after resolving the option or prompt.
struct ResolvedRequest {
    transformation_type: String,
    prompt: String,
    cost: i64,
    backend: Backend,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn resolve_request(
    state: &AppState,
    enhancement_id: Option<&str>,
    prompt: Option<&str>,
    industry: Option<&str>,
) -> Result<ResolvedRequest, ApiError> {
    let prompt = non_empty(prompt);
    let industry = non_empty(industry);

    if let Some(id) = non_empty(enhancement_id) {
        let option = require_enhancement(id)?;
        let rendered = option.render_prompt(industry);
        let prompt = match prompt {
            Some(extra) => format!("{rendered} {extra}"),
            None => rendered,
        };
        return Ok(ResolvedRequest {
            transformation_type: option.id.to_string(),
            prompt,
            cost: option.cost,
            backend: option.backend,
        });
    }

    let prompt = prompt
        .ok_or_else(|| ApiError::BadRequest("either enhancement_id or prompt is required".into()))?;
    Ok(ResolvedRequest {
        transformation_type: CUSTOM_TRANSFORMATION.to_string(),
        prompt: prompt.to_string(),
        cost: state.config.custom_prompt_cost,
        backend: Backend::OpenAiEdit,
    })
}

fn parse_id(id: &str) -> Result<TransformationId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid transformation id: {id}")))
}

async fn load_owned(
    state: &AppState,
    user_id: &UserId,
    id: &TransformationId,
) -> Result<Transformation, ApiError> {
    state
        .store
        .get_transformation(id)
        .await?
        .filter(|t| t.user_id == *user_id)
        .ok_or_else(|| ApiError::NotFound("Transformation not found".into()))
}

struct RunOptions<'a> {
    industry: Option<&'a str>,
    size: Option<&'a str>,
    test_mode: bool,
    simulate: bool,
}

/// Pre-flight, invoke, settle, finish.
async fn run_transformation(
    state: &AppState,
    record: Transformation,
    request: &ResolvedRequest,
    options: RunOptions<'_>,
) -> Result<TransformationResponse, ApiError> {
    let user_id = record.user_id;

    if options.test_mode && !state.config.test_mode_allowed {
        return Err(ApiError::BadRequest("test mode is not enabled".into()));
    }

    let plan = if options.simulate && !options.test_mode {
        state.ledger.require_user(&user_id).await?;
        simulated_waiver()
    } else {
        state
            .ledger
            .preflight(&user_id, request.cost, options.test_mode)
            .await?
    };

    state.store.create_transformation(&record).await?;
    state.store.start_transformation(&record.id).await?;

    tracing::info!(
        user_id = %user_id,
        transformation_id = %record.id,
        transformation_type = %request.transformation_type,
        plan = ?plan,
        "Transformation started"
    );

    let invocation = match state
        .invoker
        .invoke(&InvocationRequest {
            user_id,
            input_path: &record.input_path,
            prompt: &request.prompt,
            transformation_type: &request.transformation_type,
            backend: request.backend,
            industry: options.industry,
            size: options.size,
            simulate: options.simulate,
        })
        .await
    {
        Ok(invocation) => invocation,
        Err(e) => {
            fail(state, &record.id, &e.to_string()).await;
            return Err(e.into());
        }
    };

    let plan = if invocation.result.mode.is_simulated()
        && !state.config.charge_simulated
        && plan.is_charged()
    {
        simulated_waiver()
    } else {
        plan
    };

    let subject = ChargeSubject {
        transformation_id: Some(record.id),
        transformation_type: &request.transformation_type,
        transaction_key: None,
    };
    let charge = match state
        .ledger
        .settle(&user_id, plan, request.cost, subject)
        .await
    {
        Ok(charge) => charge,
        Err(e) => {
            fail(state, &record.id, &e.to_string()).await;
            for path in &invocation.output_paths {
                if let Err(cleanup) = state.uploads.delete(path).await {
                    tracing::warn!(path = %path, error = %cleanup, "Failed to remove unpaid output");
                }
            }
            return Err(e);
        }
    };

    let finished = state
        .store
        .finish_transformation(
            &record.id,
            TransformationOutcome::Completed {
                output_paths: invocation.output_paths,
                mode: invocation.result.mode.clone(),
                credits_charged: charge.credits_charged,
            },
        )
        .await?;

    tracing::info!(
        user_id = %user_id,
        transformation_id = %finished.id,
        simulated = invocation.result.mode.is_simulated(),
        credits_charged = charge.credits_charged,
        free_credit = charge.plan == ChargePlan::FreeCredit,
        "Transformation completed"
    );

    Ok(TransformationResponse {
        transformation: TransformationView::new(state, finished),
        result: invocation.result,
        charge,
    })
}

async fn fail(state: &AppState, id: &TransformationId, error: &str) {
    tracing::warn!(transformation_id = %id, error = %error, "Transformation failed");
    if let Err(e) = state
        .store
        .finish_transformation(
            id,
            TransformationOutcome::Failed {
                error: error.to_string(),
            },
        )
        .await
    {
        tracing::error!(transformation_id = %id, error = %e, "Failed to record failure");
    }
}

/// Request a transformation.
pub async fn create_transformation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateTransformationRequest>,
) -> Result<(StatusCode, Json<TransformationResponse>), ApiError> {
    let (input_path, _) = state.uploads.resolve_owned(&auth.user_id, &body.image_path)?;
    if !state.uploads.exists(&input_path).await? {
        return Err(ApiError::NotFound(format!("image not found: {input_path}")));
    }

    let request = resolve_request(
        &state,
        body.enhancement_id.as_deref(),
        body.prompt.as_deref(),
        body.industry.as_deref(),
    )?;

    let record = Transformation::new(
        auth.user_id,
        input_path,
        request.prompt.clone(),
        request.transformation_type.clone(),
    );

    let response = run_transformation(
        &state,
        record,
        &request,
        RunOptions {
            industry: non_empty(body.industry.as_deref()),
            size: non_empty(body.size.as_deref()),
            test_mode: body.test_mode,
            simulate: body.simulate,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Edit a completed transformation.
///
/// Runs a new transformation on the parent's input image and bumps the
/// parent's edit counter.
pub async fn edit_transformation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<EditTransformationRequest>,
) -> Result<(StatusCode, Json<TransformationResponse>), ApiError> {
    let parent_id = parse_id(&id)?;
    let parent = load_owned(&state, &auth.user_id, &parent_id).await?;
    if parent.status != TransformationStatus::Completed {
        return Err(ApiError::Conflict(format!(
            "only completed transformations can be edited (status: {})",
            parent.status
        )));
    }

    let request = resolve_request(
        &state,
        body.enhancement_id.as_deref(),
        body.prompt.as_deref(),
        body.industry.as_deref(),
    )?;

    let record = Transformation::new(
        auth.user_id,
        parent.input_path.clone(),
        request.prompt.clone(),
        request.transformation_type.clone(),
    )
    .edit_of(parent.id);

    let response = run_transformation(
        &state,
        record,
        &request,
        RunOptions {
            industry: non_empty(body.industry.as_deref()),
            size: non_empty(body.size.as_deref()),
            test_mode: body.test_mode,
            simulate: body.simulate,
        },
    )
    .await?;

    let edits = state.store.increment_edits(&parent.id).await?;
    tracing::info!(
        transformation_id = %parent.id,
        edit_id = %response.transformation.transformation.id,
        edits_used = edits,
        "Transformation edited"
    );

    Ok((StatusCode::CREATED, Json(response)))
}

/// Get one of the caller's transformations.
pub async fn get_transformation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<TransformationView>, ApiError> {
    let id = parse_id(&id)?;
    let transformation = load_owned(&state, &auth.user_id, &id).await?;
    Ok(Json(TransformationView::new(&state, transformation)))
}

/// List the caller's transformations.
pub async fn list_transformations(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ListTransformationsResponse>, ApiError> {
    state.ledger.require_user(&auth.user_id).await?;

    let limit = query.capped_limit();
    let rows = state
        .store
        .list_transformations_by_user(&auth.user_id, limit + 1, query.offset)
        .await?;

    let has_more = rows.len() > limit;
    let transformations = rows
        .into_iter()
        .take(limit)
        .map(|t| TransformationView::new(&state, t))
        .collect();

    Ok(Json(ListTransformationsResponse {
        transformations,
        has_more,
    }))
}
