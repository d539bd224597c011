//! Transformation records and result descriptors.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LabError, Result};
use crate::{TransformationId, UserId};

/// Transformation type recorded for free-text prompts.
pub const CUSTOM_TRANSFORMATION: &str = "custom";

/// Lifecycle status of a transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationStatus {
    /// Created, not yet sent to a backend.
    Pending,
    /// Sent to a backend.
    Processing,
    /// Finished with a result.
    Completed,
    /// Finished without a result.
    Failed,
}

impl TransformationStatus {
    /// Stable storage name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed are terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a record in this status may move to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing | Self::Completed | Self::Failed)
                | (Self::Processing, Self::Completed | Self::Failed)
        )
    }
}

impl fmt::Display for TransformationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformationStatus {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(LabError::InvalidStatus(other.to_string())),
        }
    }
}

/// Whether a result came from a real backend call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResultMode {
    /// The external backend produced the image.
    Real,
    /// The original image stands in for the result.
    Simulated {
        /// Why no real call produced the result.
        reason: SimulationReason,
    },
}

impl ResultMode {
    /// Simulation the user asked for.
    #[must_use]
    pub const fn requested() -> Self {
        Self::Simulated {
            reason: SimulationReason::Requested,
        }
    }

    /// Simulation substituted after a backend failure.
    #[must_use]
    pub fn fallback(error: impl Into<String>) -> Self {
        Self::Simulated {
            reason: SimulationReason::Fallback {
                error: error.into(),
            },
        }
    }

    /// Whether the result is simulated.
    #[must_use]
    pub const fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated { .. })
    }
}

/// Why a result was simulated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimulationReason {
    /// The caller asked for simulation.
    Requested,
    /// The backend call failed or no backend is configured.
    Fallback {
        /// Description of the failure.
        error: String,
    },
}

/// Result descriptor handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformResult {
    /// URL of the input image.
    pub original_url: String,
    /// URL of the result (the original URL when simulated).
    pub transformed_url: String,
    /// Prompt sent to the backend.
    pub prompt: String,
    /// Real or simulated.
    #[serde(flatten)]
    pub mode: ResultMode,
    /// When the result was produced.
    pub created_at: DateTime<Utc>,
}

/// Terminal outcome applied to a transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformationOutcome {
    /// A result was produced.
    Completed {
        /// Stored result path(s) or URL(s).
        output_paths: Vec<String>,
        /// Real or simulated.
        mode: ResultMode,
        /// Credits charged for the result.
        credits_charged: i64,
    },
    /// No result.
    Failed {
        /// Error description.
        error: String,
    },
}

/// One transformation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformation {
    /// Transformation ID.
    pub id: TransformationId,
    /// Owner.
    pub user_id: UserId,
    /// Path of the input image, relative to the uploads root.
    pub input_path: String,
    /// Prompt text.
    pub prompt: String,
    /// Catalog option id, or [`CUSTOM_TRANSFORMATION`].
    pub transformation_type: String,
    /// Current status.
    pub status: TransformationStatus,
    /// Result path(s); empty until completed.
    pub output_paths: Vec<String>,
    /// Error text of a failed transformation.
    pub error: Option<String>,
    /// Number of edits made from this transformation.
    pub edits_used: i32,
    /// The transformation this one edits, if any.
    pub parent_id: Option<TransformationId>,
    /// Real or simulated, once completed.
    pub result_mode: Option<ResultMode>,
    /// Credits charged.
    pub credits_charged: i64,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl Transformation {
    /// Create a pending transformation.
    #[must_use]
    pub fn new(
        user_id: UserId,
        input_path: impl Into<String>,
        prompt: impl Into<String>,
        transformation_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransformationId::generate(),
            user_id,
            input_path: input_path.into(),
            prompt: prompt.into(),
            transformation_type: transformation_type.into(),
            status: TransformationStatus::Pending,
            output_paths: Vec::new(),
            error: None,
            edits_used: 0,
            parent_id: None,
            result_mode: None,
            credits_charged: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark this transformation as an edit of `parent`.
    #[must_use]
    pub fn edit_of(mut self, parent: TransformationId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    fn transition(&mut self, next: TransformationStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(LabError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Move to processing.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::InvalidTransition`] unless pending.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TransformationStatus::Processing, now)
    }

    /// Apply the terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::InvalidTransition`] if already terminal.
    pub fn finish(&mut self, outcome: TransformationOutcome, now: DateTime<Utc>) -> Result<()> {
        match outcome {
            TransformationOutcome::Completed {
                output_paths,
                mode,
                credits_charged,
            } => {
                self.transition(TransformationStatus::Completed, now)?;
                self.output_paths = output_paths;
                self.result_mode = Some(mode);
                self.credits_charged = credits_charged;
            }
            TransformationOutcome::Failed { error } => {
                self.transition(TransformationStatus::Failed, now)?;
                self.error = Some(error);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Transformation {
        Transformation::new(UserId::generate(), "u/in.png", "make it a cartoon", "cartoon-style")
    }

    #[test]
    fn status_names_parse_back() {
        for status in [
            TransformationStatus::Pending,
            TransformationStatus::Processing,
            TransformationStatus::Completed,
            TransformationStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TransformationStatus>().unwrap(), status);
        }
        assert_eq!(
            "done".parse::<TransformationStatus>(),
            Err(LabError::InvalidStatus("done".into()))
        );
    }

    #[test]
    fn completes_exactly_once() {
        let now = Utc::now();
        let mut t = pending();
        t.start(now).unwrap();
        t.finish(
            TransformationOutcome::Completed {
                output_paths: vec!["u/out.png".into()],
                mode: ResultMode::Real,
                credits_charged: 2,
            },
            now,
        )
        .unwrap();
        assert_eq!(t.status, TransformationStatus::Completed);
        assert_eq!(t.credits_charged, 2);

        let err = t
            .finish(
                TransformationOutcome::Failed {
                    error: "late".into(),
                },
                now,
            )
            .unwrap_err();
        assert_eq!(
            err,
            LabError::InvalidTransition {
                from: TransformationStatus::Completed,
                to: TransformationStatus::Failed
            }
        );
        assert!(t.error.is_none());
    }

    #[test]
    fn pending_can_fail_directly() {
        let mut t = pending();
        t.finish(
            TransformationOutcome::Failed {
                error: "image missing".into(),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(t.status, TransformationStatus::Failed);
        assert!(t.start(Utc::now()).is_err());
    }

    #[test]
    fn result_mode_is_tagged_in_json() {
        let result = TransformResult {
            original_url: "/uploads/a.png".into(),
            transformed_url: "/uploads/a.png".into(),
            prompt: "p".into(),
            mode: ResultMode::fallback("timeout"),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["mode"], "simulated");
        assert_eq!(json["reason"]["kind"], "fallback");
        assert_eq!(json["reason"]["error"], "timeout");
        assert!(result.mode.is_simulated());
        assert!(!ResultMode::Real.is_simulated());
    }
}
