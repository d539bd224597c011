//! Retention sweeper.
//!
//! Expires old transformations and uploads, then removes files nothing
//! references any more. Runs periodically until shutdown and on demand.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;

use image_lab_store::Store;

use crate::config::ServiceConfig;
use crate::uploads::UploadStore;

/// Rows handled per category in one pass.
const SWEEP_BATCH: usize = 100;

/// Retention windows.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Age after which transformations and uploads are deleted.
    pub retention: chrono::Duration,
    /// Age after which an unreferenced file is deleted.
    pub orphan_grace: chrono::Duration,
    /// Pause between periodic sweeps.
    pub interval: Duration,
}

impl RetentionPolicy {
    /// Build the policy from configuration.
    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            retention: chrono::Duration::days(config.retention_days.max(0)),
            orphan_grace: chrono::Duration::hours(config.orphan_grace_hours.max(0)),
            interval: Duration::from_secs(config.sweep_interval_seconds.max(1)),
        }
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Transformation rows deleted.
    pub transformations_deleted: usize,
    /// Upload rows deleted.
    pub images_deleted: usize,
    /// Unreferenced files deleted.
    pub orphan_files_deleted: usize,
    /// Files deleted along with their rows.
    pub files_deleted: usize,
    /// Items skipped after an error.
    pub failures: usize,
}

/// Background retention task.
pub struct RetentionSweeper {
    store: Arc<dyn Store>,
    uploads: UploadStore,
    policy: RetentionPolicy,
}

impl RetentionSweeper {
    /// Create a sweeper.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, uploads: UploadStore, policy: RetentionPolicy) -> Self {
        Self {
            store,
            uploads,
            policy,
        }
    }

    /// Sweep every `interval` until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_seconds = self.policy.interval.as_secs(),
            retention_days = self.policy.retention.num_days(),
            "Retention sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("Retention sweeper shutting down");
                    break;
                }
                () = sleep(self.policy.interval) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// Run one sweep now.
    pub async fn sweep_once(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Run one sweep as of `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let cutoff = now - self.policy.retention;

        self.expire_transformations(cutoff, &mut report).await;
        self.expire_images(cutoff, &mut report).await;
        self.remove_orphans(now, &mut report).await;

        tracing::info!(
            transformations = report.transformations_deleted,
            images = report.images_deleted,
            orphans = report.orphan_files_deleted,
            files = report.files_deleted,
            failures = report.failures,
            "Retention sweep completed"
        );
        report
    }

    async fn expire_transformations(&self, cutoff: DateTime<Utc>, report: &mut SweepReport) {
        let expired = match self
            .store
            .list_transformations_created_before(cutoff, SWEEP_BATCH)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list expired transformations");
                report.failures += 1;
                return;
            }
        };

        'rows: for transformation in expired {
            for path in &transformation.output_paths {
                match self.uploads.delete(path).await {
                    Ok(true) => report.files_deleted += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(
                            transformation_id = %transformation.id,
                            path = %path,
                            error = %e,
                            "Failed to delete transformation output"
                        );
                        report.failures += 1;
                        continue 'rows;
                    }
                }
            }

            match self.store.delete_transformation(&transformation.id).await {
                Ok(()) => {
                    tracing::debug!(transformation_id = %transformation.id, "Transformation expired");
                    report.transformations_deleted += 1;
                }
                Err(e) => {
                    tracing::error!(
                        transformation_id = %transformation.id,
                        error = %e,
                        "Failed to delete transformation"
                    );
                    report.failures += 1;
                }
            }
        }
    }

    async fn expire_images(&self, cutoff: DateTime<Utc>, report: &mut SweepReport) {
        let expired = match self
            .store
            .list_user_images_created_before(cutoff, SWEEP_BATCH)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list expired uploads");
                report.failures += 1;
                return;
            }
        };

        for image in expired {
            match self.uploads.delete(&image.path).await {
                Ok(true) => report.files_deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(image_id = %image.id, error = %e, "Failed to delete upload");
                    report.failures += 1;
                    continue;
                }
            }

            match self.store.delete_user_image(&image.id).await {
                Ok(()) => report.images_deleted += 1,
                Err(e) => {
                    tracing::error!(image_id = %image.id, error = %e, "Failed to delete upload row");
                    report.failures += 1;
                }
            }
        }
    }

    async fn remove_orphans(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let referenced = match self.store.referenced_paths().await {
            Ok(paths) => paths,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load referenced paths");
                report.failures += 1;
                return;
            }
        };
        let files = match self.uploads.list_files().await {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list upload files");
                report.failures += 1;
                return;
            }
        };

        let grace_cutoff = SystemTime::from(now - self.policy.orphan_grace);
        for file in files {
            if file.modified >= grace_cutoff || referenced.contains(&file.path) {
                continue;
            }
            match self.uploads.delete(&file.path).await {
                Ok(true) => {
                    tracing::debug!(path = %file.path, "Orphan file deleted");
                    report.orphan_files_deleted += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(path = %file.path, error = %e, "Failed to delete orphan file");
                    report.failures += 1;
                }
            }
        }
    }
}
