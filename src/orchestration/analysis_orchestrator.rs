// Analysis Orchestrator: drives each image through pending -> processing -> {completed, error}

use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::core::errors::{PipelineError, PipelineResult};
use crate::core::types::{
    BatchReport, ImageOutcome, ImageRecord, ImageStatus, ImageSubmission, Preset, StatusUpdate,
};
use crate::services::endpoint::VisionEndpoint;
use crate::services::validation::validate_result;
use crate::storage::ImageStore;
use crate::utils::Metrics;

/// Batch coordinator
pub struct AnalysisOrchestrator {
    endpoint: Arc<dyn VisionEndpoint>,
    store: Arc<dyn ImageStore>,
    metrics: Metrics,
    analysis_semaphore: Arc<Semaphore>,
    in_flight: DashMap<Uuid, ()>,
}

/// Removes an id from the in-flight registry when the analysis ends or is dropped
struct InFlightGuard<'a> {
    registry: &'a DashMap<Uuid, ()>,
    id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

impl AnalysisOrchestrator {
    pub fn new(
        endpoint: Arc<dyn VisionEndpoint>,
        store: Arc<dyn ImageStore>,
        metrics: Metrics,
        concurrency: usize,
    ) -> Self {
        let concurrency = concurrency.max(1);
        info!(
            "Orchestrator ready (endpoint: {}, concurrency: {})",
            endpoint.name(),
            concurrency
        );
        Self {
            endpoint,
            store,
            metrics,
            analysis_semaphore: Arc::new(Semaphore::new(concurrency)),
            in_flight: DashMap::new(),
        }
    }

    /// Analyze a batch of images for one session.
    ///
    /// Every image is persisted as `pending` before the first network call.
    /// Images are then analyzed in submission order, at most `concurrency`
    /// at a time. Per-image failures end up in the report; the batch itself
    /// always completes.
    #[instrument(skip(self, images, prompt, preset), fields(total_images = images.len()))]
    pub async fn submit_batch(
        &self,
        session_id: &str,
        images: Vec<ImageSubmission>,
        prompt: Option<String>,
        preset: Option<Preset>,
    ) -> PipelineResult<BatchReport> {
        let start_time = Instant::now();
        let preset = preset.unwrap_or_default();
        let prompt = prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| default_prompt(&preset));

        info!("Submitting {} images for session {}", images.len(), session_id);

        // Submission index travels with each image so the report keeps input order
        let mut queued: Vec<(usize, Uuid)> = Vec::with_capacity(images.len());
        let mut rejected: Vec<(usize, ImageOutcome)> = Vec::new();
        for (index, submission) in images.into_iter().enumerate() {
            let record = ImageRecord::pending(session_id, submission.file_reference);
            let id = record.id;
            match self.store.create_image(record) {
                Ok(()) => queued.push((index, id)),
                Err(e) => {
                    error!("Failed to record image {}: {}", id, e);
                    rejected.push((index, ImageOutcome {
                        image_id: id,
                        status: ImageStatus::Error,
                        processing_time_ms: 0.0,
                        warnings: Vec::new(),
                        error: Some(PipelineError::from(e).to_string()),
                    }));
                }
            }
        }

        debug!("{} images pending, {} rejected by store", queued.len(), rejected.len());

        let tasks = queued.iter().map(|&(index, id)| {
            let prompt = prompt.as_str();
            let preset = &preset;
            async move {
                // Permits are granted FIFO, so images start in submission order
                let _permit = match self.analysis_semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            ImageOutcome {
                                image_id: id,
                                status: ImageStatus::Error,
                                processing_time_ms: 0.0,
                                warnings: Vec::new(),
                                error: Some("analysis pool closed".to_string()),
                            },
                        )
                    }
                };
                let outcome = match self.process_image(id, prompt, preset).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Image {} failed outside analysis: {}", id, e);
                        ImageOutcome {
                            image_id: id,
                            status: ImageStatus::Error,
                            processing_time_ms: 0.0,
                            warnings: Vec::new(),
                            error: Some(e.to_string()),
                        }
                    }
                };
                (index, outcome)
            }
        });

        let mut indexed = join_all(tasks).await;
        indexed.extend(rejected);
        indexed.sort_by_key(|(index, _)| *index);
        let results: Vec<ImageOutcome> = indexed.into_iter().map(|(_, outcome)| outcome).collect();

        let successful = results
            .iter()
            .filter(|r| r.status == ImageStatus::Completed)
            .count();
        let failed = results.len() - successful;
        let processing_time_ms = start_time.elapsed().as_secs_f64() * 1000.0;

        self.metrics.record_batch_processed();
        info!(
            "Batch for session {} done in {:.2}s: {} successful, {} failed",
            session_id,
            processing_time_ms / 1000.0,
            successful,
            failed
        );

        Ok(BatchReport {
            session_id: session_id.to_string(),
            total: results.len(),
            successful,
            failed,
            processing_time_ms,
            results,
        })
    }

    /// Analyze one stored `pending` image.
    ///
    /// Endpoint and validation failures are recorded on the image and returned
    /// as an `error` outcome. Storage failures and a second concurrent call for
    /// the same id surface as `Err`.
    #[instrument(skip(self, prompt, preset))]
    pub async fn process_image(
        &self,
        image_id: Uuid,
        prompt: &str,
        preset: &Preset,
    ) -> PipelineResult<ImageOutcome> {
        if self.in_flight.insert(image_id, ()).is_some() {
            return Err(PipelineError::AlreadyInFlight(image_id.to_string()));
        }
        let _guard = InFlightGuard {
            registry: &self.in_flight,
            id: image_id,
        };

        let started = Instant::now();
        let record = self.store.get_image(image_id)?;
        self.store
            .update_image_status(image_id, ImageStatus::Processing, StatusUpdate::default())?;

        let analysis = self
            .endpoint
            .analyze(&record.file_reference, prompt, None)
            .await;

        let result = match analysis {
            Ok(result) => result,
            Err(source) => {
                let message = source.to_string();
                warn!(
                    "{}",
                    PipelineError::AnalysisFailed {
                        image_id: image_id.to_string(),
                        source,
                    }
                );
                return self.finish_with_error(image_id, message, Vec::new(), started);
            }
        };

        let outcome = validate_result(&result, preset);
        if !outcome.is_valid {
            let message = outcome.errors.join("; ");
            warn!(
                "{}",
                PipelineError::ValidationFailed {
                    image_id: image_id.to_string(),
                    errors: outcome.errors,
                }
            );
            return self.finish_with_error(image_id, message, outcome.warnings, started);
        }

        for warning in &outcome.warnings {
            debug!("Image {}: {}", image_id, warning);
        }

        self.store.update_image_status(
            image_id,
            ImageStatus::Completed,
            StatusUpdate {
                metadata: Some(result),
                error: None,
            },
        )?;

        let elapsed = started.elapsed();
        self.metrics
            .record_image_completed(elapsed, outcome.warnings.len());
        info!(
            "Image {} completed in {:.0}ms ({} warnings)",
            image_id,
            elapsed.as_secs_f64() * 1000.0,
            outcome.warnings.len()
        );

        Ok(ImageOutcome {
            image_id,
            status: ImageStatus::Completed,
            processing_time_ms: elapsed.as_secs_f64() * 1000.0,
            warnings: outcome.warnings,
            error: None,
        })
    }

    fn finish_with_error(
        &self,
        image_id: Uuid,
        message: String,
        warnings: Vec<String>,
        started: Instant,
    ) -> PipelineResult<ImageOutcome> {
        self.store.update_image_status(
            image_id,
            ImageStatus::Error,
            StatusUpdate {
                metadata: None,
                error: Some(message.clone()),
            },
        )?;

        let elapsed = started.elapsed();
        self.metrics.record_image_failed(elapsed);

        Ok(ImageOutcome {
            image_id,
            status: ImageStatus::Error,
            processing_time_ms: elapsed.as_secs_f64() * 1000.0,
            warnings,
            error: Some(message),
        })
    }
}

/// SEO instruction used when the caller supplies no prompt
pub fn default_prompt(preset: &Preset) -> String {
    let mut prompt = format!(
        "Analyze this image for search engine optimization. Respond with a single JSON object \
         with exactly these fields:\n\
         - \"alt_text\": a concise, descriptive alternative text (at most 125 characters)\n\
         - \"title\": a compelling title (at most {} characters)\n\
         - \"keywords\": an array of {} to {} distinct, relevant keywords, most important first\n\
         Do not include any text outside the JSON object.",
        preset.title_max_length(),
        preset.keywords_min(),
        preset.keywords_max(),
    );
    if let Some(rules) = preset.keyword_rules.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        prompt.push_str("\nKeyword guidance: ");
        prompt.push_str(rules);
    }
    prompt
}
