use crate::analysis::{AnalysisOutcome, Analyzer, SellabilityResult};
use crate::config::Thresholds;
use crate::estimate::{EstimateInput, EstimationResult, estimate};
use crate::market_value::MarketValueCalculator;
use crate::models::{
    DecisionSource, JobStatus, JobSummary, JobUpdate, ListingRecord, NewJob, RawListingItem,
    ScraperJob,
};
use crate::sources::ListingSource;
use crate::store::{JobStore, ListingStore, PriceHistoryStore, StoreError, UpsertOutcome};
use std::{future::Future, sync::Arc};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    NotFound,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn not_found(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::NotFound,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    fn store(stage: &'static str, err: StoreError) -> Self {
        Self::internal(stage, err.to_string())
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

/// Whether a listing is written, and on whose authority.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Persist {
        source: DecisionSource,
        sellability: Option<SellabilityResult>,
    },
    Reject,
}

/// Persistence gate. A completed sellability analysis decides on its own;
/// otherwise (disabled, unavailable, disqualified early, or no market data)
/// the heuristic score decides.
pub fn decide(
    estimate: &EstimationResult,
    analysis: Option<&AnalysisOutcome>,
    thresholds: &Thresholds,
) -> Decision {
    match analysis {
        Some(AnalysisOutcome::Verified(result)) => {
            if result.meets_threshold
                && result.true_discount_percent >= thresholds.min_true_discount_pct
            {
                Decision::Persist {
                    source: DecisionSource::Verified,
                    sellability: Some(result.clone()),
                }
            } else {
                Decision::Reject
            }
        }
        Some(AnalysisOutcome::NotWorthInvestigating)
        | Some(AnalysisOutcome::DiscountTooSmall { .. })
        | Some(AnalysisOutcome::NoMarketData)
        | None => {
            if estimate.value_score >= thresholds.heuristic_min_score {
                Decision::Persist {
                    source: DecisionSource::Heuristic,
                    sellability: None,
                }
            } else {
                Decision::Reject
            }
        }
    }
}

enum ItemOutcome {
    Skipped,
    Rejected,
    Saved,
    Failed,
}

/// Drives scan jobs: fetch raw listings, evaluate each one, persist the
/// opportunities, and close the job record.
#[derive(Clone)]
pub struct OpportunityPipeline {
    listings: Arc<dyn ListingStore>,
    jobs: Arc<dyn JobStore>,
    market_value: Arc<MarketValueCalculator>,
    analyzer: Option<Arc<Analyzer>>,
    thresholds: Thresholds,
}

impl OpportunityPipeline {
    pub fn new(
        listings: Arc<dyn ListingStore>,
        jobs: Arc<dyn JobStore>,
        history: Arc<dyn PriceHistoryStore>,
        analyzer: Option<Arc<Analyzer>>,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            listings,
            jobs,
            market_value: Arc::new(MarketValueCalculator::new(history)),
            analyzer,
            thresholds,
        }
    }

    pub fn analysis_enabled(&self) -> bool {
        self.analyzer.is_some()
    }

    /// Creates the RUNNING job record.
    pub async fn start(&self, job: NewJob) -> Result<ScraperJob, PipelineError> {
        let created = self
            .jobs
            .create_job(job)
            .await
            .map_err(|err| PipelineError::store("create_job", err))?;
        info!(
            target = "flipscout.pipeline",
            job_id = %created.id,
            platform = %created.platform,
            owner_id = %created.owner_id,
            "job_started"
        );
        Ok(created)
    }

    pub async fn job(&self, id: Uuid) -> Result<ScraperJob, PipelineError> {
        self.jobs
            .get_job(id)
            .await
            .map_err(|err| PipelineError::store("get_job", err))?
            .ok_or_else(|| PipelineError::not_found("jobs", format!("job {id} not found")))
    }

    pub async fn run(
        &self,
        job: NewJob,
        source: &dyn ListingSource,
    ) -> Result<ScraperJob, PipelineError> {
        let job = self.start(job).await?;
        self.process(&job, source).await
    }

    /// Runs a started job to its terminal state. `Err` only when the job
    /// record itself could not be closed.
    pub async fn process(
        &self,
        job: &ScraperJob,
        source: &dyn ListingSource,
    ) -> Result<ScraperJob, PipelineError> {
        let started = Instant::now();
        let items = match source.fetch().await {
            Ok(items) => items,
            Err(err) => {
                let message = format!("listing source `{}` failed: {err}", source.name());
                return self.fail(job, JobSummary::default(), message).await;
            }
        };
        crate::metrics::stage_elapsed("fetch_listings", started.elapsed().as_millis());

        let mut summary = JobSummary {
            scraped: items.len() as u32,
            ..JobSummary::default()
        };
        for item in &items {
            match self.process_item(job, item).await {
                Ok(ItemOutcome::Skipped) => summary.skipped += 1,
                Ok(ItemOutcome::Rejected) => summary.analyzed += 1,
                Ok(ItemOutcome::Saved) => {
                    summary.analyzed += 1;
                    summary.saved += 1;
                }
                Ok(ItemOutcome::Failed) => {
                    summary.analyzed += 1;
                    summary.errors += 1;
                }
                Err(err) => return self.fail(job, summary, err.to_string()).await,
            }
        }

        let update = JobUpdate {
            status: JobStatus::Completed,
            listings_found: summary.scraped,
            opportunities_found: summary.saved,
            summary,
            error_message: None,
        };
        let finished = self
            .jobs
            .update_job(job.id, update)
            .await
            .map_err(|err| PipelineError::store("update_job", err))?;
        crate::metrics::job_finished(JobStatus::Completed, started.elapsed().as_millis());
        info!(
            target = "flipscout.pipeline",
            job_id = %job.id,
            summary = %summary.summary_line(),
            "job_completed"
        );
        Ok(finished)
    }

    pub(crate) async fn fail(
        &self,
        job: &ScraperJob,
        summary: JobSummary,
        message: String,
    ) -> Result<ScraperJob, PipelineError> {
        warn!(
            target = "flipscout.pipeline",
            job_id = %job.id,
            error = %message,
            summary = %summary.summary_line(),
            "job_failed"
        );
        let update = JobUpdate {
            status: JobStatus::Failed,
            listings_found: summary.scraped,
            opportunities_found: summary.saved,
            summary,
            error_message: Some(message),
        };
        let finished = self
            .jobs
            .update_job(job.id, update)
            .await
            .map_err(|err| PipelineError::store("update_job", err))?;
        crate::metrics::job_finished(JobStatus::Failed, 0);
        Ok(finished)
    }

    /// `Err` only for a store outage, which ends the whole job.
    async fn process_item(
        &self,
        job: &ScraperJob,
        item: &RawListingItem,
    ) -> Result<ItemOutcome, PipelineError> {
        if !item.price.is_finite()
            || item.price <= 0.0
            || item.title.trim().is_empty()
            || item.external_id.trim().is_empty()
        {
            debug!(
                target = "flipscout.pipeline",
                job_id = %job.id,
                external_id = %item.external_id,
                price = item.price,
                "listing_skipped"
            );
            return Ok(ItemOutcome::Skipped);
        }

        let baseline = timed("estimate", async {
            estimate(&EstimateInput {
                title: &item.title,
                description: &item.description,
                asking_price: item.price,
                condition: item.condition.as_deref(),
                category: item
                    .category
                    .as_deref()
                    .filter(|category| !category.eq_ignore_ascii_case("unknown"))
                    .or(job.category.as_deref()),
            })
        })
        .await;

        let market_value = match self
            .market_value
            .calculate(
                &baseline.search_query,
                job.platform,
                self.thresholds.market_history_max_age_days,
            )
            .await
        {
            Ok(value) => value,
            Err(err) if err.is_unavailable() => {
                return Err(PipelineError::store("market_value", err));
            }
            Err(err) => {
                warn!(
                    target = "flipscout.pipeline",
                    external_id = %item.external_id,
                    error = %err,
                    "market_value_lookup_failed"
                );
                None
            }
        };

        let analysis = match &self.analyzer {
            Some(analyzer) => {
                let result = timed(
                    "analysis",
                    analyzer.analyze(item, &baseline.category, &job.owner_id),
                )
                .await;
                match result {
                    Ok(outcome) => Some(outcome),
                    Err(err) => {
                        warn!(
                            target = "flipscout.analysis",
                            job_id = %job.id,
                            external_id = %item.external_id,
                            stage = %err.stage,
                            reason = err.reason.as_str(),
                            detail = %err.detail,
                            "analysis_unavailable"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let (source, sellability) = match decide(&baseline, analysis.as_ref(), &self.thresholds) {
            Decision::Persist {
                source,
                sellability,
            } => (source, sellability),
            Decision::Reject => {
                debug!(
                    target = "flipscout.pipeline",
                    external_id = %item.external_id,
                    value_score = baseline.value_score,
                    "listing_rejected"
                );
                return Ok(ItemOutcome::Rejected);
            }
        };

        let mut record = ListingRecord::from_estimate(
            job.platform,
            &job.owner_id,
            item,
            &baseline.category,
            baseline.condition.as_str(),
            &baseline,
        );
        record.decided_by = source;
        record.sellability = sellability;
        record.market_value = market_value;

        match timed("persist", self.listings.upsert_listing(&record)).await {
            Ok(outcome) => {
                crate::metrics::opportunity_saved(job.platform);
                info!(
                    target = "flipscout.pipeline",
                    job_id = %job.id,
                    external_id = %record.external_id,
                    decided_by = ?record.decided_by,
                    inserted = outcome == UpsertOutcome::Inserted,
                    "listing_upserted"
                );
                Ok(ItemOutcome::Saved)
            }
            Err(err) if err.is_unavailable() => Err(PipelineError::store("persist", err)),
            Err(err) => {
                warn!(
                    target = "flipscout.pipeline",
                    job_id = %job.id,
                    external_id = %record.external_id,
                    error = %err,
                    "listing_upsert_failed"
                );
                Ok(ItemOutcome::Failed)
            }
        }
    }
}

async fn timed<T, Fut>(stage: &'static str, fut: Fut) -> T
where
    Fut: Future<Output = T>,
{
    let started = Instant::now();
    let value = fut.await;
    crate::metrics::stage_elapsed(stage, started.elapsed().as_millis());
    value
}
