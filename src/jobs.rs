use crate::{
    models::{JobSummary, NewJob, ScraperJob},
    pipeline::{OpportunityPipeline, PipelineError},
    sources::ListingSource,
};
use std::sync::Arc;
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinHandle,
};
use tracing::{error, warn};

/// Background scan runner. Jobs are created synchronously so the caller gets
/// an id at once; processing happens on the worker with bounded concurrency.
#[derive(Clone)]
pub struct JobQueue {
    pipeline: OpportunityPipeline,
    tx: mpsc::Sender<ScanTask>,
}

struct ScanTask {
    job: ScraperJob,
    source: Box<dyn ListingSource>,
}

impl JobQueue {
    pub fn spawn(
        pipeline: OpportunityPipeline,
        capacity: usize,
        concurrency: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ScanTask>(capacity.max(1));
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let worker = pipeline.clone();

        let handle = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let pipeline = worker.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(err) = pipeline.process(&task.job, task.source.as_ref()).await {
                        error!(
                            target = "flipscout.jobs",
                            job_id = %task.job.id,
                            stage = err.stage(),
                            error = %err.detail(),
                            "job_not_closed"
                        );
                    }
                });
            }
        });

        (Self { pipeline, tx }, handle)
    }

    /// Creates the RUNNING job and queues it for processing.
    pub async fn enqueue(
        &self,
        job: NewJob,
        source: Box<dyn ListingSource>,
    ) -> Result<ScraperJob, PipelineError> {
        let job = self.pipeline.start(job).await?;
        let task = ScanTask {
            job: job.clone(),
            source,
        };
        if self.tx.send(task).await.is_err() {
            warn!(target = "flipscout.jobs", job_id = %job.id, "queue_closed");
            self.pipeline
                .fail(&job, JobSummary::default(), "worker not available".to_string())
                .await?;
            return Err(PipelineError::internal("enqueue", "worker not available"));
        }
        Ok(job)
    }

    pub async fn get(&self, id: uuid::Uuid) -> Result<ScraperJob, PipelineError> {
        self.pipeline.job(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::models::{JobStatus, Platform, RawListingItem};
    use crate::pipeline::PipelineErrorKind;
    use crate::sources::StaticListings;
    use crate::store::MemoryStore;
    use tokio::time::{Duration, sleep};

    fn listing(id: &str) -> RawListingItem {
        serde_json::from_value(serde_json::json!({
            "external_id": id,
            "title": "Sealed Nintendo Switch OLED console",
            "description": "Gift, never opened",
            "condition": "new",
            "category": "video games",
            "price": 200.0
        }))
        .unwrap()
    }

    fn new_job() -> NewJob {
        NewJob {
            platform: Platform::Ebay,
            owner_id: "owner-1".into(),
            location: None,
            category: None,
        }
    }

    fn pipeline(store: &Arc<MemoryStore>) -> OpportunityPipeline {
        OpportunityPipeline::new(
            store.clone(),
            store.clone(),
            store.clone(),
            None,
            Thresholds::default(),
        )
    }

    #[tokio::test]
    async fn queued_scan_reaches_terminal_state() {
        let store = Arc::new(MemoryStore::new());
        let (queue, _worker) = JobQueue::spawn(pipeline(&store), 4, 2);
        let job = queue
            .enqueue(
                new_job(),
                Box::new(StaticListings::new(vec![listing("e-1"), listing("e-2")])),
            )
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Running);

        let mut current = queue.get(job.id).await.unwrap();
        for _ in 0..50 {
            if current.status != JobStatus::Running {
                break;
            }
            sleep(Duration::from_millis(10)).await;
            current = queue.get(job.id).await.unwrap();
        }
        assert_eq!(current.status, JobStatus::Completed);
        assert_eq!(current.opportunities_found, 2);
    }

    #[tokio::test]
    async fn closed_queue_fails_the_created_job() {
        let store = Arc::new(MemoryStore::new());
        let (queue, worker) = JobQueue::spawn(pipeline(&store), 4, 2);
        worker.abort();
        let _ = worker.await;

        let err = queue
            .enqueue(new_job(), Box::new(StaticListings::new(vec![listing("e-1")])))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::Internal);

        let jobs = store.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[0].error_message.as_deref(), Some("worker not available"));
        assert!(jobs[0].completed_at.is_some());
    }
}
