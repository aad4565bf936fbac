//! Processing tasks.
//!
//! The runner is generic over [`ProcessTask`]; the production task is
//! [`TranscodeTask`], which downloads the raw upload, produces MP4
//! renditions with ffmpeg, and uploads them back to object storage.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use vod_hub::StatusHub;
use vod_models::{ProcessingJob, StatusEvent};
use vod_storage::{rendition_key, ObjectStore};

use crate::error::{WorkerError, WorkerResult};

/// Progress reporting handle handed to a running task. Progress flows
/// through the status hub only; the catalog sees state transitions,
/// not percentages.
#[derive(Clone)]
pub struct ProgressReporter {
    hub: StatusHub,
    job: ProcessingJob,
}

impl ProgressReporter {
    pub fn new(hub: StatusHub, job: ProcessingJob) -> Self {
        Self { hub, job }
    }

    /// Report progress as a percentage (0-100).
    pub async fn report(&self, percent: u8) {
        self.hub
            .publish_best_effort(StatusEvent::progress(
                self.job.media_id.clone(),
                self.job.attempt,
                percent,
            ))
            .await;
    }
}

/// A unit of media processing executed under a lease.
#[async_trait]
pub trait ProcessTask: Send + Sync {
    async fn run(&self, job: &ProcessingJob, progress: &ProgressReporter) -> WorkerResult<()>;
}

/// Target renditions produced from every source.
const RENDITIONS: &[(&str, &str)] = &[("720p.mp4", "1280x720"), ("480p.mp4", "854x480")];

/// Download, transcode with ffmpeg, upload.
pub struct TranscodeTask {
    storage: Arc<ObjectStore>,
    work_dir: PathBuf,
}

impl TranscodeTask {
    pub fn new(storage: Arc<ObjectStore>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            work_dir: work_dir.into(),
        }
    }

    async fn transcode(&self, input: &PathBuf, output: &PathBuf, size: &str) -> WorkerResult<()> {
        debug!("Transcoding {} -> {} ({})", input.display(), output.display(), size);

        let status = Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-vf")
            .arg(format!("scale={}", size.replace('x', ":")))
            .arg("-c:v")
            .arg("libx264")
            .arg("-preset")
            .arg("fast")
            .arg("-c:a")
            .arg("aac")
            .arg("-movflags")
            .arg("+faststart")
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| WorkerError::transcode_failed(format!("failed to spawn ffmpeg: {e}")))?;

        if !status.success() {
            return Err(WorkerError::transcode_failed(format!(
                "ffmpeg exited with {status}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessTask for TranscodeTask {
    async fn run(&self, job: &ProcessingJob, progress: &ProgressReporter) -> WorkerResult<()> {
        let job_dir = self.work_dir.join(job.job_id.as_str());
        tokio::fs::create_dir_all(&job_dir).await?;

        let source = job_dir.join("source");
        self.storage.download_file(&job.source_key, &source).await?;
        progress.report(10).await;

        // Transcode and upload renditions, splitting the remaining
        // progress range across them.
        let per_rendition = 90 / RENDITIONS.len() as u8;
        for (i, (name, size)) in RENDITIONS.iter().enumerate() {
            let output = job_dir.join(name);
            self.transcode(&source, &output, size).await?;

            let key = rendition_key(&job.media_id, name);
            self.storage
                .upload_file(&output, &key, "video/mp4")
                .await?;

            progress.report(10 + per_rendition * (i as u8 + 1)).await;
            info!(media_id = %job.media_id, rendition = name, "rendition uploaded");
        }

        tokio::fs::remove_dir_all(&job_dir).await.ok();
        Ok(())
    }
}
