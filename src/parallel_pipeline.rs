// THEORY:
// The `parallel_pipeline` module analyzes many shots at once. Frames of ONE shot must be
// segmented sequentially (the segmenter carries the previous frame), so parallelism lives
// strictly between shots: every shot gets its own segmenter, and nothing mutable is shared.
//
// Architecture:
// - A dispatcher hands jobs round-robin to a fixed pool of workers (one per CPU core).
// - Each worker runs the CPU-bound analysis on tokio's blocking pool and replies on a
//   oneshot channel.
// - Callers await replies in submission order, so results come back in input order no
//   matter which shot finishes first. A failing shot produces an `Err` in its own slot and
//   never affects its neighbors.

use crate::error::{FlowError, FlowResult};
use crate::frame_source::FolderFrameSource;
use crate::pipeline::{ShotAnalyzer, ShotReport};
use futures::future::join_all;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// One shot to analyze.
#[derive(Debug, Clone, PartialEq)]
pub struct ShotJob {
    pub frames_dir: PathBuf,
    pub pull_duration_s: Option<f64>,
}

impl ShotJob {
    pub fn new(frames_dir: impl Into<PathBuf>) -> Self {
        Self {
            frames_dir: frames_dir.into(),
            pull_duration_s: None,
        }
    }
}

struct AnalysisTask {
    job: ShotJob,
    result_sender: oneshot::Sender<FlowResult<ShotReport>>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<AnalysisTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Must be called from within a tokio runtime.
    pub fn new(analyzer: ShotAnalyzer, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<AnalysisTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<AnalysisTask>())
            .unzip();

        // Dispatcher
        tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % worker_count;
            }
        });

        let workers = worker_receivers
            .into_iter()
            .enumerate()
            .map(|(worker_id, mut worker_receiver)| {
                let worker_analyzer = analyzer.clone();
                tokio::spawn(async move {
                    while let Some(task) = worker_receiver.recv().await {
                        debug!(worker_id, dir = %task.job.frames_dir.display(), "worker picked up shot");
                        let result = Self::analyze(worker_analyzer.clone(), task.job).await;
                        let _ = task.result_sender.send(result);
                    }
                })
            })
            .collect();

        Self { task_sender, workers }
    }

    async fn analyze(analyzer: ShotAnalyzer, job: ShotJob) -> FlowResult<ShotReport> {
        tokio::task::spawn_blocking(move || {
            analyzer
                .analyze_folder(&job.frames_dir, job.pull_duration_s)
                .map(|analysis| analysis.report)
        })
        .await
        .map_err(|err| FlowError::Join(err.to_string()))?
    }

    pub async fn submit(&self, job: ShotJob) -> FlowResult<ShotReport> {
        let (result_sender, result_receiver) = oneshot::channel();
        self.task_sender
            .send(AnalysisTask { job, result_sender })
            .map_err(|_| FlowError::Join("worker pool is shut down".to_string()))?;
        result_receiver
            .await
            .map_err(|_| FlowError::Join("worker dropped the shot".to_string()))?
    }

    /// Stops accepting work and waits for in-flight shots to finish.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Analyzes many shots concurrently, one worker per CPU core by default.
pub struct BatchAnalyzer {
    pool: WorkerPool,
}

impl BatchAnalyzer {
    pub fn new(analyzer: ShotAnalyzer) -> Self {
        Self::with_workers(analyzer, num_cpus::get())
    }

    pub fn with_workers(analyzer: ShotAnalyzer, worker_count: usize) -> Self {
        Self {
            pool: WorkerPool::new(analyzer, worker_count),
        }
    }

    /// Results are in the same order as `jobs`.
    pub async fn analyze_all(&self, jobs: Vec<ShotJob>) -> Vec<FlowResult<ShotReport>> {
        let total = jobs.len();
        let results = join_all(jobs.into_iter().map(|job| self.pool.submit(job))).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(failed, total, "some shots could not be analyzed");
        }
        info!(total, succeeded = total - failed, "batch complete");
        results
    }

    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}

/// Every immediate subdirectory of `root` that holds frame files, sorted by path.
pub fn discover_shot_dirs(root: impl AsRef<Path>) -> FlowResult<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir() && FolderFrameSource::has_frames(path))
        .collect();
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;
    use crate::core_modules::classifier::ShotClassifier;
    use image::{Rgb, RgbImage};

    fn write_shot(root: &Path, name: &str, frames: usize) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..frames {
            RgbImage::from_pixel(40, 30, Rgb([220, 220, 220]))
                .save(dir.join(format!("frame_{i:03}.png")))
                .unwrap();
        }
        dir
    }

    fn analyzer() -> ShotAnalyzer {
        ShotAnalyzer::new(AnalyzerConfig::default(), ShotClassifier::rules_only()).unwrap()
    }

    #[tokio::test]
    async fn results_keep_input_order_and_isolate_failures() {
        let root = tempfile::tempdir().unwrap();
        let long = write_shot(root.path(), "long", 7);
        let empty = write_shot(root.path(), "empty", 0);
        let short = write_shot(root.path(), "short", 2);

        let batch = BatchAnalyzer::with_workers(analyzer(), 2);
        let results = batch
            .analyze_all(vec![ShotJob::new(&long), ShotJob::new(&empty), ShotJob::new(&short)])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().frames_analyzed, 7);
        assert!(matches!(results[1], Err(FlowError::NoUsableFrames { .. })));
        assert_eq!(results[2].as_ref().unwrap().frames_analyzed, 2);
        batch.shutdown().await;
    }

    #[tokio::test]
    async fn explicit_pull_duration_is_kept() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_shot(root.path(), "shot", 3);
        let batch = BatchAnalyzer::new(analyzer());
        let job = ShotJob { frames_dir: dir, pull_duration_s: Some(31.5) };

        let results = batch.analyze_all(vec![job]).await;
        assert_eq!(results[0].as_ref().unwrap().features.pull_duration_s, Some(31.5));
    }

    #[test]
    fn discovers_only_folders_with_frames() {
        let root = tempfile::tempdir().unwrap();
        write_shot(root.path(), "b_shot", 1);
        write_shot(root.path(), "a_shot", 1);
        write_shot(root.path(), "no_frames", 0);
        fs::write(root.path().join("loose.png"), b"x").unwrap();

        let dirs = discover_shot_dirs(root.path()).unwrap();
        let names: Vec<_> = dirs.iter().map(|d| d.file_name().unwrap().to_string_lossy().to_string()).collect();
        assert_eq!(names, vec!["a_shot", "b_shot"]);
    }
}
