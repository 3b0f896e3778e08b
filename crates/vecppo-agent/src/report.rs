//! Reporting and checkpoint collaborators

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use vecppo_core::Result;

use crate::utils::RunningMeanStd;

/// Scalar metrics of one training cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleMetrics {
    /// Update index
    pub update: usize,
    /// Environment frames collected so far
    pub frame: usize,
    /// Mean reward over the recent episode window
    pub mean_reward: Option<f32>,
    /// Windowed mean value loss
    pub value_loss: f32,
    /// Windowed mean policy loss
    pub policy_loss: f32,
    /// Windowed mean entropy
    pub entropy: f32,
    /// Action standard deviation during collection
    pub action_std: f32,
    /// Episodes finished since the run started
    pub episodes: usize,
}

/// Sink for periodic scalar metrics keyed by frame count
pub trait Reporter: Send {
    /// Cycle metrics, called every `log_interval` updates
    fn report(&mut self, metrics: &CycleMetrics);

    /// Average reward of an evaluation run
    fn report_test(&mut self, frame: usize, score: f32);
}

/// Writes metrics as structured `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&mut self, m: &CycleMetrics) {
        info!(
            update = m.update,
            frame = m.frame,
            mean_reward = m.mean_reward.unwrap_or(f32::NAN),
            value_loss = m.value_loss,
            policy_loss = m.policy_loss,
            entropy = m.entropy,
            action_std = m.action_std,
            episodes = m.episodes,
            "training cycle"
        );
    }

    fn report_test(&mut self, frame: usize, score: f32) {
        info!(frame, score, "average test reward");
    }
}

/// Keeps everything in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryReporter {
    /// Cycle metrics in arrival order
    pub cycles: Vec<CycleMetrics>,
    /// `(frame, score)` test results in arrival order
    pub tests: Vec<(usize, f32)>,
}

impl Reporter for MemoryReporter {
    fn report(&mut self, metrics: &CycleMetrics) {
        self.cycles.push(metrics.clone());
    }

    fn report_test(&mut self, frame: usize, score: f32) {
        self.tests.push((frame, score));
    }
}

/// Policy snapshot taken after an evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Frames collected when the snapshot was taken
    pub frame: usize,
    /// Average test reward
    pub score: f32,
    /// Whether the score is a new high
    pub best: bool,
    /// Flat policy parameters
    pub parameters: Vec<f32>,
    /// Observation normalizer statistics, when enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_stats: Option<RunningMeanStd>,
}

/// Persists policy snapshots keyed by frame count and test score
#[async_trait]
pub trait CheckpointSink: Send {
    /// Store a snapshot
    async fn save(&mut self, checkpoint: &Checkpoint) -> Result<()>;
}

/// Writes one JSON file per snapshot
#[derive(Debug, Clone)]
pub struct JsonCheckpointer {
    dir: PathBuf,
    written: Vec<PathBuf>,
    saved: usize,
}

impl JsonCheckpointer {
    /// Checkpointer writing into `dir`, created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
            saved: 0,
        }
    }

    /// Target directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written by the latest save
    #[must_use]
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Snapshots saved so far
    #[must_use]
    pub fn saved(&self) -> usize {
        self.saved
    }

    /// `dict_{frame}_TEST_{score}.json` for every snapshot
    #[must_use]
    pub fn test_file_name(frame: usize, score: f32) -> String {
        format!("dict_{frame}_TEST_{score:.3}.json")
    }

    /// `BEST_{frame}_{score}.json` for new high scores
    #[must_use]
    pub fn best_file_name(frame: usize, score: f32) -> String {
        format!("BEST_{frame}_{score:.3}.json")
    }
}

#[async_trait]
impl CheckpointSink for JsonCheckpointer {
    async fn save(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(checkpoint)?;

        let mut names = vec![Self::test_file_name(checkpoint.frame, checkpoint.score)];
        if checkpoint.best {
            names.push(Self::best_file_name(checkpoint.frame, checkpoint.score));
        }
        self.written.clear();
        for name in names {
            let path = self.dir.join(name);
            tokio::fs::write(&path, &json).await?;
            info!(path = %path.display(), "saved checkpoint");
            self.written.push(path);
        }
        self.saved += 1;
        Ok(())
    }
}

/// Keeps snapshots in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointer {
    /// Snapshots in arrival order
    pub checkpoints: Vec<Checkpoint>,
}

#[async_trait]
impl CheckpointSink for MemoryCheckpointer {
    async fn save(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints.push(checkpoint.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(best: bool) -> Checkpoint {
        Checkpoint {
            frame: 4096,
            score: -12.3456,
            best,
            parameters: vec![0.5, -0.25],
            observation_stats: None,
        }
    }

    #[test]
    fn test_file_names() {
        assert_eq!(JsonCheckpointer::test_file_name(100, 1.5), "dict_100_TEST_1.500.json");
        assert_eq!(JsonCheckpointer::best_file_name(100, -2.0), "BEST_100_-2.000.json");
    }

    #[tokio::test]
    async fn test_json_checkpointer_writes_test_and_best() {
        let dir = std::env::temp_dir().join(format!("vecppo-ckpt-{}", std::process::id()));
        let mut sink = JsonCheckpointer::new(&dir);

        sink.save(&checkpoint(false)).await.unwrap();
        assert_eq!(sink.written(), [dir.join("dict_4096_TEST_-12.346.json")]);
        sink.save(&checkpoint(true)).await.unwrap();
        // Only the latest save's files are remembered.
        assert_eq!(sink.written().len(), 2);
        assert_eq!(sink.saved(), 2);

        let best = dir.join("BEST_4096_-12.346.json");
        let json = tokio::fs::read_to_string(&best).await.unwrap();
        let restored: Checkpoint = serde_json::from_str(&json).unwrap();
        assert!(restored.best);
        assert_eq!(restored.parameters, vec![0.5, -0.25]);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[test]
    fn test_memory_reporter_records() {
        let mut reporter = MemoryReporter::default();
        reporter.report(&CycleMetrics {
            update: 3,
            ..CycleMetrics::default()
        });
        reporter.report_test(10, 1.0);
        assert_eq!(reporter.cycles[0].update, 3);
        assert_eq!(reporter.tests, vec![(10, 1.0)]);
    }

    #[test]
    fn test_memory_checkpointer_keeps_order() {
        let mut sink = MemoryCheckpointer::default();
        tokio_test::block_on(async {
            sink.save(&checkpoint(true)).await.unwrap();
            sink.save(&checkpoint(false)).await.unwrap();
        });
        let flags: Vec<bool> = sink.checkpoints.iter().map(|c| c.best).collect();
        assert_eq!(flags, vec![true, false]);
    }
}
