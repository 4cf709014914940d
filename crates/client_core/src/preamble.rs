use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DREAM_WEAVER_STAGES: &[&str] = &[
    "Listening to the echoes",
    "Gathering scattered reflections",
    "Shaping the crystal walls",
    "Illuminating the labyrinth",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreambleStage {
    pub name: String,
    /// Measured from the moment the preamble starts.
    pub offset: Duration,
}

impl PreambleStage {
    pub fn new(name: impl Into<String>, offset: Duration) -> Self {
        Self {
            name: name.into(),
            offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreamblePlan {
    stages: Vec<PreambleStage>,
}

impl PreamblePlan {
    /// Stages are ordered by offset; equal offsets keep their given order.
    pub fn new(mut stages: Vec<PreambleStage>) -> Self {
        stages.sort_by_key(|stage| stage.offset);
        Self { stages }
    }

    /// First stage at zero, last stage exactly at `total`.
    pub fn evenly_spaced<I, S>(names: I, total: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let gaps = names.len().saturating_sub(1) as u32;
        let stages = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| {
                let offset = if gaps == 0 {
                    total
                } else {
                    total * index as u32 / gaps
                };
                PreambleStage::new(name, offset)
            })
            .collect();
        Self::new(stages)
    }

    pub fn dream_weaver(total: Duration) -> Self {
        Self::evenly_spaced(DREAM_WEAVER_STAGES.iter().copied(), total)
    }

    pub fn stages(&self) -> &[PreambleStage] {
        &self.stages
    }

    pub fn total(&self) -> Duration {
        self.stages
            .last()
            .map(|stage| stage.offset)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreambleOutcome {
    Completed,
    Cancelled,
}

// Offsets are absolute; a slow `on_stage` does not push later stages back.
pub async fn run_preamble<F>(
    plan: &PreamblePlan,
    cancel: &CancellationToken,
    mut on_stage: F,
) -> PreambleOutcome
where
    F: FnMut(usize, &PreambleStage),
{
    let started = Instant::now();
    for (index, stage) in plan.stages().iter().enumerate() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("preamble: cancelled before stage={} name={}", index, stage.name);
                return PreambleOutcome::Cancelled;
            }
            _ = tokio::time::sleep_until(started + stage.offset) => {}
        }
        on_stage(index, stage);
    }
    PreambleOutcome::Completed
}
