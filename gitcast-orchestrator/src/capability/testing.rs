//! Scripted stage capabilities for executor and scheduler tests

use async_trait::async_trait;
use gitcast_core::domain::stage::{Stage, StageError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::{StageCapability, StageInput, StageOutput, StageRegistry};

/// Holds stage calls until the test releases them
pub struct Gate {
    entered: Semaphore,
    release: Semaphore,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Semaphore::new(0),
            release: Semaphore::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Waits until `n` more calls have entered the gate
    pub async fn wait_entered(&self, n: u32) {
        self.entered
            .acquire_many(n)
            .await
            .expect("gate semaphore closed")
            .forget();
    }

    pub fn release(&self, n: usize) {
        self.release.add_permits(n);
    }

    /// Highest number of calls observed inside the gate at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn pass(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entered.add_permits(1);
        self.release
            .acquire()
            .await
            .expect("gate semaphore closed")
            .forget();
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Capability that replays scripted outcomes, then succeeds
pub struct ScriptedStage {
    stage: Stage,
    calls: AtomicUsize,
    jobs: Mutex<Vec<Uuid>>,
    script: Mutex<VecDeque<Result<StageOutput, StageError>>>,
    failing: Mutex<HashMap<Uuid, StageError>>,
    panicking: Mutex<HashSet<Uuid>>,
    gate: Option<Arc<Gate>>,
}

impl ScriptedStage {
    pub fn ok(stage: Stage) -> Arc<Self> {
        Self::scripted(stage, Vec::new())
    }

    pub fn scripted(stage: Stage, outcomes: Vec<Result<StageOutput, StageError>>) -> Arc<Self> {
        Arc::new(Self {
            stage,
            calls: AtomicUsize::new(0),
            jobs: Mutex::new(Vec::new()),
            script: Mutex::new(outcomes.into()),
            failing: Mutex::new(HashMap::new()),
            panicking: Mutex::new(HashSet::new()),
            gate: None,
        })
    }

    pub fn gated(stage: Stage, gate: Arc<Gate>) -> Arc<Self> {
        Arc::new(Self {
            stage,
            calls: AtomicUsize::new(0),
            jobs: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            failing: Mutex::new(HashMap::new()),
            panicking: Mutex::new(HashSet::new()),
            gate: Some(gate),
        })
    }

    /// Makes every call for `job_id` fail with `error`
    pub fn fail_job(&self, job_id: Uuid, error: StageError) {
        self.failing.lock().insert(job_id, error);
    }

    /// Makes every call for `job_id` panic
    pub fn panic_on(&self, job_id: Uuid) {
        self.panicking.lock().insert(job_id);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, job_id: Uuid) -> usize {
        self.jobs.lock().iter().filter(|id| **id == job_id).count()
    }

    /// Jobs in the order they invoked this stage
    pub fn job_order(&self) -> Vec<Uuid> {
        self.jobs.lock().clone()
    }

    /// Default successful output; publish carries an artifact address
    pub fn default_output(stage: Stage, job_id: Uuid) -> StageOutput {
        let output = match stage {
            Stage::Publish => serde_json::json!({
                "artifact_url": format!("https://cdn.example.test/{job_id}.mp4"),
                "metadata": { "duration_seconds": 95 }
            }),
            other => serde_json::json!({ "stage": other.as_str(), "job_id": job_id }),
        };
        StageOutput::new(output, format!("{} done", stage))
    }
}

#[async_trait]
impl StageCapability for ScriptedStage {
    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        assert_eq!(input.stage, self.stage, "capability invoked for wrong stage");
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().push(input.job_id);

        if let Some(gate) = &self.gate {
            gate.pass().await;
        }

        if self.panicking.lock().contains(&input.job_id) {
            panic!("{} capability crashed", self.stage);
        }

        let failure = self.failing.lock().get(&input.job_id).cloned();
        if let Some(error) = failure {
            return Err(error);
        }

        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(Self::default_output(self.stage, input.job_id)))
    }
}

/// One scripted capability per stage, all succeeding
pub struct StageSet {
    pub stages: Vec<Arc<ScriptedStage>>,
}

impl StageSet {
    pub fn ok() -> Self {
        Self::with(|stage| ScriptedStage::ok(stage))
    }

    pub fn with(mut build: impl FnMut(Stage) -> Arc<ScriptedStage>) -> Self {
        Self {
            stages: Stage::ALL.iter().map(|s| build(*s)).collect(),
        }
    }

    pub fn get(&self, stage: Stage) -> &Arc<ScriptedStage> {
        &self.stages[stage.index()]
    }

    pub fn registry(&self) -> StageRegistry {
        let mut registry = StageRegistry::new();
        for stage in &self.stages {
            registry.register(stage.stage, stage.clone());
        }
        registry
    }

    pub fn total_calls(&self) -> usize {
        self.stages.iter().map(|s| s.calls()).sum()
    }
}
