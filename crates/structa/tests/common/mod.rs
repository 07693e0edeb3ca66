//! Shared harness for integration tests: an in-memory database, scripted
//! stage processors, and an inline or pooled orchestrator around them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use structa::config::OrchestratorConfig;
use structa::db::Database;
use structa::error::ProcessError;
use structa::processor::{ProcessorRegistry, StageProcessor};
use structa::stage::StageKind;
use structa::Orchestrator;

/// A processor that fails a configured number of times, then succeeds with
/// a payload naming its stage.
pub struct ScriptedProcessor {
    kind: StageKind,
    calls: AtomicUsize,
    fail_first: usize,
    delay: Option<Duration>,
}

impl ScriptedProcessor {
    pub fn succeeding(kind: StageKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicUsize::new(0),
            fail_first: 0,
            delay: None,
        })
    }

    pub fn flaky(kind: StageKind, fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicUsize::new(0),
            fail_first,
            delay: None,
        })
    }

    pub fn slow(kind: StageKind, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicUsize::new(0),
            fail_first: 0,
            delay: Some(delay),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageProcessor for ScriptedProcessor {
    fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    async fn process(&self, _document_id: &str, payload: &Value) -> Result<Value, ProcessError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(ProcessError::Failed {
                stage: self.kind.as_str().to_string(),
                reason: format!("scripted failure {}", call + 1),
            });
        }
        Ok(json!({ "stage": self.kind.as_str(), "input": payload }))
    }
}

pub struct Harness {
    pub db: Database,
    pub orchestrator: Orchestrator,
    pub processors: HashMap<StageKind, Arc<ScriptedProcessor>>,
}

pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry_base_delay_ms: 1,
        poll_interval_ms: 5,
        ..OrchestratorConfig::default()
    }
}

/// Inline orchestrator with every stage scripted to succeed except the
/// overrides.
pub fn inline_harness(overrides: Vec<Arc<ScriptedProcessor>>) -> Harness {
    build(overrides, fast_config(), true)
}

pub fn pooled_harness(overrides: Vec<Arc<ScriptedProcessor>>) -> Harness {
    build(overrides, fast_config(), false)
}

pub fn inline_harness_with(
    config: OrchestratorConfig,
    overrides: Vec<Arc<ScriptedProcessor>>,
) -> Harness {
    build(overrides, config, true)
}

fn build(
    overrides: Vec<Arc<ScriptedProcessor>>,
    config: OrchestratorConfig,
    inline: bool,
) -> Harness {
    let db = Database::open_in_memory().expect("in-memory database");

    let mut processors: HashMap<StageKind, Arc<ScriptedProcessor>> = HashMap::new();
    for kind in StageKind::AUTO_CHAIN {
        processors.insert(kind, ScriptedProcessor::succeeding(kind));
    }
    processors.insert(
        StageKind::Export,
        ScriptedProcessor::succeeding(StageKind::Export),
    );
    for processor in overrides {
        processors.insert(processor.kind, processor);
    }

    let mut registry = ProcessorRegistry::new();
    for (kind, processor) in &processors {
        registry.register(*kind, Arc::clone(processor) as Arc<dyn StageProcessor>);
    }

    let orchestrator = if inline {
        Orchestrator::new_inline(db.clone(), config, registry)
    } else {
        Orchestrator::new(db.clone(), config, registry)
    };

    Harness {
        db,
        orchestrator,
        processors,
    }
}
