//! Stage processors.
//!
//! A [`StageProcessor`] runs one stage for one document and returns the
//! stage result as JSON. The registry maps stage kinds to processors; the
//! default wiring points every stage at the HTTP worker service, tests
//! swap in local fakes.

mod http;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProcessError;
use crate::stage::StageKind;

pub use http::HttpStageProcessor;

#[async_trait]
pub trait StageProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the stage. `payload` is the output of the previous stage, or
    /// null for the first one.
    async fn process(&self, document_id: &str, payload: &Value) -> Result<Value, ProcessError>;
}

#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<StageKind, Arc<dyn StageProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stage backed by the HTTP worker at `base_url`.
    pub fn http(base_url: &str) -> Self {
        let mut registry = Self::new();
        for kind in [
            StageKind::Preprocess,
            StageKind::Ocr,
            StageKind::LayoutDetection,
            StageKind::TableExtraction,
            StageKind::Structuring,
            StageKind::Export,
        ] {
            registry.register(kind, Arc::new(HttpStageProcessor::new(base_url, kind)));
        }
        registry
    }

    pub fn register(&mut self, kind: StageKind, processor: Arc<dyn StageProcessor>) {
        self.processors.insert(kind, processor);
    }

    pub fn get(&self, kind: StageKind) -> Option<Arc<dyn StageProcessor>> {
        self.processors.get(&kind).cloned()
    }
}
