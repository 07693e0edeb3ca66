//! The closed set of pipeline stages.
//!
//! Automatic processing runs through [`StageKind::AUTO_CHAIN`] in order;
//! `Export` is only ever created on demand and has no successor.

use serde::{Deserialize, Serialize};

/// One discrete unit of AI processing in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Preprocess,
    Ocr,
    LayoutDetection,
    TableExtraction,
    Structuring,
    Export,
}

impl StageKind {
    /// The fixed order of automatic processing. `Export` is excluded.
    pub const AUTO_CHAIN: [StageKind; 5] = [
        StageKind::Preprocess,
        StageKind::Ocr,
        StageKind::LayoutDetection,
        StageKind::TableExtraction,
        StageKind::Structuring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Preprocess => "preprocess",
            StageKind::Ocr => "ocr",
            StageKind::LayoutDetection => "layout_detection",
            StageKind::TableExtraction => "table_extraction",
            StageKind::Structuring => "structuring",
            StageKind::Export => "export",
        }
    }

    pub fn parse(s: &str) -> Option<StageKind> {
        match s {
            "preprocess" => Some(StageKind::Preprocess),
            "ocr" => Some(StageKind::Ocr),
            "layout_detection" => Some(StageKind::LayoutDetection),
            "table_extraction" => Some(StageKind::TableExtraction),
            "structuring" => Some(StageKind::Structuring),
            "export" => Some(StageKind::Export),
            _ => None,
        }
    }

    /// The next stage in the automatic chain, or `None` for the final
    /// automatic stage and for `Export`.
    pub fn successor(self) -> Option<StageKind> {
        let pos = Self::AUTO_CHAIN.iter().position(|k| *k == self)?;
        Self::AUTO_CHAIN.get(pos + 1).copied()
    }

    /// Whether this stage is part of the automatic chain.
    pub fn is_automatic(self) -> bool {
        Self::AUTO_CHAIN.contains(&self)
    }

    /// Whether completing this stage completes the document.
    pub fn is_final_automatic(self) -> bool {
        self == StageKind::Structuring
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
