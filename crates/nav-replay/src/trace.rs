//! Trace Format
//!
//! One JSON object per line, tagged by `event`. Blank lines and lines
//! starting with `#` are skipped.
//!
//! ```text
//! {"event":"navigate","url":"/search?q=tacos"}
//! {"event":"signal","signal":{"type":"mouse_over","url":"/business/5"}}
//! {"event":"wait","ms":120}
//! ```

use anyhow::{Context, Result};
use nav_prefetch::{DomSignal, InteractionData, InteractionKind, NavigationMetadata};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One recorded step
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    Navigate {
        url: String,
        #[serde(default)]
        metadata: NavigationMetadata,
    },
    Search {
        query: String,
        #[serde(default)]
        results_count: usize,
        #[serde(default)]
        filters: BTreeMap<String, String>,
    },
    Interaction {
        target_id: String,
        kind: InteractionKind,
        #[serde(default)]
        data: InteractionData,
    },
    Signal {
        signal: DomSignal,
    },
    /// Let time pass
    Wait {
        ms: u64,
    },
    /// Browser idle callback
    Idle,
    Maintain,
    EndSession,
}

pub fn parse_trace(text: &str) -> Result<Vec<TraceEvent>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("trace line {}", i + 1))
        })
        .collect()
}

pub fn load_trace(path: &Path) -> Result<Vec<TraceEvent>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading trace {}", path.display()))?;
    parse_trace(&text)
}
