//! Declarative pipeline file model.

use rowflow_types::Value;
use serde::{Deserialize, Serialize};

use crate::ingest::InputHeaderMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    pub pipeline: String,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub error: Option<ErrorConfig>,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub header: InputHeaderMode,
    #[serde(default)]
    pub force_columns_count: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub force_columns: Option<Vec<String>>,
    #[serde(default)]
    pub skip_header_row: bool,
}

/// Error rerouting. `recovery` runs over a one-row source whose single
/// column, `column`, holds the caught error record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorConfig {
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub recovery: Vec<StepConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Buffer length of every channel created by fork stages. Zero means
    /// a direct handoff.
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_channel_buffer() -> usize {
    0
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            channel_buffer: default_channel_buffer(),
        }
    }
}

/// One declarative transform step, written as a single-key map
/// (`- split_in: { keys: [..], steps: [..] }`) or a bare name for steps
/// without parameters (`- normalize`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepConfig {
    Select {
        columns: Vec<String>,
        #[serde(default = "default_reorder")]
        reorder: bool,
        #[serde(default)]
        add_missing: bool,
    },
    Remove {
        columns: Vec<String>,
    },
    Rename {
        from: String,
        to: String,
        #[serde(default)]
        occurrence: Option<usize>,
    },
    Add {
        column: String,
        #[serde(default)]
        value: Value,
    },
    Normalize,
    ProbeCapture {
        name: String,
        column: String,
    },
    ProbeRestore {
        name: String,
        column: String,
    },
    Fork {
        steps: Vec<StepConfig>,
    },
    ForkMerge {
        output_columns: Vec<String>,
        branches: Vec<Vec<StepConfig>>,
    },
    MergeFork {
        output_columns: Vec<String>,
        branches: Vec<Vec<StepConfig>>,
    },
    SplitIn {
        keys: Vec<String>,
        steps: Vec<StepConfig>,
    },
}

fn default_reorder() -> bool {
    true
}

impl StepConfig {
    /// Step kind as written in the pipeline file.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Select { .. } => "select",
            Self::Remove { .. } => "remove",
            Self::Rename { .. } => "rename",
            Self::Add { .. } => "add",
            Self::Normalize => "normalize",
            Self::ProbeCapture { .. } => "probe_capture",
            Self::ProbeRestore { .. } => "probe_restore",
            Self::Fork { .. } => "fork",
            Self::ForkMerge { .. } => "fork_merge",
            Self::MergeFork { .. } => "merge_fork",
            Self::SplitIn { .. } => "split_in",
        }
    }
}
