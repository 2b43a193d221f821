//! Workflow graph model and the sketch-to-render workflow builder.
//!
//! A workflow is a mapping from stage id to `{class_type, inputs}`. Inputs
//! are either literals or links `[stage_id, output_index]` to another
//! stage's output; the engine schedules stages by following the links.
//!
//! ```json
//! {
//!   "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "a chair", "clip": ["4", 1] } }
//! }
//! ```
//!
//! The render workflow has a fixed topology; only leaf parameters (prompt
//! text, uploaded image, control strength, seed, batch size) vary.

use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use serde::Serialize;
use sketchforge_core::outcome::AssetHandle;
use sketchforge_core::request::GenerationRequest;

// ---------------------------------------------------------------------------
// Graph model
// ---------------------------------------------------------------------------

/// Reference to output `index` of stage `stage_id`. Serializes as
/// `["stage_id", index]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageLink(pub String, pub u32);

/// A single stage input.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InputValue {
    Link(StageLink),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for InputValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for InputValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for InputValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for InputValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for InputValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// One processing stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    pub inputs: BTreeMap<String, InputValue>,
    /// Engine node class, e.g. `KSampler`.
    #[serde(rename = "class_type")]
    pub kind: String,
}

impl Stage {
    pub fn new(kind: &str) -> Self {
        Self {
            inputs: BTreeMap::new(),
            kind: kind.to_string(),
        }
    }

    /// Add a literal input.
    pub fn input(mut self, name: &str, value: impl Into<InputValue>) -> Self {
        self.inputs.insert(name.to_string(), value.into());
        self
    }

    /// Add a link to output `index` of stage `stage_id`.
    pub fn link(mut self, name: &str, stage_id: &str, index: u32) -> Self {
        self.inputs.insert(
            name.to_string(),
            InputValue::Link(StageLink(stage_id.to_string(), index)),
        );
        self
    }

    fn links(&self) -> impl Iterator<Item = (&str, &StageLink)> {
        self.inputs.iter().filter_map(|(name, value)| match value {
            InputValue::Link(link) => Some((name.as_str(), link)),
            _ => None,
        })
    }
}

/// A complete workflow, serialized as the engine's prompt object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    stages: BTreeMap<String, Stage>,
}

/// Structural problems found by [`WorkflowGraph::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow contains no stages")]
    Empty,

    #[error("Stage '{stage}' input '{input}' references missing stage '{target}'")]
    MissingStage {
        stage: String,
        input: String,
        target: String,
    },

    #[error("Workflow contains a cycle through stage '{0}'")]
    Cycle(String),
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, id: &str, stage: Stage) -> Self {
        self.stages.insert(id.to_string(), stage);
        self
    }

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.get(id)
    }

    pub fn stages(&self) -> impl Iterator<Item = (&str, &Stage)> {
        self.stages.iter().map(|(id, stage)| (id.as_str(), stage))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Check that every link targets an existing stage and that the links
    /// form a DAG.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.stages.is_empty() {
            return Err(WorkflowError::Empty);
        }

        for (id, stage) in &self.stages {
            for (input, link) in stage.links() {
                if !self.stages.contains_key(&link.0) {
                    return Err(WorkflowError::MissingStage {
                        stage: id.clone(),
                        input: input.to_string(),
                        target: link.0.clone(),
                    });
                }
            }
        }

        // Iterative DFS; a stage seen again while still on the path is a cycle.
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            OnPath,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();
        for root in self.stages.keys() {
            if marks.contains_key(root.as_str()) {
                continue;
            }
            let mut stack: Vec<(&str, bool)> = vec![(root.as_str(), false)];
            while let Some((id, expanded)) = stack.pop() {
                if expanded {
                    marks.insert(id, Mark::Done);
                    continue;
                }
                match marks.get(id) {
                    Some(Mark::Done) => continue,
                    Some(Mark::OnPath) => return Err(WorkflowError::Cycle(id.to_string())),
                    None => {}
                }
                marks.insert(id, Mark::OnPath);
                stack.push((id, true));
                if let Some(stage) = self.stages.get(id) {
                    for (_, link) in stage.links() {
                        match marks.get(link.0.as_str()) {
                            Some(Mark::OnPath) => return Err(WorkflowError::Cycle(link.0.clone())),
                            Some(Mark::Done) => {}
                            None => stack.push((link.0.as_str(), false)),
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Render workflow
// ---------------------------------------------------------------------------

/// Stage that saves the final images; the resolver reads its outputs.
pub const OUTPUT_STAGE: &str = "9";

const SAMPLER_STAGE: &str = "3";
const CHECKPOINT_STAGE: &str = "4";
const POSITIVE_STAGE: &str = "6";
const DECODE_STAGE: &str = "8";
const LATENT_STAGE: &str = "33";
const LOAD_IMAGE_STAGE: &str = "45";
const CONTROL_NET_LOADER_STAGE: &str = "46";
const EDGE_DETECT_STAGE: &str = "47";
const SCALE_STAGE: &str = "48";
const NEGATIVE_STAGE: &str = "50";
const CONTROL_APPLY_STAGE: &str = "51";

/// Exclusive upper bound for sampler seeds.
pub const MAX_SEED: i64 = 1_000_000_000_000;

/// Fixed (non-request) parameters of the render workflow.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub checkpoint: String,
    pub control_net: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg: f64,
    pub sampler: String,
    pub scheduler: String,
    pub edge_low_threshold: f64,
    pub edge_high_threshold: f64,
    pub filename_prefix: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            checkpoint: "sd3.5_large_fp8_scaled.safetensors".to_string(),
            control_net: "sd3.5_large_controlnet_canny.safetensors".to_string(),
            width: 1024,
            height: 1024,
            steps: 25,
            cfg: 4.5,
            sampler: "euler".to_string(),
            scheduler: "simple".to_string(),
            edge_low_threshold: 0.3,
            edge_high_threshold: 0.6,
            filename_prefix: "sketchforge_render".to_string(),
        }
    }
}

/// Draw a fresh sampler seed, uniform over `[0, MAX_SEED)`.
pub fn random_seed() -> i64 {
    rand::rng().random_range(0..MAX_SEED)
}

/// Positive conditioning text: the prompt, followed by the style label
/// when one is set.
pub fn conditioning_text(prompt: &str, style: &str) -> String {
    let prompt = prompt.trim();
    let style = style.trim();
    if style.is_empty() {
        prompt.to_string()
    } else {
        format!("{prompt}, {style} style")
    }
}

/// Build the render workflow with a freshly drawn seed.
pub fn build_render_workflow(
    request: &GenerationRequest,
    asset: &AssetHandle,
    settings: &WorkflowSettings,
) -> WorkflowGraph {
    build_render_workflow_with_seed(request, asset, settings, random_seed())
}

/// Build the render workflow with an explicit seed.
///
/// Topology: checkpoint -> prompt conditioning (+ zeroed negative);
/// uploaded sketch -> scale -> edge detection -> control-net apply at
/// `influence` strength; empty latent batch of `num_images`; sampler ->
/// decode -> save.
pub fn build_render_workflow_with_seed(
    request: &GenerationRequest,
    asset: &AssetHandle,
    settings: &WorkflowSettings,
    seed: i64,
) -> WorkflowGraph {
    WorkflowGraph::new()
        .with_stage(
            CHECKPOINT_STAGE,
            Stage::new("CheckpointLoaderSimple").input("ckpt_name", settings.checkpoint.as_str()),
        )
        .with_stage(
            POSITIVE_STAGE,
            Stage::new("CLIPTextEncode")
                .input("text", conditioning_text(request.prompt(), request.style()))
                .link("clip", CHECKPOINT_STAGE, 1),
        )
        .with_stage(
            NEGATIVE_STAGE,
            Stage::new("ConditioningZeroOut").link("conditioning", POSITIVE_STAGE, 0),
        )
        .with_stage(
            LOAD_IMAGE_STAGE,
            Stage::new("LoadImage").input("image", asset.load_path()),
        )
        .with_stage(
            SCALE_STAGE,
            Stage::new("ImageScale")
                .input("upscale_method", "bilinear")
                .input("width", settings.width)
                .input("height", settings.height)
                .input("crop", "center")
                .link("image", LOAD_IMAGE_STAGE, 0),
        )
        .with_stage(
            EDGE_DETECT_STAGE,
            Stage::new("Canny")
                .input("low_threshold", settings.edge_low_threshold)
                .input("high_threshold", settings.edge_high_threshold)
                .link("image", SCALE_STAGE, 0),
        )
        .with_stage(
            CONTROL_NET_LOADER_STAGE,
            Stage::new("ControlNetLoader").input("control_net_name", settings.control_net.as_str()),
        )
        .with_stage(
            CONTROL_APPLY_STAGE,
            Stage::new("ControlNetApplyAdvanced")
                .input("strength", request.influence())
                .input("start_percent", 0.0)
                .input("end_percent", 1.0)
                .link("positive", POSITIVE_STAGE, 0)
                .link("negative", NEGATIVE_STAGE, 0)
                .link("control_net", CONTROL_NET_LOADER_STAGE, 0)
                .link("image", EDGE_DETECT_STAGE, 0)
                .link("vae", CHECKPOINT_STAGE, 2),
        )
        .with_stage(
            LATENT_STAGE,
            Stage::new("EmptySD3LatentImage")
                .input("width", settings.width)
                .input("height", settings.height)
                .input("batch_size", request.num_images()),
        )
        .with_stage(
            SAMPLER_STAGE,
            Stage::new("KSampler")
                .input("seed", seed)
                .input("steps", settings.steps)
                .input("cfg", settings.cfg)
                .input("sampler_name", settings.sampler.as_str())
                .input("scheduler", settings.scheduler.as_str())
                .input("denoise", 1.0)
                .link("model", CHECKPOINT_STAGE, 0)
                .link("positive", CONTROL_APPLY_STAGE, 0)
                .link("negative", CONTROL_APPLY_STAGE, 1)
                .link("latent_image", LATENT_STAGE, 0),
        )
        .with_stage(
            DECODE_STAGE,
            Stage::new("VAEDecode")
                .link("samples", SAMPLER_STAGE, 0)
                .link("vae", CHECKPOINT_STAGE, 2),
        )
        .with_stage(
            OUTPUT_STAGE,
            Stage::new("SaveImage")
                .input("filename_prefix", settings.filename_prefix.as_str())
                .link("images", DECODE_STAGE, 0),
        )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
