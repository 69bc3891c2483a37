//! Generation stages
//!
//! | Stage | Input | Output |
//! |-------|-------|--------|
//! | 1 planning | account data + brand context | free-text campaign plan |
//! | 2 structuring | plan | [`CalendarArtifact`] |
//! | 3 briefs | reviewed artifact | free-text briefs |
//!
//! Each stage is one call to the [`GenerationService`]. The runners decide
//! nothing about content; they assemble context, enforce the shape of what
//! comes back, and classify failures.

use crate::registry::AccountBinding;
use crate::retrieval::RetrievedContext;
use crate::{Result, WorkflowError};
use checkpoint::{CalendarArtifact, WorkflowStatus};
use integration::{AggregateResult, DateRange};
use llm::{GenerationRequest, GenerationService};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_PLANNING_INSTRUCTIONS: &str = "You are a lifecycle marketing strategist. \
Using the account data and brand context provided, write a campaign plan for the given period. \
Name every send, give its channel (email, sms or push), its date, its audience and its goal.";

const DEFAULT_STRUCTURING_INSTRUCTIONS: &str = "Convert the campaign plan into a JSON object \
{\"campaigns\": [...]} where every entry has \"name\", \"category\" (email, sms or push), \
\"scheduled_date\" (YYYY-MM-DD) and any further details from the plan. Respond with JSON only.";

const DEFAULT_BRIEFS_INSTRUCTIONS: &str = "Write a production brief for every entry of the \
approved calendar. Start each brief with the entry's name as a heading.";

/// One generation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Planning,
    Structuring,
    Briefs,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::Structuring => "structuring",
            Stage::Briefs => "briefs",
        }
    }

    /// Workflow state the stage runs in
    pub fn status(&self) -> WorkflowStatus {
        match self {
            Stage::Planning => WorkflowStatus::Stage1,
            Stage::Structuring => WorkflowStatus::Stage2,
            Stage::Briefs => WorkflowStatus::Stage3,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.status(), self.as_str())
    }
}

/// System instructions for each stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInstructions {
    pub planning: String,
    pub structuring: String,
    pub briefs: String,
}

impl Default for StageInstructions {
    fn default() -> Self {
        Self {
            planning: DEFAULT_PLANNING_INSTRUCTIONS.to_string(),
            structuring: DEFAULT_STRUCTURING_INSTRUCTIONS.to_string(),
            briefs: DEFAULT_BRIEFS_INSTRUCTIONS.to_string(),
        }
    }
}

impl StageInstructions {
    /// Read `planning.md`, `structuring.md` and `briefs.md` from `dir`.
    /// Absent files keep the built-in text.
    pub async fn load(dir: &Path) -> std::io::Result<Self> {
        let mut instructions = Self::default();
        for (file, slot) in [
            ("planning.md", &mut instructions.planning),
            ("structuring.md", &mut instructions.structuring),
            ("briefs.md", &mut instructions.briefs),
        ] {
            match tokio::fs::read_to_string(dir.join(file)).await {
                Ok(text) => *slot = text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(file = file, dir = %dir.display(), "Instruction file missing, using built-in text");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(instructions)
    }
}

/// Token budgets and output thresholds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSettings {
    /// Overrides the generation service's default model
    pub model: Option<String>,
    pub planning_max_tokens: u32,
    pub structuring_max_tokens: u32,
    pub briefs_max_tokens: u32,
    pub min_planning_chars: usize,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            model: None,
            planning_max_tokens: 8000,
            structuring_max_tokens: 64_000,
            briefs_max_tokens: 16_000,
            min_planning_chars: 500,
        }
    }
}

/// Runs the three generation stages against one service.
pub struct StageRunner {
    generator: Arc<dyn GenerationService>,
    instructions: StageInstructions,
    settings: StageSettings,
}

impl StageRunner {
    pub fn new(generator: Arc<dyn GenerationService>) -> Self {
        Self {
            generator,
            instructions: StageInstructions::default(),
            settings: StageSettings::default(),
        }
    }

    pub fn with_instructions(mut self, instructions: StageInstructions) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_settings(mut self, settings: StageSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &StageSettings {
        &self.settings
    }

    /// Fail early when the generation service cannot run `stage`.
    pub async fn ready(&self, stage: Stage) -> Result<()> {
        self.generator.ready().await.map_err(|source| {
            error!(stage = %stage, error = %source, "Generation service unavailable");
            WorkflowError::Generation { stage, source }
        })
    }

    /// Stage 1: free-text plan.
    pub async fn plan(
        &self,
        binding: &AccountBinding,
        range: DateRange,
        data: &AggregateResult,
        brand: &RetrievedContext,
    ) -> Result<String> {
        let platform_data =
            serde_json::to_string_pretty(&data.to_context()).map_err(|e| WorkflowError::StageOutput {
                stage: Stage::Planning,
                reason: format!("account data could not be serialized: {}", e),
            })?;
        let context = format!(
            "{}\n# Platform Data\n\n```json\n{}\n```\n\n# Brand Context\n\n{}\n",
            account_header(binding, range),
            platform_data,
            brand.render()
        );

        let plan = self
            .generate(Stage::Planning, &self.instructions.planning, context, self.settings.planning_max_tokens)
            .await?;

        let length = plan.trim().chars().count();
        if length < self.settings.min_planning_chars {
            return Err(WorkflowError::StageOutput {
                stage: Stage::Planning,
                reason: format!(
                    "plan has {} characters, at least {} expected",
                    length, self.settings.min_planning_chars
                ),
            });
        }
        Ok(plan)
    }

    /// Stage 2: turn the plan into a calendar artifact.
    pub async fn structure(
        &self,
        binding: &AccountBinding,
        range: DateRange,
        plan: &str,
    ) -> Result<CalendarArtifact> {
        let context = format!("{}\n# Campaign Plan\n\n{}\n", account_header(binding, range), plan);
        let output = self
            .generate(
                Stage::Structuring,
                &self.instructions.structuring,
                context,
                self.settings.structuring_max_tokens,
            )
            .await?;

        let artifact = parse_artifact(&output)?;
        if artifact.is_empty() {
            return Err(WorkflowError::StageOutput {
                stage: Stage::Structuring,
                reason: "calendar has no items".to_string(),
            });
        }
        Ok(artifact)
    }

    /// Stage 3: briefs for the stored, possibly edited, artifact.
    pub async fn briefs(
        &self,
        binding: &AccountBinding,
        range: DateRange,
        artifact: &CalendarArtifact,
    ) -> Result<String> {
        let calendar = serde_json::to_string_pretty(artifact).map_err(|e| WorkflowError::StageOutput {
            stage: Stage::Briefs,
            reason: format!("artifact could not be serialized: {}", e),
        })?;
        let context = format!(
            "{}\n# Approved Calendar\n\n```json\n{}\n```\n",
            account_header(binding, range),
            calendar
        );
        self.generate(Stage::Briefs, &self.instructions.briefs, context, self.settings.briefs_max_tokens)
            .await
    }

    async fn generate(&self, stage: Stage, instructions: &str, context: String, max_tokens: u32) -> Result<String> {
        let mut request = GenerationRequest::new(instructions, context).with_max_tokens(max_tokens);
        if let Some(model) = &self.settings.model {
            request = request.with_model(model.clone());
        }

        info!(stage = %stage, max_tokens = max_tokens, "Running generation stage");
        match self.generator.generate(request).await {
            Ok(text) if text.trim().is_empty() => Err(WorkflowError::StageOutput {
                stage,
                reason: "empty output".to_string(),
            }),
            Ok(text) => {
                info!(stage = %stage, chars = text.len(), "Generation stage complete");
                Ok(text)
            }
            Err(source) => {
                error!(stage = %stage, error = %source, "Generation stage failed");
                Err(WorkflowError::Generation { stage, source })
            }
        }
    }
}

fn account_header(binding: &AccountBinding, range: DateRange) -> String {
    let minimums = if binding.minimum_requirements.is_empty() {
        "none".to_string()
    } else {
        binding
            .minimum_requirements
            .iter()
            .map(|(category, count)| format!("{}: {}", category, count))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "# Account\n\nName: {}\nAlias: {}\nPlatform account: {}\nPeriod: {} to {}\nMinimum items per channel: {}\n",
        binding.name(),
        binding.alias,
        binding.platform_account_id,
        range.start(),
        range.end(),
        minimums
    )
}

/// Parse stage-2 output into an artifact.
///
/// Markdown fences and leading prose are skipped; the first JSON value in
/// the text is the artifact.
pub fn parse_artifact(text: &str) -> Result<CalendarArtifact> {
    let value = extract_json(text).ok_or_else(|| WorkflowError::StageOutput {
        stage: Stage::Structuring,
        reason: "no JSON value found in output".to_string(),
    })?;
    Ok(CalendarArtifact::from_value(value)?)
}

fn extract_json(text: &str) -> Option<Value> {
    let body = strip_fence(text);
    body.char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .find_map(|(start, _)| {
            serde_json::Deserializer::from_str(&body[start..])
                .into_iter::<Value>()
                .next()
                .and_then(|parsed| parsed.ok())
                .filter(|value| value.is_object() || value.is_array())
        })
}

/// Body of the first fenced block, or the whole text when there is none.
fn strip_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after = &text[open + 3..];
    let body_start = after.find('\n').map_or(after.len(), |i| i + 1);
    let body = &after[body_start..];
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

/// Labels of artifact items never mentioned in the briefs.
pub fn unreferenced_items(artifact: &CalendarArtifact, briefs: &str) -> Vec<String> {
    let briefs = briefs.to_lowercase();
    artifact
        .items
        .iter()
        .filter_map(|item| item.label())
        .filter(|label| !briefs.contains(&label.to_lowercase()))
        .map(str::to_string)
        .collect()
}
