//! Produces a new script variant for a top performer via a schema-constrained
//! generative call.

use std::time::Duration;

use async_trait::async_trait;
use db::models::top_performer::MetricsSnapshot;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    claude_api::{ClaudeApiClient, ClaudeApiError, ToolDefinition},
    script_source::ScriptRecord,
};

pub const HOOK_COUNT: usize = 3;
const TOOL_NAME: &str = "record_script_iteration";
const MAX_TOKENS: u32 = 2048;

/// New script, exactly three hooks, CTA and the reasoning behind the change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeneratedIteration {
    /// Full rewritten ad script
    pub script: String,
    /// Three alternative opening hooks, each taking a different angle
    #[schemars(length(min = 3, max = 3))]
    pub hooks: Vec<String>,
    /// Call to action
    pub cta: String,
    /// Why these changes should outperform the original
    pub rationale: String,
}

impl GeneratedIteration {
    fn is_complete(&self) -> bool {
        self.hooks.len() == HOOK_COUNT
            && self.hooks.iter().all(|h| !h.trim().is_empty())
            && !self.script.trim().is_empty()
            && !self.cta.trim().is_empty()
    }
}

#[async_trait]
pub trait IterationGenerator: Send + Sync {
    /// `None` on any failure; callers treat that as "no iteration"
    async fn generate_iteration(
        &self,
        original: &ScriptRecord,
        metrics: &MetricsSnapshot,
    ) -> Option<GeneratedIteration>;
}

/// Claude-backed generator. Transient failures get one retry after a short backoff.
pub struct ClaudeIterationGenerator {
    claude: ClaudeApiClient,
}

impl ClaudeIterationGenerator {
    pub fn new(claude: ClaudeApiClient) -> Self {
        Self {
            claude: claude.with_retries(1, Duration::from_secs(2)),
        }
    }

    async fn request_iteration(
        &self,
        original: &ScriptRecord,
        metrics: &MetricsSnapshot,
    ) -> Result<GeneratedIteration, ClaudeApiError> {
        let tool = ToolDefinition::for_type::<GeneratedIteration>(
            TOOL_NAME,
            "Record the new iteration of the ad script.",
        );
        let system = Some(
            "You are a direct-response creative strategist. You write short-form video ad \
             scripts that iterate on proven winners: keep what works, change one angle at a time."
                .to_string(),
        );

        self.claude
            .ask_tool(&build_prompt(original, metrics), system, tool, MAX_TOKENS)
            .await
    }
}

#[async_trait]
impl IterationGenerator for ClaudeIterationGenerator {
    async fn generate_iteration(
        &self,
        original: &ScriptRecord,
        metrics: &MetricsSnapshot,
    ) -> Option<GeneratedIteration> {
        match self.request_iteration(original, metrics).await {
            Ok(iteration) if iteration.is_complete() => {
                info!(hooks = iteration.hooks.len(), "Generated script iteration");
                Some(iteration)
            }
            Ok(iteration) => {
                warn!(
                    hooks = iteration.hooks.len(),
                    "Generated iteration is incomplete, discarding"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "Script iteration generation failed");
                None
            }
        }
    }
}

fn build_prompt(original: &ScriptRecord, metrics: &MetricsSnapshot) -> String {
    let hooks = if original.hooks.is_empty() {
        "(none recorded)".to_string()
    } else {
        original
            .hooks
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{}. {}", i + 1, h))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let cta = if original.cta.is_empty() {
        "(none recorded)"
    } else {
        original.cta.as_str()
    };

    format!(
        r#"This ad is one of the account's top performers. Write one new iteration of it.

## Performance
Impressions: {impressions}
Clicks: {clicks}
CTR: {ctr:.2}%
Conversions: {conversions}
Spend: {spend:.2}
Conversions per unit spend: {efficiency:.4}
Reach: {reach}

## Original script
{script}

## Original hooks
{hooks}

## Original CTA
{cta}

## Instructions
1. Keep the core message and structure that made this ad convert.
2. Try a different hook angle; give exactly {hook_count} alternative hooks.
3. Tighten the CTA.
4. Explain the change in the rationale, referencing the numbers above."#,
        impressions = metrics.impressions,
        clicks = metrics.clicks,
        ctr = metrics.click_rate,
        conversions = metrics.conversions,
        spend = metrics.spend,
        efficiency = metrics.efficiency,
        reach = metrics.reach,
        script = original.script,
        hook_count = HOOK_COUNT,
    )
}
