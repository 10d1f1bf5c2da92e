//! Default `StepExecutor` wired into the gateway's `POST
//! /v1/planning/plans/{id}/execute` route. `spec.md` names the
//! `StepExecutor` trait as caller-supplied (§4.3) but leaves open what the
//! API surface itself should plug in by default; this resolves that by
//! routing each step through the tool server via the same `call_tool`
//! contract §6 already defines, rather than inventing a second execution
//! protocol.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backends::ToolServer;
use crate::planner::{Step, StepExecutor, StepOutcome};

pub struct ToolServerStepExecutor {
    tool_server: Arc<dyn ToolServer>,
}

impl ToolServerStepExecutor {
    pub fn new(tool_server: Arc<dyn ToolServer>) -> Self {
        Self { tool_server }
    }
}

#[async_trait]
impl StepExecutor for ToolServerStepExecutor {
    async fn execute(&self, step: &Step) -> StepOutcome {
        let params = serde_json::json!({
            "description": step.description,
            "required_tools": step.required_tools,
        });
        match self.tool_server.call_tool("execute_step", params).await {
            Ok(result) if result.success => {
                let text = result.result.map(|v| v.to_string());
                StepOutcome { success: true, result: text }
            }
            Ok(result) => StepOutcome { success: false, result: result.error },
            Err(e) => StepOutcome { success: false, result: Some(e.message) },
        }
    }
}
