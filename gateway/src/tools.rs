//! Tool registry
//!
//! Tools are resolved once at registry-build time into a closed map of
//! trait objects; dispatch never does per-call string reflection beyond the
//! single map lookup. Tool business logic beyond these built-ins lives
//! outside the gateway.

use async_trait::async_trait;
use gate_protocol::{GatewayError, ToolInfo};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::providers::ProviderRequest;
use crate::router::ProviderRouter;

/// Execution context handed to a tool invocation
pub struct ToolContext {
    /// Signalled on client disconnect, explicit cancel, or timeout
    pub cancel: CancellationToken,
    /// Progress notes, forwarded to the client in production order
    pub progress: mpsc::Sender<String>,
}

impl ToolContext {
    /// Emit a progress note; never blocks a slow client out of the tool
    pub fn note(&self, text: impl Into<String>) {
        let _ = self.progress.try_send(text.into());
    }
}

/// One invocable tool
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Vec<Value>, GatewayError>;
}

/// Closed tool-name → implementation map, built once at startup
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Registry with the built-in tools wired to the given router
    pub fn with_builtins(router: Arc<ProviderRouter>) -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(SleepTool));
        registry.register(Arc::new(ChatTool { router }));
        registry
    }

    /// Add a tool; later registrations win on name collision
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Tool inventory for `list_tools_res`
    pub fn list(&self) -> Vec<ToolInfo> {
        let mut tools: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Invoke a tool by name
    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Vec<Value>, GatewayError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| GatewayError::ToolExecution(format!("unknown tool: {name}")))?;
        tool.invoke(args, ctx).await
    }
}

// ============================================================================
// Built-in tools
// ============================================================================

/// Returns its arguments immediately; the protocol smoke-test tool
struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given arguments unchanged"
    }

    async fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<Vec<Value>, GatewayError> {
        Ok(vec![args])
    }
}

/// Sleeps for `millis`, reporting progress and honoring cancellation;
/// exercises admission and cancel paths
struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Sleep for `millis` milliseconds, then return"
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Vec<Value>, GatewayError> {
        let millis = args.get("millis").and_then(Value::as_u64).unwrap_or(1_000);
        ctx.note(format!("sleeping {millis}ms"));

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(millis)) => {}
            _ = ctx.cancel.cancelled() => {
                return Err(GatewayError::ToolExecution("sleep cancelled".to_string()));
            }
        }

        Ok(vec![serde_json::json!({ "slept_ms": millis })])
    }
}

/// Routes a prompt to a backend provider via the router
struct ChatTool {
    router: Arc<ProviderRouter>,
}

#[async_trait]
impl Tool for ChatTool {
    fn name(&self) -> &str {
        "chat"
    }

    fn description(&self) -> &str {
        "Send a prompt to the configured provider chain"
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Vec<Value>, GatewayError> {
        let model = args
            .get("model")
            .and_then(Value::as_str)
            .map(String::from);
        let request = ProviderRequest {
            tool: self.name().to_string(),
            model,
            input: args,
        };

        ctx.note("routing to provider");
        let response = self.router.route(&request, &ctx.cancel).await?;
        ctx.note(format!("served by {}", response.provider_id));

        Ok(vec![serde_json::json!({
            "provider_id": response.provider_id,
            "model": response.model,
            "output": response.output,
        })])
    }
}
