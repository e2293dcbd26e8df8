//! Tool abstraction consumed by agent and commander sessions.
//!
//! The runtime never ships concrete tool implementations (bash, HTTP,
//! plugins) — it only defines the [`Tool`] trait those collaborators
//! implement, [`ToolMetadata`]/[`ToolParameter`] for describing a tool's
//! input schema to the LLM, and a [`ToolRegistry`] for looking tools up by
//! name during the ReAct loop.

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The result of a single tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution was successful.
    pub success: bool,
    /// The output payload from the tool, `null` on failure.
    pub output: serde_json::Value,
    /// Error message, set only when `success` is `false`.
    pub error: Option<String>,
    /// Metadata about the execution (timing, byte size, etc.), used by the
    /// result interceptor to decide whether to store this result instead of
    /// inlining it.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    /// Build a successful result.
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Build a failed result.
    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error),
            metadata: HashMap::new(),
        }
    }

    /// Attach application-specific metadata to the result.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// The declared type of a tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

/// A single parameter in a tool's input schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<serde_json::Value>,
}

impl ToolParameter {
    /// Define a new parameter with the given name and type.
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            default: None,
        }
    }

    /// Attach a human-readable description, surfaced to the LLM.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the parameter as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Provide a default used when the caller omits the parameter.
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Static metadata describing a tool's name, purpose, and input schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    /// Create metadata with no parameters declared yet.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter to the schema.
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }
}

/// A tool an agent or commander session can invoke from its `ACTION` /
/// `ACTION_INPUT` segments.
///
/// Implementations **must** be thread-safe (`Send + Sync`) so a single tool
/// instance can be shared across concurrently running sessions.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static metadata describing this tool, surfaced to the LLM in its
    /// system prompt.
    fn metadata(&self) -> &ToolMetadata;

    /// Execute the tool with the given JSON parameters.
    ///
    /// Implementations should return `Err` only for transport/protocol
    /// faults; an application-level failure the model should see and react
    /// to belongs in `Ok(ToolResult::failure(..))` instead.
    async fn execute(
        &self,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;
}

/// A name-keyed collection of tools available to a session.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing tool of the same name.
    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.metadata().name.clone(), tool);
    }

    /// Remove a tool by name, returning the owned entry if present.
    pub fn remove_tool(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    /// Borrow a tool by name.
    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List metadata for every registered tool.
    pub fn list_tools(&self) -> Vec<&ToolMetadata> {
        self.tools.values().map(|t| t.metadata()).collect()
    }

    /// Invoke a tool by name, producing a [`crate::error::MissionError::Tool`]
    /// classification on failure.
    pub async fn call(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, crate::error::MissionError> {
        let tool = self.get_tool(tool_name).ok_or_else(|| crate::error::MissionError::Tool {
            tool_name: tool_name.to_string(),
            kind: crate::error::ToolErrorKind::NotFound,
            message: format!("tool '{}' is not registered", tool_name),
        })?;
        tool.execute(parameters).await.map_err(|e| {
            let message = e.to_string();
            let kind = crate::error::ToolErrorKind::classify(&message);
            crate::error::MissionError::Tool {
                tool_name: tool_name.to_string(),
                kind,
                message,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool {
        metadata: ToolMetadata,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.metadata
        }

        async fn execute(
            &self,
            parameters: serde_json::Value,
        ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
            Ok(ToolResult::success(parameters))
        }
    }

    #[tokio::test]
    async fn calls_a_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.add_tool(Arc::new(EchoTool {
            metadata: ToolMetadata::new("echo", "echoes its input"),
        }));
        let result = registry
            .call("echo", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn calling_unknown_tool_yields_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.call("missing", serde_json::Value::Null).await.unwrap_err();
        match err {
            crate::error::MissionError::Tool { kind, .. } => {
                assert_eq!(kind, crate::error::ToolErrorKind::NotFound);
            }
            other => panic!("unexpected error variant: {:?}", other),
        }
    }
}
