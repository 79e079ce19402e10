//! MCP server implementation using rmcp.
//!
//! Exposes the orchestrator as MCP tools over stdio.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::schemars;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

use crate::backend::IsolationProvider;
use crate::orchestrator::{ExecutionOutcome, Orchestrator};

/// MCP server for sandboxed snippet execution.
pub struct SandboxServer<P> {
    orchestrator: Arc<Orchestrator<P>>,
    tool_router: ToolRouter<Self>,
}

impl<P: IsolationProvider + 'static> Clone for SandboxServer<P> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            tool_router: self.tool_router.clone(),
        }
    }
}

/// Parameters for the execute tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteParams {
    /// Language of the snippet (e.g., "php", "python", "node").
    #[schemars(description = "Language of the snippet (e.g. 'php', 'python', 'node')")]
    pub language: String,

    /// The code to execute.
    #[schemars(description = "Source code to run; only its standard output is returned")]
    pub code: String,
}

#[tool_router]
impl<P: IsolationProvider + 'static> SandboxServer<P> {
    /// Create a new sandbox server.
    pub fn new(orchestrator: Arc<Orchestrator<P>>) -> Self {
        Self {
            orchestrator,
            tool_router: Self::tool_router(),
        }
    }

    /// Run a snippet in a fresh sandbox container.
    #[tool(description = "Run a code snippet in a single-use sandbox and return its stdout")]
    async fn execute(
        &self,
        Parameters(params): Parameters<ExecuteParams>,
    ) -> Result<CallToolResult, McpError> {
        info!(language = %params.language, code_len = params.code.len(), "Executing snippet");

        let outcome = self.orchestrator.run(&params.language, &params.code).await;
        let text = outcome.client_message(self.orchestrator.deadline());

        match outcome {
            ExecutionOutcome::Completed { .. } => {
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            ExecutionOutcome::TimedOut | ExecutionOutcome::InfrastructureError { .. } => {
                Ok(CallToolResult::error(vec![Content::text(text)]))
            }
        }
    }

    /// List the languages snippets can be written in.
    #[tool(description = "List supported snippet languages")]
    async fn languages(&self) -> Result<CallToolResult, McpError> {
        let languages = self.orchestrator.registry().languages().join("\n");
        Ok(CallToolResult::success(vec![Content::text(languages)]))
    }
}

#[tool_handler]
impl<P: IsolationProvider + 'static> ServerHandler for SandboxServer<P> {
    fn get_info(&self) -> ServerInfo {
        let languages = self.orchestrator.registry().languages();
        let deadline = self.orchestrator.deadline().as_secs();

        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Run short code snippets in single-use, network-less sandbox containers.\n\
                 Supported languages: {languages:?}\n\
                 \n\
                 Use the 'execute' tool with:\n\
                 - language: one of {languages:?}\n\
                 - code: the program text\n\
                 \n\
                 Only standard output is returned. Runs are stopped after {deadline} seconds."
            )),
        }
    }
}

/// Serve the sandbox server over stdio.
pub async fn serve_stdio<P: IsolationProvider + 'static>(
    orchestrator: Arc<Orchestrator<P>>,
) -> anyhow::Result<()> {
    let server = SandboxServer::new(orchestrator);

    info!("Starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))?;

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;

    Ok(())
}
