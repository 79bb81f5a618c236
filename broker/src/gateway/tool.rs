use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tracing::{debug, instrument};

use super::{AgentGateway, DEFAULT_EXECUTE_TOOL, DEFAULT_PROPOSE_TOOL};
use crate::errors::{BrokerError, Result};
use crate::model::{Intent, Proposal, Task, TaskResult};

const PROTOCOL_VERSION: &str = "2024-11-05";
const INITIALIZE_ID: u64 = 1;
const CALL_ID: u64 = 2;

/// Agent exposed as a tool server speaking line-delimited JSON-RPC 2.0 over stdio.
///
/// Each call spawns the server, performs the `initialize` handshake and a single
/// `tools/call`. The process is killed once the call returns or is dropped.
pub struct ToolProtocolAgent {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    propose_tool: String,
    execute_tool: String,
}

impl ToolProtocolAgent {
    pub fn new(
        command: impl Into<String>,
        args: impl IntoIterator<Item = String>,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().collect(),
            env,
            propose_tool: DEFAULT_PROPOSE_TOOL.to_string(),
            execute_tool: DEFAULT_EXECUTE_TOOL.to_string(),
        }
    }

    pub fn with_tools(mut self, propose_tool: String, execute_tool: String) -> Self {
        self.propose_tool = propose_tool;
        self.execute_tool = execute_tool;
        self
    }

    #[instrument(skip(self, arguments), fields(command = %self.command))]
    async fn call_tool<T: DeserializeOwned>(&self, tool: &str, arguments: Value) -> Result<T> {
        let mut command = Command::new(&self.command);
        command.args(&self.args);
        command.envs(&self.env);
        command.kill_on_drop(true);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::null());

        let mut child = command.spawn()?;
        let mut stdin = child.stdin.take().ok_or_else(|| {
            BrokerError::InvalidOperation("tool server stdin unavailable".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            BrokerError::InvalidOperation("tool server stdout unavailable".to_string())
        })?;
        let mut lines = BufReader::new(stdout).lines();

        send(
            &mut stdin,
            json!({
                "jsonrpc": "2.0",
                "id": INITIALIZE_ID,
                "method": "initialize",
                "params": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "agent-broker", "version": env!("CARGO_PKG_VERSION") }
                }
            }),
        )
        .await?;
        read_response(&mut lines, INITIALIZE_ID).await?;
        send(
            &mut stdin,
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        )
        .await?;
        send(
            &mut stdin,
            json!({
                "jsonrpc": "2.0",
                "id": CALL_ID,
                "method": "tools/call",
                "params": { "name": tool, "arguments": arguments }
            }),
        )
        .await?;
        let result = read_response(&mut lines, CALL_ID).await?;

        drop(stdin);
        if let Err(err) = child.start_kill() {
            debug!(error = %err, "tool server already exited");
        }

        let payload = tool_payload(result)?;
        serde_json::from_value(payload).map_err(|err| BrokerError::MalformedResponse(err.to_string()))
    }
}

async fn send(stdin: &mut ChildStdin, message: Value) -> Result<()> {
    let mut line = message.to_string();
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

async fn read_response(lines: &mut Lines<BufReader<ChildStdout>>, id: u64) -> Result<Value> {
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let message: Value = match serde_json::from_str(trimmed) {
            Ok(message) => message,
            Err(_) => {
                debug!(line = %trimmed, "ignoring non-json output from tool server");
                continue;
            }
        };
        if message.get("id").and_then(Value::as_u64) != Some(id) {
            continue;
        }
        if let Some(error) = message.get("error") {
            let reason = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(BrokerError::AgentFailed(reason));
        }
        return message.get("result").cloned().ok_or_else(|| {
            BrokerError::MalformedResponse("json-rpc response without result".to_string())
        });
    }
    Err(BrokerError::MalformedResponse(
        "tool server closed stdout before responding".to_string(),
    ))
}

/// Extracts the JSON payload of a `tools/call` result.
fn tool_payload(result: Value) -> Result<Value> {
    let first_text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| {
            items.iter().find_map(|item| {
                (item.get("type").and_then(Value::as_str) == Some("text"))
                    .then(|| item.get("text").and_then(Value::as_str))
                    .flatten()
            })
        })
        .map(str::to_string);

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(BrokerError::AgentFailed(
            first_text.unwrap_or_else(|| "tool reported an error".to_string()),
        ));
    }
    if let Some(structured) = result.get("structuredContent") {
        if structured.is_object() {
            return Ok(structured.clone());
        }
    }
    let text = first_text.ok_or_else(|| {
        BrokerError::MalformedResponse("tool result carried no usable content".to_string())
    })?;
    serde_json::from_str(&text).map_err(|err| BrokerError::MalformedResponse(err.to_string()))
}

#[async_trait]
impl AgentGateway for ToolProtocolAgent {
    fn kind(&self) -> &'static str {
        "tool_protocol"
    }

    async fn propose(&self, intent: &Intent) -> Result<Proposal> {
        self.call_tool(&self.propose_tool, json!({ "intent": intent }))
            .await
    }

    async fn execute(&self, task: &Task) -> Result<TaskResult> {
        self.call_tool(&self.execute_tool, json!({ "task": task }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_structured_content() {
        let payload = tool_payload(json!({
            "content": [{ "type": "text", "text": "ignored" }],
            "structuredContent": { "confidence": 0.5 }
        }))
        .unwrap();
        assert_eq!(payload, json!({ "confidence": 0.5 }));
    }

    #[test]
    fn parses_text_content_as_json() {
        let payload = tool_payload(json!({
            "content": [{ "type": "text", "text": "{\"status\":\"OK\"}" }]
        }))
        .unwrap();
        assert_eq!(payload, json!({ "status": "OK" }));
    }

    #[test]
    fn tool_errors_become_failures() {
        let err = tool_payload(json!({
            "isError": true,
            "content": [{ "type": "text", "text": "quota exhausted" }]
        }))
        .unwrap_err();
        assert!(matches!(err, BrokerError::AgentFailed(reason) if reason == "quota exhausted"));
    }

    #[test]
    fn non_json_text_is_malformed() {
        let err = tool_payload(json!({
            "content": [{ "type": "text", "text": "Extracted event: {}" }]
        }))
        .unwrap_err();
        assert!(matches!(err, BrokerError::MalformedResponse(_)));
    }
}
