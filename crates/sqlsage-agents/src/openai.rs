use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use sqlsage_common::{Error, Result};
use tracing::{debug, info, instrument, warn};

use crate::providers::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, MessagePart,
    StreamEvent, ToolChoice, Usage,
};

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub(crate) const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// Which Chat Completions dialect an endpoint speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFlavor {
    /// `Authorization: Bearer` against `/v1/...`.
    OpenAi,
    /// `api-key` header against `/openai/deployments/{deployment}/...?api-version=`.
    Azure { api_version: String },
}

impl ApiFlavor {
    pub fn azure(api_version: Option<String>) -> Self {
        Self::Azure {
            api_version: api_version.unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
        }
    }

    pub(crate) fn endpoint(&self, base_url: &str, deployment: &str, operation: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            Self::OpenAi => format!("{base}/v1/{operation}"),
            Self::Azure { api_version } => format!(
                "{base}/openai/deployments/{deployment}/{operation}?api-version={api_version}"
            ),
        }
    }

    pub(crate) fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        match self {
            Self::OpenAi => request.bearer_auth(api_key),
            Self::Azure { .. } => request.header("api-key", api_key),
        }
    }

    pub(crate) fn id(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Azure { .. } => "azure",
        }
    }
}

/// Chat Completions provider for OpenAI and Azure OpenAI deployments.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    flavor: ApiFlavor,
}

impl OpenAiProvider {
    pub fn new(
        api_key: impl Into<String>,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            flavor: ApiFlavor::OpenAi,
        }
    }

    /// Azure OpenAI. `deployment` doubles as the model name.
    pub fn azure(
        api_key: impl Into<String>,
        deployment: Option<String>,
        base_url: impl Into<String>,
        api_version: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: deployment.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.into(),
            flavor: ApiFlavor::azure(api_version),
        }
    }

    pub fn flavor(&self) -> &ApiFlavor {
        &self.flavor
    }

    fn endpoint(&self) -> String {
        self.flavor
            .endpoint(&self.base_url, &self.model, "chat/completions")
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let id = self.flavor.id();
        let response = self
            .flavor
            .authorize(self.client.post(self.endpoint()), &self.api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Generation(format!("{id} request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!(
                "{id} API error: status={status}, body={body}"
            )));
        }
        Ok(response)
    }

    fn build_request(&self, request: &LlmRequest) -> OpenAiRequest {
        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };

        let mut messages: Vec<OpenAiMessage> = Vec::new();

        if let Some(system) = &request.system {
            messages.push(OpenAiMessage::text("system", system.clone()));
        }

        for msg in &request.messages {
            match (&msg.role, &msg.content) {
                // Tool results expand to one "tool" message per call
                (ChatRole::User, MessagePart::Parts(blocks))
                    if blocks
                        .iter()
                        .any(|b| matches!(b, ContentBlock::ToolResult { .. })) =>
                {
                    for block in blocks {
                        if let ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                        } = block
                        {
                            messages.push(OpenAiMessage {
                                role: "tool".to_string(),
                                content: Some(content.clone()),
                                tool_calls: None,
                                tool_call_id: Some(tool_use_id.clone()),
                            });
                        }
                    }
                }
                (ChatRole::Assistant, MessagePart::Parts(blocks)) => {
                    let text = join_text(blocks);
                    let tool_calls: Vec<OpenAiToolCall> = blocks
                        .iter()
                        .filter_map(|b| match b {
                            ContentBlock::ToolUse { id, name, input } => Some(OpenAiToolCall {
                                id: id.clone(),
                                r#type: "function".to_string(),
                                function: OpenAiFunctionCall {
                                    name: name.clone(),
                                    arguments: input.to_string(),
                                },
                            }),
                            _ => None,
                        })
                        .collect();

                    messages.push(OpenAiMessage {
                        role: "assistant".to_string(),
                        content: (!text.is_empty()).then_some(text),
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                        tool_call_id: None,
                    });
                }
                (role, MessagePart::Text(text)) => {
                    messages.push(OpenAiMessage::text(role_name(role), text.clone()));
                }
                (role, MessagePart::Parts(blocks)) => {
                    let text = join_text(blocks);
                    messages.push(OpenAiMessage {
                        role: role_name(role).to_string(),
                        content: (!text.is_empty()).then_some(text),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                }
            }
        }

        let tools: Vec<OpenAiTool> = request
            .tools
            .iter()
            .map(|t| OpenAiTool {
                r#type: "function".to_string(),
                function: OpenAiFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect();

        let tool_choice = match (tools.is_empty(), request.tool_choice) {
            (true, _) | (false, ToolChoice::Auto) => None,
            (false, ToolChoice::Required) => Some("required".to_string()),
            (false, ToolChoice::None) => Some("none".to_string()),
        };

        OpenAiRequest {
            model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice,
            stream: None,
        }
    }
}

fn role_name(role: &ChatRole) -> &'static str {
    match role {
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::System => "system",
        ChatRole::Tool => "tool",
    }
}

fn join_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        self.flavor.id()
    }

    #[instrument(skip(self, request), fields(provider = self.flavor.id(), model))]
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = self.build_request(request);

        tracing::Span::current().record("model", body.model.as_str());
        debug!("chat completion request: model={}", body.model);

        let body = serde_json::to_value(&body)?;
        let response = self.post(&body).await?;

        let api_response: OpenAiResponse = response.json().await.map_err(|e| {
            Error::Generation(format!("failed to parse {} response: {e}", self.flavor.id()))
        })?;

        Ok(from_openai_response(api_response))
    }

    #[instrument(skip(self, request), fields(provider = self.flavor.id(), model))]
    async fn stream_complete(
        &self,
        request: &LlmRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>> {
        let mut body = self.build_request(request);
        body.stream = Some(true);

        tracing::Span::current().record("model", body.model.as_str());
        debug!("chat completion stream request: model={}", body.model);

        let body = serde_json::to_value(&body)?;
        let response = self.post(&body).await?;

        let byte_stream: Pin<
            Box<dyn Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send>,
        > = Box::pin(response.bytes_stream());

        Ok(Box::pin(sse_events(byte_stream)))
    }

    fn configured_model(&self) -> Option<&str> {
        Some(&self.model)
    }

    async fn health_check(&self) -> Result<bool> {
        let mut request = LlmRequest::new(None, vec![ChatMessage::user("ping")]);
        request.max_tokens = Some(1);

        match self.complete(&request).await {
            Ok(_) => Ok(true),
            Err(e) => {
                info!("{} health check failed: {e}", self.flavor.id());
                Ok(false)
            }
        }
    }
}

struct SseState<S> {
    bytes: S,
    /// Raw bytes not yet forming a complete event block. Decoded only once a
    /// block is complete, so multi-byte characters may span network chunks.
    buffer: Vec<u8>,
    pending: VecDeque<StreamEvent>,
    done: bool,
}

/// Turn a Chat Completions SSE body into [`StreamEvent`]s. One chunk may carry
/// several events; extras are queued and drained before reading more bytes.
fn sse_events<S>(bytes: S) -> impl Stream<Item = Result<StreamEvent>> + Send
where
    S: Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + Unpin,
{
    let state = SseState {
        bytes,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }

            if let Some(pos) = find_block_end(&state.buffer) {
                let raw: Vec<u8> = state.buffer.drain(..pos + 2).collect();
                let block = String::from_utf8_lossy(&raw);
                for line in block.lines() {
                    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        state.pending.push_back(StreamEvent::MessageStop);
                        state.done = true;
                        break;
                    }
                    if let Some(events) = parse_stream_chunk(data) {
                        state.pending.extend(events);
                    }
                }
                continue;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    // CR only ever appears in line endings; JSON escapes it in strings.
                    state.buffer.extend(chunk.iter().filter(|&&b| b != b'\r'));
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((
                        Err(Error::Generation(format!("stream read error: {e}"))),
                        state,
                    ));
                }
                None => return None,
            }
        }
    })
}

fn find_block_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

// --- Wire types (private) ---

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAiMessage {
    fn text(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    model: String,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiStreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<OpenAiStreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

fn map_finish_reason(reason: &str) -> String {
    match reason {
        "stop" => "end_turn".to_string(),
        "tool_calls" => "tool_use".to_string(),
        other => other.to_string(),
    }
}

/// Parse one streaming chunk into zero or more events.
fn parse_stream_chunk(data: &str) -> Option<Vec<StreamEvent>> {
    let chunk: OpenAiStreamChunk = serde_json::from_str(data).ok()?;

    // Azure sends a leading chunk with content-filter results and no choices.
    let choice = chunk.choices.first()?;
    let mut events = Vec::new();

    if let Some(content) = &choice.delta.content
        && !content.is_empty()
    {
        events.push(StreamEvent::TextDelta(content.clone()));
    }

    if let Some(tool_calls) = &choice.delta.tool_calls {
        for tc in tool_calls {
            if let Some(id) = &tc.id {
                let name = tc
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_default();
                events.push(StreamEvent::ToolUseStart {
                    index: tc.index,
                    id: id.clone(),
                    name,
                });
            }

            if let Some(func) = &tc.function
                && let Some(args) = &func.arguments
                && !args.is_empty()
            {
                events.push(StreamEvent::InputJsonDelta(args.clone()));
            }
        }
    }

    if let Some(reason) = &choice.finish_reason {
        let usage = chunk.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });
        events.push(StreamEvent::MessageDelta {
            stop_reason: Some(map_finish_reason(reason)),
            usage,
        });
    }

    (!events.is_empty()).then_some(events)
}

fn from_openai_response(response: OpenAiResponse) -> LlmResponse {
    let choice = response.choices.into_iter().next();

    let (content, stop_reason) = match choice {
        Some(c) => {
            let mut blocks = Vec::new();

            if let Some(text) = c.message.content
                && !text.is_empty()
            {
                blocks.push(ContentBlock::Text { text });
            }

            for tc in c.message.tool_calls.unwrap_or_default() {
                let input: serde_json::Value = match serde_json::from_str(&tc.function.arguments)
                {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(
                            "tool call {} ({}) has malformed arguments: {e}",
                            tc.id, tc.function.name
                        );
                        serde_json::Value::Null
                    }
                };
                blocks.push(ContentBlock::ToolUse {
                    id: tc.id,
                    name: tc.function.name,
                    input,
                });
            }

            (blocks, c.finish_reason.as_deref().map(map_finish_reason))
        }
        None => (vec![], None),
    };

    LlmResponse {
        content,
        model: response.model,
        usage: response.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
        stop_reason,
    }
}
