use std::sync::Arc;

use serde::Serialize;
use sqlsage_common::{CollectionSelector, Error, Result};
use sqlsage_search::SimilarityMatch;
use tracing::{debug, info, instrument, warn};

use crate::providers::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, MessagePart,
    ToolChoice,
};
use crate::tools::{SearchOutcome, SearchTool};

/// Which corpus a retrieval agent grounds the turn in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Schema,
    QueryLog,
}

impl AgentKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Schema => "schema agent",
            Self::QueryLog => "query-log agent",
        }
    }

    fn system_prompt(&self, tool_name: &str, utterance: &str) -> String {
        let body = match self {
            Self::Schema => format!(
                "You are a database schema expert. Your job is to help the orchestration agent \
find relevant database tables and columns.

You MUST:
1. Use the {tool_name} tool first to search for relevant tables.
2. After getting the results, give a clear, helpful response that explains:
   - which tables are most relevant to the question
   - which columns are available in those tables
   - how the tables could be used to answer the question
   - potential SQL queries, if appropriate

Refer to concrete table and column names from the search results. If the search \
fails or finds nothing, say so plainly."
            ),
            Self::QueryLog => format!(
                "You are a SQL query expert. Your job is to help find relevant SQL queries from \
historical query logs.

You MUST:
1. Use the {tool_name} tool first to search for similar queries.
2. After getting the results, give a clear, helpful response that explains:
   - which historical queries are most relevant to the question
   - which patterns or approaches those queries use
   - actual SQL examples from the logs, when available
   - how they could be adapted, with their complexity and semantic category

The query logs contain descriptive text (query_text) and SQL (sql_query); use both. \
If the search fails or finds nothing, say so plainly."
            ),
        };
        format!("{body}\n\nUser's context:\n- Question: \"{utterance}\"")
    }
}

/// Output of one retrieval agent for one turn.
#[derive(Debug, Clone, Serialize)]
pub struct AgentFinding {
    pub agent: AgentKind,
    pub synthesis_text: String,
    pub matches: Vec<SimilarityMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentFinding {
    /// Finding for an agent that could not run at all.
    pub fn degraded(agent: AgentKind, error: &Error) -> Self {
        Self {
            agent,
            synthesis_text: format!(
                "The {} was unavailable for this turn ({error}); no {} evidence could be retrieved.",
                agent.label(),
                match agent {
                    AgentKind::Schema => "schema",
                    AgentKind::QueryLog => "query-log",
                }
            ),
            matches: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// Everything one agent run needs from the turn.
pub struct RetrievalContext<'a> {
    pub utterance: &'a str,
    pub history: &'a [ChatMessage],
    pub collection: &'a CollectionSelector,
}

/// One tool-calling retrieval agent. The schema and query-log agents are both
/// this type with a different [`SearchTool`].
///
/// Round 1 forces a tool call; round 2 feeds the result back and asks for a
/// synthesis with tools disabled. Anything the model tries after that is
/// ignored and only its text is kept.
pub struct RetrievalAgent {
    kind: AgentKind,
    provider: Arc<dyn LlmProvider>,
    tool: Arc<dyn SearchTool>,
    max_tokens: u32,
}

impl RetrievalAgent {
    pub fn new(
        kind: AgentKind,
        provider: Arc<dyn LlmProvider>,
        tool: Arc<dyn SearchTool>,
        max_tokens: u32,
    ) -> Self {
        Self {
            kind,
            provider,
            tool,
            max_tokens,
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    fn request(&self, system: &str, messages: Vec<ChatMessage>, choice: ToolChoice) -> LlmRequest {
        LlmRequest {
            model: String::new(),
            messages,
            system: Some(system.to_string()),
            max_tokens: Some(self.max_tokens),
            temperature: None,
            tools: vec![self.tool.definition()],
            tool_choice: choice,
        }
    }

    #[instrument(skip(self, ctx), fields(agent = self.kind.label(), collection = %ctx.collection))]
    pub async fn run(&self, ctx: &RetrievalContext<'_>) -> Result<AgentFinding> {
        let system = self.kind.system_prompt(self.tool.name(), ctx.utterance);
        let mut messages = ctx.history.to_vec();

        // Round 1: the model must search.
        let first = self
            .provider
            .complete(&self.request(&system, messages.clone(), ToolChoice::Required))
            .await
            .map_err(|e| Error::Retrieval(format!("{}: {e}", self.kind.label())))?;

        let mut accumulated = first.text();
        let Some((call_id, input)) = self.first_tool_call(&first) else {
            warn!("{} answered without searching", self.kind.label());
            return Ok(self.finish(accumulated, None));
        };

        let outcome = self.tool.execute(input, ctx.collection).await;
        info!(
            "{} search {:?} returned {} matches",
            self.kind.label(),
            outcome.search_query,
            outcome.matches.len()
        );

        messages.push(ChatMessage {
            role: ChatRole::Assistant,
            content: MessagePart::Parts(first.content.clone()),
        });
        messages.push(ChatMessage {
            role: ChatRole::User,
            content: MessagePart::Parts(self.tool_results(&first, &call_id, &outcome)),
        });

        // Round 2: synthesize from the results.
        match self
            .provider
            .complete(&self.request(&system, messages, ToolChoice::None))
            .await
        {
            Ok(second) => {
                if second.has_tool_use() {
                    debug!("{} tried a third round; truncating", self.kind.label());
                }
                let text = second.text();
                if !text.trim().is_empty() {
                    if !accumulated.is_empty() {
                        accumulated.push_str("\n\n");
                    }
                    accumulated.push_str(&text);
                }
                Ok(self.finish(accumulated, Some(outcome)))
            }
            Err(e) => {
                warn!("{} synthesis failed: {e}", self.kind.label());
                let mut finding = self.finish(accumulated, Some(outcome));
                finding.error.get_or_insert_with(|| e.to_string());
                Ok(finding)
            }
        }
    }

    fn first_tool_call(&self, response: &LlmResponse) -> Option<(String, serde_json::Value)> {
        response.content.iter().find_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } if name == self.tool.name() => {
                Some((id.clone(), input.clone()))
            }
            _ => None,
        })
    }

    /// Every tool call needs an answer; only the first search actually runs.
    fn tool_results(
        &self,
        response: &LlmResponse,
        executed_id: &str,
        outcome: &SearchOutcome,
    ) -> Vec<ContentBlock> {
        response
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, .. } if id == executed_id => {
                    Some(ContentBlock::ToolResult {
                        tool_use_id: id.clone(),
                        content: outcome.content(),
                    })
                }
                ContentBlock::ToolUse { id, name, .. } => Some(ContentBlock::ToolResult {
                    tool_use_id: id.clone(),
                    content: format!(
                        "{{\"error\":\"{name} was not run: only one search is allowed per turn\"}}"
                    ),
                }),
                _ => None,
            })
            .collect()
    }

    fn finish(&self, text: String, outcome: Option<SearchOutcome>) -> AgentFinding {
        let synthesis_text = if text.trim().is_empty() {
            self.fallback_synthesis(outcome.as_ref())
        } else {
            text.trim().to_string()
        };
        let (matches, error) = match outcome {
            Some(o) => (o.matches, o.error),
            None => (Vec::new(), None),
        };
        AgentFinding {
            agent: self.kind,
            synthesis_text,
            matches,
            error,
        }
    }

    /// Never leave the generation step without something to read.
    fn fallback_synthesis(&self, outcome: Option<&SearchOutcome>) -> String {
        let subject = self.tool.subject();
        match outcome {
            None => format!("The {} did not search for relevant {subject}.", self.kind.label()),
            Some(o) if o.is_error() => format!(
                "The search for relevant {subject} failed, so no {subject} are available for this question."
            ),
            Some(o) if o.matches.is_empty() => format!(
                "No relevant {subject} were found for \"{}\".",
                o.search_query
            ),
            Some(o) => {
                let names: Vec<String> = o.matches.iter().map(describe_match).collect();
                format!("Relevant {subject}:\n- {}", names.join("\n- "))
            }
        }
    }
}

fn describe_match(m: &SimilarityMatch) -> String {
    match m {
        SimilarityMatch::Table(t) => {
            let columns: Vec<&str> = t.columns.iter().map(|c| c.column_name.as_str()).collect();
            if columns.is_empty() {
                t.table_name.clone()
            } else {
                format!("{} ({})", t.table_name, columns.join(", "))
            }
        }
        SimilarityMatch::QueryLog(q) => {
            if q.sql_query.is_empty() {
                q.query_text.clone()
            } else {
                format!("{}: {}", q.query_text, q.sql_query)
            }
        }
    }
}
