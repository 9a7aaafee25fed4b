use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Serialize;
use sqlsage_common::{CollectionSelector, ConversationMessage, Error, MessageRole, Result};
use tracing::{info, instrument, warn};

use crate::extract::extract_sql_blocks;
use crate::normalize::{StreamingRewriter, normalize_columns};
use crate::providers::{LlmProvider, LlmRequest, StreamEvent, to_chat_history};
use crate::retrieval::{AgentFinding, RetrievalAgent, RetrievalContext};

/// One user turn: the whole conversation so far plus the collection scope.
#[derive(Debug, Clone)]
pub struct Turn {
    messages: Vec<ConversationMessage>,
    collection: CollectionSelector,
}

impl Turn {
    /// The conversation must end with a non-empty user message.
    pub fn new(messages: Vec<ConversationMessage>, collection: CollectionSelector) -> Result<Self> {
        match messages.last() {
            None => Err(Error::InvalidRequest("messages must not be empty".into())),
            Some(last) if last.role != MessageRole::User => Err(Error::InvalidRequest(
                "the last message must come from the user".into(),
            )),
            Some(last) if last.content.trim().is_empty() => Err(Error::InvalidRequest(
                "the last message must not be empty".into(),
            )),
            Some(_) => Ok(Self {
                messages,
                collection,
            }),
        }
    }

    /// Text of the latest user message.
    pub fn utterance(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn collection(&self) -> &CollectionSelector {
        &self.collection
    }
}

/// Both agents' findings for one turn.
#[derive(Debug, Clone, Serialize)]
pub struct Findings {
    pub schema: AgentFinding,
    pub query_log: AgentFinding,
}

/// Batched answer to a turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutput {
    pub content: String,
    pub sql: Vec<String>,
    pub findings: Findings,
}

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Streamed answer: findings are ready up front, text follows.
pub struct TurnStream {
    pub findings: Findings,
    pub text: TextStream,
}

/// Runs both retrieval agents side by side, then one generation call over
/// their findings.
pub struct Orchestrator {
    schema_agent: RetrievalAgent,
    query_log_agent: RetrievalAgent,
    generator: Arc<dyn LlmProvider>,
    max_tokens: u32,
}

impl Orchestrator {
    pub fn new(
        schema_agent: RetrievalAgent,
        query_log_agent: RetrievalAgent,
        generator: Arc<dyn LlmProvider>,
        max_tokens: u32,
    ) -> Self {
        Self {
            schema_agent,
            query_log_agent,
            generator,
            max_tokens,
        }
    }

    pub fn generator(&self) -> &Arc<dyn LlmProvider> {
        &self.generator
    }

    /// Fan out to both agents and wait for both. A failed agent yields a
    /// degraded finding and never cancels the other.
    #[instrument(skip(self, turn), fields(collection = %turn.collection))]
    pub async fn retrieve(&self, turn: &Turn) -> Findings {
        let history = to_chat_history(&turn.messages);
        let ctx = RetrievalContext {
            utterance: turn.utterance(),
            history: &history,
            collection: &turn.collection,
        };

        let (schema, query_log) = tokio::join!(
            self.schema_agent.run(&ctx),
            self.query_log_agent.run(&ctx)
        );

        let settle = |agent: &RetrievalAgent, result: Result<AgentFinding>| {
            result.unwrap_or_else(|e| {
                warn!("{} failed, continuing without it: {e}", agent.kind().label());
                AgentFinding::degraded(agent.kind(), &e)
            })
        };

        Findings {
            schema: settle(&self.schema_agent, schema),
            query_log: settle(&self.query_log_agent, query_log),
        }
    }

    fn generation_request(&self, turn: &Turn, findings: &Findings) -> LlmRequest {
        let mut request = LlmRequest::new(
            Some(build_generation_prompt(findings)),
            to_chat_history(&turn.messages),
        );
        request.max_tokens = Some(self.max_tokens);
        request
    }

    /// Retrieve, generate, normalize and extract in one call.
    #[instrument(skip(self, turn), fields(collection = %turn.collection))]
    pub async fn answer(&self, turn: &Turn) -> Result<TurnOutput> {
        let findings = self.retrieve(turn).await;
        let request = self.generation_request(turn, &findings);

        let response = self
            .generator
            .complete(&request)
            .await
            .map_err(generation_failure)?;

        let content = normalize_columns(&response.text()).into_owned();
        let sql = extract_sql_blocks(&content);
        info!("generated answer with {} sql blocks", sql.len());

        Ok(TurnOutput {
            content,
            sql,
            findings,
        })
    }

    /// Like [`answer`](Self::answer) but the generated text is streamed.
    /// Errors before the first token are returned here; errors after that
    /// arrive as an `Err` item on the stream.
    #[instrument(skip(self, turn), fields(collection = %turn.collection))]
    pub async fn answer_stream(&self, turn: &Turn) -> Result<TurnStream> {
        let findings = self.retrieve(turn).await;
        let request = self.generation_request(turn, &findings);

        let text: TextStream = match self.generator.stream_complete(&request).await {
            Ok(events) => Box::pin(rewrite_stream(events)),
            Err(stream_err) => {
                // Streaming not supported: fall back to a single batched chunk.
                info!("streaming unavailable ({stream_err}), generating in one piece");
                let response = self
                    .generator
                    .complete(&request)
                    .await
                    .map_err(generation_failure)?;
                let content = normalize_columns(&response.text()).into_owned();
                Box::pin(futures::stream::iter([Ok(content)]))
            }
        };

        Ok(TurnStream { findings, text })
    }
}

fn generation_failure(error: Error) -> Error {
    match error {
        Error::Generation(_) => error,
        other => Error::Generation(other.to_string()),
    }
}

/// System prompt for the generation step: both findings verbatim plus the
/// fixed output rules.
pub fn build_generation_prompt(findings: &Findings) -> String {
    format!(
        "You are a helpful assistant. Write SQL for the user's question using the findings of \
the schema agent and the query-log agent below.

Instructions:
1. Use the schema agent's response to understand the structure and relationships of the tables.
2. Use the query-log agent's response to see how similar questions were answered before.
3. Generate a valid SQL query that answers the question and put it in a fenced ```sql block.
4. Do not include the database name in the query.
5. ALWAYS replace custid with customer_id in the query: the schema agent reports custid, but \
the database column is customer_id.

SCHEMA AGENT RESPONSE:
{}

QUERY-LOG AGENT RESPONSE:
{}
",
        findings.schema.synthesis_text, findings.query_log.synthesis_text
    )
}

type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

struct RewriteState {
    events: EventStream,
    rewriter: StreamingRewriter,
    deferred_error: Option<Error>,
    done: bool,
}

/// Text deltas with `custid` rewritten across chunk boundaries. Held-back
/// text is flushed before a stream error is reported.
fn rewrite_stream(events: EventStream) -> impl Stream<Item = Result<String>> + Send {
    let state = RewriteState {
        events,
        rewriter: StreamingRewriter::new(),
        deferred_error: None,
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if let Some(e) = state.deferred_error.take() {
            return Some((Err(e), state));
        }
        if state.done {
            return None;
        }
        loop {
            match state.events.next().await {
                Some(Ok(StreamEvent::TextDelta(delta))) => {
                    let out = state.rewriter.push(&delta);
                    if !out.is_empty() {
                        return Some((Ok(out), state));
                    }
                }
                Some(Ok(StreamEvent::MessageStop)) | None => {
                    state.done = true;
                    let tail = state.rewriter.finish();
                    return (!tail.is_empty()).then_some((Ok(tail), state));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    state.done = true;
                    let tail = state.rewriter.finish();
                    if tail.is_empty() {
                        return Some((Err(e), state));
                    }
                    state.deferred_error = Some(e);
                    return Some((Ok(tail), state));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::AgentKind;

    fn finding(agent: AgentKind, text: &str) -> AgentFinding {
        AgentFinding {
            agent,
            synthesis_text: text.into(),
            matches: vec![],
            error: None,
        }
    }

    #[test]
    fn turn_requires_trailing_user_message() {
        let all = CollectionSelector::All;
        assert!(Turn::new(vec![], all.clone()).is_err());
        assert!(
            Turn::new(vec![ConversationMessage::assistant("hi")], all.clone()).is_err()
        );
        assert!(Turn::new(vec![ConversationMessage::user("  ")], all.clone()).is_err());

        let turn = Turn::new(
            vec![
                ConversationMessage::user("first"),
                ConversationMessage::assistant("answer"),
                ConversationMessage::user("follow-up"),
            ],
            all,
        )
        .unwrap();
        assert_eq!(turn.utterance(), "follow-up");
        assert_eq!(turn.messages().len(), 3);
    }

    #[test]
    fn prompt_embeds_both_findings_and_rules() {
        let prompt = build_generation_prompt(&Findings {
            schema: finding(AgentKind::Schema, "accounts(custid, balance)"),
            query_log: finding(AgentKind::QueryLog, "SELECT SUM(balance) FROM accounts"),
        });
        assert!(prompt.contains("SCHEMA AGENT RESPONSE:\naccounts(custid, balance)"));
        assert!(prompt.contains("QUERY-LOG AGENT RESPONSE:\nSELECT SUM(balance) FROM accounts"));
        assert!(prompt.contains("Do not include the database name"));
        assert!(prompt.contains("replace custid with customer_id"));
    }

    fn events(items: Vec<Result<StreamEvent>>) -> EventStream {
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn stream_rewrites_split_tokens() {
        let chunks: Vec<String> = rewrite_stream(events(vec![
            Ok(StreamEvent::TextDelta("SELECT cu".into())),
            Ok(StreamEvent::TextDelta("stid FROM t".into())),
            Ok(StreamEvent::MessageDelta {
                stop_reason: Some("end_turn".into()),
                usage: None,
            }),
            Ok(StreamEvent::MessageStop),
        ]))
        .map(|r| r.unwrap())
        .collect()
        .await;
        assert_eq!(chunks.concat(), "SELECT customer_id FROM t");
    }

    #[tokio::test]
    async fn stream_error_follows_flushed_text() {
        let items: Vec<Result<String>> = rewrite_stream(events(vec![
            Ok(StreamEvent::TextDelta("partial answer".into())),
            Err(Error::Generation("connection reset".into())),
        ]))
        .collect()
        .await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_deref().unwrap(), "partial ");
        assert_eq!(items[1].as_deref().unwrap(), "answer");
        assert!(items[2].is_err());
    }
}
