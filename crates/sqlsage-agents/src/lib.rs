pub mod embeddings;
pub mod extract;
pub mod normalize;
pub mod openai;
pub mod orchestrator;
pub mod providers;
pub mod retrieval;
pub mod tools;

pub use embeddings::{EmbeddingProvider, OpenAiEmbeddingProvider};
pub use extract::{extract_sql_blocks, to_sql_markdown};
pub use normalize::{StreamingRewriter, normalize_columns};
pub use openai::{ApiFlavor, OpenAiProvider};
pub use orchestrator::{
    Findings, Orchestrator, TextStream, Turn, TurnOutput, TurnStream, build_generation_prompt,
};
pub use providers::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, MessagePart,
    StreamEvent, ToolChoice, ToolDefinition,
};
pub use retrieval::{AgentFinding, AgentKind, RetrievalAgent, RetrievalContext};
pub use tools::{QueryLogSearchTool, SchemaSearchTool, SearchOutcome, SearchTool};
