pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AgentsConfig, AppConfig, DatabaseConfig, EmbeddingProviderConfig, GatewayConfig,
    LlmProviderConfig, SandboxConfig, SearchConfig,
};
