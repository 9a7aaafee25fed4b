pub mod allowlist;
pub mod sandbox;
pub mod validation;

pub use allowlist::StatementAllowlist;
pub use sandbox::{SandboxOptions, SandboxOverrides, SqlExecutionResult, SqlSandbox};
pub use validation::{DENIED_TOKENS, SqlValidator};
