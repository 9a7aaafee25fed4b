pub mod engine;
pub mod pool;

pub use engine::{Row, SqlEngine, SqliteEngine};
pub use pool::{PoolStatus, TargetDatabase};
