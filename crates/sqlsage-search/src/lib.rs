pub mod matches;
pub mod rpc;
pub mod search;

pub use matches::{ColumnMatch, QueryLogMatch, SimilarityMatch, TableEmbeddingRow, TableMatch};
pub use rpc::RpcSearchClient;
pub use search::{
    Collection, CollectionCatalog, QueryLogSearchRequest, SIMILARITY_THRESHOLD, SimilaritySearch,
    TableSearchRequest,
};
