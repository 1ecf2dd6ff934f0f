pub mod embeddings;
pub mod retriever;
pub mod store;

pub use embeddings::{cosine_similarity, normalize, HttpEmbeddingProvider};
pub use retriever::{FlatIndex, FlatIndexRetriever};
pub use store::SqliteStore;
