pub mod indexer;

pub use indexer::{IndexError, IndexOptions, IndexProgress, IndexReport, Indexer};
