pub mod cdc512;
pub mod dir_reader;
pub mod error;
pub mod indexer;
pub mod logging;
pub mod pathutil;
pub mod tracker;

pub use cdc512::{Cdc512, Digest};
pub use dir_reader::{DirectoryReader, EntryInfo};
pub use indexer::{DirectoryIndexer, BLOCK_SIZE};
pub use tracker::DirectoryTracker;
