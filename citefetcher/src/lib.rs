pub mod client;
pub mod error;

pub use crate::client::{CitationClient, DEFAULT_CITATION_URL};
pub use crate::error::CitationError;
