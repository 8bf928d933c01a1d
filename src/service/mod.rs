pub mod extraction;

pub use extraction::{ExtractionError, ExtractionPool};
