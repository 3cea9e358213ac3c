// Public modules
pub mod aggregator;
pub mod backend;
pub mod chat;
pub mod directory;
pub mod display;
pub mod error;
pub mod markup;
pub mod store;
pub mod title;
pub mod types;

mod observability;

// Re-exports
pub use aggregator::{AggregatorConfig, StreamOutcome, StreamState, StreamingAggregator};
pub use backend::{Delta, GenerationBackend, Instruction, MessagesBackend};
pub use directory::{
    DirectoryObserver, NoopObserver, SessionDirectory, SessionGroup, SessionSummary,
    SharedDirectory,
};
pub use display::{DisplaySink, RecordingSink, ReplyHandle};
pub use error::{Error, Result};
pub use markup::{ListWrapping, render, render_with};
pub use observability::register_biometrics;
pub use store::SessionStore;
pub use title::infer_title;
pub use types::*;
