// Public modules
pub mod category;
pub mod citation;
pub mod message;
pub mod session;

// Re-exports
pub use category::Category;
pub use citation::Citation;
pub use message::{Message, Sender};
pub use session::{PLACEHOLDER_TITLE, Session, SessionId};
