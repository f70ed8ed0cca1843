pub mod client;
pub mod config;
pub mod conversation;
pub mod forms;
pub mod gate;
pub mod session;
pub mod ui;

pub use client::{ApiClient, ClientError};
pub use conversation::{ChatError, ConversationList, ConversationStore};
pub use gate::{Route, View};
pub use session::{FileStorage, MemoryStorage, Session, SessionState, SessionStorage, SessionStore};
