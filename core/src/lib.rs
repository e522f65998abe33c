/// WardLink - hospital inbox client
///
/// Client core for the hospital management API: unread counters, chat
/// conversations, notifications, debounced search and the real-time
/// event channel, tied together per logged-in session.

pub mod error;
pub mod config;
pub mod models;
pub mod api;
pub mod unread;
pub mod conversations;
pub mod notifications;
pub mod records;
pub mod search;
pub mod realtime;
pub mod session;
pub mod cli_app;

pub use error::{Result, WardError};
pub use config::Config;
pub use session::{Session, SessionManager};
