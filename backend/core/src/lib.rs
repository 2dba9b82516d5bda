pub mod error;
pub mod message;
pub mod traits;
pub mod types;

pub use error::ChatError;
pub use message::{sort_history, ChatMessage, NewMessage};
pub use traits::{IdentityGateway, MessageStore};
pub use types::{ConnectionId, EventId, UserId};
