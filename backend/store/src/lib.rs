//! Storage backends for the event chat relay.
//!
//! Both backends implement [`IdentityGateway`] and [`MessageStore`]: SQLite for
//! durable deployments, an in-memory map for tests and throwaway runs.
//!
//! [`IdentityGateway`]: eventchat_core::IdentityGateway
//! [`MessageStore`]: eventchat_core::MessageStore

pub mod memory_store;
pub mod sqlite_store;

pub use memory_store::InMemoryChatStore;
pub use sqlite_store::SqliteChatStore;
