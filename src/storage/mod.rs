pub mod chroma_client;
pub mod db;
pub mod in_memory;
pub mod memory;
pub mod sqlite_memory;

pub use chroma_client::{ChromaClient, ChromaError};
pub use db::init_db;
pub use in_memory::InMemoryConversationMemory;
pub use memory::{ConversationMemory, MemoryError};
pub use sqlite_memory::SqliteConversationMemory;
