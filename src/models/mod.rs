pub mod internal;
pub mod pedagogy;

pub use internal::{
    ChatMessage, ChatRequest, ChatResult, ContextChunk, Message, ModelReply, Role, SessionInfo,
};
pub use pedagogy::PedagogyMode;
