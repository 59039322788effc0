mod handler;
mod message;

pub use handler::{ws_handler, WsQuery};
pub use message::{ClientMessage, ServerMessage};
