//! Line-framed TCP IPC: protocol codec (C4) and fan-out server (C5).

pub mod codec;
pub mod server;

pub use codec::{ClientMessage, Decoded, ServerMessage};
pub use server::{ClientId, IpcServer};
