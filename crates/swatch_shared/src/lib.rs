//! Types shared between the swatch binary and the display thread.

mod args;
mod comms;
mod display_message;
mod main_message;

pub use args::GlobalArgs;
pub use comms::{MessageSender, message_loop_with_channel};
pub use display_message::DisplayMessage;
pub use main_message::MainMessage;

/// The token under which the message channel waker of an event loop is registered
pub const MESSAGE_CHANNEL_TOKEN: mio::Token = mio::Token(0);
