use log::warn;
use mio::{Poll, Waker};
use std::sync::{Arc, mpsc};

use crate::MESSAGE_CHANNEL_TOKEN;

/// Create a new event loop with a message channel already set up
pub fn message_loop_with_channel<M>() -> anyhow::Result<(Poll, mpsc::Receiver<M>, MessageSender<M>)>
{
    let event_loop = mio::Poll::new()?;
    let (sender, receiver) = mpsc::channel();
    let waker = Waker::new(event_loop.registry(), MESSAGE_CHANNEL_TOKEN)?;
    Ok((
        event_loop,
        receiver,
        MessageSender::new(sender, Arc::new(waker)),
    ))
}

/// A sender that wakes up the mio event loop of the receiving side
#[derive(Debug)]
pub struct MessageSender<T> {
    sender: mpsc::Sender<T>,
    waker: Arc<Waker>,
}

impl<T> Clone for MessageSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            waker: self.waker.clone(),
        }
    }
}

impl<T> MessageSender<T> {
    /// Create a new `MessageSender`
    pub fn new(sender: mpsc::Sender<T>, waker: Arc<Waker>) -> Self {
        Self { sender, waker }
    }

    /// Send a message and wake up the event loop
    ///
    /// # Example
    /// ```
    /// # use swatch_shared::{DisplayMessage, message_loop_with_channel};
    /// let (_, display_channel, to_display) =
    ///     message_loop_with_channel::<DisplayMessage>().unwrap();
    /// to_display.send(DisplayMessage::Shutdown).unwrap();
    /// assert!(matches!(display_channel.recv().unwrap(), DisplayMessage::Shutdown));
    /// ```
    pub fn send(&self, message: T) -> Result<(), mpsc::SendError<T>> {
        let result = self.sender.send(message);
        if result.is_ok() {
            if let Err(err) = self.waker.wake() {
                warn!("Unable to wake up event loop: {err}");
            }
        }
        result
    }
}
