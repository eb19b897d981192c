/// Represents the messages that can be sent to the main thread
#[derive(Debug, PartialEq, Eq)]
pub enum MainMessage {
    /// A signal asked the application to shut down
    Shutdown,
    /// A worker thread returned or panicked and is about to finish
    ThreadExited,
}
