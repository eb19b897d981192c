use anyhow::Context;
use log::{debug, error};
use mio::{event::Source, unix::SourceFd};
use std::{
    io,
    os::{fd::AsRawFd, unix::net::UnixStream},
};

use crate::{
    MessageHeader, ObjectId,
    buffer::{ArgumentError, ReadResult, Reader, Writer},
    protocols::wayland::{
        WL_DISPLAY_ERROR_INVALID_METHOD, WL_DISPLAY_ERROR_INVALID_OBJECT,
        WL_DISPLAY_ERROR_NO_MEMORY,
    },
    registry::{DISPLAY_OBJECT_ID, Registry, RequestHandler},
};

pub type ClientId = u32;

/// Everything a request handler needs to answer the client that sent the request
pub struct Ctx<'client> {
    pub client_id: ClientId,
    pub registry: &'client mut Registry,
    pub writer: &'client mut Writer,
}

impl Ctx<'_> {
    /// Queues a fatal `wl_display.error` for `object_id`. The connection is expected to be closed
    /// after the error was flushed.
    pub fn post_error(&mut self, object_id: ObjectId, code: u32, message: &str) {
        self.writer
            .wl_display_error(DISPLAY_OBJECT_ID)
            .object_id(object_id)
            .code(code)
            .message(message);
    }

    /// Queues the standard out of memory error
    pub fn post_no_memory(&mut self) {
        self.post_error(DISPLAY_OBJECT_ID, WL_DISPLAY_ERROR_NO_MEMORY, "no memory");
    }

    /// Reports arguments that could not be decoded and returns the error to propagate
    pub fn invalid_arguments(
        &mut self,
        header: &MessageHeader,
        err: ArgumentError,
    ) -> anyhow::Error {
        self.post_error(
            header.object_id,
            WL_DISPLAY_ERROR_INVALID_METHOD,
            &format!("invalid arguments for opcode {}: {err}", header.opcode),
        );
        anyhow::Error::new(err).context(format!(
            "Invalid arguments for opcode {} on object {}",
            header.opcode, header.object_id
        ))
    }
}

/// Whether a client is still connected after its messages were handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum ClientStatus {
    Connected,
    Disconnected,
}

#[derive(Debug)]
pub struct ClientConnection {
    stream: UnixStream,
    client_id: ClientId,
    registry: Registry,
    reader: Reader,
    writer: Writer,
}

impl ClientConnection {
    pub fn new(stream: UnixStream, client_id: ClientId) -> io::Result<Self> {
        // Set the stream to non-blocking mode
        stream.set_nonblocking(true)?;

        debug!(
            "Created client connection with ID: {} (from {:?})",
            client_id,
            stream.peer_addr().ok()
        );

        Ok(Self {
            stream,
            client_id,
            registry: Registry::new(),
            reader: Reader::new(),
            writer: Writer::new(),
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn stream(&self) -> &UnixStream {
        &self.stream
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Reads everything the client has sent and dispatches each complete message to `handler`.
    /// An error means the client violated the protocol and has to be disconnected.
    pub fn handle_messages(
        &mut self,
        handler: &mut impl RequestHandler,
    ) -> anyhow::Result<ClientStatus> {
        loop {
            match self.reader.read(&mut self.stream) {
                ReadResult::EndOfStream => {
                    debug!("Client {} disconnected", self.client_id);
                    return Ok(ClientStatus::Disconnected);
                }
                ReadResult::NoMoreData => {
                    return Ok(ClientStatus::Connected);
                }
                ReadResult::ReadData => self.dispatch_messages(handler)?,
            }
        }
    }

    fn dispatch_messages(&mut self, handler: &mut impl RequestHandler) -> anyhow::Result<()> {
        loop {
            let Some((header, data)) = self
                .reader
                .next()
                .with_context(|| format!("Unable to read message from client {}", self.client_id))?
            else {
                return Ok(());
            };
            let Some(interface_index) = self.registry.interface_index(header.object_id) else {
                error!(
                    "Received request for unknown object ID {}. Disconnecting client {}",
                    header.object_id, self.client_id
                );
                let mut ctx = Ctx {
                    client_id: self.client_id,
                    registry: &mut self.registry,
                    writer: &mut self.writer,
                };
                ctx.post_error(
                    header.object_id,
                    WL_DISPLAY_ERROR_INVALID_OBJECT,
                    "unknown object",
                );
                anyhow::bail!("Unknown object ID {}", header.object_id);
            };
            handler.handle_request(
                interface_index,
                &mut Ctx {
                    client_id: self.client_id,
                    registry: &mut self.registry,
                    writer: &mut self.writer,
                },
                &header,
                data,
            )?;
            self.reader.message_handled(header.size as usize);
        }
    }

    /// Sends the buffered events to the client
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush(&mut self.stream)
    }
}

impl Source for ClientConnection {
    fn register(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        SourceFd(&self.stream.as_raw_fd()).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        SourceFd(&self.stream.as_raw_fd()).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        SourceFd(&self.stream.as_raw_fd()).deregister(registry)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;
    use crate::registry::InterfaceIndex;

    /// Records the requests it receives instead of interpreting them
    #[derive(Default)]
    struct RecordingHandler {
        requests: Vec<(InterfaceIndex, ObjectId, u16, Vec<u8>)>,
    }

    impl RequestHandler for RecordingHandler {
        fn handle_request(
            &mut self,
            interface_index: InterfaceIndex,
            _ctx: &mut Ctx,
            header: &MessageHeader,
            data: &[u8],
        ) -> anyhow::Result<()> {
            self.requests
                .push((interface_index, header.object_id, header.opcode, data.to_vec()));
            Ok(())
        }
    }

    fn message(object_id: ObjectId, opcode: u16, args: &[u32]) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.start_message(object_id, opcode);
        for arg in args {
            writer.write_u32(*arg);
        }
        writer.write_message_length();
        writer.pending().to_vec()
    }

    #[test]
    fn dispatches_messages_in_order() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let mut connection = ClientConnection::new(server, 1).unwrap();
        let mut handler = RecordingHandler::default();

        client.write_all(&message(1, 1, &[2])).unwrap();
        client.write_all(&message(1, 0, &[3])).unwrap();

        assert_eq!(
            connection.handle_messages(&mut handler).unwrap(),
            ClientStatus::Connected
        );
        assert_eq!(
            handler.requests,
            vec![
                (InterfaceIndex::WlDisplay, 1, 1, 2u32.to_ne_bytes().to_vec()),
                (InterfaceIndex::WlDisplay, 1, 0, 3u32.to_ne_bytes().to_vec()),
            ]
        );
    }

    #[test]
    fn partial_message_waits_for_the_rest() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let mut connection = ClientConnection::new(server, 1).unwrap();
        let mut handler = RecordingHandler::default();
        let message = message(1, 1, &[2]);

        client.write_all(&message[..5]).unwrap();
        assert_eq!(
            connection.handle_messages(&mut handler).unwrap(),
            ClientStatus::Connected
        );
        assert!(handler.requests.is_empty());

        client.write_all(&message[5..]).unwrap();
        assert_eq!(
            connection.handle_messages(&mut handler).unwrap(),
            ClientStatus::Connected
        );
        assert_eq!(handler.requests.len(), 1);
    }

    #[test]
    fn unknown_object_posts_error() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let mut connection = ClientConnection::new(server, 1).unwrap();
        let mut handler = RecordingHandler::default();

        client.write_all(&message(42, 0, &[])).unwrap();
        assert!(connection.handle_messages(&mut handler).is_err());
        assert!(handler.requests.is_empty());

        connection.flush().unwrap();
        let mut response = [0; 12];
        client.read_exact(&mut response).unwrap();
        let header = MessageHeader::read(&response).unwrap();
        assert_eq!(header.object_id, DISPLAY_OBJECT_ID);
        assert_eq!(header.opcode, 0);
        assert_eq!(&response[8..12], &42u32.to_ne_bytes());
    }

    #[test]
    fn closed_stream_reports_disconnect() {
        let (client, server) = UnixStream::pair().unwrap();
        let mut connection = ClientConnection::new(server, 7).unwrap();

        drop(client);

        assert_eq!(
            connection
                .handle_messages(&mut RecordingHandler::default())
                .unwrap(),
            ClientStatus::Disconnected
        );
    }
}
