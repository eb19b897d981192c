use std::{
    borrow::Cow,
    io::{self, Read, Write},
    mem,
};

use log::{debug, error};
use thiserror::Error;

use crate::{MessageHeader, ObjectId, Opcode, header::HEADER_SIZE};

const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;
const BUFFER_SIZE: usize = MAX_MESSAGE_SIZE * 2;
const MAX_STRING_LENGTH: usize = 1_024 * 2;

#[derive(Debug)]
pub struct Reader {
    buffer: Box<[u8]>,
    bytes_in_buffer: usize,
    current_buffer_offset: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReadResult {
    ReadData,
    NoMoreData,
    EndOfStream,
}

impl Default for Reader {
    fn default() -> Self {
        Self::new()
    }
}

impl Reader {
    pub fn new() -> Self {
        Self {
            buffer: vec![0; BUFFER_SIZE].into_boxed_slice(),
            bytes_in_buffer: 0,
            current_buffer_offset: 0,
        }
    }

    #[must_use]
    pub fn read(&mut self, stream: &mut impl Read) -> ReadResult {
        if self.buffer.len() - self.bytes_in_buffer < MAX_MESSAGE_SIZE {
            // Make room for at least one more full message
            debug!("Buffer is too small and needs copying");
            self.buffer
                .copy_within(self.current_buffer_offset..self.bytes_in_buffer, 0);
            self.bytes_in_buffer -= self.current_buffer_offset;
            self.current_buffer_offset = 0;
        }

        loop {
            match stream.read(&mut self.buffer[self.bytes_in_buffer..]) {
                Ok(0) => return ReadResult::EndOfStream,
                Ok(received_bytes) => {
                    self.bytes_in_buffer += received_bytes;
                    return ReadResult::ReadData;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return ReadResult::NoMoreData;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("Error reading from socket: {}", err);
                    return ReadResult::EndOfStream;
                }
            }
        }
    }

    /// Returns the next complete message, if there is one. The message stays in the buffer until
    /// [`Reader::message_handled`] is called.
    pub fn next(&self) -> anyhow::Result<Option<(MessageHeader, &[u8])>> {
        let available = &self.buffer[self.current_buffer_offset..self.bytes_in_buffer];
        let Some(header) = MessageHeader::read(available) else {
            return Ok(None);
        };
        if !header.has_valid_size() {
            anyhow::bail!(
                "Malformed message of size {} for object {}",
                header.size,
                header.object_id
            );
        }
        if header.size as usize > available.len() {
            return Ok(None);
        }

        Ok(Some((header, &available[HEADER_SIZE..header.size as usize])))
    }

    pub fn message_handled(&mut self, message_size: usize) {
        self.current_buffer_offset += message_size;
        if self.bytes_in_buffer == self.current_buffer_offset {
            // If we've read all the data in the buffer, reset the offset
            self.current_buffer_offset = 0;
            self.bytes_in_buffer = 0;
        }
    }
}

#[derive(Debug, Default)]
pub struct Writer {
    buffer: Vec<u8>,
    message_start: usize,
    message_opcode: Opcode,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_message(&mut self, object_id: ObjectId, opcode: Opcode) {
        self.message_start = self.buffer.len();
        self.message_opcode = opcode;
        self.write_u32(object_id);
        // Size is patched in by `write_message_length`
        self.write_u32(0);
    }

    pub fn write_message_length(&mut self) {
        let size = (self.buffer.len() - self.message_start) as u32;
        let size_index = self.message_start + mem::size_of::<u32>();
        self.buffer[size_index..size_index + mem::size_of::<u32>()]
            .copy_from_slice(&((size << 16) | self.message_opcode as u32).to_ne_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_ne_bytes());
    }

    pub fn write_str(&mut self, value: &str) {
        let mut length = value.len().min(MAX_STRING_LENGTH);
        // Never cut a multi byte character in half
        while !value.is_char_boundary(length) {
            length -= 1;
        }
        let bytes = &value.as_bytes()[..length];
        // The length includes the terminating NUL byte
        self.write_u32(bytes.len() as u32 + 1);
        self.buffer.extend_from_slice(bytes);
        self.buffer.push(0);
        // Pad to 32-bit boundary
        let padding = (4 - (bytes.len() + 1) % 4) % 4;
        self.buffer.extend(std::iter::repeat_n(0, padding));
    }

    /// Bytes that are waiting to be sent
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Writes as much of the pending data to `stream` as it accepts without blocking. Data that
    /// could not be written stays buffered for the next flush.
    pub fn flush(&mut self, stream: &mut impl Write) -> io::Result<()> {
        let mut written = 0;
        let result = loop {
            if written == self.buffer.len() {
                break Ok(());
            }
            match stream.write(&self.buffer[written..]) {
                Ok(0) => break Err(io::ErrorKind::WriteZero.into()),
                Ok(bytes) => written += bytes,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => break Err(err),
            }
        };
        self.buffer.drain(..written);
        self.message_start = self.message_start.saturating_sub(written);
        result
    }
}

/// Errors while decoding the arguments of a request
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("message ended before all arguments were read")]
    Truncated,
    #[error("message has {0} unexpected trailing bytes")]
    TrailingBytes(usize),
    #[error("non-nullable argument is null")]
    UnexpectedNull,
    #[error("string is not NUL terminated")]
    UnterminatedString,
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

/// Sequential decoder for the arguments of a request
#[derive(Debug)]
pub struct Arguments<'data> {
    data: &'data [u8],
    offset: usize,
}

impl<'data> Arguments<'data> {
    pub fn new(data: &'data [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn uint(&mut self) -> Result<u32, ArgumentError> {
        let bytes = self
            .data
            .get(self.offset..self.offset + mem::size_of::<u32>())
            .ok_or(ArgumentError::Truncated)?;
        self.offset += mem::size_of::<u32>();
        Ok(u32::from_ne_bytes(
            bytes.try_into().map_err(|_| ArgumentError::Truncated)?,
        ))
    }

    pub fn object(&mut self) -> Result<ObjectId, ArgumentError> {
        self.nullable_object()?.ok_or(ArgumentError::UnexpectedNull)
    }

    pub fn nullable_object(&mut self) -> Result<Option<ObjectId>, ArgumentError> {
        self.uint().map(|id| (id != 0).then_some(id))
    }

    pub fn new_id(&mut self) -> Result<ObjectId, ArgumentError> {
        self.object()
    }

    pub fn string(&mut self) -> Result<&'data str, ArgumentError> {
        self.nullable_string()?.ok_or(ArgumentError::UnexpectedNull)
    }

    pub fn nullable_string(&mut self) -> Result<Option<&'data str>, ArgumentError> {
        self.nullable_string_bytes()?
            .map(|bytes| std::str::from_utf8(bytes).map_err(|_| ArgumentError::InvalidUtf8))
            .transpose()
    }

    /// A string argument whose content is opaque to the server. Invalid UTF-8 sequences are
    /// replaced instead of failing the request.
    pub fn string_lossy(&mut self) -> Result<Cow<'data, str>, ArgumentError> {
        self.nullable_string_bytes()?
            .map(String::from_utf8_lossy)
            .ok_or(ArgumentError::UnexpectedNull)
    }

    /// The bytes of a string argument without the terminating NUL
    fn nullable_string_bytes(&mut self) -> Result<Option<&'data [u8]>, ArgumentError> {
        let length = self.uint()? as usize;
        if length == 0 {
            return Ok(None);
        }
        let padded_length = length.div_ceil(4) * 4;
        let bytes = self
            .data
            .get(self.offset..self.offset + padded_length)
            .ok_or(ArgumentError::Truncated)?;
        self.offset += padded_length;
        let (last, string) = bytes[..length]
            .split_last()
            .ok_or(ArgumentError::Truncated)?;
        if *last != 0 {
            return Err(ArgumentError::UnterminatedString);
        }
        Ok(Some(string))
    }

    /// Ensures that every byte of the message was consumed
    pub fn finish(self) -> Result<(), ArgumentError> {
        match self.data.len() - self.offset {
            0 => Ok(()),
            trailing => Err(ArgumentError::TrailingBytes(trailing)),
        }
    }
}
