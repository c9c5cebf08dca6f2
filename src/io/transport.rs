//! Transport layer - Pure I/O abstraction for message exchange
//!
//! This module provides the core transport abstraction that handles
//! bidirectional exchange of raw text chunks without knowledge of message
//! format. The language server runs it over its own stdin/stdout; tests run
//! it over in-memory duplex pipes.

use async_trait::async_trait;
#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, trace};

// ============================================================================
// Constants
// ============================================================================

/// Size of the read buffer for inbound reading operations
const READ_BUFFER_SIZE: usize = 4096;

/// Default capacity for UTF-8 accumulation buffer
const UTF8_ACCUMULATION_BUFFER_CAPACITY: usize = 8192;

/// Core transport trait for bidirectional message exchange
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a message (raw string)
    async fn send(&mut self, message: &str) -> Result<(), Self::Error>;

    /// Receive the next chunk of text. Chunks are not aligned to messages.
    async fn receive(&mut self) -> Result<String, Self::Error>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Check if transport is still active
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Stdio Transport Implementation
// ============================================================================

/// Error types for stdio transport
#[derive(Debug, thiserror::Error)]
pub enum StdioTransportError {
    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Transport implementation over any pair of async byte streams
#[derive(Debug)]
pub struct StdioTransport {
    /// Channel for sending messages to the writer task
    outbound_sender: Option<mpsc::UnboundedSender<String>>,

    /// Channel for receiving text decoded by the reader task
    inbound_receiver: Option<mpsc::UnboundedReceiver<String>>,

    /// Connection status
    connected: bool,
}

/// Internal state for the reader task that handles byte accumulation
struct InboundReaderState {
    /// Buffer for accumulating raw bytes before UTF-8 conversion
    byte_buffer: Vec<u8>,

    /// Buffer capacity to avoid frequent reallocations
    buffer_capacity: usize,
}

impl InboundReaderState {
    fn new() -> Self {
        Self {
            byte_buffer: Vec::with_capacity(UTF8_ACCUMULATION_BUFFER_CAPACITY),
            buffer_capacity: UTF8_ACCUMULATION_BUFFER_CAPACITY,
        }
    }

    fn add_bytes(&mut self, bytes: &[u8]) {
        self.byte_buffer.extend_from_slice(bytes);
    }

    /// Take the longest valid UTF-8 prefix out of the buffer.
    /// An incomplete trailing sequence stays behind until more bytes arrive.
    fn extract_valid_utf8(&mut self) -> Option<String> {
        if self.byte_buffer.is_empty() {
            return None;
        }

        let valid_end = match std::str::from_utf8(&self.byte_buffer) {
            Ok(_) => self.byte_buffer.len(),
            Err(e) => e.valid_up_to(),
        };

        if valid_end == 0 {
            return None;
        }

        let bytes: Vec<u8> = self.byte_buffer.drain(..valid_end).collect();
        String::from_utf8(bytes).ok()
    }

    fn compact(&mut self) {
        if self.byte_buffer.capacity() > self.buffer_capacity * 2 {
            self.byte_buffer.shrink_to(self.buffer_capacity);
        }
    }
}

impl StdioTransport {
    /// Create a transport over the given streams.
    ///
    /// Spawns one task that writes outbound messages and one that decodes
    /// inbound bytes into UTF-8 text chunks.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel();
        let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel();

        tokio::spawn(Self::writer_task(writer, outbound_receiver));
        tokio::spawn(Self::reader_task(reader, inbound_sender));

        Self {
            outbound_sender: Some(outbound_sender),
            inbound_receiver: Some(inbound_receiver),
            connected: true,
        }
    }

    /// Transport over this process's own stdin/stdout
    pub fn from_process_stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    async fn writer_task<W>(mut writer: W, mut receiver: mpsc::UnboundedReceiver<String>)
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(message) = receiver.recv().await {
            trace!(
                "StdioTransport: Writing message (length: {})",
                message.len()
            );

            if let Err(e) = writer.write_all(message.as_bytes()).await {
                error!("Failed to write to output stream: {}", e);
                break;
            }

            if let Err(e) = writer.flush().await {
                error!("Failed to flush output stream: {}", e);
                break;
            }
        }

        trace!("StdioTransport: writer task finished");
    }

    async fn reader_task<R>(reader: R, sender: mpsc::UnboundedSender<String>)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut state = InboundReaderState::new();
        let mut read_buffer = Box::new([0u8; READ_BUFFER_SIZE]);

        loop {
            match reader.read(read_buffer.as_mut()).await {
                Ok(0) => {
                    Self::handle_eof(&mut state, &sender);
                    break;
                }
                Ok(n) => {
                    state.add_bytes(&read_buffer[..n]);

                    while let Some(data) = state.extract_valid_utf8() {
                        if sender.send(data).is_err() {
                            trace!("StdioTransport: inbound receiver dropped, stopping reader");
                            return;
                        }
                    }

                    state.compact();
                }
                Err(e) => {
                    error!("Failed to read from input stream: {}", e);
                    break;
                }
            }
        }

        trace!("StdioTransport: reader task finished");
    }

    fn handle_eof(state: &mut InboundReaderState, sender: &mpsc::UnboundedSender<String>) {
        trace!("StdioTransport: input stream reached EOF");

        if let Some(final_string) = state.extract_valid_utf8() {
            if sender.send(final_string).is_err() {
                trace!("StdioTransport: inbound receiver dropped during EOF processing");
            }
        }

        if !state.byte_buffer.is_empty() {
            error!(
                "StdioTransport: {} incomplete bytes remaining at EOF: {:?}",
                state.byte_buffer.len(),
                state.byte_buffer
            );
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    type Error = StdioTransportError;

    /// Writing stays possible after the inbound side reached EOF, until close
    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        let sender = self
            .outbound_sender
            .as_ref()
            .ok_or(StdioTransportError::Disconnected)?;

        sender
            .send(message.to_string())
            .map_err(|e| StdioTransportError::Channel(e.to_string()))
    }

    async fn receive(&mut self) -> Result<String, Self::Error> {
        if !self.connected {
            return Err(StdioTransportError::Disconnected);
        }

        let receiver = self
            .inbound_receiver
            .as_mut()
            .ok_or(StdioTransportError::Disconnected)?;

        match receiver.recv().await {
            Some(data) => Ok(data),
            None => {
                self.connected = false;
                Err(StdioTransportError::Disconnected)
            }
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        self.outbound_sender.take();
        self.inbound_receiver.take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Mock Transport Implementation
// ============================================================================

/// Error type for mock transport
#[cfg(test)]
#[derive(Debug, thiserror::Error)]
pub enum MockTransportError {
    #[error("Transport is disconnected")]
    Disconnected,
    #[error("No more responses available")]
    NoMoreResponses,
}

/// Mock transport for testing - allows controlling sent/received messages
#[cfg(test)]
pub struct MockTransport {
    /// Messages that were sent via this transport
    sent_messages: Arc<Mutex<Vec<String>>>,

    /// Predefined chunks to return when receive() is called
    responses: Arc<Mutex<VecDeque<String>>>,

    /// Connection status
    connected: bool,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent_messages: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            connected: true,
        }
    }

    /// Create a mock transport with predefined inbound chunks
    pub fn with_responses(responses: Vec<String>) -> Self {
        let transport = Self::new();
        transport.responses.lock().unwrap().extend(responses);
        transport
    }

    /// Get all messages that were sent via this transport
    pub fn sent_messages(&self) -> Vec<String> {
        self.sent_messages.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }

        self.sent_messages.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }

        let mut responses = self.responses.lock().unwrap();
        responses
            .pop_front()
            .ok_or(MockTransportError::NoMoreResponses)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Tests
// ============================================================================
