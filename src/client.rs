//! Minimal client for the prised socket protocol.
//!
//! Front-ends (and the end-to-end tests) use this to issue requests, fire
//! notifications, and consume the redraw stream. Responses and
//! notifications interleave on the wire; notifications that arrive while a
//! request is waiting for its response are buffered and handed out by
//! [`Client::next_notification`].

use rmpv::Value;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::rpc::{Decoder, Message, RpcError};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] RpcError),

    /// The daemon answered with an error string.
    #[error("daemon error: {0}")]
    Remote(String),

    #[error("connection closed")]
    Closed,
}

pub struct Client {
    stream: UnixStream,
    decoder: Decoder,
    next_msgid: u32,
    pending_notifications: VecDeque<(String, Value)>,
}

impl Client {
    pub async fn connect(path: &Path) -> io::Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self {
            stream,
            decoder: Decoder::new(),
            next_msgid: 1,
            pending_notifications: VecDeque::new(),
        })
    }

    /// Ask the daemon for this connection's identity (the fd it accepted).
    /// `detach_pty` wants that value, which only the daemon knows.
    pub async fn client_id(&mut self) -> Result<u64, ClientError> {
        let result = self.request("client_id", vec![]).await?;
        result
            .as_u64()
            .ok_or_else(|| ClientError::Remote("client_id is not an integer".to_string()))
    }

    /// Issue a request and wait for its response.
    pub async fn request(&mut self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        let msgid = self.next_msgid;
        self.next_msgid = self.next_msgid.wrapping_add(1);

        let message = Message::request(msgid, method, params);
        self.stream.write_all(&message.encode()).await?;

        loop {
            match self.next_message().await? {
                Message::Response {
                    msgid: m,
                    error,
                    result,
                } if m == msgid => {
                    return if error.is_nil() {
                        Ok(result)
                    } else {
                        Err(ClientError::Remote(
                            error.as_str().unwrap_or("unknown error").to_string(),
                        ))
                    };
                }
                Message::Notification { method, params } => {
                    self.pending_notifications.push_back((method, params));
                }
                other => {
                    tracing::debug!(?other, "ignoring unexpected message");
                }
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&mut self, method: &str, params: Vec<Value>) -> Result<(), ClientError> {
        let message = Message::notification(method, params);
        self.stream.write_all(&message.encode()).await?;
        Ok(())
    }

    /// Wait for the next notification from the daemon.
    pub async fn next_notification(&mut self) -> Result<(String, Value), ClientError> {
        if let Some(pending) = self.pending_notifications.pop_front() {
            return Ok(pending);
        }
        loop {
            match self.next_message().await? {
                Message::Notification { method, params } => return Ok((method, params)),
                other => {
                    tracing::debug!(?other, "ignoring non-notification message");
                }
            }
        }
    }

    async fn next_message(&mut self) -> Result<Message, ClientError> {
        loop {
            match self.decoder.next() {
                Ok(Some(msg)) => return Ok(msg),
                Ok(None) => {}
                Err(e) => return Err(e.into()),
            }
            let mut buf = [0u8; 8 * 1024];
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(ClientError::Closed);
            }
            self.decoder.extend(&buf[..n]);
        }
    }
}
