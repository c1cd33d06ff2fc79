// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Line-oriented transport to a device shell.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::SessionError;

use super::telnet::TelnetFilter;

/// Size of a single socket read.
const READ_CHUNK: usize = 1024;

/// An open shell connection.
///
/// Bytes read past a delimiter are kept in `pending` and served to the next
/// read, so nothing the device sends is lost between calls.
#[derive(Debug)]
pub(crate) struct Connection {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    filter: TelnetFilter,
    pending: Vec<u8>,
}

impl Connection {
    /// Opens a TCP connection to `host:port` within `timeout`.
    pub(crate) async fn open(host: &str, port: u16, timeout: Duration) -> Result<Self, SessionError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| SessionError::Timeout {
                operation: "connect",
                after: timeout,
            })?
            .map_err(|e| SessionError::from_connect_io(e, host, port))?;

        // Commands are short; don't let Nagle hold them back
        let _ = stream.set_nodelay(true);

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader,
            writer,
            filter: TelnetFilter::default(),
            pending: Vec::new(),
        })
    }

    /// Returns up to `max` bytes of text.
    ///
    /// Returns an empty vector on end of stream.
    pub(crate) async fn read_chunk(&mut self, max: usize) -> io::Result<Vec<u8>> {
        while self.pending.is_empty() {
            if !self.fill().await? {
                return Ok(Vec::new());
            }
        }
        let take = max.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }

    /// Reads up to and including the first occurrence of `marker`.
    ///
    /// Fails with `UnexpectedEof` if the stream ends first.
    pub(crate) async fn read_until(&mut self, marker: &[u8]) -> io::Result<Vec<u8>> {
        loop {
            if let Some(pos) = find(&self.pending, marker) {
                let end = pos + marker.len();
                return Ok(self.pending.drain(..end).collect());
            }
            if !self.fill().await? {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before prompt",
                ));
            }
        }
    }

    /// Writes `line` followed by a newline and flushes.
    pub(crate) async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await
    }

    /// Drops text received but not yet consumed.
    pub(crate) fn discard_pending(&mut self) {
        if !self.pending.is_empty() {
            tracing::trace!(bytes = self.pending.len(), "Discarding unread output");
            self.pending.clear();
        }
    }

    /// Closes the write half.
    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }

    /// Reads once from the socket into `pending`.
    ///
    /// Returns `false` on end of stream.
    async fn fill(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; READ_CHUNK];
        let n = self.reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(false);
        }

        let mut replies = Vec::new();
        self.filter.feed(&buf[..n], &mut self.pending, &mut replies);
        if !replies.is_empty() {
            self.writer.write_all(&replies).await?;
        }
        Ok(true)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
