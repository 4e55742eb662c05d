//! A connected client: its socket, the peer uid/gid captured once at
//! accept time, and a byte accumulator holding the at-most-one pending
//! parsed request per session.

use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};

use buildjail_protocol::frame;
use buildjail_protocol::node::Node;

use crate::policy::Client;

const READ_CHUNK: usize = 4096;

pub struct ClientSession {
    pub stream: UnixStream,
    pub client: Client,
    buffer: Vec<u8>,
}

impl ClientSession {
    /// Accepts a freshly connected socket: captures peer credentials once
    /// (they are never refreshed for the life of the session) and
    /// switches it to non-blocking I/O for the event loop.
    pub fn accept(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let cred =
            getsockopt(&stream, PeerCredentials).map_err(|err| io::Error::other(err.to_string()))?;
        Ok(Self {
            stream,
            client: Client {
                uid: cred.uid(),
                gid: cred.gid(),
            },
            buffer: Vec::new(),
        })
    }

    /// Reads whatever bytes are currently available into the session's
    /// accumulator. Returns `Ok(true)` once the peer has shut down its
    /// write side (EOF); `WouldBlock` just means nothing new arrived this
    /// iteration and is not an error here.
    pub fn read_available(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Parses and removes one complete frame from the accumulator, if one
    /// has fully arrived. A partial frame stays in the accumulator until
    /// the next readable event.
    pub fn take_frame(&mut self) -> Option<Node> {
        let total = frame::frame_len(&self.buffer)?;
        if self.buffer.len() < total {
            return None;
        }
        let request = frame::decode(&self.buffer[..total]).ok();
        self.buffer.drain(..total);
        request
    }

    /// Sends one framed reply.
    pub fn send(&mut self, value: &Node) -> io::Result<()> {
        let bytes = frame::encode(value).map_err(|err| io::Error::other(err.to_string()))?;
        self.stream.write_all(&bytes)
    }
}
