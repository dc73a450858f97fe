//! IPC server (C5): single-threaded, non-blocking TCP fan-out.
//!
//! Binds loopback-only by default (resolved in favor of `127.0.0.1`
//! unless the caller explicitly opts into a different address). All
//! sockets are non-blocking; the scheduler drives every read and write
//! by calling [`IpcServer::accept`], [`IpcServer::poll`], and
//! [`IpcServer::broadcast`] once per tick.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::codec::{self, Decoded};
use crate::error::{Error, Result};

/// Either buffer exceeding this size disconnects the client.
const MAX_BUFFER_BYTES: usize = 10 * 1024 * 1024;
const READ_CHUNK_BYTES: usize = 8 * 1024;
const MAX_WRITES_PER_FLUSH: usize = 10;

pub type ClientId = u64;

struct Client {
    stream: TcpStream,
    write_buf: VecDeque<u8>,
    read_buf: Vec<u8>,
}

#[derive(Default)]
pub struct IpcServer {
    listener: Option<TcpListener>,
    clients: HashMap<ClientId, Client>,
    next_client_id: ClientId,
}

impl IpcServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: a second call with the server already started is a
    /// no-op.
    pub fn start(&mut self, port: u16) -> Result<()> {
        self.start_on(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    /// As [`Self::start`], but lets the caller explicitly opt into a
    /// non-loopback bind address.
    pub fn start_on(&mut self, addr: IpAddr, port: u16) -> Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind(SocketAddr::new(addr, port)).map_err(|e| {
            if e.kind() == io::ErrorKind::AddrInUse {
                Error::Conflict(format!("port {port} is already in use"))
            } else {
                Error::Io(e)
            }
        })?;
        listener.set_nonblocking(true)?;
        self.listener = Some(listener);
        Ok(())
    }

    /// Idempotent: stopping an already-stopped server is a no-op.
    pub fn stop(&mut self) {
        self.listener = None;
        self.clients.clear();
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    /// Drain every pending connection; never blocks.
    pub fn accept(&mut self) -> Vec<ClientId> {
        let mut accepted = Vec::new();
        let Some(listener) = &self.listener else {
            return accepted;
        };
        loop {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    if stream.set_nonblocking(true).is_err() {
                        continue;
                    }
                    let id = self.next_client_id;
                    self.next_client_id += 1;
                    self.clients.insert(
                        id,
                        Client {
                            stream,
                            write_buf: VecDeque::new(),
                            read_buf: Vec::new(),
                        },
                    );
                    accepted.push(id);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        accepted
    }

    /// Enqueue `msg` for every connected client and attempt one flush
    /// cycle for each.
    pub fn broadcast<T: Serialize>(&mut self, msg: &T) {
        let encoded = codec::encode(msg);
        for id in self.client_ids() {
            self.enqueue(id, encoded.as_bytes());
        }
        for id in self.client_ids() {
            self.flush_one(id);
        }
    }

    pub fn send_to<T: Serialize>(&mut self, client_id: ClientId, msg: &T) {
        let encoded = codec::encode(msg);
        self.enqueue(client_id, encoded.as_bytes());
        self.flush_one(client_id);
    }

    fn enqueue(&mut self, id: ClientId, bytes: &[u8]) {
        let mut overflow = false;
        if let Some(c) = self.clients.get_mut(&id) {
            c.write_buf.extend(bytes);
            overflow = c.write_buf.len() > MAX_BUFFER_BYTES;
        }
        if overflow {
            self.disconnect_slow_client(id);
        }
    }

    fn flush_one(&mut self, id: ClientId) {
        let mut disconnect = false;
        if let Some(c) = self.clients.get_mut(&id) {
            for _ in 0..MAX_WRITES_PER_FLUSH {
                if c.write_buf.is_empty() {
                    break;
                }
                let (front, _) = c.write_buf.as_slices();
                match c.stream.write(front) {
                    Ok(0) => {
                        disconnect = true;
                        break;
                    }
                    Ok(n) => {
                        c.write_buf.drain(..n);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(_) => {
                        disconnect = true;
                        break;
                    }
                }
            }
        }
        if disconnect {
            self.disconnect_slow_client(id);
        }
    }

    /// Read up to [`READ_CHUNK_BYTES`] per client, extract every
    /// complete line, and decode it. Never blocks.
    pub fn poll<T: DeserializeOwned>(&mut self) -> HashMap<ClientId, Vec<Decoded<T>>> {
        let mut result = HashMap::new();
        for id in self.client_ids() {
            let mut disconnect = false;
            let mut messages = Vec::new();
            if let Some(c) = self.clients.get_mut(&id) {
                let mut chunk = [0u8; READ_CHUNK_BYTES];
                match c.stream.read(&mut chunk) {
                    Ok(0) => disconnect = true,
                    Ok(n) => {
                        c.read_buf.extend_from_slice(&chunk[..n]);
                        if c.read_buf.len() > MAX_BUFFER_BYTES {
                            disconnect = true;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(_) => disconnect = true,
                }

                while let Some(pos) = c.read_buf.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = c.read_buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    messages.push(codec::decode::<T>(line));
                }
            }

            if disconnect {
                self.disconnect_slow_client(id);
            } else if !messages.is_empty() {
                result.insert(id, messages);
            }
        }
        result
    }

    pub fn disconnect_slow_client(&mut self, id: ClientId) {
        self.clients.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::codec::ClientMessage;
    use std::io::{Read as _, Write as _};
    use std::net::TcpStream as StdTcpStream;

    fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn start_is_idempotent() {
        let port = free_port();
        let mut server = IpcServer::new();
        server.start(port).unwrap();
        server.start(port).unwrap();
    }

    #[test]
    fn start_surfaces_port_in_use() {
        let port = free_port();
        let _holder = TcpListener::bind(("127.0.0.1", port)).unwrap();
        let mut server = IpcServer::new();
        let err = server.start(port).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn accept_and_broadcast_round_trip() {
        let port = free_port();
        let mut server = IpcServer::new();
        server.start(port).unwrap();

        let client = StdTcpStream::connect(("127.0.0.1", port)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        let accepted = server.accept();
        assert_eq!(accepted.len(), 1);

        server.broadcast(&super::codec::ServerMessage::Shutdown { ts: chrono::Utc::now() });

        let mut client = client;
        client.set_read_timeout(Some(std::time::Duration::from_millis(500))).unwrap();
        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.contains("shutdown"));
    }

    #[test]
    fn poll_decodes_client_commands() {
        let port = free_port();
        let mut server = IpcServer::new();
        server.start(port).unwrap();

        let mut client = StdTcpStream::connect(("127.0.0.1", port)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        server.accept();

        client.write_all(b"{\"kind\":\"pause\"}\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let polled = server.poll::<ClientMessage>();
        assert_eq!(polled.len(), 1);
        let (_, messages) = polled.into_iter().next().unwrap();
        assert_eq!(messages, vec![Decoded::Message(ClientMessage::Pause)]);
    }
}
