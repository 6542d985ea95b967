use std::collections::HashMap;
use std::io::{self, prelude::*};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::error::{Error, Result};
use super::{backoff::{self, ExponentialBackoff}, comm::Communicator, util};

const RETRY_WAIT: Duration = Duration::from_millis(250);
const RETRY_MAX_WAIT: Duration = Duration::from_millis(5000);
const CONNECT_ATTEMPTS: usize = 40;

type Outbound = crossbeam_channel::Sender<(usize, Vec<u8>)>;
type Inbound = crossbeam_channel::Receiver<Vec<u8>>;

/// Owns the background threads of a TCP transport: one serial sender which
/// keeps a connection to every peer it has written to, and one listener
/// which accepts connections and spawns a reader for each.
///
/// Frames are a little-endian `usize` length followed by the bytes; the
/// receiver acknowledges each frame by echoing its length. Any failure to
/// write or acknowledge a frame stops the sender, after which every send on
/// the communicator fails.
///
pub struct TcpHost {
    listen_thread: Option<JoinHandle<()>>,
    send_thread: Option<JoinHandle<()>>,
}

impl TcpHost {
    /// Bind this rank's address from the peer table and start the transport.
    ///
    pub fn new(rank: usize, peers: Vec<SocketAddr>) -> Result<(Self, TcpCommunicator)> {
        let addr = *peers.get(rank).ok_or_else(|| {
            Error::Configuration(format!("rank {} is missing from a peer table of {}", rank, peers.len()))
        })?;
        Self::with_listener(rank, TcpListener::bind(addr)?, peers)
    }

    /// Start the transport on a listener that is already bound.
    ///
    pub fn with_listener(rank: usize, listener: TcpListener, peers: Vec<SocketAddr>) -> Result<(Self, TcpCommunicator)> {
        if rank >= peers.len() {
            return Err(Error::Configuration(format!("rank {} is missing from a peer table of {}", rank, peers.len())))
        }
        let (send_sink, send_src) = crossbeam_channel::unbounded();
        let (recv_sink, recv_src) = crossbeam_channel::unbounded();
        let num_peers = peers.len();

        let host = TcpHost {
            send_thread: Some(Self::start_serial_sender(peers, send_src)),
            listen_thread: Some(Self::start_listener(listener, recv_sink)),
        };
        let comm = TcpCommunicator {
            rank,
            num_peers,
            send_sink,
            recv_src,
        };
        Ok((host, comm))
    }

    /// Wait for every queued message to be written. The communicator must
    /// have been dropped first, otherwise this blocks forever.
    ///
    pub fn join(&mut self) {
        if let Some(thread) = self.send_thread.take() {
            if thread.join().is_err() {
                error!("TCP sender thread panicked")
            }
        }
        // The listener stays up to serve peers that are still sending.
        self.listen_thread.take();
    }

    fn start_serial_sender(peers: Vec<SocketAddr>, send_src: crossbeam_channel::Receiver<(usize, Vec<u8>)>) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut table: HashMap<usize, TcpStream> = HashMap::new();

            for (rank, message) in send_src {
                let addr = match peers.get(rank) {
                    Some(addr) => *addr,
                    None => {
                        error!("no peer with rank {}; stopping sender", rank);
                        return
                    }
                };
                if !table.contains_key(&rank) {
                    match Self::connect_with_retry(addr) {
                        Ok(stream) => {
                            table.insert(rank, stream);
                        }
                        Err(e) => {
                            error!("could not connect to {}: {}; stopping sender", addr, e);
                            return
                        }
                    }
                }
                if let Some(stream) = table.get_mut(&rank) {
                    if let Err(e) = Self::write_frame(stream, &message) {
                        error!("failed to send message to {}: {}; stopping sender", addr, e);
                        return
                    }
                }
            }
            debug!("TCP sender shutting down")
        })
    }

    fn write_frame(stream: &mut TcpStream, message: &[u8]) -> io::Result<()> {
        stream.write_all(&message.len().to_le_bytes())?;
        stream.write_all(message)?;

        let ack = util::read_usize(stream)?;

        if ack != message.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sent {} bytes but the receiver acknowledged {}", message.len(), ack)))
        }
        Ok(())
    }

    fn start_listener(listener: TcpListener, recv_sink: crossbeam_channel::Sender<Vec<u8>>) -> JoinHandle<()> {
        thread::spawn(move || {
            if let Ok(addr) = listener.local_addr() {
                info!("listening on {}", addr);
            }
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        Self::handle_connection(stream, recv_sink.clone());
                    }
                    Err(e) => warn!("failed to accept a connection: {}", e),
                }
            }
        })
    }

    fn handle_connection(mut stream: TcpStream, recv_sink: crossbeam_channel::Sender<Vec<u8>>) -> JoinHandle<()> {
        let remote = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown peer".into());
        debug!("receiving connection from {}", remote);

        thread::spawn(move || loop {
            let size = match util::read_usize(&mut stream) {
                Ok(size) => size,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!("connection from {} closed", remote);
                    return
                }
                Err(e) => {
                    error!("connection from {} failed: {}", remote, e);
                    return
                }
            };
            let result = util::read_bytes_vec(&mut stream, size)
                .and_then(|bytes| recv_sink
                    .send(bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string())))
                .and_then(|()| stream.write_all(&size.to_le_bytes()));

            if let Err(e) = result {
                error!("connection from {} failed: {}", remote, e);
                return
            }
        })
    }

    fn connect_with_retry(addr: SocketAddr) -> io::Result<TcpStream> {
        backoff::retry(
            ExponentialBackoff::new(RETRY_WAIT, RETRY_MAX_WAIT, 2).take(CONNECT_ATTEMPTS),
            || TcpStream::connect(addr),
            |e, delay| debug!("connect to {} failed ({}); retrying in {:?}", addr, e, delay))
    }
}




/// The `Communicator` half of a TCP transport. Sends are queued for the
/// host's sender thread; receives block on frames collected by the listener.
///
pub struct TcpCommunicator {
    rank: usize,
    num_peers: usize,
    send_sink: Outbound,
    recv_src: Inbound,
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()> {
        self.send_sink
            .send((rank, message))
            .map_err(|_| Error::Transport("the TCP sender has stopped".into()))
    }

    fn recv(&self) -> Result<Vec<u8>> {
        self.recv_src
            .recv()
            .map_err(|_| Error::Transport("the TCP listener has stopped".into()))
    }
}
