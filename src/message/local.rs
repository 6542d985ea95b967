use crossbeam_channel::{Receiver, Sender};
use crate::error::{Error, Result};
use super::comm::Communicator;

/// A communicator for ranks that live on threads of a single process. Each
/// rank owns an unbounded inbox and holds a sender to every inbox in the
/// group, including its own.
///
pub struct LocalCommunicator {
    rank: usize,
    peers: Vec<Sender<Vec<u8>>>,
    inbox: Receiver<Vec<u8>>,
}

impl LocalCommunicator {
    /// Create a connected group of `size` communicators, ordered by rank.
    ///
    pub fn group(size: usize) -> Vec<Self> {
        let (sinks, sources): (Vec<_>, Vec<_>) = (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        sources
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Self { rank, peers: sinks.clone(), inbox })
            .collect()
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()> {
        let peer = self.peers.get(rank).ok_or_else(|| {
            Error::Transport(format!("no rank {} in a group of {}", rank, self.peers.len()))
        })?;
        peer.send(message)
            .map_err(|_| Error::Transport(format!("rank {} has hung up", rank)))
    }

    fn recv(&self) -> Result<Vec<u8>> {
        self.inbox
            .recv()
            .map_err(|_| Error::Transport("every peer has hung up".into()))
    }
}
