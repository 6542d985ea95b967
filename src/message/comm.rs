use crate::error::Result;

/// Interface for a group of processes that can exchange messages over a
/// network. The underlying transport can in principle be TCP, in-process
/// channels, or a higher level abstraction like MPI.
///
pub trait Communicator {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peers processes in this
    /// communicator.
    fn size(&self) -> usize;

    /// Must be implemented to send a message to a peer. This method must
    /// return immediately, in other words it is not allowed to block until a
    /// matching receive is posted. Messages from one sender to one receiver
    /// must arrive in the order they were sent.
    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()>;

    /// Must be implemented to receive a message from any of the peers. This
    /// method is allowed to block until a message is ready to be received,
    /// and it has no timeout.
    fn recv(&self) -> Result<Vec<u8>>;
}
