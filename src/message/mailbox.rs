use std::collections::VecDeque;
use log::debug;
use crate::error::{Error, Result};
use super::{comm::Communicator, envelope::Envelope, util};

/// Element-wise operators for reductions.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
}

impl ReduceOp {
    fn combine(self, into: &mut [f64], other: &[f64]) -> Result<()> {
        if into.len() != other.len() {
            return Err(Error::Protocol(format!(
                "reduction operands have lengths {} and {}", into.len(), other.len())))
        }
        for (x, y) in into.iter_mut().zip(other) {
            *x = match self {
                ReduceOp::Sum => *x + y,
                ReduceOp::Max => x.max(*y),
            }
        }
        Ok(())
    }
}

/// Typed messaging over a `Communicator`. Envelopes are encoded with
/// MessagePack. Receives are selective: envelopes that arrive before anyone
/// asks for them are stashed in arrival order until a matching receive is
/// made.
///
/// Collectives are binomial trees rooted at rank zero. Each collective call
/// consumes one epoch number, so every rank must make the same sequence of
/// collective calls.
///
pub struct Mailbox<C> {
    comm: C,
    stash: VecDeque<Envelope>,
    epoch: u64,
}

impl<C: Communicator> Mailbox<C> {
    pub fn new(comm: C) -> Self {
        Self {
            comm,
            stash: VecDeque::new(),
            epoch: 0,
        }
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    /// Number of envelopes received but not yet claimed.
    pub fn stashed(&self) -> usize {
        self.stash.len()
    }

    /// Encode and send an envelope to a peer (possibly this rank).
    pub fn post(&self, rank: usize, envelope: &Envelope) -> Result<()> {
        self.comm.send(rank, envelope.encode()?)
    }

    /// Block until an envelope satisfying `accept` is available, and return
    /// it. Stashed envelopes are considered first, oldest first.
    pub fn receive<F>(&mut self, accept: F) -> Result<Envelope>
    where
        F: Fn(&Envelope) -> bool,
    {
        if let Some(position) = self.stash.iter().position(|e| accept(e)) {
            if let Some(envelope) = self.stash.remove(position) {
                return Ok(envelope)
            }
        }
        loop {
            let envelope = Envelope::decode(&self.comm.recv()?)?;

            if accept(&envelope) {
                return Ok(envelope)
            }
            debug!("[{}] stashing an envelope nobody is waiting for yet", self.rank());
            self.stash.push_back(envelope)
        }
    }

    /// Binomial tree reduce. Every rank contributes a vector of the same
    /// length; rank zero returns the combined result and every other rank
    /// returns `None`.
    pub fn reduce(&mut self, values: Vec<f64>, op: ReduceOp) -> Result<Option<Vec<f64>>> {
        let epoch = self.next_epoch();
        let r = self.rank();
        let p = self.size();
        let mut value = values;

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = one << 1;

            if r % two == 0 {
                if r + one < p {
                    let child = r + one;
                    let incoming = self.receive(|e| matches!(e,
                        Envelope::Reduce { epoch: x, source, .. } if *x == epoch && *source == child))?;

                    match incoming {
                        Envelope::Reduce { values, .. } => op.combine(&mut value, &values)?,
                        _ => unreachable!(),
                    }
                }
            } else {
                self.post(r - one, &Envelope::Reduce { epoch, source: r, values: value })?;
                return Ok(None)
            }
        }
        Ok(Some(value))
    }

    /// Binomial tree broadcast from rank zero. The values must be `Some` on
    /// rank zero and `None` everywhere else.
    pub fn broadcast(&mut self, values: Option<Vec<f64>>) -> Result<Vec<f64>> {
        let epoch = self.next_epoch();
        let r = self.rank();
        let p = self.size();

        assert_eq!(r == 0, values.is_some(), "only rank zero supplies broadcast values");

        let value = match values {
            Some(value) => value,
            None => match self.receive(|e| matches!(e, Envelope::Broadcast { epoch: x, .. } if *x == epoch))? {
                Envelope::Broadcast { values, .. } => values,
                _ => unreachable!(),
            },
        };
        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = one << 1;

            if r % two == 0 && r + one < p {
                self.post(r + one, &Envelope::Broadcast { epoch, values: value.clone() })?
            }
        }
        Ok(value)
    }

    /// Reduce to rank zero, then broadcast the result to every rank.
    pub fn all_reduce(&mut self, values: Vec<f64>, op: ReduceOp) -> Result<Vec<f64>> {
        let reduced = self.reduce(values, op)?;
        self.broadcast(reduced)
    }

    /// Return once every rank has entered the barrier.
    pub fn barrier(&mut self) -> Result<()> {
        self.all_reduce(Vec::new(), ReduceOp::Sum).map(|_| ())
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }
}
