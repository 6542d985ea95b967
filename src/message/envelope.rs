use serde::{Deserialize, Serialize};
use crate::direction::Direction;
use crate::grid_data::DataType;

/// Halo data sent from one patch to a neighbor during an exchange round.
///
/// The receiver identifies the relation to fill by the source patch, the
/// direction of the relation on the sender, and the sender-local anchor cell
/// of that relation. The payload is already laid out in the receiver's frame.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HaloMessage {
    pub round: u64,
    pub source: usize,
    pub target: usize,
    pub direction: Direction,
    pub anchor: (i64, i64),
    pub data_type: DataType,
    pub payload: Vec<f64>,
}

/// Every kind of message that travels between ranks. The `epoch` on the
/// collective messages counts collective calls, which every rank makes in
/// the same order. Consolidation messages carry the number of the
/// consolidation round that sent them.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    Reduce {
        epoch: u64,
        source: usize,
        values: Vec<f64>,
    },
    Broadcast {
        epoch: u64,
        values: Vec<f64>,
    },
    Halo(HaloMessage),
    Consolidate {
        round: u64,
        tag: u32,
        payload: Vec<f64>,
    },
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::encode::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::decode::from_slice(bytes)
    }
}

#[cfg(test)]
mod test {

    use super::{Envelope, HaloMessage};
    use crate::direction::Direction;
    use crate::grid_data::DataType;

    #[test]
    fn halo_envelope_survives_encoding() {
        let envelope = Envelope::Halo(HaloMessage {
            round: 3,
            source: 1,
            target: 4,
            direction: Direction::BottomLeft,
            anchor: (2, -1),
            data_type: DataType::Tracers,
            payload: vec![1.5, -0.25, 1e300],
        });
        let bytes = envelope.encode().unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(Envelope::decode(&[0xc1, 0x00]).is_err());
    }
}
