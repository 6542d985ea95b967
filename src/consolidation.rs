use log::debug;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::grid_data::DataType;




/**
 * The largest tag value any transport is required to support. Messages are
 * identified by typed envelopes rather than transport tags, so this is a
 * fixed bound shared by every `Communicator` instead of a per-transport
 * query.
 */
pub const MAX_TAG: u32 = 32767;




/**
 * Encode a (patch index, data type) pair as one integer tag. The encoding is
 * injective; tags past `MAX_TAG` are rejected.
 */
pub fn generate_tag(patch: usize, data_type: DataType) -> Result<u32> {
    let tag = patch
        .checked_mul(DataType::COUNT)
        .and_then(|t| t.checked_add(data_type.index()))
        .filter(|t| *t <= MAX_TAG as usize)
        .ok_or_else(|| Error::Protocol(format!(
            "patch {} with {:?} does not fit in a tag (max {})", patch, data_type, MAX_TAG)))?;
    Ok(tag as u32)
}




/**
 * Decode a tag produced by `generate_tag`.
 */
pub fn parse_tag(tag: u32) -> Result<(usize, DataType)> {
    if tag > MAX_TAG {
        return Err(Error::Protocol(format!("tag {} exceeds the maximum tag {}", tag, MAX_TAG)))
    }
    let tag = tag as usize;

    match DataType::from_index(tag % DataType::COUNT) {
        Some(data_type) => Ok((tag / DataType::COUNT, data_type)),
        None => unreachable!(),
    }
}




#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]


/**
 * One (patch, data type) payload received at the root. `data` is the patch's
 * flattened arrays over its total extent, halo included; for State the node
 * array of slot zero is followed by its r-edge array.
 */
pub struct ConsolidatedData {
    pub patch: usize,
    pub data_type: DataType,
    pub data: Vec<f64>,
}




#[derive(Clone, Debug)]


/**
 * Bookkeeping for one consolidation round: which (patch, data type) pairs
 * have been received at the root, and how many sends this process issued.
 * The round number keeps messages of a later round from being counted in
 * this one.
 */
pub struct ConsolidationStatus {
    round: u64,
    patch_count: usize,
    data_types: Vec<DataType>,
    received: Vec<bool>,
    received_count: usize,
    sends: usize,
}




// ============================================================================
impl ConsolidationStatus {


    /**
     * Start a round expecting every data type for each of `patch_count`
     * patches. Every data type must be consolidatable.
     */
    pub fn new(patch_count: usize, data_types: &[DataType]) -> Result<Self> {
        let mut types: Vec<DataType> = Vec::new();

        for d in data_types {
            assert!(d.is_consolidatable(), "{:?} cannot be consolidated", d);

            if !types.contains(d) {
                types.push(*d)
            }
        }
        let last_tag = match types.iter().map(|d| d.index()).max() {
            Some(index) if patch_count > 0 => generate_tag(patch_count - 1, DataType::ALL[index])?,
            _ => 0,
        };
        Ok(Self {
            round: 0,
            patch_count,
            data_types: types,
            received: vec![false; last_tag as usize + 1],
            received_count: 0,
            sends: 0,
        })
    }


    pub fn with_round(mut self, round: u64) -> Self {
        self.round = round;
        self
    }


    pub fn round(&self) -> u64 {
        self.round
    }


    pub fn data_types(&self) -> &[DataType] {
        &self.data_types
    }


    pub fn contains(&self, data_type: DataType) -> bool {
        self.data_types.contains(&data_type)
    }


    pub fn expected_count(&self) -> usize {
        self.patch_count * self.data_types.len()
    }


    pub fn received_count(&self) -> usize {
        self.received_count
    }


    /**
     * True when every expected pair has been received.
     */
    pub fn done(&self) -> bool {
        self.received_count == self.expected_count()
    }


    pub fn is_received(&self, patch: usize, data_type: DataType) -> bool {
        generate_tag(patch, data_type)
            .map(|tag| self.received.get(tag as usize).copied().unwrap_or(false))
            .unwrap_or(false)
    }


    /**
     * Record the arrival of the message with the given tag. Tags for unknown
     * patches, data types not in this round, or pairs already received are
     * protocol errors.
     */
    pub fn set_receive_status(&mut self, tag: u32) -> Result<(usize, DataType)> {
        let (patch, data_type) = parse_tag(tag)?;

        if patch >= self.patch_count {
            return Err(Error::Protocol(format!(
                "patch index {} out of range (the grid has {} patches)", patch, self.patch_count)))
        }
        if !self.contains(data_type) {
            return Err(Error::Protocol(format!("{:?} was not requested in this round", data_type)))
        }
        let entry = &mut self.received[tag as usize];

        if *entry {
            return Err(Error::Protocol(format!("{:?} for patch {} was received twice", data_type, patch)))
        }
        *entry = true;
        self.received_count += 1;
        debug!("consolidated {:?} for patch {} ({}/{})", data_type, patch, self.received_count, self.expected_count());
        Ok((patch, data_type))
    }


    /**
     * Count one outgoing send and return the number issued so far.
     */
    pub fn note_send(&mut self) -> usize {
        self.sends += 1;
        self.sends
    }


    pub fn sends(&self) -> usize {
        self.sends
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{generate_tag, parse_tag, ConsolidationStatus, MAX_TAG};
    use crate::grid_data::DataType;

    #[test]
    fn tags_round_trip_over_the_valid_domain() {
        let max_patch = MAX_TAG as usize / DataType::COUNT;
        for patch in (0..max_patch).step_by(97).chain(Some(max_patch - 1)) {
            for d in DataType::ALL.iter() {
                let tag = generate_tag(patch, *d).unwrap();
                assert_eq!(parse_tag(tag).unwrap(), (patch, *d));
            }
        }
        assert!(generate_tag(max_patch + 1, DataType::State).is_err());
        assert!(parse_tag(MAX_TAG + 1).is_err());
    }

    #[test]
    fn status_is_done_after_every_pair_arrives_once() {
        let mut status = ConsolidationStatus::new(3, &[DataType::State, DataType::Jacobian, DataType::State]).unwrap();
        assert_eq!(status.expected_count(), 6);

        for patch in 0..3 {
            for d in &[DataType::Jacobian, DataType::State] {
                assert!(!status.done());
                status.set_receive_status(generate_tag(patch, *d).unwrap()).unwrap();
            }
        }
        assert!(status.done());
        assert!(status.is_received(2, DataType::Jacobian));
    }

    #[test]
    fn bad_arrivals_are_protocol_errors() {
        let mut status = ConsolidationStatus::new(2, &[DataType::State]).unwrap();
        let tag = generate_tag(1, DataType::State).unwrap();
        status.set_receive_status(tag).unwrap();
        assert!(status.set_receive_status(tag).is_err());
        assert!(status.set_receive_status(generate_tag(2, DataType::State).unwrap()).is_err());
        assert!(status.set_receive_status(generate_tag(0, DataType::Z).unwrap()).is_err());
        assert_eq!(status.received_count(), 1);
    }

    #[test]
    #[should_panic]
    fn non_consolidatable_types_are_rejected() {
        let _ = ConsolidationStatus::new(1, &[DataType::Vorticity]);
    }
}
