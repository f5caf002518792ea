//! Ballot arena for the receive path.
//!
//! Ballots live in reusable slots addressed by generation-tagged handles.
//! Clearing a slot bumps its generation, so a handle that outlived its
//! ballot is reported as stale instead of aliasing whatever reuses the slot.
//! Nothing outside the pool keeps a ballot alive: a holder that needs one
//! past its release clones it.

use crate::ballot::Ballot;
use crate::error::ConsensusError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BallotHandle {
    index: u32,
    generation: u32,
}

struct Slot {
    ballot: Ballot,
    generation: u32,
    occupied: bool,
}

impl Slot {
    fn empty() -> Self {
        Self {
            ballot: Ballot::default(),
            generation: 0,
            occupied: false,
        }
    }
}

pub struct BallotPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    capacity: usize,
    live: usize,
}

impl BallotPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            live: 0,
        }
    }

    fn allocate(&mut self) -> Result<u32, ConsensusError> {
        if let Some(index) = self.free.pop() {
            return Ok(index);
        }
        if self.slots.len() >= self.capacity {
            return Err(ConsensusError::PoolExhausted(self.capacity));
        }
        self.slots.push(Slot::empty());
        Ok((self.slots.len() - 1) as u32)
    }

    fn occupy(&mut self, index: u32) -> BallotHandle {
        let slot = &mut self.slots[index as usize];
        slot.occupied = true;
        self.live += 1;
        BallotHandle {
            index,
            generation: slot.generation,
        }
    }

    /// Store an already-built ballot (e.g. one signed locally).
    pub fn insert(&mut self, ballot: Ballot) -> Result<BallotHandle, ConsensusError> {
        let index = self.allocate()?;
        self.slots[index as usize].ballot = ballot;
        Ok(self.occupy(index))
    }

    /// Decode straight into a recycled slot.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<BallotHandle, ConsensusError> {
        let index = self.allocate()?;
        if let Err(e) = self.slots[index as usize].ballot.decode_into(bytes) {
            self.free.push(index);
            return Err(e.into());
        }
        Ok(self.occupy(index))
    }

    fn slot(&self, handle: BallotHandle) -> Result<&Slot, ConsensusError> {
        match self.slots.get(handle.index as usize) {
            Some(slot) if slot.occupied && slot.generation == handle.generation => Ok(slot),
            _ => Err(ConsensusError::StaleHandle),
        }
    }

    pub fn get(&self, handle: BallotHandle) -> Result<&Ballot, ConsensusError> {
        self.slot(handle).map(|s| &s.ballot)
    }

    pub fn is_live(&self, handle: BallotHandle) -> bool {
        self.slot(handle).is_ok()
    }

    /// Return a ballot to the pool. The handle is stale afterwards.
    pub fn release(&mut self, handle: BallotHandle) -> Result<(), ConsensusError> {
        self.slot(handle)?;
        self.clear(handle.index);
        Ok(())
    }

    fn clear(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.ballot.clear();
        slot.generation = slot.generation.wrapping_add(1);
        slot.occupied = false;
        self.free.push(index);
        self.live -= 1;
    }

    /// Ballots currently held.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots allocated so far, live or free.
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }
}
