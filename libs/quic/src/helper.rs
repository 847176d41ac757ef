//! Clock, randomness, and buffer primitives for the QUIC engine.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::connection::{transmit_batch, BATCH_DATAGRAM_SIZE};
use crate::dispatcher::Dispatcher;

/// Per-thread helper shared by every connection created from one
/// persistent info.
pub struct QuicConnectionHelper {
    dispatcher: Rc<dyn Dispatcher>,
    rng: RefCell<StdRng>,
}

impl QuicConnectionHelper {
    /// Create a helper seeded from the operating system.
    pub fn new(dispatcher: Rc<dyn Dispatcher>) -> Self {
        Self::with_rng(dispatcher, StdRng::from_os_rng())
    }

    /// Create a helper with a fixed random source.
    pub fn with_rng(dispatcher: Rc<dyn Dispatcher>, rng: StdRng) -> Self {
        Self {
            dispatcher,
            rng: RefCell::new(rng),
        }
    }

    /// Current time on the owning dispatcher.
    pub fn now(&self) -> Instant {
        self.dispatcher.now()
    }

    /// Seed for a new engine endpoint (connection IDs, reset tokens).
    pub fn endpoint_seed(&self) -> [u8; 32] {
        let mut seed = [0u8; 32];
        self.rng.borrow_mut().fill_bytes(&mut seed);
        seed
    }

    /// Allocate a send buffer sized for one transmit batch under `limit`.
    ///
    /// `limit` caps how many datagrams a batch may hold; the buffer itself
    /// only reserves room for one such batch and may still grow if the
    /// engine writes more.
    pub fn allocate_send_buffer(&self, limit: u32) -> Vec<u8> {
        let limit = limit as usize;
        Vec::with_capacity(limit.min(transmit_batch(limit) * BATCH_DATAGRAM_SIZE))
    }
}
