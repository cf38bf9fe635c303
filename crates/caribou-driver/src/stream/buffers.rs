//! Ping/pong block arena
//!
//! One allocation holds both slots. A single atomic tag names the slot the
//! DMA side owns; the other slot belongs to the application. Handing a block
//! over is one `fetch_xor`, and the two role views are produced with
//! `split_at_mut`, so they can never alias.

use crate::error::{Result, SmiError};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Two equally sized blocks with an owner tag
#[derive(Debug)]
pub(crate) struct PingPong {
    // u32 backing keeps every block aligned for IQ word views
    arena: Vec<u32>,
    block_len: usize,
    dma_slot: AtomicUsize,
}

/// Mutable views of both slots, labelled by role
pub(crate) struct Roles<'a> {
    pub dma_slot: usize,
    pub dma: &'a mut [u8],
    pub app_slot: usize,
    pub app: &'a mut [u8],
}

impl PingPong {
    /// Allocate two zeroed blocks of `block_len` bytes
    pub(crate) fn new(block_len: usize) -> Result<Self> {
        if block_len == 0 || block_len % 4 != 0 {
            return Err(SmiError::invalid_argument(format!(
                "block length {block_len} must be a non-zero multiple of 4"
            )));
        }
        let words = block_len / 4 * 2;
        let mut arena = Vec::new();
        arena.try_reserve_exact(words).map_err(|e| {
            SmiError::out_of_memory(format!("two {block_len} byte stream blocks: {e}"))
        })?;
        arena.resize(words, 0);

        Ok(Self {
            arena,
            block_len,
            dma_slot: AtomicUsize::new(0),
        })
    }

    pub(crate) const fn block_len(&self) -> usize {
        self.block_len
    }

    pub(crate) fn dma_slot(&self) -> usize {
        self.dma_slot.load(Ordering::Acquire)
    }

    /// Hand the DMA block to the application; returns the new application slot
    pub(crate) fn swap(&self) -> usize {
        self.dma_slot.fetch_xor(1, Ordering::AcqRel)
    }

    pub(crate) fn roles(&mut self) -> Roles<'_> {
        let dma_slot = self.dma_slot();
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(self.arena.as_mut_slice());
        let (first, second) = bytes.split_at_mut(self.block_len);
        let (dma, app) = if dma_slot == 0 {
            (first, second)
        } else {
            (second, first)
        };
        Roles {
            dma_slot,
            dma,
            app_slot: dma_slot ^ 1,
            app,
        }
    }
}
