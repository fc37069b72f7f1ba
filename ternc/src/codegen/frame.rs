//! The method frame layout.
//!
//! All offsets handed to the emitter are relative to SP after the prologue
//! has run. The frame, from low to high addresses:
//!
//! ```text
//! sp + 0                       the method pointer (callee's first argument)
//! sp + 4                       outgoing call arguments
//! sp + scratch_slot_offset     a reserved double-word scratch slot
//! sp + slow_path_spill_offset  register save area used by slow paths
//! sp + ...                     register-allocator spill slots
//! sp + frame_size - n          callee-saved core/FP registers (prologue)
//! ```
//!
//! The frame is finalized once, before any code is emitted; emission never
//! changes its size. Sizes grow upwards and the total is aligned to the
//! target's 16-byte stack alignment, whatever order the reservations were
//! made in.

const WORD: u32 = 4;
const STACK_ALIGN: u32 = 16;

/// Accumulates the frame's regions, then freezes into a total size.
#[derive(Debug, Default)]
pub struct Frame {
    outgoing_args_size: u32,
    slow_path_area_size: u32,
    spill_area_size: u32,
    core_spill_mask: u32,
    fpu_spill_mask: u32,
    frame_size: Option<u32>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve space for the arguments of the largest outgoing call.
    pub fn update_outgoing_args_size(&mut self, bytes: u32) {
        debug_assert!(self.frame_size.is_none());
        self.outgoing_args_size = self.outgoing_args_size.max(bytes);
    }

    /// Reserve space for the largest set of registers any slow path saves.
    pub fn update_slow_path_area_size(&mut self, bytes: u32) {
        debug_assert!(self.frame_size.is_none());
        self.slow_path_area_size = self.slow_path_area_size.max(bytes);
    }

    /// Reserve the register allocator's spill area.
    pub fn set_spill_area_size(&mut self, bytes: u32) {
        debug_assert!(self.frame_size.is_none());
        self.spill_area_size = bytes;
    }

    pub fn set_spill_masks(&mut self, core: u32, fpu: u32) {
        debug_assert!(self.frame_size.is_none());
        self.core_spill_mask = core;
        self.fpu_spill_mask = fpu;
    }

    pub fn core_spill_mask(&self) -> u32 {
        self.core_spill_mask
    }

    pub fn fpu_spill_mask(&self) -> u32 {
        self.fpu_spill_mask
    }

    /// Bytes pushed by the prologue's register stores.
    pub fn entry_spill_size(&self) -> u32 {
        (self.core_spill_mask.count_ones() + self.fpu_spill_mask.count_ones()) * WORD
    }

    /// Byte offset of the reserved double-word scratch slot.
    pub fn scratch_slot_offset(&self) -> i32 {
        i32::try_from(WORD + self.outgoing_args_size).unwrap()
    }

    /// Byte offset of the first slot a slow path may save a register to.
    pub fn slow_path_spill_offset(&self) -> u32 {
        WORD + self.outgoing_args_size + 8
    }

    pub fn finalize(&mut self) {
        debug_assert!(self.frame_size.is_none());
        // Method slot + outgoing args + scratch + slow path saves + spills +
        // prologue-pushed registers, rounded up to the stack alignment.
        let unaligned = WORD
            + self.outgoing_args_size
            + 8
            + self.slow_path_area_size
            + self.spill_area_size
            + self.entry_spill_size();
        self.frame_size = Some(unaligned.next_multiple_of(STACK_ALIGN));
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size.expect("frame not finalized")
    }

    /// Number of bits a safepoint stack mask needs to cover every slot below
    /// the prologue-pushed registers.
    pub fn stack_mask_bits(&self) -> u16 {
        u16::try_from((self.frame_size() - self.entry_spill_size()) / WORD).unwrap()
    }

    /// The stack-mask bit index covering the word at `offset` from SP.
    pub fn stack_mask_bit(&self, offset: u32) -> usize {
        usize::try_from(offset / WORD).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_and_alignment() {
        let mut f = Frame::new();
        f.update_outgoing_args_size(8);
        f.update_outgoing_args_size(16); // the larger call wins
        f.update_slow_path_area_size(5 * 4);
        f.set_spill_area_size(12);
        f.set_spill_masks(0b0100_0100_0011_0000, 0);
        f.finalize();

        assert_eq!(f.scratch_slot_offset(), 20);
        assert_eq!(f.slow_path_spill_offset(), 28);
        // r4, r5, r10 and lr.
        assert_eq!(f.entry_spill_size(), 4 * 4);
        // 4 + 16 + 8 + 20 + 12 + 16 = 76, aligned up to 80.
        assert_eq!(f.frame_size(), 80);
        assert_eq!(f.stack_mask_bits(), (80 - 16) / 4);
        assert_eq!(f.stack_mask_bit(28), 7);
    }
}
