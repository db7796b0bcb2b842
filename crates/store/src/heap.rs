//! Slotted heap page layout.
//!
//! Body layout: `u16 slot_count | u32 free_offset | slot entries ...
//! gap ... record bytes`, with record bytes packed downward from the
//! end of the body. Slots are fixed width so a slot index addresses its
//! entry directly.

use common::{DbError, DbResult, PageId, RecordSlot};
use pager::Page;

pub const SLOT_SIZE: usize = 21;
const SLOTS_START: usize = 6;

/// Slot states.
const STATE_FREE: u8 = 0;
const STATE_ACTIVE: u8 = 1;
const STATE_FORWARDED: u8 = 2;
const STATE_OVERFLOW: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SlotEntry {
    Free,
    /// Record bytes live on this page at `offset..offset + len`.
    Active { offset: u32, len: u32 },
    /// Record moved; the slot address stays valid and points here.
    Forwarded { target: RecordSlot },
    /// Record spilled to an overflow chain starting at `first`.
    Overflow { first: PageId, total_len: u32 },
}

impl SlotEntry {
    pub fn is_free(&self) -> bool {
        matches!(self, SlotEntry::Free)
    }
}

pub fn init_heap_page(page: &mut Page) -> DbResult<()> {
    let body_len = page.body().len() as u32;
    page.write_u16(0, 0)?;
    page.write_u32(2, body_len)?;
    Ok(())
}

pub fn slot_count(page: &Page) -> DbResult<u16> {
    page.read_u16(0)
}

pub fn free_offset(page: &Page) -> DbResult<u32> {
    page.read_u32(2)
}

/// Contiguous free bytes between the slot array and the record data.
pub fn free_space(page: &Page) -> DbResult<usize> {
    let slots_end = SLOTS_START + slot_count(page)? as usize * SLOT_SIZE;
    Ok((free_offset(page)? as usize).saturating_sub(slots_end))
}

/// Bytes needed to place `len` record bytes, assuming a new slot entry
/// may be required.
pub fn space_needed(len: usize) -> usize {
    len + SLOT_SIZE
}

pub fn read_slot(page: &Page, slot: u16) -> DbResult<SlotEntry> {
    if slot >= slot_count(page)? {
        return Err(DbError::InvalidArgument(format!(
            "slot {slot} out of range on page {}",
            page.id.0
        )));
    }
    let base = SLOTS_START + slot as usize * SLOT_SIZE;
    let state = page.read_bytes(base, 1)?[0];
    let offset = page.read_u32(base + 1)?;
    let len = page.read_u32(base + 5)?;
    let aux = page.read_u64(base + 9)?;
    let total = page.read_u32(base + 17)?;

    Ok(match state {
        STATE_FREE => SlotEntry::Free,
        STATE_ACTIVE => SlotEntry::Active { offset, len },
        STATE_FORWARDED => SlotEntry::Forwarded {
            target: unpack_slot(aux),
        },
        STATE_OVERFLOW => SlotEntry::Overflow {
            first: PageId(aux),
            total_len: total,
        },
        _ => return Err(DbError::CorruptPage(page.id.0)),
    })
}

pub fn write_slot(page: &mut Page, slot: u16, entry: SlotEntry) -> DbResult<()> {
    let base = SLOTS_START + slot as usize * SLOT_SIZE;
    let (state, offset, len, aux, total) = match entry {
        SlotEntry::Free => (STATE_FREE, 0, 0, 0, 0),
        SlotEntry::Active { offset, len } => (STATE_ACTIVE, offset, len, 0, 0),
        SlotEntry::Forwarded { target } => (STATE_FORWARDED, 0, 0, pack_slot(target), 0),
        SlotEntry::Overflow { first, total_len } => (STATE_OVERFLOW, 0, 0, first.0, total_len),
    };
    page.write_bytes(base, &[state])?;
    page.write_u32(base + 1, offset)?;
    page.write_u32(base + 5, len)?;
    page.write_u64(base + 9, aux)?;
    page.write_u32(base + 17, total)?;
    Ok(())
}

/// Find a reusable free slot, or append a new one if space allows.
/// Returns the slot index; the entry itself is still `Free`.
pub fn take_slot(page: &mut Page) -> DbResult<Option<u16>> {
    let count = slot_count(page)?;
    for slot in 0..count {
        if read_slot(page, slot)?.is_free() {
            return Ok(Some(slot));
        }
    }
    let slots_end = SLOTS_START + count as usize * SLOT_SIZE;
    if slots_end + SLOT_SIZE <= free_offset(page)? as usize && count < u16::MAX {
        page.write_u16(0, count + 1)?;
        write_slot(page, count, SlotEntry::Free)?;
        return Ok(Some(count));
    }
    Ok(None)
}

/// Copy `bytes` into the data region, returning their offset. Caller
/// must have verified `free_space`.
pub fn place_bytes(page: &mut Page, bytes: &[u8]) -> DbResult<u32> {
    let offset = free_offset(page)? as usize - bytes.len();
    page.write_bytes(offset, bytes)?;
    page.write_u32(2, offset as u32)?;
    Ok(offset as u32)
}

/// True when no slot holds data anymore; the caller may reset the page.
pub fn is_unused(page: &Page) -> DbResult<bool> {
    for slot in 0..slot_count(page)? {
        if !read_slot(page, slot)?.is_free() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn pack_slot(slot: RecordSlot) -> u64 {
    (slot.page_id.0 << 16) | slot.slot as u64
}

fn unpack_slot(packed: u64) -> RecordSlot {
    RecordSlot {
        page_id: PageId(packed >> 16),
        slot: (packed & 0xFFFF) as u16,
    }
}
