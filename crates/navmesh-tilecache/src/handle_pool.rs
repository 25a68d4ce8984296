//! Generation-checked slot pools backing tile and obstacle handles
//!
//! A handle packs a slot index in its low bits and the slot's salt in the
//! bits above it. Releasing a slot bumps the salt, so every handle issued
//! for the previous occupant stops resolving once the slot is reused.

use recast_common::{ilog2, next_pow2, Error, Result};

/// Number of index bits in an obstacle handle
pub const OBSTACLE_INDEX_BITS: u32 = 16;
/// Number of salt bits in an obstacle handle
pub const OBSTACLE_SALT_BITS: u32 = 16;
/// Minimum number of salt bits a tile pool must keep
const MIN_TILE_SALT_BITS: u32 = 10;

/// Reference to a compressed tile stored in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TileRef(u64);

impl TileRef {
    /// The null tile reference
    pub const NULL: TileRef = TileRef(0);

    /// Wraps a raw handle value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw handle value
    pub fn id(&self) -> u64 {
        self.0
    }

    /// Returns true if this is not the null reference
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Reference to an obstacle stored in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObstacleRef(u32);

impl ObstacleRef {
    /// The null obstacle reference
    pub const NULL: ObstacleRef = ObstacleRef(0);

    /// Wraps a raw handle value
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw handle value
    pub fn id(&self) -> u32 {
        self.0
    }

    /// Returns true if this is not the null reference
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Computes the (index bits, salt bits) split of a tile handle
pub fn tile_handle_bits(max_tiles: u32) -> Result<(u32, u32)> {
    let tile_bits = ilog2(next_pow2(max_tiles));
    let salt_bits = (32 - tile_bits).min(31);
    if salt_bits < MIN_TILE_SALT_BITS {
        return Err(Error::InvalidParam(format!(
            "max_tiles {max_tiles} leaves only {salt_bits} salt bits"
        )));
    }
    Ok((tile_bits, salt_bits))
}

#[derive(Debug)]
struct Slot<T> {
    salt: u32,
    value: Option<T>,
    next: Option<usize>,
}

/// Fixed-capacity pool of slots addressed by salted handles
#[derive(Debug)]
pub struct SlotPool<T> {
    slots: Vec<Slot<T>>,
    next_free: Option<usize>,
    index_bits: u32,
    salt_bits: u32,
    len: usize,
    name: &'static str,
}

impl<T> SlotPool<T> {
    /// Creates a pool with `capacity` slots and the given handle bit split
    pub fn new(name: &'static str, capacity: usize, index_bits: u32, salt_bits: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidParam(format!("{name} pool needs at least one slot")));
        }
        if salt_bits == 0 || salt_bits > 32 || index_bits + salt_bits > 64 {
            return Err(Error::InvalidParam(format!(
                "{name} pool cannot split handles into {index_bits} index and {salt_bits} salt bits"
            )));
        }
        if index_bits < 64 && capacity as u64 > 1u64 << index_bits {
            return Err(Error::InvalidParam(format!(
                "{name} pool capacity {capacity} does not fit in {index_bits} index bits"
            )));
        }

        // Slot 0 heads the free list so the first allocation gets index 0
        let slots = (0..capacity)
            .map(|i| Slot {
                salt: 1,
                value: None,
                next: if i + 1 < capacity { Some(i + 1) } else { None },
            })
            .collect();

        Ok(Self {
            slots,
            next_free: Some(0),
            index_bits,
            salt_bits,
            len: 0,
            name,
        })
    }

    /// Creates the tile pool: the index bits cover `next_pow2(max_tiles)` and
    /// the remaining bits of a 32-bit id (at most 31) hold the salt.
    pub fn for_tiles(max_tiles: u32) -> Result<Self> {
        let (tile_bits, salt_bits) = tile_handle_bits(max_tiles)?;
        Self::new("tile", max_tiles as usize, tile_bits, salt_bits)
    }

    /// Creates the obstacle pool (16 index bits, 16 salt bits)
    pub fn for_obstacles(max_obstacles: u32) -> Result<Self> {
        Self::new(
            "obstacle",
            max_obstacles as usize,
            OBSTACLE_INDEX_BITS,
            OBSTACLE_SALT_BITS,
        )
    }

    fn salt_mask(&self) -> u64 {
        (1u64 << self.salt_bits) - 1
    }

    fn index_mask(&self) -> u64 {
        if self.index_bits == 0 {
            0
        } else {
            (1u64 << self.index_bits) - 1
        }
    }

    fn encode(&self, salt: u32, index: usize) -> u64 {
        ((salt as u64) << self.index_bits) | index as u64
    }

    /// Splits a handle into (salt, index)
    pub fn decode(&self, handle: u64) -> (u32, usize) {
        let salt = ((handle >> self.index_bits) & self.salt_mask()) as u32;
        let index = (handle & self.index_mask()) as usize;
        (salt, index)
    }

    fn resolve(&self, handle: u64) -> Option<usize> {
        if handle == 0 {
            return None;
        }
        let (salt, index) = self.decode(handle);
        let slot = self.slots.get(index)?;
        // Reject handles carrying bits above the salt field
        if slot.value.is_none() || slot.salt != salt || self.encode(salt, index) != handle {
            return None;
        }
        Some(index)
    }

    /// Places `value` in a free slot and returns its handle
    pub fn allocate(&mut self, value: T) -> Result<u64> {
        let index = self.next_free.ok_or(Error::OutOfSlots(self.name))?;
        let slot = &mut self.slots[index];
        self.next_free = slot.next.take();
        slot.value = Some(value);
        self.len += 1;
        let salt = slot.salt;
        Ok(self.encode(salt, index))
    }

    /// Empties the slot behind `handle`, bumps its salt and returns the value
    pub fn release(&mut self, handle: u64) -> Result<T> {
        let index = self.resolve(handle).ok_or(Error::InvalidHandle(handle))?;
        let mask = self.salt_mask() as u32;
        let slot = &mut self.slots[index];
        let value = slot.value.take().ok_or(Error::InvalidHandle(handle))?;

        slot.salt = slot.salt.wrapping_add(1) & mask;
        if slot.salt == 0 {
            slot.salt = 1;
        }
        slot.next = self.next_free;
        self.next_free = Some(index);
        self.len -= 1;

        Ok(value)
    }

    /// Returns the value behind `handle` if the handle is current
    pub fn get(&self, handle: u64) -> Option<&T> {
        let index = self.resolve(handle)?;
        self.slots[index].value.as_ref()
    }

    /// Mutable access to the value behind `handle` if the handle is current
    pub fn get_mut(&mut self, handle: u64) -> Option<&mut T> {
        let index = self.resolve(handle)?;
        self.slots[index].value.as_mut()
    }

    /// Returns true if `handle` refers to an occupied slot with a matching salt
    pub fn contains(&self, handle: u64) -> bool {
        self.resolve(handle).is_some()
    }

    /// Iterates occupied slots in slot order, yielding their current handles
    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(move |(i, slot)| {
            slot.value
                .as_ref()
                .map(|value| (self.encode(slot.salt, i), value))
        })
    }

    /// Mutable iteration over occupied slots in slot order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u64, &mut T)> + '_ {
        let index_bits = self.index_bits;
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(move |(i, slot)| {
                let handle = ((slot.salt as u64) << index_bits) | i as u64;
                slot.value.as_mut().map(|value| (handle, value))
            })
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no slot is occupied
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Bits used for the slot index
    pub fn index_bits(&self) -> u32 {
        self.index_bits
    }

    /// Bits used for the salt
    pub fn salt_bits(&self) -> u32 {
        self.salt_bits
    }
}
