//! Bounded register pool used by the generator

use super::instruction::{Operand, FIRST_GENERAL_REGISTER, REGISTER_COUNT};

/// A general-purpose register id (4..=31)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register(pub u8);

impl From<Register> for Operand {
    fn from(register: Register) -> Self {
        Operand::Register(register.0)
    }
}

/// Bitmask over the 28 general-purpose registers. Allocation returns the
/// lowest free id; running out is an error, never a silent reuse.
#[derive(Debug, Clone, Default)]
pub struct RegisterPool {
    used: u32,
}

/// Returned when every general-purpose register is live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolExhausted;

impl RegisterPool {
    pub const CAPACITY: usize = REGISTER_COUNT - FIRST_GENERAL_REGISTER as usize;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> Result<Register, PoolExhausted> {
        let free = !self.used & Self::mask();
        if free == 0 {
            return Err(PoolExhausted);
        }
        let bit = free.trailing_zeros();
        self.used |= 1 << bit;
        Ok(Register(bit as u8))
    }

    pub fn release(&mut self, register: Register) {
        debug_assert!(register.0 >= FIRST_GENERAL_REGISTER, "reserved register released");
        self.used &= !(1u32 << register.0);
    }

    pub fn in_use(&self) -> usize {
        self.used.count_ones() as usize
    }

    pub fn is_live(&self, register: Register) -> bool {
        self.used & (1u32 << register.0) != 0
    }

    fn mask() -> u32 {
        u32::MAX << FIRST_GENERAL_REGISTER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_lowest_free() {
        let mut pool = RegisterPool::new();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_eq!((a.0, b.0), (4, 5));

        pool.release(a);
        assert_eq!(pool.allocate().unwrap().0, 4);
        assert!(pool.is_live(b));
    }

    #[test]
    fn test_exhaustion() {
        let mut pool = RegisterPool::new();
        let all: Vec<Register> = (0..RegisterPool::CAPACITY)
            .map(|_| pool.allocate().unwrap())
            .collect();
        assert_eq!(all.last().unwrap().0, 31);
        assert_eq!(pool.allocate(), Err(PoolExhausted));

        pool.release(all[10]);
        assert_eq!(pool.allocate().unwrap(), all[10]);
        assert_eq!(pool.in_use(), 28);
    }
}
