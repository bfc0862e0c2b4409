//! # Thread Stacks
//!
//! The kernel never touches stack memory; it only needs a stable region
//! for each thread's lifetime. [`Stack`] describes such a region and
//! [`StackPool`] carves fixed-size blocks out of a caller-provided static
//! arena for `thread_create`.

use core::ptr::NonNull;

use crate::config::{MIN_STACK_SIZE, STACK_ALIGN};
use crate::error::{KernelError, KernelResult};

/// A stack region owned by one thread for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stack {
    base: NonNull<u8>,
    size: usize,
}

// Safety: `Stack` is a descriptor of memory with `'static` lifetime that is
// handed to exactly one thread at a time; the kernel never dereferences it.
unsafe impl Send for Stack {}

impl Stack {
    /// Wrap caller-owned static memory, trimmed to `STACK_ALIGN`.
    pub fn from_static(memory: &'static mut [u8]) -> KernelResult<Self> {
        let start = memory.as_mut_ptr() as usize;
        let offset = start.next_multiple_of(STACK_ALIGN) - start;
        let usable = memory.len().saturating_sub(offset) & !(STACK_ALIGN - 1);
        if usable < MIN_STACK_SIZE {
            return Err(KernelError::InvalidArgument);
        }
        let base = NonNull::new(memory[offset..].as_mut_ptr()).ok_or(KernelError::InvalidArgument)?;
        Ok(Self { base, size: usable })
    }

    /// Lowest address of the region.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// One past the highest address; where a full-descending stack starts.
    #[inline]
    pub fn top(&self) -> usize {
        self.base.as_ptr() as usize + self.size
    }
}

/// Fixed-block stack allocator over a static arena. Up to 32 blocks,
/// tracked in a bitmap.
#[derive(Debug)]
pub struct StackPool {
    base: NonNull<u8>,
    block_size: usize,
    blocks: usize,
    used: u32,
}

// Safety: the pool exclusively owns its arena; see `Stack`.
unsafe impl Send for StackPool {}

impl StackPool {
    /// Split `memory` into blocks of `block_size` bytes (rounded up to
    /// `STACK_ALIGN`).
    pub fn new(memory: &'static mut [u8], block_size: usize) -> KernelResult<Self> {
        if block_size < MIN_STACK_SIZE {
            return Err(KernelError::InvalidArgument);
        }
        let block_size = block_size.next_multiple_of(STACK_ALIGN);
        let start = memory.as_mut_ptr() as usize;
        let offset = start.next_multiple_of(STACK_ALIGN) - start;
        let blocks = (memory.len().saturating_sub(offset) / block_size).min(32);
        if blocks == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let base = NonNull::new(memory[offset..].as_mut_ptr()).ok_or(KernelError::InvalidArgument)?;
        Ok(Self {
            base,
            block_size,
            blocks,
            used: 0,
        })
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of free blocks.
    pub fn available(&self) -> usize {
        self.blocks - self.used.count_ones() as usize
    }

    /// Take one block able to hold `size` bytes.
    pub fn allocate(&mut self, size: usize) -> KernelResult<Stack> {
        if size == 0 || size > self.block_size {
            return Err(KernelError::InvalidArgument);
        }
        let free = !self.used;
        let slot = free.trailing_zeros() as usize;
        if slot >= self.blocks {
            return Err(KernelError::Exhausted);
        }
        self.used |= 1 << slot;
        // Safety: `slot < blocks`, so the block lies inside the arena.
        let base = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(slot * self.block_size)) };
        Ok(Stack {
            base,
            size: self.block_size,
        })
    }

    /// Return a block obtained from [`allocate`](Self::allocate). Regions
    /// that do not belong to this pool are ignored.
    pub fn free(&mut self, stack: Stack) {
        let start = self.base.as_ptr() as usize;
        let addr = stack.base.as_ptr() as usize;
        if addr < start || (addr - start) % self.block_size != 0 {
            return;
        }
        let slot = (addr - start) / self.block_size;
        if slot < self.blocks {
            self.used &= !(1 << slot);
        }
    }
}

/// A leaked, aligned region for host tests.
#[cfg(test)]
pub(crate) fn test_stack() -> Stack {
    Stack::from_static(std::vec![0u8; 1024].leak()).unwrap()
}
