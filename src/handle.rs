//! Generational handles for kernel objects.
//!
//! A handle names a table slot plus the generation the slot had when the
//! object was created. Deleting or reaping an object bumps the generation,
//! so an old handle can never reach the slot's next occupant.

use core::fmt;

macro_rules! kernel_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            pub(crate) index: u16,
            pub(crate) generation: u16,
        }

        impl $name {
            pub(crate) const fn new(index: usize, generation: u16) -> Self {
                Self {
                    index: index as u16,
                    generation,
                }
            }

            /// Table slot of this object.
            #[inline]
            pub const fn index(&self) -> usize {
                self.index as usize
            }

            /// Generation of the slot when the object was created.
            #[inline]
            pub const fn generation(&self) -> u16 {
                self.generation
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}.{}"), self.index, self.generation)
            }
        }
    };
}

kernel_handle!(
    /// Handle to a thread control block.
    ThreadId,
    "thread#"
);

kernel_handle!(
    /// Handle to a mutex.
    MutexId,
    "mutex#"
);

kernel_handle!(
    /// Handle to a counting semaphore.
    SemaphoreId,
    "sem#"
);
