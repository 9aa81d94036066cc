//! Allocation strategies and the policy a code buffer carries for its whole lifetime.

use strum::{Display, EnumCount, EnumIter};

use crate::memory::{AllocationFlags, FreeFlags, Protection};

/// The OS-level mechanism used to obtain a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount)]
#[strum(serialize_all = "lowercase")]
pub enum AllocationStrategy {
    /// Page-granular virtual memory with explicit allocation and protection flags.
    ///
    /// This is the only strategy that can produce executable memory.
    Virtual,
    /// Plain heap memory. Always read-write and never executable; allocation, protection and
    /// free flags are ignored.
    Heap,
}

/// Everything the memory provider needs to allocate and later release a region.
///
/// A [`crate::CodeBuffer`] fixes its policy at construction and replays it on every
/// reallocation, so the protection of a buffer never changes behind the caller's back.
///
/// # Examples
///
/// ```rust
/// use codebuf::{AllocationPolicy, AllocationStrategy, Protection};
///
/// let policy = AllocationPolicy::executable();
/// assert_eq!(policy.strategy, AllocationStrategy::Virtual);
/// assert!(policy.protection.is_executable());
///
/// let sealed = policy.with_protection(Protection::READ_EXECUTE);
/// assert!(!sealed.protection.is_writable());
/// assert!(!sealed.is_writable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationPolicy {
    /// Mechanism used to obtain regions
    pub strategy: AllocationStrategy,
    /// Reserve/commit flags for the virtual strategy
    pub allocation: AllocationFlags,
    /// Access rights for the virtual strategy
    pub protection: Protection,
    /// Release flags for the virtual strategy
    pub free: FreeFlags,
}

impl AllocationPolicy {
    /// Read-write heap memory, suitable for ordinary data buffers.
    #[must_use]
    pub const fn heap() -> Self {
        AllocationPolicy {
            strategy: AllocationStrategy::Heap,
            allocation: AllocationFlags::COMMIT,
            protection: Protection::READ_WRITE,
            free: FreeFlags::RELEASE,
        }
    }

    /// Committed virtual memory that is readable, writable and executable.
    #[must_use]
    pub const fn executable() -> Self {
        AllocationPolicy {
            strategy: AllocationStrategy::Virtual,
            allocation: AllocationFlags::COMMIT.union(AllocationFlags::RESERVE),
            protection: Protection::READ_WRITE_EXECUTE,
            free: FreeFlags::RELEASE,
        }
    }

    /// Committed virtual memory that is readable and writable.
    #[must_use]
    pub const fn virtual_read_write() -> Self {
        AllocationPolicy {
            strategy: AllocationStrategy::Virtual,
            allocation: AllocationFlags::COMMIT.union(AllocationFlags::RESERVE),
            protection: Protection::READ_WRITE,
            free: FreeFlags::RELEASE,
        }
    }

    /// Returns a copy of this policy using `strategy`.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Returns a copy of this policy using `allocation`.
    #[must_use]
    pub const fn with_allocation(mut self, allocation: AllocationFlags) -> Self {
        self.allocation = allocation;
        self
    }

    /// Returns a copy of this policy using `protection`.
    #[must_use]
    pub const fn with_protection(mut self, protection: Protection) -> Self {
        self.protection = protection;
        self
    }

    /// Returns a copy of this policy using `free`.
    #[must_use]
    pub const fn with_free(mut self, free: FreeFlags) -> Self {
        self.free = free;
        self
    }

    /// The protection regions obtained under this policy actually carry.
    ///
    /// The heap strategy ignores the requested protection and always yields read-write memory.
    #[must_use]
    pub fn effective_protection(&self) -> Protection {
        match self.strategy {
            AllocationStrategy::Virtual => self.protection,
            AllocationStrategy::Heap => Protection::READ_WRITE,
        }
    }

    /// Returns `true` if regions obtained under this policy can be executed.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.effective_protection().is_executable()
    }

    /// Returns `true` if regions obtained under this policy can be written right away.
    ///
    /// Virtual regions must be committed, grant write access and carry no guard page. Heap
    /// regions are always writable.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        let protection = self.effective_protection();
        match self.strategy {
            AllocationStrategy::Virtual => {
                protection.is_writable()
                    && !protection.contains(Protection::GUARD)
                    && self.allocation.contains(AllocationFlags::COMMIT)
            }
            AllocationStrategy::Heap => true,
        }
    }
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        AllocationPolicy::heap()
    }
}
