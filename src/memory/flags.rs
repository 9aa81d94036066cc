//! Allocation, protection and release flags for the memory provider.
//!
//! [`AllocationFlags`] and [`FreeFlags`] mirror the Win32 `MEM_*` constants bit for bit, so they
//! are handed to `VirtualAllocEx` / `VirtualFreeEx` unchanged on Windows. [`Protection`] is
//! composed from independent read/write/execute bits instead and is translated per platform:
//! to a `PAGE_*` value by [`Protection::to_page_flags`] and to `PROT_*` bits on Unix. Flags
//! without a Unix counterpart are ignored by the virtual memory backend.
//!
//! # Key Types
//! - [`AllocationFlags`]: how a virtual region is reserved and committed
//! - [`Protection`]: access rights of a region, composed from read/write/execute bits
//! - [`FreeFlags`]: how a virtual region is handed back

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Allocation type flags for virtual memory requests
    pub struct AllocationFlags: u32 {
        /// Back the range with physical storage
        const COMMIT = 0x0000_1000;
        /// Reserve address space without backing storage
        const RESERVE = 0x0000_2000;
        /// Contents of the range are no longer of interest
        const RESET = 0x0008_0000;
        /// Undo a previous `RESET`
        const RESET_UNDO = 0x0100_0000;
        /// Use large pages
        const LARGE_PAGES = 0x2000_0000;
        /// Reserve an address range for AWE pages
        const PHYSICAL = 0x0040_0000;
        /// Allocate at the highest possible address
        const TOP_DOWN = 0x0010_0000;
        /// Track pages written to in the region
        const WRITE_WATCH = 0x0020_0000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Memory protection of a region
    ///
    /// The access bits (`READ`, `WRITE`, `EXECUTE`) combine freely; the remaining bits are
    /// modifiers that only the Windows backend honours.
    pub struct Protection: u32 {
        /// Pages may be read
        const READ = 0x0001;
        /// Pages may be written
        const WRITE = 0x0002;
        /// Pages may be executed
        const EXECUTE = 0x0004;
        /// Writes create a private copy (Windows only)
        const WRITE_COPY = 0x0008;
        /// First access raises a guard page exception (Windows only)
        const GUARD = 0x0100;
        /// Pages are not cached (Windows only)
        const NO_CACHE = 0x0200;
        /// Pages are write-combined (Windows only)
        const WRITE_COMBINE = 0x0400;

        /// Ordinary data pages
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        /// Sealed code pages
        const READ_EXECUTE = Self::READ.bits() | Self::EXECUTE.bits();
        /// Code pages that can still be patched
        const READ_WRITE_EXECUTE = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Release type flags for virtual memory
    pub struct FreeFlags: u32 {
        /// Drop the backing storage but keep the reservation
        const DECOMMIT = 0x0000_4000;
        /// Return the whole reservation
        const RELEASE = 0x0000_8000;
        /// Coalesce adjacent placeholders (Windows only)
        const COALESCE_PLACEHOLDERS = 0x0000_0001;
        /// Keep a placeholder after release (Windows only)
        const PRESERVE_PLACEHOLDER = 0x0000_0002;
    }
}

impl Protection {
    /// Returns `true` if the protection grants execute access.
    #[must_use]
    pub fn is_executable(self) -> bool {
        self.contains(Protection::EXECUTE)
    }

    /// Returns `true` if the protection grants write access.
    #[must_use]
    pub fn is_writable(self) -> bool {
        self.intersects(Protection::WRITE | Protection::WRITE_COPY)
    }

    /// Translates the access bits into a Win32 `PAGE_*` value, including modifiers.
    ///
    /// Write-only access does not exist on Windows and is widened to read-write.
    #[must_use]
    pub fn to_page_flags(self) -> u32 {
        let execute = self.contains(Protection::EXECUTE);
        let base = if self.contains(Protection::WRITE_COPY) {
            if execute {
                0x80 // PAGE_EXECUTE_WRITECOPY
            } else {
                0x08 // PAGE_WRITECOPY
            }
        } else {
            match (self.contains(Protection::WRITE), self.contains(Protection::READ), execute) {
                (true, _, true) => 0x40,     // PAGE_EXECUTE_READWRITE
                (true, _, false) => 0x04,    // PAGE_READWRITE
                (false, true, true) => 0x20, // PAGE_EXECUTE_READ
                (false, false, true) => 0x10, // PAGE_EXECUTE
                (false, true, false) => 0x02, // PAGE_READONLY
                (false, false, false) => 0x01, // PAGE_NOACCESS
            }
        };

        let mut modifiers = 0;
        if self.contains(Protection::GUARD) {
            modifiers |= 0x100;
        }
        if self.contains(Protection::NO_CACHE) {
            modifiers |= 0x200;
        }
        if self.contains(Protection::WRITE_COMBINE) {
            modifiers |= 0x400;
        }

        base | modifiers
    }

    /// Translates the access bits into `mmap` `PROT_*` bits.
    #[cfg(unix)]
    #[must_use]
    pub fn to_prot(self) -> libc::c_int {
        let mut prot = libc::PROT_NONE;
        if self.contains(Protection::READ) {
            prot |= libc::PROT_READ;
        }
        if self.is_writable() {
            prot |= libc::PROT_WRITE;
        }
        if self.contains(Protection::EXECUTE) {
            prot |= libc::PROT_EXEC;
        }
        prot
    }
}

impl Default for AllocationFlags {
    fn default() -> Self {
        AllocationFlags::COMMIT
    }
}

impl Default for Protection {
    fn default() -> Self {
        Protection::READ_WRITE
    }
}

impl Default for FreeFlags {
    fn default() -> Self {
        FreeFlags::RELEASE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_flags_cover_access_combinations() {
        assert_eq!(Protection::empty().to_page_flags(), 0x01);
        assert_eq!(Protection::READ.to_page_flags(), 0x02);
        assert_eq!(Protection::READ_WRITE.to_page_flags(), 0x04);
        assert_eq!(Protection::WRITE.to_page_flags(), 0x04);
        assert_eq!(Protection::EXECUTE.to_page_flags(), 0x10);
        assert_eq!(Protection::READ_EXECUTE.to_page_flags(), 0x20);
        assert_eq!(Protection::READ_WRITE_EXECUTE.to_page_flags(), 0x40);
        assert_eq!(
            (Protection::READ | Protection::WRITE_COPY).to_page_flags(),
            0x08
        );
        assert_eq!(
            (Protection::READ_EXECUTE | Protection::WRITE_COPY).to_page_flags(),
            0x80
        );
    }

    #[test]
    fn page_flags_keep_modifiers() {
        let protection = Protection::READ_WRITE | Protection::GUARD | Protection::NO_CACHE;
        assert_eq!(protection.to_page_flags(), 0x04 | 0x100 | 0x200);

        let protection = Protection::READ_WRITE | Protection::WRITE_COMBINE;
        assert_eq!(protection.to_page_flags(), 0x04 | 0x400);
    }

    #[test]
    fn access_queries() {
        assert!(Protection::READ_WRITE_EXECUTE.is_executable());
        assert!(Protection::READ_WRITE_EXECUTE.is_writable());
        assert!(!Protection::READ_EXECUTE.is_writable());
        assert!(!Protection::READ_WRITE.is_executable());
        assert!((Protection::READ | Protection::WRITE_COPY).is_writable());
    }

    #[test]
    fn win32_values() {
        assert_eq!(AllocationFlags::COMMIT.bits(), 0x1000);
        assert_eq!(AllocationFlags::RESERVE.bits(), 0x2000);
        assert_eq!(FreeFlags::RELEASE.bits(), 0x8000);
        assert_eq!(FreeFlags::DECOMMIT.bits(), 0x4000);
    }

    #[cfg(unix)]
    #[test]
    fn prot_bits() {
        assert_eq!(Protection::empty().to_prot(), libc::PROT_NONE);
        assert_eq!(
            Protection::READ_WRITE.to_prot(),
            libc::PROT_READ | libc::PROT_WRITE
        );
        assert_eq!(
            Protection::READ_WRITE_EXECUTE.to_prot(),
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC
        );
        assert_eq!(
            (Protection::READ_EXECUTE | Protection::GUARD).to_prot(),
            libc::PROT_READ | libc::PROT_EXEC
        );
    }

    #[test]
    fn defaults() {
        assert_eq!(AllocationFlags::default(), AllocationFlags::COMMIT);
        assert_eq!(Protection::default(), Protection::READ_WRITE);
        assert_eq!(FreeFlags::default(), FreeFlags::RELEASE);
    }
}
