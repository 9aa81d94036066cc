//! Growable raw byte buffers with a fixed protection policy.
//!
//! A [`CodeBuffer`] is a contiguous region of raw memory obtained from a
//! [`MemoryProvider`]. It tracks how many bytes are valid (`len`) against how many the current
//! region can hold (`capacity`) and grows by copy-and-release whenever an append needs more
//! room. Every reallocation reuses the [`AllocationPolicy`] chosen at construction, so a buffer
//! created executable stays executable across growth.
//!
//! # Growth
//!
//! When `n` more bytes are needed and fewer than `n` are free, the new capacity is
//! `max(capacity + n, capacity * 2)`. Growth always strictly increases capacity and costs
//! O(1) amortized per appended byte. The new region is allocated before the old one is
//! touched: a failed growth leaves the buffer exactly as it was.
//!
//! # Ownership
//!
//! The current region is either [`Ownership::Owned`] (obtained from the provider, released on
//! growth, [`CodeBuffer::dispose`] or drop) or [`Ownership::Borrowed`] (caller storage that is
//! only ever read and written). Growing or [`CodeBuffer::promote_to_owned`] moves borrowed
//! contents into an owned region and leaves the borrowed storage alone.
//!
//! # Stale Addresses
//!
//! Any address obtained from [`CodeBuffer::base_address`] or [`CodeBuffer::pop_ptr`] is only
//! valid until the next growth, adoption or disposal. The buffer performs no locking; callers
//! sharing one across threads must serialize mutation and execution themselves.
//!
//! # Examples
//!
//! ```rust
//! use codebuf::{AllocationPolicy, CodeBuffer};
//!
//! let mut buffer = CodeBuffer::new(4, AllocationPolicy::heap())?;
//! buffer.push(0x55)?;
//! buffer.push(0x57)?;
//! buffer.push(0x56)?;
//! buffer.push_range(&[0x48, 0x8B, 0xEC])?;
//!
//! assert_eq!(buffer.as_slice(), &[0x55, 0x57, 0x56, 0x48, 0x8B, 0xEC]);
//! assert!(buffer.capacity() >= 6);
//!
//! assert_eq!(buffer.pop(), Some(0xEC));
//! buffer.dispose();
//! buffer.dispose();
//! # Ok::<(), codebuf::Error>(())
//! ```

mod region;

use std::{fmt, marker::PhantomData, mem::ManuallyDrop, ptr, ptr::NonNull, slice};

pub use region::Ownership;
use region::Region;

use crate::{
    memory::{byte_size, AllocationPolicy, MemoryProvider, SystemProvider},
    Error, Result,
};

/// A growable, contiguous, byte-addressable region of raw memory.
///
/// The lifetime `'s` bounds caller storage adopted through [`CodeBuffer::with_storage`] or
/// [`CodeBuffer::adopt_slice`]; buffers that only ever own their memory can use any lifetime,
/// and [`CodeBuffer::into_owned`] detaches it.
pub struct CodeBuffer<'s, P: MemoryProvider = SystemProvider> {
    /// Where regions come from and go back to
    provider: P,
    /// Replayed on every allocation and release
    policy: AllocationPolicy,
    /// `None` once disposed
    region: Option<Region>,
    /// Number of valid bytes, never above the region capacity
    len: usize,
    _storage: PhantomData<&'s mut [u8]>,
}

// The buffer exclusively owns its region, so moving it to another thread is as safe as moving
// the provider.
unsafe impl<P: MemoryProvider + Send> Send for CodeBuffer<'_, P> {}

impl<'s> CodeBuffer<'s, SystemProvider> {
    /// Allocates a buffer of `capacity` bytes from the operating system under `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] for `capacity == 0`, [`Error::NotWritable`] if `policy`
    /// yields regions that cannot be written, and [`Error::AllocationFailed`] if the request is
    /// denied, for example when executable memory is forbidden on this host.
    pub fn new(capacity: usize, policy: AllocationPolicy) -> Result<Self> {
        Self::with_provider(SystemProvider::default(), capacity, policy)
    }
}

impl<'s, P: MemoryProvider> CodeBuffer<'s, P> {
    /// Allocates a buffer of `capacity` bytes from `provider` under `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] for `capacity == 0`, [`Error::NotWritable`] if `policy`
    /// yields regions that cannot be written, and propagates any provider failure. Nothing is
    /// allocated when the policy is rejected.
    pub fn with_provider(provider: P, capacity: usize, policy: AllocationPolicy) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::ZeroCapacity);
        }
        check_writable(&policy)?;

        let base = provider.allocate(&policy, capacity)?;
        Ok(CodeBuffer {
            provider,
            policy,
            region: Some(Region::owned(base, capacity)),
            len: 0,
            _storage: PhantomData,
        })
    }

    /// Creates an empty buffer on top of caller storage without allocating.
    ///
    /// The storage is never released by the buffer. The first growth moves the contents into
    /// a region allocated from `provider` under `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] if `storage` is empty and [`Error::NotWritable`] if
    /// regions allocated under `policy` could not be written after the first growth.
    pub fn with_storage(
        provider: P,
        storage: &'s mut [u8],
        policy: AllocationPolicy,
    ) -> Result<Self> {
        check_writable(&policy)?;

        let mut buffer = CodeBuffer {
            provider,
            policy,
            region: None,
            len: 0,
            _storage: PhantomData,
        };
        buffer.adopt_slice(storage)?;
        Ok(buffer)
    }

    /// Number of valid bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bytes have been pushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the current region in bytes, `0` once disposed.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.region.as_ref().map_or(0, |region| region.capacity)
    }

    /// Bytes that can be appended without growing.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// The policy used for every allocation of this buffer.
    #[must_use]
    pub fn policy(&self) -> &AllocationPolicy {
        &self.policy
    }

    /// The provider regions come from.
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Ownership of the current region, `None` once disposed.
    #[must_use]
    pub fn ownership(&self) -> Option<Ownership> {
        self.region.as_ref().map(|region| region.ownership)
    }

    /// Returns `true` if the current region is caller storage.
    #[must_use]
    pub fn is_borrowed(&self) -> bool {
        self.ownership() == Some(Ownership::Borrowed)
    }

    /// Returns `true` once the buffer holds no region.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.region.is_none()
    }

    /// Address of the first byte of the current region.
    ///
    /// The address stays valid until the next growth, adoption or disposal.
    #[must_use]
    pub fn base_address(&self) -> Option<NonNull<u8>> {
        self.region.as_ref().map(|region| region.base)
    }

    /// Raw pointer to the first byte, null once disposed.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.base_address()
            .map_or(ptr::null(), |base| base.as_ptr().cast_const())
    }

    /// The valid bytes `[0, len)`.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match &self.region {
            Some(region) => unsafe { slice::from_raw_parts(region.base.as_ptr(), self.len) },
            None => &[],
        }
    }

    /// The valid bytes `[0, len)`, for patching already emitted code.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &self.region {
            Some(region) => unsafe { slice::from_raw_parts_mut(region.base.as_ptr(), self.len) },
            None => &mut [],
        }
    }

    /// Appends one byte, growing if the buffer is full.
    ///
    /// # Errors
    ///
    /// Propagates growth failures; the buffer is unchanged in that case.
    pub fn push(&mut self, byte: u8) -> Result<()> {
        self.ensure_capacity(1)?;
        let base = self.writable_base();
        unsafe { base.as_ptr().add(self.len).write(byte) };
        self.len += 1;
        Ok(())
    }

    /// Appends `bytes` contiguously with a single capacity check.
    ///
    /// The result is identical to pushing every byte on its own.
    ///
    /// # Errors
    ///
    /// Propagates growth failures; the buffer is unchanged in that case.
    pub fn push_range(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        self.ensure_capacity(bytes.len())?;
        let base = self.writable_base();
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), base.as_ptr().add(self.len), bytes.len());
        }
        self.len += bytes.len();
        Ok(())
    }

    /// Makes room for at least `additional` more bytes.
    ///
    /// Does nothing if `capacity - len >= additional`; `ensure_capacity(0)` therefore never
    /// allocates. Otherwise grows to `max(capacity + additional, capacity * 2)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityOverflow`] if the new capacity does not fit into `usize` and
    /// propagates provider failures. The buffer is unchanged on error.
    pub fn ensure_capacity(&mut self, additional: usize) -> Result<()> {
        if self.remaining() >= additional {
            return Ok(());
        }

        let capacity = self.capacity();
        let required = capacity
            .checked_add(additional)
            .ok_or(Error::CapacityOverflow)?;
        let doubled = byte_size(capacity, 2)?;

        self.reallocate(required.max(doubled))
    }

    /// Moves the contents into a freshly allocated region of `new_capacity` bytes.
    ///
    /// The first `min(new_capacity, len)` bytes are copied, never more. The previous region is
    /// released only after the new one was obtained, and only if it is owned.
    ///
    /// Shrinking below `len` truncates the contents to `new_capacity` bytes without reporting
    /// an error.
    ///
    /// # Errors
    ///
    /// Propagates provider failures; the previous region and contents are kept intact.
    pub fn reallocate(&mut self, new_capacity: usize) -> Result<()> {
        let base = self.provider.allocate(&self.policy, new_capacity)?;
        let keep = self.len.min(new_capacity);

        let previous = self.capacity();
        if let Some(region) = &self.region {
            unsafe { ptr::copy_nonoverlapping(region.base.as_ptr(), base.as_ptr(), keep) };
        }

        self.release_region();
        self.region = Some(Region::owned(base, new_capacity));
        self.len = keep;

        tracing::debug!(
            from = previous,
            to = new_capacity,
            len = keep,
            "reallocated code buffer"
        );
        Ok(())
    }

    /// Removes and returns the last byte, `None` if the buffer is empty.
    pub fn pop(&mut self) -> Option<u8> {
        self.pop_ptr().map(|byte| unsafe { byte.as_ptr().read() })
    }

    /// Removes the last byte and returns its address, `None` if the buffer is empty.
    ///
    /// The byte stays in place until it is overwritten by a later push; the address follows
    /// the usual stale address rules.
    pub fn pop_ptr(&mut self) -> Option<NonNull<u8>> {
        if self.len == 0 {
            return None;
        }

        let base = self.base_address()?;
        self.len -= 1;
        Some(unsafe { base.add(self.len) })
    }

    /// Forgets all contents while keeping the region.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Installs caller storage as the current region, without copying.
    ///
    /// The previous region is released if it was owned; the buffer starts out empty on the
    /// adopted storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] if `storage` is empty.
    pub fn adopt_slice(&mut self, storage: &'s mut [u8]) -> Result<()> {
        let capacity = storage.len();
        let base = NonNull::new(storage.as_mut_ptr()).ok_or(Error::ZeroCapacity)?;

        unsafe { self.adopt_external_storage(base, capacity, Ownership::Borrowed) }
    }

    /// Installs an arbitrary region as the current one, without copying.
    ///
    /// The previous region is released if it was owned, and the buffer starts out empty on the
    /// adopted region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] if `capacity` is zero; nothing changes in that case.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `capacity` bytes for as long as the buffer
    /// uses it. With [`Ownership::Borrowed`] the region must outlive every use by this buffer
    /// (until growth, promotion, another adoption, or disposal). With [`Ownership::Owned`] the
    /// region must have been allocated by this buffer's provider under its policy with exactly
    /// `capacity` bytes, and ownership passes to the buffer.
    pub unsafe fn adopt_external_storage(
        &mut self,
        base: NonNull<u8>,
        capacity: usize,
        ownership: Ownership,
    ) -> Result<()> {
        if capacity == 0 {
            return Err(Error::ZeroCapacity);
        }

        self.release_region();
        self.region = Some(Region {
            base,
            capacity,
            ownership,
        });
        self.len = 0;

        tracing::debug!(capacity, ?ownership, address = ?base, "adopted external storage");
        Ok(())
    }

    /// Copies borrowed contents into an owned region of the same capacity.
    ///
    /// Owned and disposed buffers are left alone. The borrowed storage is never released.
    ///
    /// # Errors
    ///
    /// Propagates provider failures; the buffer keeps the borrowed region in that case.
    pub fn promote_to_owned(&mut self) -> Result<()> {
        let Some(region) = &self.region else {
            return Ok(());
        };
        if region.is_owned() {
            return Ok(());
        }

        let capacity = region.capacity;
        let base = self.provider.allocate(&self.policy, capacity)?;
        unsafe { ptr::copy_nonoverlapping(region.base.as_ptr(), base.as_ptr(), self.len) };

        // Borrowed storage is superseded, not released
        self.region = Some(Region::owned(base, capacity));

        tracing::debug!(capacity, len = self.len, "promoted borrowed storage");
        Ok(())
    }

    /// Promotes borrowed storage and detaches the buffer from its lifetime.
    ///
    /// # Errors
    ///
    /// Propagates provider failures from the promotion.
    pub fn into_owned(mut self) -> Result<CodeBuffer<'static, P>> {
        self.promote_to_owned()?;

        let this = ManuallyDrop::new(self);
        // The region is owned or absent, so nothing borrowed from 's survives the move
        unsafe {
            Ok(CodeBuffer {
                provider: ptr::read(&this.provider),
                policy: this.policy,
                region: ptr::read(&this.region),
                len: this.len,
                _storage: PhantomData,
            })
        }
    }

    /// Releases the current region if it is owned and forgets it.
    ///
    /// Calling this more than once is harmless, and dropping a disposed buffer releases
    /// nothing. A disposed buffer reports a capacity of zero; pushing to it allocates a new
    /// region under the same policy.
    pub fn dispose(&mut self) {
        if self.region.is_some() {
            self.release_region();
            self.region = None;
            self.len = 0;
        }
    }

    fn release_region(&mut self) {
        if let Some(region) = self.region.take() {
            if region.is_owned() {
                unsafe {
                    self.provider
                        .release(&self.policy, region.base, region.capacity)
                };
            }
        }
    }

    fn writable_base(&self) -> NonNull<u8> {
        match &self.region {
            Some(region) => region.base,
            // ensure_capacity with a non-zero request always installs a region
            None => unreachable!("code buffer has no region after growth"),
        }
    }
}

impl<P: MemoryProvider> Drop for CodeBuffer<'_, P> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<P: MemoryProvider> AsRef<[u8]> for CodeBuffer<'_, P> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl<P: MemoryProvider> fmt::Debug for CodeBuffer<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("policy", &self.policy)
            .field("ownership", &self.ownership())
            .finish()
    }
}

/// Rejects policies whose regions would fault on the first write.
///
/// The policy of a buffer never changes, so checking it once at construction covers every
/// later reallocation.
fn check_writable(policy: &AllocationPolicy) -> Result<()> {
    if policy.is_writable() {
        return Ok(());
    }

    tracing::warn!(
        strategy = %policy.strategy,
        protection = ?policy.effective_protection(),
        allocation = ?policy.allocation,
        "rejected code buffer policy without write access"
    );
    Err(Error::NotWritable {
        protection: policy.effective_protection(),
        allocation: policy.allocation,
    })
}
