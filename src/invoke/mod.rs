//! Typed invocation of generated machine code.
//!
//! Once a [`crate::CodeBuffer`] holds a complete function, its base address can be
//! reinterpreted as a native function pointer with a caller-declared signature and called
//! under the host C calling convention. The signature is expressed as an ordinary Rust
//! function pointer type such as `extern "C" fn(i32, i32) -> i32`; [`NativeSignature`] is
//! implemented for every such type with up to ten arguments whose argument and return types
//! implement [`NativeType`].
//!
//! # Safety
//!
//! Nothing here inspects the bytes being called. The caller guarantees that:
//!
//! - the region holds a complete function for the host architecture that follows the host
//!   calling convention for exactly the declared signature,
//! - the region was allocated with an executable [`crate::AllocationPolicy`],
//! - on aarch64, the instruction cache was flushed for the written range,
//! - the buffer is neither grown, adopted over nor disposed while the function runs or while
//!   a pointer obtained from [`CodeBuffer::entry_point`] is still used.
//!
//! Violating any of these is undefined behaviour; on most hosts it ends the process.
//!
//! # Architecture
//!
//! - [`NativeSignature`] - the function pointer types that can be materialized from an address
//! - [`abi`] - where each argument of a signature lives at entry, per calling convention
//! - [`JitFunction`] - a buffer that owns one complete function
//!
//! # Examples
//!
//! ```rust,no_run
//! use codebuf::{AllocationPolicy, CodeBuffer};
//!
//! let mut buffer = CodeBuffer::new(16, AllocationPolicy::executable())?;
//! // mov eax, edi; add eax, esi; ret
//! buffer.push_range(&[0x89, 0xF8, 0x01, 0xF0, 0xC3])?;
//!
//! let sum = unsafe { buffer.invoke::<extern "C" fn(i32, i32) -> i32>((3, 5)) };
//! assert_eq!(sum, 8);
//! # Ok::<(), codebuf::Error>(())
//! ```

pub mod abi;
mod function;

use std::ptr::NonNull;

pub use abi::{
    ArgLocation, CallLayout, CallingConvention, NativeType, RegisterBank, ReturnLocation,
    SignatureShape, Slot, ValueClass,
};
pub use function::JitFunction;

use crate::{buffer::CodeBuffer, memory::MemoryProvider};

/// A native function pointer type that can be called with a tuple of arguments.
///
/// # Safety
///
/// Implementors must be pointer-sized function pointers whose `call` forwards the tuple
/// elements as arguments in order.
pub unsafe trait NativeSignature: Copy {
    /// Argument tuple, `()` for no arguments
    type Args;
    /// Return type
    type Output;

    /// Reinterprets `address` as a function of this signature.
    ///
    /// # Safety
    ///
    /// `address` must point to executable code implementing this signature.
    unsafe fn from_address(address: NonNull<u8>) -> Self;

    /// Calls the function with `args`.
    ///
    /// # Safety
    ///
    /// The function must still be mapped and executable.
    unsafe fn call(self, args: Self::Args) -> Self::Output;

    /// Argument and return classes for the calling convention tables.
    fn describe() -> SignatureShape;
}

native_signatures!(A0, A1, A2, A3, A4, A5, A6, A7, A8, A9);

/// Reinterprets `address` as a function pointer of type `F`.
///
/// # Safety
///
/// `address` must point to executable code implementing `F` under the host calling
/// convention, for as long as the returned pointer is used.
#[must_use]
pub unsafe fn entry_point<F: NativeSignature>(address: NonNull<u8>) -> F {
    unsafe { F::from_address(address) }
}

/// Calls the code at `address` as a function of type `F`.
///
/// # Safety
///
/// See [`entry_point`].
pub unsafe fn invoke<F: NativeSignature>(address: NonNull<u8>, args: F::Args) -> F::Output {
    unsafe { F::from_address(address).call(args) }
}

impl<P: MemoryProvider> CodeBuffer<'_, P> {
    /// The base address as a function pointer of type `F`, or `None` once disposed.
    ///
    /// # Safety
    ///
    /// The buffer must hold a complete function implementing `F`, in executable memory. The
    /// pointer dangles after the next growth, adoption or disposal. On aarch64 the caller must
    /// flush the instruction cache for the written range before the pointer is called.
    #[must_use]
    pub unsafe fn entry_point<F: NativeSignature>(&self) -> Option<F> {
        self.base_address().map(|base| unsafe { F::from_address(base) })
    }

    /// Calls the buffer contents as a function of type `F`.
    ///
    /// # Safety
    ///
    /// The buffer must hold a complete function implementing `F`, in executable memory. On
    /// aarch64 the caller must flush the instruction cache for the written range first, or the
    /// processor may execute stale instructions.
    ///
    /// # Panics
    ///
    /// Panics if the buffer was disposed.
    pub unsafe fn invoke<F: NativeSignature>(&self, args: F::Args) -> F::Output {
        let Some(base) = self.base_address() else {
            panic!("invoked a disposed code buffer");
        };
        unsafe { invoke::<F>(base, args) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::AllocationPolicy,
        test::{add_i32_code, answer_i64_code, HostCapabilities},
    };

    fn loaded(code: &[u8]) -> CodeBuffer<'static> {
        let mut buffer = CodeBuffer::new(4, AllocationPolicy::executable()).unwrap();
        buffer.push_range(code).unwrap();
        buffer
    }

    #[test]
    fn add_through_buffer() {
        if !HostCapabilities::detect().can_execute() {
            return;
        }
        let buffer = loaded(add_i32_code().unwrap());

        let sum = unsafe { buffer.invoke::<extern "C" fn(i32, i32) -> i32>((3, 5)) };
        assert_eq!(sum, 8);
        let sum = unsafe { buffer.invoke::<extern "C" fn(i32, i32) -> i32>((-7, 2)) };
        assert_eq!(sum, -5);
    }

    #[test]
    fn entry_point_is_reusable() {
        if !HostCapabilities::detect().can_execute() {
            return;
        }
        let buffer = loaded(add_i32_code().unwrap());

        let add = unsafe { buffer.entry_point::<extern "C" fn(i32, i32) -> i32>() }.unwrap();
        assert_eq!(add(1, 2), 3);
        assert_eq!(add(40, 2), 42);
        assert_eq!(add as usize, buffer.as_ptr() as usize);
    }

    #[test]
    fn zero_arguments() {
        if !HostCapabilities::detect().can_execute() {
            return;
        }
        let buffer = loaded(answer_i64_code().unwrap());

        let answer = unsafe { buffer.invoke::<extern "C" fn() -> i64>(()) };
        assert_eq!(answer, 42);
    }

    #[test]
    fn free_functions() {
        if !HostCapabilities::detect().can_execute() {
            return;
        }
        let buffer = loaded(add_i32_code().unwrap());
        let base = buffer.base_address().unwrap();

        let sum = unsafe { invoke::<extern "C" fn(i32, i32) -> i32>(base, (20, 22)) };
        assert_eq!(sum, 42);
        let add: extern "C" fn(i32, i32) -> i32 = unsafe { entry_point(base) };
        assert_eq!(add(2, 2), 4);
    }

    #[test]
    fn disposed_buffer_has_no_entry_point() {
        let mut buffer = CodeBuffer::new(16, AllocationPolicy::heap()).unwrap();
        buffer.dispose();
        assert!(unsafe { buffer.entry_point::<extern "C" fn()>() }.is_none());
    }

    #[test]
    #[should_panic(expected = "disposed")]
    fn invoking_disposed_buffer_panics() {
        let mut buffer = CodeBuffer::new(16, AllocationPolicy::heap()).unwrap();
        buffer.dispose();
        unsafe { buffer.invoke::<extern "C" fn()>(()) };
    }

    #[test]
    fn describe_signatures() {
        type Mixed = extern "C" fn(u8, f64, *const u8) -> f32;
        let shape = <Mixed as NativeSignature>::describe();
        assert_eq!(
            shape.args,
            vec![
                ValueClass::Integer { size: 1 },
                ValueClass::Float { size: 8 },
                ValueClass::Integer {
                    size: std::mem::size_of::<usize>()
                },
            ]
        );
        assert_eq!(shape.ret, ValueClass::Float { size: 4 });

        type Ten = extern "C" fn(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);
        let shape = <Ten as NativeSignature>::describe();
        assert_eq!(shape.args.len(), 10);
        assert_eq!(shape.ret, ValueClass::Void);
    }

    #[test]
    fn host_layout_of_add() {
        type Add = extern "C" fn(i32, i32) -> i32;
        let Some(convention) = CallingConvention::host() else {
            return;
        };
        let layout = convention.assign(&<Add as NativeSignature>::describe());
        assert_eq!(layout.args.len(), 2);
        assert!(!matches!(layout.ret, ReturnLocation::Void));
    }
}
