//! A code buffer that holds exactly one callable function.

use crate::{
    buffer::CodeBuffer,
    invoke::NativeSignature,
    memory::{MemoryProvider, SystemProvider},
    Result,
};

/// Owns the buffer of one generated function and hands out typed entry points into it.
///
/// Borrowed storage is promoted on the way in, so a `JitFunction` never outlives the bytes
/// it calls. Replacing the code disposes the previous buffer; dropping the function releases
/// the current one.
///
/// ```rust,no_run
/// use codebuf::{invoke::JitFunction, AllocationPolicy, CodeBuffer};
///
/// let mut code = CodeBuffer::new(8, AllocationPolicy::executable())?;
/// // mov eax, 42; ret
/// code.push_range(&[0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3])?;
///
/// let function = JitFunction::new(code)?;
/// let answer = unsafe { function.invoke::<extern "C" fn() -> i32>(()) };
/// assert_eq!(answer, 42);
/// # Ok::<(), codebuf::Error>(())
/// ```
#[derive(Debug)]
pub struct JitFunction<P: MemoryProvider = SystemProvider> {
    code: CodeBuffer<'static, P>,
}

impl<P: MemoryProvider> JitFunction<P> {
    /// Takes over `code`, promoting borrowed storage into an owned region first.
    ///
    /// # Errors
    ///
    /// Propagates allocation failures from the promotion.
    pub fn new(code: CodeBuffer<'_, P>) -> Result<Self> {
        Ok(JitFunction {
            code: code.into_owned()?,
        })
    }

    /// Replaces the function body, disposing the previous buffer.
    ///
    /// # Errors
    ///
    /// Propagates allocation failures from promoting `code`; the current body is kept in
    /// that case.
    pub fn set_code(&mut self, code: CodeBuffer<'_, P>) -> Result<()> {
        let code = code.into_owned()?;
        self.code.dispose();
        self.code = code;
        Ok(())
    }

    /// The underlying buffer.
    #[must_use]
    pub fn code(&self) -> &CodeBuffer<'static, P> {
        &self.code
    }

    /// The underlying buffer, for patching or appending.
    pub fn code_mut(&mut self) -> &mut CodeBuffer<'static, P> {
        &mut self.code
    }

    /// Returns `true` once [`JitFunction::dispose`] ran.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.code.is_disposed()
    }

    /// The function as a pointer of type `F`, or `None` once disposed.
    ///
    /// # Safety
    ///
    /// See [`CodeBuffer::entry_point`].
    #[must_use]
    pub unsafe fn entry_point<F: NativeSignature>(&self) -> Option<F> {
        unsafe { self.code.entry_point() }
    }

    /// Calls the function.
    ///
    /// # Safety
    ///
    /// See [`CodeBuffer::invoke`]. On aarch64 the instruction cache must be flushed after
    /// [`JitFunction::set_code`] or any write through [`JitFunction::code_mut`].
    ///
    /// # Panics
    ///
    /// Panics if the function was disposed.
    pub unsafe fn invoke<F: NativeSignature>(&self, args: F::Args) -> F::Output {
        unsafe { self.code.invoke::<F>(args) }
    }

    /// Releases the code. Further calls are no-ops.
    pub fn dispose(&mut self) {
        self.code.dispose();
    }
}
