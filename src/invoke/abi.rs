//! Calling convention tables: where each argument of a signature lives at function entry.
//!
//! Code that is written into a [`crate::CodeBuffer`] and invoked through
//! [`crate::invoke::NativeSignature`] receives its arguments exactly where the host C calling
//! convention puts them. This module answers the question an emitter has to answer before
//! generating the body: *which register or stack slot holds argument `n`, and where does the
//! result go?*
//!
//! The mapping is implemented once per ABI rather than derived generically, because the
//! conventions disagree on fundamentals:
//!
//! | Convention | Integer registers     | Float registers | Bank counters | First stack arg |
//! |------------|-----------------------|-----------------|---------------|-----------------|
//! | `SysV64`   | rdi rsi rdx rcx r8 r9 | xmm0-xmm7       | independent   | `rsp+0x08`      |
//! | `Win64`    | rcx rdx r8 r9         | xmm0-xmm3       | positional    | `rsp+0x28`      |
//! | `Aapcs64`  | x0-x7                 | v0-v7           | independent   | `sp+0x00`       |
//! | `Cdecl32`  | none                  | none            | n/a           | `esp+0x04`      |
//!
//! Stack offsets are relative to the stack pointer at the first instruction of the callee,
//! i.e. after the return address was pushed on x86.
//!
//! # Aggregates
//!
//! `#[repr(C)]` structures are described by [`ValueClass::Aggregate`]. Each convention has
//! its own rule for large values: SysV64 copies aggregates over 16 bytes to the stack, Win64
//! passes anything not 1, 2, 4 or 8 bytes wide by reference, AAPCS64 passes aggregates over
//! 16 bytes by reference, and cdecl copies every aggregate to the stack. Large return values
//! use a hidden pointer to caller-owned storage; on SysV64 and Win64 that pointer occupies the
//! first integer argument register and shifts the visible arguments, on AAPCS64 it travels in
//! the dedicated `x8`.
//!
//! Aggregates are classified by size only. Structures made purely of floats (homogeneous
//! float aggregates) are treated like integer aggregates, and cdecl always returns aggregates
//! through the hidden pointer. Apple's arm64 variant packs stack arguments by natural size
//! instead of 8-byte slots.
//!
//! # Examples
//!
//! ```rust
//! use codebuf::invoke::{CallingConvention, NativeSignature};
//!
//! type Add = extern "C" fn(i32, i32) -> i32;
//!
//! let layout = CallingConvention::SysV64.assign(&<Add as NativeSignature>::describe());
//! assert_eq!(layout.args[0].slot.register(), Some("rdi"));
//! assert_eq!(layout.args[1].slot.register(), Some("rsi"));
//! assert_eq!(layout.ret.register(), Some("rax"));
//! ```

use std::mem;

use strum::{Display, EnumCount, EnumIter};

/// How a single argument or return value is passed, independent of the convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueClass {
    /// Zero-sized; occupies no location
    Void,
    /// Integer, boolean or pointer of `size` bytes
    Integer {
        /// Width in bytes
        size: usize,
    },
    /// IEEE float of `size` bytes
    Float {
        /// Width in bytes
        size: usize,
    },
    /// `#[repr(C)]` structure or union of `size` bytes
    Aggregate {
        /// Size in bytes
        size: usize,
    },
}

impl ValueClass {
    /// Size in bytes of the value.
    #[must_use]
    pub fn size(&self) -> usize {
        match *self {
            ValueClass::Void => 0,
            ValueClass::Integer { size }
            | ValueClass::Float { size }
            | ValueClass::Aggregate { size } => size,
        }
    }
}

/// Types that can cross the native call boundary, classified for the calling convention
/// tables.
///
/// Implemented for all fixed-width integers, `isize`/`usize`, `bool`, `f32`, `f64`, raw
/// pointers and `()`. `#[repr(C)]` structures can implement it with
/// [`ValueClass::Aggregate`]:
///
/// ```rust
/// use codebuf::invoke::{NativeType, ValueClass};
///
/// #[repr(C)]
/// #[derive(Clone, Copy)]
/// struct Pair {
///     low: u64,
///     high: u64,
/// }
///
/// impl NativeType for Pair {
///     const CLASS: ValueClass = ValueClass::Aggregate { size: 16 };
/// }
/// ```
pub trait NativeType {
    /// Classification of this type
    const CLASS: ValueClass;
}

macro_rules! native_integer {
    ($($ty:ty),*) => {
        $(
            impl NativeType for $ty {
                const CLASS: ValueClass = ValueClass::Integer { size: mem::size_of::<$ty>() };
            }
        )*
    };
}

native_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, bool);

impl NativeType for f32 {
    const CLASS: ValueClass = ValueClass::Float { size: 4 };
}

impl NativeType for f64 {
    const CLASS: ValueClass = ValueClass::Float { size: 8 };
}

impl NativeType for () {
    const CLASS: ValueClass = ValueClass::Void;
}

impl<T> NativeType for *const T {
    const CLASS: ValueClass = ValueClass::Integer {
        size: mem::size_of::<usize>(),
    };
}

impl<T> NativeType for *mut T {
    const CLASS: ValueClass = ValueClass::Integer {
        size: mem::size_of::<usize>(),
    };
}

/// Argument and return classes of a signature, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureShape {
    /// Argument classes
    pub args: Vec<ValueClass>,
    /// Return class
    pub ret: ValueClass,
}

impl SignatureShape {
    /// Creates a shape from argument and return classes.
    #[must_use]
    pub fn new(args: Vec<ValueClass>, ret: ValueClass) -> Self {
        SignatureShape { args, ret }
    }
}

/// Register file a register belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterBank {
    /// General purpose integer/pointer registers
    General,
    /// Floating point / vector registers (SSE, NEON, x87)
    Float,
}

/// A location holding (part of) a value at function entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// One or more consecutive registers of a bank, low part first
    Registers {
        /// Register file
        bank: RegisterBank,
        /// Register names in assembler syntax
        names: &'static [&'static str],
    },
    /// Stack memory at `offset` bytes above the entry stack pointer
    Stack {
        /// Offset from the stack pointer at entry
        offset: usize,
        /// Bytes occupied by the value itself
        size: usize,
    },
    /// Zero-sized value, not passed at all
    Ignored,
}

impl Slot {
    /// Name of the first register, if the slot is register based.
    #[must_use]
    pub fn register(&self) -> Option<&'static str> {
        match self {
            Slot::Registers { names, .. } => names.first().copied(),
            _ => None,
        }
    }

    /// Stack offset, if the slot is stack based.
    #[must_use]
    pub fn stack_offset(&self) -> Option<usize> {
        match self {
            Slot::Stack { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

/// Where one argument is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArgLocation {
    /// Location of the value, or of the pointer to it when `by_reference` is set
    pub slot: Slot,
    /// The caller passes a pointer to a copy instead of the value
    pub by_reference: bool,
}

impl ArgLocation {
    fn value(slot: Slot) -> Self {
        ArgLocation {
            slot,
            by_reference: false,
        }
    }

    fn reference(slot: Slot) -> Self {
        ArgLocation {
            slot,
            by_reference: true,
        }
    }
}

/// Where the result is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnLocation {
    /// Nothing is returned
    Void,
    /// The value is returned in registers
    Registers {
        /// Register file
        bank: RegisterBank,
        /// Register names, low part first
        names: &'static [&'static str],
    },
    /// The caller passes a hidden pointer to storage for the result
    Indirect {
        /// Where the hidden pointer arrives
        pointer: Slot,
    },
}

impl ReturnLocation {
    /// Name of the first return register, if the value comes back in registers.
    #[must_use]
    pub fn register(&self) -> Option<&'static str> {
        match self {
            ReturnLocation::Registers { names, .. } => names.first().copied(),
            _ => None,
        }
    }
}

/// A signature mapped onto a calling convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallLayout {
    /// One location per argument, in declaration order
    pub args: Vec<ArgLocation>,
    /// Location of the result
    pub ret: ReturnLocation,
    /// Bytes of argument stack area the caller reserves, including Win64 shadow space
    pub stack_size: usize,
}

/// Calling conventions with a mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount)]
pub enum CallingConvention {
    /// System V AMD64 (Linux, macOS, BSD on x86-64)
    #[strum(serialize = "sysv64")]
    SysV64,
    /// Microsoft x64
    #[strum(serialize = "win64")]
    Win64,
    /// Arm 64-bit procedure call standard
    #[strum(serialize = "aapcs64")]
    Aapcs64,
    /// 32-bit x86 cdecl
    #[strum(serialize = "cdecl")]
    Cdecl32,
}

static SYSV64_GENERAL: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
static SYSV64_FLOAT: [&str; 8] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7",
];
static X64_GENERAL_RETURN: [&str; 2] = ["rax", "rdx"];
static X64_FLOAT_RETURN: [&str; 2] = ["xmm0", "xmm1"];

static WIN64_GENERAL: [&str; 4] = ["rcx", "rdx", "r8", "r9"];
static WIN64_FLOAT: [&str; 4] = ["xmm0", "xmm1", "xmm2", "xmm3"];

static AAPCS64_GENERAL: [&str; 8] = ["x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7"];
static AAPCS64_FLOAT: [&str; 8] = ["v0", "v1", "v2", "v3", "v4", "v5", "v6", "v7"];
static AAPCS64_INDIRECT_RESULT: [&str; 1] = ["x8"];

static CDECL_GENERAL_RETURN: [&str; 2] = ["eax", "edx"];
static CDECL_FLOAT_RETURN: [&str; 1] = ["st0"];

/// Hands out stack slots of a fixed granularity.
struct StackCursor {
    start: usize,
    offset: usize,
    granule: usize,
}

impl StackCursor {
    fn new(start: usize, granule: usize) -> Self {
        StackCursor {
            start,
            offset: start,
            granule,
        }
    }

    fn take(&mut self, size: usize) -> Slot {
        let slot = Slot::Stack {
            offset: self.offset,
            size,
        };
        self.offset += size.div_ceil(self.granule).max(1) * self.granule;
        slot
    }

    fn used(&self) -> usize {
        self.offset - self.start
    }
}

/// Hands out consecutive registers from one bank.
struct RegisterCursor {
    bank: RegisterBank,
    names: &'static [&'static str],
    next: usize,
}

impl RegisterCursor {
    fn new(bank: RegisterBank, names: &'static [&'static str]) -> Self {
        RegisterCursor {
            bank,
            names,
            next: 0,
        }
    }

    fn take(&mut self, count: usize) -> Option<Slot> {
        let end = self.next + count;
        if end > self.names.len() {
            return None;
        }

        let names = self.names;
        let slot = Slot::Registers {
            bank: self.bank,
            names: &names[self.next..end],
        };
        self.next = end;
        Some(slot)
    }

    fn exhaust(&mut self) {
        self.next = self.names.len();
    }
}

fn eightbytes(size: usize) -> usize {
    size.div_ceil(8).max(1)
}

impl CallingConvention {
    /// The convention `extern "C"` uses on the compilation target, if it has a table.
    #[must_use]
    pub const fn host() -> Option<Self> {
        if cfg!(all(target_arch = "x86_64", windows)) {
            Some(CallingConvention::Win64)
        } else if cfg!(target_arch = "x86_64") {
            Some(CallingConvention::SysV64)
        } else if cfg!(target_arch = "aarch64") {
            Some(CallingConvention::Aapcs64)
        } else if cfg!(target_arch = "x86") {
            Some(CallingConvention::Cdecl32)
        } else {
            None
        }
    }

    /// Maps every argument and the return value of `shape` to its location at entry.
    #[must_use]
    pub fn assign(&self, shape: &SignatureShape) -> CallLayout {
        match self {
            CallingConvention::SysV64 => Self::assign_sysv64(shape),
            CallingConvention::Win64 => Self::assign_win64(shape),
            CallingConvention::Aapcs64 => Self::assign_aapcs64(shape),
            CallingConvention::Cdecl32 => Self::assign_cdecl32(shape),
        }
    }

    fn assign_sysv64(shape: &SignatureShape) -> CallLayout {
        let mut general = RegisterCursor::new(RegisterBank::General, &SYSV64_GENERAL);
        let mut float = RegisterCursor::new(RegisterBank::Float, &SYSV64_FLOAT);
        let mut stack = StackCursor::new(8, 8);

        let ret = match shape.ret {
            ValueClass::Void => ReturnLocation::Void,
            ValueClass::Integer { .. } => ReturnLocation::Registers {
                bank: RegisterBank::General,
                names: &X64_GENERAL_RETURN[..1],
            },
            ValueClass::Float { .. } => ReturnLocation::Registers {
                bank: RegisterBank::Float,
                names: &X64_FLOAT_RETURN[..1],
            },
            ValueClass::Aggregate { size } if size <= 16 => ReturnLocation::Registers {
                bank: RegisterBank::General,
                names: &X64_GENERAL_RETURN[..eightbytes(size)],
            },
            ValueClass::Aggregate { .. } => ReturnLocation::Indirect {
                pointer: general.take(1).unwrap_or(Slot::Ignored),
            },
        };

        let args = shape
            .args
            .iter()
            .map(|class| match *class {
                ValueClass::Void => ArgLocation::value(Slot::Ignored),
                ValueClass::Integer { size } => {
                    ArgLocation::value(general.take(1).unwrap_or_else(|| stack.take(size)))
                }
                ValueClass::Float { size } => {
                    ArgLocation::value(float.take(1).unwrap_or_else(|| stack.take(size)))
                }
                ValueClass::Aggregate { size } if size <= 16 => ArgLocation::value(
                    general
                        .take(eightbytes(size))
                        .unwrap_or_else(|| stack.take(size)),
                ),
                ValueClass::Aggregate { size } => ArgLocation::value(stack.take(size)),
            })
            .collect();

        CallLayout {
            args,
            ret,
            stack_size: stack.used(),
        }
    }

    fn assign_win64(shape: &SignatureShape) -> CallLayout {
        // Every argument owns one 8-byte position; positions 0-3 are registers backed by
        // caller-reserved shadow space at rsp+8..rsp+0x28
        let register_slot = |bank: RegisterBank, position: usize| -> Slot {
            let names: &'static [&'static str] = match bank {
                RegisterBank::General => &WIN64_GENERAL,
                RegisterBank::Float => &WIN64_FLOAT,
            };
            Slot::Registers {
                bank,
                names: &names[position..=position],
            }
        };
        let stack_slot = |position: usize, size: usize| Slot::Stack {
            offset: 8 + position * 8,
            size,
        };
        let slot = |bank: RegisterBank, position: usize, size: usize| {
            if position < WIN64_GENERAL.len() {
                register_slot(bank, position)
            } else {
                stack_slot(position, size)
            }
        };
        let by_value = |size: usize| matches!(size, 1 | 2 | 4 | 8);

        let mut position = 0;
        let ret = match shape.ret {
            ValueClass::Void => ReturnLocation::Void,
            ValueClass::Integer { .. } => ReturnLocation::Registers {
                bank: RegisterBank::General,
                names: &X64_GENERAL_RETURN[..1],
            },
            ValueClass::Float { .. } => ReturnLocation::Registers {
                bank: RegisterBank::Float,
                names: &X64_FLOAT_RETURN[..1],
            },
            ValueClass::Aggregate { size } if by_value(size) => ReturnLocation::Registers {
                bank: RegisterBank::General,
                names: &X64_GENERAL_RETURN[..1],
            },
            ValueClass::Aggregate { .. } => {
                position = 1;
                ReturnLocation::Indirect {
                    pointer: register_slot(RegisterBank::General, 0),
                }
            }
        };

        let mut args = Vec::with_capacity(shape.args.len());
        for class in &shape.args {
            let location = match *class {
                ValueClass::Void => {
                    args.push(ArgLocation::value(Slot::Ignored));
                    continue;
                }
                ValueClass::Integer { size } => {
                    ArgLocation::value(slot(RegisterBank::General, position, size))
                }
                ValueClass::Float { size } => {
                    ArgLocation::value(slot(RegisterBank::Float, position, size))
                }
                ValueClass::Aggregate { size } if by_value(size) => {
                    ArgLocation::value(slot(RegisterBank::General, position, size))
                }
                ValueClass::Aggregate { .. } => ArgLocation::reference(slot(
                    RegisterBank::General,
                    position,
                    mem::size_of::<u64>(),
                )),
            };
            args.push(location);
            position += 1;
        }

        CallLayout {
            args,
            ret,
            stack_size: 32 + position.saturating_sub(4) * 8,
        }
    }

    fn assign_aapcs64(shape: &SignatureShape) -> CallLayout {
        let mut general = RegisterCursor::new(RegisterBank::General, &AAPCS64_GENERAL);
        let mut float = RegisterCursor::new(RegisterBank::Float, &AAPCS64_FLOAT);
        let mut stack = StackCursor::new(0, 8);

        let ret = match shape.ret {
            ValueClass::Void => ReturnLocation::Void,
            ValueClass::Integer { .. } => ReturnLocation::Registers {
                bank: RegisterBank::General,
                names: &AAPCS64_GENERAL[..1],
            },
            ValueClass::Float { .. } => ReturnLocation::Registers {
                bank: RegisterBank::Float,
                names: &AAPCS64_FLOAT[..1],
            },
            ValueClass::Aggregate { size } if size <= 16 => ReturnLocation::Registers {
                bank: RegisterBank::General,
                names: &AAPCS64_GENERAL[..eightbytes(size)],
            },
            ValueClass::Aggregate { .. } => ReturnLocation::Indirect {
                pointer: Slot::Registers {
                    bank: RegisterBank::General,
                    names: &AAPCS64_INDIRECT_RESULT,
                },
            },
        };

        let args = shape
            .args
            .iter()
            .map(|class| match *class {
                ValueClass::Void => ArgLocation::value(Slot::Ignored),
                ValueClass::Integer { size } => {
                    ArgLocation::value(general.take(1).unwrap_or_else(|| stack.take(size)))
                }
                ValueClass::Float { size } => {
                    ArgLocation::value(float.take(1).unwrap_or_else(|| stack.take(size)))
                }
                ValueClass::Aggregate { size } if size <= 16 => {
                    match general.take(eightbytes(size)) {
                        Some(slot) => ArgLocation::value(slot),
                        None => {
                            // An aggregate that does not fit closes the register file
                            general.exhaust();
                            ArgLocation::value(stack.take(size))
                        }
                    }
                }
                ValueClass::Aggregate { .. } => ArgLocation::reference(
                    general
                        .take(1)
                        .unwrap_or_else(|| stack.take(mem::size_of::<u64>())),
                ),
            })
            .collect();

        CallLayout {
            args,
            ret,
            stack_size: stack.used(),
        }
    }

    fn assign_cdecl32(shape: &SignatureShape) -> CallLayout {
        let mut stack = StackCursor::new(4, 4);

        let ret = match shape.ret {
            ValueClass::Void => ReturnLocation::Void,
            ValueClass::Integer { size } => ReturnLocation::Registers {
                bank: RegisterBank::General,
                names: &CDECL_GENERAL_RETURN[..size.div_ceil(4).clamp(1, 2)],
            },
            ValueClass::Float { .. } => ReturnLocation::Registers {
                bank: RegisterBank::Float,
                names: &CDECL_FLOAT_RETURN,
            },
            ValueClass::Aggregate { .. } => ReturnLocation::Indirect {
                pointer: stack.take(mem::size_of::<u32>()),
            },
        };

        let args = shape
            .args
            .iter()
            .map(|class| match *class {
                ValueClass::Void => ArgLocation::value(Slot::Ignored),
                other => ArgLocation::value(stack.take(other.size())),
            })
            .collect();

        CallLayout {
            args,
            ret,
            stack_size: stack.used(),
        }
    }
}
