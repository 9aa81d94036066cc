/// Implements [`crate::invoke::NativeSignature`] for `extern "C" fn` pointers of one arity
///
/// Each type parameter names one argument; the same identifiers bind the destructured
/// argument tuple inside `call`.
///
/// ```rust, ignore
/// native_signature!(A0, A1);
/// // extern "C" fn(A0, A1) -> R
/// ```
macro_rules! native_signature {
    ($($arg:ident),*) => {
        unsafe impl<R, $($arg),*> $crate::invoke::NativeSignature for extern "C" fn($($arg),*) -> R
        where
            R: $crate::invoke::NativeType,
            $($arg: $crate::invoke::NativeType,)*
        {
            type Args = ($($arg,)*);
            type Output = R;

            unsafe fn from_address(address: std::ptr::NonNull<u8>) -> Self {
                let address = address.as_ptr().cast_const();
                unsafe { std::mem::transmute_copy::<*const u8, Self>(&address) }
            }

            #[allow(non_snake_case)]
            unsafe fn call(self, args: Self::Args) -> R {
                let ($($arg,)*) = args;
                (self)($($arg),*)
            }

            fn describe() -> $crate::invoke::SignatureShape {
                $crate::invoke::SignatureShape::new(
                    vec![$(<$arg as $crate::invoke::NativeType>::CLASS),*],
                    <R as $crate::invoke::NativeType>::CLASS,
                )
            }
        }
    };
}

/// Implements [`crate::invoke::NativeSignature`] for every arity from the full list down to
/// zero arguments
///
/// ```rust, ignore
/// native_signatures!(A0, A1, A2);
/// // arities 3, 2, 1 and 0
/// ```
macro_rules! native_signatures {
    () => {
        native_signature!();
    };
    ($head:ident $(, $tail:ident)*) => {
        native_signature!($head $(, $tail)*);
        native_signatures!($($tail),*);
    };
}
