//! Utility
//!
//! **This module is exempt from the API stability guarantee** unless specified
//! otherwise. It's exposed only because it's needed by macros.
use core::sync::atomic;

/// Trait for types having a constant default value. This is essentially a
/// constant version of `Default`.
pub trait Init {
    /// The default value.
    const INIT: Self;
}

impl<T> Init for Option<T> {
    const INIT: Self = None;
}

impl<T: Init, const LEN: usize> Init for [T; LEN] {
    const INIT: Self = [const { T::INIT }; LEN];
}

impl Init for () {
    const INIT: Self = ();
}

impl<Tag: ?Sized> Init for tokenlock::SingletonTokenId<Tag> {
    const INIT: Self = Self::new();
}

macro_rules! impl_init {
    ( $($ty:ty => $value:expr,)* ) => {
        $(
            impl Init for $ty {
                #[allow(clippy::declare_interior_mutable_const)]
                const INIT: Self = $value;
            }
        )*
    };
}

impl_init! {
    bool => false,
    u8 => 0,
    u16 => 0,
    u32 => 0,
    u64 => 0,
    usize => 0,
    atomic::AtomicBool => atomic::AtomicBool::new(false),
    atomic::AtomicU32 => atomic::AtomicU32::new(0),
    atomic::AtomicUsize => atomic::AtomicUsize::new(0),
}

/// Count the given identifiers.
#[doc(hidden)]
#[macro_export]
macro_rules! __count {
    () => { 0usize };
    ($first:ident $($rest:ident)*) => { 1usize + $crate::__count!($($rest)*) };
}

/// Define a sequence of `pub const` object ids, numbered from zero in
/// declaration order.
#[doc(hidden)]
#[macro_export]
macro_rules! __define_ids {
    ($id_ty:ident; $index:expr;) => {};
    ($id_ty:ident; $index:expr; $first:ident $($rest:ident)*) => {
        pub const $first: $crate::$id_ty = $crate::$id_ty::new($index);
        $crate::__define_ids!($id_ty; $index + 1; $($rest)*);
    };
}
