// Copyright (c) 2024 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

/// Defines a bitset of resource usages. Every flag carries the pipeline stages, access types and
/// Vulkan buffer/image usage flags that it implies, and the name used to build test case names.
macro_rules! usage_flags {
    {
        $(#[doc = $ty_doc:literal])*
        $ty:ident($repr:ty);

        $(
            $(#[doc = $flag_doc:literal])*
            $flag_name:ident = $value:expr => {
                name: $name:literal,
                stages: [$($stage:ident),* $(,)?],
                accesses: [$($access:ident),* $(,)?],
                buffer_usage: [$($buffer_usage:ident),* $(,)?],
                image_usage: [$($image_usage:ident),* $(,)?] $(,)?
            },
        )+
    } => {
        $(#[doc = $ty_doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $ty($repr);

        impl $ty {
            $(
                $(#[doc = $flag_doc])*
                pub const $flag_name: Self = Self($value);
            )*

            #[doc = concat!("Returns a `", stringify!($ty), "` with none of the flags set.")]
            #[inline]
            pub const fn empty() -> Self {
                Self(0)
            }

            #[doc = concat!("Returns a `", stringify!($ty), "` with all of the flags set.")]
            #[inline]
            pub const fn all() -> Self {
                Self(Self::all_raw())
            }

            const fn all_raw() -> $repr {
                0 $( | $value )*
            }

            /// Returns the raw bits.
            #[inline]
            pub const fn as_raw(self) -> $repr {
                self.0
            }

            /// Creates a value from raw bits, dropping bits that don't name a flag.
            #[inline]
            pub const fn from_raw(bits: $repr) -> Self {
                Self(bits & Self::all_raw())
            }

            /// Returns whether no flags are set in `self`.
            #[inline]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Returns whether any flags are set in both `self` and `other`.
            #[inline]
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Returns whether all flags in `other` are set in `self`.
            #[inline]
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Returns the union of `self` and `other`.
            #[inline]
            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            /// Returns the intersection of `self` and `other`.
            #[inline]
            pub const fn intersection(self, other: Self) -> Self {
                Self(self.0 & other.0)
            }

            /// Returns `self` without the flags set in `other`.
            #[inline]
            pub const fn difference(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }

            /// Returns the pipeline stages in which the usages in `self` take place.
            pub fn stage_mask(self) -> ash::vk::PipelineStageFlags {
                #[allow(unused_mut)]
                let mut mask = ash::vk::PipelineStageFlags::empty();

                $(
                    if self.intersects(Self::$flag_name) {
                        mask |= ash::vk::PipelineStageFlags::empty()
                            $( | ash::vk::PipelineStageFlags::$stage )*;
                    }
                )*

                mask
            }

            /// Returns the memory accesses that the usages in `self` perform.
            pub fn access_mask(self) -> ash::vk::AccessFlags {
                #[allow(unused_mut)]
                let mut mask = ash::vk::AccessFlags::empty();

                $(
                    if self.intersects(Self::$flag_name) {
                        mask |= ash::vk::AccessFlags::empty()
                            $( | ash::vk::AccessFlags::$access )*;
                    }
                )*

                mask
            }

            /// Returns the buffer usage flags a buffer needs to be used as described by `self`.
            pub fn buffer_usage(self) -> ash::vk::BufferUsageFlags {
                #[allow(unused_mut)]
                let mut usage = ash::vk::BufferUsageFlags::empty();

                $(
                    if self.intersects(Self::$flag_name) {
                        usage |= ash::vk::BufferUsageFlags::empty()
                            $( | ash::vk::BufferUsageFlags::$buffer_usage )*;
                    }
                )*

                usage
            }

            /// Returns the image usage flags an image needs to be used as described by `self`.
            pub fn image_usage(self) -> ash::vk::ImageUsageFlags {
                #[allow(unused_mut)]
                let mut usage = ash::vk::ImageUsageFlags::empty();

                $(
                    if self.intersects(Self::$flag_name) {
                        usage |= ash::vk::ImageUsageFlags::empty()
                            $( | ash::vk::ImageUsageFlags::$image_usage )*;
                    }
                )*

                usage
            }

            /// Returns the names of the flags set in `self`, in bit order.
            pub fn names(self) -> impl Iterator<Item = &'static str> {
                [$( (Self::$flag_name, $name), )*]
                    .into_iter()
                    .filter(move |&(flag, _)| self.intersects(flag))
                    .map(|(_, name)| name)
            }
        }

        impl Default for $ty {
            #[inline]
            fn default() -> Self {
                Self::empty()
            }
        }

        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
                #[allow(unused_mut)]
                let mut written = false;

                $(
                    if self.intersects(Self::$flag_name) {
                        if written {
                            write!(f, " | ")?;
                        }

                        write!(f, stringify!($flag_name))?;
                        written = true;
                    }
                )*

                if !written {
                    write!(f, "empty()")?;
                }

                Ok(())
            }
        }

        impl std::ops::BitAnd for $ty {
            type Output = Self;

            #[inline]
            fn bitand(self, rhs: Self) -> Self {
                self.intersection(rhs)
            }
        }

        impl std::ops::BitAndAssign for $ty {
            #[inline]
            fn bitand_assign(&mut self, rhs: Self) {
                *self = self.intersection(rhs);
            }
        }

        impl std::ops::BitOr for $ty {
            type Output = Self;

            #[inline]
            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }

        impl std::ops::BitOrAssign for $ty {
            #[inline]
            fn bitor_assign(&mut self, rhs: Self) {
                *self = self.union(rhs);
            }
        }

        impl std::ops::Sub for $ty {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: Self) -> Self {
                self.difference(rhs)
            }
        }

        impl std::ops::SubAssign for $ty {
            #[inline]
            fn sub_assign(&mut self, rhs: Self) {
                *self = self.difference(rhs);
            }
        }
    };
}

/// Defines a dense enumeration over the single-bit values of a Vulkan flag type, so that masks
/// can be used to index fixed-size tables.
macro_rules! dense_flags {
    {
        $(#[doc = $ty_doc:literal])*
        $ty:ident: $flags:ident;

        $(
            $(#[doc = $variant_doc:literal])*
            $variant:ident = $flag:ident,
        )+
    } => {
        $(#[doc = $ty_doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum $ty {
            $(
                $(#[doc = $variant_doc])*
                $variant,
            )+
        }

        impl $ty {
            /// Every value, in index order.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            /// The number of values.
            pub const COUNT: usize = Self::ALL.len();

            /// The union of the flags of every value.
            pub const ALL_FLAGS: ash::vk::$flags =
                ash::vk::$flags::from_raw(0 $( | ash::vk::$flags::$flag.as_raw() )+);

            /// Returns the dense index of `self`.
            #[inline]
            pub const fn index(self) -> usize {
                self as usize
            }

            /// Returns the Vulkan flag corresponding to `self`.
            #[inline]
            pub const fn flag(self) -> ash::vk::$flags {
                match self {
                    $(Self::$variant => ash::vk::$flags::$flag,)+
                }
            }

            /// Returns the value corresponding to a single Vulkan flag bit, or `None` if `flag`
            /// is not exactly one known bit.
            pub fn from_flag(flag: ash::vk::$flags) -> Option<Self> {
                $(
                    if flag == ash::vk::$flags::$flag {
                        return Some(Self::$variant);
                    }
                )+

                None
            }

            /// Returns an iterator over the values whose flag is set in `mask`.
            #[inline]
            pub fn iter(mask: ash::vk::$flags) -> impl Iterator<Item = Self> {
                Self::ALL
                    .iter()
                    .copied()
                    .filter(move |value| mask.contains(value.flag()))
            }
        }
    };
}
