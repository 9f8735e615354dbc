/*!

Hardware command layouts.

Every command is a `#[repr(C)]` array of dwords. Fields are addressed by
dword index, low bit and width, and exposed as generated getters and
`set_*` methods. Commands are copied into a stream with
[`bytemuck::bytes_of`].

```
# use neo_dispatch_core::hw::{cmds::MiLoadRegisterImm, Command};
let mut lri = MiLoadRegisterImm::init();
lri.set_register_offset(0x2600).set_data_dword(7);
assert_eq!(lri.register_offset(), 0x2600);
assert_eq!(MiLoadRegisterImm::size(), 12);
```
*/

use bytemuck::Pod;
use std::fmt::Debug;

pub mod alu;
pub mod cmds;
pub mod parse;
pub mod regs;

/// A command that can be placed in a command stream.
pub trait Command: Pod + Debug {
    const DWORDS: usize;
    const HEADER: u32;
    /// Bits of the first dword that identify the command.
    const HEADER_MASK: u32;
    /// A command with its header set and every field zeroed.
    fn init() -> Self;
    fn size() -> usize {
        Self::DWORDS * 4
    }
    fn matches(header: u32) -> bool {
        header & Self::HEADER_MASK == Self::HEADER & Self::HEADER_MASK
    }
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::size())?;
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }
    fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

pub(crate) const fn bits(dword: u32, low: u32, width: u32) -> u32 {
    if width >= 32 {
        dword
    } else {
        (dword >> low) & ((1 << width) - 1)
    }
}

pub(crate) const fn with_bits(dword: u32, low: u32, width: u32, value: u32) -> u32 {
    if width >= 32 {
        value
    } else {
        let mask = ((1u32 << width) - 1) << low;
        (dword & !mask) | ((value << low) & mask)
    }
}

/// Declares a dword array struct with bit-field accessors.
macro_rules! bitfields {
    (
        $(#[$meta:meta])*
        $name:ident[$dwords:literal] {
            $($(#[$fmeta:meta])* $field:ident: $dw:literal [$low:literal; $width:literal]),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(C)]
        #[derive(Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
        pub struct $name {
            pub dw: [u32; $dwords],
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("dw", &format_args!("{:08x?}", self.dw))
                    .finish()
            }
        }

        impl $name {
            paste::paste! {
                $(
                    $(#[$fmeta])*
                    pub fn $field(&self) -> u32 {
                        crate::hw::bits(self.dw[$dw], $low, $width)
                    }
                    pub fn [<set_ $field>](&mut self, value: u32) -> &mut Self {
                        self.dw[$dw] = crate::hw::with_bits(self.dw[$dw], $low, $width, value);
                        self
                    }
                )*
            }
        }
    };
}
pub(crate) use bitfields;

/// Declares a command: a [`bitfields!`] struct with a fixed header.
macro_rules! gpu_command {
    (
        $(#[$meta:meta])*
        $name:ident[$dwords:literal] = $header:literal, mask $mask:literal {
            $($body:tt)*
        }
    ) => {
        crate::hw::bitfields! {
            $(#[$meta])*
            $name[$dwords] { $($body)* }
        }

        impl crate::hw::Command for $name {
            const DWORDS: usize = $dwords;
            const HEADER: u32 = $header;
            const HEADER_MASK: u32 = $mask;
            fn init() -> Self {
                let mut dw = [0u32; $dwords];
                dw[0] = $header;
                Self { dw }
            }
        }
    };
}
pub(crate) use gpu_command;

/// Writes a 64 bit address into two consecutive dwords.
pub(crate) fn set_qword(dw: &mut [u32], index: usize, value: u64) {
    dw[index] = value as u32;
    dw[index + 1] = (value >> 32) as u32;
}

pub(crate) fn qword(dw: &[u32], index: usize) -> u64 {
    u64::from(dw[index]) | (u64::from(dw[index + 1]) << 32)
}

/// Imports the command trait and every layout.
pub mod prelude {
    pub use super::{alu::*, cmds::*, regs::*, Command};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_field_helpers() {
        assert_eq!(with_bits(0, 4, 4, 0xF), 0xF0);
        assert_eq!(with_bits(0xFFFF_FFFF, 4, 4, 0), 0xFFFF_FF0F);
        assert_eq!(with_bits(0, 0, 32, 0x1234_5678), 0x1234_5678);
        assert_eq!(bits(0xF0, 4, 4), 0xF);
        assert_eq!(with_bits(0, 4, 2, 0xF), 0x30);
    }
}
