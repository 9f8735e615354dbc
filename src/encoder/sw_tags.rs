//! Software tags: pairs of `MI_NOOP`s carrying markers for tools that walk
//! the command stream.
//!
//! The first noop carries [`MARKER`] or'ed with the tag type, the second a
//! 22 bit payload. Both have the identification register write enabled so a
//! plain noop is never mistaken for a tag.

use crate::stream::LinearStream;
use neo_dispatch_core::hw::{cmds::MiNoop, parse::CommandIter, Command};

pub const MARKER: u32 = 0x2B_0000;
const TYPE_MASK: u32 = 0xFF;
const PAYLOAD_MASK: u32 = (1 << 22) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwTag {
    /// A kernel dispatch, identified by a hash of its name.
    KernelName { hash: u32 },
    /// Start of an API call, paired with a [`SwTag::CallEnd`] of the same id.
    CallBegin { id: u32 },
    CallEnd { id: u32 },
}

impl SwTag {
    pub fn kernel_name(name: &str) -> Self {
        Self::KernelName { hash: name_hash(name) }
    }
    fn tag_type(&self) -> u32 {
        match self {
            Self::KernelName { .. } => 1,
            Self::CallBegin { .. } => 2,
            Self::CallEnd { .. } => 3,
        }
    }
    fn payload(&self) -> u32 {
        match *self {
            Self::KernelName { hash } => hash,
            Self::CallBegin { id } | Self::CallEnd { id } => id,
        }
    }
    fn from_parts(tag_type: u32, payload: u32) -> Option<Self> {
        match tag_type {
            1 => Some(Self::KernelName { hash: payload }),
            2 => Some(Self::CallBegin { id: payload }),
            3 => Some(Self::CallEnd { id: payload }),
            _ => None,
        }
    }
}

fn tag_noop(value: u32) -> MiNoop {
    let mut noop = MiNoop::init();
    noop.set_identification_number(value & PAYLOAD_MASK)
        .set_identification_number_register_write_enable(1);
    noop
}

pub fn encode(stream: &mut LinearStream, tag: SwTag) {
    stream.put(&tag_noop(MARKER | tag.tag_type()));
    stream.put(&tag_noop(tag.payload()));
}

pub fn size() -> usize {
    2 * MiNoop::size()
}

/// FNV-1a folded to the 22 bit payload.
pub fn name_hash(name: &str) -> u32 {
    let hash = name
        .bytes()
        .fold(0x811C_9DC5u32, |hash, byte| (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193));
    ((hash >> 22) ^ hash) & PAYLOAD_MASK
}

/// Every tag in `bytes` with the offset of its first noop.
pub fn decode(bytes: &[u8]) -> Vec<(usize, SwTag)> {
    let noops: Vec<_> = CommandIter::new(bytes)
        .map(|cmd| (cmd.offset, cmd.decode::<MiNoop>()))
        .collect();
    let mut tags = Vec::new();
    let mut i = 0;
    while i + 1 < noops.len() {
        if let ((offset, Some(marker)), (_, Some(payload))) = (noops[i], noops[i + 1]) {
            let tagged = marker.identification_number_register_write_enable() == 1
                && payload.identification_number_register_write_enable() == 1
                && marker.identification_number() & !TYPE_MASK == MARKER;
            if tagged {
                let tag_type = marker.identification_number() & TYPE_MASK;
                if let Some(tag) = SwTag::from_parts(tag_type, payload.identification_number()) {
                    tags.push((offset, tag));
                    i += 2;
                    continue;
                }
            }
        }
        i += 1;
    }
    tags
}
