//! Walks an encoded command stream.

use super::Command;

/// Number of dwords of the command starting with `header`.
pub fn command_dwords(header: u32) -> usize {
    let command_type = header >> 29;
    let mi_opcode = (header >> 23) & 0x3F;
    if command_type == 0 && matches!(mi_opcode, 0x00 | 0x05 | 0x0A) {
        1
    } else {
        (header & 0xFF) as usize + 2
    }
}

/// A command found in a stream.
#[derive(Clone, Copy, Debug)]
pub struct ParsedCommand<'a> {
    pub offset: usize,
    pub header: u32,
    pub bytes: &'a [u8],
}

impl ParsedCommand<'_> {
    pub fn is<C: Command>(&self) -> bool {
        C::matches(self.header) && self.bytes.len() == C::size()
    }
    pub fn decode<C: Command>(&self) -> Option<C> {
        if self.is::<C>() {
            C::from_bytes(self.bytes)
        } else {
            None
        }
    }
}

/// Iterator over the commands of a byte stream.
///
/// Stops at the first truncated command.
#[derive(Clone, Debug)]
pub struct CommandIter<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> CommandIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }
}

impl<'a> Iterator for CommandIter<'a> {
    type Item = ParsedCommand<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.bytes.get(self.offset..)?;
        let header = crate::mem::read_u32(rest, 0)?;
        let size = command_dwords(header) * 4;
        let bytes = rest.get(..size)?;
        let parsed = ParsedCommand {
            offset: self.offset,
            header,
            bytes,
        };
        self.offset += size;
        Some(parsed)
    }
}

pub fn parse(bytes: &[u8]) -> Vec<ParsedCommand> {
    CommandIter::new(bytes).collect()
}

/// Every command of type `C` with its offset.
pub fn find_all<C: Command>(bytes: &[u8]) -> Vec<(usize, C)> {
    CommandIter::new(bytes)
        .filter_map(|cmd| cmd.decode::<C>().map(|c| (cmd.offset, c)))
        .collect()
}

pub fn find_first<C: Command>(bytes: &[u8]) -> Option<(usize, C)> {
    CommandIter::new(bytes).find_map(|cmd| cmd.decode::<C>().map(|c| (cmd.offset, c)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::cmds::*;

    #[test]
    fn walks_mixed_stream() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MiNoop::init().as_bytes());
        bytes.extend_from_slice(PipeControl::init().as_bytes());
        bytes.extend_from_slice(MiStoreDataImm::init().as_bytes());
        bytes.extend_from_slice(ComputeWalker::init().as_bytes());
        bytes.extend_from_slice(MiBatchBufferEnd::init().as_bytes());
        let cmds = parse(&bytes);
        assert_eq!(cmds.len(), 5);
        assert!(cmds[0].is::<MiNoop>());
        assert!(cmds[1].is::<PipeControl>());
        assert_eq!(cmds[2].offset, 4 + 24);
        assert!(cmds[3].is::<ComputeWalker>());
        assert!(cmds[4].is::<MiBatchBufferEnd>());
        assert_eq!(find_all::<PipeControl>(&bytes).len(), 1);
        assert!(find_first::<GpgpuWalker>(&bytes).is_none());
    }

    #[test]
    fn truncated_command_ends_iteration() {
        let bytes = PipeControl::init().as_bytes()[..12].to_vec();
        assert!(parse(&bytes).is_empty());
    }
}
