//! Implicit scaling: one walker split across the tiles of a device.
//!
//! Each tile runs a partition of the group range. Tiles rendezvous after the
//! walker on counters in a control block: every tile increments a counter
//! and waits until all tiles did. Two counters are used so the block can be
//! re-armed by the last step without racing a slow tile.

use super::store::{self, PipeControlArgs};
use crate::stream::LinearStream;
use neo_dispatch_core::{
    hw::{
        cmds::{MiAtomic, MiBatchBufferStart, MiSemaphoreWait, MiStoreDataImm, PipeControl},
        Command,
    },
    mem::{align_up, divide_and_round_up},
};

pub const PARTITION_TYPE_X: u32 = 1;
pub const PARTITION_TYPE_Y: u32 = 2;
pub const PARTITION_TYPE_Z: u32 = 3;

/// How a walker is split across tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionSettings {
    pub partition_count: u32,
    pub partition_type: u32,
    /// Groups per partition along the partitioned dimension.
    pub partition_size: u32,
}

impl PartitionSettings {
    /// Partitions the largest dimension of `group_count` over `tile_count`
    /// tiles, X winning ties.
    ///
    /// Cooperative dispatches on generations that cannot synchronize a
    /// cooperative kernel across tiles stay on one tile with the full count.
    pub fn new(group_count: [u32; 3], tile_count: u32, cooperative_on_one_tile: bool) -> Self {
        let mut dim = 0;
        for i in 1..3 {
            if group_count[i] > group_count[dim] {
                dim = i;
            }
        }
        let partition_type = [PARTITION_TYPE_X, PARTITION_TYPE_Y, PARTITION_TYPE_Z][dim];
        if cooperative_on_one_tile || tile_count <= 1 {
            return Self {
                partition_count: 1,
                partition_type,
                partition_size: group_count[dim],
            };
        }
        Self {
            partition_count: tile_count,
            partition_type,
            partition_size: divide_and_round_up(group_count[dim].max(1), tile_count),
        }
    }
}

/// Counters the tiles rendezvous on, one dword each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlSection {
    pub gpu_address: u64,
}

impl ControlSection {
    pub const SIZE: usize = 16;

    pub fn after_walker_counter(&self) -> u64 {
        self.gpu_address
    }
    pub fn final_sync_counter(&self) -> u64 {
        self.gpu_address + 4
    }
}

/// Flush, then wait for every tile twice and reset the first counter.
pub fn encode_cross_tile_barrier(stream: &mut LinearStream, control: &ControlSection, tile_count: u32) {
    store::store_data_imm(stream, control.final_sync_counter(), 0);
    store::pipe_control(stream, &PipeControlArgs::barrier());
    store::atomic_increment(stream, control.after_walker_counter());
    store::semaphore_wait_greater_equal(stream, control.after_walker_counter(), tile_count);
    store::atomic_increment(stream, control.final_sync_counter());
    store::semaphore_wait_greater_equal(stream, control.final_sync_counter(), tile_count);
    store::store_data_imm(stream, control.after_walker_counter(), 0);
}

pub fn cross_tile_barrier_size() -> usize {
    2 * MiStoreDataImm::size() + PipeControl::size() + 2 * MiAtomic::size() + 2 * MiSemaphoreWait::size()
}

/// Secondary command sections holding the cross-tile barriers of a regular
/// command list. The list jumps into a section after each partitioned
/// walker.
#[derive(Debug)]
pub struct SyncSections {
    stream: LinearStream,
}

impl SyncSections {
    pub fn new(stream: LinearStream) -> Self {
        Self { stream }
    }
    pub fn stream(&self) -> &LinearStream {
        &self.stream
    }
    pub fn clear(&mut self) {
        self.stream.clear();
    }
    fn control_offset() -> usize {
        align_up(cross_tile_barrier_size() + MiBatchBufferStart::size(), ControlSection::SIZE)
    }
    /// Bytes of one section including its control block.
    pub fn section_size() -> usize {
        Self::control_offset() + ControlSection::SIZE
    }
    /// Appends a section and jumps to it from `list`.
    ///
    /// With `second_level` the jump is a call and the section returns with
    /// `MI_BATCH_BUFFER_END`, otherwise the section jumps back to the
    /// command following the jump in `list`.
    pub fn append(&mut self, list: &mut LinearStream, tile_count: u32, second_level: bool) -> u64 {
        self.stream.align(ControlSection::SIZE);
        let start = self.stream.used();
        let section_address = self.stream.current_gpu_address();
        let control = ControlSection {
            gpu_address: section_address + Self::control_offset() as u64,
        };
        let return_address = list.current_gpu_address() + MiBatchBufferStart::size() as u64;
        store::batch_buffer_start(list, section_address, second_level);

        encode_cross_tile_barrier(&mut self.stream, &control, tile_count);
        if second_level {
            store::batch_buffer_end(&mut self.stream);
        } else {
            store::batch_buffer_start(&mut self.stream, return_address, false);
        }
        // Zero padding decodes as MI_NOOP; the control block starts zeroed.
        let pad = start + Self::section_size() - self.stream.used();
        self.stream.get_space(pad);
        section_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo_dispatch_core::hw::{
        cmds::MiBatchBufferEnd,
        parse::{find_all, parse},
    };

    #[test]
    fn partition_follows_largest_dimension() {
        let settings = PartitionSettings::new([16, 64, 1], 2, false);
        assert_eq!(settings.partition_type, PARTITION_TYPE_Y);
        assert_eq!(settings.partition_size, 32);
        assert_eq!(settings.partition_count, 2);

        let tie = PartitionSettings::new([9, 9, 9], 2, false);
        assert_eq!(tie.partition_type, PARTITION_TYPE_X);
        assert_eq!(tie.partition_size, 5);

        let cooperative = PartitionSettings::new([8, 1, 1], 2, true);
        assert_eq!(cooperative.partition_count, 1);
        assert_eq!(cooperative.partition_size, 8);
    }

    #[test]
    fn barrier_waits_for_every_tile() {
        let mut stream = LinearStream::new(0);
        let control = ControlSection { gpu_address: 0x4000 };
        encode_cross_tile_barrier(&mut stream, &control, 2);
        assert_eq!(stream.used(), cross_tile_barrier_size());
        let waits = find_all::<MiSemaphoreWait>(stream.bytes());
        assert_eq!(waits.len(), 2);
        for (_, wait) in waits {
            assert_eq!(wait.semaphore_data_dword(), 2);
            assert_eq!(wait.compare_operation(), MiSemaphoreWait::COMPARE_SAD_GREATER_THAN_OR_EQUAL_SDD);
        }
        assert_eq!(find_all::<MiAtomic>(stream.bytes()).len(), 2);
    }

    #[test]
    fn first_level_section_jumps_back() {
        let mut list = LinearStream::new(0x10_0000);
        let mut sections = SyncSections::new(LinearStream::new(0x20_0000));
        let address = sections.append(&mut list, 2, false);
        assert_eq!(address, 0x20_0000);
        let (_, jump) = find_all::<MiBatchBufferStart>(list.bytes())[0];
        assert!(!jump.is_second_level());
        assert_eq!(jump.batch_buffer_start_address(), 0x20_0000);
        let back = find_all::<MiBatchBufferStart>(sections.stream().bytes());
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].1.batch_buffer_start_address(), 0x10_0000 + 12);
        assert_eq!(sections.stream().used(), SyncSections::section_size());
    }

    #[test]
    fn second_level_section_returns() {
        let mut list = LinearStream::new(0x10_0000);
        let mut sections = SyncSections::new(LinearStream::new(0x20_0000));
        sections.append(&mut list, 2, true);
        let second = sections.append(&mut list, 2, true);
        assert_eq!(second % ControlSection::SIZE as u64, 0);
        let jumps = find_all::<MiBatchBufferStart>(list.bytes());
        assert!(jumps.iter().all(|(_, jump)| jump.is_second_level()));
        let cmds = parse(&sections.stream().bytes()[..cross_tile_barrier_size() + 4]);
        assert!(cmds.last().unwrap().is::<MiBatchBufferEnd>());
    }
}
