//! Per-thread local ID data.
//!
//! Each hardware thread of a work group receives one row of 16 bit IDs per
//! channel (x, y, z). Either the walker generates them or the runtime writes
//! them into the indirect heap in front of the cross-thread data.

use crate::mem::{divide_and_round_up, is_pow2};

/// Dimension orders the walker can generate, indexed by walk order code.
pub const WALK_ORDERS: [[u8; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

pub const NUM_CHANNELS_WITH_IMPLICIT_ARGS: u32 = 3;

/// Largest work group for which the walker can generate IDs.
pub const MAX_HW_GENERATED_WORK_GROUP_SIZE: u32 = 1024;

/// Hardware threads needed for `total_lws` work items.
pub fn threads_per_work_group(simd: u32, total_lws: u32) -> u32 {
    if simd == 1 {
        total_lws
    } else {
        divide_and_round_up(total_lws, simd)
    }
}

/// Bytes of local IDs one hardware thread consumes.
pub fn per_thread_size_local_ids(simd: u32, grf_size: u32, num_channels: u32) -> u32 {
    if simd == 1 {
        return grf_size;
    }
    let grfs_per_channel = if simd == 32 && grf_size == 32 { 2 } else { 1 };
    (num_channels * grfs_per_channel * grf_size).max(grf_size)
}

pub fn per_thread_data_size_total(simd: u32, grf_size: u32, num_channels: u32, total_lws: u32) -> u32 {
    if num_channels == 0 {
        return 0;
    }
    threads_per_work_group(simd, total_lws) * per_thread_size_local_ids(simd, grf_size, num_channels)
}

/// Local ID of the `lane`th work item when IDs increase along `order[0]`
/// first. The outermost dimension is not wrapped, so lanes past the end of
/// the group keep counting.
fn local_id_of(lane: u32, lws: [u32; 3], order: [u8; 3]) -> [u16; 3] {
    let d0 = usize::from(order[0]);
    let d1 = usize::from(order[1]);
    let d2 = usize::from(order[2]);
    let l0 = lws[d0].max(1);
    let l1 = lws[d1].max(1);
    let mut id = [0u16; 3];
    id[d0] = (lane % l0) as u16;
    id[d1] = ((lane / l0) % l1) as u16;
    id[d2] = (lane / (l0 * l1)) as u16;
    id
}

/// Writes the local ID table of one work group into `dst`.
pub fn generate_local_ids(
    dst: &mut [u8],
    simd: u32,
    lws: [u32; 3],
    order: [u8; 3],
    grf_size: u32,
    num_channels: u32,
) {
    let total = lws.iter().product::<u32>();
    let threads = threads_per_work_group(simd, total);
    let thread_size = per_thread_size_local_ids(simd, grf_size, num_channels) as usize;
    let lanes = simd.max(1);
    let channel_stride = if simd == 1 { 2 } else { thread_size / num_channels.max(1) as usize };
    let lane_stride = if simd == 1 { 0 } else { 2 };
    for thread in 0..threads {
        let base = thread as usize * thread_size;
        for lane in 0..lanes {
            let id = local_id_of(thread * lanes + lane, lws, order);
            for (channel, value) in id.iter().take(num_channels as usize).enumerate() {
                let offset = base + channel * channel_stride + lane as usize * lane_stride;
                crate::mem::patch_bytes(dst, offset, &value.to_le_bytes());
            }
        }
    }
}

/// Result of the hardware generation check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalIdGeneration {
    pub runtime_required: bool,
    /// Walk order code for the walker, valid when the walker generates IDs.
    pub walk_order: u32,
}

/// Decides whether the runtime must write local IDs itself.
///
/// The walker can generate them only for SIMD 8/16/32 groups of at most
/// [`MAX_HW_GENERATED_WORK_GROUP_SIZE`] items whose two innermost dimensions
/// are powers of two in one of the [`WALK_ORDERS`]. With
/// `require_input_walk_order` only the kernel's own order is eligible.
pub fn local_id_generation(
    num_channels: u32,
    lws: [u32; 3],
    workgroup_walk_order: [u8; 3],
    require_input_walk_order: bool,
    simd: u32,
    hw_generation_supported: bool,
) -> LocalIdGeneration {
    let runtime = LocalIdGeneration {
        runtime_required: true,
        walk_order: 0,
    };
    if num_channels == 0 {
        return LocalIdGeneration {
            runtime_required: false,
            walk_order: 0,
        };
    }
    if !hw_generation_supported || simd == 1 {
        return runtime;
    }
    if lws.iter().product::<u32>() > MAX_HW_GENERATED_WORK_GROUP_SIZE {
        return runtime;
    }
    let eligible = |order: &[u8; 3]| {
        is_pow2(lws[usize::from(order[0])]) && is_pow2(lws[usize::from(order[1])])
    };
    let found = if require_input_walk_order {
        WALK_ORDERS
            .iter()
            .position(|order| *order == workgroup_walk_order)
            .filter(|index| eligible(&WALK_ORDERS[*index]))
    } else {
        WALK_ORDERS.iter().position(eligible)
    };
    match found {
        Some(index) => LocalIdGeneration {
            runtime_required: false,
            walk_order: index as u32,
        },
        None => runtime,
    }
}

/// `emit_local_id` bits for `num_channels` channels.
pub fn emit_local_id_mask(num_channels: u32) -> u32 {
    (1 << num_channels.min(3)) - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(per_thread_size_local_ids(1, 32, 3), 32);
        assert_eq!(per_thread_size_local_ids(8, 32, 3), 96);
        assert_eq!(per_thread_size_local_ids(32, 32, 3), 192);
        assert_eq!(per_thread_size_local_ids(32, 64, 3), 192);
        assert_eq!(per_thread_data_size_total(16, 32, 3, 33), 3 * 96);
        assert_eq!(per_thread_data_size_total(1, 32, 3, 5), 5 * 32);
        assert_eq!(per_thread_data_size_total(8, 32, 0, 64), 0);
    }

    #[test]
    fn simd1_table() {
        let mut table = vec![0u8; 4 * 32];
        generate_local_ids(&mut table, 1, [2, 2, 1], [0, 1, 2], 32, 3);
        let ids: Vec<[u16; 3]> = table
            .chunks(32)
            .map(|grf| {
                [
                    u16::from_le_bytes([grf[0], grf[1]]),
                    u16::from_le_bytes([grf[2], grf[3]]),
                    u16::from_le_bytes([grf[4], grf[5]]),
                ]
            })
            .collect();
        assert_eq!(ids, vec![[0, 0, 0], [1, 0, 0], [0, 1, 0], [1, 1, 0]]);
        assert!(table.chunks(32).all(|grf| grf[6..].iter().all(|b| *b == 0)));
    }

    #[test]
    fn simd8_rows_follow_dimension_order() {
        let mut table = vec![0u8; 96];
        generate_local_ids(&mut table, 8, [2, 4, 1], [1, 0, 2], 32, 3);
        let row = |channel: usize| -> Vec<u16> {
            table[channel * 32..channel * 32 + 16]
                .chunks(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect()
        };
        assert_eq!(row(1), vec![0, 1, 2, 3, 0, 1, 2, 3]);
        assert_eq!(row(0), vec![0, 0, 0, 0, 1, 1, 1, 1]);
        assert_eq!(row(2), vec![0; 8]);
    }

    #[test]
    fn hardware_generation_eligibility() {
        let hw = local_id_generation(3, [16, 4, 1], [0, 1, 2], false, 16, true);
        assert!(!hw.runtime_required);
        assert_eq!(hw.walk_order, 0);
        let swapped = local_id_generation(3, [3, 4, 2], [0, 1, 2], false, 16, true);
        assert!(!swapped.runtime_required);
        assert_eq!(WALK_ORDERS[swapped.walk_order as usize], [1, 2, 0]);
        assert!(local_id_generation(3, [3, 4, 2], [0, 1, 2], true, 16, true).runtime_required);
        assert!(local_id_generation(3, [16, 1, 1], [0, 1, 2], false, 1, true).runtime_required);
        assert!(local_id_generation(3, [64, 32, 1], [0, 1, 2], false, 32, true).runtime_required);
        assert!(local_id_generation(3, [16, 1, 1], [0, 1, 2], false, 16, false).runtime_required);
        assert!(!local_id_generation(0, [16, 1, 1], [0, 1, 2], false, 16, false).runtime_required);
        assert_eq!(emit_local_id_mask(3), 0b111);
    }
}
