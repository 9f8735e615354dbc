/*!

Implicit kernel arguments.

The runtime hands a kernel a fixed layout block with dispatch derived values
that the application never passes explicitly. The layout is versioned; the
header records the struct size and version and is fixed at construction.

```
# use neo_dispatch_core::implicit_args::ImplicitArgs;
let mut args = ImplicitArgs::new(0);
args.set_local_size([8, 1, 1]);
assert_eq!(args.size(), 128);
assert_eq!(args.version(), 0);
```
*/

use crate::{
    descriptor::KernelDescriptor,
    local_id::{self, WALK_ORDERS},
    mem::{align_up, CACHE_LINE_SIZE},
};
use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ImplicitArgsHeader {
    pub struct_size: u8,
    pub struct_version: u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ImplicitArgsV0 {
    pub header: ImplicitArgsHeader,
    pub num_work_dim: u8,
    pub simd_width: u8,
    pub local_size: [u32; 3],
    pub global_size: [u64; 3],
    pub printf_buffer_ptr: u64,
    pub global_offset: [u64; 3],
    pub local_id_table_ptr: u64,
    pub group_count: [u32; 3],
    pub padding0: u32,
    pub rt_global_buffer_ptr: u64,
    pub assert_buffer_ptr: u64,
    pub reserved: [u8; 16],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ImplicitArgsV1 {
    pub header: ImplicitArgsHeader,
    pub num_work_dim: u8,
    pub padding0: u8,
    pub local_size: [u32; 3],
    pub global_size: [u64; 3],
    pub printf_buffer_ptr: u64,
    pub global_offset: [u64; 3],
    pub local_id_table_ptr: u64,
    pub group_count: [u32; 3],
    pub padding1: u32,
    pub rt_global_buffer_ptr: u64,
    pub assert_buffer_ptr: u64,
    pub sync_buffer_ptr: u64,
    pub scratch_ptr: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ImplicitArgsV2 {
    pub v1: ImplicitArgsV1,
    pub enqueued_local_size: [u32; 3],
    pub padding2: u32,
    pub region_group_barrier_ptr: u64,
    pub reserved: [u64; 13],
}

const _: () = {
    assert!(std::mem::size_of::<ImplicitArgsV0>() == 128);
    assert!(std::mem::size_of::<ImplicitArgsV1>() == 128);
    assert!(std::mem::size_of::<ImplicitArgsV2>() == 256);
};

impl ImplicitArgsV1 {
    /// Byte offset of the scratch pointer.
    pub const SCRATCH_PTR_OFFSET: usize = 120;
}

/// Byte offsets shared by every layout version.
pub const NUM_WORK_DIM_OFFSET: usize = 2;
pub const GLOBAL_SIZE_OFFSET: usize = 16;
pub const GROUP_COUNT_OFFSET: usize = 80;

/// A versioned implicit argument block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::IsVariant)]
pub enum ImplicitArgs {
    V0(ImplicitArgsV0),
    V1(ImplicitArgsV1),
    V2(ImplicitArgsV2),
}

macro_rules! common_field {
    ($self:ident, $args:ident => $e:expr) => {
        match $self {
            Self::V0($args) => $e,
            Self::V1($args) => $e,
            Self::V2(v2) => {
                let $args = &mut v2.v1;
                $e
            }
        }
    };
}

impl ImplicitArgs {
    /// A zeroed block of `version` with its header set. Unknown versions
    /// fall back to V0.
    pub fn new(version: u8) -> Self {
        match version {
            1 => {
                let mut args = ImplicitArgsV1::zeroed();
                args.header = ImplicitArgsHeader {
                    struct_size: 128,
                    struct_version: 1,
                };
                Self::V1(args)
            }
            2 => {
                let mut args = ImplicitArgsV2::zeroed();
                // 256 does not fit the size byte; version 2 is identified by
                // its version alone.
                args.v1.header = ImplicitArgsHeader {
                    struct_size: 0,
                    struct_version: 2,
                };
                Self::V2(args)
            }
            _ => {
                let mut args = ImplicitArgsV0::zeroed();
                args.header = ImplicitArgsHeader {
                    struct_size: 128,
                    struct_version: 0,
                };
                Self::V0(args)
            }
        }
    }
    pub fn version(&self) -> u8 {
        match self {
            Self::V0(_) => 0,
            Self::V1(_) => 1,
            Self::V2(_) => 2,
        }
    }
    pub fn header(&self) -> ImplicitArgsHeader {
        match self {
            Self::V0(args) => args.header,
            Self::V1(args) => args.header,
            Self::V2(args) => args.v1.header,
        }
    }
    pub fn size(&self) -> usize {
        match self {
            Self::V0(_) => std::mem::size_of::<ImplicitArgsV0>(),
            Self::V1(_) => std::mem::size_of::<ImplicitArgsV1>(),
            Self::V2(_) => std::mem::size_of::<ImplicitArgsV2>(),
        }
    }
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::V0(args) => bytemuck::bytes_of(args),
            Self::V1(args) => bytemuck::bytes_of(args),
            Self::V2(args) => bytemuck::bytes_of(args),
        }
    }
    /// Offset of the scratch pointer, defined for V1 only.
    pub fn scratch_ptr_offset(&self) -> Option<usize> {
        self.is_v_1().then_some(ImplicitArgsV1::SCRATCH_PTR_OFFSET)
    }
    pub fn set_num_work_dim(&mut self, num_work_dim: u8) {
        common_field!(self, args => args.num_work_dim = num_work_dim);
    }
    pub fn num_work_dim(&self) -> u8 {
        match self {
            Self::V0(args) => args.num_work_dim,
            Self::V1(args) => args.num_work_dim,
            Self::V2(args) => args.v1.num_work_dim,
        }
    }
    /// Only V0 carries the SIMD width.
    pub fn set_simd_width(&mut self, simd: u32) {
        if let Self::V0(args) = self {
            args.simd_width = simd as u8;
        }
    }
    pub fn set_local_size(&mut self, local_size: [u32; 3]) {
        common_field!(self, args => args.local_size = local_size);
    }
    pub fn local_size(&self) -> [u32; 3] {
        match self {
            Self::V0(args) => args.local_size,
            Self::V1(args) => args.local_size,
            Self::V2(args) => args.v1.local_size,
        }
    }
    pub fn set_global_size(&mut self, global_size: [u64; 3]) {
        common_field!(self, args => args.global_size = global_size);
    }
    pub fn global_size(&self) -> [u64; 3] {
        match self {
            Self::V0(args) => args.global_size,
            Self::V1(args) => args.global_size,
            Self::V2(args) => args.v1.global_size,
        }
    }
    pub fn set_global_offset(&mut self, global_offset: [u64; 3]) {
        common_field!(self, args => args.global_offset = global_offset);
    }
    pub fn set_group_count(&mut self, group_count: [u32; 3]) {
        common_field!(self, args => args.group_count = group_count);
    }
    pub fn group_count(&self) -> [u32; 3] {
        match self {
            Self::V0(args) => args.group_count,
            Self::V1(args) => args.group_count,
            Self::V2(args) => args.v1.group_count,
        }
    }
    pub fn set_printf_buffer(&mut self, address: u64) {
        common_field!(self, args => args.printf_buffer_ptr = address);
    }
    pub fn set_local_id_table_ptr(&mut self, address: u64) {
        common_field!(self, args => args.local_id_table_ptr = address);
    }
    pub fn set_rt_global_buffer(&mut self, address: u64) {
        common_field!(self, args => args.rt_global_buffer_ptr = address);
    }
    pub fn rt_global_buffer(&self) -> u64 {
        match self {
            Self::V0(args) => args.rt_global_buffer_ptr,
            Self::V1(args) => args.rt_global_buffer_ptr,
            Self::V2(args) => args.v1.rt_global_buffer_ptr,
        }
    }
    pub fn set_assert_buffer(&mut self, address: u64) {
        common_field!(self, args => args.assert_buffer_ptr = address);
    }
    /// Ignored by V0.
    pub fn set_sync_buffer(&mut self, address: u64) {
        match self {
            Self::V0(_) => (),
            Self::V1(args) => args.sync_buffer_ptr = address,
            Self::V2(args) => args.v1.sync_buffer_ptr = address,
        }
    }
    pub fn sync_buffer(&self) -> Option<u64> {
        match self {
            Self::V0(_) => None,
            Self::V1(args) => Some(args.sync_buffer_ptr),
            Self::V2(args) => Some(args.v1.sync_buffer_ptr),
        }
    }
    pub fn set_scratch_ptr(&mut self, address: u64) {
        if let Self::V1(args) = self {
            args.scratch_ptr = address;
        }
    }
    pub fn set_enqueued_local_size(&mut self, size: [u32; 3]) {
        if let Self::V2(args) = self {
            args.enqueued_local_size = size;
        }
    }
    pub fn set_region_group_barrier(&mut self, address: u64) {
        if let Self::V2(args) = self {
            args.region_group_barrier_ptr = address;
        }
    }
    pub fn region_group_barrier(&self) -> Option<u64> {
        match self {
            Self::V2(args) => Some(args.region_group_barrier_ptr),
            _ => None,
        }
    }
}

/// Parameters of hardware local ID generation for a dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HwGenerationParams {
    pub hw_generates_local_ids: bool,
    pub walk_order: u32,
}

/// Register file facts of the target needed to size local ID tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImplicitArgsEnv {
    pub grf_size: u32,
}

impl Default for ImplicitArgsEnv {
    fn default() -> Self {
        Self { grf_size: 32 }
    }
}

pub const IMPLICIT_ARGS_ALIGNMENT: usize = CACHE_LINE_SIZE;

/// Order in which local IDs are laid out.
pub fn dimension_order_for_local_ids(
    workgroup_dim_order: [u8; 3],
    params: Option<HwGenerationParams>,
) -> [u8; 3] {
    match params {
        Some(params) if params.hw_generates_local_ids => WALK_ORDERS
            .get(params.walk_order as usize)
            .copied()
            .unwrap_or([0, 1, 2]),
        _ => workgroup_dim_order,
    }
}

pub fn grf_size(_simd: u32, env: &ImplicitArgsEnv) -> u32 {
    env.grf_size
}

/// Size of the struct alone, aligned for placement after the local ID table.
pub fn size_for_implicit_args_struct(
    implicit_args: Option<&ImplicitArgs>,
    _descriptor: &KernelDescriptor,
    _local_ids_generated_by_runtime: bool,
    _env: &ImplicitArgsEnv,
) -> usize {
    implicit_args.map_or(0, |args| align_up(args.size(), IMPLICIT_ARGS_ALIGNMENT))
}

fn local_ids_size(implicit_args: &ImplicitArgs, descriptor: &KernelDescriptor, env: &ImplicitArgsEnv) -> usize {
    let simd = descriptor.simd_size();
    let total = implicit_args.local_size().iter().product::<u32>();
    let size = local_id::per_thread_data_size_total(
        simd,
        grf_size(simd, env),
        local_id::NUM_CHANNELS_WITH_IMPLICIT_ARGS,
        total,
    );
    align_up(size as usize, CACHE_LINE_SIZE)
}

/// Bytes written by [`patch_implicit_args`].
pub fn size_for_implicit_args_patching(
    implicit_args: Option<&ImplicitArgs>,
    descriptor: &KernelDescriptor,
    local_ids_generated_by_runtime: bool,
    env: &ImplicitArgsEnv,
) -> usize {
    let Some(args) = implicit_args else {
        return 0;
    };
    let struct_size = size_for_implicit_args_struct(Some(args), descriptor, local_ids_generated_by_runtime, env);
    if local_ids_generated_by_runtime {
        local_ids_size(args, descriptor, env) + struct_size
    } else {
        struct_size
    }
}

/// Writes the runtime local ID table, when the hardware does not generate
/// local IDs, followed by the struct bytes.
///
/// Returns the offset of the struct inside `dst`, or `None` if `dst` is too
/// small.
pub fn patch_implicit_args(
    dst: &mut [u8],
    implicit_args: &ImplicitArgs,
    descriptor: &KernelDescriptor,
    hw_params: Option<HwGenerationParams>,
    env: &ImplicitArgsEnv,
) -> Option<usize> {
    let local_ids_by_runtime = !hw_params.map_or(false, |params| params.hw_generates_local_ids);
    let mut offset = 0;
    if local_ids_by_runtime {
        let simd = descriptor.simd_size();
        let size = local_ids_size(implicit_args, descriptor, env);
        let order = dimension_order_for_local_ids(
            descriptor.kernel_attributes.workgroup_dimensions_order,
            hw_params,
        );
        let table = dst.get_mut(..size)?;
        local_id::generate_local_ids(
            table,
            simd,
            implicit_args.local_size(),
            order,
            grf_size(simd, env),
            local_id::NUM_CHANNELS_WITH_IMPLICIT_ARGS,
        );
        offset = size;
    }
    let bytes = implicit_args.as_bytes();
    dst.get_mut(offset..offset + bytes.len())?.copy_from_slice(bytes);
    Some(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_match_offsets() {
        let mut args = ImplicitArgs::new(0);
        args.set_num_work_dim(3);
        args.set_simd_width(16);
        args.set_local_size([1, 2, 3]);
        args.set_group_count([4, 5, 6]);
        let bytes = args.as_bytes();
        assert_eq!(bytes[0], 128);
        assert_eq!(bytes[1], 0);
        assert_eq!(bytes[2], 3);
        assert_eq!(bytes[3], 16);
        assert_eq!(crate::mem::read_u32(bytes, 8), Some(2));
        assert_eq!(crate::mem::read_u32(bytes, GROUP_COUNT_OFFSET), Some(4));
        assert_eq!(bytes[NUM_WORK_DIM_OFFSET], 3);

        let mut v1 = ImplicitArgs::new(1);
        v1.set_simd_width(16);
        v1.set_scratch_ptr(0xABCD);
        assert_eq!(v1.as_bytes()[3], 0);
        assert_eq!(v1.scratch_ptr_offset(), Some(120));
        assert_eq!(crate::mem::read_u64(v1.as_bytes(), 120), Some(0xABCD));
        assert_eq!(args.scratch_ptr_offset(), None);

        let mut v2 = ImplicitArgs::new(2);
        v2.set_region_group_barrier(0x1000);
        assert_eq!(v2.size(), 256);
        assert_eq!(crate::mem::read_u64(v2.as_bytes(), 144), Some(0x1000));
        assert_eq!(v2.scratch_ptr_offset(), None);
    }

    #[test]
    fn dimension_order_selection() {
        let params = HwGenerationParams {
            hw_generates_local_ids: true,
            walk_order: 2,
        };
        assert_eq!(dimension_order_for_local_ids([2, 1, 0], Some(params)), [1, 0, 2]);
        assert_eq!(dimension_order_for_local_ids([2, 1, 0], None), [2, 1, 0]);
        let runtime = HwGenerationParams {
            hw_generates_local_ids: false,
            walk_order: 2,
        };
        assert_eq!(dimension_order_for_local_ids([2, 1, 0], Some(runtime)), [2, 1, 0]);
    }

    #[test]
    fn struct_is_placed_after_local_ids() {
        let mut desc = KernelDescriptor::default();
        desc.kernel_attributes.simd_size = 8;
        let mut args = ImplicitArgs::new(0);
        args.set_local_size([4, 4, 1]);
        let env = ImplicitArgsEnv::default();
        let size = size_for_implicit_args_patching(Some(&args), &desc, true, &env);
        // 2 threads * 3 channels * 32 bytes
        assert_eq!(size, 192 + 128);
        let mut dst = vec![0xFFu8; size];
        let offset = patch_implicit_args(&mut dst, &args, &desc, None, &env).unwrap();
        assert_eq!(offset, 192);
        assert_eq!(&dst[offset..], args.as_bytes());

        let hw = HwGenerationParams {
            hw_generates_local_ids: true,
            walk_order: 0,
        };
        assert_eq!(size_for_implicit_args_patching(Some(&args), &desc, false, &env), 128);
        assert_eq!(patch_implicit_args(&mut dst, &args, &desc, Some(hw), &env), Some(0));
        assert_eq!(size_for_implicit_args_patching(None, &desc, true, &env), 0);
    }

    #[test]
    fn short_destination_is_rejected() {
        let desc = KernelDescriptor::default();
        let args = ImplicitArgs::new(0);
        let mut dst = vec![0u8; 64];
        assert_eq!(patch_implicit_args(&mut dst, &args, &desc, None, &ImplicitArgsEnv::default()), None);
    }
}
