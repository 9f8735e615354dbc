/*!

Compiled kernel metadata.

A [`KernelDescriptor`] describes where the runtime must write each argument,
implicit value and dispatch trait inside the kernel's cross-thread data. It
is produced by the compiler and never mutated by the dispatch path.

```
# use neo_dispatch_core::descriptor::{KernelDescriptor, is_valid_offset};
let desc = KernelDescriptor::default();
assert!(!is_valid_offset(desc.payload_mappings.dispatch_traits.work_dim));
```
*/

use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type CrossThreadDataOffset = u16;
pub type SurfaceStateHeapOffset = u16;
pub type DynamicStateHeapOffset = u16;

pub const UNDEFINED_OFFSET: u16 = u16::MAX;

pub const fn is_valid_offset(offset: u16) -> bool {
    offset != UNDEFINED_OFFSET
}

pub const fn is_undefined_offset(offset: u16) -> bool {
    offset == UNDEFINED_OFFSET
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressQualifier {
    #[default]
    Unknown,
    Global,
    Constant,
    Local,
    Private,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgDescPointer {
    pub bindful: SurfaceStateHeapOffset,
    pub stateless: CrossThreadDataOffset,
    pub bindless: CrossThreadDataOffset,
    pub buffer_offset: CrossThreadDataOffset,
    pub slm_offset: CrossThreadDataOffset,
    pub required_slm_alignment: u8,
    pub pointer_size: u8,
    pub address_qualifier: AddressQualifier,
}

impl Default for ArgDescPointer {
    fn default() -> Self {
        Self {
            bindful: UNDEFINED_OFFSET,
            stateless: UNDEFINED_OFFSET,
            bindless: UNDEFINED_OFFSET,
            buffer_offset: UNDEFINED_OFFSET,
            slm_offset: UNDEFINED_OFFSET,
            required_slm_alignment: 0,
            pointer_size: 8,
            address_qualifier: AddressQualifier::Global,
        }
    }
}

impl ArgDescPointer {
    pub fn stateless(offset: CrossThreadDataOffset) -> Self {
        Self {
            stateless: offset,
            ..Self::default()
        }
    }
    pub fn is_pure_stateful(&self) -> bool {
        is_undefined_offset(self.stateless)
    }
    pub fn is_local(&self) -> bool {
        self.address_qualifier == AddressQualifier::Local
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadataPayload {
    pub img_width: CrossThreadDataOffset,
    pub img_height: CrossThreadDataOffset,
    pub img_depth: CrossThreadDataOffset,
    pub channel_data_type: CrossThreadDataOffset,
    pub channel_order: CrossThreadDataOffset,
    pub array_size: CrossThreadDataOffset,
    pub num_samples: CrossThreadDataOffset,
    pub num_mip_levels: CrossThreadDataOffset,
    pub flat_base_offset: CrossThreadDataOffset,
    pub flat_width: CrossThreadDataOffset,
    pub flat_height: CrossThreadDataOffset,
    pub flat_pitch: CrossThreadDataOffset,
}

impl Default for ImageMetadataPayload {
    fn default() -> Self {
        Self {
            img_width: UNDEFINED_OFFSET,
            img_height: UNDEFINED_OFFSET,
            img_depth: UNDEFINED_OFFSET,
            channel_data_type: UNDEFINED_OFFSET,
            channel_order: UNDEFINED_OFFSET,
            array_size: UNDEFINED_OFFSET,
            num_samples: UNDEFINED_OFFSET,
            num_mip_levels: UNDEFINED_OFFSET,
            flat_base_offset: UNDEFINED_OFFSET,
            flat_width: UNDEFINED_OFFSET,
            flat_height: UNDEFINED_OFFSET,
            flat_pitch: UNDEFINED_OFFSET,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgDescImage {
    pub bindful: SurfaceStateHeapOffset,
    pub bindless: CrossThreadDataOffset,
    pub metadata_payload: ImageMetadataPayload,
}

impl Default for ArgDescImage {
    fn default() -> Self {
        Self {
            bindful: UNDEFINED_OFFSET,
            bindless: UNDEFINED_OFFSET,
            metadata_payload: ImageMetadataPayload::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerMetadataPayload {
    pub sampler_snap_wa: CrossThreadDataOffset,
    pub sampler_addressing_mode: CrossThreadDataOffset,
    pub sampler_normalized_coords: CrossThreadDataOffset,
}

impl Default for SamplerMetadataPayload {
    fn default() -> Self {
        Self {
            sampler_snap_wa: UNDEFINED_OFFSET,
            sampler_addressing_mode: UNDEFINED_OFFSET,
            sampler_normalized_coords: UNDEFINED_OFFSET,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgDescSampler {
    pub bindful: DynamicStateHeapOffset,
    pub bindless: CrossThreadDataOffset,
    /// Position of the sampler state in the kernel's sampler table.
    pub index: u8,
    pub size: u8,
    pub metadata_payload: SamplerMetadataPayload,
}

impl Default for ArgDescSampler {
    fn default() -> Self {
        Self {
            bindful: UNDEFINED_OFFSET,
            bindless: UNDEFINED_OFFSET,
            index: 0,
            size: 16,
            metadata_payload: SamplerMetadataPayload::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgDescValueElement {
    pub offset: CrossThreadDataOffset,
    pub size: u16,
    pub source_offset: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgDescValue {
    pub elements: Vec<ArgDescValueElement>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, derive_more::IsVariant)]
pub enum ArgDescriptor {
    Pointer(ArgDescPointer),
    Image(ArgDescImage),
    Sampler(ArgDescSampler),
    Value(ArgDescValue),
    Unknown,
}

impl ArgDescriptor {
    pub fn as_pointer(&self) -> Option<&ArgDescPointer> {
        match self {
            Self::Pointer(arg) => Some(arg),
            _ => None,
        }
    }
    pub fn as_image(&self) -> Option<&ArgDescImage> {
        match self {
            Self::Image(arg) => Some(arg),
            _ => None,
        }
    }
    pub fn as_sampler(&self) -> Option<&ArgDescSampler> {
        match self {
            Self::Sampler(arg) => Some(arg),
            _ => None,
        }
    }
    pub fn as_value(&self) -> Option<&ArgDescValue> {
        match self {
            Self::Value(arg) => Some(arg),
            _ => None,
        }
    }
    /// Cross-thread-data offset of the bindless handle, if the argument is
    /// addressed through one.
    pub fn bindless_offset(&self) -> Option<CrossThreadDataOffset> {
        let offset = match self {
            Self::Pointer(arg) => arg.bindless,
            Self::Image(arg) => arg.bindless,
            Self::Sampler(arg) => arg.bindless,
            Self::Value(_) | Self::Unknown => UNDEFINED_OFFSET,
        };
        is_valid_offset(offset).then_some(offset)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTraits {
    pub global_work_offset: [CrossThreadDataOffset; 3],
    pub global_work_size: [CrossThreadDataOffset; 3],
    pub local_work_size: [CrossThreadDataOffset; 3],
    pub local_work_size2: [CrossThreadDataOffset; 3],
    pub enqueued_local_work_size: [CrossThreadDataOffset; 3],
    pub num_work_groups: [CrossThreadDataOffset; 3],
    pub work_dim: CrossThreadDataOffset,
}

impl Default for DispatchTraits {
    fn default() -> Self {
        let undefined = [UNDEFINED_OFFSET; 3];
        Self {
            global_work_offset: undefined,
            global_work_size: undefined,
            local_work_size: undefined,
            local_work_size2: undefined,
            enqueued_local_work_size: undefined,
            num_work_groups: undefined,
            work_dim: UNDEFINED_OFFSET,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplicitArgsPayload {
    pub printf_surface_address: ArgDescPointer,
    pub global_variables_surface_address: ArgDescPointer,
    pub global_constants_surface_address: ArgDescPointer,
    pub private_memory_address: ArgDescPointer,
    pub sync_buffer_address: ArgDescPointer,
    pub region_group_barrier_buffer: ArgDescPointer,
    pub rt_dispatch_globals: ArgDescPointer,
    /// Scratch base written at submission on heapless targets.
    pub scratch_pointer_address: ArgDescPointer,
    pub implicit_args_buffer: CrossThreadDataOffset,
    pub simd_size: CrossThreadDataOffset,
}

impl Default for ImplicitArgsPayload {
    fn default() -> Self {
        Self {
            printf_surface_address: ArgDescPointer::default(),
            global_variables_surface_address: ArgDescPointer::default(),
            global_constants_surface_address: ArgDescPointer::default(),
            private_memory_address: ArgDescPointer::default(),
            sync_buffer_address: ArgDescPointer::default(),
            region_group_barrier_buffer: ArgDescPointer::default(),
            rt_dispatch_globals: ArgDescPointer::default(),
            scratch_pointer_address: ArgDescPointer::default(),
            implicit_args_buffer: UNDEFINED_OFFSET,
            simd_size: UNDEFINED_OFFSET,
        }
    }
}

impl ImplicitArgsPayload {
    /// Implicit surfaces that may carry a bindless handle.
    pub fn surfaces(&self) -> [&ArgDescPointer; 5] {
        [
            &self.global_constants_surface_address,
            &self.global_variables_surface_address,
            &self.private_memory_address,
            &self.printf_surface_address,
            &self.rt_dispatch_globals,
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingTable {
    pub table_offset: SurfaceStateHeapOffset,
    pub num_entries: u8,
}

impl Default for BindingTable {
    fn default() -> Self {
        Self {
            table_offset: UNDEFINED_OFFSET,
            num_entries: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerTable {
    pub table_offset: DynamicStateHeapOffset,
    pub num_samplers: u8,
}

impl Default for SamplerTable {
    fn default() -> Self {
        Self {
            table_offset: UNDEFINED_OFFSET,
            num_samplers: 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMappings {
    pub explicit_args: Vec<ArgDescriptor>,
    pub implicit_args: ImplicitArgsPayload,
    pub dispatch_traits: DispatchTraits,
    pub binding_table: BindingTable,
    pub sampler_table: SamplerTable,
}

/// Thread scheduling preference of a kernel, in the hardware's encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadArbitrationPolicy {
    #[default]
    NotPresent,
    AgeBased,
    RoundRobin,
    RoundRobinAfterDependency,
}

impl ThreadArbitrationPolicy {
    /// Stream-property encoding, `-1` when not present.
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::NotPresent => -1,
            Self::AgeBased => 0,
            Self::RoundRobin => 1,
            Self::RoundRobinAfterDependency => 2,
        }
    }
    pub const fn from_i32(value: i32) -> Self {
        match value {
            0 => Self::AgeBased,
            1 => Self::RoundRobin,
            2 => Self::RoundRobinAfterDependency,
            _ => Self::NotPresent,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelFlags {
    pub requires_implicit_args: bool,
    pub uses_printf: bool,
    pub uses_sync_buffer: bool,
    pub uses_region_group_barrier: bool,
    pub has_rt_calls: bool,
    pub is_invalid: bool,
    pub pass_inline_data: bool,
    pub requires_workgroup_order: bool,
    pub uses_barriers: bool,
    pub uses_images: bool,
    pub uses_stack_calls: bool,
    pub use_stack_calls_printf: bool,
    pub requires_disabled_eu_fusion: bool,
    pub has_indirect_stateless_access: bool,
    pub uses_assert: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelAttributes {
    pub simd_size: u8,
    pub num_grf_required: u16,
    pub cross_thread_data_size: u16,
    pub inline_data_payload_size: u16,
    pub per_thread_data_size: u16,
    pub per_hw_thread_private_memory_size: u32,
    pub per_thread_scratch_size: [u32; 2],
    pub spill_fill_buffer_size: u32,
    pub slm_inline_size: u32,
    pub barrier_count: u8,
    pub num_local_id_channels: u8,
    pub required_workgroup_size: [u16; 3],
    pub workgroup_walk_order: [u8; 3],
    pub workgroup_dimensions_order: [u8; 3],
    pub thread_arbitration_policy: ThreadArbitrationPolicy,
    pub flags: KernelFlags,
}

impl Default for KernelAttributes {
    fn default() -> Self {
        Self {
            simd_size: 8,
            num_grf_required: 128,
            cross_thread_data_size: 0,
            inline_data_payload_size: 0,
            per_thread_data_size: 0,
            per_hw_thread_private_memory_size: 0,
            per_thread_scratch_size: [0; 2],
            spill_fill_buffer_size: 0,
            slm_inline_size: 0,
            barrier_count: 0,
            num_local_id_channels: 0,
            required_workgroup_size: [0; 3],
            workgroup_walk_order: [0, 1, 2],
            workgroup_dimensions_order: [0, 1, 2],
            thread_arbitration_policy: ThreadArbitrationPolicy::NotPresent,
            flags: KernelFlags::default(),
        }
    }
}

impl KernelAttributes {
    pub const LARGE_GRF_COUNT: u16 = 256;

    pub fn uses_large_grf(&self) -> bool {
        self.num_grf_required >= Self::LARGE_GRF_COUNT
    }
    pub fn has_required_workgroup_size(&self) -> bool {
        self.required_workgroup_size[0] > 0
    }
    pub fn required_workgroup_size(&self) -> Option<[u32; 3]> {
        self.has_required_workgroup_size()
            .then(|| self.required_workgroup_size.map(u32::from))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelMetadata {
    pub kernel_name: String,
    pub kernel_language_attributes: String,
    pub required_sub_group_size: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelDescriptor {
    pub kernel_metadata: KernelMetadata,
    pub kernel_attributes: KernelAttributes,
    pub payload_mappings: PayloadMappings,
    /// Maps the cross-thread-data offset of a bindless handle to the index
    /// of its surface state in the kernel's surface state heap.
    pub bindless_offset_to_surface_state: BTreeMap<CrossThreadDataOffset, u32>,
}

impl KernelDescriptor {
    pub fn from_bincode(bytes: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(bytes)
    }
    pub fn to_bincode(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }
    pub fn name(&self) -> &str {
        &self.kernel_metadata.kernel_name
    }
    pub fn flags(&self) -> &KernelFlags {
        &self.kernel_attributes.flags
    }
    pub fn simd_size(&self) -> u32 {
        u32::from(self.kernel_attributes.simd_size)
    }
    /// True when any explicit argument or implicit surface is addressed
    /// through a bindless handle.
    pub fn uses_bindless_addressing(&self) -> bool {
        self.payload_mappings
            .explicit_args
            .iter()
            .any(|arg| arg.bindless_offset().is_some())
            || self
                .payload_mappings
                .implicit_args
                .surfaces()
                .iter()
                .any(|arg| is_valid_offset(arg.bindless))
    }
}

/// A compiled kernel with its heap templates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelInfo {
    pub descriptor: KernelDescriptor,
    pub isa: Vec<u8>,
    pub surface_state_heap: Vec<u8>,
    pub dynamic_state_heap: Vec<u8>,
    pub cross_thread_data: Option<Vec<u8>>,
}

/// Everything a module is created from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramInfo {
    pub kernel_infos: Vec<KernelInfo>,
    pub global_constants: Vec<u8>,
    pub global_variables: Vec<u8>,
}

impl ProgramInfo {
    pub fn from_bincode(bytes: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(bytes)
    }
    pub fn to_bincode(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }
}

/// Writes `value` at `offset` unless the offset is undefined or out of range.
pub fn patch_non_pointer<T: Pod>(dst: &mut [u8], offset: CrossThreadDataOffset, value: T) {
    if is_valid_offset(offset) {
        crate::mem::patch_bytes(dst, usize::from(offset), bytemuck::bytes_of(&value));
    }
}

pub fn patch_vec_non_pointer(dst: &mut [u8], offsets: [CrossThreadDataOffset; 3], values: [u32; 3]) {
    for (offset, value) in offsets.into_iter().zip(values) {
        patch_non_pointer(dst, offset, value);
    }
}

/// Writes a pointer of the argument's declared size at its stateless offset.
pub fn patch_pointer(dst: &mut [u8], arg: &ArgDescPointer, value: u64) {
    if arg.pointer_size == 4 {
        patch_non_pointer(dst, arg.stateless, value as u32);
    } else {
        patch_non_pointer(dst, arg.stateless, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_offsets_are_not_patched() {
        let mut ctd = vec![0xAAu8; 16];
        patch_non_pointer(&mut ctd, UNDEFINED_OFFSET, 5u32);
        assert!(ctd.iter().all(|b| *b == 0xAA));
        patch_vec_non_pointer(&mut ctd, [0, 4, UNDEFINED_OFFSET], [1, 2, 3]);
        assert_eq!(&ctd[..8], &[1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(&ctd[8..], &[0xAA; 8]);
    }

    #[test]
    fn pointer_size_selects_patch_width() {
        let mut ctd = vec![0u8; 16];
        let mut arg = ArgDescPointer::stateless(0);
        arg.pointer_size = 4;
        patch_pointer(&mut ctd, &arg, 0x1_2345_6789);
        assert_eq!(&ctd[..8], &[0x89, 0x67, 0x45, 0x23, 0, 0, 0, 0]);
        arg.pointer_size = 8;
        patch_pointer(&mut ctd, &arg, 0x1_2345_6789);
        assert_eq!(&ctd[..8], &[0x89, 0x67, 0x45, 0x23, 1, 0, 0, 0]);
    }

    #[test]
    fn descriptor_survives_bincode() {
        let mut desc = KernelDescriptor::default();
        desc.kernel_metadata.kernel_name = "test".into();
        desc.kernel_attributes.simd_size = 16;
        desc.payload_mappings
            .explicit_args
            .push(ArgDescriptor::Pointer(ArgDescPointer::stateless(8)));
        desc.bindless_offset_to_surface_state.insert(32, 1);
        let bytes = desc.to_bincode().unwrap();
        assert_eq!(KernelDescriptor::from_bincode(&bytes).unwrap(), desc);
    }

    #[test]
    fn bindless_addressing_detection() {
        let mut desc = KernelDescriptor::default();
        assert!(!desc.uses_bindless_addressing());
        desc.payload_mappings.implicit_args.global_constants_surface_address.bindless = 0x40;
        assert!(desc.uses_bindless_addressing());
    }
}
