/*!

Images and samplers.

An [`Image`] owns its allocation and, once bound to a bindless argument, a
slot in the device's surface state heap. A view created with
[`Image::create_view`] shares the allocation of its parent but always gets
a slot of its own.
*/

use crate::{
    device::{BindlessHeapType, Device, SurfaceStateSlot},
    error::ZeError,
    memory::{AllocationType, GraphicsAllocation},
    result::Result,
};
use neo_dispatch_core::{
    hw::cmds::{RenderSurfaceState, SamplerState},
    mem::align_up,
};
use once_cell::sync::OnceCell;
use std::{fmt, sync::Arc};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::Display, derive_more::IsVariant)]
pub enum ImageType {
    Image1D,
    Image1DArray,
    Image2D,
    Image2DArray,
    Image3D,
    ImageBuffer,
}

impl ImageType {
    fn surface_type(self) -> u32 {
        match self {
            Self::Image1D | Self::Image1DArray => RenderSurfaceState::SURFACE_TYPE_1D,
            Self::Image2D | Self::Image2DArray => RenderSurfaceState::SURFACE_TYPE_2D,
            Self::Image3D => RenderSurfaceState::SURFACE_TYPE_3D,
            Self::ImageBuffer => RenderSurfaceState::SURFACE_TYPE_BUFFER,
        }
    }
    fn is_array(self) -> bool {
        matches!(self, Self::Image1DArray | Self::Image2DArray)
    }
}

/// Channel layout of an image format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormatLayout {
    R8,
    R8G8,
    R8G8B8A8,
    R16,
    R16G16B16A16,
    R32,
    R32G32,
    R32G32B32A32,
    /// Planar luma and interleaved chroma, two dimensional only.
    Nv12,
}

impl FormatLayout {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8 | Self::Nv12 => 1,
            Self::R8G8 | Self::R16 => 2,
            Self::R8G8B8A8 | Self::R32 => 4,
            Self::R16G16B16A16 | Self::R32G32 => 8,
            Self::R32G32B32A32 => 16,
        }
    }
    /// Channel order code written into image metadata.
    pub fn channel_order(self) -> u32 {
        match self {
            Self::R8 | Self::R16 | Self::R32 => 0x10B0,
            Self::R8G8 | Self::R32G32 => 0x10B2,
            Self::R8G8B8A8 | Self::R16G16B16A16 | Self::R32G32B32A32 => 0x10B5,
            Self::Nv12 => 0x410E,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormatType {
    Unorm,
    Snorm,
    Uint,
    Sint,
    Float,
}

/// Channel data type codes written into image metadata.
fn channel_data_type(layout: FormatLayout, ty: FormatType) -> u32 {
    let width = match layout {
        FormatLayout::R8 | FormatLayout::R8G8 | FormatLayout::R8G8B8A8 | FormatLayout::Nv12 => 8,
        FormatLayout::R16 | FormatLayout::R16G16B16A16 => 16,
        FormatLayout::R32 | FormatLayout::R32G32 | FormatLayout::R32G32B32A32 => 32,
    };
    match (ty, width) {
        (FormatType::Snorm, 8) => 0x10D0,
        (FormatType::Snorm, _) => 0x10D1,
        (FormatType::Unorm, 8) => 0x10D2,
        (FormatType::Unorm, _) => 0x10D3,
        (FormatType::Sint, 8) => 0x10D7,
        (FormatType::Sint, 16) => 0x10D8,
        (FormatType::Sint, _) => 0x10D9,
        (FormatType::Uint, 8) => 0x10DA,
        (FormatType::Uint, 16) => 0x10DB,
        (FormatType::Uint, _) => 0x10DC,
        (FormatType::Float, 16) => 0x10DD,
        (FormatType::Float, _) => 0x10DE,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageFormat {
    pub layout: FormatLayout,
    pub ty: FormatType,
}

impl Default for ImageFormat {
    fn default() -> Self {
        Self {
            layout: FormatLayout::R8G8B8A8,
            ty: FormatType::Unorm,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub ty: ImageType,
    pub format: ImageFormat,
    pub width: u64,
    pub height: u32,
    pub depth: u32,
    pub array_levels: u32,
    pub mip_levels: u32,
    pub samples: u32,
}

impl Default for ImageDesc {
    fn default() -> Self {
        Self {
            ty: ImageType::Image2D,
            format: ImageFormat::default(),
            width: 1,
            height: 1,
            depth: 1,
            array_levels: 0,
            mip_levels: 0,
            samples: 0,
        }
    }
}

impl ImageDesc {
    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(ZeError::InvalidSize);
        }
        if self.format.layout == FormatLayout::Nv12 && self.ty != ImageType::Image2D {
            return Err(ZeError::UnsupportedImageFormat);
        }
        Ok(())
    }
}

/// Values patched into cross-thread data for a bindful image argument.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_size: u32,
    pub num_samples: u32,
    pub num_mip_levels: u32,
    pub channel_data_type: u32,
    pub channel_order: u32,
    pub flat_base_offset: u64,
    /// `width * bytes_per_pixel - 1`, likewise for the height.
    pub flat_width: u32,
    pub flat_height: u32,
    pub flat_pitch: u32,
}

struct ImageInner {
    device: Device,
    desc: ImageDesc,
    allocation: Arc<GraphicsAllocation>,
    row_pitch: u64,
    slice_pitch: u64,
    parent: Option<Image>,
    bindless_slot: OnceCell<SurfaceStateSlot>,
}

#[derive(Clone)]
pub struct Image {
    inner: Arc<ImageInner>,
}

impl Image {
    /// Surface states per bindless slot: the image and its redescribed form.
    pub const SURFACE_STATES_PER_SLOT: u32 = 2;
    const ROW_PITCH_ALIGNMENT: u64 = 64;

    pub fn new(device: &Device, desc: ImageDesc) -> Result<Self> {
        desc.validate()?;
        let row_pitch = align_up(
            desc.width * u64::from(desc.format.layout.bytes_per_pixel()),
            Self::ROW_PITCH_ALIGNMENT,
        );
        let slice_pitch = row_pitch * u64::from(desc.height);
        let mut size = slice_pitch * u64::from(desc.depth.max(desc.array_levels).max(1));
        if desc.format.layout == FormatLayout::Nv12 {
            size += size / 2;
        }
        let allocation = device.memory_manager().allocate(size, AllocationType::Image)?;
        Ok(Self {
            inner: Arc::new(ImageInner {
                device: device.clone(),
                desc,
                allocation,
                row_pitch,
                slice_pitch,
                parent: None,
                bindless_slot: OnceCell::new(),
            }),
        })
    }
    /// A view reinterpreting this image with `desc`. The view shares the
    /// allocation but never the bindless slot.
    pub fn create_view(&self, desc: ImageDesc) -> Result<Self> {
        desc.validate()?;
        Ok(Self {
            inner: Arc::new(ImageInner {
                device: self.inner.device.clone(),
                desc,
                allocation: self.inner.allocation.clone(),
                row_pitch: self.inner.row_pitch,
                slice_pitch: self.inner.slice_pitch,
                parent: Some(self.clone()),
                bindless_slot: OnceCell::new(),
            }),
        })
    }
    pub fn desc(&self) -> &ImageDesc {
        &self.inner.desc
    }
    pub fn allocation(&self) -> &Arc<GraphicsAllocation> {
        &self.inner.allocation
    }
    pub fn row_pitch(&self) -> u64 {
        self.inner.row_pitch
    }
    pub fn slice_pitch(&self) -> u64 {
        self.inner.slice_pitch
    }
    pub fn is_view(&self) -> bool {
        self.inner.parent.is_some()
    }
    pub fn parent(&self) -> Option<&Image> {
        self.inner.parent.as_ref()
    }
    pub fn metadata(&self) -> ImageMetadata {
        let desc = &self.inner.desc;
        let bpp = desc.format.layout.bytes_per_pixel();
        ImageMetadata {
            width: desc.width as u32,
            height: desc.height,
            depth: desc.depth,
            array_size: desc.array_levels,
            num_samples: desc.samples,
            num_mip_levels: desc.mip_levels,
            channel_data_type: channel_data_type(desc.format.layout, desc.format.ty),
            channel_order: desc.format.layout.channel_order(),
            flat_base_offset: self.inner.allocation.gpu_address(),
            flat_width: (desc.width as u32 * bpp).saturating_sub(1),
            flat_height: (desc.height * bpp).saturating_sub(1),
            flat_pitch: (self.inner.row_pitch as u32).saturating_sub(1),
        }
    }
    /// Surface state of the image. The redescribed form addresses the same
    /// memory as single channel 32 bit texels.
    pub fn surface_state(&self, redescribed: bool) -> RenderSurfaceState {
        let desc = &self.inner.desc;
        let mut state = RenderSurfaceState::default();
        let width = if redescribed {
            let bytes = desc.width * u64::from(desc.format.layout.bytes_per_pixel());
            (bytes / 4).max(1)
        } else {
            desc.width
        };
        state
            .set_surface_type(desc.ty.surface_type())
            .set_width((width as u32).saturating_sub(1))
            .set_height(desc.height.saturating_sub(1))
            .set_depth(desc.depth.max(desc.array_levels).saturating_sub(1))
            .set_surface_pitch((self.inner.row_pitch as u32).saturating_sub(1))
            .set_mip_count_lod(desc.mip_levels)
            .set_surface_base_address(self.inner.allocation.gpu_address());
        if redescribed {
            state.set_surface_format(RenderSurfaceState::SURFACE_FORMAT_R32_UINT);
        }
        if desc.ty.is_array() {
            state.set_surface_q_pitch((self.inner.slice_pitch as u32) >> 2);
        }
        state
    }
    /// Reserves this image's bindless slot and writes its surface states.
    /// Later calls return the same slot.
    ///
    /// **errors**
    /// - OutOfHostMemory if the heap is exhausted. The slot stays unset.
    pub fn allocate_bindless_slot(&self) -> Result<SurfaceStateSlot> {
        self.inner
            .bindless_slot
            .get_or_try_init(|| {
                let device = &self.inner.device;
                let state_size = device.family().surface_state_size;
                let helper = device.bindless_heaps_helper();
                let slot = helper
                    .allocate_ss_in_heap(state_size * Self::SURFACE_STATES_PER_SLOT, BindlessHeapType::GlobalSsh)?;
                let mut states = Vec::with_capacity(slot.size as usize);
                states.extend_from_slice(bytemuck::bytes_of(&self.surface_state(false)));
                states.extend_from_slice(bytemuck::bytes_of(&self.surface_state(true)));
                helper.write_state(&slot, &states)?;
                tracing::trace!(offset = slot.surface_state_offset, view = self.is_view(), "image bindless slot");
                Ok(slot)
            })
            .copied()
    }
    pub fn bindless_slot(&self) -> Option<SurfaceStateSlot> {
        self.inner.bindless_slot.get().copied()
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("desc", &self.inner.desc)
            .field("allocation", &self.inner.allocation)
            .field("is_view", &self.is_view())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    #[default]
    None,
    ClampToEdge,
    Clamp,
    Repeat,
    Mirror,
}

impl AddressingMode {
    /// Code written into sampler metadata.
    pub fn code(self) -> u32 {
        match self {
            Self::None => 0x1130,
            Self::ClampToEdge => 0x1131,
            Self::Clamp => 0x1132,
            Self::Repeat => 0x1133,
            Self::Mirror => 0x1134,
        }
    }
    fn hw_mode(self) -> u32 {
        match self {
            Self::Repeat => 0,
            Self::Mirror => 1,
            Self::ClampToEdge | Self::None => 2,
            Self::Clamp => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerDesc {
    pub addressing_mode: AddressingMode,
    pub filter_mode: FilterMode,
    pub normalized_coordinates: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sampler {
    desc: SamplerDesc,
}

impl Sampler {
    pub fn new(desc: SamplerDesc) -> Self {
        Self { desc }
    }
    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }
    /// Set for clamped nearest sampling, which needs coordinate snapping.
    pub fn snap_wa(&self) -> u32 {
        u32::from(self.desc.addressing_mode == AddressingMode::Clamp && self.desc.filter_mode == FilterMode::Nearest)
    }
    pub fn sampler_state(&self) -> SamplerState {
        let mut state = SamplerState::default();
        let filter = match self.desc.filter_mode {
            FilterMode::Nearest => 0,
            FilterMode::Linear => 1,
        };
        let mode = self.desc.addressing_mode.hw_mode();
        state
            .set_min_mode_filter(filter)
            .set_mag_mode_filter(filter)
            .set_tcx_address_control_mode(mode)
            .set_tcy_address_control_mode(mode)
            .set_tcz_address_control_mode(mode)
            .set_non_normalized_coordinate_enable(u32::from(!self.desc.normalized_coordinates));
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_2d(device: &Device) -> Image {
        Image::new(
            device,
            ImageDesc {
                width: 10,
                height: 4,
                ..ImageDesc::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn metadata_flat_sizes() {
        let device = Device::builder().build().unwrap();
        let image = image_2d(&device);
        let metadata = image.metadata();
        assert_eq!(metadata.flat_width, 10 * 4 - 1);
        assert_eq!(metadata.flat_height, 4 * 4 - 1);
        assert_eq!(metadata.flat_pitch, 63);
        assert_eq!(metadata.flat_base_offset, image.allocation().gpu_address());
        assert_eq!(metadata.channel_data_type, 0x10D2);
    }

    #[test]
    fn view_gets_its_own_slot() {
        let device = Device::builder().build().unwrap();
        let image = image_2d(&device);
        let view = image.create_view(*image.desc()).unwrap();
        assert!(view.is_view());
        assert_eq!(view.allocation(), image.allocation());
        let parent_slot = image.allocate_bindless_slot().unwrap();
        let view_slot = view.allocate_bindless_slot().unwrap();
        assert_ne!(parent_slot.surface_state_offset, view_slot.surface_state_offset);
        assert_eq!(view.allocate_bindless_slot().unwrap(), view_slot);
    }

    #[test]
    fn exhausted_heap_leaves_slot_unset() {
        let settings = crate::config::DebugSettings {
            bindless_heap_size: 64,
            ..Default::default()
        };
        let device = Device::builder().settings(settings).build().unwrap();
        let image = image_2d(&device);
        assert_eq!(image.allocate_bindless_slot(), Err(ZeError::OutOfHostMemory));
        assert_eq!(image.bindless_slot(), None);
    }

    #[test]
    fn planar_formats_are_two_dimensional() {
        let device = Device::builder().build().unwrap();
        let desc = ImageDesc {
            ty: ImageType::Image3D,
            format: ImageFormat {
                layout: FormatLayout::Nv12,
                ty: FormatType::Unorm,
            },
            ..ImageDesc::default()
        };
        assert_eq!(Image::new(&device, desc).unwrap_err(), ZeError::UnsupportedImageFormat);
    }

    #[test]
    fn sampler_state_encodes_desc() {
        let sampler = Sampler::new(SamplerDesc {
            addressing_mode: AddressingMode::Clamp,
            filter_mode: FilterMode::Nearest,
            normalized_coordinates: false,
        });
        assert_eq!(sampler.snap_wa(), 1);
        let state = sampler.sampler_state();
        assert_eq!(state.tcx_address_control_mode(), 4);
        assert_eq!(state.non_normalized_coordinate_enable(), 1);
    }
}
