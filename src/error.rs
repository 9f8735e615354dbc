//! Result codes returned by the dispatch engine.

/// Failure of an API level operation.
///
/// Every variant maps onto a Level Zero result code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error, derive_more::IsVariant)]
pub enum ZeError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("group size does not match the kernel's required group size")]
    InvalidGroupSizeDimension,
    #[error("kernel binary requests unsupported resources")]
    InvalidNativeBinary,
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("unsupported image format")]
    UnsupportedImageFormat,
    #[error("invalid size")]
    InvalidSize,
    #[error("object is not initialized")]
    Uninitialized,
}

impl ZeError {
    /// Level Zero result code.
    pub fn code(self) -> u32 {
        match self {
            Self::Uninitialized => 0x7800_0001,
            Self::InvalidArgument => 0x7800_0004,
            Self::OutOfHostMemory => 0x7000_0002,
            Self::OutOfDeviceMemory => 0x7000_0003,
            Self::InvalidNativeBinary => 0x7800_0010,
            Self::InvalidSize => 0x7800_0008,
            Self::UnsupportedImageFormat => 0x7800_0014,
            Self::InvalidGroupSizeDimension => 0x7800_0017,
        }
    }
}
