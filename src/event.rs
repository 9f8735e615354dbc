//! Events signaled by the GPU with a post sync write.
//!
//! An event owns a small tag allocation. Its first qword holds the state,
//! timestamp events append the context start and end timestamps.

use crate::{
    device::Device,
    memory::{AllocationType, GraphicsAllocation},
    result::Result,
};
use neo_dispatch_core::hw::cmds::PostSync;
use parking_lot::Mutex;
use std::sync::Arc;

/// A kernel that printed through the event's dispatch. Its buffer is read
/// back once the event completes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrintfKernel {
    pub name: String,
    pub buffer: Arc<GraphicsAllocation>,
}

#[derive(Debug)]
pub struct Event {
    device: Device,
    allocation: Arc<GraphicsAllocation>,
    timestamp: bool,
    printf_kernels: Mutex<Vec<PrintfKernel>>,
}

impl Event {
    pub const STATE_SIGNALED: u64 = 0;
    pub const STATE_CLEARED: u64 = u32::MAX as u64;
    const SIZE: u64 = 64;
    const CONTEXT_START_OFFSET: u64 = 8;
    const CONTEXT_END_OFFSET: u64 = 16;

    /// Creates a cleared event.
    ///
    /// **errors**
    /// - OutOfDeviceMemory if the tag allocation fails.
    pub fn new(device: &Device) -> Result<Self> {
        Self::with_timestamp(device, false)
    }
    /// Creates a cleared event whose completion is a context timestamp.
    pub fn new_timestamp(device: &Device) -> Result<Self> {
        Self::with_timestamp(device, true)
    }
    fn with_timestamp(device: &Device, timestamp: bool) -> Result<Self> {
        let allocation = device
            .memory_manager()
            .allocate(Self::SIZE, AllocationType::TagBuffer)?;
        let event = Self {
            device: device.clone(),
            allocation,
            timestamp,
            printf_kernels: Mutex::default(),
        };
        event.reset()?;
        Ok(event)
    }
    pub fn device(&self) -> &Device {
        &self.device
    }
    pub fn allocation(&self) -> &Arc<GraphicsAllocation> {
        &self.allocation
    }
    pub fn gpu_address(&self) -> u64 {
        self.allocation.gpu_address()
    }
    pub fn is_timestamp(&self) -> bool {
        self.timestamp
    }
    /// Address written when the event completes.
    pub fn completion_address(&self) -> u64 {
        if self.timestamp {
            self.gpu_address() + Self::CONTEXT_END_OFFSET
        } else {
            self.gpu_address()
        }
    }
    /// Post sync a walker performs to signal the event.
    pub fn post_sync(&self) -> PostSync {
        if self.timestamp {
            PostSync::Timestamp {
                address: self.completion_address(),
            }
        } else {
            PostSync::ImmediateData {
                address: self.completion_address(),
                data: Self::STATE_SIGNALED,
            }
        }
    }
    fn read_qword(&self, offset: u64) -> Result<u64> {
        let bytes = self.allocation.read(offset, 8)?;
        Ok(neo_dispatch_core::mem::read_u64(&bytes, 0).unwrap_or(Self::STATE_CLEARED))
    }
    /// Signals from the host.
    pub fn host_signal(&self) -> Result<()> {
        self.allocation.write(0, &Self::STATE_SIGNALED.to_le_bytes())?;
        if self.timestamp {
            self.allocation
                .write(Self::CONTEXT_END_OFFSET, &Self::STATE_SIGNALED.to_le_bytes())?;
        }
        Ok(())
    }
    /// Whether the event has been signaled.
    pub fn query_status(&self) -> Result<bool> {
        let state = self.read_qword(0)?;
        if self.timestamp {
            return Ok(state == Self::STATE_SIGNALED || self.read_qword(Self::CONTEXT_END_OFFSET)? != Self::STATE_CLEARED);
        }
        Ok(state == Self::STATE_SIGNALED)
    }
    /// Clears the state and forgets registered printf kernels.
    pub fn reset(&self) -> Result<()> {
        let cleared = Self::STATE_CLEARED.to_le_bytes();
        self.allocation.write(0, &cleared)?;
        if self.timestamp {
            self.allocation.write(Self::CONTEXT_START_OFFSET, &cleared)?;
            self.allocation.write(Self::CONTEXT_END_OFFSET, &cleared)?;
        }
        self.printf_kernels.lock().clear();
        Ok(())
    }
    pub(crate) fn register_printf_kernel(&self, name: &str, buffer: Arc<GraphicsAllocation>) {
        let mut kernels = self.printf_kernels.lock();
        if !kernels.iter().any(|kernel| kernel.buffer == buffer) {
            kernels.push(PrintfKernel {
                name: name.to_owned(),
                buffer,
            });
        }
    }
    /// Kernels whose printf output completes with this event.
    pub fn printf_kernels(&self) -> Vec<PrintfKernel> {
        self.printf_kernels.lock().clone()
    }
    /// Removes and returns the registered printf kernels, for reading back
    /// their output after completion.
    pub fn take_printf_kernels(&self) -> Vec<PrintfKernel> {
        std::mem::take(&mut *self.printf_kernels.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_signal_and_reset() {
        let device = Device::builder().build().unwrap();
        let event = Event::new(&device).unwrap();
        assert!(!event.query_status().unwrap());
        event.host_signal().unwrap();
        assert!(event.query_status().unwrap());
        event.reset().unwrap();
        assert!(!event.query_status().unwrap());
    }

    #[test]
    fn post_sync_targets_completion_address() {
        let device = Device::builder().build().unwrap();
        let event = Event::new(&device).unwrap();
        assert_eq!(
            event.post_sync(),
            PostSync::ImmediateData {
                address: event.gpu_address(),
                data: Event::STATE_SIGNALED,
            }
        );
        let timestamp = Event::new_timestamp(&device).unwrap();
        assert_eq!(
            timestamp.post_sync(),
            PostSync::Timestamp {
                address: timestamp.gpu_address() + 16,
            }
        );
        timestamp.host_signal().unwrap();
        assert!(timestamp.query_status().unwrap());
    }

    #[test]
    fn printf_kernels_are_registered_once() {
        let device = Device::builder().build().unwrap();
        let event = Event::new(&device).unwrap();
        let buffer = device
            .memory_manager()
            .allocate(4096, AllocationType::PrintfSurface)
            .unwrap();
        event.register_printf_kernel("print", buffer.clone());
        event.register_printf_kernel("print", buffer.clone());
        assert_eq!(event.printf_kernels().len(), 1);
        assert_eq!(event.take_printf_kernels()[0].name, "print");
        assert!(event.printf_kernels().is_empty());
        event.register_printf_kernel("print", buffer);
        event.reset().unwrap();
        assert!(event.printf_kernels().is_empty());
    }

    #[test]
    fn tag_allocation_failure() {
        let device = Device::builder().build().unwrap();
        device.memory_manager().inject_failure(AllocationType::TagBuffer);
        assert!(Event::new(&device).is_err());
    }
}
