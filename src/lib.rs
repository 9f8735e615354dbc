/*!

Kernel dispatch and command list encoding for Intel GPU compute engines.

A [`Kernel`](kernel::Kernel) is created from a [`Module`](module::Module)
and binds arguments into its cross-thread data. A
[`CommandList`](cmdlist::CommandList) encodes launches into a command stream
for one hardware generation ([`family`]), and a
[`CommandQueue`](cmdqueue::CommandQueue) assembles closed lists into a
submission.

```
# use neo_dispatch::{cmdlist::{CommandList, LaunchParams}, device::Device, family::XeHpcCore, module::Module};
# use neo_dispatch::neo_dispatch_core::descriptor::{KernelInfo, ProgramInfo};
# fn main() -> neo_dispatch::result::Result<()> {
let device = Device::builder().family::<XeHpcCore>().build()?;
let mut program = ProgramInfo::default();
let mut info = KernelInfo::default();
info.descriptor.kernel_metadata.kernel_name = "copy".into();
program.kernel_infos.push(info);
let module = Module::new(&device, program)?;
let mut kernel = module.create_kernel("copy")?;
kernel.set_group_size(16, 1, 1)?;
let mut list = CommandList::<XeHpcCore>::new(&device)?;
list.append_launch_kernel(&mut kernel, [4, 1, 1], None, &LaunchParams::default())?;
list.close()?;
# Ok(())
# }
```
*/

#![forbid(unsafe_op_in_unsafe_fn)]

pub use neo_dispatch_core;

pub mod result {
    pub type Result<T, E = crate::error::ZeError> = std::result::Result<T, E>;
}

pub mod cmdlist;
pub mod cmdqueue;
pub mod config;
pub mod device;
pub mod encoder;
pub mod error;
pub mod event;
pub mod family;
pub mod image;
pub mod kernel;
pub mod memory;
pub mod module;
pub mod stream;

#[cfg(test)]
mod implicit_args_tests {
    use crate::{
        device::Device,
        family::{Gen12Lp, GfxFamily, Xe3pCore, XeHpcCore},
        kernel::test_util::kernel_with,
    };
    use neo_dispatch_core::implicit_args::{self, HwGenerationParams, ImplicitArgsEnv};

    fn round_trip<F: GfxFamily>(simd: u8) {
        let device = Device::builder().family::<F>().build().unwrap();
        for (lws, groups) in [
            ([1, 1, 1], [1, 1, 1]),
            ([4, 3, 2], [2, 1, 5]),
            ([32, 1, 1], [3, 3, 1]),
            ([7, 5, 1], [1, 2, 1]),
        ] {
            let mut kernel = kernel_with(&device, |desc| {
                desc.kernel_attributes.simd_size = simd;
                desc.kernel_attributes.num_local_id_channels = 3;
                desc.kernel_attributes.flags.requires_implicit_args = true;
            });
            kernel.set_group_size(lws[0], lws[1], lws[2]).unwrap();
            kernel.set_group_count(groups[0], groups[1], groups[2]);
            let args = *kernel.implicit_args().unwrap();
            let env = ImplicitArgsEnv {
                grf_size: F::INFO.grf_size,
            };
            let runtime = kernel.requires_runtime_local_ids();
            let hw_params = Some(HwGenerationParams {
                hw_generates_local_ids: !runtime,
                walk_order: kernel.walk_order(),
            });
            let size = implicit_args::size_for_implicit_args_patching(
                Some(&args),
                kernel.descriptor(),
                runtime,
                &env,
            );
            let mut dst = vec![0u8; size];
            let offset =
                implicit_args::patch_implicit_args(&mut dst, &args, kernel.descriptor(), hw_params, &env)
                    .unwrap();
            assert_eq!(offset + args.size(), size);
            assert_eq!(&dst[size - args.size()..], args.as_bytes());
            assert_eq!(args.local_size(), lws);
            assert_eq!(args.group_count(), groups);
        }
    }

    macro_rules! impl_round_trip_test {
        ($name:ident, $family:ident, $simd:literal) => {
            paste::paste! {
                #[test]
                fn [<implicit_args_round_trip_ $name _simd $simd>]() {
                    round_trip::<$family>($simd);
                }
            }
        };
    }

    include!(concat!(
        env!("OUT_DIR"),
        "/implicit_args/implicit_args_round_trip_tests.in"
    ));
}
