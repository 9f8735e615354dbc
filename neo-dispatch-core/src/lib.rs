#![forbid(unsafe_op_in_unsafe_fn)]

pub use bytemuck;

pub mod descriptor;
pub mod hw;
pub mod implicit_args;
pub mod local_id;
pub mod mem;
