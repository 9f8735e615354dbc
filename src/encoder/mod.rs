/*!

Command encoders.

Encoders append commands to a [`LinearStream`](crate::stream::LinearStream)
or a [`CommandContainer`](crate::stream::CommandContainer) and return the
offsets of what they wrote, so callers can patch commands later. Every
encoder has a matching size function used for stream size estimates.
*/

pub mod dispatch;
pub mod implicit_scaling;
pub mod indirect;
pub mod math;
pub mod store;
pub mod sw_tags;

#[cfg(test)]
pub(crate) mod sim;

pub use dispatch::{encode_dispatch_kernel, DispatchArgs, DispatchOutput};
