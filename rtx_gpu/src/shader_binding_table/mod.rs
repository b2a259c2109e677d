//! Shader binding table layout and construction.
//!
//! The table is a fixed stride array of group handles: the raygen group,
//! then every hit group, then every miss group. The callable region is
//! always empty.

mod builder;
mod layout;
mod table;

pub use builder::ShaderBindingTableBuilder;
pub use layout::{ShaderBindingRegions, ShaderBindingTableLayout, StridedRegion};
pub use table::{DeviceAddressRegions, ShaderBindingTable};
