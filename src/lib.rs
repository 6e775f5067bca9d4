//! `blestrip` drives Bluetooth LE light strips as smart-home accessories.
//!
//! Each strip is an [accessory::Accessory] combining three light layers (a static color, an
//! animated rainbow and a daylight-following circadian layer) into the color written to the
//! device.

#[macro_use]
extern crate tracing;

pub mod accessory;
pub mod color;
pub mod composer;
pub mod device;
pub mod global;
pub mod models;
pub mod servers;
pub mod solar;

/// Version string of the build
pub fn version() -> &'static str {
    option_env!("BLESTRIP_VERSION_ID").unwrap_or(concat!("blestrip ", env!("CARGO_PKG_VERSION")))
}
