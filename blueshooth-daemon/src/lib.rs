/*!
 * BlueShooth
 * Keeps chosen paired Bluetooth devices from auto-reconnecting
 * Onyx Digital Intelligence Development LLC
 */

pub mod bluetooth;
pub mod config;
pub mod context;
pub mod controller;
pub mod device;
pub mod enforcer;
pub mod ipc;
pub mod notify;
pub mod policy;
pub mod registry;
pub mod storage;

pub use context::App;
pub use device::{Device, DeviceStatus};
