//! Session and context-window management

mod manager;
mod window;

pub use manager::SessionManager;
pub use window::{OptimizationProfile, Zone, is_emergency, zone_for};
