pub mod cooldown;
pub mod volume;

pub use cooldown::{CooldownDecision, CooldownTracker};
pub use volume::{VolumeGate, VolumeVerdict};
