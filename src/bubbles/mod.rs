//! decorative bubble particles for the intro screen.

pub mod field;
pub mod plugin;

pub use field::{Bubble, BubbleId, ParticleField, TickReport};
pub use plugin::{BubbleEntities, BubbleFieldPlugin, BubbleMarker, BubbleSet, SpawnClock, field_running};
