//! fixed-capacity bubble pool.
//!
//! bubbles are spawned on a timer up to `capacity`, drift upward with a small
//! per-bubble sinusoidal sway, and are recycled below the visible volume once
//! they leave it at the top. memory is bounded by the capacity, not by how long
//! the field has been running.

use std::fmt;
use std::time::Duration;

use bevy::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::BubbleConfig;

const PREALLOC_LIMIT: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BubbleId(u64);

impl fmt::Display for BubbleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bubble-{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bubble {
    pub id: BubbleId,
    /// position at `spawned_at`, before drift.
    pub origin: Vec3,
    /// field clock reading the current ascent started from.
    pub spawned_at: Duration,
    pub size: f32,
    pub ascent_speed: f32,
    /// radians added to `rotation` every tick.
    pub spin: Vec3,
    /// cumulative orientation, unbounded.
    pub rotation: Vec3,
    /// last computed position.
    pub position: Vec3,
}

impl Bubble {
    /// where the bubble is `elapsed` seconds into its current ascent. the sway
    /// phase comes from the bubble's own origin so neighbours don't move in
    /// lockstep.
    pub fn position_after(&self, elapsed: f32, config: &BubbleConfig) -> Vec3 {
        let o = self.origin;
        let amp = config.drift_amplitude;
        Vec3::new(
            o.x + (elapsed * config.drift_frequency_x + o.x).sin() * amp,
            o.y + elapsed * self.ascent_speed,
            o.z + (elapsed * config.drift_frequency_z + o.z).cos() * amp,
        )
    }

    /// orientation as a quaternion for rendering.
    pub fn orientation(&self) -> Quat {
        Quat::from_euler(EulerRot::XYZ, self.rotation.x, self.rotation.y, self.rotation.z)
    }
}

/// what one [`ParticleField::tick`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub advanced: usize,
    pub recycled: Vec<BubbleId>,
}

/// the bubble pool. owned by whoever shows the intro; it must call
/// [`stop`](Self::stop) when the intro goes away.
#[derive(Resource)]
pub struct ParticleField {
    config: BubbleConfig,
    rng: StdRng,
    // sorted by id: ids only grow and nothing is removed individually
    bubbles: Vec<Bubble>,
    next_id: u64,
    running: bool,
    clock: Duration,
}

impl ParticleField {
    pub fn new(config: BubbleConfig, rng: StdRng) -> Self {
        // capacity comes from config files; grow past this on demand
        let bubbles = Vec::with_capacity(config.capacity.min(PREALLOC_LIMIT));
        Self { config, rng, bubbles, next_id: 0, running: false, clock: Duration::ZERO }
    }

    /// field with its rng seeded from `config.seed`.
    pub fn seeded(config: BubbleConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self::new(config, rng)
    }

    pub fn config(&self) -> &BubbleConfig {
        &self.config
    }

    pub fn bubbles(&self) -> &[Bubble] {
        &self.bubbles
    }

    pub fn get(&self, id: BubbleId) -> Option<&Bubble> {
        self.bubbles
            .binary_search_by_key(&id, |b| b.id)
            .ok()
            .map(|i| &self.bubbles[i])
    }

    pub fn len(&self) -> usize {
        self.bubbles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bubbles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// returns false if the field was already running.
    pub fn start(&mut self) -> bool {
        if self.running {
            return false;
        }
        info!(target: "linetab::bubbles", "bubble field started (capacity={})", self.config.capacity);
        self.running = true;
        true
    }

    /// stops the field and frees the pool. returns false (and changes
    /// nothing) if it was not running.
    pub fn stop(&mut self) -> bool {
        if !self.running {
            warn!(target: "linetab::bubbles", "stop() on a bubble field that is not running");
            return false;
        }
        info!(target: "linetab::bubbles", "bubble field stopped ({} live bubbles released)", self.bubbles.len());
        self.running = false;
        self.bubbles.clear();
        true
    }

    /// adds one bubble below the visible volume, or nothing at capacity.
    pub fn spawn_tick(&mut self) -> Option<BubbleId> {
        if !self.running || self.bubbles.len() >= self.config.capacity {
            return None;
        }
        let Self { config, rng, bubbles, next_id, clock, .. } = self;
        let id = BubbleId(*next_id);
        *next_id += 1;

        let spin = Vec3::new(config.spin.sample(rng), config.spin.sample(rng), config.spin.sample(rng));
        let mut bubble = Bubble {
            id,
            origin: Vec3::new(config.spawn_x.sample(rng), config.spawn_y.sample(rng), config.spawn_z.sample(rng)),
            spawned_at: *clock,
            size: config.size.sample(rng),
            ascent_speed: config.ascent_speed.sample(rng),
            spin,
            rotation: Vec3::ZERO,
            position: Vec3::ZERO,
        };
        bubble.position = bubble.position_after(0.0, config);
        trace!(target: "linetab::bubbles", "spawned {} at {:?}", id, bubble.origin);
        bubbles.push(bubble);
        Some(id)
    }

    /// advances every live bubble to `now` (a monotonic clock reading) and
    /// recycles the ones that rose past the top of the visible volume.
    pub fn tick(&mut self, now: Duration) -> TickReport {
        if !self.running {
            return TickReport::default();
        }
        self.clock = self.clock.max(now);
        let now = self.clock;
        let Self { config, rng, bubbles, .. } = self;

        let mut report = TickReport { advanced: bubbles.len(), recycled: Vec::new() };
        for bubble in bubbles.iter_mut() {
            let elapsed = now.saturating_sub(bubble.spawned_at).as_secs_f32();
            bubble.position = bubble.position_after(elapsed, config);
            bubble.rotation += bubble.spin;

            if bubble.position.y > config.upper_bound {
                // restart just under the visible band, fresh x/z, ascent from zero
                bubble.origin = Vec3::new(
                    config.spawn_x.sample(rng),
                    config.lower_bound - bubble.size,
                    config.spawn_z.sample(rng),
                );
                bubble.spawned_at = now;
                bubble.position = bubble.position_after(0.0, config);
                report.recycled.push(bubble.id);
            }
        }
        if !report.recycled.is_empty() {
            trace!(target: "linetab::bubbles", "recycled {} bubbles", report.recycled.len());
        }
        report
    }
}
