//! bevy wiring for the bubble field.
//!
//! the plugin mirrors every live bubble as an entity with a [`BubbleMarker`]
//! and a `Transform`. it does not render anything: apps attach a mesh and
//! material to `Added<BubbleMarker>` entities however they like.

use std::collections::HashMap;

use bevy::prelude::*;

use super::field::{Bubble, BubbleId, ParticleField};
use crate::config::BubbleConfig;

#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub struct BubbleSet;

#[derive(Component, Clone, Copy, Debug)]
pub struct BubbleMarker {
    pub id: BubbleId,
    pub size: f32,
}

/// wall-clock spawn cadence, independent of frame rate.
#[derive(Resource)]
pub struct SpawnClock(pub Timer);

/// bubble id -> mirrored entity.
#[derive(Resource, Default)]
pub struct BubbleEntities(HashMap<BubbleId, Entity>);

impl BubbleEntities {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, id: BubbleId) -> Option<Entity> {
        self.0.get(&id).copied()
    }
}

/// inserts a seeded [`ParticleField`] unless the app already provided one.
/// the field starts stopped; call `start()` on it (or use the intro plugin).
#[derive(Default)]
pub struct BubbleFieldPlugin {
    pub config: BubbleConfig,
}

impl Plugin for BubbleFieldPlugin {
    fn build(&self, app: &mut App) {
        info!(target: "linetab::bubbles", "BubbleFieldPlugin: build()");
        if app.world().get_resource::<ParticleField>().is_none() {
            app.insert_resource(ParticleField::seeded(self.config.clone()));
        }
        let interval = app.world().resource::<ParticleField>().config().spawn_interval();

        app.insert_resource(SpawnClock(Timer::new(interval, TimerMode::Repeating)))
            .init_resource::<BubbleEntities>()
            .configure_sets(Update, BubbleSet)
            .add_systems(
                Update,
                (spawn_bubbles, advance_bubbles)
                    .chain()
                    .in_set(BubbleSet)
                    .run_if(field_running),
            )
            .add_systems(Update, despawn_stopped_bubbles.in_set(BubbleSet).run_if(not(field_running)));
    }
}

pub fn field_running(field: Option<Res<ParticleField>>) -> bool {
    field.is_some_and(|f| f.is_running())
}

fn bubble_transform(b: &Bubble) -> Transform {
    Transform {
        translation: b.position,
        rotation: b.orientation(),
        scale: Vec3::splat(b.size),
    }
}

fn spawn_bubbles(
    mut commands: Commands,
    time: Res<Time<Real>>,
    mut clock: ResMut<SpawnClock>,
    mut field: ResMut<ParticleField>,
    mut entities: ResMut<BubbleEntities>,
) {
    clock.0.tick(time.delta());
    // a long frame owes several spawns
    for _ in 0..clock.0.times_finished_this_tick() {
        let Some(id) = field.spawn_tick() else {
            break;
        };
        let Some(b) = field.get(id) else {
            continue;
        };
        let e = commands
            .spawn((BubbleMarker { id, size: b.size }, bubble_transform(b), Visibility::default()))
            .id();
        entities.0.insert(id, e);
    }
}

fn advance_bubbles(
    time: Res<Time<Real>>,
    mut field: ResMut<ParticleField>,
    mut q: Query<(&BubbleMarker, &mut Transform)>,
) {
    field.tick(time.elapsed());
    for (marker, mut tf) in &mut q {
        if let Some(b) = field.get(marker.id) {
            *tf = bubble_transform(b);
        }
    }
}

fn despawn_stopped_bubbles(
    mut commands: Commands,
    mut entities: ResMut<BubbleEntities>,
    mut clock: ResMut<SpawnClock>,
) {
    if entities.0.is_empty() {
        return;
    }
    debug!(target: "linetab::bubbles", "despawning {} bubble entities", entities.0.len());
    for (_, e) in entities.0.drain() {
        commands.entity(e).despawn();
    }
    clock.0.reset();
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::time::TimeUpdateStrategy;
    use std::time::Duration;

    fn app(capacity: usize) -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_millis(50)));
        app.add_plugins(BubbleFieldPlugin { config: BubbleConfig::default().with_capacity(capacity) });
        app
    }

    fn marker_count(app: &mut App) -> usize {
        let world = app.world_mut();
        world.query::<&BubbleMarker>().iter(world).count()
    }

    #[test]
    fn nothing_spawns_until_started() {
        let mut app = app(10);
        for _ in 0..20 {
            app.update();
        }
        assert_eq!(marker_count(&mut app), 0);
    }

    #[test]
    fn entities_mirror_the_pool_up_to_capacity() {
        let mut app = app(5);
        app.world_mut().resource_mut::<ParticleField>().start();
        for _ in 0..60 {
            app.update();
        }
        assert_eq!(app.world().resource::<ParticleField>().len(), 5);
        assert_eq!(app.world().resource::<BubbleEntities>().len(), 5);
        assert_eq!(marker_count(&mut app), 5);
    }

    #[test]
    fn transforms_follow_the_field() {
        let mut app = app(3);
        app.world_mut().resource_mut::<ParticleField>().start();
        for _ in 0..20 {
            app.update();
        }
        let field = app.world().resource::<ParticleField>();
        let expected: Vec<(BubbleId, Vec3)> = field.bubbles().iter().map(|b| (b.id, b.position)).collect();
        let world = app.world_mut();
        for (marker, tf) in world.query::<(&BubbleMarker, &Transform)>().iter(world) {
            let (_, pos) = expected.iter().find(|(id, _)| *id == marker.id).unwrap();
            assert_eq!(tf.translation, *pos);
            assert_eq!(tf.scale, Vec3::splat(marker.size));
        }
    }

    #[test]
    fn stopping_despawns_every_bubble() {
        let mut app = app(4);
        app.world_mut().resource_mut::<ParticleField>().start();
        for _ in 0..20 {
            app.update();
        }
        assert_eq!(marker_count(&mut app), 4);

        assert!(app.world_mut().resource_mut::<ParticleField>().stop());
        app.update();
        assert_eq!(marker_count(&mut app), 0);
        assert!(app.world().resource::<BubbleEntities>().is_empty());

        // no timers keep running afterwards
        for _ in 0..10 {
            app.update();
        }
        assert_eq!(marker_count(&mut app), 0);
    }

    #[test]
    fn app_provided_field_is_kept() {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.insert_resource(ParticleField::seeded(BubbleConfig::default().with_capacity(2)));
        app.add_plugins(BubbleFieldPlugin::default());
        assert_eq!(app.world().resource::<ParticleField>().capacity(), 2);
    }
}
