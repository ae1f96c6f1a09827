//! the landing intro: a short splash, then the bubble field for a while, then
//! the page proper. the sequence owns the field's lifetime for the duration of
//! the intro: it starts it on entering [`IntroPhase::Bubbles`] and stops it
//! exactly once on [`IntroPhase::Complete`].

use std::time::Duration;

use bevy::prelude::*;

use crate::bubbles::ParticleField;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntroPhase {
    /// logo and tagline over a plain background.
    Splash,
    Bubbles,
    Complete,
}

#[derive(Resource, Clone, Debug)]
pub struct IntroSequence {
    splash: Duration,
    bubbles: Duration,
    phase: IntroPhase,
    started_at: Option<Duration>,
}

impl Default for IntroSequence {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(10))
    }
}

impl IntroSequence {
    pub fn new(splash: Duration, bubbles: Duration) -> Self {
        Self { splash, bubbles, phase: IntroPhase::Splash, started_at: None }
    }

    pub fn phase(&self) -> IntroPhase {
        self.phase
    }

    pub fn is_complete(&self) -> bool {
        self.phase == IntroPhase::Complete
    }

    /// moves at most one phase forward; the first call starts the clock.
    /// call until it returns `None` to catch up after a long frame.
    pub fn advance(&mut self, now: Duration) -> Option<IntroPhase> {
        let started = *self.started_at.get_or_insert(now);
        let elapsed = now.saturating_sub(started);
        let next = match self.phase {
            IntroPhase::Splash if elapsed >= self.splash => IntroPhase::Bubbles,
            IntroPhase::Bubbles if elapsed >= self.splash + self.bubbles => IntroPhase::Complete,
            _ => return None,
        };
        self.phase = next;
        Some(next)
    }
}

#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntroPhaseChanged {
    pub phase: IntroPhase,
}

/// the intro is over; the page should show its main content.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntroCompleted;

#[derive(Default)]
pub struct IntroPlugin {
    pub sequence: IntroSequence,
}

impl Plugin for IntroPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(self.sequence.clone())
            .add_event::<IntroPhaseChanged>()
            .add_event::<IntroCompleted>()
            .add_systems(Update, drive_intro.run_if(|seq: Res<IntroSequence>| !seq.is_complete()));
    }
}

fn drive_intro(
    time: Res<Time<Real>>,
    mut seq: ResMut<IntroSequence>,
    field: Option<ResMut<ParticleField>>,
    mut ev_phase: EventWriter<IntroPhaseChanged>,
    mut ev_done: EventWriter<IntroCompleted>,
) {
    let mut field = field;
    while let Some(phase) = seq.advance(time.elapsed()) {
        info!(target: "linetab::intro", "intro -> {:?}", phase);
        ev_phase.write(IntroPhaseChanged { phase });
        match phase {
            IntroPhase::Bubbles => {
                if let Some(f) = field.as_deref_mut() {
                    f.start();
                }
            }
            IntroPhase::Complete => {
                if let Some(f) = field.as_deref_mut() {
                    f.stop();
                }
                ev_done.write(IntroCompleted);
            }
            IntroPhase::Splash => {}
        }
    }
}
