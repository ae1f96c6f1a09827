//! the LineTab landing page in one window.
//! - a splash line, then the bubble intro for ten seconds, then the page.
//! - a chat panel on the right: type and press enter to ask the assistant,
//!   escape closes (and clears) the conversation.
//! - without OPENAI_API_KEY the assistant answers with its offline message.
//!
//! env: OPENAI_API_KEY, LLM_BASE_URL (default https://api.openai.com), LLM_MODEL (default gpt-4).

use bevy::input::keyboard::{KeyCode, KeyboardInput};
use bevy::prelude::*;
use linetab::chat::{ChatResolved, ChatSet, INPUT_PLACEHOLDER, Role, TranscriptChanged};
use linetab::{
    BubbleConfig, BubbleMarker, ChatConfig, ChatPipeline, IntroPhase, IntroPhaseChanged, LineTabPlugin,
    bleach_ratio, close_chat, send_user_text, tablets_for_volume,
};

// ---------------------- ui tags ----------------------

#[derive(Component)]
struct SplashText;
#[derive(Component)]
struct PageText;
#[derive(Component)]
struct TranscriptText;
#[derive(Component)]
struct PromptText;

#[derive(Component, Copy, Clone)]
struct TargetSession(Entity);

#[derive(Resource, Default)]
struct PromptBuf(String);

/// shared mesh/material for every bubble entity.
#[derive(Resource)]
struct BubbleLook {
    mesh: Handle<Mesh>,
    material: Handle<StandardMaterial>,
}

fn main() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    App::new()
        .insert_resource(ClearColor(Color::srgb_u8(10, 24, 48)))
        .insert_resource(PromptBuf::default())
        .add_plugins(DefaultPlugins)
        .add_plugins(LineTabPlugin {
            bubbles: BubbleConfig::default().with_viewport_width(20.0),
            ..default()
        })
        .add_systems(Startup, setup)
        .add_systems(Update, (handle_text_input, refresh_prompt_text, dress_bubbles))
        // event readers should run after the chat plugin emits events
        .add_systems(Update, (on_transcript_changed, on_resolved, on_intro_phase).after(ChatSet::Drain))
        .run();
}

// ---------------------- setup ----------------------

fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    commands.spawn((Camera3d::default(), Transform::from_xyz(0.0, 0.0, 30.0).looking_at(Vec3::ZERO, Vec3::Y)));
    commands.spawn((
        DirectionalLight { illuminance: 8_000.0, ..default() },
        Transform::from_xyz(4.0, 8.0, 10.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));
    commands.insert_resource(BubbleLook {
        mesh: meshes.add(Sphere::new(0.5)),
        material: materials.add(StandardMaterial {
            base_color: Color::srgba(0.75, 0.9, 1.0, 0.35),
            alpha_mode: AlphaMode::Blend,
            perceptual_roughness: 0.1,
            ..default()
        }),
    });

    // chat session entity; offline if no key is set or the client can't be built
    let config = ChatConfig::from_env();
    info!(target: "site", "chat config: {:?}", config);
    let pipeline = ChatPipeline::from_config(&config).unwrap_or_else(|e| {
        error!(target: "site", "chat client unavailable, answering offline: {}", e);
        ChatPipeline::offline((&config).into())
    });
    let session = commands.spawn(pipeline).id();

    let style_32 = TextFont { font_size: 32.0, ..default() };
    let style_18 = TextFont { font_size: 18.0, ..default() };
    let style_14 = TextFont { font_size: 14.0, ..default() };

    // splash
    commands.spawn((
        Node {
            position_type: PositionType::Absolute,
            width: Val::Percent(100.0),
            top: Val::Percent(45.0),
            justify_content: JustifyContent::Center,
            ..default()
        },
        children![(
            Text::new("LINETAB\nDental Waterline Excellence"),
            style_32.clone(),
            TextColor(Color::WHITE),
            SplashText,
        )],
    ));

    // page body, hidden until the intro completes
    let dosing = match (bleach_ratio(6.0), tablets_for_volume(1.0)) {
        (Ok(ratio), Ok(tablets)) => format!(
            "line shock with 6% bleach: {}\none liter of water: {} tablets",
            ratio, tablets
        ),
        (r, t) => format!("dosing unavailable: {:?} {:?}", r.err(), t.err()),
    };

    commands
        .spawn((
            Node {
                width: Val::Percent(100.0),
                height: Val::Percent(100.0),
                flex_direction: FlexDirection::Row,
                column_gap: Val::Px(12.0),
                padding: UiRect::all(Val::Px(12.0)),
                ..default()
            },
            BackgroundColor(Color::NONE),
        ))
        .with_children(|p| {
            p.spawn((
                Text::new(dosing),
                style_18.clone(),
                TextColor(Color::WHITE),
                Visibility::Hidden,
                PageText,
            ));

            // --- chat panel ---
            p.spawn((
                Node {
                    width: Val::Px(420.0),
                    height: Val::Percent(100.0),
                    margin: UiRect::left(Val::Auto),
                    flex_direction: FlexDirection::Column,
                    row_gap: Val::Px(8.0),
                    padding: UiRect::all(Val::Px(8.0)),
                    ..default()
                },
                BackgroundColor(Color::srgba(0.10, 0.10, 0.12, 0.85)),
            ))
            .with_children(|c| {
                c.spawn((
                    Text::new(""),
                    style_14.clone(),
                    TextColor(Color::WHITE),
                    TranscriptText,
                    TargetSession(session),
                ));
                c.spawn((
                    Text::new(format!("> {}", INPUT_PLACEHOLDER)),
                    style_14.clone(),
                    TextColor(Color::srgb_u8(200, 200, 200)),
                    PromptText,
                    TargetSession(session),
                ));
            });
        });
}

// ---------------------- input ----------------------

fn handle_text_input(
    mut commands: Commands,
    mut ev_kbd: EventReader<KeyboardInput>,
    keys: Res<ButtonInput<KeyCode>>,
    mut prompt: ResMut<PromptBuf>,
    q_prompt_target: Query<&TargetSession, With<PromptText>>,
) {
    for ev in ev_kbd.read() {
        if ev.state.is_pressed()
            && let Some(txt) = &ev.text
        {
            let s = txt.replace(['\r', '\n'], "");
            prompt.0.push_str(&s);
        }
    }

    if keys.just_pressed(KeyCode::Backspace) {
        prompt.0.pop();
    }

    let Ok(TargetSession(e)) = q_prompt_target.single() else {
        return;
    };

    if keys.just_pressed(KeyCode::Escape) {
        info!(target: "site", "closing chat");
        prompt.0.clear();
        close_chat(&mut commands, *e);
        return;
    }

    // the pipeline rejects blank and overlapping submissions itself
    if keys.just_pressed(KeyCode::Enter) && !prompt.0.trim().is_empty() {
        let msg = std::mem::take(&mut prompt.0);
        info!(target: "site", "send_user_text -> '{}' (len={})", msg, msg.len());
        send_user_text(&mut commands, *e, msg);
    }
}

fn refresh_prompt_text(prompt: Res<PromptBuf>, mut q_prompt: Query<&mut Text, With<PromptText>>) {
    if !prompt.is_changed() {
        return;
    }
    if let Ok(mut t) = q_prompt.single_mut() {
        t.0 = if prompt.0.is_empty() {
            format!("> {}", INPUT_PLACEHOLDER)
        } else {
            format!("> {} |", prompt.0)
        };
    }
}

fn dress_bubbles(mut commands: Commands, look: Res<BubbleLook>, q: Query<Entity, Added<BubbleMarker>>) {
    for e in &q {
        commands
            .entity(e)
            .insert((Mesh3d(look.mesh.clone()), MeshMaterial3d(look.material.clone())));
    }
}

// ---------------------- chat & intro events ----------------------

fn on_transcript_changed(
    mut ev: EventReader<TranscriptChanged>,
    q_sessions: Query<&ChatPipeline>,
    mut q_text: Query<(&TargetSession, &mut Text), With<TranscriptText>>,
) {
    for TranscriptChanged { entity } in ev.read() {
        let Ok(pipeline) = q_sessions.get(*entity) else {
            continue;
        };
        let mut out = String::new();
        for turn in pipeline.transcript().turns() {
            let who = match turn.role {
                Role::User => "you",
                Role::Assistant => "assistant",
            };
            out.push_str(who);
            out.push_str(": ");
            out.push_str(&turn.content);
            if turn.is_streaming {
                out.push_str(" ...");
            }
            out.push_str("\n\n");
        }
        for (TargetSession(t), mut text) in q_text.iter_mut() {
            if *t == *entity {
                text.0 = out.clone();
            }
        }
    }
}

fn on_resolved(mut ev: EventReader<ChatResolved>) {
    for ChatResolved { entity, outcome } in ev.read() {
        info!(target: "site", "chat resolved (entity={:?}): {:?}", entity, outcome);
    }
}

fn on_intro_phase(
    mut ev: EventReader<IntroPhaseChanged>,
    mut q_splash: Query<&mut Visibility, (With<SplashText>, Without<PageText>)>,
    mut q_page: Query<&mut Visibility, (With<PageText>, Without<SplashText>)>,
) {
    for IntroPhaseChanged { phase } in ev.read() {
        match phase {
            IntroPhase::Bubbles => {
                for mut v in &mut q_splash {
                    *v = Visibility::Hidden;
                }
            }
            IntroPhase::Complete => {
                for mut v in &mut q_page {
                    *v = Visibility::Inherited;
                }
            }
            IntroPhase::Splash => {}
        }
    }
}
