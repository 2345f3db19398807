use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use particle_cloth::core::constraints::Joint;
use particle_cloth::core::filter::{FilterObjectAttributes, FilterPairObject, FilterStatusChange};
use particle_cloth::*;

const DT: f32 = 1.0 / 60.0;

fn ball_at(scene: &mut Scene, x: f32) -> (ActorId, ShapeId) {
    let actor = scene.add_actor(RigidActor::new_dynamic(Transform::from_position(Vec3::new(x, 0.0, 0.0))));
    let shape = scene
        .add_shape(actor, ShapeSim::builder(Geometry::sphere(0.5)).build())
        .expect("actor exists");
    (actor, shape)
}

fn element_of(scene: &Scene, shape: ShapeId) -> ElementId {
    scene
        .world()
        .shape(shape)
        .and_then(|s| s.element)
        .expect("shape is in the broadphase")
}

fn pair_interaction(scene: &Scene, a: ShapeId, b: ShapeId) -> Option<InteractionId> {
    scene
        .nphase()
        .find_interaction(scene.world(), element_of(scene, a), element_of(scene, b))
}

fn interaction_type(scene: &Scene, id: InteractionId) -> Option<InteractionType> {
    scene.nphase().interaction(id).map(|i| i.interaction_type())
}

fn count_events(reports: &ReportBuffer, event: PairFlags) -> usize {
    reports.contacts.iter().filter(|r| r.has(event)).count()
}

fn kill_everything(
    _: FilterObjectAttributes,
    _: &FilterData,
    _: FilterObjectAttributes,
    _: &FilterData,
    _: &mut PairFlags,
    _: &[u8],
) -> FilterFlags {
    FilterFlags::KILL
}

fn suppress_everything(
    _: FilterObjectAttributes,
    _: &FilterData,
    _: FilterObjectAttributes,
    _: &FilterData,
    _: &mut PairFlags,
    _: &[u8],
) -> FilterFlags {
    FilterFlags::SUPPRESS
}

fn ask_callback(
    _: FilterObjectAttributes,
    _: &FilterData,
    _: FilterObjectAttributes,
    _: &FilterData,
    pair_flags: &mut PairFlags,
    _: &[u8],
) -> FilterFlags {
    *pair_flags = PairFlags::CONTACT_DEFAULT;
    FilterFlags::NOTIFY
}

fn report_persisting_touches(
    _: FilterObjectAttributes,
    _: &FilterData,
    _: FilterObjectAttributes,
    _: &FilterData,
    pair_flags: &mut PairFlags,
    _: &[u8],
) -> FilterFlags {
    *pair_flags = PairFlags::CONTACT_DEFAULT
        | PairFlags::NOTIFY_TOUCH_FOUND
        | PairFlags::NOTIFY_TOUCH_PERSISTS
        | PairFlags::NOTIFY_TOUCH_LOST;
    FilterFlags::DEFAULT
}

/// Keeps every pair under notification; pairs where either side has
/// `word2 == 1` are suppressed.
struct SuppressTagged {
    found: Arc<AtomicUsize>,
    lost: Arc<AtomicUsize>,
}

impl SimulationFilterCallback for SuppressTagged {
    fn pair_found(
        &mut self,
        _pair_id: Option<u32>,
        _attributes0: FilterObjectAttributes,
        data0: &FilterData,
        _object0: FilterPairObject,
        _attributes1: FilterObjectAttributes,
        data1: &FilterData,
        _object1: FilterPairObject,
        pair_flags: &mut PairFlags,
    ) -> FilterFlags {
        self.found.fetch_add(1, Ordering::SeqCst);
        *pair_flags = PairFlags::CONTACT_DEFAULT;
        if data0.word2 == 1 || data1.word2 == 1 {
            FilterFlags::NOTIFY | FilterFlags::SUPPRESS
        } else {
            FilterFlags::NOTIFY
        }
    }

    fn pair_lost(
        &mut self,
        _pair_id: u32,
        _attributes0: FilterObjectAttributes,
        _data0: &FilterData,
        _attributes1: FilterObjectAttributes,
        _data1: &FilterData,
        _object_removed: bool,
    ) {
        self.lost.fetch_add(1, Ordering::SeqCst);
    }

    fn status_change(&mut self) -> Option<FilterStatusChange> {
        None
    }
}

#[test]
fn jointed_pair_without_collision_is_a_marker_without_shader_call() {
    let mut scene = Scene::default();
    let (a, shape_a) = ball_at(&mut scene, 0.0);
    let (b, shape_b) = ball_at(&mut scene, 0.8);
    scene.add_joint(
        Joint::Distance {
            body_a: a,
            body_b: b,
            distance: 0.8,
        },
        false,
    );

    scene.step(DT);

    let id = pair_interaction(&scene, shape_a, shape_b).expect("pair is tracked");
    assert_eq!(interaction_type(&scene, id), Some(InteractionType::Marker));
    assert_eq!(scene.nphase().filter().shader_calls(), 0);
    assert!(scene.nphase().actor_pairs().is_empty());
}

#[test]
fn killed_pair_never_creates_an_interaction() {
    let mut scene = Scene::default();
    scene.set_filter_shader(Box::new(kill_everything));
    let (_, shape_a) = ball_at(&mut scene, 0.0);
    let (_, shape_b) = ball_at(&mut scene, 0.8);

    scene.step(DT);
    scene.step(DT);

    assert_eq!(scene.nphase().interaction_count(), 0);
    assert!(pair_interaction(&scene, shape_a, shape_b).is_none());
    assert_eq!(scene.nphase().filter().shader_calls(), 1);
}

#[test]
fn suppressed_pair_is_kept_as_a_marker() {
    let mut scene = Scene::default();
    scene.set_filter_shader(Box::new(suppress_everything));
    let (_, shape_a) = ball_at(&mut scene, 0.0);
    let (_, shape_b) = ball_at(&mut scene, 0.8);

    scene.step(DT);

    assert_eq!(scene.nphase().count_of_type(InteractionType::Marker), 1);
    assert_eq!(scene.nphase().count_of_type(InteractionType::Overlap), 0);
    assert!(pair_interaction(&scene, shape_a, shape_b).is_some());
}

#[test]
fn filter_data_change_converts_marker_to_overlap() {
    let found = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));
    let mut scene = Scene::default();
    scene.set_filter_shader(Box::new(ask_callback));
    scene.set_filter_callback(Some(Box::new(SuppressTagged {
        found: Arc::clone(&found),
        lost: Arc::clone(&lost),
    })));
    let (a, shape_a) = ball_at(&mut scene, 0.0);
    let (b, shape_b) = ball_at(&mut scene, 0.8);
    scene.set_shape_filter_data(shape_a, FilterData::new(0, 0, 1, 0));

    // A long step lets both bodies fall asleep.
    scene.step(1.0);
    let marker = pair_interaction(&scene, shape_a, shape_b).expect("pair is tracked");
    assert_eq!(interaction_type(&scene, marker), Some(InteractionType::Marker));
    let index = scene
        .nphase()
        .interaction(marker)
        .and_then(|i| i.filter_pair_index())
        .expect("notify pair holds an index");
    assert!(!scene.world().actor(a).is_some_and(|actor| actor.is_awake));

    scene.set_shape_filter_data(shape_a, FilterData::default());
    scene.step(DT);

    let overlap = pair_interaction(&scene, shape_a, shape_b).expect("pair is tracked");
    assert_ne!(overlap, marker);
    assert!(scene.nphase().interaction(marker).is_none());
    assert_eq!(interaction_type(&scene, overlap), Some(InteractionType::Overlap));
    assert_eq!(
        scene.nphase().interaction(overlap).and_then(|i| i.filter_pair_index()),
        Some(index)
    );
    assert!(scene.world().actor(a).is_some_and(|actor| actor.is_awake));
    assert!(scene.world().actor(b).is_some_and(|actor| actor.is_awake));
    assert_eq!(found.load(Ordering::SeqCst), 2);
    assert_eq!(lost.load(Ordering::SeqCst), 0);
    assert_eq!(scene.nphase().stats().conversions, 1);
}

#[test]
fn removing_a_notify_pair_reports_pair_lost_once() {
    let found = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));
    let mut scene = Scene::default();
    scene.set_filter_shader(Box::new(ask_callback));
    scene.set_filter_callback(Some(Box::new(SuppressTagged {
        found: Arc::clone(&found),
        lost: Arc::clone(&lost),
    })));
    let (_, shape_a) = ball_at(&mut scene, 0.0);
    let (b, _) = ball_at(&mut scene, 0.8);
    scene.step(DT);
    assert_eq!(scene.nphase().count_of_type(InteractionType::Overlap), 1);

    scene.remove_actor(b);
    assert_eq!(lost.load(Ordering::SeqCst), 1);
    assert_eq!(scene.nphase().interaction_count(), 0);
    assert!(scene.world().element_interactions(element_of(&scene, shape_a)).is_empty());
}

#[test]
fn persistent_touch_events_start_one_frame_late() {
    let mut scene = Scene::default();
    scene.set_filter_shader(Box::new(report_persisting_touches));
    let (_, shape_a) = ball_at(&mut scene, 0.0);
    let (_, shape_b) = ball_at(&mut scene, 0.8);

    scene.step(DT);
    let id = pair_interaction(&scene, shape_a, shape_b).expect("pair is tracked");
    let first = scene.take_reports();
    assert_eq!(count_events(&first, PairFlags::NOTIFY_TOUCH_FOUND), 1);
    assert_eq!(count_events(&first, PairFlags::NOTIFY_TOUCH_PERSISTS), 0);
    assert_eq!(scene.nphase().persistent_event_pairs(), &[id]);
    assert!(scene.nphase().persistent_event_pairs_next_frame().is_empty());
    assert_eq!(scene.nphase().contact_report_actor_pair_count(), 1);

    scene.step(DT);
    let second = scene.take_reports();
    assert_eq!(count_events(&second, PairFlags::NOTIFY_TOUCH_FOUND), 0);
    assert_eq!(count_events(&second, PairFlags::NOTIFY_TOUCH_PERSISTS), 1);
}

#[test]
fn separating_bodies_report_touch_lost() {
    let mut scene = Scene::default();
    scene.set_filter_shader(Box::new(report_persisting_touches));
    let (a, _) = ball_at(&mut scene, 0.0);
    let _ = ball_at(&mut scene, 0.8);
    scene.step(DT);
    scene.take_reports();

    assert!(scene.set_actor_pose(a, Transform::from_position(Vec3::new(-20.0, 0.0, 0.0))));
    scene.step(DT);

    let reports = scene.take_reports();
    assert_eq!(count_events(&reports, PairFlags::NOTIFY_TOUCH_LOST), 1);
    assert_eq!(scene.nphase().interaction_count(), 0);
    assert!(scene.nphase().persistent_event_pairs().is_empty());
}

fn trigger_box(scene: &mut Scene) -> ShapeId {
    let actor = scene.add_actor(RigidActor::new_static(Transform::default()));
    scene
        .add_shape(actor, ShapeSim::builder(Geometry::cuboid(Vec3::ONE)).trigger(true).build())
        .expect("actor exists")
}

#[test]
fn shared_packet_pair_is_refiltered_once() {
    let found = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));
    let mut scene = Scene::default();
    scene.set_filter_shader(Box::new(ask_callback));
    scene.set_filter_callback(Some(Box::new(SuppressTagged {
        found: Arc::clone(&found),
        lost: Arc::clone(&lost),
    })));
    let ground = scene.add_actor(RigidActor::new_static(Transform::default()));
    scene
        .add_shape(ground, ShapeSim::builder(Geometry::cuboid(Vec3::new(4.0, 1.0, 1.0))).build())
        .expect("actor exists");
    let system = scene.add_particle_system(ParticleSystemParams::new(8));
    scene
        .particle_system_mut(system)
        .expect("system exists")
        .state_mut()
        .add_particles(&ParticleCreationData::new(
            &[0, 1],
            &[Vec3::new(-2.5, 0.5, 0.5), Vec3::new(2.5, 0.5, 0.5)],
        ))
        .expect("fresh slots");

    scene.step(DT);
    assert_eq!(scene.particle_system(system).map(|s| s.packets().len()), Some(2));
    assert_eq!(scene.nphase().count_of_type(InteractionType::ParticleBody), 2);
    assert_eq!(scene.nphase().element_pairs().len(), 1);
    assert_eq!(found.load(Ordering::SeqCst), 1);
    let shader_calls = scene.nphase().filter().shader_calls();

    scene.set_particle_system_filter_data(system, FilterData::new(0, 0, 1, 0));
    scene.step(DT);

    assert_eq!(found.load(Ordering::SeqCst), 2);
    assert_eq!(scene.nphase().filter().shader_calls(), shader_calls + 1);
    assert_eq!(scene.nphase().count_of_type(InteractionType::Marker), 2);
    assert_eq!(scene.nphase().count_of_type(InteractionType::ParticleBody), 0);
    assert_eq!(lost.load(Ordering::SeqCst), 0);
}

#[test]
fn kinematic_trigger_pairs_need_the_scene_flag() {
    let mut scene = Scene::default();
    let trigger = trigger_box(&mut scene);
    let mover = scene.add_actor(RigidActor::new_kinematic(Transform::from_position(Vec3::new(0.5, 0.0, 0.0))));
    let mover_shape = scene
        .add_shape(mover, ShapeSim::builder(Geometry::sphere(0.5)).build())
        .expect("actor exists");
    scene.step(DT);

    let id = pair_interaction(&scene, trigger, mover_shape).expect("pair is tracked");
    assert_eq!(interaction_type(&scene, id), Some(InteractionType::Marker));
    assert!(scene.take_reports().triggers.is_empty());

    let mut scene = Scene::new(SceneConfig::default().with_flags(SceneFlags::ENABLE_KINEMATIC_STATIC_PAIRS));
    let trigger = trigger_box(&mut scene);
    let mover = scene.add_actor(RigidActor::new_kinematic(Transform::from_position(Vec3::new(0.5, 0.0, 0.0))));
    let mover_shape = scene
        .add_shape(mover, ShapeSim::builder(Geometry::sphere(0.5)).build())
        .expect("actor exists");
    scene.step(DT);

    let id = pair_interaction(&scene, trigger, mover_shape).expect("pair is tracked");
    assert_eq!(interaction_type(&scene, id), Some(InteractionType::Trigger));
    assert_eq!(scene.take_reports().triggers.len(), 1);
}

#[test]
fn becoming_kinematic_suppresses_a_trigger_pair() {
    let mut scene = Scene::default();
    let trigger = trigger_box(&mut scene);
    let (ball, ball_shape) = ball_at(&mut scene, 0.5);
    scene.step(DT);
    let id = pair_interaction(&scene, trigger, ball_shape).expect("pair is tracked");
    assert_eq!(interaction_type(&scene, id), Some(InteractionType::Trigger));

    scene
        .set_actor_kind(ball, ActorKind::Kinematic)
        .expect("dynamic actor");
    scene.step(DT);

    let id = pair_interaction(&scene, trigger, ball_shape).expect("pair is tracked");
    assert_eq!(interaction_type(&scene, id), Some(InteractionType::Marker));
    assert_eq!(scene.nphase().active_trigger_count(), 0);
}

#[test]
fn resting_trigger_pairs_wake_without_a_pose_change() {
    let mut scene = Scene::default();
    let trigger = trigger_box(&mut scene);
    let (ball, _) = ball_at(&mut scene, 0.5);
    scene.step(DT);
    assert_eq!(scene.take_reports().triggers.len(), 1);

    // A long step lets the ball fall asleep; the next one parks the pair.
    scene.step(1.0);
    scene.step(DT);
    assert_eq!(scene.nphase().active_trigger_count(), 0);

    assert!(scene.wake_actor(ball));
    assert_eq!(scene.nphase().active_trigger_count(), 1);
    scene.step(1.0);
    scene.step(DT);
    assert_eq!(scene.nphase().active_trigger_count(), 0);

    scene.set_shape_filter_data(trigger, FilterData::new(0, 0, 0, 1));
    assert_eq!(scene.nphase().active_trigger_count(), 1);
    scene.step(DT);
    assert!(scene.take_reports().triggers.is_empty());
}
