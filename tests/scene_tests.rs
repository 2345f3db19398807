use approx::assert_relative_eq;
use particle_cloth::nphase::TriggerStatus;
use particle_cloth::particles::ParticleSystemFlags;
use particle_cloth::*;

const DT: f32 = 1.0 / 60.0;

fn scene() -> Scene {
    Scene::new(SceneConfig::default().with_parallel(false))
}

fn static_box(scene: &mut Scene, half_extents: Vec3, trigger: bool) -> (ActorId, ShapeId) {
    let actor = scene.add_actor(RigidActor::new_static(Transform::default()));
    let shape = scene
        .add_shape(
            actor,
            ShapeSim::builder(Geometry::cuboid(half_extents)).trigger(trigger).build(),
        )
        .expect("actor exists");
    (actor, shape)
}

fn particles_in_box(scene: &mut Scene) -> ParticleSystemId {
    let system = scene.add_particle_system(ParticleSystemParams::new(16));
    scene
        .particle_system_mut(system)
        .expect("system exists")
        .state_mut()
        .add_particles(&ParticleCreationData::new(
            &[0, 1, 2],
            &[
                Vec3::new(0.2, 0.5, 0.2),
                Vec3::new(0.3, 0.4, 0.1),
                Vec3::new(0.1, 0.6, 0.3),
            ],
        ))
        .expect("fresh slots");
    system
}

#[test]
fn packets_inside_a_static_box_interact_with_it() {
    let mut scene = scene();
    static_box(&mut scene, Vec3::ONE, false);
    let system = particles_in_box(&mut scene);

    scene.step(DT);

    assert_eq!(scene.particle_system(system).map(|s| s.packets().len()), Some(1));
    assert_eq!(scene.nphase().count_of_type(InteractionType::ParticleBody), 1);
    assert_eq!(scene.nphase().element_pairs().len(), 1);
    assert_eq!(scene.profiler().packets_created, 1);
}

#[test]
fn emptied_system_drops_its_packets_and_interactions() {
    let mut scene = scene();
    static_box(&mut scene, Vec3::ONE, false);
    let system = particles_in_box(&mut scene);
    scene.step(DT);

    scene
        .particle_system_mut(system)
        .expect("system exists")
        .state_mut()
        .remove_all_particles();
    scene.step(DT);

    assert_eq!(scene.particle_system(system).map(|s| s.packets().len()), Some(0));
    assert_eq!(scene.nphase().interaction_count(), 0);
    assert!(scene.nphase().element_pairs().is_empty());
    assert_eq!(scene.profiler().packets_destroyed, 1);
}

#[test]
fn disabling_a_system_removes_every_packet() {
    let mut scene = scene();
    static_box(&mut scene, Vec3::ONE, false);
    let system = particles_in_box(&mut scene);
    scene.step(DT);
    let volumes = scene.broad_phase().volume_count();

    scene.set_particle_system_flags(system, ParticleSystemFlags::empty());
    assert_eq!(scene.particle_system(system).map(|s| s.packets().len()), Some(0));
    assert_eq!(scene.broad_phase().volume_count(), volumes - 1);
    assert_eq!(scene.nphase().interaction_count(), 0);

    scene.step(DT);
    assert_eq!(scene.particle_system(system).map(|s| s.packets().len()), Some(0));
}

#[test]
fn removed_system_leaves_no_interactions() {
    let mut scene = scene();
    static_box(&mut scene, Vec3::ONE, false);
    let system = particles_in_box(&mut scene);
    scene.step(DT);

    assert!(scene.remove_particle_system(system).is_some());
    assert!(scene.particle_system(system).is_none());
    assert_eq!(scene.nphase().interaction_count(), 0);
    assert_eq!(scene.broad_phase().volume_count(), 1);
}

#[test]
fn ball_entering_and_leaving_a_trigger_is_reported() {
    let mut scene = scene();
    let (_, trigger) = static_box(&mut scene, Vec3::ONE, true);
    let ball = scene.add_actor(RigidActor::new_dynamic(Transform::from_position(Vec3::new(0.5, 0.0, 0.0))));
    let ball_shape = scene
        .add_shape(ball, ShapeSim::builder(Geometry::sphere(0.5)).build())
        .expect("actor exists");

    scene.step(DT);
    let reports = scene.take_reports();
    assert_eq!(reports.triggers.len(), 1);
    assert_eq!(reports.triggers[0].status, TriggerStatus::Found);
    assert_eq!(reports.triggers[0].trigger_shape, trigger);
    assert_eq!(reports.triggers[0].other_shape, ball_shape);

    scene.step(DT);
    assert!(scene.take_reports().triggers.is_empty());

    assert!(scene.set_actor_pose(ball, Transform::from_position(Vec3::new(30.0, 0.0, 0.0))));
    scene.step(DT);
    let reports = scene.take_reports();
    assert_eq!(reports.triggers.len(), 1);
    assert_eq!(reports.triggers[0].status, TriggerStatus::Lost);
    assert!(!reports.triggers[0].removed_shape);
}

#[test]
fn clearing_dynamic_collision_drops_live_dynamic_pairs() {
    let mut scene = scene();
    static_box(&mut scene, Vec3::ONE, false);
    let body = scene.add_actor(RigidActor::new_dynamic(Transform::default()));
    scene
        .add_shape(body, ShapeSim::builder(Geometry::cuboid(Vec3::ONE)).build())
        .expect("actor exists");
    let system = particles_in_box(&mut scene);
    scene.step(DT);
    assert_eq!(scene.nphase().count_of_type(InteractionType::ParticleBody), 2);
    assert_eq!(scene.nphase().element_pairs().len(), 2);

    scene.set_particle_system_flags(system, ParticleSystemFlags::ENABLED);
    scene.step(DT);

    assert_eq!(scene.particle_system(system).map(|s| s.packets().len()), Some(1));
    assert_eq!(scene.nphase().count_of_type(InteractionType::ParticleBody), 1);
    assert_eq!(scene.nphase().element_pairs().len(), 1);
    assert!(scene
        .nphase()
        .interactions()
        .filter_map(|i| i.element_pair())
        .all(|key| scene.world().shape(key.shape).is_some_and(|s| {
            scene.world().actor(s.actor).is_some_and(|a| a.is_static())
        })));
}

#[test]
fn trigger_geometry_change_retests_a_resting_pair() {
    let mut scene = scene();
    let (_, trigger) = static_box(&mut scene, Vec3::ONE, true);
    let ball = scene.add_actor(RigidActor::new_dynamic(Transform::from_position(Vec3::new(0.9, 0.9, 0.0))));
    scene
        .add_shape(ball, ShapeSim::builder(Geometry::sphere(0.2)).build())
        .expect("actor exists");

    scene.step(DT);
    let reports = scene.take_reports();
    assert_eq!(reports.triggers.len(), 1);
    assert_eq!(reports.triggers[0].status, TriggerStatus::Found);

    // the ball falls asleep, then the resting pair is switched off
    scene.step(1.0);
    scene.step(DT);
    assert!(scene.take_reports().triggers.is_empty());
    assert_eq!(scene.nphase().active_trigger_count(), 0);

    // same bounds, but the ball now sits outside the rounded corner
    assert!(scene.set_shape_geometry(trigger, Geometry::sphere(1.0)));
    scene.step(DT);
    let reports = scene.take_reports();
    assert_eq!(reports.triggers.len(), 1);
    assert_eq!(reports.triggers[0].status, TriggerStatus::Lost);
    assert_eq!(reports.triggers[0].trigger_shape, trigger);

    scene.step(DT);
    assert_eq!(scene.nphase().active_trigger_count(), 0);
    assert!(scene.set_shape_geometry(trigger, Geometry::cuboid(Vec3::ONE)));
    scene.step(DT);
    let reports = scene.take_reports();
    assert_eq!(reports.triggers.len(), 1);
    assert_eq!(reports.triggers[0].status, TriggerStatus::Found);
}

#[test]
fn shift_origin_moves_actors_and_particles() {
    let mut scene = scene();
    let actor = scene.add_actor(RigidActor::new_dynamic(Transform::from_position(Vec3::new(10.0, 0.0, 0.0))));
    let shape = scene
        .add_shape(actor, ShapeSim::builder(Geometry::sphere(0.5)).build())
        .expect("actor exists");
    let system = particles_in_box(&mut scene);
    scene.step(DT);

    scene.shift_origin(Vec3::new(10.0, 0.0, 0.0));

    let pose = scene.world().actor(actor).map(|a| a.pose.position).expect("actor exists");
    assert_relative_eq!(pose.x, 0.0);
    let element = scene.world().shape(shape).and_then(|s| s.element).expect("registered");
    let bounds = scene.broad_phase().bounds(element).expect("registered");
    assert!(bounds.contains_point(Vec3::ZERO));

    let position = scene
        .particle_system(system)
        .and_then(|s| s.state().particles(false, false).positions.get(0))
        .expect("live particle");
    assert_relative_eq!(position.x, -9.8, epsilon = 1e-5);
}

#[test]
fn steps_count_frames() {
    let mut scene = scene();
    scene.step(DT);
    scene.step(DT);
    assert_eq!(scene.frame(), 2);
}

#[test]
fn factory_creates_and_releases_objects() {
    let mut factory = SimFactory::new();
    factory.register_particles();
    factory.register_cloth();
    let mut scene = scene();

    let system = factory
        .create_particle_system(&mut scene, ParticleSystemParams::new(32))
        .expect("particles registered");
    let (desc, particles) = particle_cloth::cloth::grid_fabric(2, 2, 1.0);
    let fabric = factory.create_fabric(desc).expect("cloth registered");
    let cloth = factory
        .create_cloth(&mut scene, fabric, particles, Transform::default())
        .expect("matching fabric");

    assert_eq!(factory.particle_systems().len(), 1);
    assert_eq!(factory.cloths().len(), 1);
    assert!(factory.release_cloth(&mut scene, cloth).is_ok());
    assert!(factory.release_particle_system(&mut scene, system).is_ok());
    assert!(scene.cloth(cloth).is_none());
    assert!(factory.particle_systems().is_empty());
}
