use particle_cloth::nphase::TriggerStatus;
use particle_cloth::*;
use std::sync::{Arc, Mutex};
use std::thread;

#[test]
fn test_scene_is_send_and_factory_is_shareable() {
    fn assert_send<T: Send>() {}
    fn assert_sync_send<T: Sync + Send>() {}
    assert_send::<Scene>();
    assert_sync_send::<SimFactory>();
    assert_sync_send::<FabricPool>();
}

#[test]
fn test_shared_scene_across_threads() {
    let scene = Arc::new(Mutex::new(Scene::default()));

    let mut handles = vec![];
    for i in 0..4 {
        let scene_clone = Arc::clone(&scene);
        let handle = thread::spawn(move || {
            let mut scene = scene_clone.lock().unwrap();
            let actor = scene.add_actor(RigidActor::new_dynamic(Transform::from_position(Vec3::new(
                i as f32 * 3.0,
                0.0,
                0.0,
            ))));
            scene.add_shape(actor, ShapeSim::builder(Geometry::sphere(0.5)).build());
            scene.step(1.0 / 60.0);
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.join().unwrap();
    }
    let scene = scene.lock().unwrap();
    assert_eq!(scene.frame(), 4);
    assert_eq!(scene.broad_phase().volume_count(), 4);
}

#[test]
fn test_factory_shared_between_threads() {
    let mut factory = SimFactory::new();
    factory.register_cloth();
    let factory = Arc::new(factory);

    let mut handles = vec![];
    for _ in 0..4 {
        let factory_clone = Arc::clone(&factory);
        handles.push(thread::spawn(move || {
            let (desc, _) = particle_cloth::cloth::grid_fabric(2, 2, 1.0);
            factory_clone.create_fabric(desc).is_some()
        }));
    }

    for handle in handles {
        assert!(handle.join().unwrap());
    }
    assert_eq!(factory.fabrics().len(), 4);
}

/// Static trigger volume with `count` balls inside, stepped once.
fn trigger_found_reports(parallel: bool, count: usize) -> Vec<(ShapeId, ShapeId)> {
    let config = SceneConfig {
        trigger_batch_size: 8,
        ..SceneConfig::default().with_parallel(parallel)
    };
    let mut scene = Scene::new(config);
    let trigger = scene.add_actor(RigidActor::new_static(Transform::default()));
    scene.add_shape(
        trigger,
        ShapeSim::builder(Geometry::cuboid(Vec3::splat(20.0))).trigger(true).build(),
    );
    for i in 0..count {
        let x = (i % 10) as f32 * 2.0 - 9.0;
        let z = (i / 10) as f32 * 2.0 - 9.0;
        let ball = scene.add_actor(RigidActor::new_dynamic(Transform::from_position(Vec3::new(x, 0.0, z))));
        scene.add_shape(ball, ShapeSim::builder(Geometry::sphere(0.4)).build());
    }

    scene.step(1.0 / 60.0);
    let mut found: Vec<(ShapeId, ShapeId)> = scene
        .take_reports()
        .triggers
        .into_iter()
        .filter(|r| r.status == TriggerStatus::Found)
        .map(|r| (r.trigger_shape, r.other_shape))
        .collect();
    found.sort();
    found
}

#[test]
fn test_parallel_trigger_pass_matches_sequential() {
    let sequential = trigger_found_reports(false, 60);
    let parallel = trigger_found_reports(true, 60);
    assert_eq!(sequential.len(), 60);
    assert_eq!(sequential, parallel);
}
