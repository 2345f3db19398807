use std::sync::Arc;

use particle_cloth::cloth::grid_fabric;
use particle_cloth::config::MAX_COLLISION_SPHERES;
use particle_cloth::core::GeometryKind;
use particle_cloth::*;

const DT: f32 = 1.0 / 60.0;

fn cloth_scene() -> (Scene, ClothId) {
    let mut scene = Scene::default();
    let pool = FabricPool::new();
    let (desc, particles) = grid_fabric(3, 3, 0.5);
    let fabric = pool.create(desc).expect("valid grid fabric");
    let cloth = scene
        .add_cloth(Arc::clone(&fabric), particles, Transform::default())
        .expect("particles match fabric");
    (scene, cloth)
}

fn shape_over_cloth(scene: &mut Scene, geometry: Geometry) -> (ActorId, ShapeId) {
    let actor = scene.add_actor(RigidActor::new_dynamic(Transform::from_position(Vec3::new(0.5, 0.0, 0.5))));
    let shape = scene
        .add_shape(actor, ShapeSim::builder(geometry).build())
        .expect("actor exists");
    (actor, shape)
}

fn sphere_count(scene: &Scene, cloth: ClothId) -> u32 {
    scene
        .cloth(cloth)
        .map_or(0, |c| c.num_collision_shapes(GeometryKind::Sphere))
}

#[test]
fn overlapping_sphere_becomes_a_collision_shape() {
    let (mut scene, cloth) = cloth_scene();
    let (actor, shape) = shape_over_cloth(&mut scene, Geometry::sphere(0.3));

    scene.step(DT);
    assert_eq!(sphere_count(&scene, cloth), 1);
    assert!(scene.cloth(cloth).is_some_and(|c| c.collision().contains(shape)));

    scene.remove_actor(actor);
    assert_eq!(sphere_count(&scene, cloth), 0);
}

#[test]
fn scene_collision_off_tracks_nothing() {
    let (mut scene, cloth) = cloth_scene();
    scene.set_cloth_flags(cloth, ClothFlags::empty());
    let _ = shape_over_cloth(&mut scene, Geometry::sphere(0.3));
    let _ = shape_over_cloth(&mut scene, Geometry::cuboid(Vec3::splat(0.2)));

    scene.step(DT);

    let sim = scene.cloth(cloth).expect("cloth exists");
    assert_eq!(sim.collision().total_count(), 0);
    assert_eq!(sim.collision().sphere_budget_used(), 0);
    assert_eq!(sim.collision().plane_budget_used(), 0);
}

#[test]
fn clearing_scene_collision_drops_tracked_shapes() {
    let (mut scene, cloth) = cloth_scene();
    let _ = shape_over_cloth(&mut scene, Geometry::cuboid(Vec3::splat(0.2)));
    scene.step(DT);
    assert_eq!(
        scene.cloth(cloth).map(|c| c.num_collision_shapes(GeometryKind::Box)),
        Some(1)
    );

    scene.set_cloth_flags(cloth, ClothFlags::empty());
    assert_eq!(scene.cloth(cloth).map(|c| c.collision().total_count()), Some(0));
}

#[test]
fn sphere_past_the_budget_is_rejected() {
    let (mut scene, cloth) = cloth_scene();
    let user_spheres = vec![Vec4::new(5.0, 5.0, 5.0, 0.1); MAX_COLLISION_SPHERES as usize - 1];
    assert!(scene
        .cloth_mut(cloth)
        .is_some_and(|c| c.set_collision_spheres(&user_spheres)));

    let _ = shape_over_cloth(&mut scene, Geometry::sphere(0.3));
    let _ = shape_over_cloth(&mut scene, Geometry::sphere(0.25));
    scene.step(DT);

    let sim = scene.cloth(cloth).expect("cloth exists");
    assert_eq!(sim.num_collision_shapes(GeometryKind::Sphere), 1);
    assert_eq!(sim.collision().sphere_budget_used(), MAX_COLLISION_SPHERES);
}

#[test]
fn user_spheres_past_the_budget_are_rejected() {
    let (mut scene, cloth) = cloth_scene();
    let too_many = vec![Vec4::new(0.0, 0.0, 0.0, 0.1); MAX_COLLISION_SPHERES as usize + 1];
    assert!(!scene
        .cloth_mut(cloth)
        .is_some_and(|c| c.set_collision_spheres(&too_many)));
    assert_eq!(scene.cloth(cloth).map(|c| c.collision().sphere_budget_used()), Some(0));
}

#[test]
fn trigger_shapes_are_ignored_by_cloth() {
    let (mut scene, cloth) = cloth_scene();
    let actor = scene.add_actor(RigidActor::new_static(Transform::from_position(Vec3::new(0.5, 0.0, 0.5))));
    scene
        .add_shape(actor, ShapeSim::builder(Geometry::sphere(0.3)).trigger(true).build())
        .expect("actor exists");

    scene.step(DT);
    assert_eq!(sphere_count(&scene, cloth), 0);
}

#[test]
fn cloth_count_must_match_fabric() {
    let mut scene = Scene::default();
    let pool = FabricPool::new();
    let (desc, mut particles) = grid_fabric(2, 2, 1.0);
    let fabric = pool.create(desc).expect("valid grid fabric");
    particles.pop();
    assert!(scene.add_cloth(fabric, particles, Transform::default()).is_err());
}

#[test]
fn user_primitives_are_counted_beside_rigid_shapes() {
    let (mut scene, cloth) = cloth_scene();
    {
        let sim = scene.cloth_mut(cloth).expect("cloth exists");
        assert!(sim.set_collision_spheres(&[Vec4::new(0.0, 1.0, 0.0, 0.1), Vec4::new(1.0, 1.0, 0.0, 0.1)]));
        assert!(sim.set_collision_capsules(&[[0, 1]]));
        assert!(sim.set_collision_planes(&[Vec4::new(0.0, 1.0, 0.0, 2.0)]));
        assert!(sim.set_collision_convexes(&[1]));
    }
    let _ = shape_over_cloth(&mut scene, Geometry::cuboid(Vec3::splat(0.2)));
    scene.step(DT);

    let sim = scene.cloth(cloth).expect("cloth exists");
    let user = sim.collision().user_counts();
    assert_eq!((user.spheres, user.capsules, user.planes, user.convexes), (2, 1, 1, 1));
    assert_eq!(sim.collision().shapes_of_kind(GeometryKind::Box).len(), 1);
    assert_eq!(sim.collision().plane_budget_used(), 7);
}
