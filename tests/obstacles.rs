//! Obstacle configuration parsing and mask rasterisation.

use std::io::Write;
use topo3d::obstacles::*;
use topo3d::types::{Grid, TopoError};

fn grid(nelx: usize, nely: usize, nelz: usize) -> Grid {
    Grid::new(nelx, nely, nelz).unwrap()
}

#[test]
fn parses_all_shapes() {
    let json = r#"{
        "obstacles": [
            { "type": "cube", "center": [0.5, 0.5, 0.2], "size": 0.15 },
            { "type": "cube", "center": [0.2, 0.5, 0.5], "size": [0.1, 0.2, 0.3] },
            { "type": "sphere", "center": [0.25, 0.25, 0.6], "radius": 0.1 },
            { "type": "cylinder", "center": [0.75, 0.5, 0.5], "radius": 0.08, "height": 0.7 }
        ]
    }"#;
    let config = parse_obstacle_config(json).unwrap();
    assert_eq!(config.obstacles.len(), 4);
    assert!(matches!(config.obstacles[0], ObstacleShape::Cube { size: CubeSize::Uniform(s), .. } if s == 0.15));
    assert!(matches!(
        config.obstacles[1],
        ObstacleShape::Cube { size: CubeSize::PerAxis([_, _, _]), .. }
    ));
    assert!(matches!(config.obstacles[3], ObstacleShape::Cylinder { axis: 2, .. }));
}

#[test]
fn rejects_invalid_configs() {
    let cases = [
        r#"{ "obstacles": [ { "type": "sphere", "center": [0.5, 0.5, 0.5], "radius": -0.1 } ] }"#,
        r#"{ "obstacles": [ { "type": "cone", "center": [0.5, 0.5, 0.5] } ] }"#,
        r#"{ "obstacles": [ { "type": "cylinder", "center": [0.5, 0.5, 0.5], "radius": 0.1, "height": 0.5, "axis": 3 } ] }"#,
        r#"{ "obstacles": [ { "type": "cube", "center": [0.5, 0.5, 0.5], "size": 0.0 } ] }"#,
        r#"not json"#,
    ];
    for json in cases {
        assert!(
            matches!(parse_obstacle_config(json), Err(TopoError::ObstacleConfig(_))),
            "should reject: {json}"
        );
    }
}

#[test]
fn empty_list_gives_empty_mask() {
    let g = grid(4, 3, 2);
    let config = parse_obstacle_config(r#"{ "obstacles": [] }"#).unwrap();
    let mask = create_obstacle_mask(&g, &config.obstacles);
    assert_eq!(mask.dim(), g.shape());
    assert!(mask.iter().all(|&b| !b));
}

#[test]
fn full_cube_covers_the_domain() {
    let g = grid(6, 4, 3);
    let cube = ObstacleShape::Cube {
        center: [0.5, 0.5, 0.5],
        size: CubeSize::Uniform(1.0),
    };
    let mask = create_obstacle_mask(&g, &[cube]);
    assert!(mask.iter().all(|&b| b));
}

#[test]
fn sphere_is_round_and_centred() {
    let g = grid(10, 10, 10);
    let sphere = ObstacleShape::Sphere {
        center: [0.5, 0.5, 0.5],
        radius: 0.3,
    };
    let mask = create_obstacle_mask(&g, &[sphere]);
    assert!(mask[[4, 4, 4]] && mask[[5, 5, 5]]);
    assert!(!mask[[0, 0, 0]] && !mask[[9, 9, 9]]);

    // Volume of a radius-3 ball is ~113 elements.
    let count = mask.iter().filter(|&&b| b).count();
    assert!((80..=150).contains(&count), "{count} elements inside");

    // Mirror symmetry in x.
    for ((j, i, k), &inside) in mask.indexed_iter() {
        assert_eq!(inside, mask[[j, 9 - i, k]]);
    }
}

#[test]
fn cylinder_extends_along_its_axis() {
    let g = grid(8, 8, 6);
    let cylinder = ObstacleShape::Cylinder {
        center: [0.5, 0.5, 0.5],
        radius: 0.25,
        height: 1.0,
        axis: 2,
    };
    let mask = create_obstacle_mask(&g, &[cylinder]);
    let blocked = mask.iter().filter(|&&b| b).count();
    assert!(blocked > 0);
    for j in 0..8 {
        for i in 0..8 {
            let first = mask[[j, i, 0]];
            for k in 1..6 {
                assert_eq!(mask[[j, i, k]], first, "cylinder should be prismatic along z");
            }
        }
    }
}

#[test]
fn loads_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "obstacles": [ {{ "type": "sphere", "center": [0.5, 0.5, 0.5], "radius": 0.2 }} ] }}"#
    )
    .unwrap();
    let config = load_obstacle_config(file.path()).unwrap();
    assert_eq!(config.obstacles.len(), 1);

    let missing = load_obstacle_config("/definitely/not/here.json");
    assert!(matches!(missing, Err(TopoError::Io(_))));
}
