//! End-to-end runs of the experiment pipeline into a temporary results tree.

use clap::Parser;
use ndarray::Array3;
use topo3d::cli::Args;
use topo3d::experiment::*;
use topo3d::results::{load_density, RunMetrics, CONFIG_FILE, HISTORY_FILE, METRICS_FILE, TRACE_FILE};
use topo3d::types::Grid;

fn small_run_args(results_dir: &std::path::Path, extra: &[&str]) -> Args {
    let dir = results_dir.to_str().unwrap();
    let mut argv = vec![
        "topo3d", "--nelx", "6", "--nely", "3", "--nelz", "2",
        "--rmin", "1.5", "--maxloop", "4", "--solver", "direct",
        "--results-dir", dir,
    ];
    argv.extend_from_slice(extra);
    Args::try_parse_from(argv).unwrap()
}

#[test]
fn full_run_writes_every_artifact() {
    let root = tempfile::tempdir().unwrap();
    let args = small_run_args(
        root.path(),
        &[
            "--export-stl", "--stl-level", "0.0",
            "--save-history", "--history-frequency", "2",
            "--benchmark", "--save-benchmark",
            "--description", "pipeline smoke test",
        ],
    );
    let artifacts = run(&args).unwrap();

    let dir = root.path().join("6x3x2_no_obstacle");
    assert_eq!(artifacts.experiment_dir, dir);
    for file in [CONFIG_FILE, METRICS_FILE, TRACE_FILE, HISTORY_FILE, "optimized_design.json"] {
        assert!(dir.join(file).is_file(), "missing {file}");
    }

    let density = load_density(&artifacts.density).unwrap();
    assert_eq!(density.dim(), (3, 6, 2));
    assert!(density.iter().all(|&v| (0.0..=1.0).contains(&v)));

    let metrics: RunMetrics =
        serde_json::from_str(&std::fs::read_to_string(dir.join(METRICS_FILE)).unwrap()).unwrap();
    assert_eq!(metrics.experiment_name, artifacts.metrics.experiment_name);
    assert_eq!(metrics.iterations, artifacts.metrics.iterations);
    assert!((metrics.final_objective - artifacts.metrics.final_objective).abs() <= 1e-9 * metrics.final_objective);
    assert_eq!(metrics.total_elements, 36);
    assert_eq!(metrics.design_elements, 36);
    assert_eq!(metrics.description.as_deref(), Some("pipeline smoke test"));
    assert!(metrics.iterations >= 1 && metrics.iterations <= 4);
    assert!(metrics.stl_exported);
    let stl = artifacts.stl.as_ref().unwrap();
    assert!(stl.is_file());

    let grid = Grid::new(6, 3, 2).unwrap();
    let bench = root.path().join("benchmarks").join(benchmark_file_name(&grid));
    assert!(bench.is_file(), "missing {}", bench.display());
    assert!(bench.ends_with("benchmark_size_36_nelx6_nely3_nelz2.json"));
    if cfg!(target_os = "linux") {
        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&bench).unwrap()).unwrap();
        assert!(summary["peak_memory_mb"].as_f64().unwrap() > 0.0);
    }

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&artifacts.density).unwrap()).unwrap();
    assert_eq!(raw["dim"], serde_json::json!([3, 6, 2]));
    assert_eq!(raw["order"], "F");
    // Element 1 sits below element 0 in the first column.
    assert!((raw["data"][1].as_f64().unwrap() - density[[1, 0, 0]]).abs() < 1e-12);

    assert_eq!(artifacts.slice.lines().count(), 3);
}

#[test]
fn obstacle_run_keeps_obstacles_void() {
    let root = tempfile::tempdir().unwrap();
    let obstacle_file = root.path().join("block.json");
    std::fs::write(
        &obstacle_file,
        r#"{ "obstacles": [ { "type": "cube", "center": [0.5, 0.5, 0.5], "size": [0.34, 0.34, 1.0] } ] }"#,
    )
    .unwrap();
    let args = small_run_args(
        root.path(),
        &["--obstacle-config", obstacle_file.to_str().unwrap()],
    );
    let experiment = setup_experiment(&args).unwrap();
    let mask = experiment.obstacle_mask.clone().unwrap();
    let blocked = mask.iter().filter(|&&b| b).count();
    assert!(blocked > 0 && blocked < 36);

    let artifacts = run(&args).unwrap();
    assert!(artifacts.experiment_dir.ends_with("6x3x2_block"));
    assert!(artifacts.stl.is_none());
    assert_eq!(artifacts.metrics.design_elements, 36 - blocked);

    let density = load_density(&artifacts.density).unwrap();
    for (d, &b) in density.iter().zip(mask.iter()) {
        if b {
            assert_eq!(*d, 0.0);
        }
    }
}

#[test]
fn export_is_skipped_when_disabled_and_survives_empty_designs() {
    let dir = tempfile::tempdir().unwrap();
    let solid = Array3::from_elem((2, 2, 2), 1.0);
    assert!(!export_result_to_stl(false, &solid, dir.path(), 0.5, true, 5));
    assert!(!dir.path().join(STL_FILE).exists());

    let void = Array3::zeros((2, 2, 2));
    assert!(!export_result_to_stl(true, &void, dir.path(), 0.5, true, 5));

    assert!(export_result_to_stl(true, &solid, dir.path(), 0.5, true, 5));
    assert!(dir.path().join(STL_FILE).is_file());
}

#[test]
fn slice_rendering() {
    let mut density = Array3::zeros((2, 3, 2));
    density[[0, 0, 1]] = 0.9;
    density[[1, 2, 1]] = 0.6;
    density[[1, 1, 0]] = 1.0;
    let text = render_slice(&density, 0.5, 1).unwrap();
    assert_eq!(text, "█  \n  █\n");
    assert!(render_slice(&density, 0.5, 2).is_err());
}
