//! The MATLAB client against stand-in executables.
#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};

use edge_boxes::client::routine_script;
use edge_boxes::matfile::{write_cell_of_matrices, Matrix};
use edge_boxes::{
    ExternalComputeClient, MatlabClient, MatlabConfig, Proposal, ProposalBridge, ProposalError,
};

fn stand_in(program: &str) -> MatlabConfig {
    MatlabConfig {
        program: PathBuf::from(program),
        flags: Vec::new(),
        toolbox_dir: PathBuf::from("/opt/edges/toolbox"),
        work_dir: std::env::temp_dir(),
        persist_path: false,
    }
}

/// A shell script that copies `fixture` to the results path named in the MATLAB script.
fn copying_stand_in(dir: &Path, fixture: &Path) -> MatlabConfig {
    let script = dir.join("fake_matlab.sh");
    let body = format!(
        "out=$(printf '%s\\n' \"$1\" | sed -n \"s/.*, '\\([^']*\\)'); catch.*/\\1/p\")\ncp '{}' \"$out\"\n",
        fixture.display()
    );
    fs::write(&script, body).unwrap();
    MatlabConfig {
        flags: vec![script.to_string_lossy().into_owned()],
        ..stand_in("sh")
    }
}

#[test]
fn successful_run_yields_zero_based_rows_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = dir.path().join("results.mat");
    let rows = vec![
        Matrix::from_rows(&[[1.0, 2.0, 30.0, 40.0, 0.9], [5.0, 6.0, 7.0, 8.0, 0.1]]),
        Matrix::empty(),
    ];
    write_cell_of_matrices(&fixture, "all_boxes", &rows, false).unwrap();
    let cfg = copying_stand_in(dir.path(), &fixture);

    let client = MatlabClient::new(cfg.clone());
    let job = client
        .submit(&[PathBuf::from("a.jpg"), PathBuf::from("b.jpg")], "edge_boxes_wrapper")
        .unwrap();
    let output = job.output_path().to_path_buf();
    let batch = client.wait(job).unwrap().into_zero_based();
    assert!(!output.exists());
    assert_eq!(
        batch[0],
        vec![
            Proposal::from_row([0.0, 1.0, 30.0, 40.0, 0.9]),
            Proposal::from_row([4.0, 5.0, 7.0, 8.0, 0.1]),
        ]
    );
    assert!(batch[1].is_empty());

    let windows = ProposalBridge::matlab(cfg)
        .get_windows(&["a.jpg", "b.jpg"])
        .unwrap();
    assert_eq!(windows, batch);
}

#[test]
fn nonzero_exit_is_an_external_process_error_and_cleans_up() {
    let client = MatlabClient::new(stand_in("false"));
    let job = client
        .submit(&[PathBuf::from("a.jpg")], "edge_boxes_wrapper")
        .unwrap();
    let output = job.output_path().to_path_buf();
    assert!(output.exists());
    assert_eq!(output.extension().and_then(|e| e.to_str()), Some("mat"));

    let err = client.wait(job).unwrap_err();
    assert!(matches!(err, ProposalError::ExternalProcess { .. }), "{err}");
    assert!(!output.exists());
}

#[test]
fn successful_exit_without_results_is_a_read_error_and_cleans_up() {
    let client = MatlabClient::new(stand_in("true"));
    let job = client
        .submit(&[PathBuf::from("a.jpg")], "edge_boxes_wrapper")
        .unwrap();
    let output = job.output_path().to_path_buf();

    let err = client.wait(job).unwrap_err();
    assert!(matches!(err, ProposalError::MatFile(_)), "{err}");
    assert!(!output.exists());
}

#[test]
fn bridge_surfaces_process_failure() {
    let bridge = ProposalBridge::matlab(stand_in("false"));
    assert!(matches!(
        bridge.get_windows(&["a.jpg", "b.jpg"]),
        Err(ProposalError::ExternalProcess { status: Some(1) })
    ));
}

#[test]
fn failing_bootstrap_is_tolerated() {
    let cfg = MatlabConfig {
        persist_path: true,
        ..stand_in("false")
    };
    // The bootstrap run fails too, but only the routine's exit status decides the outcome.
    let err = ProposalBridge::matlab(cfg).get_windows(&["a.jpg"]).unwrap_err();
    assert!(matches!(err, ProposalError::ExternalProcess { .. }));
}

#[test]
fn missing_executable_is_a_spawn_error() {
    let client = MatlabClient::new(stand_in("/nonexistent/matlab-binary"));
    let err = client
        .submit(&[PathBuf::from("a.jpg")], "edge_boxes_wrapper")
        .unwrap_err();
    assert!(matches!(err, ProposalError::Spawn { .. }));
}

#[test]
fn invalid_routine_is_refused() {
    let client = MatlabClient::new(stand_in("true"));
    let err = client
        .submit(&[PathBuf::from("a.jpg")], "evil; !rm")
        .unwrap_err();
    assert!(matches!(err, ProposalError::InvalidRoutine(_)));
}

#[test]
fn script_wraps_the_routine_in_try_catch() {
    let script = routine_script(
        &PathBuf::from("/opt/edges/toolbox"),
        "edge_boxes_wrapper",
        &[PathBuf::from("a.jpg"), PathBuf::from("b.jpg")],
        &PathBuf::from("/tmp/out.mat"),
    );
    assert_eq!(
        script,
        "addpath(genpath('/opt/edges/toolbox')); try; edge_boxes_wrapper({'a.jpg','b.jpg'}, '/tmp/out.mat'); catch err; disp(getReport(err)); exit(1); end; exit(0);"
    );
}
