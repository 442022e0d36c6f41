//! Loading `all_boxes` from MAT files.

use edge_boxes::matfile::{write_cell_of_matrices, MatFile, MatValue, Matrix};
use edge_boxes::results::load_all_boxes;
use edge_boxes::ProposalError;

#[test]
fn compressed_cell_array_loads_row_by_row() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("boxes.mat");
    let first = Matrix::from_rows(&[[1.0, 2.0, 30.0, 40.0, 0.8], [5.0, 6.0, 70.0, 80.0, 0.2]]);
    let second = Matrix::from_rows(&[[9.0, 9.0, 9.0, 9.0, 0.5]]);
    write_cell_of_matrices(&path, "all_boxes", &[first, second], true)?;

    let rows = load_all_boxes(&path)?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], vec![[1.0, 2.0, 30.0, 40.0, 0.8], [5.0, 6.0, 70.0, 80.0, 0.2]]);
    assert_eq!(rows[1], vec![[9.0, 9.0, 9.0, 9.0, 0.5]]);
    Ok(())
}

#[test]
fn header_and_cell_dims_are_exposed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("boxes.mat");
    write_cell_of_matrices(&path, "all_boxes", &vec![Matrix::empty(); 3], false)?;

    let file = MatFile::open(&path)?;
    assert!(file.description.starts_with("MATLAB 5.0 MAT-file"));
    assert_eq!(file.variable_names().collect::<Vec<_>>(), vec!["all_boxes"]);
    match file.get("all_boxes") {
        Some(MatValue::Cell { dims, items }) => {
            assert_eq!(dims, &vec![1, 3]);
            assert_eq!(items.len(), 3);
        }
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}

#[test]
fn wrong_column_count_is_malformed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("boxes.mat");
    write_cell_of_matrices(&path, "all_boxes", &[Matrix::from_rows(&[[1.0, 2.0, 3.0, 4.0]])], false)?;
    assert!(matches!(
        load_all_boxes(&path),
        Err(ProposalError::MalformedResults(_))
    ));
    Ok(())
}

#[test]
fn missing_variable_is_reported() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("boxes.mat");
    write_cell_of_matrices(&path, "something_else", &[], false)?;
    let err = load_all_boxes(&path).unwrap_err();
    assert!(err.to_string().contains("all_boxes"), "{err}");
    Ok(())
}

#[test]
fn truncated_file_is_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("boxes.mat");
    write_cell_of_matrices(&path, "all_boxes", &[Matrix::from_rows(&[[1.0, 2.0, 3.0, 4.0, 0.5]])], false)?;
    let bytes = std::fs::read(&path)?;
    std::fs::write(&path, &bytes[..bytes.len() - 12])?;
    assert!(matches!(load_all_boxes(&path), Err(ProposalError::MatFile(_))));
    Ok(())
}
