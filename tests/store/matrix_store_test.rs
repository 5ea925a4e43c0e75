use std::path::PathBuf;

use meds_tab::store::{META_LAYOUT, MatrixLayout, merge_files, merge_matrices};
use meds_tab::utils::io::read_parquet_with_schema;
use meds_tab::{CsrMatrix, TabularError, read_matrix, write_matrix};

fn sparse_with_empty_edges() -> CsrMatrix {
    // 5x4 with an all-zero first row, last row and last column
    CsrMatrix::from_triplets(5, 4, &[(1, 0, 1.5), (2, 2, -3.0), (3, 1, 1e-12)]).unwrap()
}

#[test]
fn test_round_trip_keeps_zero_rows_and_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ts/train/0/30d/code/count.parquet");
    let matrix = sparse_with_empty_edges();
    write_matrix(&matrix, &path).unwrap();
    assert_eq!(read_matrix(&path).unwrap(), matrix);

    let (schema, _) = read_parquet_with_schema(&path).unwrap();
    assert_eq!(schema.metadata()[META_LAYOUT], MatrixLayout::Sparse.as_str());
}

#[test]
fn test_round_trip_dense_and_empty() {
    let dir = tempfile::tempdir().unwrap();

    let dense = CsrMatrix::from_dense(2, 3, &[1.0, 2.0, 0.0, 4.0, 5.0, 6.0]).unwrap();
    let path = dir.path().join("dense.parquet");
    write_matrix(&dense, &path).unwrap();
    let (schema, _) = read_parquet_with_schema(&path).unwrap();
    assert_eq!(schema.metadata()[META_LAYOUT], MatrixLayout::Dense.as_str());
    assert_eq!(read_matrix(&path).unwrap(), dense);

    for (rows, cols) in [(0, 0), (0, 7), (3, 0), (4, 4)] {
        let zeros = CsrMatrix::zeros(rows, cols);
        let path = dir.path().join(format!("zeros_{rows}_{cols}.parquet"));
        write_matrix(&zeros, &path).unwrap();
        assert_eq!(read_matrix(&path).unwrap(), zeros);
    }
}

#[test]
fn test_overwrite_replaces_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("m.parquet");
    write_matrix(&CsrMatrix::zeros(1, 1), &path).unwrap();
    let replacement = sparse_with_empty_edges();
    write_matrix(&replacement, &path).unwrap();
    assert_eq!(read_matrix(&path).unwrap(), replacement);
}

#[test]
fn test_merge_stacks_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let first = CsrMatrix::from_triplets(2, 3, &[(0, 0, 1.0)]).unwrap();
    let second = CsrMatrix::from_triplets(1, 3, &[(0, 2, 2.0)]).unwrap();
    let paths: Vec<PathBuf> = ["0", "1"]
        .iter()
        .map(|shard| dir.path().join(format!("{shard}.parquet")))
        .collect();
    write_matrix(&first, &paths[0]).unwrap();
    write_matrix(&second, &paths[1]).unwrap();

    let merged = merge_files(&paths).unwrap();
    assert_eq!(merged.shape(), (3, 3));
    assert_eq!(merged.get(0, 0), 1.0);
    assert_eq!(merged.get(2, 2), 2.0);
    assert_eq!(merged, merge_matrices(&[first, second]).unwrap());
}

#[test]
fn test_merge_shape_mismatch_names_file() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("0.parquet");
    let bad = dir.path().join("1.parquet");
    write_matrix(&CsrMatrix::zeros(2, 3), &good).unwrap();
    write_matrix(&CsrMatrix::zeros(2, 4), &bad).unwrap();

    match merge_files(&[good, bad.clone()]) {
        Err(TabularError::ShapeMismatch(msg)) => assert!(msg.contains(&bad.display().to_string()), "{msg}"),
        other => panic!("expected a shape mismatch, got {other:?}"),
    }
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.parquet");
    assert!(matches!(
        read_matrix(&path),
        Err(TabularError::MissingShardFile(p)) if p == path
    ));
}
