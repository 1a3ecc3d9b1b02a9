use std::fs::File;
use std::io::Write;

use plate_config::{GridSpec, Setpoint, generate_grid, load_setpoints_csv, write_setpoints_csv};
use rstest::rstest;
use tempfile::tempdir;

fn write(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("setpoints.csv");
    let mut f = File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    (dir, path)
}

#[test]
fn loads_rows_with_whitespace_and_comments() {
    let (_dir, path) = write("# plate A\n0, 0\n 9.5 ,0\n\n13,4.25\n");
    let pts = load_setpoints_csv(&path).unwrap();
    assert_eq!(
        pts,
        vec![
            Setpoint::new(0.0, 0.0),
            Setpoint::new(9.5, 0.0),
            Setpoint::new(13.0, 4.25)
        ]
    );
}

#[rstest]
#[case("0, 0\n1, 2, 3\n", "row 2")]
#[case("0, 0\n1, 2\nabc, 2\n", "row 3")]
#[case("7\n", "row 1")]
#[case("0, inf\n", "row 1")]
fn rejects_bad_rows_with_row_number(#[case] contents: &str, #[case] expected: &str) {
    let (_dir, path) = write(contents);
    let err = load_setpoints_csv(&path).unwrap_err();
    assert!(format!("{err}").contains(expected), "unexpected error: {err}");
}

#[test]
fn rejects_empty_file() {
    let (_dir, path) = write("# nothing here\n");
    let err = load_setpoints_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("no rows"));
}

#[test]
fn missing_file_names_path() {
    let err = load_setpoints_csv(std::path::Path::new("/nonexistent/setpoints.csv")).unwrap_err();
    assert!(format!("{err}").contains("setpoints.csv"));
}

#[test]
fn generated_grid_survives_the_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("grid.csv");
    let spec = GridSpec {
        rows: 2,
        columns: 3,
        ..GridSpec::default()
    };
    let grid = generate_grid(&spec);
    write_setpoints_csv(&path, &grid).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().next(), Some("0, 0"));
    assert_eq!(text.lines().nth(3), Some("18, 9"));
    assert_eq!(load_setpoints_csv(&path).unwrap(), grid);
}
