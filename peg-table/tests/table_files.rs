use peg_table::{
    AuthoredRow, Field, FormatVersion, ValidationError, ValidationOptions, load_table, save_table,
    validate_rows,
};
use std::fs;

fn sample_rows() -> Vec<AuthoredRow> {
    vec![
        AuthoredRow::from_cells(["1", "", "Press space to begin", "space", "NA"]),
        AuthoredRow::from_cells(["101", "2", "[image:cat.png(width=200,top)]", "f,j", "1500", "f", "[correct] Nice!", "800", "black", "white"]),
        AuthoredRow::from_cells(["102", "", "Is it \"red\", or not?", "f,j", "1500", "j", "[all] Done", "", "", ""]),
        AuthoredRow::from_cells(["2", "", "Type your age", "[text(placeholder=age, maxlength=3)]", "NA"]),
    ]
}

#[test]
fn saved_table_reloads_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("table.csv");
    let rows = sample_rows();

    save_table(&path, &rows).unwrap();
    let loaded = load_table(&path).unwrap();

    assert_eq!(loaded.version, FormatVersion::V2);
    assert_eq!(loaded.rows, rows);

    let images = dir.path().join("images");
    fs::create_dir(&images).unwrap();
    fs::write(images.join("cat.png"), b"png").unwrap();
    let options = ValidationOptions {
        image_dir: images,
        check_images: true,
    };
    let first = validate_rows(&rows, &options).unwrap();
    let second = validate_rows(&loaded.rows, &options).unwrap();
    assert_eq!(first, second);
}

#[test]
fn missing_image_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let options = ValidationOptions {
        image_dir: dir.path().to_path_buf(),
        check_images: true,
    };

    let errors = validate_rows(&sample_rows(), &options).unwrap_err();
    assert_eq!(errors.len(), 1);
    let err = &errors.0[0];
    assert!(matches!(err, ValidationError::MissingImage { file, .. } if file == "cat.png"));
    assert_eq!(err.row(), Some(2));
    assert_eq!(err.field(), Some(Field::Stimulus));
    assert!(err.to_string().contains("cat.png"));
}

#[test]
fn v1_file_loads_with_default_block_repeats() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.csv");
    fs::write(
        &path,
        "Block,Stimulus,Response,Latency,Correct Response,Feedback Text,Feedback Duration,Stimulus Color,Background Color\n\
         101,A,a,NA,a,,,,\n\
         101,B,b,NA,b,,,,\n",
    )
    .unwrap();

    let loaded = load_table(&path).unwrap();
    assert_eq!(loaded.version, FormatVersion::V1);

    let options = ValidationOptions {
        image_dir: dir.path().to_path_buf(),
        check_images: true,
    };
    let table = validate_rows(&loaded.rows, &options).unwrap();
    assert_eq!(table.block(101).unwrap().repeat_count, 1);
    assert_eq!(table.trial_count(), 2);

    let upgraded = dir.path().join("new.csv");
    save_table(&upgraded, &loaded.rows).unwrap();
    let reloaded = load_table(&upgraded).unwrap();
    assert_eq!(reloaded.version, FormatVersion::V2);
    assert_eq!(reloaded.rows, loaded.rows);
}
