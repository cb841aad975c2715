mod common;

use std::io::Cursor;

use common::{photo, FakeProvider};
use edgesight::decode::{decode_bytes, decode_file};
use edgesight::{Annotator, AppConfig, ConfigError, DecodeError, Pipeline, PipelineError, RunRequest};
use image::ImageFormat;

fn encoded(format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    photo(24, 16).write_to(&mut Cursor::new(&mut bytes), format).unwrap();
    bytes
}

#[test]
fn test_unsupported_extension_rejected_before_inference() {
    let provider = FakeProvider::standard();
    let pipeline = Pipeline::with_annotator(provider, AppConfig::default(), Annotator::without_font());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upload.gif");
    std::fs::write(&path, encoded(ImageFormat::Png)).unwrap();

    let result = decode_file(&path).map(|image| pipeline.run(&image, &RunRequest::default()));

    assert!(matches!(result, Err(DecodeError::UnsupportedFormat(_))));
    assert_eq!(pipeline.provider().total_loads(), 0);
}

#[test]
fn test_supported_formats_decode() {
    let png = decode_bytes(&encoded(ImageFormat::Png), "PNG").unwrap();
    assert_eq!(png.dimensions(), (24, 16));

    let jpeg = encoded(ImageFormat::Jpeg);
    for extension in ["jpg", "jpeg", "JPG"] {
        assert_eq!(decode_bytes(&jpeg, extension).unwrap().dimensions(), (24, 16));
    }
}

#[test]
fn test_mismatched_content_is_corrupt() {
    let png = encoded(ImageFormat::Png);
    assert!(matches!(decode_bytes(&png, "jpg"), Err(DecodeError::Corrupt(_))));
    assert!(matches!(decode_bytes(&[], "png"), Err(DecodeError::Corrupt(_))));
}

#[test]
fn test_zero_and_unknown_selections() {
    let pipeline = Pipeline::with_annotator(
        FakeProvider::standard(),
        AppConfig::default(),
        Annotator::without_font(),
    );
    let image = photo(16, 16);

    let zero = RunRequest {
        target_size: Some(0),
        ..RunRequest::default()
    };
    assert!(matches!(
        pipeline.run(&image, &zero),
        Err(PipelineError::InvalidResolution(_))
    ));

    let unknown = RunRequest {
        model: Some("enormous".into()),
        ..RunRequest::default()
    };
    assert!(matches!(pipeline.run(&image, &unknown), Err(PipelineError::UnknownModel(_))));

    let bad_threshold = RunRequest {
        detect: true,
        threshold: Some(2.0),
        ..RunRequest::default()
    };
    assert!(matches!(pipeline.run(&image, &bad_threshold), Err(PipelineError::Detect(_))));
}

#[test]
fn test_config_file_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edgesight.toml");
    std::fs::write(
        &path,
        r#"
        detector = "/opt/models/detr"
        font_path = "/usr/share/fonts/custom.ttf"

        [[resolutions]]
        label = "96 x 96 (Tiny)"
        size = 96
        "#,
    )
    .unwrap();

    let config = AppConfig::from_file(&path).unwrap();
    assert_eq!(config.detector, "/opt/models/detr");
    assert_eq!(config.default_resolution(), Some(96));
    assert_eq!(config.detection_threshold, 0.7);
    assert_eq!(config.classifiers.len(), 2);

    std::fs::write(&path, "detector = \"\"").unwrap();
    assert!(matches!(AppConfig::from_file(&path), Err(ConfigError::Invalid(_))));
}
