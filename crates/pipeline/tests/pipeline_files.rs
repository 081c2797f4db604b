use stagegraph::recording::{Call, RecordingBackend};
use stagegraph::{PipelineConfig, PipelineError, State};
use std::fs;
use std::io::Write;
use std::path::Path;

fn pipelines_dir() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("pipelines")
}

#[test]
fn test_bundled_pipelines_build_on_the_recording_runtime() {
    let mut checked = 0;
    for entry in fs::read_dir(pipelines_dir()).expect("Failed to read pipelines directory") {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let config = PipelineConfig::load(&path).expect("Failed to parse pipeline config");
        let backend = RecordingBackend::new();
        let pipeline = config
            .build(backend.clone())
            .unwrap_or_else(|e| panic!("{} failed to build: {e}", path.display()));

        let expected_links: usize = config.links.iter().map(|chain| chain.len() - 1).sum();
        assert_eq!(backend.link_calls().len(), expected_links, "{}", path.display());
        assert_eq!(pipeline.registry().len(), config.stages.len());
        checked += 1;
    }
    assert!(checked > 0, "no pipeline files found");
}

#[test]
fn test_rtsp_viewer_filter_lands_on_convert_to_sink() {
    let config = PipelineConfig::load(pipelines_dir().join("rtsp_viewer.yaml")).unwrap();
    let backend = RecordingBackend::new();
    let _pipeline = config.build(backend.clone()).unwrap();

    assert!(backend.link_calls().contains(&Call::LinkFiltered {
        src: "videoconvert".into(),
        dst: "videosink".into(),
        filter: "video/x-raw, format=(string)I420".into(),
    }));
    assert_eq!(backend.state_of("rtsp_viewer"), Some(State::Playing));
}

#[test]
fn test_json_topology_from_disk() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{
            "name": "json",
            "options": {{ "create_loop": false }},
            "stages": [
                {{ "name": "a", "type": "fakesrc" }},
                {{ "name": "b", "type": "fakesink" }}
            ],
            "links": [["a", "b"]]
        }}"#
    )
    .unwrap();

    let config = PipelineConfig::load(file.path()).unwrap();
    assert!(!config.options.create_loop);
    assert!(config.options.init_runtime);

    let backend = RecordingBackend::new();
    let pipeline = config.build(backend.clone()).unwrap();
    assert!(pipeline.loop_handle().is_none());
    assert_eq!(backend.link_calls().len(), 1);
}

#[test]
fn test_build_surfaces_link_failures() {
    let config = PipelineConfig::from_yaml_str(
        r#"
name: broken
stages:
  - { name: a, type: fakesrc }
  - { name: b, type: fakesink }
links:
  - [a, b]
"#,
    )
    .unwrap();
    let backend = RecordingBackend::new().fail_link("a", "b");

    let err = config.build(backend).err().expect("link should fail");
    assert!(matches!(err, PipelineError::Link { .. }));
}

#[test]
fn test_unreadable_file_is_an_io_error() {
    let err = PipelineConfig::load("/nonexistent/pipeline.yaml").unwrap_err();
    assert!(matches!(err, PipelineError::IoError(_)));
}
