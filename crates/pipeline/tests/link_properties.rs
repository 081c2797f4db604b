use proptest::prelude::*;
use stagegraph::recording::{Call, RecordingBackend};
use stagegraph::{Pipeline, PipelineOptions};

fn pipeline_with(backend: &RecordingBackend, count: usize) -> (Pipeline<RecordingBackend>, Vec<String>) {
    let options = PipelineOptions {
        create_loop: false,
        ..PipelineOptions::default()
    };
    let mut pipeline = Pipeline::new(backend.clone(), "prop", options).unwrap();
    let names: Vec<String> = (0..count).map(|i| format!("stage{i}")).collect();
    for name in &names {
        pipeline.create_stage("identity", name).unwrap();
    }
    backend.clear_calls();
    (pipeline, names)
}

proptest! {
    #[test]
    fn chain_of_n_issues_n_minus_one_links_in_order(count in 0usize..12) {
        let backend = RecordingBackend::new();
        let (mut pipeline, names) = pipeline_with(&backend, count);

        let linked = pipeline.link_by_name(names.as_slice()).unwrap();

        let expected: Vec<Call> = names
            .windows(2)
            .map(|pair| Call::Link { src: pair[0].clone(), dst: pair[1].clone() })
            .collect();
        prop_assert_eq!(linked, count.saturating_sub(1));
        prop_assert_eq!(backend.link_calls(), expected);
    }

    #[test]
    fn walk_stops_at_the_first_failing_pair(count in 2usize..12, fail_at in 0usize..11) {
        let fail_at = fail_at % (count - 1);
        let src = format!("stage{fail_at}");
        let dst = format!("stage{}", fail_at + 1);
        let backend = RecordingBackend::new().fail_link(&src, &dst);
        let (mut pipeline, names) = pipeline_with(&backend, count);

        prop_assert!(pipeline.link_by_name(names.as_slice()).is_err());

        let calls = backend.link_calls();
        prop_assert_eq!(calls.len(), fail_at + 1);
        prop_assert_eq!(calls.last(), Some(&Call::Link { src, dst }));
    }

    #[test]
    fn unknown_name_anywhere_prevents_that_pair(count in 2usize..10, hole in 0usize..10) {
        let hole = hole % count;
        let backend = RecordingBackend::new();
        let (mut pipeline, mut names) = pipeline_with(&backend, count);
        names[hole] = "unregistered".to_string();

        let err = pipeline.link_by_name(names.as_slice()).unwrap_err();

        prop_assert!(err.to_string().contains("unregistered"));
        // Pairs before the hole link; the pair that reaches the hole does not.
        prop_assert_eq!(backend.link_calls().len(), hole.saturating_sub(1));
    }
}
