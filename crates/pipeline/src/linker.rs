//! Pairwise linking of registered stages by name.

use tracing::{debug, error};

use crate::backend::Backend;
use crate::error::{LinkRole, PipelineError, PipelineResult};
use crate::registry::StageRegistry;

/// Links every adjacent pair of `names` in order and returns the number of
/// links made.
///
/// Sequences of zero or one names link nothing. Resolution of a pair happens
/// before any connect call for that pair, and the first failure aborts the
/// walk without undoing earlier links. A stored filter on the source of a
/// pair is consumed by that pair's link attempt whether it succeeds or not.
pub fn link_by_name<B, S>(
    registry: &mut StageRegistry<B>,
    backend: &B,
    names: &[S],
) -> PipelineResult<usize>
where
    B: Backend,
    S: AsRef<str>,
{
    let mut linked = 0;

    for pair in names.windows(2) {
        let (src_name, dst_name) = (pair[0].as_ref(), pair[1].as_ref());

        let src = resolve(registry, src_name, LinkRole::Source)?;
        let dst = resolve(registry, dst_name, LinkRole::Child)?;

        match registry.take_filter(src_name) {
            Some(filter) => {
                debug!("Linking {} to {} with caps: {}", src_name, dst_name, filter);
                let result = backend.link_filtered(&src, &dst, &filter);
                let description = filter.to_string();
                backend.release_filter(filter);
                result.map_err(|source| {
                    error!(
                        "Failed to link {} to {} with caps: {}",
                        src_name, dst_name, description
                    );
                    PipelineError::Link {
                        src: src_name.to_string(),
                        dst: dst_name.to_string(),
                        filter: Some(description),
                        source,
                    }
                })?;
            }
            None => {
                debug!("Linking {} to {}", src_name, dst_name);
                backend.link(&src, &dst).map_err(|source| {
                    error!("Failed to link {} to {}", src_name, dst_name);
                    PipelineError::Link {
                        src: src_name.to_string(),
                        dst: dst_name.to_string(),
                        filter: None,
                        source,
                    }
                })?;
            }
        }
        linked += 1;
    }

    Ok(linked)
}

fn resolve<B: Backend>(
    registry: &StageRegistry<B>,
    name: &str,
    role: LinkRole,
) -> PipelineResult<B::Element> {
    registry.lookup(name).cloned().ok_or_else(|| {
        error!(
            "Failed to link elements. Could not find {} element by name: {}",
            role, name
        );
        PipelineError::UnresolvedLink {
            role,
            name: name.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{Call, RecordedContainer, RecordingBackend};

    fn registry_with(
        backend: &RecordingBackend,
        stages: &[(&str, Option<&str>)],
    ) -> (StageRegistry<RecordingBackend>, RecordedContainer) {
        let container = backend.new_pipeline("test").unwrap();
        let mut registry = StageRegistry::new();
        for (name, filter) in stages {
            match filter {
                Some(spec) => registry
                    .create_filtered_stage(backend, &container, "identity", name, spec)
                    .map(|_| ()),
                None => registry
                    .create_stage(backend, &container, "identity", name)
                    .map(|_| ()),
            }
            .unwrap();
        }
        backend.clear_calls();
        (registry, container)
    }

    fn link(src: &str, dst: &str) -> Call {
        Call::Link {
            src: src.into(),
            dst: dst.into(),
        }
    }

    #[test]
    fn empty_and_single_sequences_link_nothing() {
        let backend = RecordingBackend::new();
        let (mut registry, _container) = registry_with(&backend, &[("only", None)]);

        let empty: [&str; 0] = [];
        assert_eq!(link_by_name(&mut registry, &backend, &empty).unwrap(), 0);
        assert_eq!(link_by_name(&mut registry, &backend, &["only"]).unwrap(), 0);
        // A single name is not even resolved.
        assert_eq!(link_by_name(&mut registry, &backend, &["ghost"]).unwrap(), 0);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn links_adjacent_pairs_in_order() {
        let backend = RecordingBackend::new();
        let (mut registry, _container) =
            registry_with(&backend, &[("a", None), ("b", None), ("c", None)]);

        let linked = link_by_name(&mut registry, &backend, &["a", "b", "c"]).unwrap();

        assert_eq!(linked, 2);
        assert_eq!(backend.link_calls(), vec![link("a", "b"), link("b", "c")]);
    }

    #[test]
    fn first_failure_stops_the_walk() {
        let backend = RecordingBackend::new().fail_link("a", "b");
        let (mut registry, _container) =
            registry_with(&backend, &[("a", None), ("b", None), ("c", None)]);

        let err = link_by_name(&mut registry, &backend, &["a", "b", "c"]).unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Link { ref src, ref dst, filter: None, .. } if src == "a" && dst == "b"
        ));
        assert_eq!(backend.link_calls(), vec![link("a", "b")]);
    }

    #[test]
    fn earlier_links_are_not_rolled_back() {
        let backend = RecordingBackend::new().fail_link("b", "c");
        let (mut registry, _container) =
            registry_with(&backend, &[("a", None), ("b", None), ("c", None)]);

        assert!(link_by_name(&mut registry, &backend, &["a", "b", "c"]).is_err());
        assert_eq!(backend.link_calls(), vec![link("a", "b"), link("b", "c")]);
    }

    #[test]
    fn unresolved_child_is_named() {
        let backend = RecordingBackend::new();
        let (mut registry, _container) = registry_with(&backend, &[("src", None), ("sink", None)]);

        let err = link_by_name(&mut registry, &backend, &["src", "missing", "sink"]).unwrap_err();

        assert!(matches!(
            err,
            PipelineError::UnresolvedLink { role: LinkRole::Child, ref name } if name == "missing"
        ));
        assert!(backend.link_calls().is_empty());
    }

    #[test]
    fn unresolved_source_is_named() {
        let backend = RecordingBackend::new();
        let (mut registry, _container) = registry_with(&backend, &[("sink", None)]);

        let err = link_by_name(&mut registry, &backend, &["nope", "sink"]).unwrap_err();

        assert!(matches!(
            err,
            PipelineError::UnresolvedLink { role: LinkRole::Source, ref name } if name == "nope"
        ));
    }

    #[test]
    fn filter_is_consumed_even_when_the_link_fails() {
        let backend = RecordingBackend::new().fail_link("convert", "sink");
        let (mut registry, _container) =
            registry_with(&backend, &[("convert", Some("video/x-raw")), ("sink", None)]);

        let err = link_by_name(&mut registry, &backend, &["convert", "sink"]).unwrap_err();
        assert!(err.to_string().contains("with caps: video/x-raw"));
        assert!(!registry.has_filter("convert"));
        assert!(backend.calls().contains(&Call::ReleaseFilter {
            description: "video/x-raw".into()
        }));
    }
}
