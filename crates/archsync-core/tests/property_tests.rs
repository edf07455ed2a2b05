//! # Property-Based Tests
//!
//! Determinism and consistency invariants of diffs, batches and version
//! numbering.

use archsync_core::{
    ApplyRequest, Constraint, ConstraintBatch, DiffStatus, Edge, EnvironmentKey,
    EnvironmentVersion, InMemoryBackend, Resource, TopologyDiff, TopologyId,
};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;

// =============================================================================
// STRATEGIES
// =============================================================================

const NAMES: [&str; 6] = ["web", "api", "worker", "assets", "queue", "db"];
const PROPERTIES: [&str; 3] = ["size", "region", "tier"];

fn topology_id() -> impl Strategy<Value = TopologyId> {
    prop::sample::select(NAMES.to_vec()).prop_map(|n| TopologyId::new("aws", "ec2", n))
}

fn properties() -> impl Strategy<Value = BTreeMap<String, serde_json::Value>> {
    btree_map(
        prop::sample::select(PROPERTIES.to_vec()).prop_map(str::to_string),
        (0u8..3).prop_map(|v| json!(v)),
        0..3,
    )
}

fn environment(name: &'static str) -> impl Strategy<Value = EnvironmentVersion> {
    (
        btree_map(topology_id(), properties(), 0..5),
        vec((topology_id(), topology_id()), 0..4),
    )
        .prop_map(move |(resources, edges)| {
            let mut version = EnvironmentVersion::new("arch", name, 1);
            for (id, props) in resources {
                let mut resource = Resource::new(id);
                resource.properties = props;
                version = version.with_resource(resource);
            }
            for (source, target) in edges {
                version = version.with_edge(Edge::new(source, target));
            }
            version
        })
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Every computed diff satisfies `Changed <=> properties non-empty`.
    #[test]
    fn computed_diffs_are_consistent(
        source in environment("prod"),
        target in environment("dev"),
    ) {
        let diff = TopologyDiff::between(&source, &target);
        prop_assert!(diff.validate().is_ok());
        for d in diff.resources.values().chain(diff.edges.values()) {
            prop_assert_eq!(d.status == DiffStatus::Changed, !d.properties.is_empty());
        }
    }

    /// `Added` means present in the target only; `Removed` the reverse.
    #[test]
    fn diff_orientation_follows_target(
        source in environment("prod"),
        target in environment("dev"),
    ) {
        let diff = TopologyDiff::between(&source, &target);
        for (key, d) in &diff.resources {
            let id = TopologyId::parse(key).expect("key");
            let in_source = source.resource(&id).is_some();
            let in_target = target.resource(&id).is_some();
            match d.status {
                DiffStatus::Added => prop_assert!(in_target && !in_source),
                DiffStatus::Removed => prop_assert!(in_source && !in_target),
                DiffStatus::Changed => prop_assert!(in_source && in_target),
            }
        }
    }

    /// An environment never differs from itself.
    #[test]
    fn self_diff_is_empty(version in environment("dev")) {
        prop_assert!(TopologyDiff::between(&version, &version).is_empty());
    }

    /// Diffing is deterministic.
    #[test]
    fn diff_is_deterministic(
        source in environment("prod"),
        target in environment("dev"),
    ) {
        prop_assert_eq!(
            TopologyDiff::between(&source, &target),
            TopologyDiff::between(&source, &target)
        );
    }

    /// A batch keeps one constraint per key, holding the last staged value.
    #[test]
    fn batch_keeps_last_write_per_key(
        edits in vec((topology_id(), prop::sample::select(PROPERTIES.to_vec()), 0u8..5), 1..40)
    ) {
        let mut batch = ConstraintBatch::new();
        let mut expected = BTreeMap::new();
        for (id, property, value) in &edits {
            batch
                .stage(1, Constraint::set_property(id.clone(), *property, json!(value)))
                .expect("stage");
            expected.insert((id.clone(), property.to_string()), *value);
        }

        prop_assert_eq!(batch.len(), expected.len());
        for ((id, property), value) in expected {
            let staged = Constraint::set_property(id, property, json!(value));
            prop_assert!(batch.constraints().contains(&staged));
        }
    }

    /// Applied versions strictly increase whatever base they were computed on.
    #[test]
    fn applied_versions_strictly_increase(bases in vec(0usize..8, 1..12)) {
        let backend = InMemoryBackend::new();
        let key = EnvironmentKey::new("arch", "dev");
        let web = TopologyId::new("aws", "ec2", "web");
        backend
            .create_environment(&key, vec![Resource::new(web.clone())], vec![])
            .expect("create");

        let mut seen = vec![1u64];
        for (step, pick) in bases.into_iter().enumerate() {
            let base = seen[pick % seen.len()];
            let request = ApplyRequest {
                version: base,
                expected_head: None,
                constraints: vec![Constraint::set_property(web.clone(), "size", json!(step))],
            };
            let result = backend.submit(&key, &request).expect("apply");
            prop_assert!(seen.iter().all(|v| result.version > *v));
            seen.push(result.version);
        }
    }
}
