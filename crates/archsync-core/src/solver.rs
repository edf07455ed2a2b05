//! # Reference Solver
//!
//! Applies a constraint batch to a base version, in order, the way the
//! development server does. Every invalid constraint is reported; if any
//! is invalid the whole batch is rejected (all-or-nothing).

use crate::constraint::{Constraint, EdgeOperator, GlobalOperator, ResourceOperator};
use crate::types::{
    ArchsyncError, ConfigError, Edge, EnvironmentVersion, PropertyValue, Resource, TopologyId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Allowed property names per resource type.
///
/// Types not listed are unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceSchema {
    types: BTreeMap<String, BTreeSet<String>>,
}

impl ResourceSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict a resource type to the given properties.
    #[must_use]
    pub fn with_type<I, S>(mut self, kind: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types
            .insert(kind.into(), properties.into_iter().map(Into::into).collect());
        self
    }

    /// Whether `property` is valid on resources of type `kind`.
    #[must_use]
    pub fn allows(&self, kind: &str, property: &str) -> bool {
        self.types
            .get(kind)
            .is_none_or(|allowed| allowed.contains(property))
    }
}

/// Apply `constraints` to `base`. The result keeps `base`'s identifiers and
/// version number; the caller assigns the new version.
pub fn solve(
    base: &EnvironmentVersion,
    constraints: &[Constraint],
    schema: &ResourceSchema,
) -> Result<EnvironmentVersion, ArchsyncError> {
    let mut work = Working {
        resources: base.resources.clone(),
        edges: base.edges.clone(),
        errors: Vec::new(),
    };

    for constraint in constraints {
        match constraint {
            Constraint::Resource {
                operator,
                target,
                property,
                value,
            } => work.resource(*operator, target, property, value, schema),
            Constraint::Edge {
                operator,
                source,
                target,
            } => work.edge(*operator, source, target),
            Constraint::Global {
                operator,
                node,
                replacement,
            } => work.global(*operator, node, replacement.as_ref()),
        }
    }

    if !work.errors.is_empty() {
        return Err(ArchsyncError::Config(work.errors));
    }

    Ok(EnvironmentVersion {
        architecture_id: base.architecture_id.clone(),
        environment_id: base.environment_id.clone(),
        version: base.version,
        resources: work.resources,
        edges: work.edges,
        config_errors: Vec::new(),
    })
}

struct Working {
    resources: BTreeMap<TopologyId, Resource>,
    edges: BTreeSet<Edge>,
    errors: Vec<ConfigError>,
}

impl Working {
    fn resource(
        &mut self,
        operator: ResourceOperator,
        target: &TopologyId,
        property: &str,
        value: &PropertyValue,
        schema: &ResourceSchema,
    ) {
        let Some(resource) = self.resources.get_mut(target) else {
            self.errors
                .push(ConfigError::resource(target.clone(), "resource does not exist"));
            return;
        };
        if !schema.allows(&target.kind, property) {
            self.errors.push(ConfigError::property(
                target.clone(),
                property,
                format!("unknown property for resource type '{}'", target.kind),
            ));
            return;
        }

        match operator {
            ResourceOperator::Equals => {
                resource.properties.insert(property.to_string(), value.clone());
            }
            ResourceOperator::Add => match resource.properties.get_mut(property) {
                None => {
                    resource
                        .properties
                        .insert(property.to_string(), PropertyValue::Array(vec![value.clone()]));
                }
                Some(PropertyValue::Array(items)) => {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
                Some(_) => self.errors.push(ConfigError::property(
                    target.clone(),
                    property,
                    "property is not a list",
                )),
            },
            ResourceOperator::Remove => {
                if value.is_null() {
                    resource.properties.remove(property);
                    return;
                }
                match resource.properties.get_mut(property) {
                    None => {}
                    Some(PropertyValue::Array(items)) => items.retain(|item| item != value),
                    Some(_) => self.errors.push(ConfigError::property(
                        target.clone(),
                        property,
                        "property is not a list",
                    )),
                }
            }
        }
    }

    fn edge(&mut self, operator: EdgeOperator, source: &TopologyId, target: &TopologyId) {
        match operator {
            EdgeOperator::MustExist => {
                let mut dangling = false;
                for endpoint in [source, target] {
                    if !self.resources.contains_key(endpoint) {
                        self.errors.push(ConfigError::resource(
                            endpoint.clone(),
                            "edge endpoint does not exist",
                        ));
                        dangling = true;
                    }
                }
                if !dangling {
                    self.edges.insert(Edge::new(source.clone(), target.clone()));
                }
            }
            EdgeOperator::MustNotExist => {
                self.edges.remove(&Edge::new(source.clone(), target.clone()));
            }
        }
    }

    fn global(&mut self, operator: GlobalOperator, node: &TopologyId, replacement: Option<&TopologyId>) {
        match operator {
            GlobalOperator::Add => {
                self.resources
                    .entry(node.clone())
                    .or_insert_with(|| Resource::new(node.clone()));
            }
            GlobalOperator::Import => {
                self.resources
                    .entry(node.clone())
                    .or_insert_with(|| Resource::new(node.clone()))
                    .imported = true;
            }
            GlobalOperator::Remove => {
                if self.resources.remove(node).is_none() {
                    self.errors
                        .push(ConfigError::resource(node.clone(), "resource does not exist"));
                    return;
                }
                self.edges.retain(|e| !e.touches(node));
            }
            GlobalOperator::Replace => self.replace(node, replacement),
        }
    }

    fn replace(&mut self, node: &TopologyId, replacement: Option<&TopologyId>) {
        let Some(replacement) = replacement else {
            self.errors
                .push(ConfigError::resource(node.clone(), "replace requires a replacement"));
            return;
        };
        if self.resources.contains_key(replacement) {
            self.errors.push(ConfigError::resource(
                replacement.clone(),
                "replacement already exists",
            ));
            return;
        }
        let Some(mut resource) = self.resources.remove(node) else {
            self.errors
                .push(ConfigError::resource(node.clone(), "resource does not exist"));
            return;
        };

        resource.id = replacement.clone();
        self.resources.insert(replacement.clone(), resource);

        let edges = std::mem::take(&mut self.edges);
        self.edges = edges
            .into_iter()
            .map(|mut e| {
                if &e.source == node {
                    e.source = replacement.clone();
                }
                if &e.target == node {
                    e.target = replacement.clone();
                }
                e
            })
            .collect();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(s: &str) -> TopologyId {
        TopologyId::parse(s).expect("id")
    }

    fn base() -> EnvironmentVersion {
        EnvironmentVersion::new("arch", "dev", 5)
            .with_resource(Resource::new(id("aws:ec2:web")).with_property("instanceType", json!("t3.micro")))
            .with_resource(Resource::new(id("aws:rds:db")))
            .with_edge(Edge::new(id("aws:ec2:web"), id("aws:rds:db")))
    }

    #[allow(clippy::panic)]
    fn expect_config(result: Result<EnvironmentVersion, ArchsyncError>) -> Vec<ConfigError> {
        match result {
            Err(ArchsyncError::Config(errors)) => errors,
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn equals_sets_property() {
        let out = solve(
            &base(),
            &[Constraint::set_property(id("aws:ec2:web"), "instanceType", json!("t3.large"))],
            &ResourceSchema::new(),
        )
        .expect("solve");
        assert_eq!(
            out.resource(&id("aws:ec2:web")).and_then(|r| r.property("instanceType")),
            Some(&json!("t3.large"))
        );
        assert_eq!(out.version, 5);
    }

    #[test]
    fn add_and_remove_on_list_properties() {
        let web = id("aws:ec2:web");
        let add = |v| Constraint::Resource {
            operator: ResourceOperator::Add,
            target: web.clone(),
            property: "securityGroups".into(),
            value: v,
        };
        let out = solve(
            &base(),
            &[add(json!("sg-1")), add(json!("sg-2")), add(json!("sg-1"))],
            &ResourceSchema::new(),
        )
        .expect("solve");
        assert_eq!(
            out.resource(&web).and_then(|r| r.property("securityGroups")),
            Some(&json!(["sg-1", "sg-2"]))
        );

        let removed = solve(
            &out,
            &[Constraint::Resource {
                operator: ResourceOperator::Remove,
                target: web.clone(),
                property: "securityGroups".into(),
                value: json!("sg-1"),
            }],
            &ResourceSchema::new(),
        )
        .expect("solve");
        assert_eq!(
            removed.resource(&web).and_then(|r| r.property("securityGroups")),
            Some(&json!(["sg-2"]))
        );
    }

    #[test]
    fn add_to_scalar_is_rejected() {
        let errors = expect_config(solve(
            &base(),
            &[Constraint::Resource {
                operator: ResourceOperator::Add,
                target: id("aws:ec2:web"),
                property: "instanceType".into(),
                value: json!("x"),
            }],
            &ResourceSchema::new(),
        ));
        assert_eq!(errors[0].property.as_deref(), Some("instanceType"));
    }

    #[test]
    fn schema_rejects_unknown_property_and_reports_all_errors() {
        let schema = ResourceSchema::new().with_type("ec2", ["instanceType", "ami"]);
        let errors = expect_config(solve(
            &base(),
            &[
                Constraint::set_property(id("aws:ec2:web"), "ram", json!(4)),
                Constraint::set_property(id("aws:ec2:ghost"), "ami", json!("x")),
                Constraint::set_property(id("aws:ec2:web"), "ami", json!("ami-1")),
            ],
            &schema,
        ));
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].resource, Some(id("aws:ec2:web")));
        assert_eq!(errors[0].property.as_deref(), Some("ram"));
        assert_eq!(errors[1].resource, Some(id("aws:ec2:ghost")));
    }

    #[test]
    fn remove_resource_drops_its_edges() {
        let out = solve(
            &base(),
            &[Constraint::remove_resource(id("aws:rds:db"))],
            &ResourceSchema::new(),
        )
        .expect("solve");
        assert!(out.resource(&id("aws:rds:db")).is_none());
        assert!(out.edges.is_empty());
    }

    #[test]
    fn edge_requires_existing_endpoints() {
        let errors = expect_config(solve(
            &base(),
            &[Constraint::connect(id("aws:ec2:web"), id("aws:s3:missing"))],
            &ResourceSchema::new(),
        ));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].resource, Some(id("aws:s3:missing")));
    }

    #[test]
    fn replace_renames_and_rewires() {
        let out = solve(
            &base(),
            &[Constraint::Global {
                operator: GlobalOperator::Replace,
                node: id("aws:rds:db"),
                replacement: Some(id("aws:dynamodb:table")),
            }],
            &ResourceSchema::new(),
        )
        .expect("solve");
        assert!(out.resource(&id("aws:dynamodb:table")).is_some());
        assert!(out.has_edge(&id("aws:ec2:web"), &id("aws:dynamodb:table")));
        assert!(!out.has_edge(&id("aws:ec2:web"), &id("aws:rds:db")));
    }

    #[test]
    fn import_marks_resource() {
        let out = solve(
            &base(),
            &[Constraint::Global {
                operator: GlobalOperator::Import,
                node: id("aws:vpc:main"),
                replacement: None,
            }],
            &ResourceSchema::new(),
        )
        .expect("solve");
        assert!(out.resource(&id("aws:vpc:main")).is_some_and(|r| r.imported));
    }

    #[test]
    fn constraints_apply_in_order() {
        let s3 = id("aws:s3:assets");
        let out = solve(
            &base(),
            &[
                Constraint::add_resource(s3.clone()),
                Constraint::set_property(s3.clone(), "versioning", json!(true)),
                Constraint::connect(id("aws:ec2:web"), s3.clone()),
            ],
            &ResourceSchema::new(),
        )
        .expect("solve");
        assert_eq!(
            out.resource(&s3).and_then(|r| r.property("versioning")),
            Some(&json!(true))
        );
        assert!(out.has_edge(&id("aws:ec2:web"), &s3));
    }
}
