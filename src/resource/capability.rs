//! Capabilities: relations filled by follow-up listings rather than by the
//! describe response itself
//!
//! Each capability declares the relation fields it adds to a kind and
//! populates one of them on demand, from [`Resource::fetch`].

use super::instance::{FieldValue, Resource};
use super::kind::{ListRequest, Session};
use super::relation::Contents;
use crate::error::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const SECURITY_GROUP: &str = "security_group";
const SECURITY_GROUPS: &str = "security_groups";
const LAUNCH_CONFIGURATION: &str = "launch_configuration";
const ACCESSIBLE_RESOURCES: &str = "accessible_resources";
const METRIC: &str = "metric";
const METRICS: &str = "metrics";

/// Filter name matching security groups whose rules admit a given group
const GROUP_ACCESS_FILTER: &str = "ip-permission.group-id";

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Capability {
    /// List `kind` with params rendered from the owner's fields
    ListRelated {
        field: String,
        kind: String,
        #[serde(default)]
        params: BTreeMap<String, String>,
    },
    /// Security groups of the owner's launch configuration
    LaunchConfigSecurityGroups,
    /// Security groups whose rules admit any of the owner's groups
    SecurityGroupAccess,
    /// Metrics in `namespace` with dimensions rendered from the owner
    Metrics {
        namespace: String,
        #[serde(default)]
        dimensions: BTreeMap<String, String>,
    },
}

impl Capability {
    /// `(field, kind)` of every relation this capability adds
    pub fn relations(&self) -> Vec<(&str, &str)> {
        match self {
            Capability::ListRelated { field, kind, .. } => vec![(field.as_str(), kind.as_str())],
            Capability::LaunchConfigSecurityGroups => vec![(SECURITY_GROUPS, SECURITY_GROUP)],
            Capability::SecurityGroupAccess => vec![
                (ACCESSIBLE_RESOURCES, SECURITY_GROUP),
                (SECURITY_GROUPS, SECURITY_GROUP),
            ],
            Capability::Metrics { .. } => vec![(METRICS, METRIC)],
        }
    }

    /// The relation field this capability fills
    pub fn populates(&self) -> &str {
        match self {
            Capability::ListRelated { field, .. } => field,
            Capability::LaunchConfigSecurityGroups => SECURITY_GROUPS,
            Capability::SecurityGroupAccess => ACCESSIBLE_RESOURCES,
            Capability::Metrics { .. } => METRICS,
        }
    }

    /// Fill the relation on `resource` unless it is already loaded
    pub(crate) fn populate<'a>(
        &'a self,
        session: &'a Session,
        resource: &'a mut Resource,
        force: bool,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let field = self.populates();
            if !force && resource.relation(field).is_some_and(|h| h.is_loaded()) {
                return Ok(());
            }

            match self {
                Capability::ListRelated { field, kind, params } => {
                    let Some(request) = render_request(params, resource) else {
                        return settle(resource, field, kind);
                    };
                    fill_listing(session, resource, field, kind, request).await
                }
                Capability::LaunchConfigSecurityGroups => {
                    launch_config_groups(session, resource, force).await
                }
                Capability::SecurityGroupAccess => group_access(session, resource, force).await,
                Capability::Metrics { namespace, dimensions } => {
                    let Some(dimensions) = render_dimensions(dimensions, resource) else {
                        return settle(resource, METRICS, METRIC);
                    };
                    let request = ListRequest::new()
                        .param("namespace", namespace.as_str())
                        .param("dimensions", dimensions);
                    fill_listing(session, resource, METRICS, METRIC, request).await
                }
            }
        }
        .boxed()
    }
}

async fn fill_listing(
    session: &Session,
    resource: &mut Resource,
    field: &str,
    kind: &str,
    request: ListRequest,
) -> Result<()> {
    let related = session.resources(kind)?.list(request).await?;
    tracing::debug!(
        "{} {}: {} {}",
        resource.kind_name(),
        resource.identity(),
        related.len(),
        field
    );
    resource.relation_entry(field, kind).fill(Contents::Many(related))
}

/// Mark a relation as settled when its listing cannot be rendered
fn settle(resource: &mut Resource, field: &str, kind: &str) -> Result<()> {
    tracing::debug!(
        "{} {} lacks the fields to list {}",
        resource.kind_name(),
        resource.identity(),
        field
    );
    resource.relation_entry(field, kind).settle_empty();
    Ok(())
}

async fn launch_config_groups(session: &Session, resource: &mut Resource, force: bool) -> Result<()> {
    let has_config = resource
        .relation(LAUNCH_CONFIGURATION)
        .is_some_and(|h| !h.is_empty());
    if !has_config {
        return settle(resource, SECURITY_GROUPS, SECURITY_GROUP);
    }

    let path = vec![format!("{}__{}", LAUNCH_CONFIGURATION, SECURITY_GROUPS)];
    resource.fetch_relations(session, &path, force).await?;

    let groups: Vec<Resource> = resource
        .relation(LAUNCH_CONFIGURATION)
        .and_then(|h| h.one())
        .and_then(|config| config.relation(SECURITY_GROUPS))
        .map(|h| h.iter().cloned().collect())
        .unwrap_or_default();

    resource
        .relation_entry(SECURITY_GROUPS, SECURITY_GROUP)
        .fill(Contents::Many(groups))
}

async fn group_access(session: &Session, resource: &mut Resource, force: bool) -> Result<()> {
    let groups_loaded = resource
        .relation(SECURITY_GROUPS)
        .is_some_and(|h| h.is_loaded());
    if force || !groups_loaded {
        let path = vec![SECURITY_GROUPS.to_string()];
        resource.fetch_relations(session, &path, force).await?;
    }

    let ids: Vec<Value> = resource
        .relation(SECURITY_GROUPS)
        .map(|h| {
            h.iter()
                .filter_map(|g| g.str_field("id"))
                .map(|id| Value::String(id.to_string()))
                .collect()
        })
        .unwrap_or_default();

    if ids.is_empty() {
        return settle(resource, ACCESSIBLE_RESOURCES, SECURITY_GROUP);
    }

    let request = ListRequest::new().param(
        "filters",
        json!([{ "Name": GROUP_ACCESS_FILTER, "Values": ids }]),
    );
    fill_listing(session, resource, ACCESSIBLE_RESOURCES, SECURITY_GROUP, request).await
}

fn render_request(params: &BTreeMap<String, String>, resource: &Resource) -> Option<ListRequest> {
    let rendered = render_all(params, resource)?;
    Some(
        rendered
            .into_iter()
            .fold(ListRequest::new(), |request, (key, value)| request.param(key, value)),
    )
}

/// `{"Name", "Value"}` metric dimensions rendered from the owner
pub(super) fn render_dimensions(
    templates: &BTreeMap<String, String>,
    resource: &Resource,
) -> Option<Vec<Value>> {
    let rendered = render_all(templates, resource)?;
    Some(
        rendered
            .into_iter()
            .map(|(name, value)| json!({ "Name": name, "Value": value }))
            .collect(),
    )
}

fn render_all(
    templates: &BTreeMap<String, String>,
    resource: &Resource,
) -> Option<Vec<(String, String)>> {
    templates
        .iter()
        .map(|(key, template)| Some((key.clone(), render(template, resource)?)))
        .collect()
}

/// Substitute `{field}` placeholders with the owner's scalar fields
fn render(template: &str, resource: &Resource) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}')?;
        let value = resource
            .field(&after[..end])
            .and_then(FieldValue::scalar_text)?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Some(out)
}
