//! Resource Fetcher
//!
//! Enumerates instances of a kind. Combined kinds page through their
//! describe call directly; two-phase kinds page through a list call for
//! ids, then describe those ids in concurrent chunks.

use super::case::{snake_to_camelback, snake_to_camelcap};
use super::instance::{FieldValue, Resource};
use super::kind::{ListRequest, ResourceKind, Session};
use super::normalize::Normalizer;
use super::registry::{CallDef, ParamCase, ParamKind, ResourceDescriptor};
use crate::client::Params;
use crate::error::{Error, Result};
use futures::future::try_join_all;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Result of one page
pub struct PaginatedResult {
    pub items: Vec<Value>,
    pub next_token: Option<Value>,
}

/// Call parameters built from caller kwargs and seed instances
#[derive(Debug, Default)]
pub(crate) struct CallParams {
    pub params: Params,
    /// True when at least one declared value (not a default) was supplied
    pub supplied: bool,
}

pub struct PaginatedFetcher<'a> {
    session: &'a Session,
    kind: &'a Arc<ResourceKind>,
}

impl<'a> PaginatedFetcher<'a> {
    pub fn new(session: &'a Session, kind: &'a Arc<ResourceKind>) -> Self {
        Self { session, kind }
    }

    fn descriptor(&self) -> &ResourceDescriptor {
        self.kind.descriptor()
    }

    /// Describe the one record identified by `resource`'s identity fields
    pub async fn describe_one(&self, resource: &Resource) -> Result<Map<String, Value>> {
        let descriptor = self.descriptor();
        if !descriptor.supports_get {
            return Err(Error::Unsupported {
                kind: self.kind.name().to_string(),
                operation: "load",
            });
        }

        let built = build_call_params(&descriptor.describe, &Params::new(), std::slice::from_ref(resource));
        if !built.supplied {
            return Err(Error::config(format!(
                "{} has no identity to load by; set one of {}",
                self.kind.name(),
                descriptor.identity_fields.join(", ")
            )));
        }

        let call = descriptor.describe_call();
        let response = self.kind.client().invoke(&call, &built.params).await?;
        let mut records = self.extract_records(&response, &descriptor.describe_response_key(), &call)?;

        match records.len() {
            0 => Err(Error::NotFound {
                kind: self.kind.name().to_string(),
                identity: resource.identity(),
            }),
            1 => Ok(records.remove(0)),
            count => Err(Error::Ambiguous {
                kind: self.kind.name().to_string(),
                identity: resource.identity(),
                count,
            }),
        }
    }

    /// Every instance matching `request`, loaded
    pub async fn list(&self, request: &ListRequest) -> Result<Vec<Resource>> {
        let records = if self.seeds_need_splitting(&request.seeds) {
            self.describe_each_seed(request).await?
        } else {
            self.records(request).await?
        };

        tracing::info!("listed {} {} records", records.len(), self.kind.name());

        let normalizer = Normalizer::new(self.session);
        records
            .into_iter()
            .map(|record| normalizer.build(self.kind, record, true))
            .collect()
    }

    async fn records(&self, request: &ListRequest) -> Result<Vec<Map<String, Value>>> {
        if self.descriptor().list.is_none() {
            self.describe_paginated(request).await
        } else if request.seeds.is_empty() {
            self.list_then_describe(request).await
        } else {
            self.describe_seeded(request).await
        }
    }

    /// True when several seeds identify themselves only through scalar
    /// describe params, which one call cannot carry at once
    fn seeds_need_splitting(&self, seeds: &[Resource]) -> bool {
        if seeds.len() < 2 {
            return false;
        }

        let describe = &self.descriptor().describe;
        let carried = |kind: ParamKind| {
            describe.params.iter().any(|(local, param)| {
                param.kind == kind
                    && seeds
                        .iter()
                        .any(|seed| seed.field(local).and_then(FieldValue::to_param).is_some())
            })
        };

        carried(ParamKind::Scalar) && !carried(ParamKind::List)
    }

    /// One describe per distinct seed, run concurrently, flattened in seed order
    async fn describe_each_seed(&self, request: &ListRequest) -> Result<Vec<Map<String, Value>>> {
        let describe = &self.descriptor().describe;
        let mut seen: Vec<Params> = Vec::new();
        let mut singles = Vec::new();

        for seed in &request.seeds {
            let params =
                build_call_params(describe, &Params::new(), std::slice::from_ref(seed)).params;
            if seen.contains(&params) {
                continue;
            }
            seen.push(params);
            singles.push(ListRequest {
                params: request.params.clone(),
                seeds: vec![seed.clone()],
                with_related: Vec::new(),
                chunk_size: request.chunk_size,
            });
        }

        tracing::debug!(
            "describing {} {} seeds one at a time",
            singles.len(),
            self.kind.name()
        );

        let pages = try_join_all(singles.iter().map(|single| self.records(single))).await?;
        Ok(pages.into_iter().flatten().collect())
    }

    /// Combined kind: page through the describe call
    async fn describe_paginated(&self, request: &ListRequest) -> Result<Vec<Map<String, Value>>> {
        let descriptor = self.descriptor();
        let mut built = build_call_params(&descriptor.describe, &request.params, &request.seeds);
        if !request.seeds.is_empty() && !built.supplied {
            return Err(self.unseeded());
        }
        self.pass_through(&mut built.params, &request.params, &[&descriptor.describe]);

        let call = descriptor.describe_call();
        let items = self
            .paginate(&call, built.params, &descriptor.describe_response_key())
            .await?;
        self.records_from(items, &call)
    }

    /// Two-phase kind: collect ids, then describe them in chunks
    async fn list_then_describe(&self, request: &ListRequest) -> Result<Vec<Map<String, Value>>> {
        let descriptor = self.descriptor();

        // Caller-named ids skip the enumerate phase
        let mut describe_params =
            build_call_params(&descriptor.describe, &request.params, &[]).params;
        if let Some(ids) = describe_params.remove(&descriptor.id_param()) {
            let ids = match ids {
                Value::Array(ids) => ids,
                other => vec![other],
            };
            return self.describe_chunks(ids, describe_params, request).await;
        }

        let list_def = descriptor.list.clone().unwrap_or_default();
        let list_call = descriptor.list_call().unwrap_or_default();
        let list_key = descriptor.list_response_key().unwrap_or_default();

        let mut list_params = build_call_params(&list_def, &request.params, &[]).params;
        self.pass_through(&mut list_params, &request.params, &[&list_def, &descriptor.describe]);
        let ids = self.paginate(&list_call, list_params, &list_key).await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // Describe params the list call also needs (e.g. the owning cluster)
        self.describe_chunks(ids, describe_params, request).await
    }

    /// Two-phase kind re-listed from seeds: describe the seeded ids directly
    async fn describe_seeded(&self, request: &ListRequest) -> Result<Vec<Map<String, Value>>> {
        let descriptor = self.descriptor();
        let built = build_call_params(&descriptor.describe, &request.params, &request.seeds);
        if !built.supplied {
            return Err(self.unseeded());
        }

        let mut params = built.params;
        let id_param = descriptor.id_param();
        let ids = match params.remove(&id_param) {
            Some(Value::Array(ids)) => ids,
            Some(other) => vec![other],
            None => return Err(self.unseeded()),
        };

        self.describe_chunks(ids, params, request).await
    }

    /// Split `ids` into bounded chunks and describe them concurrently,
    /// flattening the results in chunk order
    async fn describe_chunks(
        &self,
        ids: Vec<Value>,
        base: Params,
        request: &ListRequest,
    ) -> Result<Vec<Map<String, Value>>> {
        let descriptor = self.descriptor();
        let size = descriptor.chunk_size(request.chunk_size.unwrap_or(self.session.chunk_size()));
        let call = descriptor.describe_call();
        let id_param = descriptor.id_param();
        let response_key = descriptor.describe_response_key();

        tracing::debug!(
            "describing {} {} ids in chunks of {}",
            ids.len(),
            self.kind.name(),
            size
        );

        let chunks = ids.chunks(size).map(|chunk| {
            let mut params = base.clone();
            params.insert(id_param.clone(), Value::Array(chunk.to_vec()));
            let call = call.as_str();
            let response_key = response_key.as_str();
            async move {
                let response = self.kind.client().invoke(call, &params).await?;
                self.extract_records(&response, response_key, call)
            }
        });

        let pages = try_join_all(chunks).await?;
        Ok(pages.into_iter().flatten().collect())
    }

    /// Fetch all items of `call` (auto-paginate)
    pub async fn paginate(&self, call: &str, params: Params, response_key: &str) -> Result<Vec<Value>> {
        let mut all_items = Vec::new();
        let mut page_token: Option<Value> = None;

        loop {
            let result = self
                .fetch_page(call, &params, response_key, page_token.take())
                .await?;
            all_items.extend(result.items);

            match result.next_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(all_items)
    }

    /// Fetch one page
    async fn fetch_page(
        &self,
        call: &str,
        params: &Params,
        response_key: &str,
        page_token: Option<Value>,
    ) -> Result<PaginatedResult> {
        let pagination = &self.descriptor().pagination;

        let mut page_params = params.clone();
        if let Some(token) = page_token {
            page_params.insert(pagination.input_token.clone(), token);
        }

        let response = self.kind.client().invoke(call, &page_params).await?;
        let items = extract_items(&response, response_key);
        tracing::debug!("{}: {} items on this page", call, items.len());

        // Missing, null and empty tokens all end the listing
        let next_token = response
            .get(&pagination.output_token)
            .filter(|v| !v.is_null() && v.as_str() != Some(""))
            .cloned();

        Ok(PaginatedResult { items, next_token })
    }

    /// Items as records, flattening the descriptor's nested collection
    fn extract_records(
        &self,
        response: &Value,
        response_key: &str,
        call: &str,
    ) -> Result<Vec<Map<String, Value>>> {
        self.records_from(extract_items(response, response_key), call)
    }

    fn records_from(&self, items: Vec<Value>, call: &str) -> Result<Vec<Map<String, Value>>> {
        let item_key = self.descriptor().describe.item_key.as_deref();

        let items: Vec<Value> = match item_key {
            Some(key) => items
                .into_iter()
                .flat_map(|item| match item {
                    Value::Object(mut map) => match map.remove(key) {
                        Some(Value::Array(nested)) => nested,
                        _ => Vec::new(),
                    },
                    other => vec![other],
                })
                .collect(),
            None => items,
        };

        items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(Error::MalformedResponse {
                    call: call.to_string(),
                    reason: format!("expected records, found {}", other),
                }),
            })
            .collect()
    }

    /// Copy caller params no call declares, in wire case
    fn pass_through(&self, params: &mut Params, kwargs: &Params, declared_by: &[&CallDef]) {
        let case = self.descriptor().param_case;
        for (key, value) in kwargs {
            if declared_by.iter().any(|def| def.declares(key)) {
                continue;
            }
            params.insert(wire_case(key, case), value.clone());
        }
    }

    fn unseeded(&self) -> Error {
        Error::config(format!(
            "{} seeds carry none of the describe parameters",
            self.kind.name()
        ))
    }
}

/// Build wire params for `def` from caller kwargs and seed instances
///
/// Defaults are applied first. List parameters collect the union of every
/// seed's value and the caller's; scalar parameters keep the last value.
pub(crate) fn build_call_params(def: &CallDef, kwargs: &Params, seeds: &[Resource]) -> CallParams {
    let mut built = CallParams::default();

    for (local, param) in &def.params {
        if let Some(default) = &param.default {
            built.params.insert(param.name.clone(), default.clone());
        }

        let values = seeds
            .iter()
            .filter_map(|seed| seed.field(local).and_then(FieldValue::to_param))
            .chain(kwargs.get(local).filter(|v| !v.is_null()).cloned());

        let mut collected: Vec<Value> = Vec::new();
        let mut last: Option<Value> = None;
        for value in values {
            match param.kind {
                ParamKind::List => {
                    let items = match value {
                        Value::Array(items) => items,
                        single => vec![single],
                    };
                    for item in items {
                        if !collected.contains(&item) {
                            collected.push(item);
                        }
                    }
                }
                ParamKind::Scalar => last = Some(value),
            }
        }

        let value = match param.kind {
            ParamKind::List if !collected.is_empty() => Some(Value::Array(collected)),
            ParamKind::List => None,
            ParamKind::Scalar => last,
        };

        if let Some(value) = value {
            built.params.insert(param.name.clone(), value);
            built.supplied = true;
        }
    }

    built
}

fn wire_case(key: &str, case: ParamCase) -> String {
    match case {
        ParamCase::CamelCap => snake_to_camelcap(key),
        ParamCase::CamelBack => snake_to_camelback(key),
    }
}

/// Extract items from response using a dotted path
pub fn extract_items(response: &Value, path: &str) -> Vec<Value> {
    if path.is_empty() {
        return response.as_array().cloned().unwrap_or_default();
    }

    let mut current = response;
    for part in path.split('.') {
        current = match current.get(part) {
            Some(v) => v,
            None => return vec![],
        };
    }

    current.as_array().cloned().unwrap_or_default()
}
