//! Time-windowed CloudWatch queries
//!
//! Metric statistics and alarm history are not listings of a kind. Each
//! call covers a time window; the samples and history entries come back
//! as loaded `metric` and `alarm` instances.

use super::capability::{render_dimensions, Capability};
use super::case::snake_to_camelcap;
use super::fetcher::{extract_items, PaginatedFetcher};
use super::instance::Resource;
use super::kind::{ResourceKind, Session};
use super::normalize::Normalizer;
use crate::client::Params;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

const METRIC: &str = "metric";
const METRICS: &str = "metrics";
const ALARM: &str = "alarm";

const STATISTICS_CALL: &str = "get_metric_statistics";
const STATISTICS_KEY: &str = "Datapoints";
const HISTORY_CALL: &str = "describe_alarm_history";
const HISTORY_KEY: &str = "AlarmHistoryItems";

const DEFAULT_STATISTIC: &str = "Average";
pub const DEFAULT_PERIOD_SECONDS: u32 = 300;
const DEFAULT_WINDOW_HOURS: i64 = 3;

/// Options for one `get_metric_statistics` call
#[derive(Debug, Clone)]
pub struct StatisticsRequest {
    pub metric_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Seconds between samples (the call's `Period`)
    pub period_seconds: u32,
    /// `{"Name", "Value"}` pairs, sent after the owner's own dimensions
    pub dimensions: Vec<Value>,
    pub statistics: Vec<String>,
    pub extended_statistics: Vec<String>,
    /// Further snake_case params, sent in CamelCap
    pub params: Params,
}

impl StatisticsRequest {
    /// The last three hours of `metric_name`, sampled every five minutes
    pub fn new(metric_name: impl Into<String>) -> Self {
        let end_time = Utc::now();
        Self {
            metric_name: metric_name.into(),
            start_time: end_time - Duration::hours(DEFAULT_WINDOW_HOURS),
            end_time,
            period_seconds: DEFAULT_PERIOD_SECONDS,
            dimensions: Vec::new(),
            statistics: Vec::new(),
            extended_statistics: Vec::new(),
            params: Params::new(),
        }
    }

    pub fn window(mut self, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    pub fn period_seconds(mut self, period_seconds: u32) -> Self {
        self.period_seconds = period_seconds;
        self
    }

    pub fn dimension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions
            .push(json!({ "Name": name.into(), "Value": value.into() }));
        self
    }

    pub fn statistic(mut self, statistic: impl Into<String>) -> Self {
        self.statistics.push(statistic.into());
        self
    }

    pub fn extended_statistic(mut self, statistic: impl Into<String>) -> Self {
        self.extended_statistics.push(statistic.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    fn to_params(&self, namespace: &str, owner_dimensions: Vec<Value>) -> Result<Params> {
        check_window(self.start_time, self.end_time)?;
        if self.period_seconds == 0 {
            return Err(Error::config("metric statistics need a period of at least one second"));
        }

        let mut params: Params = self
            .params
            .iter()
            .map(|(key, value)| (snake_to_camelcap(key), value.clone()))
            .collect();

        params.insert("Namespace".into(), json!(namespace));
        params.insert("MetricName".into(), json!(self.metric_name));
        params.insert("StartTime".into(), json!(timestamp(self.start_time)));
        params.insert("EndTime".into(), json!(timestamp(self.end_time)));
        params.insert("Period".into(), json!(self.period_seconds));

        let dimensions: Vec<Value> = owner_dimensions
            .into_iter()
            .chain(self.dimensions.iter().cloned())
            .collect();
        if !dimensions.is_empty() {
            params.insert("Dimensions".into(), Value::Array(dimensions));
        }

        if self.statistics.is_empty() && self.extended_statistics.is_empty() {
            tracing::debug!("no statistics requested, using {}", DEFAULT_STATISTIC);
            params.insert("Statistics".into(), json!([DEFAULT_STATISTIC]));
        }
        if !self.statistics.is_empty() {
            params.insert("Statistics".into(), json!(self.statistics));
        }
        if !self.extended_statistics.is_empty() {
            params.insert("ExtendedStatistics".into(), json!(self.extended_statistics));
        }

        Ok(params)
    }
}

/// Options for `describe_alarm_history`
#[derive(Debug, Clone)]
pub struct HistoryRequest {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub alarm_name: Option<String>,
    /// `ConfigurationUpdate`, `StateUpdate` or `Action`
    pub item_type: Option<String>,
    pub alarm_types: Vec<String>,
    /// Newest first unless cleared
    pub descending: bool,
}

impl HistoryRequest {
    pub fn new(start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        Self {
            start_date,
            end_date,
            alarm_name: None,
            item_type: None,
            alarm_types: Vec::new(),
            descending: true,
        }
    }

    pub fn alarm_name(mut self, name: impl Into<String>) -> Self {
        self.alarm_name = Some(name.into());
        self
    }

    pub fn item_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = Some(item_type.into());
        self
    }

    pub fn alarm_type(mut self, alarm_type: impl Into<String>) -> Self {
        self.alarm_types.push(alarm_type.into());
        self
    }

    pub fn ascending(mut self) -> Self {
        self.descending = false;
        self
    }

    fn to_params(&self) -> Result<Params> {
        check_window(self.start_date, self.end_date)?;

        let mut params = Params::new();
        params.insert("StartDate".into(), json!(timestamp(self.start_date)));
        params.insert("EndDate".into(), json!(timestamp(self.end_date)));
        let scan_by = if self.descending {
            "TimestampDescending"
        } else {
            "TimestampAscending"
        };
        params.insert("ScanBy".into(), json!(scan_by));

        if let Some(name) = &self.alarm_name {
            params.insert("AlarmName".into(), json!(name));
        }
        if let Some(item_type) = &self.item_type {
            params.insert("HistoryItemType".into(), json!(item_type));
        }
        if !self.alarm_types.is_empty() {
            params.insert("AlarmTypes".into(), json!(self.alarm_types));
        }

        Ok(params)
    }
}

/// Samples of `request.metric_name` in `namespace`, one `metric` per datapoint
pub async fn metric_statistics(
    session: &Session,
    namespace: &str,
    request: &StatisticsRequest,
) -> Result<Vec<Resource>> {
    statistics_with(session, namespace, Vec::new(), request).await
}

/// Alarm history entries in the request window, as loaded `alarm`s
pub async fn alarm_history(session: &Session, request: &HistoryRequest) -> Result<Vec<Resource>> {
    let kind = session.kind(ALARM)?;
    let items = PaginatedFetcher::new(session, &kind)
        .paginate(HISTORY_CALL, request.to_params()?, HISTORY_KEY)
        .await?;

    tracing::info!("{} alarm history entries", items.len());
    build_loaded(session, &kind, HISTORY_CALL, items, None)
}

async fn statistics_with(
    session: &Session,
    namespace: &str,
    owner_dimensions: Vec<Value>,
    request: &StatisticsRequest,
) -> Result<Vec<Resource>> {
    let kind = session.kind(METRIC)?;
    let params = request.to_params(namespace, owner_dimensions)?;

    let response = kind.client().invoke(STATISTICS_CALL, &params).await?;
    let datapoints = extract_items(&response, STATISTICS_KEY);
    tracing::info!(
        "{} {} datapoints for {}",
        datapoints.len(),
        namespace,
        request.metric_name
    );

    build_loaded(
        session,
        &kind,
        STATISTICS_CALL,
        datapoints,
        Some(("MetricName", &request.metric_name)),
    )
}

impl Resource {
    /// Samples of one of this instance's metrics
    ///
    /// The namespace and leading dimensions come from the kind's `metrics`
    /// capability.
    pub async fn statistics(
        &self,
        session: &Session,
        request: &StatisticsRequest,
    ) -> Result<Vec<Resource>> {
        let capability = self.kind().descriptor().capabilities.iter().find_map(|c| match c {
            Capability::Metrics { namespace, dimensions } => Some((namespace, dimensions)),
            _ => None,
        });
        let Some((namespace, dimensions)) = capability else {
            return Err(Error::Unsupported {
                kind: self.kind_name().to_string(),
                operation: "metric statistics",
            });
        };

        let owner_dimensions = render_dimensions(dimensions, self).ok_or_else(|| {
            Error::config(format!(
                "{} {} lacks the fields its metric dimensions need",
                self.kind_name(),
                self.identity()
            ))
        })?;

        statistics_with(session, namespace, owner_dimensions, request).await
    }

    /// Names of the metrics published for this instance
    pub async fn metric_options(&mut self, session: &Session, force: bool) -> Result<BTreeSet<String>> {
        if self.kind().descriptor().capability_for(METRICS).is_none() {
            return Err(Error::Unsupported {
                kind: self.kind_name().to_string(),
                operation: "metric options",
            });
        }

        self.fetch_relations(session, &[METRICS.to_string()], force).await?;
        Ok(self
            .relation(METRICS)
            .map(|metrics| {
                metrics
                    .iter()
                    .filter_map(|m| m.str_field("name").map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// History of this alarm within the request window
    pub async fn alarm_history(
        &self,
        session: &Session,
        request: &HistoryRequest,
    ) -> Result<Vec<Resource>> {
        if self.kind_name() != ALARM {
            return Err(Error::Unsupported {
                kind: self.kind_name().to_string(),
                operation: "alarm history",
            });
        }
        let Some(name) = self.str_field("name") else {
            return Err(Error::config("alarm history needs the alarm's name"));
        };

        alarm_history(session, &request.clone().alarm_name(name)).await
    }
}

fn build_loaded(
    session: &Session,
    kind: &Arc<ResourceKind>,
    call: &str,
    items: Vec<Value>,
    extra: Option<(&str, &str)>,
) -> Result<Vec<Resource>> {
    let normalizer = Normalizer::new(session);
    items
        .into_iter()
        .map(|item| {
            let mut record: Map<String, Value> = match item {
                Value::Object(map) => map,
                other => {
                    return Err(Error::MalformedResponse {
                        call: call.to_string(),
                        reason: format!("expected records, found {}", other),
                    })
                }
            };
            if let Some((key, value)) = extra {
                record.insert(key.to_string(), json!(value));
            }
            normalizer.build(kind, record, true)
        })
        .collect()
}

fn check_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if start >= end {
        return Err(Error::config(format!(
            "time window starts at {} but ends at {}",
            timestamp(start),
            timestamp(end)
        )));
    }
    Ok(())
}

fn timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
