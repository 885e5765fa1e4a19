//! End-to-end scenarios over the replay transport
//!
//! Each test scripts the provider responses, drives the public API and
//! checks both the resulting graph and the calls that were made.

use cloudgraph::client::replay::ReplayLog;
use cloudgraph::client::{ClientRegistry, Params, PoolConfig, ReplayFactory};
use cloudgraph::query::Filter;
use cloudgraph::resource::{
    alarm_history, metric_statistics, Catalog, Contents, HistoryRequest, ListRequest, Session,
    StatisticsRequest,
};
use cloudgraph::Error;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn params(value: Value) -> Params {
    value.as_object().cloned().unwrap_or_default()
}

fn session(factory: ReplayFactory) -> (Session, ReplayLog) {
    let log = factory.log();
    let registry = ClientRegistry::new(factory, "us-east-1", PoolConfig::default());
    (Session::new(registry), log)
}

fn names<'a>(resources: impl IntoIterator<Item = &'a cloudgraph::Resource>) -> Vec<String> {
    resources
        .into_iter()
        .filter_map(|r| r.str_field("name").map(str::to_string))
        .collect()
}

/// ECS cluster records for every arn in the `clusters` param
fn echo_clusters(p: &Params) -> anyhow::Result<Value> {
    let arns = p
        .get("clusters")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let clusters: Vec<Value> = arns
        .iter()
        .map(|arn| {
            let name = arn.as_str().unwrap_or_default().rsplit('/').next();
            json!({"clusterArn": arn, "clusterName": name})
        })
        .collect();
    Ok(json!({ "clusters": clusters }))
}

fn cluster_arns(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| json!(format!("arn:aws:ecs:us-east-1:123:cluster/cluster-{}", i)))
        .collect()
}

/// Security groups by id, from a fixed inventory
fn security_groups_by_id(p: &Params) -> anyhow::Result<Value> {
    let inventory = [("sg-1", "web"), ("sg-2", "db")];
    let ids = p
        .get("GroupIds")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let groups: Vec<Value> = inventory
        .iter()
        .filter(|(id, _)| ids.contains(&json!(id)))
        .map(|(id, name)| json!({"GroupId": id, "GroupName": name}))
        .collect();
    Ok(json!({ "SecurityGroups": groups }))
}

mod lookup_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_filter_keeps_matches_in_order() {
        let factory = ReplayFactory::default().with_response(
            "autoscaling",
            "describe_auto_scaling_groups",
            json!({"AutoScalingGroups": [
                {"AutoScalingGroupName": "web-prod", "Instances": []},
                {"AutoScalingGroupName": "web-dev", "Instances": ["i-1", "i-2"]},
                {"AutoScalingGroupName": "api-PROD", "Instances": ["i-3"]}
            ]}),
        );
        let (session, log) = session(factory);
        let asgs = session.resources("asg").unwrap();

        let all = asgs.list(ListRequest::new()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|g| g.is_loaded()));
        assert_eq!(all[1].relation("instances").unwrap().len(), 2);

        let groups = asgs
            .filter([("name__icontains", json!("prod"))])
            .await
            .unwrap();

        assert_eq!(names(&groups), vec!["web-prod", "api-PROD"]);
        assert_eq!(log.total(), 2);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let factory = ReplayFactory::default().with_response(
            "autoscaling",
            "describe_auto_scaling_groups",
            json!({"AutoScalingGroups": []}),
        );
        let (session, _) = session(factory);

        let err = session
            .resources("asg")
            .unwrap()
            .get(params(json!({"name": "missing"})))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound { ref kind, ref identity }
            if kind == "asg" && identity == "name=missing"));
    }

    #[tokio::test]
    async fn test_get_with_two_records_is_ambiguous() {
        let factory = ReplayFactory::default().with_response(
            "autoscaling",
            "describe_auto_scaling_groups",
            json!({"AutoScalingGroups": [
                {"AutoScalingGroupName": "web"},
                {"AutoScalingGroupName": "web"}
            ]}),
        );
        let (session, _) = session(factory);

        let err = session
            .resources("asg")
            .unwrap()
            .get(params(json!({"name": "web"})))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Ambiguous { count: 2, .. }));
    }

    #[tokio::test]
    async fn test_load_is_idempotent_unless_forced() {
        let factory = ReplayFactory::default().with_response(
            "autoscaling",
            "describe_auto_scaling_groups",
            json!({"AutoScalingGroups": [{"AutoScalingGroupName": "web", "MaxSize": 2}]}),
        );
        let (session, log) = session(factory);

        let mut group = session
            .resources("asg")
            .unwrap()
            .get(params(json!({"name": "web"})))
            .await
            .unwrap();
        assert_eq!(log.count("describe_auto_scaling_groups"), 1);

        group.load(&session, false).await.unwrap();
        group.fetch(&session, &[] as &[&str], false).await.unwrap();
        assert_eq!(log.count("describe_auto_scaling_groups"), 1);

        group.load(&session, true).await.unwrap();
        assert_eq!(log.count("describe_auto_scaling_groups"), 2);
        assert_eq!(group.field("max_size").and_then(|v| v.as_f64()), Some(2.0));
    }

    #[tokio::test]
    async fn test_get_is_unsupported_for_metrics() {
        let (session, log) = session(ReplayFactory::default());

        let err = session
            .resources("metric")
            .unwrap()
            .get(params(json!({"name": "CPUUtilization"})))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Unsupported { operation: "get", .. }));
        assert_eq!(log.total(), 0);
    }

    #[tokio::test]
    async fn test_unknown_operation_fails_before_any_call() {
        let (session, log) = session(ReplayFactory::default());

        let err = session
            .resources("asg")
            .unwrap()
            .filter([("name__fuzzy", json!("web"))])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("fuzzy")));
        assert_eq!(log.total(), 0);
    }

    #[tokio::test]
    async fn test_group_is_found_through_a_member_instance() {
        let factory = ReplayFactory::default()
            .with_handler("autoscaling", "describe_auto_scaling_instances", |p: &Params| {
                let members = if p["InstanceIds"] == json!(["i-1"]) {
                    json!([{"InstanceId": "i-1", "AutoScalingGroupName": "web"}])
                } else {
                    json!([])
                };
                Ok(json!({ "AutoScalingInstances": members }))
            })
            .with_response(
                "autoscaling",
                "describe_auto_scaling_groups",
                json!({"AutoScalingGroups": [{"AutoScalingGroupName": "web", "Instances": []}]}),
            );
        let (session, log) = session(factory);
        let groups = session.resources("asg").unwrap();

        let group = groups.get(params(json!({"instance_id": "i-1"}))).await.unwrap();
        assert_eq!(group.str_field("name"), Some("web"));
        assert!(group.is_loaded());

        let describe = log
            .calls()
            .into_iter()
            .find(|c| c.call == "describe_auto_scaling_groups")
            .unwrap();
        assert_eq!(describe.params, params(json!({"AutoScalingGroupNames": ["web"]})));

        let err = groups
            .get(params(json!({"instance_id": "i-404"})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { ref identity, .. } if identity == "instance_id=i-404"));
        assert_eq!(log.count("describe_auto_scaling_groups"), 1);
    }

    #[tokio::test]
    async fn test_seeded_relist_without_identity_is_rejected() {
        let (session, log) = session(ReplayFactory::default());
        let groups = session.resources("security_group").unwrap();
        let seed = groups.bare(params(json!({"description": "orphan"}))).unwrap();

        let err = groups
            .list(ListRequest::new().seeds(vec![seed]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(log.total(), 0);
    }
}

mod normalization_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scalar_id_list_becomes_bare_relation() {
        let (session, log) = session(ReplayFactory::default());
        let config = session
            .resources("launch_configuration")
            .unwrap()
            .from_record(json!({
                "LaunchConfigurationName": "lc-1",
                "SecurityGroupIds": ["sg-1", "sg-2"]
            }))
            .unwrap();

        assert_eq!(config.str_field("name"), Some("lc-1"));
        assert!(config.field("security_group_ids").is_none());

        let groups = config.relation("security_groups").unwrap();
        assert_eq!(groups.kind(), "security_group");
        assert_eq!(groups.len(), 2);
        assert!(!groups.is_loaded());
        let ids: Vec<_> = groups.iter().filter_map(|g| g.str_field("id")).collect();
        assert_eq!(ids, vec!["sg-1", "sg-2"]);
        assert!(groups.iter().all(|g| !g.is_loaded()));
        assert_eq!(log.total(), 0);
    }

    #[test]
    fn test_alias_wins_over_kind_prefix() {
        let catalog = Catalog::from_json(
            r#"{"kinds": {
                "widget": {
                    "service": "widgets",
                    "key_prefix": "Widget",
                    "identity_fields": ["name"],
                    "response_aliases": {"security_group_ids": "gadget"}
                },
                "gadget": {
                    "service": "widgets",
                    "key_prefix": "Gadget",
                    "identity_fields": ["id"]
                },
                "security_group": {
                    "service": "ec2",
                    "key_prefix": "SecurityGroup",
                    "identity_fields": ["id"]
                }
            }}"#,
        )
        .unwrap();
        let registry =
            ClientRegistry::new(ReplayFactory::default(), "us-east-1", PoolConfig::default());
        let session = Session::builder(registry).catalog(catalog).build();

        let widget = session
            .resources("widget")
            .unwrap()
            .from_record(json!({"WidgetName": "w", "SecurityGroupIds": ["g-1"]}))
            .unwrap();

        let related = widget.relation("security_group_ids").unwrap();
        assert_eq!(related.kind(), "gadget");
        assert_eq!(related.get(0).unwrap().unwrap().str_field("id"), Some("g-1"));
        assert!(widget.relation("security_groups").is_none());
    }

    #[test]
    fn test_relation_rejects_other_kinds() {
        let (session, _) = session(ReplayFactory::default());
        let asgs = session.resources("asg").unwrap();
        let mut group = asgs
            .from_record(json!({"AutoScalingGroupName": "web"}))
            .unwrap();
        let other = asgs
            .from_record(json!({"AutoScalingGroupName": "api"}))
            .unwrap();

        let err = group
            .relation_mut("security_groups")
            .unwrap()
            .set(Contents::Many(vec![other]))
            .unwrap_err();

        assert!(matches!(err, Error::RelationType { ref expected, ref actual }
            if expected == "security_group" && actual == "asg"));
    }

    #[test]
    fn test_single_relation_cannot_be_indexed() {
        let (session, _) = session(ReplayFactory::default());
        let group = session
            .resources("asg")
            .unwrap()
            .from_record(json!({
                "AutoScalingGroupName": "web",
                "LaunchConfigurationName": "lc-1",
                "Instances": [{"InstanceId": "i-1"}, {"InstanceId": "i-2"}]
            }))
            .unwrap();

        let config = group.relation("launch_configuration").unwrap();
        assert_eq!(config.one().and_then(|c| c.str_field("name")), Some("lc-1"));
        assert!(matches!(config.get(0), Err(Error::Configuration(_))));

        let instances = group.relation("instances").unwrap();
        assert_eq!(instances.get(1).unwrap().unwrap().str_field("id"), Some("i-2"));
        assert!(instances.get(5).unwrap().is_none());
    }

    #[test]
    fn test_serialization_renders_relations() {
        let (session, _) = session(ReplayFactory::default());
        let group = session
            .resources("asg")
            .unwrap()
            .from_record(json!({
                "AutoScalingGroupName": "web",
                "LaunchConfigurationName": "lc-1",
                "Instances": [{"InstanceId": "i-1"}],
                "Tags": [{"Key": "env", "Value": "prod"}]
            }))
            .unwrap();

        let rendered = serde_json::to_value(&group).unwrap();

        assert_eq!(rendered["name"], json!("web"));
        assert_eq!(rendered["launch_configuration"]["name"], json!("lc-1"));
        assert_eq!(rendered["instances"][0]["id"], json!("i-1"));
        assert_eq!(rendered["tags"], json!([{"key": "env", "value": "prod"}]));
        assert_eq!(rendered["scaling_policies"], Value::Null);
        assert_eq!(rendered, group.to_json());
    }
}

mod fetch_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_describe_chunks_cover_every_id_in_order() {
        let arns = cluster_arns(7);
        let factory = ReplayFactory::default()
            .with_response("ecs", "list_clusters", json!({ "clusterArns": arns }))
            .with_handler("ecs", "describe_clusters", echo_clusters);
        let log = factory.log();
        let registry = ClientRegistry::new(factory, "us-east-1", PoolConfig::default());
        let session = Session::builder(registry).chunk_size(3).build();

        let clusters = session
            .resources("ecs_cluster")
            .unwrap()
            .list(ListRequest::new())
            .await
            .unwrap();

        let expected: Vec<String> = (0..7).map(|i| format!("cluster-{}", i)).collect();
        assert_eq!(names(&clusters), expected);
        assert_eq!(log.count("describe_clusters"), 3);
        assert!(clusters.iter().all(|c| c.is_loaded()));
    }

    #[tokio::test]
    async fn test_chunk_size_is_clamped_to_kind_maximum() {
        let factory = ReplayFactory::default()
            .with_response("ecs", "list_clusters", json!({ "clusterArns": cluster_arns(150) }))
            .with_handler("ecs", "describe_clusters", echo_clusters);
        let (session, log) = session(factory);

        let clusters = session
            .resources("ecs_cluster")
            .unwrap()
            .list(ListRequest::new().chunk_size(500))
            .await
            .unwrap();

        assert_eq!(clusters.len(), 150);
        let mut sizes: Vec<usize> = log
            .calls()
            .iter()
            .filter(|c| c.call == "describe_clusters")
            .filter_map(|c| c.params["clusters"].as_array().map(Vec::len))
            .collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![50, 100]);
    }

    #[tokio::test]
    async fn test_empty_listing_skips_describe() {
        let factory = ReplayFactory::default()
            .with_response("ecs", "list_clusters", json!({ "clusterArns": [] }))
            .with_handler("ecs", "describe_clusters", echo_clusters);
        let (session, log) = session(factory);

        let clusters = session
            .resources("ecs_cluster")
            .unwrap()
            .list(ListRequest::new())
            .await
            .unwrap();

        assert!(clusters.is_empty());
        assert_eq!(log.count("list_clusters"), 1);
        assert_eq!(log.count("describe_clusters"), 0);
    }

    #[tokio::test]
    async fn test_cluster_services_use_two_phase_listing() {
        let cluster_arn = "arn:aws:ecs:us-east-1:123:cluster/prod";
        let service_arn = "arn:aws:ecs:us-east-1:123:service/prod/api";
        let factory = ReplayFactory::default()
            .with_response("ecs", "list_clusters", json!({ "clusterArns": [cluster_arn] }))
            .with_handler("ecs", "describe_clusters", echo_clusters)
            .with_response("ecs", "list_services", json!({ "serviceArns": [service_arn] }))
            .with_response(
                "ecs",
                "describe_services",
                json!({"services": [{
                    "serviceArn": service_arn,
                    "serviceName": "api",
                    "clusterArn": cluster_arn,
                    "desiredCount": 2
                }]}),
            );
        let (session, log) = session(factory);

        let clusters = session
            .resources("ecs_cluster")
            .unwrap()
            .list(ListRequest::new().with_related("services"))
            .await
            .unwrap();

        let services = clusters[0].relation("services").unwrap();
        assert!(services.is_loaded());
        let service = services.get(0).unwrap().unwrap();
        assert_eq!(service.str_field("name"), Some("api"));
        assert_eq!(service.str_field("cluster"), Some("prod"));
        assert_eq!(service.identity(), "cluster=prod, name=api");

        let calls = log.calls();
        let list = calls.iter().find(|c| c.call == "list_services").unwrap();
        assert_eq!(list.params, params(json!({"cluster": "prod"})));
        let describe = calls.iter().find(|c| c.call == "describe_services").unwrap();
        assert_eq!(
            describe.params,
            params(json!({"cluster": "prod", "services": [service_arn]}))
        );
    }

    #[tokio::test]
    async fn test_named_clusters_skip_the_enumerate_phase() {
        let prod = "arn:aws:ecs:us-east-1:123:cluster/prod";
        let factory = ReplayFactory::default()
            .with_response(
                "ecs",
                "list_clusters",
                json!({ "clusterArns": [
                    prod,
                    "arn:aws:ecs:us-east-1:123:cluster/dev",
                    "arn:aws:ecs:us-east-1:123:cluster/stg"
                ]}),
            )
            .with_handler("ecs", "describe_clusters", echo_clusters);
        let (session, log) = session(factory);

        let clusters = session
            .resources("ecs_cluster")
            .unwrap()
            .list(ListRequest::new().param("name", json!([prod])))
            .await
            .unwrap();

        assert_eq!(names(&clusters), vec!["prod"]);
        assert_eq!(log.count("list_clusters"), 0);
        let calls = log.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].params, params(json!({ "clusters": [prod] })));
    }

    /// DB instances by `DBInstanceIdentifier`, one per call
    fn db_instance_by_id(p: &Params) -> anyhow::Result<Value> {
        let id = p.get("DBInstanceIdentifier").cloned().unwrap_or(Value::Null);
        Ok(json!({"DBInstances": [{
            "DBInstanceIdentifier": id,
            "DBInstanceClass": "db.r5.large"
        }]}))
    }

    #[tokio::test]
    async fn test_cluster_members_load_one_call_per_scalar_identity() {
        let factory = ReplayFactory::default()
            .with_handler("rds", "describe_db_instances", db_instance_by_id);
        let (session, log) = session(factory);

        let mut cluster = session
            .resources("rds_cluster")
            .unwrap()
            .from_record(json!({
                "DBClusterIdentifier": "orders",
                "DBClusterMembers": [
                    {"DBInstanceIdentifier": "db-1", "IsClusterWriter": true},
                    {"DBInstanceIdentifier": "db-2", "IsClusterWriter": false},
                    {"DBInstanceIdentifier": "db-3", "IsClusterWriter": false}
                ]
            }))
            .unwrap();

        cluster.fetch(&session, &["members"], false).await.unwrap();

        let members = cluster.relation("members").unwrap();
        assert!(members.is_loaded());
        let ids: Vec<&str> = members.iter().filter_map(|m| m.str_field("id")).collect();
        assert_eq!(ids, vec!["db-1", "db-2", "db-3"]);
        assert!(members
            .iter()
            .all(|m| m.str_field("class") == Some("db.r5.large")));

        let mut requested: Vec<Value> = log
            .calls()
            .iter()
            .map(|c| c.params["DBInstanceIdentifier"].clone())
            .collect();
        requested.sort_by_key(|v| v.to_string());
        assert_eq!(requested, vec![json!("db-1"), json!("db-2"), json!("db-3")]);
    }

    #[tokio::test]
    async fn test_repeated_scalar_seeds_are_described_once() {
        let factory = ReplayFactory::default()
            .with_handler("rds", "describe_db_instances", db_instance_by_id);
        let (session, log) = session(factory);
        let instances = session.resources("rds_instance").unwrap();
        let seeds = ["db-1", "db-1", "db-2"]
            .iter()
            .map(|id| instances.bare(params(json!({ "id": id }))).unwrap())
            .collect();

        let listed = instances
            .list(ListRequest::new().seeds(seeds))
            .await
            .unwrap();

        let ids: Vec<&str> = listed.iter().filter_map(|r| r.str_field("id")).collect();
        assert_eq!(ids, vec!["db-1", "db-2"]);
        assert_eq!(log.count("describe_db_instances"), 2);
    }
}

mod filter_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn zoned_groups() -> ReplayFactory {
        ReplayFactory::default().with_response(
            "autoscaling",
            "describe_auto_scaling_groups",
            json!({"AutoScalingGroups": [
                {"AutoScalingGroupName": "a", "AvailabilityZones": ["us-east-1a"]},
                {"AutoScalingGroupName": "ab", "AvailabilityZones": ["us-east-1a", "us-east-1b"]},
                {"AutoScalingGroupName": "c", "AvailabilityZones": ["us-east-1c"]}
            ]}),
        )
    }

    #[tokio::test]
    async fn test_contains_any_and_all_on_lists() {
        let (session, _) = session(zoned_groups());
        let asgs = session.resources("asg").unwrap();

        let any = asgs
            .filter([(
                "availability_zones__contains_any",
                json!(["us-east-1b", "us-east-1c"]),
            )])
            .await
            .unwrap();
        assert_eq!(names(&any), vec!["ab", "c"]);

        let all = asgs
            .filter([(
                "availability_zones__contains_all",
                json!(["us-east-1a", "us-east-1b"]),
            )])
            .await
            .unwrap();
        assert_eq!(names(&all), vec!["ab"]);
    }

    #[tokio::test]
    async fn test_cross_relation_filter_loads_each_relation_once() {
        let factory = ReplayFactory::default()
            .with_response(
                "ec2",
                "describe_instances",
                json!({"Reservations": [
                    {"Instances": [
                        {"InstanceId": "i-1", "SecurityGroups": [{"GroupId": "sg-1", "GroupName": "web"}]},
                        {"InstanceId": "i-2", "SecurityGroups": [{"GroupId": "sg-2", "GroupName": "db"}]}
                    ]},
                    {"Instances": [
                        {"InstanceId": "i-3", "SecurityGroups": [
                            {"GroupId": "sg-1", "GroupName": "web"},
                            {"GroupId": "sg-2", "GroupName": "db"}
                        ]}
                    ]}
                ]}),
            )
            .with_handler("ec2", "describe_security_groups", security_groups_by_id);
        let (session, log) = session(factory);

        let instances = session
            .resources("instance")
            .unwrap()
            .filter([("security_groups__name__exact", json!("web"))])
            .await
            .unwrap();

        let ids: Vec<_> = instances.iter().filter_map(|i| i.str_field("id")).collect();
        assert_eq!(ids, vec!["i-1", "i-3"]);
        assert_eq!(log.count("describe_security_groups"), 3);

        // i-3 keeps only the group that matched
        assert_eq!(names(instances[1].relation("security_groups").unwrap()), vec!["web"]);

        let again = Filter::parse([("security_groups__name__exact", json!("web"))])
            .unwrap()
            .run(&session, instances)
            .await
            .unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(log.count("describe_security_groups"), 3);
    }
}

mod capability_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn web_group() -> ReplayFactory {
        ReplayFactory::default().with_response(
            "autoscaling",
            "describe_auto_scaling_groups",
            json!({"AutoScalingGroups": [
                {"AutoScalingGroupName": "web", "LaunchConfigurationName": "lc-1"}
            ]}),
        )
    }

    #[tokio::test]
    async fn test_scaling_policies_and_their_alarms() {
        let factory = web_group()
            .with_response(
                "autoscaling",
                "describe_policies",
                json!({"ScalingPolicies": [{
                    "PolicyName": "scale-up",
                    "AutoScalingGroupName": "web",
                    "Alarms": [{"AlarmName": "high-cpu"}]
                }]}),
            )
            .with_response(
                "cloudwatch",
                "describe_alarms",
                json!({"MetricAlarms": [{"AlarmName": "high-cpu", "StateValue": "ALARM"}]}),
            );
        let (session, log) = session(factory);

        let group = session
            .resources("asg")
            .unwrap()
            .get_with_related(params(json!({"name": "web"})), &["scaling_policies__alarms"])
            .await
            .unwrap();

        let policies = group.relation("scaling_policies").unwrap();
        assert_eq!(names(policies), vec!["scale-up"]);
        let alarms = policies.get(0).unwrap().unwrap().relation("alarms").unwrap();
        assert!(alarms.is_loaded());
        assert_eq!(
            alarms.get(0).unwrap().unwrap().str_field("state_value"),
            Some("ALARM")
        );

        let calls = log.calls();
        let listing = calls.iter().find(|c| c.call == "describe_policies").unwrap();
        assert_eq!(listing.params["AutoScalingGroupName"], json!("web"));
        let relist = calls.iter().find(|c| c.call == "describe_alarms").unwrap();
        assert_eq!(relist.params["AlarmNames"], json!(["high-cpu"]));
    }

    #[tokio::test]
    async fn test_instance_metrics_use_rendered_dimensions() {
        let factory = ReplayFactory::default()
            .with_response(
                "ec2",
                "describe_instances",
                json!({"Reservations": [{"Instances": [{"InstanceId": "i-1"}]}]}),
            )
            .with_response(
                "cloudwatch",
                "list_metrics",
                json!({"Metrics": [
                    {"MetricName": "CPUUtilization", "Namespace": "AWS/EC2"},
                    {"MetricName": "NetworkIn", "Namespace": "AWS/EC2"}
                ]}),
            );
        let (session, log) = session(factory);

        let instance = session
            .resources("instance")
            .unwrap()
            .get_with_related(params(json!({"id": "i-1"})), &["metrics"])
            .await
            .unwrap();

        assert_eq!(
            names(instance.relation("metrics").unwrap()),
            vec!["CPUUtilization", "NetworkIn"]
        );

        let calls = log.calls();
        let listing = calls.iter().find(|c| c.call == "list_metrics").unwrap();
        assert_eq!(listing.params["Namespace"], json!("AWS/EC2"));
        assert_eq!(
            listing.params["Dimensions"],
            json!([{"Name": "InstanceId", "Value": "i-1"}])
        );
    }

    #[tokio::test]
    async fn test_group_security_groups_come_from_launch_configuration() {
        let factory = web_group()
            .with_response(
                "autoscaling",
                "describe_launch_configurations",
                json!({"LaunchConfigurations": [{
                    "LaunchConfigurationName": "lc-1",
                    "SecurityGroups": ["sg-1", "sg-2"]
                }]}),
            )
            .with_handler("ec2", "describe_security_groups", security_groups_by_id);
        let (session, log) = session(factory);

        let group = session
            .resources("asg")
            .unwrap()
            .get_with_related(params(json!({"name": "web"})), &["security_groups"])
            .await
            .unwrap();

        let groups = group.relation("security_groups").unwrap();
        assert!(groups.is_loaded());
        assert_eq!(names(groups), vec!["web", "db"]);
        assert_eq!(log.count("describe_launch_configurations"), 1);
        assert_eq!(log.count("describe_security_groups"), 1);
    }

    #[tokio::test]
    async fn test_load_balancer_accessible_resources() {
        let factory = ReplayFactory::default()
            .with_response(
                "elbv2",
                "describe_load_balancers",
                json!({"LoadBalancers": [
                    {"LoadBalancerName": "public", "SecurityGroups": ["sg-1"]}
                ]}),
            )
            .with_handler("ec2", "describe_security_groups", |p: &Params| {
                if p.contains_key("Filters") {
                    return Ok(json!({"SecurityGroups": [
                        {"GroupId": "sg-9", "GroupName": "backend"}
                    ]}));
                }
                security_groups_by_id(p)
            });
        let (session, log) = session(factory);

        let balancer = session
            .resources("load_balancer")
            .unwrap()
            .get_with_related(params(json!({"name": "public"})), &["accessible_resources"])
            .await
            .unwrap();

        assert_eq!(
            names(balancer.relation("accessible_resources").unwrap()),
            vec!["backend"]
        );

        let filters: Vec<Value> = log
            .calls()
            .into_iter()
            .filter(|c| c.call == "describe_security_groups")
            .filter_map(|c| c.params.get("Filters").cloned())
            .collect();
        assert_eq!(
            filters,
            vec![json!([{"Name": "ip-permission.group-id", "Values": ["sg-1"]}])]
        );
    }

    fn backend_access(p: &Params) -> anyhow::Result<Value> {
        if p.contains_key("Filters") {
            return Ok(json!({"SecurityGroups": [{"GroupId": "sg-9", "GroupName": "backend"}]}));
        }
        security_groups_by_id(p)
    }

    #[tokio::test]
    async fn test_cache_cluster_nodes_and_accessible_resources() {
        let factory = ReplayFactory::default()
            .with_handler("ec2", "describe_security_groups", backend_access);
        let (session, _) = session(factory);

        let mut cluster = session
            .resources("elasticache_cluster")
            .unwrap()
            .from_record(json!({
                "CacheClusterId": "sessions",
                "CacheClusterStatus": "available",
                "CacheNodeType": "cache.t3.micro",
                "CacheNodes": [{"CacheNodeId": "0001"}, {"CacheNodeId": "0002"}],
                "CacheSecurityGroups": [],
                "SecurityGroups": [{"SecurityGroupId": "sg-1", "Status": "active"}]
            }))
            .unwrap();

        assert_eq!(cluster.str_field("id"), Some("sessions"));
        assert_eq!(cluster.str_field("status"), Some("available"));
        assert_eq!(cluster.str_field("node_type"), Some("cache.t3.micro"));

        let nodes = cluster.relation("nodes").unwrap();
        assert_eq!(nodes.kind(), "elasticache_node");
        let ids: Vec<&str> = nodes.iter().filter_map(|n| n.str_field("id")).collect();
        assert_eq!(ids, vec!["0001", "0002"]);

        cluster
            .fetch(&session, &["accessible_resources"], false)
            .await
            .unwrap();
        assert_eq!(names(cluster.relation("security_groups").unwrap()), vec!["web"]);
        assert_eq!(
            names(cluster.relation("accessible_resources").unwrap()),
            vec!["backend"]
        );
    }

    #[tokio::test]
    async fn test_classic_load_balancer_is_described_by_name() {
        let factory = ReplayFactory::default()
            .with_response(
                "elb",
                "describe_load_balancers",
                json!({"LoadBalancerDescriptions": [{
                    "LoadBalancerName": "legacy",
                    "DNSName": "legacy-1.elb.amazonaws.com",
                    "Instances": [{"InstanceId": "i-1"}, {"InstanceId": "i-2"}],
                    "SecurityGroups": ["sg-1"]
                }]}),
            )
            .with_handler("ec2", "describe_security_groups", backend_access);
        let (session, log) = session(factory);

        let balancer = session
            .resources("load_balancer_classic")
            .unwrap()
            .get_with_related(params(json!({"name": "legacy"})), &["accessible_resources"])
            .await
            .unwrap();

        assert_eq!(balancer.str_field("name"), Some("legacy"));
        let instances = balancer.relation("instances").unwrap();
        let ids: Vec<&str> = instances.iter().filter_map(|i| i.str_field("id")).collect();
        assert_eq!(ids, vec!["i-1", "i-2"]);
        assert_eq!(
            names(balancer.relation("accessible_resources").unwrap()),
            vec!["backend"]
        );

        let describe = log
            .calls()
            .into_iter()
            .find(|c| c.call == "describe_load_balancers")
            .unwrap();
        assert_eq!(describe.params, params(json!({"LoadBalancerNames": ["legacy"]})));
    }
}

mod timeseries_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use chrono::{TimeZone, Utc};

    fn window() -> (chrono::DateTime<Utc>, chrono::DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_instance_statistics_lead_with_owner_dimensions() {
        let factory = ReplayFactory::default().with_response(
            "cloudwatch",
            "get_metric_statistics",
            json!({"Label": "CPUUtilization", "Datapoints": [
                {"Timestamp": "2024-03-01T09:00:00Z", "Average": 12.5, "Unit": "Percent"},
                {"Timestamp": "2024-03-01T09:05:00Z", "Average": 40.0, "Unit": "Percent"}
            ]}),
        );
        let (session, log) = session(factory);
        let instance = session
            .resources("instance")
            .unwrap()
            .from_record(json!({"InstanceId": "i-1"}))
            .unwrap();
        let (start, end) = window();

        let samples = instance
            .statistics(
                &session,
                &StatisticsRequest::new("CPUUtilization").window(start, end),
            )
            .await
            .unwrap();

        assert_eq!(names(&samples), vec!["CPUUtilization", "CPUUtilization"]);
        assert!(samples.iter().all(|s| s.is_loaded() && s.kind_name() == "metric"));
        let averages: Vec<f64> = samples
            .iter()
            .filter_map(|s| s.field("average").and_then(|v| v.as_f64()))
            .collect();
        assert_eq!(averages, vec![12.5, 40.0]);

        let calls = log.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].params,
            params(json!({
                "Namespace": "AWS/EC2",
                "MetricName": "CPUUtilization",
                "StartTime": "2024-03-01T09:00:00Z",
                "EndTime": "2024-03-01T12:00:00Z",
                "Period": 300,
                "Dimensions": [{"Name": "InstanceId", "Value": "i-1"}],
                "Statistics": ["Average"]
            }))
        );
    }

    #[tokio::test]
    async fn test_namespace_statistics_take_only_requested_dimensions() {
        let factory = ReplayFactory::default().with_response(
            "cloudwatch",
            "get_metric_statistics",
            json!({"Datapoints": [{"Timestamp": "2024-03-01T09:00:00Z", "Maximum": 3.0}]}),
        );
        let (session, log) = session(factory);
        let (start, end) = window();
        let request = StatisticsRequest::new("Errors")
            .window(start, end)
            .period_seconds(60)
            .dimension("FunctionName", "resize")
            .statistic("Maximum");

        let samples = metric_statistics(&session, "AWS/Lambda", &request)
            .await
            .unwrap();

        assert_eq!(names(&samples), vec!["Errors"]);
        let call = &log.calls()[0];
        assert_eq!(call.params["Namespace"], json!("AWS/Lambda"));
        assert_eq!(call.params["Period"], json!(60));
        assert_eq!(call.params["Statistics"], json!(["Maximum"]));
        assert_eq!(
            call.params["Dimensions"],
            json!([{"Name": "FunctionName", "Value": "resize"}])
        );
    }

    #[tokio::test]
    async fn test_statistics_need_a_metrics_capability() {
        let (session, log) = session(ReplayFactory::default());
        let group = session
            .resources("security_group")
            .unwrap()
            .from_record(json!({"GroupId": "sg-1"}))
            .unwrap();

        let err = group
            .statistics(&session, &StatisticsRequest::new("CPUUtilization"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Unsupported { .. }));
        assert_eq!(log.total(), 0);
    }

    #[tokio::test]
    async fn test_metric_options_are_listed_once() {
        let factory = ReplayFactory::default().with_response(
            "cloudwatch",
            "list_metrics",
            json!({"Metrics": [
                {"MetricName": "NetworkIn", "Namespace": "AWS/EC2"},
                {"MetricName": "CPUUtilization", "Namespace": "AWS/EC2"},
                {"MetricName": "NetworkIn", "Namespace": "AWS/EC2"}
            ]}),
        );
        let (session, log) = session(factory);
        let mut instance = session
            .resources("instance")
            .unwrap()
            .from_record(json!({"InstanceId": "i-1"}))
            .unwrap();

        let options = instance.metric_options(&session, false).await.unwrap();
        let again = instance.metric_options(&session, false).await.unwrap();

        assert_eq!(
            options.into_iter().collect::<Vec<_>>(),
            vec!["CPUUtilization", "NetworkIn"]
        );
        assert_eq!(again.len(), 2);
        assert_eq!(log.count("list_metrics"), 1);
    }

    #[tokio::test]
    async fn test_alarm_history_pages_through_the_window() {
        let factory = ReplayFactory::default().with_handler(
            "cloudwatch",
            "describe_alarm_history",
            |p: &Params| {
                let entry = |summary: &str| {
                    json!({
                        "AlarmName": "cpu-high",
                        "HistoryItemType": "StateUpdate",
                        "HistorySummary": summary
                    })
                };
                if p.contains_key("NextToken") {
                    return Ok(json!({"AlarmHistoryItems": [entry("OK to ALARM")]}));
                }
                Ok(json!({"AlarmHistoryItems": [entry("ALARM to OK")], "NextToken": "page-2"}))
            },
        );
        let (session, log) = session(factory);
        let alarm = session
            .resources("alarm")
            .unwrap()
            .from_record(json!({"AlarmName": "cpu-high"}))
            .unwrap();
        let (start, end) = window();

        let history = alarm
            .alarm_history(&session, &HistoryRequest::new(start, end))
            .await
            .unwrap();

        let summaries: Vec<&str> = history
            .iter()
            .filter_map(|h| h.str_field("history_summary"))
            .collect();
        assert_eq!(summaries, vec!["ALARM to OK", "OK to ALARM"]);
        assert!(history.iter().all(|h| h.str_field("name") == Some("cpu-high")));

        let calls = log.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].params["AlarmName"], json!("cpu-high"));
        assert_eq!(calls[0].params["ScanBy"], json!("TimestampDescending"));
        assert_eq!(calls[0].params["StartDate"], json!("2024-03-01T09:00:00Z"));
        assert_eq!(calls[1].params["NextToken"], json!("page-2"));
    }

    #[tokio::test]
    async fn test_history_window_must_be_ordered() {
        let (session, log) = session(ReplayFactory::default());
        let (start, end) = window();

        let err = alarm_history(&session, &HistoryRequest::new(end, start))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(log.total(), 0);
    }
}
