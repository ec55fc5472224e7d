use crate::error::Result;
use crate::provider::pagination::{Page, Paginator};
use crate::provider::{response_items, response_token, ProviderClient};
use crate::throttle::limits;
use serde_json::{json, Value as JsonValue};

impl ProviderClient {
    pub async fn describe_spot_instance_requests(&self) -> Result<Vec<JsonValue>> {
        let response = self
            .call("ec2", "DescribeSpotInstanceRequests", json!({}))
            .await?;
        Ok(response_items(&response, "SpotInstanceRequests"))
    }

    pub async fn describe_spot_fleet_requests(&self) -> Result<Vec<JsonValue>> {
        let response = self
            .call("ec2", "DescribeSpotFleetRequests", json!({}))
            .await?;
        Ok(response_items(&response, "SpotFleetRequestConfigs"))
    }

    /// Attachment records augmented with the owner-account information the
    /// aggregator drops; queried directly against the compute API.
    pub async fn describe_transit_gateway_vpc_attachments(
        &self,
        attachment_ids: &[String],
    ) -> Result<Vec<JsonValue>> {
        if attachment_ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .call(
                "ec2",
                "DescribeTransitGatewayVpcAttachments",
                json!({ "TransitGatewayAttachmentIds": attachment_ids }),
            )
            .await?;
        Ok(response_items(&response, "TransitGatewayVpcAttachments"))
    }

    pub async fn describe_nat_gateways(&self, vpc_id: &str) -> Result<Vec<JsonValue>> {
        let response = self
            .call(
                "ec2",
                "DescribeNatGateways",
                json!({ "Filter": [{ "Name": "vpc-id", "Values": [vpc_id] }] }),
            )
            .await?;
        Ok(response_items(&response, "NatGateways"))
    }

    /// Target groups for the batch enrichment tier; the describe ceiling is
    /// shared with every other load-balancer describe.
    pub async fn describe_target_groups(&self) -> Result<Vec<JsonValue>> {
        let client = self.clone();
        Paginator::new(move |token| {
            let client = client.clone();
            Box::pin(async move {
                let mut body = json!({ "PageSize": 400 });
                if let Some(token) = token {
                    body["Marker"] = JsonValue::String(token);
                }
                let response = client
                    .call_throttled(
                        "elb-describe",
                        limits::ELB_DESCRIBE,
                        "elasticloadbalancing",
                        "DescribeTargetGroups",
                        body,
                    )
                    .await?;
                Ok(Page::new(
                    response_items(&response, "TargetGroups"),
                    response_token(&response, "NextMarker"),
                ))
            })
        })
        .collect_all()
        .await
    }

    pub async fn describe_target_health(&self, target_group_arn: &str) -> Result<Vec<JsonValue>> {
        let response = self
            .call_throttled(
                "elb-describe",
                limits::ELB_DESCRIBE,
                "elasticloadbalancing",
                "DescribeTargetHealth",
                json!({ "TargetGroupArn": target_group_arn }),
            )
            .await?;
        Ok(response_items(&response, "TargetHealthDescriptions"))
    }

    /// Task-definition ARNs of every running task in `cluster`; feeds the
    /// initializer's mutual-exclusion probe and the service enrichment.
    pub async fn list_running_task_definitions(&self, cluster: &str) -> Result<Vec<String>> {
        let tasks = self.describe_cluster_tasks(cluster, None).await?;
        Ok(tasks
            .iter()
            .filter_map(|task| {
                task.get("taskDefinitionArn")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string)
            })
            .collect())
    }

    /// Running tasks in a cluster, optionally narrowed to one service.
    pub async fn describe_cluster_tasks(
        &self,
        cluster: &str,
        service_name: Option<&str>,
    ) -> Result<Vec<JsonValue>> {
        let client = self.clone();
        let cluster_owned = cluster.to_string();
        let service_owned = service_name.map(str::to_string);
        let task_arns: Vec<String> = Paginator::new(move |token| {
            let client = client.clone();
            let cluster = cluster_owned.clone();
            let service = service_owned.clone();
            Box::pin(async move {
                let mut body = json!({
                    "cluster": cluster,
                    "desiredStatus": "RUNNING",
                });
                if let Some(service) = service {
                    body["serviceName"] = JsonValue::String(service);
                }
                if let Some(token) = token {
                    body["nextToken"] = JsonValue::String(token);
                }
                let response = client
                    .call_throttled(
                        "ecs-cluster-reads",
                        limits::ECS_CLUSTER_READS,
                        "ecs",
                        "ListTasks",
                        body,
                    )
                    .await?;
                Ok(Page::new(
                    response_items(&response, "taskArns"),
                    response_token(&response, "nextToken"),
                ))
            })
        })
        .collect_all()
        .await?
        .into_iter()
        .filter_map(|arn| arn.as_str().map(str::to_string))
        .collect();

        let mut tasks = Vec::with_capacity(task_arns.len());
        for chunk in task_arns.chunks(100) {
            let response = self
                .call_throttled(
                    "ecs-cluster-reads",
                    limits::ECS_CLUSTER_READS,
                    "ecs",
                    "DescribeTasks",
                    json!({ "cluster": cluster, "tasks": chunk }),
                )
                .await?;
            tasks.extend(response_items(&response, "tasks"));
        }
        Ok(tasks)
    }

    pub async fn describe_task_definition(&self, task_definition: &str) -> Result<JsonValue> {
        let response = self
            .call_throttled(
                "ecs-cluster-reads",
                limits::ECS_CLUSTER_READS,
                "ecs",
                "DescribeTaskDefinition",
                json!({ "taskDefinition": task_definition }),
            )
            .await?;
        Ok(response.get("taskDefinition").cloned().unwrap_or(JsonValue::Null))
    }

    pub async fn list_nodegroups(&self, cluster_name: &str) -> Result<Vec<String>> {
        let client = self.clone();
        let cluster = cluster_name.to_string();
        Paginator::new(move |token| {
            let client = client.clone();
            let cluster = cluster.clone();
            Box::pin(async move {
                let mut body = json!({ "clusterName": cluster });
                if let Some(token) = token {
                    body["nextToken"] = JsonValue::String(token);
                }
                let response = client.call("eks", "ListNodegroups", body).await?;
                Ok(Page::new(
                    response_items(&response, "nodegroups"),
                    response_token(&response, "nextToken"),
                ))
            })
        })
        .collect_all()
        .await
        .map(|names| {
            names
                .into_iter()
                .filter_map(|name| name.as_str().map(str::to_string))
                .collect()
        })
    }

    pub async fn describe_nodegroup(
        &self,
        cluster_name: &str,
        nodegroup_name: &str,
    ) -> Result<JsonValue> {
        let response = self
            .call_throttled(
                "eks-describe-nodegroup",
                limits::EKS_DESCRIBE_NODEGROUP,
                "eks",
                "DescribeNodegroup",
                json!({
                    "clusterName": cluster_name,
                    "nodegroupName": nodegroup_name,
                }),
            )
            .await?;
        Ok(response.get("nodegroup").cloned().unwrap_or(JsonValue::Null))
    }
}
