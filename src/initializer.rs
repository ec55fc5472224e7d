use crate::config::DiscoveryConfig;
use crate::error::{Error, Result};
use crate::provider::ProviderClient;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Services whose regional endpoints must be reachable from the discovery
/// VPC before a crawl may start.
const REQUIRED_SERVICES: [&str; 9] = [
    "iam",
    "sts",
    "config",
    "apigateway",
    "ec2",
    "ecs",
    "cognito-idp",
    "es",
    "logs",
];

/// Preflight: endpoint reachability, the single-instance mutex probe, and
/// aggregator validation. Fatal kinds raised here bypass the per-item
/// collection machinery and abort the crawl.
pub struct Initializer {
    config: DiscoveryConfig,
    provider: ProviderClient,
    http: reqwest::Client,
}

impl Initializer {
    pub fn new(config: DiscoveryConfig, provider: ProviderClient) -> Result<Self> {
        Ok(Self {
            config,
            provider,
            http: reqwest::Client::builder()
                .connect_timeout(PROBE_TIMEOUT)
                .timeout(PROBE_TIMEOUT)
                .build()?,
        })
    }

    pub async fn run(&self) -> Result<()> {
        self.probe_endpoints().await?;
        self.ensure_single_instance().await?;
        if self.config.organizations_mode() {
            self.validate_aggregator().await?;
        }
        info!(event = "preflight_complete", "initializer checks passed");
        Ok(())
    }

    /// Probes every required service endpoint plus the graph store with a
    /// hard 5 s timeout. Any unreachable endpoint fails the crawl with the
    /// full list of offending services.
    async fn probe_endpoints(&self) -> Result<()> {
        let region = &self.config.region;
        let mut targets: Vec<(String, String)> = REQUIRED_SERVICES
            .iter()
            .map(|service| {
                (
                    service.to_string(),
                    format!("https://{service}.{region}.amazonaws.com"),
                )
            })
            .collect();
        targets.push(("graph-store".to_string(), self.config.graph_store_url.clone()));
        if self.config.organizations_mode() {
            targets.push((
                "organizations".to_string(),
                "https://organizations.us-east-1.amazonaws.com".to_string(),
            ));
        }

        let mut unreachable = Vec::new();
        for (service, url) in targets {
            if !self.is_reachable(&url).await {
                unreachable.push(service);
            }
        }

        if unreachable.is_empty() {
            return Ok(());
        }

        if let Some(vpc_id) = &self.config.vpc_id {
            match self.provider.describe_nat_gateways(vpc_id).await {
                Ok(gateways) if gateways.is_empty() => warn!(
                    vpc = %vpc_id,
                    "discovery VPC has no NAT gateway; service endpoints require VPC endpoints"
                ),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "NAT gateway probe failed"),
            }
        }

        Err(Error::VpcConfigurationValidation {
            services: unreachable,
        })
    }

    async fn is_reachable(&self, url: &str) -> bool {
        // Any HTTP response proves network reachability; auth failures are
        // expected from unauthenticated probes.
        self.http.head(url).send().await.is_ok()
    }

    /// Counts running tasks per task group in the scheduler cluster. Two
    /// task-definition ARNs compare equal ignoring the trailing version
    /// segment; more than one instance of the same group means a concurrent
    /// crawl is already in flight.
    async fn ensure_single_instance(&self) -> Result<()> {
        let task_definitions = self
            .provider
            .list_running_task_definitions(&self.config.cluster_name)
            .await?;

        let mut families: HashMap<String, usize> = HashMap::new();
        for arn in &task_definitions {
            *families.entry(strip_revision(arn).to_string()).or_default() += 1;
        }

        if families.values().any(|count| *count > 1) {
            return Err(Error::DiscoveryAlreadyRunning);
        }
        Ok(())
    }

    /// In organizations mode the aggregator must exist and be fed by an
    /// organization aggregation source.
    async fn validate_aggregator(&self) -> Result<()> {
        let aggregator_name = &self.config.config_aggregator_name;
        let aggregator = self
            .provider
            .describe_configuration_aggregator(aggregator_name)
            .await?
            .ok_or_else(|| Error::AggregatorNotFound {
                aggregator: aggregator_name.clone(),
            })?;

        let has_org_source = aggregator
            .get("OrganizationAggregationSource")
            .map(|source| !matches!(source, JsonValue::Null))
            .unwrap_or(false);
        if !has_org_source {
            return Err(Error::OrgAggregatorValidation {
                aggregator: aggregator_name.clone(),
            });
        }
        Ok(())
    }
}

/// `.../task-definition/family:12` → `.../task-definition/family`.
fn strip_revision(task_definition_arn: &str) -> &str {
    match task_definition_arn.rfind(':') {
        Some(index) if task_definition_arn[index + 1..].chars().all(|c| c.is_ascii_digit()) => {
            &task_definition_arn[..index]
        }
        _ => task_definition_arn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_suffix_is_ignored() {
        assert_eq!(
            strip_revision("arn:aws:ecs:eu-west-1:111:task-definition/discovery:42"),
            "arn:aws:ecs:eu-west-1:111:task-definition/discovery"
        );
        assert_eq!(
            strip_revision("arn:aws:ecs:eu-west-1:111:task-definition/discovery"),
            "arn:aws:ecs:eu-west-1:111:task-definition/discovery"
        );
    }
}
