use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Runtime configuration for a single discovery crawl. The process takes no
/// command-line arguments; every option arrives through the environment under
/// the `CARTOGRAPHER__` prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    pub cluster_name: String,
    pub config_aggregator_name: String,
    #[serde(default)]
    pub cross_account_discovery: CrossAccountDiscovery,
    #[serde(default)]
    pub custom_user_agent: Option<String>,
    pub graph_store_url: String,
    #[serde(default)]
    pub organization_unit_id: Option<String>,
    pub region: String,
    pub root_account_id: String,
    pub discovery_role_name: String,
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum CrossAccountDiscovery {
    #[serde(rename = "organizations", alias = "AWS_ORGANIZATIONS")]
    Organizations,
    #[default]
    #[serde(rename = "self-managed", alias = "SELF_MANAGED")]
    SelfManaged,
}

impl DiscoveryConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("CARTOGRAPHER").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn organizations_mode(&self) -> bool {
        self.cross_account_discovery == CrossAccountDiscovery::Organizations
    }

    /// ARN of the per-account trust role. The role name is suffixed with the
    /// root account id so that a fleet of deployments can coexist.
    pub fn discovery_role_arn(&self, account_id: &str) -> String {
        format!(
            "arn:aws:iam::{account_id}:role/{role}-{root}",
            role = self.discovery_role_name,
            root = self.root_account_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_role_arn_carries_root_suffix() {
        let config = DiscoveryConfig {
            cluster_name: "discovery-cluster".to_string(),
            config_aggregator_name: "discovery-aggregator".to_string(),
            cross_account_discovery: CrossAccountDiscovery::SelfManaged,
            custom_user_agent: None,
            graph_store_url: "https://graph.example.com/graphql".to_string(),
            organization_unit_id: None,
            region: "eu-west-1".to_string(),
            root_account_id: "111111111111".to_string(),
            discovery_role_name: "cartographer-discovery".to_string(),
            vpc_id: None,
            log_level: None,
        };

        assert_eq!(
            config.discovery_role_arn("222222222222"),
            "arn:aws:iam::222222222222:role/cartographer-discovery-111111111111"
        );
    }

    #[test]
    fn cross_account_discovery_accepts_both_spellings() {
        let org: CrossAccountDiscovery = serde_json::from_str("\"organizations\"").unwrap();
        assert_eq!(org, CrossAccountDiscovery::Organizations);
        let direct: CrossAccountDiscovery = serde_json::from_str("\"self-managed\"").unwrap();
        assert_eq!(direct, CrossAccountDiscovery::SelfManaged);
    }
}
