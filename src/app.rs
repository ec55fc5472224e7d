use crate::aggregator::AggregatorReader;
use crate::config::DiscoveryConfig;
use crate::credentials::AccountCredentials;
use crate::delta::compute_delta;
use crate::enrichment::EnrichmentPipeline;
use crate::error::{Context, Result};
use crate::graph::search::SearchIndexClient;
use crate::graph::transport::SignedGraphTransport;
use crate::graph::GraphStoreClient;
use crate::inference::RelationshipInferencer;
use crate::initializer::Initializer;
use crate::metadata::{self, AccountWriter};
use crate::persister::{projected_by_id, reconcile, Persister};
use crate::projection::project;
use crate::provider::transport::HttpProviderTransport;
use crate::provider::ProviderClient;
use crate::resolver::AccountResolver;
use crate::throttle::ThrottleRegistry;
use std::sync::Arc;
use tracing::info;

/// One crawl of the estate: preflight, account fan-out, baseline read,
/// enrichment, inference, delta, persistence, and metadata rollup.
pub struct DiscoveryApp {
    config: DiscoveryConfig,
    provider: ProviderClient,
    graph: GraphStoreClient,
    search: SearchIndexClient,
}

impl DiscoveryApp {
    pub async fn initialise(config: DiscoveryConfig) -> Result<Self> {
        let credentials =
            AccountCredentials::from_env().context("failed to read process credentials")?;

        let transport = Arc::new(
            HttpProviderTransport::new(config.custom_user_agent.as_deref())
                .context("failed to construct provider transport")?,
        );
        let throttles = Arc::new(ThrottleRegistry::new());
        let provider = ProviderClient::new(
            transport,
            throttles,
            credentials.clone(),
            &config.region,
        );

        let graph_transport = Arc::new(
            SignedGraphTransport::new(&config.graph_store_url, credentials)
                .context("failed to construct graph store transport")?,
        );
        let graph = GraphStoreClient::new(graph_transport.clone());
        let search = SearchIndexClient::new(graph_transport);

        Ok(Self {
            config,
            provider,
            graph,
            search,
        })
    }

    pub async fn run(self) -> Result<()> {
        Initializer::new(self.config.clone(), self.provider.clone())?
            .run()
            .await?;

        let stored_accounts = self
            .graph
            .get_accounts()
            .await
            .context("failed to read stored accounts")?;
        let mut accounts = AccountResolver::new(self.config.clone(), self.provider.clone())
            .resolve(stored_accounts)
            .await?;

        let aggregator = AggregatorReader::new(
            self.provider.clone(),
            &self.config.config_aggregator_name,
        );
        let (baseline, db_resources, db_relationships) = tokio::try_join!(
            aggregator.read_baseline(&accounts),
            self.graph.get_resources(),
            self.graph.get_relationships(),
        )?;
        info!(
            event = "stores_read",
            baseline = baseline.len(),
            db_resources = db_resources.len(),
            db_relationships = db_relationships.len(),
        );

        let mut resources = baseline;
        EnrichmentPipeline::new(self.provider.clone())
            .run(&accounts, &mut resources)
            .await?;

        let lookups = RelationshipInferencer::new(self.provider.clone())
            .run(&accounts, &mut resources)
            .await?;

        let delta = compute_delta(&resources, &lookups, &db_resources, &db_relationships);
        let projected = projected_by_id(resources.iter().map(project).collect());

        let outcome = Persister::new(self.graph.clone(), self.search.clone())
            .persist(&delta)
            .await;

        let reconciled = reconcile(&projected, &db_resources, &outcome);
        let rollup = metadata::aggregate(&reconciled);
        AccountWriter::new(self.config.clone(), self.graph.clone())
            .write_accounts(&mut accounts, rollup)
            .await;

        info!(
            event = "crawl_complete",
            resources = reconciled.len(),
            accounts = accounts.len(),
        );
        Ok(())
    }
}
