use crate::config::DiscoveryConfig;
use crate::credentials::AccountCredentials;
use crate::domain::{Account, AccountRegion};
use crate::error::Result;
use crate::pool::settle_all;
use crate::provider::ProviderClient;
use std::collections::BTreeMap;
use tracing::{info, warn};

const ASSUME_ROLE_CONCURRENCY: usize = 30;
const CONFIG_PROBE_CONCURRENCY: usize = 5;

enum AssumeOutcome {
    Deployed(AccountCredentials),
    Denied,
    Failed(crate::error::Error),
}

/// Reconciles the authoritative account list, assumes each account's trust
/// role, and probes config-recorder availability per region.
pub struct AccountResolver {
    config: DiscoveryConfig,
    provider: ProviderClient,
}

impl AccountResolver {
    pub fn new(config: DiscoveryConfig, provider: ProviderClient) -> Self {
        Self { config, provider }
    }

    pub async fn resolve(&self, stored_accounts: Vec<Account>) -> Result<BTreeMap<String, Account>> {
        let mut accounts = if self.config.organizations_mode() {
            self.organization_accounts(stored_accounts).await?
        } else {
            stored_accounts
                .into_iter()
                .map(|account| (account.account_id.clone(), account))
                .collect()
        };

        self.assume_trust_roles(&mut accounts).await;
        self.probe_config_enablement(&mut accounts).await;

        info!(
            event = "accounts_resolved",
            total = accounts.len(),
            eligible = accounts
                .values()
                .filter(|account| account.is_eligible_for_discovery())
                .count(),
            "account resolution complete"
        );
        Ok(accounts)
    }

    /// Organization mode: the OU tree rooted at the configured unit is the
    /// source of truth. Stored accounts that fell out of the organization
    /// are kept but marked for deletion.
    async fn organization_accounts(
        &self,
        stored_accounts: Vec<Account>,
    ) -> Result<BTreeMap<String, Account>> {
        let organization = self.provider.describe_organization().await?;
        let root_unit = self
            .config
            .organization_unit_id
            .clone()
            .ok_or_else(|| crate::err!("organizations mode requires organizationUnitId"))?;

        let mut stored: BTreeMap<String, Account> = stored_accounts
            .into_iter()
            .map(|account| (account.account_id.clone(), account))
            .collect();
        let mut accounts = BTreeMap::new();

        let mut pending_units = vec![root_unit];
        while let Some(unit) = pending_units.pop() {
            pending_units.extend(
                self.provider
                    .list_organizational_units_for_parent(&unit)
                    .await?,
            );
            for member in self.provider.list_accounts_for_parent(&unit).await? {
                let mut account = stored
                    .remove(&member.account_id)
                    .unwrap_or_else(|| Account::new(&member.account_id));
                account.name = member.name.or(account.name);
                account.organization_id = Some(organization.organization_id.clone());
                account.is_management_account =
                    member.account_id == organization.management_account_id;
                if account.regions.is_empty() {
                    account.regions = vec![AccountRegion::named(&self.config.region)];
                }
                account.to_delete = false;
                accounts.insert(account.account_id.clone(), account);
            }
        }

        for (account_id, mut account) in stored {
            account.to_delete = true;
            accounts.insert(account_id, account);
        }
        Ok(accounts)
    }

    async fn assume_trust_roles(&self, accounts: &mut BTreeMap<String, Account>) {
        let candidates: Vec<String> = accounts
            .values()
            .filter(|account| !account.to_delete)
            .map(|account| account.account_id.clone())
            .collect();

        let outcomes = settle_all(candidates, ASSUME_ROLE_CONCURRENCY, |account_id| {
            let role_arn = self.config.discovery_role_arn(&account_id);
            let provider = self.provider.clone();
            async move {
                let outcome = match provider.assume_role(&role_arn).await {
                    Ok(credentials) => AssumeOutcome::Deployed(credentials),
                    Err(err) if err.is_access_denied() => AssumeOutcome::Denied,
                    Err(err) => AssumeOutcome::Failed(err),
                };
                Ok((account_id, outcome))
            }
        })
        .await;

        for outcome in outcomes.into_iter().flatten() {
            let (account_id, outcome) = outcome;
            match outcome {
                AssumeOutcome::Deployed(credentials) => {
                    if let Some(account) = accounts.get_mut(&account_id) {
                        account.is_iam_role_deployed = Some(true);
                        account.credentials = Some(credentials);
                    }
                }
                AssumeOutcome::Denied => {
                    warn!(
                        account_id = %account_id,
                        "discovery trust role is not deployed; account will not be crawled"
                    );
                    if let Some(account) = accounts.get_mut(&account_id) {
                        account.is_iam_role_deployed = Some(false);
                    }
                }
                AssumeOutcome::Failed(err) => {
                    warn!(
                        account_id = %account_id,
                        error = %err,
                        "failed to assume discovery trust role; dropping account from this crawl"
                    );
                    accounts.remove(&account_id);
                }
            }
        }
    }

    /// `isConfigEnabled` needs both a recorder and a delivery channel in the
    /// region. Access denied during probing disqualifies the whole account;
    /// other failures leave the flag unknown.
    async fn probe_config_enablement(&self, accounts: &mut BTreeMap<String, Account>) {
        let mut probes = Vec::new();
        for account in accounts.values() {
            let Some(credentials) = account.credentials.clone() else {
                continue;
            };
            for region in &account.regions {
                probes.push((
                    account.account_id.clone(),
                    region.name.clone(),
                    credentials.clone(),
                ));
            }
        }

        let outcomes = settle_all(
            probes,
            CONFIG_PROBE_CONCURRENCY,
            |(account_id, region, credentials)| {
                let client = self.provider.with_credentials(credentials, &region);
                async move {
                    let enabled = async {
                        let recorder = client.has_configuration_recorder().await?;
                        let channel = client.has_delivery_channel().await?;
                        Ok::<bool, crate::error::Error>(recorder && channel)
                    }
                    .await;
                    Ok((account_id, region, enabled))
                }
            },
        )
        .await;

        for outcome in outcomes.into_iter().flatten() {
            let (account_id, region, enabled) = outcome;
            let Some(account) = accounts.get_mut(&account_id) else {
                continue;
            };
            match enabled {
                Ok(enabled) => {
                    if let Some(entry) = account
                        .regions
                        .iter_mut()
                        .find(|candidate| candidate.name == region)
                    {
                        entry.is_config_enabled = Some(enabled);
                    }
                }
                Err(err) if err.is_access_denied() => {
                    warn!(
                        account_id = %account_id,
                        region = %region,
                        "access denied probing config enablement; marking trust role undeployed"
                    );
                    account.is_iam_role_deployed = Some(false);
                    account.credentials = None;
                }
                Err(err) => {
                    warn!(
                        account_id = %account_id,
                        region = %region,
                        error = %err,
                        "config enablement probe failed"
                    );
                }
            }
        }
    }
}
