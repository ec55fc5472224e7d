use crate::credentials::AccountCredentials;
use crate::error::{Context, Result};
use crate::provider::pagination::{Page, Paginator};
use crate::provider::{response_items, response_token, ProviderClient};
use crate::retry::{is_transient, retry_with_backoff, BackoffPolicy};
use crate::throttle::limits;
use chrono::DateTime;
use serde_json::{json, Value as JsonValue};

/// Session name stamped on every assumed trust role; the scheduler scopes
/// one session per crawl.
const ROLE_SESSION_NAME: &str = "cartographer-discovery";

#[derive(Debug, Clone)]
pub struct OrganizationInfo {
    pub organization_id: String,
    pub management_account_id: String,
}

#[derive(Debug, Clone)]
pub struct OrganizationAccount {
    pub account_id: String,
    pub name: Option<String>,
}

impl ProviderClient {
    /// Assumes the per-account discovery trust role and returns its
    /// short-lived credentials.
    pub async fn assume_role(&self, role_arn: &str) -> Result<AccountCredentials> {
        let response = self
            .call(
                "sts",
                "AssumeRole",
                json!({
                    "RoleArn": role_arn,
                    "RoleSessionName": ROLE_SESSION_NAME,
                }),
            )
            .await?;

        let credentials = response
            .get("Credentials")
            .ok_or_else(|| crate::err!("AssumeRole response carried no credentials"))?;
        let expiration = credentials
            .get("Expiration")
            .and_then(JsonValue::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.to_utc());

        Ok(AccountCredentials::new(
            string_field(credentials, "AccessKeyId")?,
            string_field(credentials, "SecretAccessKey")?,
            string_field(credentials, "SessionToken")?,
            expiration,
        ))
    }

    pub async fn describe_organization(&self) -> Result<OrganizationInfo> {
        self.bucket("organizations", limits::ORGANIZATIONS)
            .acquire()
            .await;
        let response = self
            .call("organizations", "DescribeOrganization", json!({}))
            .await?;
        let organization = response
            .get("Organization")
            .ok_or_else(|| crate::err!("DescribeOrganization response carried no organization"))?;
        Ok(OrganizationInfo {
            organization_id: string_field(organization, "Id")?,
            management_account_id: string_field(organization, "MasterAccountId")?,
        })
    }

    /// Child organizational-unit ids of `parent`, walked at the 1 op/sec
    /// organizations ceiling.
    pub async fn list_organizational_units_for_parent(&self, parent: &str) -> Result<Vec<String>> {
        let pages = self
            .paginate_organizations(
                "ListOrganizationalUnitsForParent",
                json!({ "ParentId": parent }),
                "OrganizationalUnits",
            )
            .await?;
        Ok(pages
            .iter()
            .filter_map(|unit| unit.get("Id").and_then(JsonValue::as_str))
            .map(str::to_string)
            .collect())
    }

    pub async fn list_accounts_for_parent(&self, parent: &str) -> Result<Vec<OrganizationAccount>> {
        let pages = self
            .paginate_organizations(
                "ListAccountsForParent",
                json!({ "ParentId": parent }),
                "Accounts",
            )
            .await?;
        Ok(pages
            .iter()
            .filter_map(|account| {
                let account_id = account.get("Id").and_then(JsonValue::as_str)?;
                Some(OrganizationAccount {
                    account_id: account_id.to_string(),
                    name: account
                        .get("Name")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string),
                })
            })
            .collect())
    }

    async fn paginate_organizations(
        &self,
        action: &str,
        body: JsonValue,
        items_field: &str,
    ) -> Result<Vec<JsonValue>> {
        let client = self.clone();
        let action = action.to_string();
        let items_field = items_field.to_string();
        Paginator::new(move |token| {
            let client = client.clone();
            let action = action.clone();
            let items_field = items_field.clone();
            let mut body = body.clone();
            Box::pin(async move {
                if let Some(token) = token {
                    body["NextToken"] = JsonValue::String(token);
                }
                let response = client
                    .call_throttled(
                        "organizations",
                        limits::ORGANIZATIONS,
                        "organizations",
                        &action,
                        body,
                    )
                    .await?;
                Ok(Page::new(
                    response_items(&response, &items_field),
                    response_token(&response, "NextToken"),
                ))
            })
        })
        .collect_all()
        .await
    }

    /// Fetches the named configuration aggregator, if it exists.
    pub async fn describe_configuration_aggregator(
        &self,
        aggregator_name: &str,
    ) -> Result<Option<JsonValue>> {
        let response = self
            .call(
                "config",
                "DescribeConfigurationAggregators",
                json!({ "ConfigurationAggregatorNames": [aggregator_name] }),
            )
            .await;
        match response {
            Ok(body) => Ok(response_items(&body, "ConfigurationAggregators")
                .into_iter()
                .next()),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn has_configuration_recorder(&self) -> Result<bool> {
        let response = self
            .call("config", "DescribeConfigurationRecorders", json!({}))
            .await?;
        Ok(!response_items(&response, "ConfigurationRecorders").is_empty())
    }

    pub async fn has_delivery_channel(&self) -> Result<bool> {
        let response = self
            .call("config", "DescribeDeliveryChannels", json!({}))
            .await?;
        Ok(!response_items(&response, "DeliveryChannels").is_empty())
    }

    /// The critical aggregator-read path: an advanced query against the
    /// cross-account aggregator, paginated, throttled, and retried at the
    /// 5-attempt `2000·2^n` ms schedule.
    pub async fn select_aggregate_resource_config(
        &self,
        aggregator_name: &str,
        expression: &str,
    ) -> Result<Vec<JsonValue>> {
        let client = self.clone();
        let aggregator_name = aggregator_name.to_string();
        let expression = expression.to_string();
        Paginator::new(move |token| {
            let client = client.clone();
            let aggregator_name = aggregator_name.clone();
            let expression = expression.clone();
            Box::pin(async move {
                let mut body = json!({
                    "ConfigurationAggregatorName": aggregator_name,
                    "Expression": expression,
                    "Limit": 100,
                });
                if let Some(token) = token {
                    body["NextToken"] = JsonValue::String(token);
                }
                client
                    .bucket("config-select-aggregate", limits::CONFIG_SELECT_AGGREGATE)
                    .acquire()
                    .await;
                let response = retry_with_backoff(
                    BackoffPolicy::aggregator(),
                    "config:SelectAggregateResourceConfig",
                    is_transient,
                    || {
                        client.call(
                            "config",
                            "SelectAggregateResourceConfig",
                            body.clone(),
                        )
                    },
                )
                .await?;
                Ok(Page::new(
                    response_items(&response, "Results"),
                    response_token(&response, "NextToken"),
                ))
            })
        })
        .collect_all()
        .await
        .context("aggregator advanced query failed")
    }

    /// Provider-owned managed policies that are attached to at least one
    /// entity; global surface.
    pub async fn list_provider_managed_policies(&self) -> Result<Vec<JsonValue>> {
        let client = self.clone();
        Paginator::new(move |token| {
            let client = client.clone();
            Box::pin(async move {
                let mut body = json!({
                    "Scope": "AWS",
                    "OnlyAttached": true,
                });
                if let Some(token) = token {
                    body["Marker"] = JsonValue::String(token);
                }
                let response = client.call("iam", "ListPolicies", body).await?;
                Ok(Page::new(
                    response_items(&response, "Policies"),
                    response_token(&response, "Marker"),
                ))
            })
        })
        .collect_all()
        .await
    }

    pub async fn list_role_inline_policies(
        &self,
        role_name: &str,
    ) -> Result<Vec<(String, JsonValue)>> {
        self.list_inline_policies(
            "ListRolePolicies",
            "GetRolePolicy",
            "RoleName",
            role_name,
        )
        .await
    }

    pub async fn list_user_inline_policies(
        &self,
        user_name: &str,
    ) -> Result<Vec<(String, JsonValue)>> {
        self.list_inline_policies(
            "ListUserPolicies",
            "GetUserPolicy",
            "UserName",
            user_name,
        )
        .await
    }

    async fn list_inline_policies(
        &self,
        list_action: &str,
        get_action: &str,
        principal_field: &str,
        principal_name: &str,
    ) -> Result<Vec<(String, JsonValue)>> {
        let response = self
            .call("iam", list_action, json!({ principal_field: principal_name }))
            .await?;
        let names: Vec<String> = response_items(&response, "PolicyNames")
            .into_iter()
            .filter_map(|name| name.as_str().map(str::to_string))
            .collect();

        let mut policies = Vec::with_capacity(names.len());
        for name in names {
            let detail = self
                .call(
                    "iam",
                    get_action,
                    json!({ principal_field: principal_name, "PolicyName": name }),
                )
                .await?;
            let document = decode_policy_document(detail.get("PolicyDocument"));
            policies.push((name, document));
        }
        Ok(policies)
    }
}

/// Inline policy documents arrive URL-encoded; decode to JSON, falling back
/// to the raw value when the document is already structured.
fn decode_policy_document(raw: Option<&JsonValue>) -> JsonValue {
    match raw {
        Some(JsonValue::String(encoded)) => {
            let decoded = percent_decode(encoded);
            serde_json::from_str(&decoded).unwrap_or(JsonValue::String(decoded))
        }
        Some(value) => value.clone(),
        None => JsonValue::Null,
    }
}

fn percent_decode(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch == '%' {
            let high = chars.next();
            let low = chars.next();
            if let (Some(high), Some(low)) = (high, low) {
                if let Ok(byte) = u8::from_str_radix(&format!("{high}{low}"), 16) {
                    output.push(byte as char);
                    continue;
                }
            }
            output.push(ch);
        } else {
            output.push(ch);
        }
    }
    output
}

fn string_field(value: &JsonValue, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| crate::err!("response missing required field `{field}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_documents_are_percent_decoded() {
        let raw = JsonValue::String("%7B%22Statement%22%3A%5B%5D%7D".to_string());
        let decoded = decode_policy_document(Some(&raw));
        assert_eq!(decoded, serde_json::json!({ "Statement": [] }));
    }
}
