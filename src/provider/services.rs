use crate::error::Result;
use crate::provider::pagination::{Page, Paginator};
use crate::provider::{response_items, response_token, ProviderClient};
use crate::throttle::limits;
use serde_json::{json, Value as JsonValue};

/// Mandated batch size for the search-service domain describe.
const SEARCH_DOMAIN_BATCH: usize = 5;

impl ProviderClient {
    pub async fn list_appregistry_applications(&self) -> Result<Vec<JsonValue>> {
        let client = self.clone();
        Paginator::new(move |token| {
            let client = client.clone();
            Box::pin(async move {
                let mut body = json!({});
                if let Some(token) = token {
                    body["nextToken"] = JsonValue::String(token);
                }
                let response = client
                    .call_throttled(
                        "appregistry",
                        limits::APP_REGISTRY,
                        "servicecatalog-appregistry",
                        "ListApplications",
                        body,
                    )
                    .await?;
                Ok(Page::new(
                    response_items(&response, "applications"),
                    response_token(&response, "nextToken"),
                ))
            })
        })
        .collect_all()
        .await
    }

    pub async fn get_appregistry_application(&self, application: &str) -> Result<JsonValue> {
        self.call_throttled(
            "appregistry",
            limits::APP_REGISTRY,
            "servicecatalog-appregistry",
            "GetApplication",
            json!({ "application": application }),
        )
        .await
    }

    pub async fn list_mediaconnect_flows(&self) -> Result<Vec<JsonValue>> {
        let client = self.clone();
        Paginator::new(move |token| {
            let client = client.clone();
            Box::pin(async move {
                let mut body = json!({});
                if let Some(token) = token {
                    body["nextToken"] = JsonValue::String(token);
                }
                let response = client
                    .call_throttled(
                        "mediaconnect-list",
                        limits::MEDIACONNECT_LIST,
                        "mediaconnect",
                        "ListFlows",
                        body,
                    )
                    .await?;
                Ok(Page::new(
                    response_items(&response, "Flows"),
                    response_token(&response, "NextToken"),
                ))
            })
        })
        .collect_all()
        .await
    }

    /// Domain names then details, described in the mandated batches of 5.
    pub async fn describe_search_domains(&self) -> Result<Vec<JsonValue>> {
        let response = self.call("es", "ListDomainNames", json!({})).await?;
        let names: Vec<String> = response_items(&response, "DomainNames")
            .iter()
            .filter_map(|entry| entry.get("DomainName").and_then(JsonValue::as_str))
            .map(str::to_string)
            .collect();

        let mut domains = Vec::with_capacity(names.len());
        for chunk in names.chunks(SEARCH_DOMAIN_BATCH) {
            let response = self
                .call("es", "DescribeDomains", json!({ "DomainNames": chunk }))
                .await?;
            domains.extend(response_items(&response, "DomainStatusList"));
        }
        Ok(domains)
    }

    pub async fn describe_table_stream(&self, stream_arn: &str) -> Result<JsonValue> {
        let response = self
            .call_throttled(
                "dynamodb-streams-describe",
                limits::DYNAMODB_STREAMS_DESCRIBE,
                "streams.dynamodb",
                "DescribeStream",
                json!({ "StreamArn": stream_arn }),
            )
            .await?;
        Ok(response
            .get("StreamDescription")
            .cloned()
            .unwrap_or(JsonValue::Null))
    }

    /// Path items of a REST API. Pages acquire the gateway paginator bucket
    /// on top of the per-account total-operations ceiling.
    pub async fn get_rest_api_resources(&self, rest_api_id: &str) -> Result<Vec<JsonValue>> {
        let client = self.clone();
        let rest_api_id = rest_api_id.to_string();
        Paginator::new(move |token| {
            let client = client.clone();
            let rest_api_id = rest_api_id.clone();
            Box::pin(async move {
                client
                    .bucket("gateway-paginator", limits::GATEWAY_PAGINATOR)
                    .acquire()
                    .await;
                let mut body = json!({ "restApiId": rest_api_id, "limit": 500 });
                if let Some(token) = token {
                    body["position"] = JsonValue::String(token);
                }
                let response = client
                    .call_throttled(
                        "gateway-total",
                        limits::GATEWAY_TOTAL,
                        "apigateway",
                        "GetResources",
                        body,
                    )
                    .await?;
                Ok(Page::new(
                    response_items(&response, "items"),
                    response_token(&response, "position"),
                ))
            })
        })
        .collect_all()
        .await
    }

    pub async fn get_rest_api_authorizers(&self, rest_api_id: &str) -> Result<Vec<JsonValue>> {
        let response = self
            .call_throttled(
                "gateway-total",
                limits::GATEWAY_TOTAL,
                "apigateway",
                "GetAuthorizers",
                json!({ "restApiId": rest_api_id }),
            )
            .await?;
        Ok(response_items(&response, "items"))
    }

    /// One method of a path item; absence of the verb is not an error.
    pub async fn get_rest_api_method(
        &self,
        rest_api_id: &str,
        resource_id: &str,
        http_method: &str,
    ) -> Result<Option<JsonValue>> {
        let result = self
            .call_throttled(
                "gateway-total",
                limits::GATEWAY_TOTAL,
                "apigateway",
                "GetMethod",
                json!({
                    "restApiId": rest_api_id,
                    "resourceId": resource_id,
                    "httpMethod": http_method,
                }),
            )
            .await;
        match result {
            Ok(method) => Ok(Some(method)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn list_graphql_data_sources(&self, api_id: &str) -> Result<Vec<JsonValue>> {
        self.paginate_appsync("ListDataSources", json!({ "apiId": api_id }), "dataSources")
            .await
    }

    pub async fn list_graphql_resolvers(
        &self,
        api_id: &str,
        type_name: &str,
    ) -> Result<Vec<JsonValue>> {
        self.paginate_appsync(
            "ListResolvers",
            json!({ "apiId": api_id, "typeName": type_name }),
            "resolvers",
        )
        .await
    }

    async fn paginate_appsync(
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
                    body["nextToken"] = JsonValue::String(token);
                }
                let response = client
                    .call_throttled("appsync", limits::APPSYNC, "appsync", &action, body)
                    .await?;
                Ok(Page::new(
                    response_items(&response, &items_field),
                    response_token(&response, "nextToken"),
                ))
            })
        })
        .collect_all()
        .await
    }

    pub async fn list_event_source_mappings(&self) -> Result<Vec<JsonValue>> {
        let client = self.clone();
        Paginator::new(move |token| {
            let client = client.clone();
            Box::pin(async move {
                let mut body = json!({});
                if let Some(token) = token {
                    body["Marker"] = JsonValue::String(token);
                }
                let response = client
                    .call("lambda", "ListEventSourceMappings", body)
                    .await?;
                Ok(Page::new(
                    response_items(&response, "EventSourceMappings"),
                    response_token(&response, "NextMarker"),
                ))
            })
        })
        .collect_all()
        .await
    }

    pub async fn list_sns_subscriptions(&self) -> Result<Vec<JsonValue>> {
        let client = self.clone();
        Paginator::new(move |token| {
            let client = client.clone();
            Box::pin(async move {
                let mut body = json!({});
                if let Some(token) = token {
                    body["NextToken"] = JsonValue::String(token);
                }
                let response = client.call("sns", "ListSubscriptions", body).await?;
                Ok(Page::new(
                    response_items(&response, "Subscriptions"),
                    response_token(&response, "NextToken"),
                ))
            })
        })
        .collect_all()
        .await
    }

    pub async fn list_event_bus_rules(&self, event_bus_name: &str) -> Result<Vec<JsonValue>> {
        let client = self.clone();
        let event_bus_name = event_bus_name.to_string();
        Paginator::new(move |token| {
            let client = client.clone();
            let event_bus_name = event_bus_name.clone();
            Box::pin(async move {
                let mut body = json!({ "EventBusName": event_bus_name });
                if let Some(token) = token {
                    body["NextToken"] = JsonValue::String(token);
                }
                let response = client.call("events", "ListRules", body).await?;
                Ok(Page::new(
                    response_items(&response, "Rules"),
                    response_token(&response, "NextToken"),
                ))
            })
        })
        .collect_all()
        .await
    }
}
