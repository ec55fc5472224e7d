use crate::domain::{self, type_label, Resource, Tag};
use serde_json::{json, Map as JsonMap, Value as JsonValue};

/// The property subset the graph store carries for every resource. Keys
/// outside this list are dropped at projection time.
const PROJECTED_KEYS: [&str; 19] = [
    "accountId",
    "arn",
    "availabilityZone",
    "awsRegion",
    "configuration",
    "configurationItemCaptureTime",
    "configurationItemStatus",
    "loggedInURL",
    "loginURL",
    "private",
    "resourceId",
    "resourceName",
    "resourceType",
    "state",
    "subnetId",
    "supplementaryConfiguration",
    "tags",
    "title",
    "vpcId",
];

/// Nested documents the store cannot carry; stringified in place.
const STRINGIFIED_KEYS: [&str; 4] = ["configuration", "supplementaryConfiguration", "tags", "state"];

/// A resource ready for the graph store and search index.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResource {
    pub id: String,
    pub label: String,
    pub md5_hash: Option<String>,
    pub properties: JsonMap<String, JsonValue>,
}

impl StoredResource {
    pub fn to_input(&self) -> JsonValue {
        json!({
            "id": self.id,
            "label": self.label,
            "md5Hash": self.md5_hash,
            "properties": JsonValue::Object(self.properties.clone()),
        })
    }
}

/// A partial mutation: only the property keys whose values differ from the
/// stored copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUpdate {
    pub id: String,
    pub md5_hash: Option<String>,
    pub properties: JsonMap<String, JsonValue>,
}

impl ResourceUpdate {
    pub fn to_input(&self) -> JsonValue {
        json!({
            "id": self.id,
            "md5Hash": self.md5_hash,
            "properties": JsonValue::Object(self.properties.clone()),
        })
    }
}

/// Projects a working-set resource through the save transformation.
pub fn project(resource: &Resource) -> StoredResource {
    let mut map = JsonMap::new();
    insert_string(&mut map, "accountId", Some(&resource.account_id));
    insert_string(&mut map, "arn", Some(&resource.id));
    insert_string(
        &mut map,
        "availabilityZone",
        resource.availability_zone.as_deref(),
    );
    insert_string(&mut map, "awsRegion", Some(&resource.region));
    if !resource.configuration.is_null() {
        map.insert("configuration".to_string(), resource.configuration.clone());
    }
    insert_string(
        &mut map,
        "configurationItemCaptureTime",
        resource.configuration_item_capture_time.as_deref(),
    );
    insert_string(
        &mut map,
        "configurationItemStatus",
        resource.configuration_item_status.as_deref(),
    );
    insert_string(&mut map, "resourceId", Some(&resource.resource_id));
    insert_string(&mut map, "resourceName", resource.resource_name.as_deref());
    insert_string(&mut map, "resourceType", Some(&resource.resource_type));
    if !resource.supplementary_configuration.is_null() {
        map.insert(
            "supplementaryConfiguration".to_string(),
            resource.supplementary_configuration.clone(),
        );
    }
    if !resource.tags.is_empty() {
        map.insert(
            "tags".to_string(),
            serde_json::to_value(&resource.tags).unwrap_or(JsonValue::Null),
        );
    }
    insert_string(&mut map, "vpcId", resource.vpc_id.as_deref());
    insert_string(&mut map, "subnetId", resource.subnet_id.as_deref());
    if let Some(private) = resource.private {
        map.insert("private".to_string(), JsonValue::Bool(private));
    }
    if let Some(state) = resource
        .configuration
        .get("state")
        .or_else(|| resource.configuration.get("State"))
    {
        if !state.is_null() {
            map.insert("state".to_string(), state.clone());
        }
    }

    let properties = project_map(map);
    let md5_hash = domain::uses_md5_change_detection(&resource.resource_type)
        .then(|| md5_of_properties(&properties));

    StoredResource {
        id: resource.id.clone(),
        label: type_label(&resource.resource_type),
        md5_hash,
        properties,
    }
}

/// The deterministic core of the save transformation. Idempotent:
/// `project_map(project_map(m)) == project_map(m)`.
pub fn project_map(mut map: JsonMap<String, JsonValue>) -> JsonMap<String, JsonValue> {
    map.retain(|key, value| PROJECTED_KEYS.contains(&key.as_str()) && !value.is_null());

    for key in STRINGIFIED_KEYS {
        if let Some(value) = map.get(key) {
            if !value.is_string() {
                let stringified = serde_json::to_string(value).unwrap_or_default();
                map.insert(key.to_string(), JsonValue::String(stringified));
            }
        }
    }

    let title = derive_title(&map);
    map.insert("title".to_string(), JsonValue::String(title));

    let resource_type = string_of(&map, "resourceType").unwrap_or_default();
    let region = string_of(&map, "awsRegion").unwrap_or_default();
    let account_id = string_of(&map, "accountId").unwrap_or_default();
    let resource_id = string_of(&map, "resourceId").unwrap_or_default();
    let resource_name = string_of(&map, "resourceName");
    let (login_url, logged_in_url) = console_urls(
        &resource_type,
        &region,
        &account_id,
        &resource_id,
        resource_name.as_deref(),
    );
    map.insert("loginURL".to_string(), JsonValue::String(login_url));
    map.insert("loggedInURL".to_string(), JsonValue::String(logged_in_url));

    map
}

/// md5 over the key-sorted, stringified property map; the sole
/// change-detection signal for hash-set types.
pub fn md5_of_properties(properties: &JsonMap<String, JsonValue>) -> String {
    let rendered = serde_json::to_string(properties).unwrap_or_default();
    format!("{:x}", md5::compute(rendered.as_bytes()))
}

fn derive_title(map: &JsonMap<String, JsonValue>) -> String {
    if let Some(name) = tag_value(map, "Name") {
        return name;
    }

    let resource_type = string_of(map, "resourceType").unwrap_or_default();
    let arn = string_of(map, "arn").unwrap_or_default();
    match resource_type.as_str() {
        domain::types::ELBV2_TARGET_GROUP => {
            if let Some(name) = arn.split('/').nth(1) {
                return name.to_string();
            }
        }
        domain::types::ELBV2_LISTENER => {
            if let Some(suffix) = arn.split(":listener/").nth(1) {
                return suffix.to_string();
            }
        }
        domain::types::AUTOSCALING_GROUP => {
            if let Some(name) = arn.split("autoScalingGroupName/").nth(1) {
                return name.to_string();
            }
        }
        _ => {}
    }

    string_of(map, "resourceName")
        .or_else(|| string_of(map, "resourceId"))
        .unwrap_or_default()
}

fn tag_value(map: &JsonMap<String, JsonValue>, key: &str) -> Option<String> {
    let raw = map.get("tags")?;
    let tags: Vec<Tag> = match raw {
        JsonValue::String(encoded) => serde_json::from_str(encoded).ok()?,
        other => serde_json::from_value(other.clone()).ok()?,
    };
    tags.into_iter()
        .find(|tag| tag.key == key)
        .map(|tag| tag.value)
}

/// Console URL rule table. `loginURL` lands on the account's sign-in portal;
/// `loggedInURL` deep-links the service console for the resource.
fn console_urls(
    resource_type: &str,
    region: &str,
    account_id: &str,
    resource_id: &str,
    resource_name: Option<&str>,
) -> (String, String) {
    let name = resource_name.unwrap_or(resource_id);
    let login = format!("https://{account_id}.signin.aws.amazon.com/console");

    let logged_in = if resource_type.starts_with("AWS::ApiGateway::") {
        format!(
            "https://{region}.console.aws.amazon.com/apigateway/home?region={region}#/apis/{resource_id}"
        )
    } else if resource_type == domain::types::AUTOSCALING_GROUP {
        format!(
            "https://{region}.console.aws.amazon.com/ec2autoscaling/home?region={region}#/details/{name}"
        )
    } else if resource_type == domain::types::LAMBDA_FUNCTION {
        format!(
            "https://{region}.console.aws.amazon.com/lambda/home?region={region}#/functions/{name}"
        )
    } else if resource_type.starts_with("AWS::IAM::") {
        format!("https://console.aws.amazon.com/iam/home#/{resource_id}")
    } else if resource_type == domain::types::S3_BUCKET {
        format!("https://s3.console.aws.amazon.com/s3/buckets/{name}")
    } else {
        format!(
            "https://{region}.console.aws.amazon.com/ec2/home?region={region}#search={resource_id}"
        )
    };

    (login, logged_in)
}

fn string_of(map: &JsonMap<String, JsonValue>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(JsonValue::as_str)
        .map(str::to_string)
}

fn insert_string(map: &mut JsonMap<String, JsonValue>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        map.insert(key.to_string(), JsonValue::String(value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types;

    fn sample_resource() -> Resource {
        Resource::new(
            "arn:aws:lambda:eu-west-1:111111111111:function:ingest",
            types::LAMBDA_FUNCTION,
            "111111111111",
            "eu-west-1",
        )
        .with_resource_name("ingest")
        .with_configuration(json!({ "memorySize": 512, "state": { "value": "Active" } }))
        .with_tag("team", "data")
    }

    #[test]
    fn projection_is_idempotent() {
        let projected = project(&sample_resource());
        let again = project_map(projected.properties.clone());
        assert_eq!(projected.properties, again);
    }

    #[test]
    fn nested_documents_are_stringified() {
        let projected = project(&sample_resource());
        assert!(projected.properties.get("configuration").unwrap().is_string());
        assert!(projected.properties.get("tags").unwrap().is_string());
        assert!(projected.properties.get("state").unwrap().is_string());
    }

    #[test]
    fn md5_only_for_hash_set_types() {
        assert!(project(&sample_resource()).md5_hash.is_none());

        let task = Resource::new(
            "arn:aws:ecs:eu-west-1:111111111111:task/cluster/abc",
            types::ECS_TASK,
            "111111111111",
            "eu-west-1",
        );
        assert!(project(&task).md5_hash.is_some());
    }

    #[test]
    fn md5_is_stable_across_projections() {
        let task = Resource::new(
            "arn:aws:ecs:eu-west-1:111111111111:task/cluster/abc",
            types::ECS_TASK,
            "111111111111",
            "eu-west-1",
        );
        assert_eq!(project(&task).md5_hash, project(&task).md5_hash);
    }

    #[test]
    fn title_prefers_name_tag() {
        let resource = sample_resource().with_tag("Name", "ingest-function");
        let projected = project(&resource);
        assert_eq!(projected.properties.get("title"), Some(&json!("ingest-function")));
    }

    #[test]
    fn target_group_title_extracted_from_arn() {
        let resource = Resource::new(
            "arn:aws:elasticloadbalancing:eu-west-1:111111111111:targetgroup/web-tg/73e2d6bc24d8a067",
            types::ELBV2_TARGET_GROUP,
            "111111111111",
            "eu-west-1",
        );
        let projected = project(&resource);
        assert_eq!(projected.properties.get("title"), Some(&json!("web-tg")));
    }

    #[test]
    fn autoscaling_title_extracted_from_arn() {
        let resource = Resource::new(
            "arn:aws:autoscaling:eu-west-1:111111111111:autoScalingGroup:uuid:autoScalingGroupName/web-asg",
            types::AUTOSCALING_GROUP,
            "111111111111",
            "eu-west-1",
        );
        let projected = project(&resource);
        assert_eq!(projected.properties.get("title"), Some(&json!("web-asg")));
    }
}
