use crate::domain::{rels, types, RelationshipDescriptor};
use crate::inference::lookup::LookupTables;

/// Resolves environment-variable values to relationship descriptors.
///
/// A value that is an exact ARN in the working set links directly; anything
/// else is tried as a resource id, then a resource name, then an endpoint.
/// Two suppressions apply: a variable can never link a resource to itself,
/// and a value that resolves to the account's public-access-block singleton
/// is discarded, because such variables are account ids, not references.
pub fn infer_env_var_relationships<'a>(
    owner_id: &str,
    account_id: &str,
    region: &str,
    values: impl Iterator<Item = &'a str>,
    lookups: &LookupTables,
) -> Vec<RelationshipDescriptor> {
    let mut inferred = Vec::new();
    for value in values {
        let resolved = if value.starts_with("arn:") {
            lookups.contains_id(value).then(|| value.to_string())
        } else {
            lookups
                .lookup_env_identifier(value, account_id, region)
                .or_else(|| lookups.lookup_endpoint(value))
                .cloned()
        };

        let Some(target) = resolved else {
            continue;
        };
        if target == owner_id {
            continue;
        }
        if lookups.type_of(&target) == Some(types::S3_ACCOUNT_PUBLIC_ACCESS_BLOCK)
            && lookups.resource_id_of(&target) == Some(account_id)
        {
            continue;
        }
        inferred.push(RelationshipDescriptor::arn(rels::ASSOCIATED_WITH, target));
    }
    inferred
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Resource, ResourceSet};
    use serde_json::json;

    fn lookups_with(resources: Vec<Resource>) -> LookupTables {
        LookupTables::build(&resources.into_iter().collect::<ResourceSet>())
    }

    #[test]
    fn exact_arn_values_link_directly() {
        let lookups = lookups_with(vec![Resource::new(
            "arn:aws:rds:eu-west-1:111:db:mydb",
            types::RDS_DB_INSTANCE,
            "111",
            "eu-west-1",
        )]);
        let inferred = infer_env_var_relationships(
            "arn:aws:lambda:eu-west-1:111:function:f1",
            "111",
            "eu-west-1",
            ["arn:aws:rds:eu-west-1:111:db:mydb"].into_iter(),
            &lookups,
        );
        assert_eq!(inferred.len(), 1);
        assert_eq!(inferred[0].identifier_value, "arn:aws:rds:eu-west-1:111:db:mydb");
    }

    #[test]
    fn account_id_values_matching_public_access_block_are_suppressed() {
        let mut singleton = Resource::new(
            "arn:aws:s3:::111-access-block",
            types::S3_ACCOUNT_PUBLIC_ACCESS_BLOCK,
            "111",
            "eu-west-1",
        );
        singleton.resource_id = "111".to_string();
        let lookups = lookups_with(vec![singleton]);

        let inferred = infer_env_var_relationships(
            "arn:aws:lambda:eu-west-1:111:function:f1",
            "111",
            "eu-west-1",
            ["111"].into_iter(),
            &lookups,
        );
        assert!(inferred.is_empty());
    }

    #[test]
    fn self_references_are_suppressed() {
        let owner = Resource::new(
            "arn:aws:lambda:eu-west-1:111:function:f1",
            types::LAMBDA_FUNCTION,
            "111",
            "eu-west-1",
        )
        .with_resource_name("f1")
        .with_configuration(json!({}));
        let lookups = lookups_with(vec![owner]);

        let inferred = infer_env_var_relationships(
            "arn:aws:lambda:eu-west-1:111:function:f1",
            "111",
            "eu-west-1",
            ["f1"].into_iter(),
            &lookups,
        );
        assert!(inferred.is_empty());
    }

    #[test]
    fn unresolvable_values_yield_nothing() {
        let lookups = lookups_with(vec![]);
        let inferred = infer_env_var_relationships(
            "arn:f1",
            "111",
            "eu-west-1",
            ["https://nowhere.example.com", "arn:aws:not:in:set"].into_iter(),
            &lookups,
        );
        assert!(inferred.is_empty());
    }
}
