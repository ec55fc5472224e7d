use jaq_interpret::{Ctx as JaqCtx, FilterT, ParseCtx as JaqParseCtx, RcIter as JaqRcIter, Val as JaqVal};
use serde_json::Value as JsonValue;
use tracing::debug;

/// Evaluates a jq-style path expression against a JSON document and returns
/// every non-null result, with arrays (nested included) flattened. Schema
/// descriptors use this for their `path` and `rootPath` expressions.
pub fn eval_path(document: &JsonValue, expression: &str) -> Vec<JsonValue> {
    let (parsed, parse_errors) = jaq_parse::parse(expression, jaq_parse::main());
    if !parse_errors.is_empty() {
        debug!(expression, "path expression failed to parse");
        return Vec::new();
    }
    let Some(main) = parsed else {
        return Vec::new();
    };

    let mut ctx = JaqParseCtx::new(Vec::new());
    let filter = ctx.compile(main);
    if !ctx.errs.is_empty() {
        debug!(expression, "path expression failed to compile");
        return Vec::new();
    }

    let inputs = JaqRcIter::new(std::iter::empty::<Result<JaqVal, String>>());
    let input = JaqVal::from(document.clone());
    let mut results = Vec::new();
    for outcome in filter.run((JaqCtx::new([], &inputs), input)) {
        match outcome {
            Ok(value) => flatten_into(JsonValue::from(value), &mut results),
            Err(err) => {
                debug!(expression, error = %err.to_string(), "path expression runtime error");
            }
        }
    }
    results
}

/// Convenience for expressions expected to yield strings.
pub fn eval_path_strings(document: &JsonValue, expression: &str) -> Vec<String> {
    eval_path(document, expression)
        .into_iter()
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect()
}

fn flatten_into(value: JsonValue, out: &mut Vec<JsonValue>) {
    match value {
        JsonValue::Null => {}
        JsonValue::Array(entries) => {
            for entry in entries {
                flatten_into(entry, out);
            }
        }
        other => out.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_arrays_are_flattened_and_nulls_dropped() {
        let document = json!({
            "vpcConfig": {
                "subnetIds": [["subnet-1", "subnet-2"], "subnet-3", null],
            }
        });
        let results = eval_path_strings(&document, ".vpcConfig.subnetIds");
        assert_eq!(results, vec!["subnet-1", "subnet-2", "subnet-3"]);
    }

    #[test]
    fn missing_paths_yield_nothing() {
        assert!(eval_path(&json!({}), ".does.not.exist?").is_empty());
    }

    #[test]
    fn object_value_iteration() {
        let document = json!({ "lambdaConfig": { "preSignUp": "arn:1", "postConfirmation": "arn:2" } });
        let mut results = eval_path_strings(&document, ".lambdaConfig[]?");
        results.sort();
        assert_eq!(results, vec!["arn:1", "arn:2"]);
    }
}
