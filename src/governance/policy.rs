//! Read-only policy checks
//!
//! Structural validation of filters and pipelines: the stage deny-list, the
//! recursive forbidden-operator scan (any nesting depth, including `$and`/
//! `$or` arrays and sub-pipelines), and the unselectiveness heuristic feeding
//! the scan guard.

use serde_json::Value;

use super::spec::RejectReason;

/// Pipeline stages that write, or execute server-side code.
pub const DENIED_STAGES: [&str; 5] = ["$out", "$merge", "$function", "$accumulator", "$where"];

/// Operators that execute server-side code, forbidden at any nesting depth.
pub const DENIED_OPERATORS: [&str; 3] = ["$where", "$function", "$accumulator"];

/// Stages whose bodies embed a nested pipeline to recurse into.
const SUB_PIPELINE_STAGES: [&str; 3] = ["$lookup", "$facet", "$unionWith"];

/// Stages that narrow an aggregation enough to escape the scan guard.
const NARROWING_STAGES: [&str; 3] = ["$match", "$limit", "$sample"];

/// Check every stage name against the deny-list, then scan stage bodies for
/// forbidden operators. Sub-pipelines are validated recursively.
pub(super) fn check_pipeline(pipeline: &[Value]) -> Result<(), RejectReason> {
    for (index, stage) in pipeline.iter().enumerate() {
        let stage_doc = match stage.as_object() {
            Some(map) => map,
            None => continue, // shape errors are caught before policy runs
        };
        for (name, body) in stage_doc {
            if DENIED_STAGES.contains(&name.as_str()) {
                return Err(RejectReason::ForbiddenStage {
                    stage: name.clone(),
                });
            }
            if SUB_PIPELINE_STAGES.contains(&name.as_str()) {
                check_sub_pipelines(body)?;
            }
            scan_operators(body, &format!("pipeline[{}].{}", index, name))?;
        }
    }
    Ok(())
}

/// `$lookup`/`$unionWith` carry `pipeline: [...]`; `$facet` maps names to
/// pipelines. Either way, the nested stages get the full check.
fn check_sub_pipelines(body: &Value) -> Result<(), RejectReason> {
    let map = match body.as_object() {
        Some(map) => map,
        None => return Ok(()),
    };
    for value in map.values() {
        if let Some(stages) = value.as_array() {
            if stages.iter().any(|s| s.is_object()) {
                check_pipeline(stages)?;
            }
        }
    }
    Ok(())
}

/// Recursively scan a filter or stage body for forbidden operators. `path`
/// locates the offending key in the rejection message.
pub(super) fn scan_operators(value: &Value, path: &str) -> Result<(), RejectReason> {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if DENIED_OPERATORS.contains(&key.as_str()) {
                    return Err(RejectReason::ForbiddenOperator {
                        operator: key.clone(),
                        path: path.to_string(),
                    });
                }
                scan_operators(nested, &format!("{}.{}", path, key))?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                scan_operators(item, &format!("{}[{}]", path, index))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// A filter is unselective when it constrains nothing.
pub(super) fn filter_is_unselective(filter: Option<&Value>) -> bool {
    match filter {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

/// A pipeline is unselective when no stage narrows the input.
pub(super) fn pipeline_is_unselective(pipeline: &[Value]) -> bool {
    !pipeline.iter().any(|stage| {
        stage
            .as_object()
            .map(|map| map.keys().any(|name| NARROWING_STAGES.contains(&name.as_str())))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn denied_stage_is_caught_at_any_position() {
        for stage in ["$out", "$merge", "$function", "$accumulator", "$where"] {
            let pipeline = vec![
                json!({"$match": {"x": 1}}),
                json!({stage: "somewhere"}),
            ];
            let err = check_pipeline(&pipeline).unwrap_err();
            assert_eq!(err.code(), "FORBIDDEN_STAGE");
        }
    }

    #[test]
    fn denied_stage_inside_lookup_sub_pipeline_is_caught() {
        let pipeline = vec![json!({
            "$lookup": {
                "from": "audit",
                "pipeline": [{"$merge": {"into": "evil"}}],
                "as": "joined"
            }
        })];
        let err = check_pipeline(&pipeline).unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN_STAGE");
    }

    #[test]
    fn denied_stage_inside_facet_branch_is_caught() {
        let pipeline = vec![json!({
            "$facet": {
                "safe": [{"$limit": 5}],
                "unsafe": [{"$out": "evil"}]
            }
        })];
        assert!(check_pipeline(&pipeline).is_err());
    }

    #[test]
    fn where_operator_is_caught_deeply_nested() {
        let filter = json!({
            "$or": [
                {"status": "active"},
                {"$and": [
                    {"age": {"$gt": 5}},
                    {"note": {"$where": "this.a == this.b"}}
                ]}
            ]
        });
        let err = scan_operators(&filter, "filter").unwrap_err();
        match err {
            RejectReason::ForbiddenOperator { operator, path } => {
                assert_eq!(operator, "$where");
                assert!(path.contains("$and"), "path was {}", path);
            }
            other => panic!("unexpected rejection: {:?}", other),
        }
    }

    #[test]
    fn operator_inside_match_stage_body_is_caught() {
        let pipeline = vec![json!({"$match": {"$where": "sleep(10000)"}})];
        let err = check_pipeline(&pipeline).unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN_OPERATOR");
    }

    #[test]
    fn benign_filters_pass_the_scan() {
        let filter = json!({
            "$and": [
                {"city": {"$in": ["lisbon", "berlin"]}},
                {"age": {"$gte": 18, "$lt": 65}}
            ]
        });
        assert!(scan_operators(&filter, "filter").is_ok());
    }

    #[test]
    fn unselectiveness_heuristics() {
        assert!(filter_is_unselective(None));
        assert!(filter_is_unselective(Some(&json!({}))));
        assert!(!filter_is_unselective(Some(&json!({"a": 1}))));

        assert!(pipeline_is_unselective(&[json!({"$group": {"_id": null}})]));
        assert!(!pipeline_is_unselective(&[
            json!({"$match": {"a": 1}}),
            json!({"$group": {"_id": null}})
        ]));
        assert!(!pipeline_is_unselective(&[json!({"$limit": 10})]));
    }
}
