// Persisted forms must rebuild structurally equal values
mod common;

use common::{field, foo_model, id_index, timeline, twitter_model};
use nose_core::statement::{Condition, Statement};
use nose_core::{AdvisorConfig, Index, Insert, KeyPath, Model, Operator, Query, QueryPlanner, Search, Workload};
use std::collections::BTreeSet;

#[test]
fn test_index_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let model = twitter_model();
    let path = KeyPath::through(&model, "User", &["Tweets"])?;
    let index = Index::new(
        [field(&model, "User.City")],
        [field(&model, "Tweet.Timestamp"), field(&model, "User.Id"), field(&model, "Tweet.Id")],
        [field(&model, "Tweet.Body")],
        path,
    )?;

    let json = serde_json::to_string(&index)?;
    let restored: Index = serde_json::from_str(&json)?;
    assert_eq!(restored, index);
    assert_eq!(restored.key(), index.key());
    assert_eq!(restored.size(), index.size());
    Ok(())
}

#[test]
fn test_invalid_index_rejected_on_load() -> Result<(), Box<dyn std::error::Error>> {
    let model = foo_model();
    let index = id_index(&model, "Foo", &["Bar"]);
    let mut value = serde_json::to_value(&index)?;
    value["hash_fields"] = serde_json::json!([]);
    assert!(serde_json::from_value::<Index>(value).is_err());
    Ok(())
}

#[test]
fn test_index_with_empty_path_rejected_on_load() -> Result<(), Box<dyn std::error::Error>> {
    let model = foo_model();
    let mut value = serde_json::to_value(id_index(&model, "Foo", &["Bar"]))?;
    value["path"] = serde_json::json!({ "hops": [] });
    assert!(serde_json::from_value::<Index>(value).is_err());
    Ok(())
}

#[test]
fn test_invalid_query_rejected_on_load() -> Result<(), Box<dyn std::error::Error>> {
    let model = twitter_model();
    let query = timeline(&model);
    let value = serde_json::to_value(&query)?;
    assert_eq!(serde_json::from_value::<Query>(value.clone())?, query);

    // The timeline already ranges over Tweet.Timestamp
    let mut two_ranges = value.clone();
    let second = serde_json::to_value(Condition::new(field(&model, "Tweet.Id"), Operator::Lt))?;
    two_ranges["conditions"].as_array_mut().ok_or("conditions not an array")?.push(second);
    assert!(serde_json::from_value::<Query>(two_ranges).is_err());

    let mut empty = value;
    empty["select"] = serde_json::json!([]);
    assert!(serde_json::from_value::<Query>(empty.clone()).is_err());

    empty["type"] = serde_json::json!("query");
    assert!(serde_json::from_value::<Statement>(empty).is_err());
    Ok(())
}

#[test]
fn test_model_rejects_dangling_key_on_load() -> Result<(), Box<dyn std::error::Error>> {
    let model = twitter_model();
    let value = serde_json::to_value(&model)?;
    assert_eq!(serde_json::from_value::<Model>(value.clone())?, model);

    let mut dangling = value;
    dangling["entities"].as_object_mut().ok_or("entities not a map")?.remove("Tweet");
    assert!(serde_json::from_value::<Model>(dangling).is_err());
    Ok(())
}

#[test]
fn test_plan_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let model = foo_model();
    let index = id_index(&model, "Foo", &["Bar"]);
    let query = Query::builder(&model, "sorted", "Foo").select("Foo.Bar").order_by("Foo.Bar").limit(5).build()?;
    let plan = QueryPlanner::new([&index]).find_plans_for_query(&query)?.plans().remove(0);

    let json = serde_json::to_string_pretty(&plan)?;
    let restored: nose_core::Plan = serde_json::from_str(&json)?;
    assert_eq!(restored, plan);
    Ok(())
}

#[test]
fn test_statement_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let model = twitter_model();
    let statements: Vec<Statement> = vec![
        timeline(&model).into(),
        Insert::new(&model, "post", "Tweet", &["Id", "Body"], &["User"])?.into(),
    ];

    for statement in statements {
        let json = serde_json::to_string(&statement)?;
        let restored: Statement = serde_json::from_str(&json)?;
        assert_eq!(restored, statement);
    }
    Ok(())
}

#[test]
fn test_search_result_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let model = foo_model();
    let query = Query::builder(&model, "by_id", "Foo").select("Foo.Bar").eq("Foo.Id").build()?;
    let workload = Workload::new(model.clone()).with_statement(query, 1.0)?;
    let schema: BTreeSet<Index> = [id_index(&model, "Foo", &["Bar"])].into_iter().collect();

    let result = Search::new(&workload, &AdvisorConfig::default())?.evaluate_schema(&schema)?;
    let json = serde_json::to_string(&result)?;
    let restored: nose_core::SearchResult = serde_json::from_str(&json)?;
    assert_eq!(restored, result);
    Ok(())
}
