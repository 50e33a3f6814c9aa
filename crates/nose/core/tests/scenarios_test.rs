// End-to-end planning scenarios over small models
mod common;

use common::{field, foo_model, id_index, init_tracing, timeline, twitter_model};
use nose_core::query::planner::{PlanStep, StepKind};
use nose_core::{AdvisorConfig, AdvisorError, Index, Insert, Query, QueryPlanner, Search, SearchError, UpdatePlanner, Workload, advise};
use std::collections::BTreeSet;

fn kinds(steps: &[PlanStep]) -> Vec<StepKind> {
    steps.iter().map(PlanStep::kind).collect()
}

#[test]
fn test_simple_lookup_by_identity() {
    init_tracing();
    let model = foo_model();
    let index = id_index(&model, "Foo", &["Bar"]);
    let query = Query::builder(&model, "by_id", "Foo").select("Foo.Bar").eq("Foo.Id").build().unwrap();

    let tree = QueryPlanner::new([&index]).find_plans_for_query(&query).unwrap();
    let plans = tree.plans();
    assert_eq!(plans.len(), 1);
    assert_eq!(kinds(plans[0].steps()), vec![StepKind::IndexLookup]);
    assert_eq!(plans[0].cardinality(), 1.0);
}

#[test]
fn test_unordered_index_forces_sort() {
    init_tracing();
    let model = foo_model();
    let index = id_index(&model, "Foo", &["Bar"]);
    let query = Query::builder(&model, "sorted", "Foo").select("Foo.Bar").order_by("Foo.Bar").build().unwrap();

    let tree = QueryPlanner::new([&index]).find_plans_for_query(&query).unwrap();
    let plans = tree.plans();
    assert_eq!(plans.len(), 1);
    assert_eq!(kinds(plans[0].steps()), vec![StepKind::IndexLookup, StepKind::Sort]);
    assert!(plans[0].steps()[0].fields().contains(&field(&model, "Foo.Bar")));
}

#[test]
fn test_zero_budget_has_no_solution() {
    init_tracing();
    let model = foo_model();
    let first = Query::builder(&model, "first", "Foo").select("Foo.Bar").eq("Foo.Id").build().unwrap();
    let second = Query::builder(&model, "second", "Foo").select("Foo.Id").eq("Foo.Id").build().unwrap();
    let workload = Workload::new(model).with_statement(first, 1.0).unwrap().with_statement(second, 1.0).unwrap();

    let config = AdvisorConfig {
        max_space: Some(0),
        ..AdvisorConfig::default()
    };
    match advise(&workload, &config) {
        Err(AdvisorError::Search(SearchError::NoSolution)) => {}
        other => panic!("expected no solution, got {other:?}"),
    }
}

#[test]
fn test_insert_only_update_plan() {
    init_tracing();
    let model = foo_model();
    let index = id_index(&model, "Foo", &["Bar"]);
    let insert = Insert::new(&model, "add", "Foo", &["Id", "Bar"], &[]).unwrap();

    let planner = UpdatePlanner::new(&model, [&index]);
    let plans = planner.find_plans_for_update(&insert, [&index]).unwrap();
    assert_eq!(plans.len(), 1);

    let steps: Vec<PlanStep> = plans[0].steps().cloned().collect();
    assert_eq!(steps.last().map(PlanStep::kind), Some(StepKind::Insert));
    assert!(steps.iter().all(|step| step.kind() != StepKind::Delete));
}

#[test]
fn test_advise_twitter_workload() {
    init_tracing();
    let model = twitter_model();
    let query = timeline(&model);
    let insert = Insert::new(&model, "post", "Tweet", &["Id", "Body", "Timestamp"], &["User"]).unwrap();
    let workload = Workload::new(model).with_statement(query, 10.0).unwrap().with_statement(insert, 1.0).unwrap();

    let result = advise(&workload, &AdvisorConfig::default()).unwrap();
    let plan = result.plan("timeline").unwrap();
    assert!(plan.last_step().and_then(PlanStep::state).is_some_and(|state| state.answered(true)));
    for index in plan.indexes() {
        assert!(result.indexes.contains(index));
    }
    for update in result.update_plans_for("post") {
        assert!(result.indexes.contains(update.index()));
        assert_eq!(update.update_steps().last().map(PlanStep::kind), Some(StepKind::Insert));
    }
    assert!(result.total_cost > 0.0);
}

#[test]
fn test_insert_maintains_view_keyed_by_neighbour_identity() {
    init_tracing();
    let model = twitter_model();
    let user_tweets = Query::builder(&model, "user_tweets", "User")
        .join("Tweets")
        .select("Tweet.Body")
        .eq("User.Id")
        .build()
        .unwrap();
    let view = user_tweets.materialize_view().unwrap();
    let post = Insert::new(&model, "post", "Tweet", &["Id", "Body", "Timestamp"], &["User"]).unwrap();

    // The connection already names the user, so nothing has to be read
    let update_planner = UpdatePlanner::new(&model, [&view]);
    assert!(update_planner.support_trees(&post, &view).unwrap().is_empty());

    let workload = Workload::new(model).with_statement(user_tweets, 1.0).unwrap().with_statement(post, 1.0).unwrap();
    let schema: BTreeSet<Index> = [view.clone()].into_iter().collect();
    let search = Search::new(&workload, &AdvisorConfig::default()).unwrap();

    let result = search.search(&schema).unwrap();
    assert!(result.indexes.contains(&view));
    let updates: Vec<_> = result.update_plans_for("post").collect();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].query_plans().is_empty());
    assert_eq!(kinds(updates[0].update_steps()), vec![StepKind::Insert]);

    let evaluated = search.evaluate_schema(&schema).unwrap();
    assert_eq!(evaluated.update_plans_for("post").count(), 1);
}
