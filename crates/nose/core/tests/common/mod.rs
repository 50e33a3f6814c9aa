// Shared fixtures for the integration tests
#![allow(dead_code)]

use nose_core::{Entity, Field, Index, KeyPath, Model, Query, Relationship};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).try_init();
}

/// `Foo` with 100 rows, an `Id` and a `Bar` of cardinality 10
pub fn foo_model() -> Model {
    Model::new([Entity::new("Foo", 100).with_id("Id", 8).with_field("Bar", 10, Some(10))]).unwrap()
}

pub fn twitter_model() -> Model {
    Model::new([
        Entity::new("User", 1000)
            .with_id("Id", 8)
            .with_field("Username", 20, None)
            .with_field("City", 20, Some(50))
            .with_foreign_key("Tweets", "Tweet", Relationship::Many),
        Entity::new("Tweet", 20000)
            .with_id("Id", 8)
            .with_field("Body", 140, None)
            .with_field("Timestamp", 8, None)
            .with_foreign_key("User", "User", Relationship::One),
    ])
    .unwrap()
}

pub fn field(model: &Model, id: &str) -> Field {
    model.field(id).unwrap().clone()
}

/// Identity-keyed index on `entity` carrying `extra`
pub fn id_index(model: &Model, entity: &str, extra: &[&str]) -> Index {
    let entity = model.entity(entity).unwrap();
    let extra: Vec<Field> = extra.iter().map(|name| entity.field(name).unwrap().clone()).collect();
    Index::new(entity.id_fields(), Vec::new(), extra, KeyPath::single(entity)).unwrap()
}

pub fn timeline(model: &Model) -> Query {
    Query::builder(model, "timeline", "Tweet")
        .join("User")
        .select("Tweet.Body")
        .eq("User.City")
        .range("Tweet.Timestamp", nose_core::Operator::Gt)
        .order_by("Tweet.Timestamp")
        .limit(10)
        .build()
        .unwrap()
}
