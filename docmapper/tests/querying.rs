mod common;

use bson::doc;
use docmapper::{finder::FinderKind, prelude::*};

use common::{mapper, people};

#[tokio::test]
async fn filters_sorts_and_pages_in_the_store() {
    let mapper = mapper();
    people(&mapper).await;

    let found = mapper
        .query("Person")
        .unwrap()
        .gt("age", 27)
        .sort("age", SortDirection::Asc)
        .limit(1)
        .skip(1)
        .all()
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].read("age").unwrap(), Value::Integer(30));

    let finds = mapper.backend().finds();
    assert_eq!(finds.len(), 1);

    let (collection, query) = &finds[0];
    assert_eq!(collection, "persons");
    assert_eq!(query.filter, doc! { "age": { "$gt": 27_i64 } });
    assert_eq!(query.limit, Some(1));
    assert_eq!(query.skip, Some(1));
}

#[tokio::test]
async fn query_values_are_coerced_through_keys() {
    let mapper = mapper();
    people(&mapper).await;

    let steve = mapper
        .query("Person")
        .unwrap()
        .eq("age", "30")
        .first()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(steve.read("name").unwrap(), Value::from("Steve"));
}

#[tokio::test]
async fn first_last_count_and_exists() {
    let mapper = mapper();
    people(&mapper).await;

    let query = mapper.query("Person").unwrap();

    assert_eq!(query.count().await.unwrap(), 4);
    assert!(query.exists().await.unwrap());
    assert_eq!(
        query.first().await.unwrap().unwrap().read("name").unwrap(),
        Value::from("John")
    );
    assert_eq!(
        query.last().await.unwrap().unwrap().read("name").unwrap(),
        Value::from("Amy")
    );

    let oldest = mapper
        .query("Person")
        .unwrap()
        .order("age desc")
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(oldest.read("name").unwrap(), Value::from("Bob"));

    assert!(
        !mapper
            .query("Person")
            .unwrap()
            .eq("name", "Nobody")
            .exists()
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn get_raises_for_missing_documents() {
    let mapper = mapper();
    let everyone = people(&mapper).await;

    let john = mapper
        .query("Person")
        .unwrap()
        .get(everyone[0].id().unwrap())
        .await
        .unwrap();
    assert_eq!(john.read("name").unwrap(), Value::from("John"));

    let err = mapper
        .query("Person")
        .unwrap()
        .get(bson::oid::ObjectId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::DocumentNotFound { ref collection, .. } if collection == "persons"));
}

#[tokio::test]
async fn scopes_compose_with_conditions() {
    let mapper = mapper();
    mapper
        .create("Person", [("name", Value::from("Kid")), ("age", Value::from(9))])
        .await
        .unwrap();
    people(&mapper).await;

    let adults = mapper
        .query("Person")
        .unwrap()
        .scope("adults")
        .unwrap()
        .lt("age", 30)
        .count()
        .await
        .unwrap();
    assert_eq!(adults, 2);

    assert!(matches!(
        mapper.query("Person").unwrap().scope("missing"),
        Err(MapperError::Query(_))
    ));
}

#[tokio::test]
async fn subtype_queries_only_see_their_documents() {
    let mapper = mapper();
    people(&mapper).await;

    let admin = mapper
        .create("Admin", [("name", Value::from("Root")), ("age", Value::from(40))])
        .await
        .unwrap();
    assert_eq!(admin.read("_type").unwrap(), Value::from("Admin"));

    assert_eq!(mapper.query("Person").unwrap().count().await.unwrap(), 5);
    assert_eq!(mapper.query("Admin").unwrap().count().await.unwrap(), 1);

    let loaded = mapper
        .query("Person")
        .unwrap()
        .eq("name", "Root")
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.type_name(), "Admin");
}

#[tokio::test]
async fn paginates_with_totals() {
    let mapper = mapper();
    people(&mapper).await;

    let page = mapper
        .query("Person")
        .unwrap()
        .sort("age", SortDirection::Asc)
        .paginate(PaginationParams::new(2, 3))
        .await
        .unwrap();

    assert_eq!(page.count, 4);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].read("name").unwrap(), Value::from("Bob"));
    assert_eq!(page.previous_page, Some(1));
    assert_eq!(page.next_page, None);
}

#[tokio::test]
async fn bulk_updates_and_deletes() {
    let mapper = mapper();
    people(&mapper).await;

    let updated = mapper
        .query("Person")
        .unwrap()
        .gte("age", 30)
        .update_all([("active", "yes")])
        .await;
    // "yes" is not in the boolean table: lenient keys store null.
    assert_eq!(updated.unwrap(), 2);

    let updated = mapper
        .query("Person")
        .unwrap()
        .gte("age", 30)
        .update_all([("active", "t")])
        .await
        .unwrap();
    assert_eq!(updated, 2);
    assert_eq!(
        mapper.query("Person").unwrap().eq("active", true).count().await.unwrap(),
        2
    );

    assert!(matches!(
        mapper.query("Person").unwrap().update_all([("nickname", "x")]).await,
        Err(MapperError::UndeclaredKey { .. })
    ));

    let removed = mapper
        .query("Person")
        .unwrap()
        .lt("age", 30)
        .delete_all()
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(mapper.query("Person").unwrap().count().await.unwrap(), 2);
}

#[tokio::test]
async fn dynamic_finders() {
    let mapper = mapper();
    people(&mapper).await;

    let steve = mapper
        .find_dynamic("Person", "find_by_name_and_age", vec!["Steve".into(), 30.into()])
        .await
        .unwrap()
        .into_one()
        .unwrap();
    assert_eq!(steve.read("age").unwrap(), Value::Integer(30));

    let inactive = mapper
        .find_dynamic("Person", "find_all_by_active", vec![Value::Nil])
        .await
        .unwrap()
        .into_many();
    assert_eq!(inactive.len(), 4);

    let err = mapper
        .find_dynamic("Person", "find_by_name!", vec!["Nobody".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::DocumentNotFound { .. }));

    let built = mapper
        .find_dynamic("Person", "find_or_initialize_by_name", vec!["Nobody".into()])
        .await
        .unwrap()
        .into_one()
        .unwrap();
    assert!(built.is_new());
    assert_eq!(built.read("name").unwrap(), Value::from("Nobody"));

    let created = mapper
        .find_dynamic("Person", "find_or_create_by_name", vec!["Nobody".into()])
        .await
        .unwrap()
        .into_one()
        .unwrap();
    assert!(created.is_persisted());
    assert_eq!(mapper.query("Person").unwrap().count().await.unwrap(), 5);

    let finder: DynamicFinder = "find_last_by_active".parse().unwrap();
    assert_eq!(finder.kind, FinderKind::Last);

    assert!(matches!(
        mapper.find_dynamic("Person", "where_name", vec![]).await,
        Err(MapperError::Query(_))
    ));
}
