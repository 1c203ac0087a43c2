mod common;

use bson::{Bson, doc};
use docmapper::prelude::*;

use common::{Call, mapper, people};

#[tokio::test]
async fn id_list_count_reads_the_owner_without_a_round_trip() {
    let mapper = mapper();
    let mut john = people(&mapper).await.remove(0);

    let mut tags = Vec::new();
    for label in ["ruby", "rust", "mongo"] {
        tags.push(mapper.create("Tag", [("label", label)]).await.unwrap());
    }

    {
        let mut proxy = mapper.many(&mut john, "tags").unwrap();
        proxy.extend(tags.clone()).await.unwrap();
    }
    assert!(john.attribute_changed("tag_ids"));
    assert!(mapper.save(&mut john).await.unwrap());

    mapper.backend().reset();

    let mut proxy = mapper.many(&mut john, "tags").unwrap();
    assert_eq!(proxy.kind(), ProxyKind::HasManyInArray);
    assert_eq!(proxy.count().await.unwrap(), 3);
    assert!(mapper.backend().calls().is_empty());

    let labels = proxy
        .all()
        .await
        .unwrap()
        .iter()
        .map(|tag| tag.read("label").unwrap())
        .collect::<Vec<_>>();
    assert_eq!(labels, vec![Value::from("ruby"), Value::from("rust"), Value::from("mongo")]);
    assert_eq!(mapper.backend().finds().len(), 1);
    assert_eq!(mapper.backend().counts(), 0);
}

#[tokio::test]
async fn id_list_membership_is_removed_without_touching_targets() {
    let mapper = mapper();
    let mut john = people(&mapper).await.remove(0);
    let mut ruby = mapper.create("Tag", [("label", "ruby")]).await.unwrap();

    {
        let mut tags = mapper.many(&mut john, "tags").unwrap();
        tags.push(ruby.clone()).await.unwrap();
        tags.remove(&mut ruby).await.unwrap();
        assert!(tags.ids().is_empty());
    }

    assert_eq!(mapper.query("Tag").unwrap().count().await.unwrap(), 1);
}

#[tokio::test]
async fn foreign_id_lists_update_the_target_side() {
    let mapper = mapper();
    let everyone = people(&mapper).await;
    let mut rust = mapper.create("Tag", [("label", "rust")]).await.unwrap();
    let rust_id = rust.id().unwrap();

    {
        let mut people = mapper.many(&mut rust, "people").unwrap();
        assert_eq!(people.kind(), ProxyKind::HasManyInForeignArray);
        people.push(everyone[1].clone()).await.unwrap();
        people.push(everyone[2].clone()).await.unwrap();
    }

    let mut people = mapper.many(&mut rust, "people").unwrap();
    assert_eq!(people.count().await.unwrap(), 2);

    let mut steve = mapper
        .query("Person")
        .unwrap()
        .get(everyone[1].id().unwrap())
        .await
        .unwrap();
    assert_eq!(
        steve.read("tag_ids").unwrap(),
        Value::Array(vec![Value::ObjectId(rust_id)])
    );

    people.remove(&mut steve).await.unwrap();
    assert_eq!(people.count().await.unwrap(), 1);
}

#[tokio::test]
async fn destroying_nullifies_dependents() {
    let mapper = mapper();
    let mut john = people(&mapper).await.remove(0);

    {
        let mut comments = mapper.many(&mut john, "comments").unwrap();
        comments.create([("body", "first")]).await.unwrap();
        comments.create([("body", "second")]).await.unwrap();
        assert_eq!(comments.count().await.unwrap(), 2);
    }

    mapper.backend().reset();
    assert!(mapper.destroy(&mut john).await.unwrap());
    assert!(john.is_destroyed());

    let updates = mapper.backend().updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, "comments");
    assert_eq!(updates[0].1, doc! { "person_id": john.id_bson() });
    assert_eq!(updates[0].2, doc! { "$unset": { "person_id": "" } });

    let orphans = mapper
        .query("Comment")
        .unwrap()
        .field_exists("person_id", false)
        .count()
        .await
        .unwrap();
    assert_eq!(orphans, 2);
    assert_eq!(mapper.query("Person").unwrap().count().await.unwrap(), 3);
}

#[tokio::test]
async fn replacing_members_nullifies_the_ones_left_out() {
    let mapper = mapper();
    let mut john = people(&mapper).await.remove(0);

    let (first, second) = {
        let mut comments = mapper.many(&mut john, "comments").unwrap();
        let first = comments.create([("body", "first")]).await.unwrap();
        let second = comments.create([("body", "second")]).await.unwrap();
        (first, second)
    };

    {
        let mut comments = mapper.many(&mut john, "comments").unwrap();
        comments.replace(vec![second.clone()]).await.unwrap();
        assert_eq!(comments.len().await.unwrap(), 1);
    }

    let first = mapper.query("Comment").unwrap().get(first.id().unwrap()).await.unwrap();
    assert_eq!(first.read("person_id").unwrap(), Value::Nil);

    let mut comments = mapper.many(&mut john, "comments").unwrap();
    comments.reset();
    assert_eq!(comments.count().await.unwrap(), 1);
    assert_eq!(
        comments.get(0).await.unwrap().unwrap().read("body").unwrap(),
        Value::from("second")
    );
}

#[tokio::test]
async fn bulk_member_operations() {
    let mapper = mapper();
    let mut john = people(&mapper).await.remove(0);

    let mut comments = mapper.many(&mut john, "comments").unwrap();
    for body in ["a", "b", "c"] {
        comments.create([("body", body)]).await.unwrap();
    }

    assert_eq!(comments.nullify().await.unwrap(), 3);
    assert_eq!(comments.count().await.unwrap(), 0);
    assert!(comments.is_empty().await.unwrap());

    comments.create([("body", "d")]).await.unwrap();
    comments.create([("body", "e")]).await.unwrap();
    assert_eq!(comments.destroy_all().await.unwrap(), 2);

    comments.create([("body", "f")]).await.unwrap();
    assert_eq!(comments.delete_all().await.unwrap(), 1);

    // Three nullified comments are left behind.
    assert_eq!(mapper.query("Comment").unwrap().count().await.unwrap(), 3);
}

#[tokio::test]
async fn unset_polymorphic_belongs_to_is_nil_without_a_query() {
    let mapper = mapper();
    let mut person = mapper.build("Person").unwrap();

    {
        let mut subject = mapper.one(&mut person, "subject").unwrap();
        assert_eq!(subject.kind(), ProxyKind::BelongsToPolymorphic);
        assert!(subject.get().await.unwrap().is_none());
        assert!(!subject.is_present().await.unwrap());
    }

    assert!(mapper.backend().calls().is_empty());
}

#[tokio::test]
async fn polymorphic_belongs_to_follows_the_stored_type() {
    let mapper = mapper();
    let mut john = people(&mapper).await.remove(0);
    let rust = mapper.create("Tag", [("label", "rust")]).await.unwrap();

    {
        let mut subject = mapper.one(&mut john, "subject").unwrap();
        subject.replace(Some(rust.clone())).await.unwrap();
    }
    assert_eq!(john.read("subject_type").unwrap(), Value::from("Tag"));
    assert!(mapper.save(&mut john).await.unwrap());

    let mut reloaded = mapper.query("Person").unwrap().get(john.id().unwrap()).await.unwrap();
    mapper.backend().reset();

    let subject = mapper
        .one(&mut reloaded, "subject")
        .unwrap()
        .into_target()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subject.type_name(), "Tag");
    assert_eq!(subject.read("label").unwrap(), Value::from("rust"));

    let finds = mapper.backend().finds();
    assert_eq!(finds.len(), 1);
    assert_eq!(finds[0].0, "tags");
    assert_eq!(finds[0].1.limit, Some(1));
}

#[tokio::test]
async fn belongs_to_loads_once_and_assigns_ids() {
    let mapper = mapper();
    let mut everyone = people(&mapper).await;

    let mut comment = mapper
        .create("Comment", [("body", "hello")])
        .await
        .unwrap();

    {
        let mut author = mapper.one(&mut comment, "person").unwrap();
        author.replace(Some(everyone.remove(1))).await.unwrap();
        assert!(author.is_loaded());
    }
    assert!(comment.attribute_changed("person_id"));
    mapper.save(&mut comment).await.unwrap();
    mapper.backend().reset();

    let mut author = mapper.one(&mut comment, "person").unwrap();
    assert_eq!(
        author.get().await.unwrap().unwrap().read("name").unwrap(),
        Value::from("Steve")
    );
    author.get().await.unwrap();
    assert_eq!(mapper.backend().finds().len(), 1);

    author.reset();
    author.clear().await.unwrap();
    assert!(author.get().await.unwrap().is_none());
    assert_eq!(author.owner().read("person_id").unwrap(), Value::Nil);
}

#[tokio::test]
async fn has_one_replacement_applies_the_dependent_policy() {
    let mapper = mapper();
    let mut john = people(&mapper).await.remove(0);

    {
        let mut profile = mapper.one(&mut john, "profile").unwrap();
        assert_eq!(profile.kind(), ProxyKind::HasOne);
        profile.create([("bio", "old")]).await.unwrap();
        profile.create([("bio", "new")]).await.unwrap();
    }

    let profiles = mapper.query("Profile").unwrap().all().await.unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].read("bio").unwrap(), Value::from("new"));
    assert_eq!(profiles[0].read("person_id").unwrap(), Value::ObjectId(john.id().unwrap()));

    assert!(mapper.destroy(&mut john).await.unwrap());
    assert_eq!(mapper.query("Profile").unwrap().count().await.unwrap(), 0);
}

#[tokio::test]
async fn embedded_members_live_in_the_owner_document() {
    let mapper = mapper();
    let mut person = mapper.build("Person").unwrap();
    person.write("name", "John").unwrap();

    {
        let mut addresses = mapper.many(&mut person, "addresses").unwrap();
        assert_eq!(addresses.kind(), ProxyKind::HasManyEmbedded);
        addresses.create([("city", "Paris")]).await.unwrap();
        addresses.build([("city", "Oslo")]).await.unwrap();
        assert_eq!(addresses.count().await.unwrap(), 2);
    }
    assert!(person.is_persisted());
    assert!(mapper.save(&mut person).await.unwrap());

    let inserts = mapper
        .backend()
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::Insert { .. }))
        .count();
    assert_eq!(inserts, 1);

    let mut loaded = mapper.query("Person").unwrap().get(person.id().unwrap()).await.unwrap();
    mapper.backend().reset();

    let mut addresses = mapper.many(&mut loaded, "addresses").unwrap();
    let cities = addresses
        .all()
        .await
        .unwrap()
        .iter()
        .map(|address| address.read("city").unwrap())
        .collect::<Vec<_>>();
    assert_eq!(cities, vec![Value::from("Paris"), Value::from("Oslo")]);
    assert!(mapper.backend().calls().is_empty());

    let mut paris = addresses.get(0).await.unwrap().unwrap().clone();
    let paris_id = paris.id().unwrap();
    for id in [Value::ObjectId(paris_id), Value::from(paris_id.to_hex())] {
        let found = addresses.find(id).await.unwrap().unwrap();
        assert_eq!(found.read("city").unwrap(), Value::from("Paris"));
    }
    assert!(addresses.find(bson::oid::ObjectId::new()).await.unwrap().is_none());

    addresses.remove(&mut paris).await.unwrap();
    assert_eq!(addresses.count().await.unwrap(), 1);
    assert!(matches!(
        addresses.owner().raw_document().get("addresses"),
        Some(Bson::Array(items)) if items.len() == 1
    ));
}

#[tokio::test]
async fn proxies_match_association_arity() {
    let mapper = mapper();
    let mut john = people(&mapper).await.remove(0);

    assert!(matches!(
        mapper.one(&mut john, "comments"),
        Err(MapperError::InvalidOperation(_))
    ));
    assert!(matches!(
        mapper.many(&mut john, "profile"),
        Err(MapperError::InvalidOperation(_))
    ));
    assert!(matches!(
        mapper.many(&mut john, "friends"),
        Err(MapperError::UnknownAssociation { .. })
    ));
}
