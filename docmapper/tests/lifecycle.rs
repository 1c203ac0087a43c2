use std::sync::Arc;

use chrono::NaiveDate;
use docmapper::{memory::InMemoryStore, prelude::*};
use parking_lot::Mutex;

type Log = Arc<Mutex<Vec<String>>>;

fn logging(registry: &ModelRegistry, log: &Log) {
    let mut builder = ModelType::builder("Account")
        .key(KeyDefinition::new("name", TypeTag::String).required())
        .key(KeyDefinition::new("balance", TypeTag::Integer).default(0))
        .key(KeyDefinition::new("pin", TypeTag::Integer).strict())
        .key(KeyDefinition::new("verified", TypeTag::Boolean))
        .key(KeyDefinition::new("opened", TypeTag::Date))
        .validate(|account, errors| {
            if let Ok(Value::Integer(balance)) = account.read("balance")
                && balance < 0
            {
                errors.add("balance", "must not be negative");
            }
        });

    for event in [
        CallbackEvent::BeforeValidation,
        CallbackEvent::BeforeSave,
        CallbackEvent::BeforeCreate,
        CallbackEvent::BeforeUpdate,
        CallbackEvent::AfterCreate,
        CallbackEvent::AfterUpdate,
        CallbackEvent::AfterSave,
        CallbackEvent::BeforeDestroy,
        CallbackEvent::AfterDestroy,
    ] {
        let log = log.clone();
        builder = builder.on(event, move |account| {
            log.lock().push(event.to_string());

            let name = account.read("name").unwrap_or(Value::Nil);
            match event {
                CallbackEvent::BeforeSave if name == Value::from("frozen") => Flow::Halt,
                CallbackEvent::BeforeDestroy if name == Value::from("keep") => Flow::Halt,
                _ => Flow::Continue,
            }
        });
    }

    registry.define(builder).unwrap();
}

fn setup() -> (DocumentMapper<InMemoryStore>, Log) {
    let log = Log::default();
    let registry = ModelRegistry::new();
    logging(&registry, &log);

    (DocumentMapper::new(InMemoryStore::new(), registry), log)
}

fn drain(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.lock())
}

#[tokio::test]
async fn tracks_changes_against_the_last_save() {
    let (mapper, _) = setup();

    let mut account = Model::with_attributes(
        mapper.model_type("Account").unwrap(),
        [("name", Value::from("John"))],
    )
    .unwrap();
    assert_eq!(account.changed_fields(), vec!["name".to_string()]);
    assert_eq!(account.read("balance").unwrap(), Value::Integer(0));

    assert!(mapper.save(&mut account).await.unwrap());
    assert!(!account.is_changed());

    account.write("balance", "25").unwrap();
    assert_eq!(
        account.changes(),
        vec![("balance".to_string(), Value::Integer(0), Value::Integer(25))]
    );

    // Writing the stored value again is not a change.
    account.write("name", "John").unwrap();
    assert!(!account.attribute_changed("name"));

    assert!(mapper.save(&mut account).await.unwrap());
    assert!(account.changes().is_empty());
}

#[tokio::test]
async fn lenient_and_strict_keys() {
    let (mapper, _) = setup();
    let mut account = mapper.build("Account").unwrap();

    account.write("verified", "T").unwrap();
    assert_eq!(account.read("verified").unwrap(), Value::Boolean(true));
    account.write("verified", "0").unwrap();
    assert_eq!(account.read("verified").unwrap(), Value::Boolean(false));
    account.write("verified", "nope").unwrap();
    assert_eq!(account.read("verified").unwrap(), Value::Nil);

    account.write("opened", "2024-05-01").unwrap();
    assert_eq!(
        account.read("opened").unwrap(),
        Value::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
    );
    account.write("opened", "someday").unwrap();
    assert_eq!(account.read("opened").unwrap(), Value::Nil);

    account.write("balance", Value::Nil).unwrap();
    assert_eq!(account.read("balance").unwrap(), Value::Nil);

    account.write("pin", "1234").unwrap();
    assert_eq!(account.read("pin").unwrap(), Value::Integer(1234));
    assert!(matches!(
        account.write("pin", "abcd"),
        Err(MapperError::Typecast { ref key, .. }) if key == "pin"
    ));
    assert_eq!(account.read("pin").unwrap(), Value::Integer(1234));

    assert!(matches!(
        account.write("nickname", "x"),
        Err(MapperError::UndeclaredKey { .. })
    ));
}

#[tokio::test]
async fn callbacks_run_in_lifecycle_order() {
    let (mapper, log) = setup();

    let mut account = mapper.create("Account", [("name", "John")]).await.unwrap();
    assert_eq!(
        drain(&log),
        [
            "before_validation",
            "before_save",
            "before_create",
            "after_create",
            "after_save"
        ]
    );

    account.write("balance", 10).unwrap();
    assert!(mapper.save(&mut account).await.unwrap());
    assert_eq!(
        drain(&log),
        [
            "before_validation",
            "before_save",
            "before_update",
            "after_update",
            "after_save"
        ]
    );

    assert!(mapper.destroy(&mut account).await.unwrap());
    assert_eq!(drain(&log), ["before_destroy", "after_destroy"]);
    assert!(matches!(
        mapper.save(&mut account).await,
        Err(MapperError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn halting_hooks_abort_the_operation() {
    let (mapper, _) = setup();

    let frozen = mapper.create("Account", [("name", "frozen")]).await.unwrap();
    assert!(frozen.is_new());
    assert_eq!(mapper.query("Account").unwrap().count().await.unwrap(), 0);

    let mut keep = mapper.create("Account", [("name", "keep")]).await.unwrap();
    assert!(!mapper.destroy(&mut keep).await.unwrap());
    assert!(!keep.is_destroyed());
    assert_eq!(mapper.query("Account").unwrap().count().await.unwrap(), 1);

    // Deleting skips hooks.
    mapper.delete(&mut keep).await.unwrap();
    assert!(keep.is_destroyed());
    assert_eq!(mapper.query("Account").unwrap().count().await.unwrap(), 0);
}

#[tokio::test]
async fn validation_blocks_saves() {
    let (mapper, log) = setup();

    let mut account = mapper.build("Account").unwrap();
    account.write("balance", -5).unwrap();

    assert!(!mapper.save(&mut account).await.unwrap());
    assert!(account.is_new());
    assert_eq!(account.errors().on("name"), ["can't be blank"]);
    assert_eq!(account.errors().on("balance"), ["must not be negative"]);
    assert_eq!(drain(&log), ["before_validation"]);

    assert!(
        mapper
            .persist(&mut account, SaveOptions::new().validate(false))
            .await
            .unwrap()
    );
    assert!(account.is_persisted());
    assert_eq!(drain(&log)[0], "before_save");

    let lax = DocumentMapper::builder(InMemoryStore::new())
        .registry(mapper.registry().clone())
        .validate_on_save(false)
        .build();
    let mut blank = lax.build("Account").unwrap();
    assert!(lax.save(&mut blank).await.unwrap());
}

#[tokio::test]
async fn reload_reads_the_stored_document() {
    let (mapper, _) = setup();

    let mut account = mapper.create("Account", [("name", "John")]).await.unwrap();
    mapper
        .query("Account")
        .unwrap()
        .update_all([("balance", 99)])
        .await
        .unwrap();

    account.write("name", "Changed").unwrap();
    mapper.reload(&mut account).await.unwrap();

    assert_eq!(account.read("name").unwrap(), Value::from("John"));
    assert_eq!(account.read("balance").unwrap(), Value::Integer(99));
    assert!(!account.is_changed());

    mapper.delete(&mut account).await.unwrap();
    assert!(matches!(
        mapper.reload(&mut account).await,
        Err(MapperError::DocumentNotFound { .. })
    ));
}

#[tokio::test]
async fn backends_can_be_chosen_at_runtime() {
    let (mapper, _) = setup();
    let mapper = mapper.into_dyn();

    let account = mapper.create("Account", [("name", "John")]).await.unwrap();
    let found = mapper
        .query("Account")
        .unwrap()
        .get(account.id().unwrap())
        .await
        .unwrap();

    assert_eq!(found.read("name").unwrap(), Value::from("John"));
    assert_eq!(found.to_json().unwrap()["name"], "John");
}
