use std::str::FromStr;

use chrono::NaiveDate;
use docmodel::{memory::InMemoryStore, prelude::*};
use rust_decimal::Decimal;

fn address_type(name: &str) -> std::sync::Arc<EntityType> {
    EntityType::builder(name)
        .field("city", StringField::new().required().db_field("c"))
        .field("zip", StringField::new().regex(r"^\d{4}$").unwrap())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_entities_round_trip_through_the_store() {
    let address = address_type("StoredAddress");
    let listing = EntityType::builder("StoredListing")
        .collection("stored_listings")
        .field("title", StringField::new().max_length(40).required())
        .field("views", IntField::new().min_value(0).with_default(0))
        .field("price", DecimalField::new())
        .field("tags", ListField::of(StringField::new()))
        .field("listed_at", DateTimeField::new())
        .field("address", EmbeddedDocumentField::new("StoredAddress"))
        .build()
        .unwrap();
    let store = DocumentStore::new(InMemoryStore::new());

    let listed_at = NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(12, 30, 0)
        .unwrap();
    let home = Entity::with_values(&address, [("city", "Oslo"), ("zip", "0150")]).unwrap();

    let mut entity = Entity::with_values(&listing, [("title", "Flat")]).unwrap();
    entity.set("price", "1250.50").unwrap();
    entity.set("tags", Value::list(["cosy", "central"])).unwrap();
    entity.set("listed_at", listed_at).unwrap();
    entity.set("address", home.clone()).unwrap();

    let id = store.save(&mut entity).await.unwrap();
    assert_eq!(entity.id(), Some(id));
    assert_eq!(entity.changed_fields().count(), 0);

    let loaded = store.load(&listing, id).await.unwrap().unwrap();
    assert_eq!(loaded.get("title").unwrap().as_str(), Some("Flat"));
    assert_eq!(loaded.get("views").unwrap(), &Value::Int(0));
    assert_eq!(
        loaded.get("price").unwrap(),
        &Value::Decimal(Decimal::from_str("1250.50").unwrap())
    );
    assert_eq!(
        loaded.get("tags").unwrap(),
        &Value::list(["cosy", "central"])
    );
    assert_eq!(loaded.get("listed_at").unwrap(), &Value::DateTime(listed_at));
    assert_eq!(loaded.get("address").unwrap(), &Value::from(home));
}

#[tokio::test]
async fn test_saving_collects_every_invalid_field() {
    let address = address_type("InvalidAddress");
    let listing = EntityType::builder("InvalidListing")
        .collection("invalid_listings")
        .field("title", StringField::new().required())
        .field("address", EmbeddedDocumentField::new("InvalidAddress"))
        .build()
        .unwrap();
    let store = DocumentStore::new(InMemoryStore::new());

    let mut entity = Entity::new(&listing);
    let mut nowhere = Entity::new(&address);
    nowhere.set("zip", "0150").unwrap();
    entity.set("address", nowhere).unwrap_err();

    let err = store.save(&mut entity).await.unwrap_err();
    let err = err.as_validation().unwrap();
    assert_eq!(err.message, "ValidationError (InvalidListing:None) (title)");
    assert_eq!(err.get("title").unwrap().message, "Field is required");
    assert_eq!(entity.id(), None);
}

#[tokio::test]
async fn test_resaving_updates_the_stored_document() {
    let note = EntityType::builder("ResavedNote")
        .collection("resaved_notes")
        .field("body", StringField::new())
        .build()
        .unwrap();
    let store = DocumentStore::new(InMemoryStore::new());

    let mut entity = Entity::with_values(&note, [("body", "draft")]).unwrap();
    let id = store.save(&mut entity).await.unwrap();

    store
        .set_field_value(&mut entity, "body", "final")
        .await
        .unwrap();
    assert!(entity.is_changed("body"));
    assert_eq!(store.save(&mut entity).await.unwrap(), id);

    let loaded = store.load(&note, id).await.unwrap().unwrap();
    assert_eq!(loaded.get("body").unwrap().as_str(), Some("final"));

    store.delete(&loaded).await.unwrap();
    assert!(store.load(&note, id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_boolean_fields_only_accept_booleans() {
    let setting = EntityType::builder("StoredSetting")
        .collection("stored_settings")
        .field("enabled", BooleanField::new())
        .build()
        .unwrap();
    let store = DocumentStore::new(InMemoryStore::new());

    let mut entity = Entity::new(&setting);
    let err = store
        .set_field_value(&mut entity, "enabled", 0_i64)
        .await
        .unwrap_err();
    assert_eq!(
        err.as_validation().unwrap().message,
        "BooleanField only accepts boolean values"
    );
    assert!(entity.set("enabled", "false").unwrap_err().as_validation().is_some());
    assert_eq!(entity.get("enabled").unwrap(), &Value::Null);

    store
        .set_field_value(&mut entity, "enabled", false)
        .await
        .unwrap();
    let id = store.save(&mut entity).await.unwrap();

    let loaded = store.load(&setting, id).await.unwrap().unwrap();
    assert_eq!(loaded.get("enabled").unwrap(), &Value::Bool(false));
}

#[tokio::test]
async fn test_embedded_types_cannot_be_saved_directly() {
    let address = address_type("UnsavableAddress");
    let store = DocumentStore::new(InMemoryStore::new());

    let mut entity = Entity::with_values(&address, [("city", "Bergen")]).unwrap();
    assert!(matches!(
        store.save(&mut entity).await,
        Err(ModelError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_dynamic_store_over_a_boxed_backend() {
    let note = EntityType::builder("DynamicNote")
        .collection("dynamic_notes")
        .field("body", StringField::new())
        .build()
        .unwrap();
    let store = DynDocumentStore::new(Box::new(InMemoryStore::new()));

    let mut entity = Entity::with_values(&note, [("body", "boxed")]).unwrap();
    let id = store.as_dyn().save(&mut entity).await.unwrap();
    let loaded = store.as_dyn().load(&note, id).await.unwrap().unwrap();
    assert_eq!(loaded.get("body").unwrap().as_str(), Some("boxed"));

    store.shutdown().await.unwrap();
}

#[test]
fn test_filters_follow_storage_keys_into_embedded_documents() {
    let _address = address_type("FilteredAddress");
    let listing = EntityType::builder("FilteredListing")
        .collection("filtered_listings")
        .field(
            "address",
            EmbeddedDocumentField::new("FilteredAddress").db_field("addr"),
        )
        .build()
        .unwrap();

    let (path, operand) = listing
        .prepare_filter("address.city", QueryOp::IStartsWith, &Value::from("os"))
        .unwrap();
    assert_eq!(path, "addr.c");
    assert_eq!(
        operand.as_document().unwrap().get_str("$regex").unwrap(),
        "^os"
    );

    assert!(matches!(
        listing.prepare_filter("address.country", QueryOp::Eq, &Value::from("NO")),
        Err(ModelError::UnknownField(..))
    ));
}
