use std::collections::BTreeSet;

use bson::{Bson, doc};
use docmodel::{memory::InMemoryStore, prelude::*};

#[tokio::test]
async fn test_sequence_values_are_allocated_on_first_read() {
    let ticket = EntityType::builder("CounterTicket")
        .collection("counter_tickets")
        .field("number", SequenceField::new())
        .build()
        .unwrap();
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(backend.clone());

    let mut first = Entity::new(&ticket);
    assert_eq!(first.get("number").unwrap(), &Value::Null);

    let value = store.get_field_value(&mut first, "number").await.unwrap();
    assert_eq!(value, Value::Int(1));
    assert!(first.is_changed("number"));

    // Reading again keeps the allocated value.
    let value = store.get_field_value(&mut first, "number").await.unwrap();
    assert_eq!(value, Value::Int(1));

    assert_eq!(
        backend
            .counter_record("odm.counters", "counter_tickets.number")
            .await,
        Some(Bson::Document(doc! { "_id": "counter_tickets.number", "next": 1_i64 }))
    );
}

#[tokio::test]
async fn test_interleaved_clients_allocate_increasing_values() {
    let ticket = EntityType::builder("CounterInterleavedTicket")
        .collection("counter_interleaved_tickets")
        .field("number", SequenceField::new())
        .build()
        .unwrap();
    let backend = InMemoryStore::new();
    let clients = [
        DocumentStore::new(backend.clone()),
        DocumentStore::new(backend.clone()),
    ];

    let mut allocated = Vec::new();
    for round in 0..6 {
        let mut entity = Entity::new(&ticket);
        let store = &clients[round % 2];
        let value = store.get_field_value(&mut entity, "number").await.unwrap();
        allocated.push(value.as_i64().unwrap());
    }

    assert_eq!(allocated, vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocations_are_distinct() {
    let ticket = EntityType::builder("CounterConcurrentTicket")
        .collection("counter_concurrent_tickets")
        .field("number", SequenceField::new())
        .build()
        .unwrap();
    let backend = InMemoryStore::new();

    let handles = (0..32)
        .map(|_| {
            let backend = backend.clone();
            let ticket = ticket.clone();
            tokio::spawn(async move {
                let store = DocumentStore::new(backend);
                let mut entity = Entity::new(&ticket);
                store
                    .get_field_value(&mut entity, "number")
                    .await
                    .unwrap()
                    .as_i64()
                    .unwrap()
            })
        })
        .collect::<Vec<_>>();

    let mut values = BTreeSet::new();
    for handle in handles {
        values.insert(handle.await.unwrap());
    }

    assert_eq!(values, (1..=32).collect::<BTreeSet<i64>>());
}

#[tokio::test]
async fn test_assigning_null_allocates_and_explicit_values_are_kept() {
    let invoice = EntityType::builder("CounterInvoice")
        .collection("counter_invoices")
        .field("number", SequenceField::new().counter_collection("billing.counters"))
        .build()
        .unwrap();
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(backend.clone());

    let mut entity = Entity::new(&invoice);
    store
        .set_field_value(&mut entity, "number", Value::Null)
        .await
        .unwrap();
    assert_eq!(entity.get("number").unwrap(), &Value::Int(1));

    store
        .set_field_value(&mut entity, "number", 42)
        .await
        .unwrap();
    assert_eq!(entity.get("number").unwrap(), &Value::Int(42));

    assert_eq!(
        store
            .generate_sequence_value(&invoice, "number")
            .await
            .unwrap(),
        2
    );
    assert!(backend
        .counter_record("billing.counters", "counter_invoices.number")
        .await
        .is_some());
}

#[tokio::test]
async fn test_zero_is_replaced_by_an_allocated_value() {
    let receipt = EntityType::builder("CounterReceipt")
        .collection("counter_receipts")
        .field("number", SequenceField::new())
        .build()
        .unwrap();
    let store = DocumentStore::new(InMemoryStore::new());

    let mut read = Entity::new(&receipt);
    read.set("number", 0).unwrap();
    assert_eq!(
        store.get_field_value(&mut read, "number").await.unwrap(),
        Value::Int(1)
    );

    let mut assigned = Entity::new(&receipt);
    store
        .set_field_value(&mut assigned, "number", 0)
        .await
        .unwrap();
    assert_eq!(assigned.get("number").unwrap(), &Value::Int(2));
}

#[tokio::test]
async fn test_loaded_documents_keep_their_sequence_value() {
    let order = EntityType::builder("CounterOrder")
        .collection("counter_orders")
        .field("number", SequenceField::new())
        .build()
        .unwrap();
    let store = DocumentStore::new(InMemoryStore::new());

    let mut entity = Entity::new(&order);
    store.get_field_value(&mut entity, "number").await.unwrap();
    let id = store.save(&mut entity).await.unwrap();
    assert!(!entity.is_changed("number"));

    let mut loaded = store.load(&order, id).await.unwrap().unwrap();
    assert_eq!(
        store.get_field_value(&mut loaded, "number").await.unwrap(),
        Value::Int(1)
    );
    assert!(!loaded.is_changed("number"));
}

#[tokio::test]
async fn test_only_sequence_fields_generate_values() {
    let plain = EntityType::builder("CounterPlain")
        .collection("counter_plain")
        .field("count", IntField::new())
        .build()
        .unwrap();
    let store = DocumentStore::new(InMemoryStore::new());

    assert!(matches!(
        store.generate_sequence_value(&plain, "count").await,
        Err(ModelError::Configuration(_))
    ));
}
