mod common;

use common::*;
use cqrs_mediator::{Aggregate, CqrsError, EventStore, Guid, Repository, UNASSIGNED_VERSION};

#[tokio::test]
async fn replaying_history_rebuilds_the_aggregate() {
    let store = inventory_store();
    let repository: Repository<InventoryItem, _> = Repository::new(store.clone());
    let id = Guid::new();

    let mut item = InventoryItem::create(id, "test");
    assert_eq!(item.version(), UNASSIGNED_VERSION);
    repository.save(&mut item, -1).await.unwrap();
    assert_eq!(item.version(), 0);
    assert!(item.uncommitted_events().is_empty());

    let mut item = repository.get_by_id(id).await.unwrap();
    item.rename("test2");
    repository.save(&mut item, 0).await.unwrap();

    let mut item = repository.get_by_id(id).await.unwrap();
    item.rename("test3");
    repository.save(&mut item, 1).await.unwrap();

    let item = repository.get_by_id(id).await.unwrap();
    assert_eq!(item.id(), id);
    assert_eq!(item.name(), "test3");
    assert_eq!(item.version(), 2);
    assert!(item.uncommitted_events().is_empty());

    let versions: Vec<i64> = store
        .get_events_for_aggregate(id)
        .await
        .unwrap()
        .iter()
        .map(|event| event.version())
        .collect();
    assert_eq!(versions, vec![0, 1, 2]);
}

#[tokio::test]
async fn several_changes_are_saved_together() {
    let repository: Repository<InventoryItem, _> = Repository::new(inventory_store());
    let id = Guid::new();

    let mut item = InventoryItem::create(id, "test");
    item.rename("test2");
    item.rename("test3");
    repository.save(&mut item, -1).await.unwrap();

    assert_eq!(item.version(), 2);

    let item = repository.get_by_id(id).await.unwrap();
    assert_eq!(item.name(), "test3");
    assert_eq!(item.version(), 2);
}

#[tokio::test]
async fn missing_aggregate_is_not_found() {
    let repository: Repository<InventoryItem, _> = Repository::new(inventory_store());
    let id = Guid::new();

    let err = repository.get_by_id(id).await.unwrap_err();

    assert!(matches!(err, CqrsError::AggregateNotFound(missing) if missing == id));
}

#[tokio::test]
async fn stale_copy_cannot_overwrite_newer_changes() {
    let repository: Repository<InventoryItem, _> = Repository::new(inventory_store());
    let id = Guid::new();
    repository
        .save(&mut InventoryItem::create(id, "test"), -1)
        .await
        .unwrap();

    let mut first = repository.get_by_id(id).await.unwrap();
    let mut second = repository.get_by_id(id).await.unwrap();

    first.rename("first");
    repository.save(&mut first, 0).await.unwrap();

    second.rename("second");
    let err = repository.save(&mut second, 0).await.unwrap_err();

    assert!(err.is_concurrency_conflict());
    // the rejected change is kept so the caller can inspect or retry it
    assert_eq!(second.uncommitted_events().len(), 1);
    assert_eq!(second.version(), 0);

    let current = repository.get_by_id(id).await.unwrap();
    assert_eq!(current.name(), "first");
    assert_eq!(current.version(), 1);
}

#[tokio::test]
async fn custom_factory_is_used_for_hydration() {
    fn preset() -> InventoryItem {
        let mut item = InventoryItem::default();
        item.root_mut().set_version(UNASSIGNED_VERSION);
        item
    }

    let repository = Repository::<InventoryItem, _>::with_factory(inventory_store(), preset);
    let id = Guid::new();
    repository
        .save(&mut InventoryItem::create(id, "test"), -1)
        .await
        .unwrap();

    let item: InventoryItem = repository.get_by_id(id).await.unwrap();

    assert_eq!(item.name(), "test");
    assert_eq!(item.version(), 0);
}
