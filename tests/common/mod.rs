#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use cqrs_mediator::{
    Aggregate, AggregateRoot, Command, CommandHandler, CommandOutcome, EventMeta, EventProcessor,
    Guid, MemoryBackend, Repository, TransactionalEventStore, TypeRegistry, aggregate_events,
    domain_event,
};
use serde::{Deserialize, Serialize};

// Events

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InventoryItemCreated {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub id: Guid,
    pub name: String,
}

domain_event!(InventoryItemCreated);

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InventoryItemRenamed {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub id: Guid,
    pub new_name: String,
}

domain_event!(InventoryItemRenamed);

aggregate_events! {
    #[derive(Debug)]
    pub enum InventoryEvent {
        Created(InventoryItemCreated),
        Renamed(InventoryItemRenamed),
    }
}

pub fn inventory_registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry
        .register::<InventoryItemCreated>()
        .register::<InventoryItemRenamed>();
    Arc::new(registry)
}

// Aggregate

#[derive(Debug, Default)]
pub struct InventoryItem {
    root: AggregateRoot,
    name: String,
}

impl InventoryItem {
    pub fn create(id: Guid, name: &str) -> Self {
        let mut item = Self::default();
        item.apply_change(InventoryItemCreated {
            meta: EventMeta::new(),
            id,
            name: name.to_string(),
        });
        item
    }

    pub fn rename(&mut self, new_name: &str) {
        let id = self.id();
        self.apply_change(InventoryItemRenamed {
            meta: EventMeta::new(),
            id,
            new_name: new_name.to_string(),
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Aggregate for InventoryItem {
    type Event = InventoryEvent;
    const AGGREGATE_TYPE: &'static str = "InventoryItem";

    fn root(&self) -> &AggregateRoot {
        &self.root
    }

    fn root_mut(&mut self) -> &mut AggregateRoot {
        &mut self.root
    }

    fn apply(&mut self, event: &InventoryEvent) {
        match event {
            InventoryEvent::Created(created) => {
                self.root.set_id(created.id);
                self.name = created.name.clone();
            }
            InventoryEvent::Renamed(renamed) => self.name = renamed.new_name.clone(),
        }
    }
}

// Commands

#[derive(Debug)]
pub struct CreateInventoryItem {
    pub id: Guid,
    pub name: String,
}

impl Command for CreateInventoryItem {}

#[derive(Debug)]
pub struct RenameInventoryItem {
    pub id: Guid,
    pub new_name: String,
}

impl Command for RenameInventoryItem {}

pub type InventoryStore = Arc<TransactionalEventStore<MemoryBackend>>;

pub fn inventory_store() -> InventoryStore {
    Arc::new(TransactionalEventStore::new(
        MemoryBackend::new(),
        inventory_registry(),
    ))
}

#[derive(Clone)]
pub struct InventoryCommandHandlers {
    repository: Repository<InventoryItem, InventoryStore>,
}

impl InventoryCommandHandlers {
    pub fn new(store: InventoryStore) -> Self {
        Self {
            repository: Repository::new(store),
        }
    }
}

#[async_trait]
impl CommandHandler<CreateInventoryItem> for InventoryCommandHandlers {
    async fn handle(&self, command: CreateInventoryItem) -> CommandOutcome {
        let mut item = InventoryItem::create(command.id, &command.name);
        self.repository.save(&mut item, -1).await?;
        Ok(())
    }
}

#[async_trait]
impl CommandHandler<RenameInventoryItem> for InventoryCommandHandlers {
    async fn handle(&self, command: RenameInventoryItem) -> CommandOutcome {
        let mut item = self.repository.get_by_id(command.id).await?;
        let loaded_at = item.version();
        item.rename(&command.new_name);
        self.repository.save(&mut item, loaded_at).await?;
        Ok(())
    }
}

// Read model

#[derive(Default)]
pub struct InventoryReadModel {
    names: Mutex<HashMap<Guid, String>>,
}

impl InventoryReadModel {
    pub fn name_of(&self, id: Guid) -> Option<String> {
        self.names.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl EventProcessor<InventoryItemCreated> for InventoryReadModel {
    async fn process(&self, event: &InventoryItemCreated) -> anyhow::Result<()> {
        self.names
            .lock()
            .unwrap()
            .insert(event.id, event.name.clone());
        Ok(())
    }
}

#[async_trait]
impl EventProcessor<InventoryItemRenamed> for InventoryReadModel {
    async fn process(&self, event: &InventoryItemRenamed) -> anyhow::Result<()> {
        let mut names = self.names.lock().unwrap();
        match names.get_mut(&event.id) {
            Some(name) => {
                *name = event.new_name.clone();
                Ok(())
            }
            None => anyhow::bail!("no read model for item {}", event.id),
        }
    }
}
