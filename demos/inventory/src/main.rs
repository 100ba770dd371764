//! Inventory Example
//!
//! Demonstrates reactant with a small warehouse inventory.
//! A collection of items is hydrated asynchronously, observed through its key
//! set, a total-quantity computation and a single item's value bag, and then
//! mutated by a synchronous and an asynchronous action.

use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;
use reactant_core::{
    bag, make_collection_definition, make_entity_definition, with_registry, CollectionActions,
    CollectionComputed, CollectionValues, ComputationInfo, EngineConfig, EntityActions,
    EntityValues, Error, Executor, Listener, Notification, Result, Value,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn qty_of(values: &EntityValues) -> i64 {
    values.get("qty").and_then(|q| q.as_int()).unwrap_or(0)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Reactant Inventory Example ===\n");

    let mut pool = LocalPool::new();
    let spawner = pool.spawner();
    with_registry(|registry| {
        registry.configure(EngineConfig::default().with_executor(Executor::new(pool.spawner())))
    });

    // Item definition with one synchronous and one asynchronous action
    let item = make_entity_definition("item", bag! { "name" => "", "qty" => 0 });
    item.actions(
        EntityActions::new()
            .action("setQty", |v: &EntityValues, args: &[Value]| {
                let qty = args
                    .first()
                    .and_then(Value::as_int)
                    .ok_or_else(|| Error::InvalidArgument("setQty expects a quantity".into()))?;
                v.set("qty", qty)
            })
            .task("restock", move |v: &EntityValues, args: &[Value]| {
                let v = v.clone();
                let amount = args.first().and_then(Value::as_int).unwrap_or(1);
                // the supplier answers on a later turn of the executor
                let (tx, rx) = oneshot::channel::<i64>();
                let shipped = spawner.spawn_local(async move {
                    let _ = tx.send(amount);
                });
                async move {
                    shipped.map_err(|e| Error::action("restock", e.to_string()))?;
                    let delivered = rx
                        .await
                        .map_err(|_| Error::action("restock", "shipment lost"))?;
                    let stocked = v.require_int("qty")?;
                    v.set("qty", stocked + delivered)
                }
            }),
    );

    let inventory = make_collection_definition("inventory", &item);
    inventory.computed(
        CollectionComputed::new()
            .accessor("totalQty", |c: &CollectionValues| {
                let total: i64 = c.entities().iter().map(|e| qty_of(e.values())).sum();
                Ok(Value::Int(total))
            })
            .function("lowStock", |c: &CollectionValues, args: &[Value]| {
                let floor = args.first().and_then(Value::as_int).unwrap_or(0);
                let low = c
                    .entities()
                    .iter()
                    .filter(|e| qty_of(e.values()) <= floor)
                    .filter_map(|e| e.values().get("name"))
                    .collect::<Vec<_>>();
                Ok(Value::List(low))
            }),
    );

    inventory.actions(CollectionActions::new().action(
        "restockLow",
        |c: &CollectionValues, args: &[Value]| {
            let floor = args.first().and_then(Value::as_int).unwrap_or(0);
            for entity in c.entities() {
                if qty_of(entity.values()) <= floor {
                    entity.invoke("restock", vec![Value::Int(10)])?;
                }
            }
            Ok(())
        },
    ));

    // Observers
    let ids = Listener::new(|n: &Notification| {
        if let Some(keys) = n.as_keys() {
            println!("  [ids]        {:?}", keys);
        }
    })
    .with_action_hook(|action, completion| {
        println!("  [hook]       {} started ({})", action, completion.task());
    })
    .into_ref();
    let total = Listener::new(|n: &Notification| {
        if let Some(value) = n.as_computed() {
            println!("  [totalQty]   {}", value);
        }
    })
    .for_computation(ComputationInfo::new("totalQty"))
    .into_ref();
    let low = Listener::new(|n: &Notification| {
        if let Some(value) = n.as_computed() {
            println!("  [lowStock<=2] {}", value);
        }
    })
    .for_computation(ComputationInfo::new("lowStock").with_arguments(vec![Value::Int(2)]))
    .into_ref();

    inventory.register(&ids)?;
    inventory.register_computation(&total)?;
    inventory.register_computation(&low)?;

    println!("\nHydrating from the warehouse...");
    let (stock_tx, stock_rx) = oneshot::channel::<Vec<(&'static str, &'static str, i64)>>();
    let hydrated = inventory.init_with(move |collection| async move {
        let stock = stock_rx.await.unwrap_or_default();
        for (id, name, qty) in stock {
            collection.create(bag! { "id" => id, "name" => name, "qty" => qty })?;
        }
        Ok::<(), Error>(())
    })?;
    pool.run_until_stalled();
    println!("  initialized: {}", inventory.is_initialized());

    let _ = stock_tx.send(vec![("bolt", "Bolt", 2), ("nut", "Nut", 10), ("gear", "Gear", 1)]);
    pool.run_until_stalled();
    info!(outcome = ?hydrated.outcome(), "hydration finished");
    println!("  initialized: {}", inventory.is_initialized());

    // Watch one item directly
    let bolt_watcher = Listener::new(|n: &Notification| {
        if let Some(values) = n.as_values() {
            println!("  [bolt]       {:?}", values);
        }
    })
    .into_ref();
    println!("\nWatching bolt:");
    inventory.register_with_entity("bolt", &bolt_watcher)?;

    println!("\nbolt.setQty(5):");
    inventory.entity("bolt")?.invoke("setQty", vec![Value::Int(5)])?;

    println!("\ngear.restock(20):");
    let gear = inventory.entity("gear")?;
    let restock = gear.invoke("restock", vec![Value::Int(20)])?;
    println!("  gear action in progress: {}", gear.values().is_action_in_progress());
    pool.run_until_stalled();
    if let Some(completion) = restock.completion() {
        println!("  restock outcome: {:?}", completion.outcome());
    }

    println!("\nRemoving nut:");
    inventory.remove("nut")?;

    println!("\ninventory.restockLow(5):");
    inventory.invoke("restockLow", vec![Value::Int(5)])?;
    pool.run_until_stalled();

    println!("\nFinal state:");
    println!("  ids: {:?}", inventory.ids());
    println!("  totalQty: {}", inventory.compute("totalQty", &[])?);

    println!("\n=== Example Complete ===");
    Ok(())
}
