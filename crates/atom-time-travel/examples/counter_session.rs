//! # Counter Session Example
//!
//! Drives an in-memory store through a few edits and walks the history
//! back and forth, printing what the engine sees along the way.

use atom_time_travel::*;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(InMemoryStore::new());
    let counter = Atom::primitive("counter");
    let todos = Atom::primitive("todos");
    let total = Atom::computed("total");

    let source = counter.clone();
    store.define_computed(
        &total,
        Arc::new(move |s: &InMemoryStore| {
            let n = s.get(&source).ok().and_then(|v| v.as_f64()).unwrap_or(0.0);
            AtomValue::Number(n * 10.0)
        }),
    );
    store.set(&counter, AtomValue::from(0)).ok();
    store.set(&todos, AtomValue::Array(Vec::new())).ok();

    let time_travel = TimeTravel::builder()
        .with_max_history(20)
        .with_auto_capture(true)
        .with_atoms([counter.clone(), todos.clone(), total.clone()])
        .build(store.clone())?;

    println!("Editing state");
    store.set(&counter, AtomValue::from(5)).ok();
    store.set(&counter, AtomValue::from(7)).ok();
    time_travel.transaction("add todo and bump", || {
        store
            .set(&todos, AtomValue::Array(vec![AtomValue::from("write docs")]))
            .ok();
        store.set(&counter, AtomValue::from(8)).ok();
    });

    for (index, snapshot) in time_travel.get_history().iter().enumerate() {
        println!(
            "  [{index}] {:<20} counter={:?}",
            snapshot.action().unwrap_or("-"),
            snapshot.value_of("counter")
        );
    }

    println!("Undo twice");
    time_travel.undo();
    time_travel.undo();
    println!(
        "  counter={:?} total={:?}",
        store.get(&counter).ok().and_then(|v| v.as_f64()),
        store.get(&total).ok().and_then(|v| v.as_f64())
    );

    println!("Jump to the latest snapshot");
    let last = time_travel.get_history().len() - 1;
    time_travel.jump_to(last);

    if let Some(diff) = time_travel.diff(0, last) {
        println!("Changes since the first snapshot:");
        for change in &diff.changes {
            println!("  {:?} {}", change.change_type, change.path);
        }
    }

    let validation = time_travel.validate_history();
    println!(
        "History valid: {} ({} warnings)",
        validation.is_valid,
        validation.warnings.len()
    );

    let stats = time_travel.statistics();
    println!(
        "Tracked atoms: {}, snapshots created: {}, history length: {}",
        stats.tracked_atoms, stats.snapshots_created, stats.history.length
    );

    time_travel.dispose().await?;
    Ok(())
}
