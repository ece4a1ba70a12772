use atom_time_travel::snapshot::SkipReason;
use atom_time_travel::*;
use futures::future::join_all;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn value_of(store: &InMemoryStore, atom: &Atom) -> Option<f64> {
    store.get(atom).ok().and_then(|v| v.as_f64())
}

fn labels(time_travel: &TimeTravel) -> Vec<String> {
    time_travel
        .get_history()
        .iter()
        .map(|s| s.action().unwrap_or_default().to_string())
        .collect()
}

fn short_ttl() -> TtlConfig {
    TtlConfig {
        default_ttl: Duration::from_millis(100),
        idle_threshold: Duration::from_millis(25),
        min_ttl: Duration::from_millis(10),
        gc_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

/// Counter 0 -> 5 -> 7 with auto-capture, then walk back and forth
#[test]
fn test_counter_walkthrough() {
    let store = Arc::new(InMemoryStore::new());
    let counter = Atom::primitive("counter");
    store.set(&counter, AtomValue::from(0)).unwrap();

    let time_travel = TimeTravel::builder()
        .with_auto_capture(true)
        .build(store.clone())
        .unwrap();
    assert!(time_travel.track(&counter));

    store.set(&counter, AtomValue::from(5)).unwrap();
    store.set(&counter, AtomValue::from(7)).unwrap();

    assert!(time_travel.undo());
    assert_eq!(value_of(&store, &counter), Some(5.0));
    assert!(time_travel.can_redo());

    assert!(time_travel.undo());
    assert_eq!(value_of(&store, &counter), Some(0.0));
    assert!(!time_travel.can_undo());

    assert!(time_travel.redo());
    assert!(time_travel.redo());
    assert_eq!(value_of(&store, &counter), Some(7.0));
    assert!(!time_travel.can_redo());
}

#[test]
fn test_history_drops_oldest_at_capacity() {
    let store = Arc::new(InMemoryStore::new());
    let counter = Atom::primitive("counter");
    store.set(&counter, AtomValue::from(1)).unwrap();

    let time_travel = TimeTravel::builder()
        .with_max_history(2)
        .with_atoms([counter])
        .build(store)
        .unwrap();

    for label in ["a", "b", "c"] {
        time_travel.capture(Some(label));
    }

    assert_eq!(labels(&time_travel), vec!["b", "c"]);
    assert_eq!(time_travel.current_index(), Some(1));
}

#[test]
fn test_ttl_status_and_access() {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InMemoryStore::new());
    let session = Atom::primitive("session");
    store.set(&session, AtomValue::from("token")).unwrap();

    let time_travel = TimeTravel::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_ttl_config(short_ttl())
        .with_atoms([session.clone()])
        .build(store)
        .unwrap();
    let tracker = time_travel.atom_tracker();

    clock.advance(Duration::from_millis(150));
    let stale = tracker.get_stale_atoms();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id(), session.id());
    assert!(matches!(stale[0].status, AtomStatus::Stale | AtomStatus::Idle));
    assert!(stale[0].gc_eligible);

    assert!(tracker.record_access(&session, None));
    let tracked = tracker.get_tracked_atom(session.id()).unwrap();
    assert_eq!(tracked.status, AtomStatus::Active);
    assert!(!tracked.gc_eligible);
    assert!(tracker.get_stale_atoms().is_empty());
}

#[test]
fn test_archive_and_restore_atom() {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InMemoryStore::new());
    let draft = Atom::primitive("draft");
    let kept = Atom::primitive("kept");

    let time_travel = TimeTravel::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_ttl_config(TtlConfig {
            on_cleanup: OnCleanup::Archive,
            ..short_ttl()
        })
        .with_atoms([draft.clone()])
        .build(store)
        .unwrap();
    let tracker = time_travel.atom_tracker();

    clock.advance(Duration::from_millis(150));
    assert!(time_travel.track(&kept));

    let result = tracker.cleanup_now(None);
    assert_eq!(result.removed, 1);
    assert_eq!(result.archived, 1);
    assert_eq!(result.removed_ids, vec![draft.id()]);
    assert!(!tracker.is_tracked(&draft));
    assert!(tracker.is_tracked(&kept));
    assert_eq!(tracker.archive_len(), 1);

    assert!(tracker.restore_archived_atom(draft.id()));
    assert!(tracker.is_tracked(&draft));
    assert_eq!(tracker.archive_len(), 0);
    assert_eq!(
        tracker.get_tracked_atom(draft.id()).map(|t| t.status),
        Some(AtomStatus::Active)
    );
    assert_eq!(tracker.stats().total_atoms_archived, 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_gc_removes_stale_atoms() {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InMemoryStore::new());
    let temp = Atom::primitive("temp");

    let time_travel = TimeTravel::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_ttl_config(short_ttl())
        .with_atoms([temp.clone()])
        .with_background_gc(true)
        .build(store)
        .unwrap();
    assert!(time_travel.atom_tracker().is_gc_running());

    clock.advance(Duration::from_millis(150));
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(!time_travel.atom_tracker().is_tracked(&temp));
    assert!(time_travel.statistics().cleanup.total_cleanups >= 1);

    time_travel.dispose().await.unwrap();
    assert!(!time_travel.atom_tracker().is_gc_running());
}

#[test]
fn test_jump_restores_each_snapshot_exactly() {
    let store = Arc::new(InMemoryStore::new());
    let x = Atom::primitive("x");
    let y = Atom::primitive("y");
    store.set(&x, AtomValue::from(0)).unwrap();
    store.set(&y, AtomValue::from(0)).unwrap();

    let time_travel = TimeTravel::builder()
        .with_atoms([x.clone(), y.clone()])
        .build(store.clone())
        .unwrap();

    let mut expected = Vec::new();
    for step in 1..=4 {
        store.set(&x, AtomValue::from(step)).unwrap();
        if step % 2 == 0 {
            store.set(&y, AtomValue::from(step * 10)).unwrap();
        }
        time_travel.capture(Some(format!("step {step}").as_str()));
        expected.push((value_of(&store, &x), value_of(&store, &y)));
    }

    for index in [2, 0, 3, 1] {
        assert!(time_travel.jump_to(index));
        assert_eq!((value_of(&store, &x), value_of(&store, &y)), expected[index]);
        assert_eq!(time_travel.current_index(), Some(index));
    }

    assert!(!time_travel.jump_to(4));
    assert_eq!(time_travel.current_index(), Some(1));
    assert_eq!((value_of(&store, &x), value_of(&store, &y)), expected[1]);
}

#[test]
fn test_writable_and_computed_atoms() {
    let store = Arc::new(InMemoryStore::new());
    let base = Atom::primitive("base");
    let doubled = Atom::computed("doubled");
    let volume = Atom::writable("volume");

    let writes = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&writes);
    store.define_writer(
        &volume,
        Arc::new(move |s: &InMemoryStore, atom: &Atom, value: AtomValue| {
            counted.fetch_add(1, Ordering::SeqCst);
            s.set_raw(atom, value)
        }),
    );
    let source = base.clone();
    store.define_computed(
        &doubled,
        Arc::new(move |s: &InMemoryStore| {
            AtomValue::Number(s.get(&source).ok().and_then(|v| v.as_f64()).unwrap_or(0.0) * 2.0)
        }),
    );
    store.set(&base, AtomValue::from(1)).unwrap();
    store.write(&volume, AtomValue::from(3)).unwrap();
    writes.store(0, Ordering::SeqCst);

    let time_travel = TimeTravel::builder()
        .with_atoms([base.clone(), doubled.clone(), volume.clone()])
        .build(store.clone())
        .unwrap();
    let first = time_travel.capture(Some("first")).unwrap();
    assert_eq!(first.atom_count(), 3);

    store.set(&base, AtomValue::from(4)).unwrap();
    store.write(&volume, AtomValue::from(8)).unwrap();
    time_travel.capture(Some("second"));
    writes.store(0, Ordering::SeqCst);

    assert!(time_travel.undo());
    assert_eq!(value_of(&store, &base), Some(1.0));
    assert_eq!(value_of(&store, &doubled), Some(2.0));
    assert_eq!(value_of(&store, &volume), Some(3.0));
    // The writable atom went through its custom write path
    assert_eq!(writes.load(Ordering::SeqCst), 1);

    let restoration = time_travel.last_restoration().unwrap();
    assert!(restoration
        .skipped
        .iter()
        .any(|skip| skip.name == "doubled" && skip.reason == SkipReason::ReadOnly));
}

#[test]
fn test_failed_restoration_rolls_back() {
    let store = Arc::new(InMemoryStore::new());
    let a = Atom::primitive("a");
    let b = Atom::primitive("b");
    store.set(&a, AtomValue::from(1)).unwrap();
    store.set(&b, AtomValue::from(1)).unwrap();

    let time_travel = TimeTravel::builder()
        .with_atoms([a.clone(), b.clone()])
        .build(store.clone())
        .unwrap();
    time_travel.capture(Some("ones"));
    store.set(&a, AtomValue::from(2)).unwrap();
    store.set(&b, AtomValue::from(2)).unwrap();
    time_travel.capture(Some("twos"));

    // Entries restore in name order, so "a" is written before "b" fails
    store.fail_writes(&b);
    assert!(!time_travel.undo());
    assert_eq!(value_of(&store, &a), Some(2.0));
    assert_eq!(value_of(&store, &b), Some(2.0));
    assert_eq!(time_travel.current_index(), Some(1));

    let restoration = time_travel.last_restoration().unwrap();
    assert!(restoration.rolled_back);
    assert!(restoration.restored.is_empty());
}

#[test]
fn test_incomplete_rollback_is_surfaced_by_undo() {
    let store = Arc::new(InMemoryStore::new());
    let a = Atom::writable("a");
    let b = Atom::primitive("b");
    store.set(&a, AtomValue::from(1)).unwrap();
    store.set(&b, AtomValue::from(1)).unwrap();

    let time_travel = TimeTravel::builder()
        .with_atoms([a.clone(), b.clone()])
        .build(store.clone())
        .unwrap();
    time_travel.capture(Some("ones"));
    store.set(&a, AtomValue::from(2)).unwrap();
    store.set(&b, AtomValue::from(2)).unwrap();
    time_travel.capture(Some("twos"));

    // "a" accepts the restore write but refuses to be put back.
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    store.define_writer(
        &a,
        Arc::new(move |s: &InMemoryStore, atom: &Atom, value: AtomValue| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                s.set_raw(atom, value)
            } else {
                Err(StoreError::WriteRejected {
                    name: atom.display_name(),
                    reason: "frozen".into(),
                })
            }
        }),
    );
    store.fail_writes(&b);

    assert!(!time_travel.undo());
    assert_eq!(time_travel.current_index(), Some(1));
    assert_eq!(value_of(&store, &a), Some(1.0));
    assert_eq!(value_of(&store, &b), Some(2.0));

    let restoration = time_travel.last_restoration().unwrap();
    assert!(!restoration.rolled_back);
    assert_eq!(restoration.restored, vec!["a".to_string()]);
    assert_eq!(restoration.rollback_failures.len(), 1);
    assert!(restoration.rollback_failures[0].contains("frozen"));
}

#[test]
fn test_restorer_accessor_does_not_grow_history() {
    let store = Arc::new(InMemoryStore::new());
    let a = Atom::primitive("a");
    let b = Atom::primitive("b");
    store.set(&a, AtomValue::from(0)).unwrap();
    store.set(&b, AtomValue::from(0)).unwrap();

    let time_travel = TimeTravel::builder()
        .with_auto_capture(true)
        .with_atoms([a.clone(), b.clone()])
        .build(store.clone())
        .unwrap();
    store.set(&a, AtomValue::from(1)).unwrap();
    store.set(&b, AtomValue::from(1)).unwrap();
    let before = labels(&time_travel);
    assert_eq!(before, vec!["initial", "set a", "set b"]);

    let first = Arc::clone(&time_travel.get_history()[0]);
    let result = time_travel.snapshot_restorer().restore(&first);

    assert!(result.success);
    assert_eq!(value_of(&store, &a), Some(0.0));
    assert_eq!(value_of(&store, &b), Some(0.0));
    assert_eq!(labels(&time_travel), before);
    assert_eq!(time_travel.current_index(), Some(2));
}

#[test]
fn test_clear_history_does_not_recapture() {
    let store = Arc::new(InMemoryStore::new());
    let counter = Atom::primitive("counter");
    store.set(&counter, AtomValue::from(0)).unwrap();

    let time_travel = TimeTravel::builder()
        .with_auto_capture(true)
        .with_atoms([counter.clone()])
        .build(store.clone())
        .unwrap();
    store.set(&counter, AtomValue::from(1)).unwrap();
    assert_eq!(time_travel.get_history().len(), 2);

    time_travel.clear_history();
    assert!(time_travel.get_history().is_empty());
    assert_eq!(time_travel.current_index(), None);
    assert!(!time_travel.undo());

    store.set(&counter, AtomValue::from(2)).unwrap();
    assert_eq!(labels(&time_travel), vec!["set counter"]);
}

#[test]
fn test_change_events_reach_watchers() {
    let store = Arc::new(InMemoryStore::new());
    let name = Atom::primitive("name");
    let time_travel = TimeTravel::builder()
        .with_atoms([name.clone()])
        .build(store.clone())
        .unwrap();

    let kinds = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&kinds);
    time_travel.change_detector().watch(
        &name,
        Arc::new(move |event: &ChangeEvent| sink.lock().push(event.kind)),
    );

    store.set(&name, AtomValue::from("ada")).unwrap();
    store.set(&name, AtomValue::from(42)).unwrap();
    store.set(&name, AtomValue::from(43)).unwrap();

    assert_eq!(
        *kinds.lock(),
        vec![ChangeKind::Created, ChangeKind::Type, ChangeKind::Value]
    );
    let tracked = time_travel.atom_tracker().get_tracked_atom(name.id()).unwrap();
    assert_eq!(tracked.change_count, 3);
}

#[tokio::test]
async fn test_dispose_is_idempotent_across_instances() {
    let leaks = Arc::new(LeakDetector::new(LeakDetectorConfig::default()));
    let store = Arc::new(InMemoryStore::new());
    let counter = Atom::primitive("counter");
    store.set(&counter, AtomValue::from(0)).unwrap();

    let instances: Vec<TimeTravel> = (0..3)
        .map(|_| {
            TimeTravel::builder()
                .with_auto_capture(true)
                .with_leak_detector(Arc::clone(&leaks))
                .with_atoms([counter.clone()])
                .build(store.clone())
                .unwrap()
        })
        .collect();
    assert_eq!(store.listener_count(), 3);
    assert_eq!(leaks.tracked_count(), 15);

    let results = join_all(instances.iter().map(|tt| tt.dispose())).await;
    assert!(results.iter().all(|r| r.is_ok()));
    let again = join_all(instances.iter().map(|tt| tt.dispose())).await;
    assert!(again.iter().all(|r| r.is_ok()));

    assert_eq!(store.listener_count(), 0);
    assert_eq!(leaks.tracked_count(), 0);
    for tt in &instances {
        assert!(tt.capture(None).is_none());
        assert!(!tt.undo());
        assert!(tt.get_history().is_empty());
    }
}

#[test]
fn test_leak_detector_reports_undisposed_instances() {
    let clock = ManualClock::starting_now();
    let leaks = Arc::new(LeakDetector::with_clock(
        LeakDetectorConfig {
            threshold: Duration::from_secs(1),
            ..Default::default()
        },
        Arc::new(clock.clone()),
    ));
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reported);
    leaks.on_leak(Arc::new(move |_report: &LeakReport| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let _time_travel = TimeTravel::builder()
        .with_leak_detector(Arc::clone(&leaks))
        .build(Arc::new(InMemoryStore::new()))
        .unwrap();

    assert!(leaks.check_for_leaks().is_empty());
    clock.advance(Duration::from_secs(2));
    let found = leaks.check_for_leaks();
    assert_eq!(found.len(), 5);
    assert!(found.iter().any(|report| report.kind == "time-travel"));

    leaks.check_for_leaks();
    assert_eq!(reported.load(Ordering::SeqCst), 5);

    leaks.clear();
    assert_eq!(leaks.tracked_count(), 0);
}

#[test]
fn test_config_from_json_drives_the_engine() {
    let config = TimeTravelConfig::from_json(
        r#"{ "max_history": 3, "auto_capture": true, "exclude_atoms": ["secret"] }"#,
    )
    .unwrap();
    let store = Arc::new(InMemoryStore::new());
    let visible = Atom::primitive("visible");
    let secret = Atom::primitive("secret");
    store.set(&visible, AtomValue::from(0)).unwrap();
    store.set(&secret, AtomValue::from(0)).unwrap();

    let time_travel = TimeTravel::builder()
        .with_config(config)
        .with_atoms([visible.clone(), secret.clone()])
        .build(store.clone())
        .unwrap();
    for n in 1..=5 {
        store.set(&visible, AtomValue::from(n)).unwrap();
    }

    let history = time_travel.get_history();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|s| s.entry("secret").is_none()));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_undo_all_returns_to_baseline(values in prop::collection::vec(-1000i64..1000, 1..20)) {
        let store = Arc::new(InMemoryStore::new());
        let counter = Atom::primitive("counter");
        store.set(&counter, AtomValue::from(-5000i64)).unwrap();

        let time_travel = TimeTravel::builder()
            .with_atoms([counter.clone()])
            .build(store.clone())
            .unwrap();
        time_travel.capture(Some("baseline"));

        for value in &values {
            store.set(&counter, AtomValue::from(*value)).unwrap();
            time_travel.capture(None);
        }

        for _ in 0..values.len() {
            prop_assert!(time_travel.undo());
        }
        prop_assert_eq!(value_of(&store, &counter), Some(-5000.0));
        prop_assert!(!time_travel.can_undo());

        // Undo then redo is a round trip
        prop_assert!(time_travel.redo());
        prop_assert!(time_travel.undo());
        prop_assert_eq!(value_of(&store, &counter), Some(-5000.0));
    }

    #[test]
    fn prop_history_never_exceeds_capacity(max_history in 1usize..8, captures in 0usize..30) {
        let store = Arc::new(InMemoryStore::new());
        let counter = Atom::primitive("counter");
        store.set(&counter, AtomValue::from(0)).unwrap();

        let time_travel = TimeTravel::builder()
            .with_max_history(max_history)
            .with_atoms([counter])
            .build(store)
            .unwrap();

        for n in 0..captures {
            time_travel.capture(Some(format!("c{n}").as_str()));
        }

        let history = time_travel.get_history();
        prop_assert_eq!(history.len(), captures.min(max_history));
        if captures > 0 {
            let newest = format!("c{}", captures - 1);
            prop_assert_eq!(history.last().and_then(|s| s.action()), Some(newest.as_str()));
            prop_assert_eq!(time_travel.current_index(), Some(history.len() - 1));
        }
    }
}
