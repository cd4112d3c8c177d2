use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use undolog_core::EntityId;
use undolog_harness::SharedDb;

// ============================================================================
// Several connections on one database file
// ============================================================================

#[test]
fn racing_undo_never_reverts_an_entry_twice() -> Result<(), Box<dyn std::error::Error>> {
    let db = SharedDb::new()?;
    let mut seed = db.open_host("alice")?;
    let mut boards = Vec::new();
    for i in 0..8 {
        boards.push(seed.create_board(&format!("Board {i}"))?);
    }

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        // Open on this thread so schema setup never races.
        let mut host = db.open_host("alice")?;
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            host.undo(8)
        }));
    }

    let mut undone = Vec::new();
    for handle in handles {
        let report = handle.join().expect("undo thread panicked")?;
        assert!(report.conflict.is_none());
        undone.extend(report.undone_ids());
    }

    let unique: BTreeSet<_> = undone.iter().copied().collect();
    assert_eq!(undone.len(), 8, "every entry undone exactly once");
    assert_eq!(unique.len(), 8);
    assert_eq!(seed.undoable()?, 0);
    for board in boards {
        assert!(seed.row("board", board)?.is_none());
    }
    Ok(())
}

#[test]
fn undo_after_another_connection_finished_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
    let db = SharedDb::new()?;
    let mut first = db.open_host("alice")?;
    let mut second = db.open_host("alice")?;
    first.create_board("Single")?;

    assert_eq!(first.undo(1)?.undone.len(), 1);
    let report = second.undo(1)?;
    assert!(report.undone.is_empty());
    assert!(report.conflict.is_none());
    Ok(())
}

#[test]
fn interleaved_recording_keeps_actor_order() -> Result<(), Box<dyn std::error::Error>> {
    let db = SharedDb::new()?;
    let mut left = db.open_host("alice")?;
    let mut right = db.open_host("alice")?;

    let mut expected = Vec::new();
    for i in 0..6 {
        let host = if i % 2 == 0 { &mut left } else { &mut right };
        expected.push(host.create_board(&format!("Board {i}"))?);
    }

    let history = left.history(10)?;
    let logged: Vec<EntityId> = history.iter().rev().map(|e| e.entity_id).collect();
    assert_eq!(logged, expected);
    assert!(history.windows(2).all(|w| w[0].created_at > w[1].created_at));

    // The newest entry came from `right`, yet `left` undoes it first.
    let report = left.undo(1)?;
    assert_eq!(report.undone[0].entity_id, expected[5]);
    Ok(())
}

#[test]
fn concurrent_recorders_for_different_actors() -> Result<(), Box<dyn std::error::Error>> {
    let db = SharedDb::new()?;
    let mut handles = Vec::new();
    for actor in ["alice", "bob", "carol"] {
        let mut host = db.open_host(actor)?;
        handles.push(thread::spawn(move || -> Result<usize, undolog_engine::EngineError> {
            for i in 0..5 {
                host.create_board(&format!("{actor} {i}"))?;
            }
            Ok(host.undo(3)?.undone.len())
        }));
    }
    for handle in handles {
        assert_eq!(handle.join().expect("recorder thread panicked")?, 3);
    }

    let check = db.open_host("alice")?;
    assert_eq!(check.undoable()?, 2);
    Ok(())
}
