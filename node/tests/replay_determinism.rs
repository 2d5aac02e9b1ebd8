use cairn_kernel::wal::WalMessage;
use cairn_node::errors::NodeError;
use cairn_node::fault::{FaultPoint, FaultPolicy};
use cairn_node::recovery::ReplayError;
use cairn_node::wal_writer::{FileWal, Wal};
use cairn_node::test_utils::{crash_test_config, open_node, run_node};
use std::path::Path;
use tempfile::tempdir;

fn copy_dir(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).unwrap();
    for entry in std::fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), target).unwrap();
        }
    }
}

#[test]
fn test_two_replays_of_the_same_wal_agree() {
    let reference = tempdir().unwrap();
    let clean = run_node(&crash_test_config(reference.path(), 3), FaultPolicy::Never);
    clean.result.unwrap();

    let mut replayed_messages = 0;
    for n in (1..clean.writes).step_by(3) {
        let crashed = tempdir().unwrap();
        let config = crash_test_config(crashed.path(), 3);
        let run = run_node(
            &config,
            FaultPolicy::FailAfterWrites {
                n,
                point: FaultPoint::After,
            },
        );
        assert!(run.result.is_err());

        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        copy_dir(crashed.path(), a.path());
        copy_dir(crashed.path(), b.path());

        let node_a = open_node(&crash_test_config(a.path(), 3), FaultPolicy::Never).unwrap();
        let node_b = open_node(&crash_test_config(b.path(), 3), FaultPolicy::Never).unwrap();

        assert_eq!(node_a.replay_report(), node_b.replay_report(), "fault at write {}", n);
        let core_a = node_a.engine().unwrap().core();
        let core_b = node_b.engine().unwrap().core();
        assert_eq!(core_a.round_state(), core_b.round_state(), "fault at write {}", n);
        assert_eq!(core_a.chain(), core_b.chain());
        assert_eq!(core_a.height(), node_a.block_store().height() + 1);

        replayed_messages += node_a.replay_report().messages;
    }
    assert!(replayed_messages > 0);
}

#[test]
fn test_replay_rebuilds_the_crashed_height() {
    let dir = tempdir().unwrap();
    let config = crash_test_config(dir.path(), 10);
    let run = run_node(&config, FaultPolicy::StopAtHeight(2));
    assert!(run.result.is_err());

    let node = open_node(&config, FaultPolicy::Never).unwrap();
    let report = *node.replay_report();
    assert_eq!(report.from_height, 2);
    assert_eq!(report.finalized, 0);
    assert_eq!(node.engine().unwrap().core().height(), 3);
}

#[test]
fn test_end_height_past_block_store_fails_replay() {
    let dir = tempdir().unwrap();
    let config = crash_test_config(dir.path(), 10);
    assert!(run_node(&config, FaultPolicy::StopAtHeight(2)).result.is_err());

    {
        let mut wal = FileWal::open(config.wal_file(), config.wal.clone()).unwrap();
        wal.start().unwrap();
        wal.write_sync(&WalMessage::EndHeight { height: 5 }).unwrap();
    }

    match open_node(&config, FaultPolicy::Never) {
        Err(NodeError::Replay(ReplayError::EndHeightBeyondStore { height, store_height })) => {
            assert_eq!(height, 5);
            assert_eq!(store_height, 2);
        }
        other => panic!("expected EndHeightBeyondStore, got {:?}", other.map(|_| ())),
    }
}
