use crate::state::{ConsensusCore, Step};
use crate::tests::support::{advance, core, drive_height};
use crate::types::hash::{decode, encode};
use crate::wal::{TimedWalMessage, WalMessage};
use std::vec::Vec;

/// Records the messages of three heights, including the end-of-height markers
/// the node would log between them.
fn recorded_run() -> (Vec<WalMessage>, Vec<crate::types::Hash>) {
    let mut c = core(1, 0);
    let mut log = Vec::new();
    let mut hashes = Vec::new();
    for h in 1..=3u64 {
        let txs = (0..h).map(|i| format!("k{}={}", h, i).into_bytes()).collect();
        let (block, commit) = drive_height(&mut c, txs, &mut log);
        hashes.push(block.hash().unwrap());
        log.push(WalMessage::EndHeight { height: h });
        let next = advance(&c, &block);
        c.enter_new_height(next, commit);
    }
    (log, hashes)
}

/// Feeds `msgs` into a fresh core the way the replay driver does, advancing
/// heights whenever a block finalizes.
fn replay(msgs: &[WalMessage]) -> ConsensusCore {
    let mut c = core(1, 0);
    for msg in msgs {
        let actions = match c.handle(msg) {
            Ok(actions) => actions,
            Err(_) => continue,
        };
        for action in actions {
            if let crate::state::Action::Finalize { block, commit } = action {
                let next = advance(&c, &block);
                c.enter_new_height(next, commit);
            }
        }
    }
    c
}

#[test]
fn test_replay_is_bit_identical() {
    let (log, _) = recorded_run();
    let a = replay(&log);
    let b = replay(&log);
    assert_eq!(a.round_state(), b.round_state());
    assert_eq!(a.chain(), b.chain());
    assert_eq!(a.height(), 4);
}

#[test]
fn test_every_prefix_replays_identically() {
    let (log, _) = recorded_run();
    for cut in 0..=log.len() {
        let a = replay(&log[..cut]);
        let b = replay(&log[..cut]);
        assert_eq!(a.round_state(), b.round_state(), "diverged at prefix {}", cut);
    }
}

#[test]
fn test_replay_survives_encoding() {
    let (log, _) = recorded_run();
    let decoded: Vec<WalMessage> = log
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            let timed = TimedWalMessage {
                time_ms: 1_700_000_000_000 + i as u64,
                msg: msg.clone(),
            };
            let bytes = encode(&timed).unwrap();
            decode::<TimedWalMessage>(&bytes).unwrap().msg
        })
        .collect();
    assert_eq!(decoded, log);
    assert_eq!(replay(&decoded).round_state(), replay(&log).round_state());
}

#[test]
fn test_block_hashes_do_not_depend_on_run() {
    let (_, first) = recorded_run();
    let (_, second) = recorded_run();
    assert_eq!(first, second);
}

#[test]
fn test_replay_stops_mid_height_in_same_step() {
    let (log, _) = recorded_run();
    // Everything up to and including the first prevote of height 1.
    let cut = log
        .iter()
        .position(|m| matches!(m, WalMessage::Event(ev) if matches!(ev.msg, crate::wal::ConsensusMessage::Vote(_))))
        .unwrap()
        + 1;
    let c = replay(&log[..cut]);
    assert_eq!(c.height(), 1);
    assert_eq!(c.round_state().step, Step::Precommit);
}
