pub mod inspect;
pub mod search;
pub mod timeline;
pub mod verify;

use cairn_kernel::wal::{ConsensusMessage, WalMessage};

/// Short kind name and one-line detail for a logged message.
pub fn describe(msg: &WalMessage) -> (&'static str, String) {
    match msg {
        WalMessage::Event(ev) => {
            let from = if ev.peer.is_local() {
                "self".to_string()
            } else {
                ev.peer.0.clone()
            };
            match &ev.msg {
                ConsensusMessage::Proposal(p) => (
                    "proposal",
                    format!(
                        "r{} block {} by {} pol {:?} from {}",
                        p.round,
                        p.block_id.hash,
                        p.proposer,
                        p.pol_round,
                        from
                    ),
                ),
                ConsensusMessage::Vote(v) => (
                    "vote",
                    format!(
                        "{:?} r{} {} by {} from {}",
                        v.vote_type,
                        v.round,
                        v.block_id.map_or("nil".to_string(), |id| id.hash.to_string()),
                        v.validator,
                        from
                    ),
                ),
                ConsensusMessage::BlockPart { round, part, .. } => (
                    "part",
                    format!("r{} part {} ({} bytes) from {}", round, part.index, part.bytes.len(), from),
                ),
            }
        }
        WalMessage::Timeout(ti) => ("timeout", format!("r{} {} after {}ms", ti.round, ti.step, ti.duration_ms)),
        WalMessage::EndHeight { height } => ("end-height", format!("height {} complete", height)),
    }
}

pub fn format_ms(ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(ms as i64)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
