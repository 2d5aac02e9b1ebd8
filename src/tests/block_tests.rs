use crate::error::KernelError;
use crate::state::TimeoutParams;
use crate::tests::support::{drive_height, genesis_state, validators};
use crate::types::{Block, Hash, Part, PartSet, ValidatorId};
use crate::state::ConsensusCore;
use std::vec::Vec;

#[test]
fn test_part_set_splits_and_reassembles() {
    let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let full = PartSet::from_data(&data, 64);
    assert_eq!(full.header().total, 16);
    assert!(full.is_complete());

    let mut rebuilt = PartSet::from_header(full.header());
    for part in full.parts().rev() {
        assert!(rebuilt.add_part(part.clone()).unwrap());
    }
    assert!(rebuilt.is_complete());
    assert_eq!(rebuilt.assemble().unwrap(), data);
}

#[test]
fn test_part_set_rejects_duplicates_and_out_of_range() {
    let full = PartSet::from_data(b"hello world", 4);
    let mut set = PartSet::from_header(full.header());
    let first = full.parts().next().unwrap().clone();
    assert!(set.add_part(first.clone()).unwrap());
    assert!(!set.add_part(first).unwrap());

    let bogus = Part { index: 99, bytes: vec![1] };
    assert!(matches!(set.add_part(bogus), Err(KernelError::InvalidPart { index: 99, .. })));
}

#[test]
fn test_part_set_detects_tampered_part() {
    let full = PartSet::from_data(b"the quick brown fox", 5);
    let mut set = PartSet::from_header(full.header());
    for part in full.parts() {
        let mut part = part.clone();
        if part.index == 1 {
            part.bytes[0] ^= 0xFF;
        }
        set.add_part(part).unwrap();
    }
    assert!(matches!(set.assemble(), Err(KernelError::PartSetMismatch { .. })));
}

#[test]
fn test_block_hash_is_stable_across_encoding() {
    let state = genesis_state(1);
    let block = state
        .make_block(1, vec![b"k=v".to_vec()], None, ValidatorId(0))
        .unwrap();
    let decoded = Block::from_bytes(&block.to_bytes().unwrap()).unwrap();
    assert_eq!(block.hash().unwrap(), decoded.hash().unwrap());
    assert_eq!(block, decoded);
}

#[test]
fn test_validate_first_block() {
    let state = genesis_state(1);
    let block = state.make_block(1, vec![], None, ValidatorId(0)).unwrap();
    assert!(state.validate_block(&block).is_ok());

    let mut wrong_app = block.clone();
    wrong_app.header.app_hash = Hash::digest(b"other");
    assert_eq!(
        state.validate_block(&wrong_app),
        Err(KernelError::InvalidBlock("wrong app hash"))
    );

    let mut wrong_height = block.clone();
    wrong_height.header.height = 2;
    assert!(matches!(
        state.validate_block(&wrong_height),
        Err(KernelError::WrongHeight { expected: 1, got: 2 })
    ));

    let unknown = state.make_block(1, vec![], None, ValidatorId(7)).unwrap();
    assert_eq!(
        state.validate_block(&unknown),
        Err(KernelError::UnknownValidator(ValidatorId(7)))
    );
}

#[test]
fn test_second_block_requires_last_commit() {
    let mut core = ConsensusCore::new(genesis_state(1), None, Some(ValidatorId(0)), TimeoutParams::default());
    let mut log = Vec::new();
    let (block, commit) = drive_height(&mut core, vec![], &mut log);
    let next = crate::tests::support::advance(&core, &block);

    let good = next
        .make_block(2, vec![], Some(commit.clone()), ValidatorId(0))
        .unwrap();
    assert!(next.validate_block(&good).is_ok());

    let missing = next.make_block(2, vec![], None, ValidatorId(0)).unwrap();
    assert_eq!(
        next.validate_block(&missing),
        Err(KernelError::InvalidBlock("missing last commit"))
    );

    let mut thin = commit;
    thin.signatures.clear();
    let no_quorum = next.make_block(2, vec![], Some(thin), ValidatorId(0)).unwrap();
    assert_eq!(
        next.validate_block(&no_quorum),
        Err(KernelError::InvalidBlock("commit without quorum"))
    );
}

#[test]
fn test_proposer_rotates_round_robin() {
    let set = validators(4);
    assert_eq!(set.proposer(1, 0), Some(ValidatorId(1)));
    assert_eq!(set.proposer(1, 1), Some(ValidatorId(2)));
    assert_eq!(set.proposer(3, 1), Some(ValidatorId(0)));
    assert_eq!(set.quorum(), 27);
}
