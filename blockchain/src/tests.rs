use common::{CancelToken, GetHash};
use crypto::KeyPair;
use hardfork::HardFork;

use crate::test_definitions::*;
use crate::{BlockAddResult, ChainEvent, Error};

fn cancel() -> CancelToken {
    CancelToken::new()
}

#[test]
fn linear_extension() {
    let mut chain = test_chain();
    assert_eq!(chain.current_height(), 0);

    for expected_height in 1..=10 {
        let block = next_block(&chain, KeyPair::generate().public_key, &[]);
        let block_id = block.get_hash();
        let result = chain.add_block(block, Vec::new(), &cancel()).unwrap();
        assert_eq!(result, BlockAddResult::AddedToMain);
        assert_eq!(chain.current_height(), expected_height);
        assert_eq!(chain.tip_hash(), block_id);
    }
    assert_eq!(chain.current_cumulative_difficulty(), 11);
}

#[test]
fn resubmitting_a_known_block_is_reported() {
    let mut chain = test_chain();
    let block = next_block(&chain, KeyPair::generate().public_key, &[]);
    chain.add_block(block.clone(), Vec::new(), &cancel()).unwrap();

    assert!(matches!(
        chain.add_block(block, Vec::new(), &cancel()),
        Err(Error::AlreadyKnown)
    ));
    assert_eq!(chain.current_height(), 1);
}

#[test]
fn orphan_blocks_are_rejected_without_buffering() {
    let mut chain = test_chain();
    let mut block = next_block(&chain, KeyPair::generate().public_key, &[]);
    block.header.prev_id = crypto::cn_fast_hash(b"unknown parent");
    let block_id = block.get_hash();

    assert!(matches!(
        chain.add_block(block, Vec::new(), &cancel()),
        Err(Error::UnknownParent(_))
    ));
    // Orphans are not cached in any index
    assert!(!chain.have_block(&block_id));
}

#[test]
fn cancelled_add_leaves_the_chain_untouched() {
    let mut chain = test_chain();
    let block = next_block(&chain, KeyPair::generate().public_key, &[]);
    let token = cancel();
    token.cancel();

    assert!(matches!(
        chain.add_block(block, Vec::new(), &token),
        Err(Error::Cancelled)
    ));
    assert_eq!(chain.current_height(), 0);
}

#[test]
fn blocks_confirm_spends_and_reject_double_spends() {
    let mut chain = test_chain();
    let miners = mine_blocks(&mut chain, 12);

    // Spend the mature miner output of height 1
    let spend = spend_miner_output(&chain, &miners[0], 1, 100);
    let key_image = *spend.key_images().next().unwrap();
    let block = next_block(&chain, KeyPair::generate().public_key, &[spend.clone()]);
    chain
        .add_block(block, vec![spend.clone()], &cancel())
        .unwrap();

    assert!(chain.is_key_image_spent(&key_image));
    assert!(chain.have_tx(&spend.get_hash()));

    // A second spend of the same output fails and nothing sticks
    let height_before = chain.current_height();
    let double = spend_miner_output(&chain, &miners[0], 1, 200);
    let block = next_block(&chain, KeyPair::generate().public_key, &[double.clone()]);
    assert!(matches!(
        chain.add_block(block, vec![double.clone()], &cancel()),
        Err(Error::DoubleSpend)
    ));
    assert_eq!(chain.current_height(), height_before);
    assert!(!chain.have_tx(&double.get_hash()));
}

#[test]
fn immature_outputs_cannot_be_spent() {
    let mut chain = test_chain();
    let miners = mine_blocks(&mut chain, 5);

    // Height 5 output needs the chain at height 15
    let spend = spend_miner_output(&chain, &miners[4], 5, 100);
    let block = next_block(&chain, KeyPair::generate().public_key, &[spend.clone()]);
    assert!(matches!(
        chain.add_block(block, vec![spend], &cancel()),
        Err(Error::ConsensusInvalid("ring member is not yet mature"))
    ));
}

#[test]
fn wrong_miner_reward_is_rejected() {
    let mut chain = test_chain();
    let mut block = next_block(&chain, KeyPair::generate().public_key, &[]);
    block.miner_tx.prefix.outputs[0].amount += 1;

    assert!(matches!(
        chain.add_block(block, Vec::new(), &cancel()),
        Err(Error::ConsensusInvalid("miner transaction pays the wrong amount"))
    ));
}

#[test]
fn reorganization_switches_to_the_heavier_branch() {
    let mut chain = test_chain();
    let miners = mine_blocks(&mut chain, 12);
    let fork_point = chain.tip_hash();
    let fork_timestamp = chain.get_block_by_height(12).unwrap().header.timestamp;

    // Main chain gains B (spending miner 1) and C (spending miner 2)
    let tx_b = spend_miner_output(&chain, &miners[0], 1, 100);
    let ki_b = *tx_b.key_images().next().unwrap();
    let block_b = next_block(&chain, KeyPair::generate().public_key, &[tx_b.clone()]);
    let hash_b = block_b.get_hash();
    chain.add_block(block_b, vec![tx_b], &cancel()).unwrap();

    let tx_c = spend_miner_output(&chain, &miners[1], 2, 100);
    let block_c = next_block(&chain, KeyPair::generate().public_key, &[tx_c.clone()]);
    let hash_c = block_c.get_hash();
    chain.add_block(block_c, vec![tx_c.clone()], &cancel()).unwrap();
    assert_eq!(chain.current_height(), 14);
    chain.take_events();

    // Competing branch B'-C'-D' from the fork point; B' spends miner 2
    // like C does, which is fine on a different branch
    let tx_b2 = spend_miner_output(&chain, &miners[1], 2, 300);
    let ki_b2 = *tx_b2.key_images().next().unwrap();
    let block_b2 = build_block_on(
        fork_point,
        fork_timestamp,
        13,
        KeyPair::generate().public_key,
        &[tx_b2.clone()],
        (1, 1),
    );
    let hash_b2 = block_b2.get_hash();
    assert_eq!(
        chain
            .add_block(block_b2.clone(), vec![tx_b2], &cancel())
            .unwrap(),
        BlockAddResult::AddedToAlt
    );
    assert_eq!(chain.current_height(), 14);

    let block_c2 = build_block_on(
        hash_b2,
        block_b2.header.timestamp,
        14,
        KeyPair::generate().public_key,
        &[],
        (1, 1),
    );
    let hash_c2 = block_c2.get_hash();
    assert_eq!(
        chain
            .add_block(block_c2.clone(), Vec::new(), &cancel())
            .unwrap(),
        BlockAddResult::AddedToAlt
    );

    let block_d2 = build_block_on(
        hash_c2,
        block_c2.header.timestamp,
        15,
        KeyPair::generate().public_key,
        &[],
        (1, 1),
    );
    let hash_d2 = block_d2.get_hash();
    assert_eq!(
        chain
            .add_block(block_d2, Vec::new(), &cancel())
            .unwrap(),
        BlockAddResult::AddedToAltAndSwitched
    );

    // The branch is now the main chain
    assert_eq!(chain.current_height(), 15);
    assert_eq!(chain.tip_hash(), hash_d2);
    assert_eq!(
        chain.get_block_by_height(13).unwrap().get_hash(),
        hash_b2
    );

    // B and C moved to the alternative index
    assert!(chain.have_block(&hash_b));
    assert!(chain.have_block(&hash_c));
    assert!(chain
        .get_alternative_blocks()
        .iter()
        .any(|block| block.get_hash() == hash_b));

    // Key image accounting follows the switch
    assert!(!chain.is_key_image_spent(&ki_b));
    assert!(chain.is_key_image_spent(&ki_b2));

    // The pool observes the detached transactions
    let events = chain.take_events();
    let detached: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            ChainEvent::BlockDetached { txs } => Some(txs),
            _ => None,
        })
        .flatten()
        .collect();
    assert!(detached.iter().any(|tx| tx.get_hash() == tx_c.get_hash()));
}

#[test]
fn failed_switch_restores_the_main_chain() {
    let mut chain = test_chain();
    let miners = mine_blocks(&mut chain, 12);
    let fork_point = chain.tip_hash();
    let fork_timestamp = chain.get_block_by_height(12).unwrap().header.timestamp;

    let tx_b = spend_miner_output(&chain, &miners[0], 1, 100);
    let ki_b = *tx_b.key_images().next().unwrap();
    let block_b = next_block(&chain, KeyPair::generate().public_key, &[tx_b.clone()]);
    chain.add_block(block_b, vec![tx_b], &cancel()).unwrap();
    let block_c = next_block(&chain, KeyPair::generate().public_key, &[]);
    let hash_c = block_c.get_hash();
    chain.add_block(block_c, Vec::new(), &cancel()).unwrap();

    // Branch with a tampered ring signature in its tip block
    let block_b2 = build_block_on(
        fork_point,
        fork_timestamp,
        13,
        KeyPair::generate().public_key,
        &[],
        (1, 1),
    );
    let hash_b2 = block_b2.get_hash();
    chain
        .add_block(block_b2.clone(), Vec::new(), &cancel())
        .unwrap();
    let block_c2 = build_block_on(
        hash_b2,
        block_b2.header.timestamp,
        14,
        KeyPair::generate().public_key,
        &[],
        (1, 1),
    );
    let hash_c2 = block_c2.get_hash();
    chain
        .add_block(block_c2.clone(), Vec::new(), &cancel())
        .unwrap();

    let mut tx_bad = spend_miner_output(&chain, &miners[1], 2, 100);
    tx_bad.signatures[0][0].r += crypto::ecc::Scalar::ONE;
    let block_d2 = build_block_on(
        hash_c2,
        block_c2.header.timestamp,
        15,
        KeyPair::generate().public_key,
        &[tx_bad.clone()],
        (1, 1),
    );
    let hash_d2 = block_d2.get_hash();

    assert!(matches!(
        chain.add_block(block_d2, vec![tx_bad], &cancel()),
        Err(Error::ConsensusInvalid("ring signature does not verify"))
    ));

    // Main chain fully restored
    assert_eq!(chain.current_height(), 14);
    assert_eq!(chain.tip_hash(), hash_c);
    assert!(chain.is_key_image_spent(&ki_b));

    // The healthy branch blocks remain alternatives, the offender is
    // remembered as invalid
    assert!(chain
        .get_alternative_blocks()
        .iter()
        .any(|block| block.get_hash() == hash_b2));
    assert!(chain
        .get_alternative_blocks()
        .iter()
        .any(|block| block.get_hash() == hash_c2));
    assert!(chain.have_block(&hash_d2));

    // Resubmitting a surviving branch block reports it as known
    let known = chain.get_alternative_blocks()[0].clone();
    assert!(matches!(
        chain.add_block(known, Vec::new(), &cancel()),
        Err(Error::AlreadyKnown)
    ));
}

#[test]
fn detach_and_reattach_is_lossless() {
    let mut chain = test_chain();
    let miners = mine_blocks(&mut chain, 12);
    let spend = spend_miner_output(&chain, &miners[0], 1, 100);
    let ki = *spend.key_images().next().unwrap();
    let block = next_block(&chain, KeyPair::generate().public_key, &[spend.clone()]);
    chain.add_block(block, vec![spend], &cancel()).unwrap();

    let tip = chain.tip_hash();
    let difficulty = chain.current_cumulative_difficulty();
    let generated = chain.already_generated_coins();

    chain.db.begin_tx().unwrap();
    let (bext, txs) = chain.pop_top_block().unwrap();
    chain
        .hardfork
        .reorganize_from(&crate::DbVersionSource(&*chain.db), 12);
    assert!(!chain.is_key_image_spent(&ki));
    assert_eq!(chain.current_height(), 12);

    chain.connect_block(&bext.block, &txs, &cancel()).unwrap();
    chain.db.commit().unwrap();

    assert_eq!(chain.tip_hash(), tip);
    assert_eq!(chain.current_cumulative_difficulty(), difficulty);
    assert_eq!(chain.already_generated_coins(), generated);
    assert!(chain.is_key_image_spent(&ki));
}

#[test]
fn version_gating_follows_the_fork_schedule() {
    let mut hardfork = HardFork::with_params(1, 4, 50, 1, 1, 10);
    hardfork.add_fork(2, 5, 1).unwrap();
    let mut chain = test_chain_with_hardfork(hardfork);

    // Heights 1..=3 vote the old version, 4..=6 vote the new one
    for version in &[(1, 1), (1, 1), (1, 1), (2, 2), (2, 2), (2, 2)] {
        let block = next_block_versioned(&chain, KeyPair::generate().public_key, &[], *version);
        chain.add_block(block, Vec::new(), &cancel()).unwrap();
    }
    assert_eq!(chain.hard_fork().get_start_height(2), 6);
    assert_eq!(chain.hard_fork().current_version(), 2);

    // Version 1 is no longer acceptable, and the rejection is not cached
    let stale = next_block_versioned(&chain, KeyPair::generate().public_key, &[], (1, 1));
    let stale_id = stale.get_hash();
    assert!(matches!(
        chain.add_block(stale, Vec::new(), &cancel()),
        Err(Error::VersionDisallowed(_))
    ));
    assert!(!chain.have_block(&stale_id));
    assert_eq!(chain.current_height(), 6);

    let current = next_block_versioned(&chain, KeyPair::generate().public_key, &[], (2, 2));
    chain.add_block(current, Vec::new(), &cancel()).unwrap();
    assert_eq!(chain.current_height(), 7);
}

#[test]
fn checkpoints_pin_the_main_chain() {
    let mut chain = test_chain();
    let good = next_block(&chain, KeyPair::generate().public_key, &[]);
    let mut checkpoints = crate::Checkpoints::new();
    checkpoints.add_checkpoint(1, good.get_hash()).unwrap();
    chain.set_checkpoints(checkpoints);

    let imposter = next_block(&chain, KeyPair::generate().public_key, &[]);
    assert!(matches!(
        chain.add_block(imposter, Vec::new(), &cancel()),
        Err(Error::ConsensusInvalid("block contradicts a checkpoint"))
    ));

    chain.add_block(good, Vec::new(), &cancel()).unwrap();
    assert_eq!(chain.current_height(), 1);
}

#[test]
fn short_history_recedes_geometrically() {
    let mut chain = test_chain();
    mine_blocks(&mut chain, 25);

    let history = chain.short_history();
    assert_eq!(history[0], chain.tip_hash());
    assert_eq!(
        *history.last().unwrap(),
        chain.get_block_by_height(0).unwrap().get_hash()
    );
    // 10 dense entries, then strides 11, 22, then genesis
    assert_eq!(history.len(), 13);
    assert_eq!(
        history[10],
        chain.get_block_by_height(15).unwrap().get_hash()
    );
    assert_eq!(
        history[11],
        chain.get_block_by_height(4).unwrap().get_hash()
    );
}

#[test]
fn locate_fork_finds_the_shared_prefix() {
    let mut chain = test_chain();
    mine_blocks(&mut chain, 25);

    let peer_history = vec![
        crypto::cn_fast_hash(b"block only the peer has"),
        chain.get_block_by_height(20).unwrap().get_hash(),
        chain.get_block_by_height(0).unwrap().get_hash(),
    ];
    let (start_height, total_height, hashes) = chain.locate_fork(&peer_history).unwrap();
    assert_eq!(start_height, 20);
    assert_eq!(total_height, 26);
    assert_eq!(hashes.len(), 6);
    assert_eq!(hashes[0], chain.get_block_by_height(20).unwrap().get_hash());

    let strangers = vec![crypto::cn_fast_hash(b"some other network")];
    assert!(chain.locate_fork(&strangers).is_err());
}

#[test]
fn random_outputs_only_offer_mature_coins() {
    let mut chain = test_chain();
    mine_blocks(&mut chain, 15);

    // Heights 0..=5 are mature at height 15
    let outputs = chain.random_outputs(TEST_REWARD, 6).unwrap();
    assert_eq!(outputs.len(), 6);
    assert!(outputs.iter().all(|(offset, _)| *offset <= 5));

    assert!(matches!(
        chain.random_outputs(TEST_REWARD, 7),
        Err(Error::NotEnoughOutputs { available: 6, .. })
    ));
    assert!(matches!(
        chain.random_outputs(999, 1),
        Err(Error::NotEnoughOutputs { available: 0, .. })
    ));
}

#[test]
fn block_template_extends_the_tip() -> Result<(), Error> {
    let mut chain = test_chain();
    let miners = mine_blocks(&mut chain, 12);

    let spend = spend_miner_output(&chain, &miners[0], 1, 100);
    let template = chain.create_block_template(KeyPair::generate().public_key, &[spend.clone()])?;

    assert_eq!(template.header.prev_id, chain.tip_hash());
    assert_eq!(template.tx_hashes, vec![spend.get_hash()]);
    // Reward plus the selected fee
    assert_eq!(template.miner_tx.output_amount(), Some(TEST_REWARD + 100));

    chain
        .add_block(template, vec![spend], &cancel())
        .unwrap();
    assert_eq!(chain.current_height(), 13);
    Ok(())
}
