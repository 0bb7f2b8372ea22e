//! End-to-end tests for the threshold-signature coordinator.
//!
//! Each test wires real clients over a shared in-memory log against real
//! air-gapped machines over in-memory key stores, and walks full rounds:
//! DKG to master key, crash-replay, Byzantine drops, commit mismatches, and
//! threshold signing with reconstruction.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bls12_381::{G1Affine, G2Affine};

    use coldsign_airgapped::{Machine, MemoryKeyValueStore};
    use coldsign_client::{Client, InMemoryKeyStore, InMemoryState, KeyStore, State};
    use coldsign_dkg::verify_signature;
    use coldsign_fsm::requests::{
        SignatureProposalParticipantsEntry, SignatureProposalParticipantsListRequest,
    };
    use coldsign_fsm::{dkg_proposal, signature_proposal, signing_proposal};
    use coldsign_storage::{InMemoryLog, LogStorage};
    use coldsign_types::G2Point;

    const ENCRYPTION_KEY: [u8; 32] = [0x42; 32];

    struct TestNode {
        username: String,
        state: Arc<InMemoryState>,
        client: Client,
        machine: Machine,
    }

    fn setup_nodes(n: usize, keystore: &InMemoryKeyStore, log: &InMemoryLog) -> Vec<TestNode> {
        (0..n)
            .map(|i| {
                let username = format!("node-{i}");
                let state = Arc::new(InMemoryState::new());
                let client = Client::new(
                    &username,
                    keystore,
                    Box::new(state.clone()),
                    Box::new(log.clone()),
                )
                .unwrap();
                let machine = Machine::new(
                    Arc::new(MemoryKeyValueStore::new()),
                    ENCRYPTION_KEY.to_vec(),
                    &username,
                )
                .unwrap();
                TestNode { username, state, client, machine }
            })
            .collect()
    }

    fn init_proposal_body(
        keystore: &InMemoryKeyStore,
        nodes: &[TestNode],
        threshold: u32,
    ) -> Vec<u8> {
        let request = SignatureProposalParticipantsListRequest {
            participants: nodes
                .iter()
                .map(|node| SignatureProposalParticipantsEntry {
                    addr: node.username.clone(),
                    pub_key: keystore
                        .load_keys(&node.username)
                        .unwrap()
                        .public_bytes()
                        .to_vec(),
                    dkg_pub_key: vec![],
                })
                .collect(),
            signing_threshold: threshold,
            created_at: chrono::Utc::now(),
        };
        serde_json::to_vec(&request).unwrap()
    }

    fn poll_all(nodes: &mut [TestNode]) {
        for node in nodes.iter_mut() {
            node.client.poll_once().unwrap();
        }
    }

    /// Run every pending operation through the node's air-gapped machine and
    /// feed the processed copy back.
    fn pump(node: &mut TestNode) {
        for (_, operation) in node.client.operations().unwrap() {
            let processed = node.machine.process(&operation).unwrap();
            node.client.handle_processed_operation(processed).unwrap();
        }
    }

    fn pump_all(nodes: &mut [TestNode]) {
        for node in nodes.iter_mut() {
            pump(node);
        }
    }

    /// Poll and pump until no node makes progress.
    fn drain(nodes: &mut [TestNode]) {
        loop {
            let mut progressed = false;
            for node in nodes.iter_mut() {
                let before = node.state.load_offset().unwrap();
                node.client.poll_once().unwrap();
                if node.state.load_offset().unwrap() != before {
                    progressed = true;
                }
                if !node.client.operations().unwrap().is_empty() {
                    pump(node);
                    progressed = true;
                }
            }
            if !progressed {
                return;
            }
        }
    }

    fn fsm_json(node: &TestNode, round_id: &str) -> serde_json::Value {
        let dump = node.client.fsm_dump(round_id).unwrap().expect("round snapshot");
        serde_json::from_slice(&dump).unwrap()
    }

    fn fsm_state(node: &TestNode, round_id: &str) -> String {
        fsm_json(node, round_id)["state"].as_str().unwrap().to_owned()
    }

    fn master_key_of(node: &TestNode, round_id: &str) -> Vec<u8> {
        let json = fsm_json(node, round_id);
        serde_json::from_value(json["payload"]["dkg_proposal"]["quorum"]["0"]["master_key"].clone())
            .unwrap()
    }

    /// Run a full DKG for `n` nodes and return everything plus the round id.
    fn completed_dkg(
        n: usize,
        threshold: u32,
        keystore: &InMemoryKeyStore,
        log: &InMemoryLog,
    ) -> (Vec<TestNode>, String) {
        let mut nodes = setup_nodes(n, keystore, log);
        let round_id = nodes[0]
            .client
            .start_dkg(&init_proposal_body(keystore, &nodes, threshold))
            .unwrap();
        drain(&mut nodes);
        (nodes, round_id)
    }

    #[test]
    fn test_happy_path_dkg_four_nodes() {
        let keystore = InMemoryKeyStore::new();
        let log = InMemoryLog::new();
        let (nodes, round_id) = completed_dkg(4, 2, &keystore, &log);

        let reference = master_key_of(&nodes[0], &round_id);
        assert!(!reference.is_empty());

        for node in &nodes {
            // Master key collected, signing machine parked at idle.
            assert_eq!(
                fsm_state(node, &round_id),
                signing_proposal::STATE_SIGNING_IDLE.as_str()
            );
            assert_eq!(master_key_of(node, &round_id), reference);
            // Every quorum entry derived the same key.
            let json = fsm_json(node, &round_id);
            let quorum = json["payload"]["dkg_proposal"]["quorum"].as_object().unwrap();
            assert_eq!(quorum.len(), 4);
            for entry in quorum.values() {
                let key: Vec<u8> = serde_json::from_value(entry["master_key"].clone()).unwrap();
                assert_eq!(key, reference);
            }
            // No operation left behind.
            assert!(node.client.operations().unwrap().is_empty());
        }
    }

    #[test]
    fn test_crash_replay_is_idempotent_and_keeps_one_operation() {
        let keystore = InMemoryKeyStore::new();
        let log = InMemoryLog::new();
        let mut nodes = setup_nodes(4, &keystore, &log);
        let round_id = nodes[0]
            .client
            .start_dkg(&init_proposal_body(&keystore, &nodes, 2))
            .unwrap();

        // Walk to the commits phase: init, participation confirmations.
        poll_all(&mut nodes);
        pump_all(&mut nodes);
        poll_all(&mut nodes);
        assert_eq!(
            fsm_state(&nodes[3], &round_id),
            dkg_proposal::STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS.as_str()
        );

        // Node 3 "crashed" after persisting the commits operation but before
        // the offset: roll the offset back and replay the last message.
        let offset = nodes[3].state.load_offset().unwrap();
        nodes[3].state.save_offset(offset - 1).unwrap();
        nodes[3].client.poll_once().unwrap();

        // The replayed confirmation is dropped, the offset catches up, and
        // exactly one operation exists for the current await state.
        assert_eq!(nodes[3].state.load_offset().unwrap(), offset);
        assert_eq!(
            fsm_state(&nodes[3], &round_id),
            dkg_proposal::STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS.as_str()
        );
        let operations = nodes[3].client.operations().unwrap();
        assert_eq!(operations.len(), 1);
        assert_eq!(
            operations.values().next().unwrap().op_type,
            dkg_proposal::STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS.as_str()
        );

        // The round still completes.
        drain(&mut nodes);
        for node in &nodes {
            assert_eq!(
                fsm_state(node, &round_id),
                signing_proposal::STATE_SIGNING_IDLE.as_str()
            );
        }
    }

    #[test]
    fn test_corrupted_signature_is_skipped_without_fsm_mutation() {
        let keystore = InMemoryKeyStore::new();
        let log = InMemoryLog::new();
        let mut nodes = setup_nodes(4, &keystore, &log);
        let round_id = nodes[0]
            .client
            .start_dkg(&init_proposal_body(&keystore, &nodes, 2))
            .unwrap();
        poll_all(&mut nodes);

        // Nodes 0..3 confirm normally; node 3's confirmation arrives with a
        // corrupted signature.
        for node in nodes.iter_mut().take(3) {
            pump(node);
        }
        let operation = nodes[3].client.operations().unwrap().into_values().next().unwrap();
        let mut forged = nodes[3].machine.process_operation(&operation).unwrap().remove(0);
        forged.sender_addr = nodes[3].username.clone();
        forged.signature = vec![0u8; 64];
        log.send(forged).unwrap();

        poll_all(&mut nodes);
        let offset_before = nodes[0].state.load_offset().unwrap();
        let dump_before = nodes[0].client.fsm_dump(&round_id).unwrap().unwrap();

        // The bad message was consumed: offset points past the whole log,
        // no state machine moved, no operation appeared beyond the pending
        // participation one.
        assert_eq!(offset_before, log.len());
        assert_eq!(
            fsm_state(&nodes[0], &round_id),
            signature_proposal::STATE_AWAIT_PARTICIPANTS_CONFIRMATIONS.as_str()
        );

        // Replays of the corrupt message change nothing.
        nodes[0].state.save_offset(offset_before - 1).unwrap();
        nodes[0].client.poll_once().unwrap();
        assert_eq!(nodes[0].state.load_offset().unwrap(), offset_before);
        assert_eq!(
            nodes[0].client.fsm_dump(&round_id).unwrap().unwrap(),
            dump_before
        );

        // A properly signed confirmation completes the proposal.
        pump(&mut nodes[3]);
        drain(&mut nodes);
        for node in &nodes {
            assert_eq!(
                fsm_state(node, &round_id),
                signing_proposal::STATE_SIGNING_IDLE.as_str()
            );
        }
    }

    #[test]
    fn test_commit_mismatch_cancels_the_deal_phase() {
        let keystore = InMemoryKeyStore::new();
        let log = InMemoryLog::new();
        let mut nodes = setup_nodes(4, &keystore, &log);
        let round_id = nodes[0]
            .client
            .start_dkg(&init_proposal_body(&keystore, &nodes, 2))
            .unwrap();

        // Walk to the deals phase.
        poll_all(&mut nodes);
        pump_all(&mut nodes);
        poll_all(&mut nodes);
        pump_all(&mut nodes);
        poll_all(&mut nodes);
        assert_eq!(
            fsm_state(&nodes[1], &round_id),
            dkg_proposal::STATE_DKG_DEALS_AWAIT_CONFIRMATIONS.as_str()
        );

        // Node 1 deals honestly everywhere except to node 0, where the
        // embedded commitments differ from its broadcast commits by one
        // point.
        let operation = nodes[1].client.operations().unwrap().into_values().next().unwrap();
        let mut messages = nodes[1].machine.process_operation(&operation).unwrap();
        for message in &mut messages {
            if message.recipient_addr == "node-0" {
                let mut request: coldsign_fsm::requests::DkgProposalDealConfirmationRequest =
                    serde_json::from_slice(&message.data).unwrap();
                let mut deal: coldsign_dkg::Deal = serde_json::from_slice(&request.deal).unwrap();
                deal.commitments[0] = G2Point(G2Affine::generator().to_compressed());
                request.deal = serde_json::to_vec(&deal).unwrap();
                message.data = serde_json::to_vec(&request).unwrap();
            }
        }
        let mut processed = operation.clone();
        processed.result_msgs = messages;
        nodes[1].client.handle_processed_operation(processed).unwrap();

        drain(&mut nodes);

        // Node 0 detected the mismatch while producing responses and
        // broadcast a per-deal error; every node canceled the deal phase
        // and recorded the faulty dealer.
        for node in &nodes {
            assert_eq!(
                fsm_state(node, &round_id),
                dkg_proposal::STATE_DKG_DEALS_AWAIT_CANCELED.as_str()
            );
        }
        let json = fsm_json(&nodes[2], &round_id);
        let dealer = &json["payload"]["dkg_proposal"]["quorum"]["1"];
        assert_eq!(dealer["status"], "ConfirmationError");
        assert!(dealer["error"].as_str().unwrap().contains("commit"));
    }

    #[test]
    fn test_signing_after_dkg_reconstructs_a_verifiable_signature() {
        let keystore = InMemoryKeyStore::new();
        let log = InMemoryLog::new();
        let (mut nodes, round_id) = completed_dkg(4, 2, &keystore, &log);

        let payload = b"withdrawal request #1".to_vec();
        let signing_id = nodes[0]
            .client
            .propose_sign_message(&round_id, payload.clone())
            .unwrap();
        drain(&mut nodes);

        let master_key = master_key_of(&nodes[0], &round_id);
        let master_pub =
            G2Affine::from_compressed(&master_key.as_slice().try_into().unwrap()).unwrap();

        for node in &nodes {
            // Every node persisted the reconstructed signature.
            let signatures = node.client.signatures(&round_id).unwrap();
            let list = signatures.get(&signing_id).expect("signature stored");
            let reconstructed = list
                .iter()
                .find(|s| !s.signature.is_empty())
                .expect("reconstructed record");
            assert_eq!(reconstructed.username, "node-0");
            assert_eq!(reconstructed.src_payload, payload);

            let signature = G1Affine::from_compressed(
                &reconstructed.signature.as_slice().try_into().unwrap(),
            )
            .unwrap();
            assert!(verify_signature(&master_pub, &payload, &signature));

            // The signing machine restarted for the next session.
            assert_eq!(
                fsm_state(node, &round_id),
                signing_proposal::STATE_SIGNING_IDLE.as_str()
            );
            assert!(node.client.operations().unwrap().is_empty());
        }
    }

    #[test]
    fn test_signing_completes_with_exactly_threshold_partial_signs() {
        let keystore = InMemoryKeyStore::new();
        let log = InMemoryLog::new();
        let (mut nodes, round_id) = completed_dkg(4, 2, &keystore, &log);

        let payload = b"withdrawal request #2".to_vec();
        let signing_id = nodes[0]
            .client
            .propose_sign_message(&round_id, payload.clone())
            .unwrap();

        // Everyone confirms participation, but only t = 2 of the 4 nodes
        // ever produce a partial sign; nodes 2 and 3 stay silent.
        poll_all(&mut nodes);
        for node in nodes.iter_mut().skip(1) {
            pump(node);
        }
        poll_all(&mut nodes);
        pump(&mut nodes[0]);
        pump(&mut nodes[1]);
        poll_all(&mut nodes);
        pump(&mut nodes[0]);
        poll_all(&mut nodes);

        let master_key = master_key_of(&nodes[0], &round_id);
        let master_pub =
            G2Affine::from_compressed(&master_key.as_slice().try_into().unwrap()).unwrap();

        for node in &nodes {
            let signatures = node.client.signatures(&round_id).unwrap();
            let list = signatures.get(&signing_id).expect("signature stored");
            let reconstructed = list
                .iter()
                .find(|s| !s.signature.is_empty())
                .expect("reconstructed record");

            let signature = G1Affine::from_compressed(
                &reconstructed.signature.as_slice().try_into().unwrap(),
            )
            .unwrap();
            assert!(verify_signature(&master_pub, &payload, &signature));
            assert_eq!(
                fsm_state(node, &round_id),
                signing_proposal::STATE_SIGNING_IDLE.as_str()
            );
        }

        // The silent nodes still hold their unprocessed partial-sign
        // operations; reconstruction did not need them.
        assert!(!nodes[2].client.operations().unwrap().is_empty());
        assert!(!nodes[3].client.operations().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_confirmation_is_a_noop_on_every_node() {
        let keystore = InMemoryKeyStore::new();
        let log = InMemoryLog::new();
        let mut nodes = setup_nodes(4, &keystore, &log);
        let round_id = nodes[0]
            .client
            .start_dkg(&init_proposal_body(&keystore, &nodes, 2))
            .unwrap();

        // Walk to the commits phase and let node 1 confirm its commit.
        poll_all(&mut nodes);
        pump_all(&mut nodes);
        poll_all(&mut nodes);
        pump(&mut nodes[1]);
        poll_all(&mut nodes);

        // Node 1's commit confirmation is broadcast a second time.
        let commit_message = log
            .get_messages(0)
            .unwrap()
            .into_iter()
            .rev()
            .find(|m| m.event == dkg_proposal::EVENT_DKG_COMMIT_CONFIRMATION_RECEIVED.as_str())
            .unwrap();
        log.send(commit_message).unwrap();

        let dump_before = nodes[2].client.fsm_dump(&round_id).unwrap().unwrap();
        let offset_before = nodes[2].state.load_offset().unwrap();
        poll_all(&mut nodes);

        // Second receipt leaves the payload untouched but the offset moves.
        assert_eq!(
            nodes[2].client.fsm_dump(&round_id).unwrap().unwrap(),
            dump_before
        );
        assert_eq!(nodes[2].state.load_offset().unwrap(), offset_before + 1);
        assert_eq!(
            fsm_state(&nodes[2], &round_id),
            dkg_proposal::STATE_DKG_COMMITS_AWAIT_CONFIRMATIONS.as_str()
        );

        // The round still completes.
        drain(&mut nodes);
        for node in &nodes {
            assert_eq!(
                fsm_state(node, &round_id),
                signing_proposal::STATE_SIGNING_IDLE.as_str()
            );
        }
    }

    #[test]
    fn test_replay_from_genesis_reproduces_identical_snapshots() {
        let keystore = InMemoryKeyStore::new();
        let log = InMemoryLog::new();
        let (mut nodes, round_id) = completed_dkg(4, 2, &keystore, &log);
        nodes[0]
            .client
            .propose_sign_message(&round_id, b"replayed payload".to_vec())
            .unwrap();
        drain(&mut nodes);

        // A fresh node with the same identity consumes the whole log from
        // offset zero.
        let replica_state = Arc::new(InMemoryState::new());
        let replica = Client::new(
            "node-0",
            &keystore,
            Box::new(replica_state.clone()),
            Box::new(log.clone()),
        )
        .unwrap();
        replica.poll_once().unwrap();

        let original = nodes[0].client.fsm_dump(&round_id).unwrap().unwrap();
        let replayed = replica.fsm_dump(&round_id).unwrap().unwrap();
        assert_eq!(original, replayed);

        // The replica also rebuilt the signature store.
        assert_eq!(
            replica.signatures(&round_id).unwrap(),
            nodes[0].client.signatures(&round_id).unwrap()
        );
    }
}
