//! Per-round DKG session state.
//!
//! The session is the stateful counterpart of the round's DKG phases: it
//! holds the quorum's suite public keys, this participant's dealing
//! polynomial, the commits broadcast by every dealer, and the verified shares
//! received through deals. Finalizing yields the distributed key share and
//! the master public key.
//!
//! Commit verification rule: a deal is accepted only if its embedded
//! commitment vector equals the dealer's previously stored commits
//! element-wise, and the decrypted share verifies against that vector.

use std::collections::BTreeMap;

use bls12_381::{G2Affine, G2Projective, Scalar};
use group::Curve;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use coldsign_types::G2Point;

use crate::deal::{decrypt_share, encrypt_share, Deal};
use crate::error::DkgError;
use crate::feldman::{verify_share, SecretPolynomial};

/// A verifier's verdict on one dealer's deal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealResponse {
    pub dealer: u32,
    pub verifier: u32,
    pub approved: bool,
}

/// Output of a finalized session.
#[derive(Clone, Debug)]
pub struct DistKeyShare {
    /// This participant's index.
    pub index: u32,
    /// The secret share: sum of every dealer's share for this participant.
    pub share: Scalar,
    /// Element-wise sum of all dealers' commitment polynomials.
    pub commitments: Vec<G2Point>,
    /// The group public key, the constant term of the summed polynomial.
    pub master_public_key: G2Point,
}

/// One participant's view of a running DKG round.
pub struct DkgSession {
    round_id: String,
    participant_index: u32,
    threshold: u32,
    suite_secret: Scalar,
    pubkeys: BTreeMap<u32, G2Affine>,
    polynomial: Option<SecretPolynomial>,
    own_commitments: Option<Vec<G2Point>>,
    commits: BTreeMap<u32, Vec<G2Point>>,
    received_shares: BTreeMap<u32, Scalar>,
    dist_share: Option<DistKeyShare>,
}

impl DkgSession {
    pub fn new(
        round_id: impl Into<String>,
        participant_index: u32,
        threshold: u32,
        pubkeys: BTreeMap<u32, G2Affine>,
        suite_secret: Scalar,
    ) -> Self {
        Self {
            round_id: round_id.into(),
            participant_index,
            threshold,
            pubkeys,
            suite_secret,
            polynomial: None,
            own_commitments: None,
            commits: BTreeMap::new(),
            received_shares: BTreeMap::new(),
            dist_share: None,
        }
    }

    pub fn round_id(&self) -> &str {
        &self.round_id
    }

    pub fn participant_index(&self) -> u32 {
        self.participant_index
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Draw this participant's dealing polynomial from `rng` and return the
    /// commitment vector to broadcast.
    ///
    /// The caller seeds `rng` per round, so the polynomial (and with it the
    /// whole session) is reproducible under operation-log replay.
    pub fn generate_commits<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Vec<G2Point> {
        let polynomial = SecretPolynomial::dealing(self.threshold, rng);
        let commitments = polynomial.commitments();

        self.polynomial = Some(polynomial);
        self.own_commitments = Some(commitments.clone());
        self.commits.insert(self.participant_index, commitments.clone());
        commitments
    }

    /// Record the commits a dealer broadcast.
    pub fn store_commits(&mut self, dealer: u32, commits: Vec<G2Point>) -> Result<(), DkgError> {
        for commit in &commits {
            if G2Affine::from_compressed(&commit.0).is_none().into() {
                return Err(DkgError::InvalidG2Point);
            }
        }
        self.commits.insert(dealer, commits);
        Ok(())
    }

    /// Produce one deal per participant, the dealer's own index included, so
    /// every node sees the same per-phase quorum shape.
    pub fn make_deals<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<BTreeMap<u32, Deal>, DkgError> {
        let polynomial = self.polynomial.as_ref().ok_or(DkgError::ProtocolIncomplete)?;
        let commitments = self
            .own_commitments
            .as_ref()
            .ok_or(DkgError::ProtocolIncomplete)?;

        let mut deals = BTreeMap::new();
        for (recipient, pubkey) in &self.pubkeys {
            let share = polynomial.share_for(*recipient);
            deals.insert(
                *recipient,
                Deal {
                    dealer: self.participant_index,
                    recipient: *recipient,
                    commitments: commitments.clone(),
                    encrypted_share: encrypt_share(pubkey, &share, rng)?,
                },
            );
        }
        Ok(deals)
    }

    /// Verify and absorb a deal addressed to this participant.
    pub fn process_deal(&mut self, deal: &Deal) -> Result<DealResponse, DkgError> {
        if deal.recipient != self.participant_index {
            return Err(DkgError::WrongRecipient {
                expected: self.participant_index,
                got: deal.recipient,
            });
        }

        let stored = self
            .commits
            .get(&deal.dealer)
            .ok_or(DkgError::MissingCommits(deal.dealer))?;
        if *stored != deal.commitments {
            return Err(DkgError::CommitMismatch(deal.dealer));
        }

        let share = decrypt_share(&self.suite_secret, &deal.encrypted_share)?;
        if !verify_share(&share, self.participant_index, &deal.commitments) {
            return Err(DkgError::InvalidShare(deal.dealer));
        }

        self.received_shares.insert(deal.dealer, share);
        Ok(DealResponse {
            dealer: deal.dealer,
            verifier: self.participant_index,
            approved: true,
        })
    }

    /// Absorb a verifier's response bundle; any complaint fails the round.
    pub fn process_responses(&self, responses: &[DealResponse]) -> Result<(), DkgError> {
        for response in responses {
            if !response.approved {
                return Err(DkgError::ComplaintReceived {
                    dealer: response.dealer,
                    verifier: response.verifier,
                });
            }
        }
        Ok(())
    }

    /// Combine the received shares into the distributed key share.
    pub fn finalize(&mut self) -> Result<&DistKeyShare, DkgError> {
        if self.dist_share.is_some() {
            return Ok(self.dist_share.as_ref().unwrap());
        }
        if self.received_shares.len() != self.pubkeys.len()
            || self.commits.len() != self.pubkeys.len()
        {
            return Err(DkgError::ProtocolIncomplete);
        }

        let share: Scalar = self.received_shares.values().sum();

        // Element-wise sum of every dealer's commitment polynomial.
        let mut summed = vec![G2Projective::identity(); self.threshold as usize];
        for commits in self.commits.values() {
            if commits.len() != summed.len() {
                return Err(DkgError::ProtocolIncomplete);
            }
            for (sum, commit) in summed.iter_mut().zip(commits) {
                let point = G2Affine::from_compressed(&commit.0)
                    .into_option()
                    .ok_or(DkgError::InvalidG2Point)?;
                *sum += G2Projective::from(point);
            }
        }
        let commitments: Vec<G2Point> = summed
            .iter()
            .map(|point| G2Point(point.to_affine().to_compressed()))
            .collect();
        let master_public_key = commitments
            .first()
            .cloned()
            .ok_or(DkgError::ProtocolIncomplete)?;

        self.dist_share = Some(DistKeyShare {
            index: self.participant_index,
            share,
            commitments,
            master_public_key,
        });
        Ok(self.dist_share.as_ref().unwrap())
    }

    pub fn dist_share(&self) -> Option<&DistKeyShare> {
        self.dist_share.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bls::{partial_sign, recover_signature, verify_signature};
    use ff::Field;
    use rand::rngs::OsRng;

    const N: u32 = 3;
    const THRESHOLD: u32 = 2;

    fn run_dkg() -> Vec<DkgSession> {
        let mut rng = OsRng;

        let secrets: Vec<Scalar> = (0..N).map(|_| Scalar::random(&mut rng)).collect();
        let pubkeys: BTreeMap<u32, G2Affine> = secrets
            .iter()
            .enumerate()
            .map(|(i, s)| (i as u32, (G2Projective::generator() * s).to_affine()))
            .collect();

        let mut sessions: Vec<DkgSession> = (0..N)
            .map(|i| {
                DkgSession::new("round-1", i, THRESHOLD, pubkeys.clone(), secrets[i as usize])
            })
            .collect();

        // Commits phase: everyone broadcasts, everyone stores.
        let all_commits: Vec<Vec<G2Point>> = sessions
            .iter_mut()
            .map(|s| s.generate_commits(&mut rng))
            .collect();
        for session in sessions.iter_mut() {
            for (dealer, commits) in all_commits.iter().enumerate() {
                session.store_commits(dealer as u32, commits.clone()).unwrap();
            }
        }

        // Deals phase: addressed delivery, self-deal included.
        let all_deals: Vec<BTreeMap<u32, Deal>> =
            sessions.iter().map(|s| s.make_deals(&mut rng).unwrap()).collect();
        for (recipient, session) in sessions.iter_mut().enumerate() {
            for deals in &all_deals {
                let response = session.process_deal(&deals[&(recipient as u32)]).unwrap();
                assert!(response.approved);
            }
        }

        for session in sessions.iter_mut() {
            session.finalize().unwrap();
        }
        sessions
    }

    #[test]
    fn test_all_participants_agree_on_the_master_key() {
        let sessions = run_dkg();
        let reference = sessions[0].dist_share().unwrap().master_public_key.clone();
        for session in &sessions {
            assert_eq!(session.dist_share().unwrap().master_public_key, reference);
        }
    }

    #[test]
    fn test_threshold_of_shares_signs_under_the_master_key() {
        let sessions = run_dkg();
        let master = sessions[0].dist_share().unwrap().master_public_key.clone();
        let master_pub = G2Affine::from_compressed(&master.0).unwrap();
        let payload = b"jointly signed payload";

        let partials: Vec<(u32, bls12_381::G1Affine)> = sessions
            .iter()
            .take(THRESHOLD as usize)
            .map(|s| {
                let share = s.dist_share().unwrap();
                (share.index, partial_sign(&share.share, payload))
            })
            .collect();

        let signature = recover_signature(&partials, THRESHOLD as usize).unwrap();
        assert!(verify_signature(&master_pub, payload, &signature));
    }

    #[test]
    fn test_mismatched_deal_commitments_are_rejected() {
        let mut rng = OsRng;
        let sessions = &mut run_dkg();

        // A deal whose embedded commitments differ from the stored broadcast
        // commits by one point.
        let mut deals = sessions[1].make_deals(&mut rng).unwrap();
        let tampered = deals.get_mut(&0).unwrap();
        tampered.commitments[0] = G2Point(G2Affine::generator().to_compressed());

        let err = sessions[0].process_deal(tampered).unwrap_err();
        assert!(matches!(err, DkgError::CommitMismatch(1)));
    }

    #[test]
    fn test_deal_for_another_recipient_is_rejected() {
        let mut rng = OsRng;
        let sessions = &mut run_dkg();
        let deals = sessions[1].make_deals(&mut rng).unwrap();

        let err = sessions[0].process_deal(&deals[&2]).unwrap_err();
        assert!(matches!(err, DkgError::WrongRecipient { expected: 0, got: 2 }));
    }

    #[test]
    fn test_complaint_fails_the_responses_phase() {
        let sessions = run_dkg();
        let err = sessions[0]
            .process_responses(&[DealResponse { dealer: 1, verifier: 2, approved: false }])
            .unwrap_err();
        assert!(matches!(err, DkgError::ComplaintReceived { dealer: 1, verifier: 2 }));
    }

    #[test]
    fn test_finalize_requires_all_shares() {
        let mut session = DkgSession::new(
            "round-1",
            0,
            THRESHOLD,
            BTreeMap::from([(0, G2Affine::generator())]),
            Scalar::ONE,
        );
        assert!(matches!(session.finalize(), Err(DkgError::ProtocolIncomplete)));
    }
}
