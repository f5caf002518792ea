//! End-to-end voting scenarios on a four-validator set with quorum three.

use std::sync::Arc;

use palisade_consensus::{
    Ballot, BallotBody, BallotSigner, ConsensusContext, KeyPairSigner, ReceiveOutcome, RoundInfo,
    RoundKey, SessionEvent, SessionOutcome, Stage, StageOutcome, StaticValidatorSet, VotingConfig,
    VotingSession,
};
use palisade_types::BlockHash;

fn make_hash(byte: u8) -> BlockHash {
    BlockHash::new([byte; 32])
}

struct Validators {
    signers: Vec<KeyPairSigner>,
    ctx: ConsensusContext,
}

impl Validators {
    fn four() -> Self {
        let signers: Vec<KeyPairSigner> =
            (1..=4u8).map(|i| KeyPairSigner::from_seed(&[i; 32])).collect();
        let set = StaticValidatorSet::new(signers.iter().map(|s| s.address().clone()).collect(), 67);
        Self {
            ctx: ConsensusContext::ed25519(VotingConfig::default(), Arc::new(set)),
            signers,
        }
    }

    fn session_at(&self, round_index: u32) -> VotingSession {
        VotingSession::new(&self.ctx, round(round_index)).unwrap()
    }

    fn ballot(&self, who: usize, key: RoundKey, stage: Stage, candidate: BlockHash) -> Ballot {
        Ballot::sign(
            BallotBody {
                height: 100,
                round_index: key.round_index,
                packing_index: key.packing_index,
                round_start_time: 5_000,
                sub_round: key.sub_round,
                stage,
                candidate,
            },
            &self.signers[who],
        )
    }
}

fn round(round_index: u32) -> RoundInfo {
    RoundInfo {
        height: 100,
        round_index,
        packing_index: 0,
        round_start_time: 5_000,
        candidate: None,
    }
}

#[test]
fn three_voters_certify_stage_one() {
    let v = Validators::four();
    let mut session = v.session_at(1);
    let key = session.current_key();
    assert_eq!(session.quorum(), 3);

    let results: Vec<ReceiveOutcome> = (0..3)
        .map(|i| session.receive(v.ballot(i, key, Stage::One, make_hash(7))).unwrap())
        .collect();
    assert_eq!(
        results,
        vec![
            ReceiveOutcome::Accepted,
            ReceiveOutcome::Accepted,
            ReceiveOutcome::Certified(Stage::One)
        ]
    );

    let Some(StageOutcome::Certified(cert)) = session.stage_outcome(Stage::One) else {
        panic!("stage one should be certified");
    };
    assert_eq!(cert.signatures().len(), 3);
    assert_eq!(cert.candidate(), make_hash(7));
    assert!(session.current_round().stage(Stage::One).is_closed());
}

#[test]
fn split_vote_escalates_to_sub_round_two() {
    let v = Validators::four();
    let mut session = v.session_at(1);
    let key = session.current_key();
    for (i, byte) in [1u8, 1, 2, 2].into_iter().enumerate() {
        assert_eq!(
            session.receive(v.ballot(i, key, Stage::One, make_hash(byte))).unwrap(),
            ReceiveOutcome::Accepted
        );
    }
    assert_eq!(session.stage_outcome(Stage::One), None);

    let next = session.on_stage_timeout(key, Stage::One).unwrap();
    assert_eq!(next.sub_round, 2);
    assert_eq!(next.round_index, key.round_index);
    assert!(session.voted_this_round().is_empty(), "tallies restart empty");

    let (old_key, old_voters) = session.previous_rounds().last().unwrap();
    assert_eq!(*old_key, key);
    assert_eq!(old_voters.len(), 4);

    assert!(session
        .take_events()
        .contains(&SessionEvent::Escalated { from: key, to: next }));
}

#[test]
fn future_round_ballot_is_cached_then_replayed() {
    let v = Validators::four();
    let mut session = v.session_at(4);
    let ahead = RoundKey::first(5, 0);

    assert_eq!(
        session.receive(v.ballot(0, ahead, Stage::One, make_hash(5))).unwrap(),
        ReceiveOutcome::Cached
    );
    assert_eq!(session.future_rounds(), 1);
    assert!(session.voted_this_round().is_empty());

    session.begin_round(round(5)).unwrap();
    assert_eq!(session.current_key(), ahead);
    assert_eq!(session.future_rounds(), 0);
    assert!(session.has_voted(Stage::One, v.signers[0].address()));
    assert_eq!(
        session
            .current_round()
            .stage(Stage::One)
            .tally_for(&make_hash(5)),
        1
    );
}

#[test]
fn ballot_bytes_survive_decode_and_encode() {
    let v = Validators::four();
    let ballot = v.ballot(1, RoundKey::first(3, 2), Stage::Two, make_hash(0x42));
    assert!(!ballot.signature().is_empty());
    let bytes = ballot.encode();
    assert_eq!(Ballot::decode(&bytes).unwrap().encode(), bytes);
}

#[test]
fn conflicting_ballots_bifurcate_and_keep_both() {
    let v = Validators::four();
    let mut session = v.session_at(1);
    let key = session.current_key();
    session.receive(v.ballot(2, key, Stage::One, make_hash(1))).unwrap();
    session.receive(v.ballot(0, key, Stage::One, make_hash(1))).unwrap();
    session.receive(v.ballot(2, key, Stage::Two, make_hash(9))).unwrap();

    let Some(SessionOutcome::Bifurcated(evidence)) = session.outcome() else {
        panic!("expected bifurcation");
    };
    assert_eq!(&evidence.voter, v.signers[2].address());
    assert_eq!(evidence.first.candidate(), make_hash(1));
    assert_eq!(evidence.second.candidate(), make_hash(9));

    // No certificate for this round afterwards.
    assert_eq!(
        session.receive(v.ballot(1, key, Stage::One, make_hash(1))).unwrap(),
        ReceiveOutcome::Audited
    );
    assert_eq!(session.stage_outcome(Stage::One), Some(StageOutcome::Cancelled));
}

#[test]
fn late_ballots_after_confirmation_still_expose_double_signing() {
    let v = Validators::four();
    let mut session = v.session_at(1);
    let key = session.current_key();
    for stage in [Stage::One, Stage::Two] {
        for i in 0..3 {
            session.receive(v.ballot(i, key, stage, make_hash(1))).unwrap();
        }
    }
    assert!(session.is_confirmed());
    session.take_events();

    session.receive(v.ballot(1, key.next_sub_round(), Stage::One, make_hash(2))).unwrap();
    assert!(session.is_confirmed(), "confirmation stands");
    assert_eq!(session.evidence().len(), 1);
    assert!(matches!(
        session.take_events().as_slice(),
        [SessionEvent::Bifurcation(_)]
    ));
}
