use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use palisade_consensus::{
    Ballot, BallotBody, BallotPool, BallotSigner, ConsensusContext, KeyPairSigner, RoundInfo,
    Stage, StaticValidatorSet, VotingConfig, VotingSession,
};
use palisade_types::BlockHash;

fn body(stage: Stage) -> BallotBody {
    BallotBody {
        height: 1_000,
        round_index: 12,
        packing_index: 3,
        round_start_time: 1_700_000_000,
        sub_round: 1,
        stage,
        candidate: BlockHash::new([9u8; 32]),
    }
}

fn ballot_codec_bench(c: &mut Criterion) {
    let signer = KeyPairSigner::from_seed(&[1u8; 32]);
    let ballot = Ballot::sign(body(Stage::One), &signer);
    let bytes = ballot.encode();

    c.bench_function("ballot_encode", |b| b.iter(|| black_box(&ballot).encode()));
    c.bench_function("ballot_decode", |b| {
        b.iter(|| Ballot::decode(black_box(&bytes)).unwrap())
    });

    let mut pool = BallotPool::new(16);
    c.bench_function("ballot_pool_decode_release", |b| {
        b.iter(|| {
            let handle = pool.decode(black_box(&bytes)).unwrap();
            pool.release(handle).unwrap();
        })
    });
}

fn session_receive_bench(c: &mut Criterion) {
    let signers: Vec<KeyPairSigner> = (1..=21u8)
        .map(|i| KeyPairSigner::from_seed(&[i; 32]))
        .collect();
    let set = StaticValidatorSet::new(signers.iter().map(|s| s.address().clone()).collect(), 67);
    let ctx = ConsensusContext::ed25519(VotingConfig::default(), Arc::new(set));
    let info = RoundInfo {
        height: 1_000,
        round_index: 12,
        packing_index: 3,
        round_start_time: 1_700_000_000,
        candidate: None,
    };
    let wire: Vec<Vec<u8>> = signers
        .iter()
        .map(|s| Ballot::sign(body(Stage::One), s).encode())
        .collect();

    c.bench_function("session_receive_21_ballots", |b| {
        b.iter(|| {
            let mut session = VotingSession::new(&ctx, info).unwrap();
            for bytes in &wire {
                let _ = session.receive_bytes(black_box(bytes));
            }
            session
        })
    });
}

criterion_group!(benches, ballot_codec_bench, session_receive_bench);
criterion_main!(benches);
