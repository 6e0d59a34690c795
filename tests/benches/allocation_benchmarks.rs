//! # Cold-Stake Pool Benchmarks
//!
//! | Path | Work per block |
//! |------|----------------|
//! | csp-03 `allocate` | O(n) over the stake snapshot |
//! | csp-03 `RewardAllocator::apply` | snapshot read, split and one atomic ledger commit |
//! | csp-04 `plan_batches` | O(n log n) over all participants |

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use csp_01_chain_watcher::MockChainSource;
use csp_02_participant_ledger::{InMemoryKVStore, LedgerSnapshot, Participant, ParticipantLedger};
use csp_03_reward_allocator::{allocate, FeePolicy, RewardAllocator};
use csp_04_payout_scheduler::plan_batches;
use shared_types::{ParameterSchedule, ParticipantId, PoolParameters, StakeChange, StakeRewardEvent, COIN};
use std::sync::Arc;
use std::time::Duration;

const POOL_SIZES: [usize; 4] = [10, 100, 1_000, 10_000];

fn address(i: usize) -> ParticipantId {
    ParticipantId::new(format!("pcs1qbench{:06}", i))
}

fn reward_event(staker: Option<ParticipantId>) -> StakeRewardEvent {
    StakeRewardEvent {
        height: 2,
        block_hash: MockChainSource::mock_hash(2, 0),
        reward: 75_123_457,
        timestamp: 1_600_000_000,
        staker,
    }
}

// ============================================================================
// CSP-03: Pure reward split
// ============================================================================

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("csp-03-allocate");
    group.measurement_time(Duration::from_secs(5));

    for size in POOL_SIZES {
        let snapshot = LedgerSnapshot::new(
            2,
            (0..size).map(|i| (address(i), COIN + i as u64 * 7_919)),
        );
        let event = reward_event(Some(address(size / 2)));
        let policy = FeePolicy::from(&PoolParameters::default());

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("participants", size), &snapshot, |b, snapshot| {
            b.iter(|| black_box(allocate(&event, snapshot, policy)))
        });
    }

    group.finish();
}

// ============================================================================
// CSP-03: Block application against the ledger
// ============================================================================

fn bench_apply_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("csp-03-apply-block");
    group.sample_size(20);

    for size in [10usize, 100, 1_000] {
        let chain = MockChainSource::new();
        chain.push_block(
            None,
            None,
            (0..size)
                .map(|i| StakeChange::deposit(address(i), COIN))
                .collect(),
        );
        chain.push_block(Some(75_123_457), None, vec![]);
        let (deposits, rewarded) = match (chain.block_at(1), chain.block_at(2)) {
            (Some(d), Some(r)) => (d, r),
            _ => continue,
        };

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("participants", size), &rewarded, |b, rewarded| {
            b.iter_batched(
                || {
                    let ledger = Arc::new(ParticipantLedger::new(Box::new(InMemoryKVStore::new())));
                    let allocator = RewardAllocator::new(ledger, ParameterSchedule::default());
                    allocator.apply(&deposits).map(|_| allocator)
                },
                |allocator| {
                    if let Ok(allocator) = allocator {
                        black_box(allocator.apply(rewarded).is_ok());
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

// ============================================================================
// CSP-04: Payout planning
// ============================================================================

fn bench_plan_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("csp-04-plan-batches");

    for size in POOL_SIZES {
        let participants: Vec<Participant> = (0..size)
            .map(|i| Participant {
                unpaid: if i % 3 == 0 { COIN / 10 } else { COIN },
                last_payout_height: if i % 5 == 0 { Some(950) } else { None },
                ..Participant::new(address(size - i))
            })
            .collect();
        let params = PoolParameters::default();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("participants", size), &participants, |b, p| {
            b.iter(|| black_box(plan_batches(p, &params, 1_000, 100)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_allocate, bench_apply_block, bench_plan_batches);

criterion_main!(benches);
