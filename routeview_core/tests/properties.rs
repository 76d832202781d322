//! Property tests for the playback invariants.

use proptest::prelude::*;
use routeview_core::{
    seek, AssetState, BufferEstimator, Command, InboundMessage, LatLng, PlaybackEngine, PlayerConfig,
    RecordingPresenter, Record, ResolvedAsset, Sequence, WireKind, WireRecord,
};
use routeview_env::{EnvError, FetchedAsset};

fn pano_at(at: f64, dist: f64) -> Record {
    Record::pano("p", 0.0, LatLng::new(0.0, 0.0), at, dist)
}

/// Sorted distances built from non-negative steps.
fn distances(steps: &[f64]) -> Vec<f64> {
    steps
        .iter()
        .scan(0.0, |acc, step| {
            *acc += step;
            Some(*acc)
        })
        .collect()
}

fn wire(at: f64, dist: f64) -> WireRecord {
    WireRecord {
        kind: WireKind::Pano {
            id: format!("p{}", at),
            heading: 0.0,
        },
        point: LatLng::new(0.0, 0.0),
        original_point: None,
        at_dist: at,
        dist_from_last: dist,
        prev_route_index: 0,
        start_route_index: None,
        last: false,
    }
}

/// `n` records spaced 10m apart, continuing from `next_at`.
fn batch(next_at: &mut f64, n: usize) -> Vec<WireRecord> {
    (0..n)
        .map(|_| {
            *next_at += 10.0;
            wire(*next_at, 10.0)
        })
        .collect()
}

#[derive(Debug, Clone)]
enum Op {
    /// Complete the n-th outstanding fetch (modulo count), succeeding or failing
    Complete(usize, bool),
    Seek(f64),
    FireTimers,
    Append(usize),
    Reset(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (any::<usize>(), any::<bool>()).prop_map(|(n, ok)| Op::Complete(n, ok)),
        1 => (0.0f64..2_000.0).prop_map(Op::Seek),
        2 => Just(Op::FireTimers),
        1 => (1usize..20).prop_map(Op::Append),
        1 => any::<usize>().prop_map(Op::Reset),
    ]
}

proptest! {
    #[test]
    fn seek_resolves_to_bracketing_record(
        steps in prop::collection::vec(0.0f64..50.0, 2..60),
        target in -10.0f64..3_000.0,
    ) {
        let records: Vec<Record> = distances(&steps).into_iter().map(|d| pano_at(d, 0.0)).collect();
        let n = records.len();
        let index = seek::resolve(&records, target);
        prop_assert!(index >= 0 && (index as usize) < n);
        let i = index as usize;

        if target >= records[n - 1].at_distance {
            prop_assert_eq!(i, n - 1);
        } else if target < records[0].at_distance {
            prop_assert_eq!(i, 0);
        } else {
            prop_assert!(records[i].at_distance <= target);
            prop_assert!(target < records[i + 1].at_distance);
        }
    }

    #[test]
    fn sequence_stays_ordered(
        batches in prop::collection::vec(prop::collection::vec(-5.0f64..100.0, 0..10), 1..20),
        resets in prop::collection::vec(any::<usize>(), 0..5),
    ) {
        let mut seq = Sequence::new();
        let mut resets = resets.into_iter();
        for batch in batches {
            let base = seq.last().map_or(0.0, |r| r.at_distance);
            let records = batch.iter().map(|d| pano_at(base + d, 0.0)).collect();
            let before = seq.len();
            if seq.append(records).is_err() {
                prop_assert_eq!(seq.len(), before);
            }
            if let Some(reset) = resets.next() {
                if !seq.is_empty() {
                    let keep = (reset % seq.len()) as i64;
                    seq.truncate_after(keep).unwrap();
                }
            }
            let ordered = seq.records().windows(2).all(|w| w[0].at_distance <= w[1].at_distance);
            prop_assert!(ordered);
        }
    }

    #[test]
    fn buffer_estimate_is_bounded_and_monotone(
        dists in prop::collection::vec(0.0f64..100.0, 1..40),
        ready in prop::collection::vec(any::<bool>(), 40),
        flip in 0usize..40,
        start in 0usize..40,
    ) {
        let est = BufferEstimator::new(8.0, 9.0);
        let build = |extra: Option<usize>| -> Vec<Record> {
            dists
                .iter()
                .enumerate()
                .map(|(i, &d)| {
                    let r = pano_at(i as f64, d);
                    if ready[i] || extra == Some(i) {
                        r.with_asset(AssetState::Ready(ResolvedAsset::Image("img".into())))
                    } else {
                        r
                    }
                })
                .collect()
        };
        let before = est.buffer_seconds(&build(None), start);
        let after = est.buffer_seconds(&build(Some(flip)), start);
        prop_assert!((0.0..=9.0).contains(&before));
        prop_assert!(after >= before);

        let ready_prefix: f64 = dists
            .iter()
            .enumerate()
            .skip(start)
            .take_while(|(i, _)| ready[*i])
            .map(|(_, d)| d / 8.0)
            .sum();
        prop_assert!((before - ready_prefix.min(9.0)).abs() < 1e-9);
    }

    #[test]
    fn terminal_record_fills_the_horizon(
        dists in prop::collection::vec(0.0f64..1.0, 1..10),
    ) {
        let est = BufferEstimator::new(8.0, 9.0);
        let n = dists.len();
        let records: Vec<Record> = dists
            .iter()
            .enumerate()
            .map(|(i, &d)| {
                pano_at(i as f64, d)
                    .with_asset(AssetState::Ready(ResolvedAsset::Image("img".into())))
                    .with_last(i == n - 1)
            })
            .collect();
        prop_assert_eq!(est.buffer_seconds(&records, 0), 9.0);
    }

    #[test]
    fn prefetch_respects_concurrency_and_lookahead(
        initial in 1usize..80,
        ops in prop::collection::vec(op(), 1..120),
    ) {
        let config = PlayerConfig {
            max_in_flight: 3,
            lookahead: 6,
            prefetch_batch: 4,
            max_fetch_attempts: 2,
            ..PlayerConfig::default()
        };
        let mut engine = PlaybackEngine::new(config, RecordingPresenter::new()).unwrap();
        let mut next_at = 0.0;
        engine.ingest(InboundMessage::panos(batch(&mut next_at, initial))).unwrap();
        engine.play().unwrap();

        let mut outstanding = Vec::new();
        let mut wakes = Vec::new();
        for op in ops {
            match op {
                Op::Complete(n, ok) if !outstanding.is_empty() => {
                    let (index, ticket) = outstanding.remove(n % outstanding.len());
                    let result = if ok {
                        Ok(FetchedAsset::new("img", 1))
                    } else {
                        Err(EnvError::asset("img", "503"))
                    };
                    engine.on_asset_loaded(index, ticket, result);
                }
                Op::Complete(..) => {}
                Op::Seek(d) => {
                    engine.seek(d).unwrap();
                }
                Op::FireTimers => {
                    for wake in std::mem::take(&mut wakes) {
                        engine.wake(wake);
                    }
                }
                Op::Append(n) => {
                    engine.ingest(InboundMessage::panos(batch(&mut next_at, n))).unwrap();
                }
                Op::Reset(n) => {
                    let len = engine.sequence().len();
                    if len > 0 {
                        let keep = (n % len) as i64;
                        engine.ingest(InboundMessage::reset(keep)).unwrap();
                        next_at = engine.sequence().last().map_or(0.0, |r| r.at_distance);
                    }
                }
            }

            let cursor = engine.cursor();
            for command in engine.drain_commands() {
                match command {
                    Command::Fetch { index, ticket, .. } => {
                        prop_assert!((index as i64) <= cursor + 6);
                        outstanding.push((index, ticket));
                    }
                    Command::Schedule { wake, .. } => wakes.push(wake),
                    Command::Send(_) => {}
                }
            }
            prop_assert!(engine.prefetcher().in_flight() <= 3);
            prop_assert_eq!(engine.prefetcher().in_flight(), outstanding.len());
            if cursor >= 0 {
                prop_assert!(
                    engine.prefetcher().frontier() >= cursor,
                    "frontier {} behind cursor {}",
                    engine.prefetcher().frontier(),
                    cursor
                );
            }
        }
        prop_assert!(engine.prefetcher().max_in_flight_observed() <= 3);
    }
}
