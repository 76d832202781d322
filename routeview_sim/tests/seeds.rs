//! Scenario invariants across many seeds.

use proptest::prelude::*;
use routeview_sim::scenarios::ScenarioId;
use routeview_sim::{AssetProfile, RouteProfile, ScenarioRunner, SimConfig, SimEvent, SimWorld};
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn flaky_playback_never_stalls(seed in any::<u64>(), records in 2usize..150) {
        let result = ScenarioRunner::new(seed, records).run(ScenarioId::FlakyImages);
        prop_assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn seeks_and_pauses_keep_invariants(
        seed in any::<u64>(),
        seeks in prop::collection::vec((0.0f64..30.0, 0.0f64..1.2), 0..12),
        pause_at in prop::option::of(0.0f64..20.0),
    ) {
        let mut world = SimWorld::new(SimConfig {
            seed,
            route: RouteProfile { records: 80, gap_rate: 0.2, ..RouteProfile::default() },
            assets: AssetProfile { failure_rate: 0.1, ..AssetProfile::default() },
            batch_size: 7,
            ..SimConfig::default()
        }).unwrap();
        world.stream_route(Duration::ZERO).unwrap();
        let distance = world.route.distance;
        for (at, fraction) in seeks {
            world.schedule_at(Duration::from_secs_f64(at), SimEvent::Seek(fraction * distance));
        }
        if let Some(at) = pause_at {
            world.schedule_at(Duration::from_secs_f64(at), SimEvent::Pause);
            world.schedule_at(Duration::from_secs_f64(at + 3.0), SimEvent::Play);
        }
        world.play().unwrap();
        world.run();

        prop_assert!(world.violations().is_empty(), "{:?}", world.violations());
        prop_assert!(world.finished());
        prop_assert!(world.metrics().max_in_flight <= world.config.player.max_in_flight);
    }
}

#[test]
fn test_every_scenario_passes_on_default_route() {
    let runner = ScenarioRunner::new(2024, 400);
    for scenario in ScenarioId::all() {
        let result = runner.run(scenario);
        assert!(result.passed, "{}: {:?}", scenario, result.failure_reason);
    }
}
