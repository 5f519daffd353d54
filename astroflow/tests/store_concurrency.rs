//! Readers racing the single writer of the result store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use astroflow::core::{Detection, Observation, OrbitEstimate, ResultSnapshot, SnapshotStatus};
use astroflow::pipeline::PipelineRunner;
use astroflow::store::ResultStore;
use astroflow::testing::{fast_config, synthetic_observation};

const RUNS: u64 = 40;
const READERS: usize = 4;

#[derive(Debug)]
struct Expected {
    observation_id: String,
    status: SnapshotStatus,
    detections: Vec<Detection>,
    orbits: Vec<OrbitEstimate>,
}

fn observation(n: u64) -> Observation {
    // every third run points at a missing artifact and fails in ingest
    if n % 3 == 0 {
        Observation::new(format!("obs-{n:06}"), format!("/data/missing-{n}.fits"))
    } else {
        synthetic_observation(n)
    }
}

fn check(snapshot: &ResultSnapshot, expected: &HashMap<u64, Expected>) {
    if snapshot.is_idle() {
        assert_eq!(snapshot.sequence, 0);
        assert!(snapshot.observation_id.is_none());
        assert!(snapshot.detections.is_empty());
        return;
    }
    let want = &expected[&snapshot.sequence];
    assert_eq!(snapshot.observation_id.as_deref(), Some(want.observation_id.as_str()));
    assert_eq!(snapshot.status, want.status);
    assert_eq!(snapshot.detections, want.detections);
    assert_eq!(snapshot.orbital_elements, want.orbits);
    assert_eq!(snapshot.error.is_some(), want.status == SnapshotStatus::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_a_mix_of_two_runs() {
    let runner = PipelineRunner::reference(&fast_config()).unwrap();
    let mut runs = Vec::new();
    let mut expected = HashMap::new();
    for n in 1..=RUNS {
        let run = runner.run_sequenced(observation(n), n).await;
        expected.insert(
            n,
            Expected {
                observation_id: run.observation.id.clone(),
                status: if run.final_error().is_some() {
                    SnapshotStatus::Failed
                } else {
                    SnapshotStatus::Success
                },
                detections: run.detections().to_vec(),
                orbits: run.orbits().to_vec(),
            },
        );
        runs.push(run);
    }
    let expected = Arc::new(expected);
    let store = Arc::new(ResultStore::new());
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let expected = Arc::clone(&expected);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                let mut reads = 0_u64;
                let mut last_sequence = 0;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let snapshot = store.current();
                    check(&snapshot, &expected);
                    assert!(snapshot.sequence >= last_sequence, "sequence went backwards");
                    last_sequence = snapshot.sequence;
                    reads += 1;
                    if finished {
                        return reads;
                    }
                    if reads % 64 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();

    for run in runs {
        store.publish(run).unwrap();
        tokio::task::yield_now().await;
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        let reads = reader.await.unwrap();
        assert!(reads > 0);
    }
    let last = store.current();
    assert_eq!(last.sequence, RUNS);
    check(&last, &expected);
    assert_eq!(store.published_count(), RUNS);
}
