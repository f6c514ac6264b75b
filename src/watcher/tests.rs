//! Unit tests for the state watcher.

use std::sync::Mutex;

use super::*;
use crate::compute::ComputeError;
use crate::compute::LifecycleState::{Running, Starting, Stopped};
use crate::test_support::ScriptedComputeApi;
use rstest::rstest;

const TICK: Duration = Duration::from_secs(1);

fn instance(id: &str) -> InstanceHandle {
    InstanceHandle::new(id, format!("vm-{id}"), "tenancy")
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<StateChangeEvent>>>,
}

impl Recorder {
    fn events(&self) -> Vec<StateChangeEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn callback(&self) -> impl StateCallback {
        let events = Arc::clone(&self.events);
        move |event: &StateChangeEvent| -> Result<(), CallbackError> {
            events
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(event.clone());
            Ok(())
        }
    }
}

fn watcher(api: &ScriptedComputeApi) -> StateWatcher {
    StateWatcher::new(Arc::new(api.clone()))
}

async fn advance(ticks: u32, extra: Duration) {
    tokio::time::sleep(TICK * ticks + extra).await;
}

#[tokio::test(start_paused = true)]
async fn fires_once_per_steady_transition() {
    let api = ScriptedComputeApi::new();
    api.push_states("a", [Stopped, Stopped, Running, Running, Running]);
    let recorder = Recorder::default();

    let handle = watcher(&api)
        .watch([instance("a")], [Running], TICK, recorder.callback())
        .unwrap_or_else(|err| panic!("watch: {err}"));
    advance(5, Duration::from_millis(500)).await;
    handle.stop().await;

    assert_eq!(api.state_calls("a"), 5);
    assert_eq!(
        recorder.events(),
        vec![StateChangeEvent {
            instance: instance("a"),
            previous: Some(Stopped),
            current: Running,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn first_observation_in_target_state_fires() {
    let api = ScriptedComputeApi::new();
    api.push_states("a", [Running]);
    let recorder = Recorder::default();

    let handle = watcher(&api)
        .watch([instance("a")], [Running], TICK, recorder.callback())
        .unwrap_or_else(|err| panic!("watch: {err}"));
    advance(3, Duration::from_millis(500)).await;
    handle.stop().await;

    let events = recorder.events();
    assert_eq!(events.len(), 1);
    assert!(events.iter().all(|event| event.previous.is_none()));
}

#[tokio::test(start_paused = true)]
async fn query_failure_of_one_instance_does_not_block_others() {
    let api = ScriptedComputeApi::new();
    api.push_states("a", [Stopped]);
    api.push_state_error(
        "a",
        ComputeError::Provider {
            message: String::from("throttled"),
        },
    );
    api.push_states("a", [Stopped]);
    api.push_states("b", [Stopped, Running]);
    let recorder = Recorder::default();

    let handle = watcher(&api)
        .watch(
            [instance("a"), instance("b")],
            [Running],
            TICK,
            recorder.callback(),
        )
        .unwrap_or_else(|err| panic!("watch: {err}"));
    advance(2, Duration::from_millis(500)).await;
    handle.stop().await;

    assert_eq!(
        recorder.events(),
        vec![StateChangeEvent {
            instance: instance("b"),
            previous: Some(Stopped),
            current: Running,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn no_callbacks_after_cancel() {
    let api = ScriptedComputeApi::new();
    api.push_states("a", [Stopped, Running, Stopped, Running, Stopped, Running]);
    let recorder = Recorder::default();

    let handle = watcher(&api)
        .watch([instance("a")], [Running], TICK, recorder.callback())
        .unwrap_or_else(|err| panic!("watch: {err}"));
    advance(2, Duration::from_millis(500)).await;
    handle.cancel();
    let calls_at_cancel = api.state_calls("a");
    advance(6, Duration::ZERO).await;

    assert!(handle.is_cancelled());
    assert!(handle.is_finished());
    assert_eq!(recorder.events().len(), 1);
    assert_eq!(api.state_calls("a"), calls_at_cancel);
}

#[tokio::test(start_paused = true)]
async fn cancelled_query_stops_the_loop() {
    let api = ScriptedComputeApi::new();
    api.push_states("a", [Stopped]);
    api.push_state_error("a", ComputeError::Cancelled);
    api.push_states("a", [Running]);
    let recorder = Recorder::default();

    let handle = watcher(&api)
        .watch([instance("a")], [Running], TICK, recorder.callback())
        .unwrap_or_else(|err| panic!("watch: {err}"));
    advance(5, Duration::ZERO).await;

    assert!(handle.is_finished());
    assert_eq!(api.state_calls("a"), 2);
    assert!(recorder.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failing_callback_does_not_stop_polling() {
    let api = ScriptedComputeApi::new();
    api.push_states("a", [Starting, Running, Stopped, Running]);
    let fired = Arc::new(Mutex::new(0_u32));
    let counter = Arc::clone(&fired);

    let handle = watcher(&api)
        .watch(
            [instance("a")],
            [Running],
            TICK,
            move |_event: &StateChangeEvent| -> Result<(), CallbackError> {
                let mut count = counter
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                *count += 1;
                if *count == 1 {
                    return Err("downstream unavailable".into());
                }
                Ok(())
            },
        )
        .unwrap_or_else(|err| panic!("watch: {err}"));
    advance(4, Duration::from_millis(500)).await;
    handle.stop().await;

    assert_eq!(
        *fired
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn panicking_callback_is_isolated() {
    let api = ScriptedComputeApi::new();
    api.push_states("a", [Running]);
    api.push_states("b", [Running]);
    let recorder = Recorder::default();
    let inner = recorder.callback();

    let handle = watcher(&api)
        .watch(
            [instance("a"), instance("b")],
            [Running],
            TICK,
            move |event: &StateChangeEvent| -> Result<(), CallbackError> {
                assert_ne!(event.instance.id, "a", "callback rejects instance a");
                inner.on_change(event)
            },
        )
        .unwrap_or_else(|err| panic!("watch: {err}"));
    advance(1, Duration::from_millis(500)).await;
    handle.stop().await;

    let ids: Vec<_> = recorder
        .events()
        .into_iter()
        .map(|event| event.instance.id)
        .collect();
    assert_eq!(ids, vec![String::from("b")]);
}

#[rstest]
#[case::no_resources(Vec::new(), vec![Running], TICK, WatchError::NoResources)]
#[case::no_targets(vec![instance("a")], Vec::new(), TICK, WatchError::NoTargetStates)]
#[case::zero_interval(vec![instance("a")], vec![Running], Duration::ZERO, WatchError::ZeroInterval)]
#[tokio::test]
async fn rejects_empty_or_degenerate_watches(
    #[case] resources: Vec<InstanceHandle>,
    #[case] targets: Vec<LifecycleState>,
    #[case] interval: Duration,
    #[case] expected: WatchError,
) {
    let api = ScriptedComputeApi::new();
    let recorder = Recorder::default();

    let Err(err) = watcher(&api).watch(resources, targets, interval, recorder.callback()) else {
        panic!("watch should be rejected");
    };

    assert_eq!(err, expected);
}
