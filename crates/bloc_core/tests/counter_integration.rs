//! Integration tests for cubits and blocs driving a counter
//!
//! These tests verify that:
//! - Emissions are gated on inequality and delivered once per change
//! - Events are dispatched in the order they were added
//! - Each handled event yields at most one transition, summarizing its net effect
//! - Unhandled events and post-close operations are reported, never fatal

use bloc_core::{
    Bloc, BlocError, Broadcast, Change, Cubit, Emitter, Event, EventHooks, StateHooks,
    Subscription, Transition,
};
use std::sync::{mpsc, Arc, Mutex, Once};
use std::thread;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bloc_core=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

#[derive(Clone, Debug, PartialEq)]
enum CounterEvent {
    Increment,
    Decrement,
    Add(i32),
    Reset,
    Ping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum CounterEventKind {
    Increment,
    Decrement,
    Add,
    Reset,
    Ping,
}

impl Event for CounterEvent {
    type Kind = CounterEventKind;

    fn kind(&self) -> CounterEventKind {
        match self {
            CounterEvent::Increment => CounterEventKind::Increment,
            CounterEvent::Decrement => CounterEventKind::Decrement,
            CounterEvent::Add(_) => CounterEventKind::Add,
            CounterEvent::Reset => CounterEventKind::Reset,
            CounterEvent::Ping => CounterEventKind::Ping,
        }
    }
}

/// Records every hook invocation
#[derive(Default)]
struct Recorder {
    changes: Mutex<Vec<Change<i32>>>,
    transitions: Mutex<Vec<Transition<i32, CounterEvent>>>,
    events: Mutex<Vec<CounterEvent>>,
    errors: Mutex<Vec<String>>,
}

impl StateHooks<i32> for Recorder {
    fn on_change(&self, change: &Change<i32>) {
        self.changes.lock().unwrap().push(change.clone());
    }

    fn on_error(&self, error: &BlocError) {
        bloc_core::hooks::log_error(error);
        self.errors.lock().unwrap().push(error.to_string());
    }
}

impl EventHooks<i32, CounterEvent> for Recorder {
    fn on_event(&self, event: &CounterEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_transition(&self, transition: &Transition<i32, CounterEvent>) {
        self.transitions.lock().unwrap().push(transition.clone());
    }
}

fn increment(_: &CounterEvent, emit: &Emitter<i32>) {
    emit.emit(emit.state().unwrap_or_default() + 1);
}

fn counter_bloc() -> (Bloc<i32, CounterEvent>, Arc<Recorder>) {
    init_tracing();
    let recorder = Arc::new(Recorder::default());
    let bloc = Bloc::<i32, CounterEvent>::builder(0)
        .name("counter")
        .hooks(recorder.clone())
        .on(CounterEventKind::Increment, increment)
        .build()
        .unwrap();
    (bloc, recorder)
}

fn collect_states(stream: &Broadcast<i32>) -> (Arc<Mutex<Vec<i32>>>, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let sub = stream.listen(move |v| seen_clone.lock().unwrap().push(*v));
    (seen, sub)
}

/// Cubit at 0: emit(1) delivers 1 and Change{0, 1}; emit(1) again delivers nothing
#[test]
fn test_cubit_scenario() {
    init_tracing();
    let recorder = Arc::new(Recorder::default());
    let cubit = Cubit::builder(0i32).name("counter").hooks(recorder.clone()).build();
    let (seen, _sub) = collect_states(&cubit.stream());

    cubit.emit(1);
    assert_eq!(*seen.lock().unwrap(), vec![1]);
    assert_eq!(*recorder.changes.lock().unwrap(), vec![Change::new(0, 1)]);

    cubit.emit(1);
    assert_eq!(*seen.lock().unwrap(), vec![1]);
    assert_eq!(recorder.changes.lock().unwrap().len(), 1);
}

/// Bloc at 0: Increment yields state 1 and Transition{0, Increment, 1};
/// an unregistered kind leaves state at 1, reports, and yields no transition
#[test]
fn test_bloc_scenario() {
    let (bloc, recorder) = counter_bloc();
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let seen = transitions.clone();
    let _sub = bloc.listen_transitions(move |t| seen.lock().unwrap().push(t.clone()));

    bloc.add(CounterEvent::Increment);
    bloc.wait_idle();
    assert_eq!(bloc.state(), 1);
    assert_eq!(
        *transitions.lock().unwrap(),
        vec![Transition::new(0, CounterEvent::Increment, 1)]
    );

    bloc.add(CounterEvent::Reset);
    bloc.wait_idle();
    assert_eq!(bloc.state(), 1);
    assert_eq!(transitions.lock().unwrap().len(), 1);
    assert_eq!(
        *recorder.errors.lock().unwrap(),
        vec!["`counter` has no handler registered for event kind Reset".to_string()]
    );
    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![CounterEvent::Increment, CounterEvent::Reset]
    );
    assert_eq!(*recorder.transitions.lock().unwrap(), *transitions.lock().unwrap());
}

#[test]
fn test_events_dispatched_in_add_order() {
    let (bloc, _recorder) = counter_bloc();
    let order = Arc::new(Mutex::new(Vec::new()));
    let order_clone = order.clone();
    bloc.on(CounterEventKind::Add, move |event, emit| {
        if let CounterEvent::Add(n) = event {
            order_clone.lock().unwrap().push(*n);
            emit.emit(*n);
        }
    });

    for n in 1..=200 {
        bloc.add(CounterEvent::Add(n));
    }
    bloc.wait_idle();

    assert_eq!(*order.lock().unwrap(), (1..=200).collect::<Vec<_>>());
    assert_eq!(bloc.state(), 200);
}

#[test]
fn test_concurrent_producers_keep_per_producer_order() {
    let (bloc, _recorder) = counter_bloc();
    let order = Arc::new(Mutex::new(Vec::new()));
    let order_clone = order.clone();
    bloc.on(CounterEventKind::Add, move |event, _| {
        if let CounterEvent::Add(n) = event {
            order_clone.lock().unwrap().push(*n);
        }
    });

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let bloc = bloc.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    bloc.add(CounterEvent::Add(p * 1000 + i));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    bloc.wait_idle();

    let order = order.lock().unwrap();
    assert_eq!(order.len(), 400);
    for p in 0..4 {
        let mine: Vec<_> = order.iter().filter(|n| **n / 1000 == p).copied().collect();
        assert_eq!(mine, (0..100).map(|i| p * 1000 + i).collect::<Vec<_>>());
    }
}

#[test]
fn test_one_transition_per_handled_event() {
    let (bloc, recorder) = counter_bloc();
    bloc.on(CounterEventKind::Add, |_, emit| {
        emit.emit(5);
        emit.emit(7);
    });
    bloc.on(CounterEventKind::Ping, |_, _| {});

    bloc.add(CounterEvent::Ping);
    bloc.add(CounterEvent::Add(0));
    bloc.wait_idle();

    assert_eq!(
        *recorder.transitions.lock().unwrap(),
        vec![Transition::new(0, CounterEvent::Add(0), 7)]
    );
    assert_eq!(
        *recorder.changes.lock().unwrap(),
        vec![Change::new(0, 5), Change::new(5, 7)]
    );
}

#[test]
fn test_handler_returning_to_previous_state_has_no_transition() {
    let (bloc, recorder) = counter_bloc();
    bloc.on(CounterEventKind::Ping, |_, emit| {
        emit.emit(3);
        emit.emit(0);
    });

    bloc.add(CounterEvent::Ping);
    bloc.wait_idle();

    assert!(recorder.transitions.lock().unwrap().is_empty());
    assert_eq!(recorder.changes.lock().unwrap().len(), 2);
}

#[test]
fn test_last_registration_wins() {
    let (bloc, _recorder) = counter_bloc();
    bloc.on(CounterEventKind::Decrement, |_, emit| emit.emit(-100));
    bloc.on(CounterEventKind::Decrement, |_, emit| {
        emit.emit(emit.state().unwrap_or_default() - 1)
    });

    bloc.add(CounterEvent::Decrement);
    bloc.wait_idle();
    assert_eq!(bloc.state(), -1);
}

#[test]
fn test_post_close_operations_are_inert() {
    let (bloc, recorder) = counter_bloc();
    let (seen, sub) = collect_states(&bloc.stream());

    bloc.add(CounterEvent::Increment);
    bloc.wait_idle();
    assert!(bloc.close());
    assert!(!sub.is_active());

    bloc.add(CounterEvent::Increment);
    bloc.emit(50);
    let (late_seen, late_sub) = collect_states(&bloc.stream());
    bloc.wait_idle();

    assert_eq!(bloc.state(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![1]);
    assert!(late_seen.lock().unwrap().is_empty());
    assert!(!late_sub.is_active());
    assert_eq!(
        *recorder.errors.lock().unwrap(),
        vec![
            "cannot add on closed container `counter`".to_string(),
            "cannot emit on closed container `counter`".to_string(),
        ]
    );
    // on_event only sees events accepted while open
    assert_eq!(*recorder.events.lock().unwrap(), vec![CounterEvent::Increment]);
}

#[test]
fn test_emit_after_handler_returned_has_change_but_no_transition() {
    let (bloc, recorder) = counter_bloc();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let go_rx = Mutex::new(Some(go_rx));
    let pending = Arc::new(Mutex::new(None::<thread::JoinHandle<()>>));
    let pending_clone = pending.clone();
    bloc.on(CounterEventKind::Add, move |event, emit| {
        let CounterEvent::Add(n) = *event else {
            return;
        };
        let Some(go) = go_rx.lock().unwrap().take() else {
            return;
        };
        let emit = emit.clone();
        let worker = thread::spawn(move || {
            go.recv().unwrap();
            emit.emit(n);
        });
        *pending_clone.lock().unwrap() = Some(worker);
    });

    bloc.add(CounterEvent::Add(9));
    bloc.wait_idle();
    assert_eq!(bloc.state(), 0);

    go_tx.send(()).unwrap();
    let worker = pending.lock().unwrap().take().unwrap();
    worker.join().unwrap();

    assert_eq!(bloc.state(), 9);
    assert_eq!(*recorder.changes.lock().unwrap(), vec![Change::new(0, 9)]);
    assert!(recorder.transitions.lock().unwrap().is_empty());
}

#[test]
fn test_direct_emit_on_bloc_produces_change_only() {
    let (bloc, recorder) = counter_bloc();
    let (seen, _sub) = collect_states(&bloc.stream());

    bloc.emit(4);

    assert_eq!(*seen.lock().unwrap(), vec![4]);
    assert_eq!(*recorder.changes.lock().unwrap(), vec![Change::new(0, 4)]);
    assert!(recorder.transitions.lock().unwrap().is_empty());
}

#[test]
fn test_transition_subscribers_only_see_future_transitions() {
    let (bloc, _recorder) = counter_bloc();
    bloc.add(CounterEvent::Increment);
    bloc.wait_idle();

    let transitions = Arc::new(Mutex::new(Vec::new()));
    let seen = transitions.clone();
    let sub = bloc.listen_transitions(move |t| seen.lock().unwrap().push(t.clone()));

    bloc.add(CounterEvent::Increment);
    bloc.wait_idle();
    sub.cancel();
    bloc.add(CounterEvent::Increment);
    bloc.wait_idle();

    assert_eq!(bloc.state(), 3);
    assert_eq!(
        *transitions.lock().unwrap(),
        vec![Transition::new(1, CounterEvent::Increment, 2)]
    );
}

#[test]
fn test_shared_instance_across_subscribers() {
    let (bloc, _recorder) = counter_bloc();
    let (first, _a) = collect_states(&bloc.stream());
    let (second, _b) = collect_states(&bloc.stream());

    // A listener that only reacts to even values filters on its own side
    let evens = Arc::new(Mutex::new(Vec::new()));
    let evens_clone = evens.clone();
    let _c = bloc.listen(move |v| {
        if v % 2 == 0 {
            evens_clone.lock().unwrap().push(*v);
        }
    });

    for _ in 0..4 {
        bloc.add(CounterEvent::Increment);
    }
    bloc.wait_idle();

    assert_eq!(*first.lock().unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(*second.lock().unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(*evens.lock().unwrap(), vec![2, 4]);
}
