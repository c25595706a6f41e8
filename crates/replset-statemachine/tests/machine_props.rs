//! Property tests over random transition graphs

use proptest::prelude::*;
use replset_statemachine::{Guard, InMemoryRecordStore, Machine, MachineError, NoopStep, StateRecord};
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::sync::Arc;

fn name(i: usize) -> String {
    format!("S{i}")
}

fn machine(steps: usize, edges: &[(usize, usize, bool)], store: Arc<InMemoryRecordStore>) -> Machine<(), Infallible> {
    let mut machine = Machine::new(NoopStep::new(name(0)), store);
    for i in 1..steps {
        machine.add_step(NoopStep::new(name(i)));
    }
    for (from, to, holds) in edges {
        machine.add_transition(&name(from % steps), &name(to % steps), Guard::from_bool(*holds));
    }
    machine
}

fn graph() -> impl Strategy<Value = (usize, Vec<(usize, usize, bool)>)> {
    (2usize..7).prop_flat_map(|steps| {
        let edge = (0..steps, 0..steps, any::<bool>());
        (Just(steps), prop::collection::vec(edge, 0..16))
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().build().unwrap()
}

proptest! {
    #[test]
    fn history_never_repeats_a_step((steps, edges) in graph()) {
        let store = Arc::new(InMemoryRecordStore::new());
        let machine = machine(steps, &edges, Arc::clone(&store));

        runtime().block_on(async {
            for _ in 0..steps * 3 {
                let before = store.current();
                match machine.reconcile(&mut ()).await {
                    Ok(outcome) => prop_assert!(outcome.completed),
                    Err(e) => {
                        prop_assert!(
                            matches!(e, MachineError::Cycle(_) | MachineError::NoTransition(_)),
                            "{e}"
                        );
                        prop_assert_eq!(store.current(), before);
                        machine.reset().await.unwrap();
                        prop_assert_eq!(store.current(), Some(StateRecord::start(name(0))));
                    }
                }
            }
            Ok(())
        })?;

        for record in store.saves() {
            let distinct: BTreeSet<&String> = record.state_history.iter().collect();
            prop_assert_eq!(distinct.len(), record.state_history.len(), "{:?}", record.state_history);
            prop_assert_eq!(record.state_history.first(), Some(&name(0)));
            prop_assert_eq!(record.state_history.last(), Some(&record.current_state));
            prop_assert!(record.state_history.iter().all(|s| record.is_completed(s)));
        }
    }

    #[test]
    fn first_holding_guard_wins(holds in prop::collection::vec(any::<bool>(), 1..6)) {
        let store = Arc::new(InMemoryRecordStore::new());
        let edges: Vec<(usize, usize, bool)> =
            holds.iter().enumerate().map(|(i, h)| (0, i + 1, *h)).collect();
        let machine = machine(holds.len() + 1, &edges, Arc::clone(&store));

        let expected = holds.iter().position(|h| *h).map(|i| name(i + 1));
        let chosen = machine
            .next_step(&(), &StateRecord::start(name(0)))
            .map(str::to_string);
        prop_assert_eq!(chosen, expected);
    }
}
