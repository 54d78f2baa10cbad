//! A dispatch-thread pump fed by background producers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use quire_invoker::LaterInvocator;
use quire_modality::{ModalEntity, ModalScope, ModalityStack, ModalityState};

#[test]
fn pump_drains_background_submissions_in_per_producer_order() {
	let _ = tracing_subscriber::fmt::try_init();
	let invoker = LaterInvocator::new(ModalityStack::new());
	let seen = Arc::new(Mutex::new(Vec::new()));

	let producers: Vec<_> = (0..3usize)
		.map(|producer| {
			let invoker = invoker.clone();
			let seen = Arc::clone(&seen);
			thread::spawn(move || {
				for index in 0..20usize {
					let seen = Arc::clone(&seen);
					invoker.invoke_later(move || seen.lock().push((producer, index)), ModalityState::non_modal());
				}
			})
		})
		.collect();

	let deadline = Instant::now() + Duration::from_secs(10);
	while seen.lock().len() < 60 && Instant::now() < deadline {
		invoker.wait_for_work(Duration::from_millis(20));
		invoker.flush();
	}
	for producer in producers {
		producer.join().unwrap();
	}

	let seen = seen.lock();
	assert_eq!(seen.len(), 60);
	for producer in 0..3 {
		let order: Vec<_> = seen.iter().filter(|(from, _)| *from == producer).map(|(_, index)| *index).collect();
		assert_eq!(order, (0..20).collect::<Vec<_>>());
	}
}

#[test]
fn closing_an_independent_scope_does_not_hold_back_primary_work() {
	let _ = tracing_subscriber::fmt::try_init();
	let stack = ModalityStack::new();
	let invoker = LaterInvocator::new(stack.clone());
	let ran = Arc::new(AtomicUsize::new(0));

	let scope = ModalScope::new("indexing");
	let indexing = ModalEntity::new("indexing-progress");
	let dialog = ModalEntity::new("dialog");

	stack.enter_modal(&dialog);
	let in_dialog = stack.current();
	stack.enter_modal_in(&scope, &indexing);

	let counter = Arc::clone(&ran);
	invoker.invoke_later(
		move || {
			counter.fetch_add(1, Ordering::SeqCst);
		},
		in_dialog,
	);
	assert_eq!(invoker.flush().executed, 1);

	stack.leave_modal_in(&scope, &indexing);
	stack.leave_modal(&dialog);
	assert_eq!(ran.load(Ordering::SeqCst), 1);
}
