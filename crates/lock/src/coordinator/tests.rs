use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::mpsc;
use std::time::Duration;

use super::*;
use crate::{impatient_reader, non_cancelable_section, prohibit_write_actions};

/// Spins until `condition` holds or a generous deadline passes.
fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
	let deadline = Instant::now() + Duration::from_secs(5);
	while Instant::now() < deadline {
		if condition() {
			return true;
		}
		thread::sleep(Duration::from_millis(1));
	}
	false
}

/// Spawns a reader that holds read access until `release` receives a message.
fn spawn_holding_reader(coordinator: &Coordinator) -> (mpsc::Sender<()>, thread::JoinHandle<()>) {
	let (held_tx, held_rx) = mpsc::channel();
	let (release_tx, release_rx) = mpsc::channel::<()>();
	let coordinator = coordinator.clone();
	let handle = thread::spawn(move || {
		let _ticket = coordinator.acquire_read().unwrap();
		held_tx.send(()).unwrap();
		let _ = release_rx.recv();
	});
	held_rx.recv().unwrap();
	(release_tx, handle)
}

#[test]
fn write_thread_reenters_read_and_write() {
	let coordinator = Coordinator::new();
	let outer = coordinator.acquire_write();
	assert!(coordinator.is_write_access_allowed());
	assert!(coordinator.is_read_access_allowed());

	let read = coordinator.acquire_read().unwrap();
	let nested = coordinator.acquire_write_for("nested");
	assert!(coordinator.has_write_action("nested"));
	assert!(coordinator.has_write_action(DEFAULT_WRITE_MARKER));
	drop(nested);
	assert!(!coordinator.has_write_action("nested"));
	assert!(coordinator.is_write_action_in_progress());

	drop(read);
	coordinator.release_write(outer);
	assert!(!coordinator.is_write_action_in_progress());
	assert_eq!(coordinator.generation(), 1);
}

#[test]
fn reader_reenters_while_write_is_pending() {
	let coordinator = Coordinator::new();
	let (entered_tx, entered_rx) = mpsc::channel();
	let (go_tx, go_rx) = mpsc::channel::<()>();
	let reader = {
		let coordinator = coordinator.clone();
		thread::spawn(move || {
			let _outer = coordinator.acquire_read().unwrap();
			entered_tx.send(()).unwrap();
			go_rx.recv().unwrap();
			let _inner = coordinator.acquire_read().unwrap();
		})
	};
	entered_rx.recv().unwrap();

	let watcher = {
		let coordinator = coordinator.clone();
		thread::spawn(move || {
			assert!(wait_until(|| coordinator.is_write_action_pending()));
			go_tx.send(()).unwrap();
		})
	};

	let ticket = coordinator.acquire_write();
	drop(ticket);
	watcher.join().unwrap();
	reader.join().unwrap();
}

#[test]
fn pending_write_blocks_new_readers() {
	let coordinator = Coordinator::new();
	let (release_first, first) = spawn_holding_reader(&coordinator);
	let late_reader_admitted = Arc::new(AtomicBool::new(false));

	let helper = {
		let coordinator = coordinator.clone();
		let admitted = Arc::clone(&late_reader_admitted);
		thread::spawn(move || {
			assert!(wait_until(|| coordinator.is_write_action_pending()));
			let late = {
				let coordinator = coordinator.clone();
				let admitted = Arc::clone(&admitted);
				thread::spawn(move || {
					let _ticket = coordinator.acquire_read().unwrap();
					admitted.store(true, Ordering::SeqCst);
				})
			};
			thread::sleep(Duration::from_millis(50));
			assert!(!admitted.load(Ordering::SeqCst), "reader admitted ahead of a pending write");
			release_first.send(()).unwrap();
			late
		})
	};

	let ticket = coordinator.acquire_write();
	thread::sleep(Duration::from_millis(20));
	assert!(!late_reader_admitted.load(Ordering::SeqCst), "reader admitted during a write");
	drop(ticket);

	let late = helper.join().unwrap();
	late.join().unwrap();
	first.join().unwrap();
	assert!(late_reader_admitted.load(Ordering::SeqCst));
}

#[test]
fn try_acquire_read_fails_while_write_pending() {
	let coordinator = Coordinator::new();
	let (release_first, first) = spawn_holding_reader(&coordinator);

	let refusal = {
		let coordinator = coordinator.clone();
		thread::spawn(move || {
			assert!(wait_until(|| coordinator.is_write_action_pending()));
			let attempt = coordinator.try_acquire_read();
			let denied = attempt.is_none();
			drop(attempt);
			release_first.send(()).unwrap();
			denied
		})
	};

	let ticket = coordinator.acquire_write();
	drop(ticket);
	assert!(refusal.join().unwrap(), "try_acquire_read succeeded while a write was pending");
	first.join().unwrap();
	assert!(coordinator.try_acquire_read().is_some());
}

#[test]
fn impatient_reader_fails_fast() {
	let coordinator = Coordinator::new();
	let ticket = coordinator.acquire_write();

	let outcome = {
		let coordinator = coordinator.clone();
		thread::spawn(move || {
			let _impatient = impatient_reader();
			coordinator.acquire_read().map(drop)
		})
		.join()
		.unwrap()
	};
	assert_eq!(outcome, Err(AccessError::CannotRead));
	drop(ticket);
}

#[test]
fn non_cancelable_section_makes_impatient_reader_wait() {
	let coordinator = Coordinator::new();
	let ticket = coordinator.acquire_write();
	let admitted = Arc::new(AtomicBool::new(false));

	let reader = {
		let coordinator = coordinator.clone();
		let admitted = Arc::clone(&admitted);
		thread::spawn(move || {
			let _impatient = impatient_reader();
			let _section = non_cancelable_section();
			let read = coordinator.acquire_read();
			admitted.store(read.is_ok(), Ordering::SeqCst);
		})
	};

	thread::sleep(Duration::from_millis(30));
	assert!(!admitted.load(Ordering::SeqCst));
	drop(ticket);
	reader.join().unwrap();
	assert!(admitted.load(Ordering::SeqCst));
}

#[test]
fn cancellable_read_observes_cancellation() {
	let coordinator = Coordinator::new();
	let ticket = coordinator.acquire_write();
	let token = CancellationToken::new();

	let reader = {
		let coordinator = coordinator.clone();
		let token = token.clone();
		thread::spawn(move || coordinator.acquire_read_cancellable(&token).map(drop))
	};

	thread::sleep(Duration::from_millis(20));
	token.cancel();
	assert_eq!(reader.join().unwrap(), Err(AccessError::Cancelled));
	drop(ticket);
}

#[test]
fn cancellable_read_succeeds_after_write() {
	let coordinator = Coordinator::new();
	let ticket = coordinator.acquire_write();
	let token = CancellationToken::new();

	let reader = {
		let coordinator = coordinator.clone();
		thread::spawn(move || coordinator.acquire_read_cancellable(&token).map(drop))
	};

	thread::sleep(Duration::from_millis(20));
	drop(ticket);
	assert_eq!(reader.join().unwrap(), Ok(()));
}

#[test]
fn write_off_designated_thread_panics() {
	let coordinator = Coordinator::new();
	let result = thread::spawn(move || {
		let _ticket = coordinator.acquire_write();
	})
	.join();
	assert!(result.is_err());
}

#[test]
#[should_panic(expected = "while holding read access")]
fn write_from_read_panics() {
	let coordinator = Coordinator::new();
	let _read = coordinator.acquire_read().unwrap();
	let _write = coordinator.acquire_write();
}

#[test]
#[should_panic(expected = "write-prohibited scope")]
fn write_inside_prohibited_scope_panics() {
	let coordinator = Coordinator::new();
	let _scope = prohibit_write_actions();
	coordinator.run_write_action(|| ());
}

#[test]
fn write_is_released_when_action_panics() {
	let coordinator = Coordinator::new();
	let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
		coordinator.run_write_action(|| panic!("boom"));
	}));
	assert!(result.is_err());
	assert!(!coordinator.is_write_action_in_progress());
	assert!(coordinator.try_acquire_read().is_some());
}

/// Panics once from the chosen write listener callback.
struct FailingListener {
	on_start: bool,
	armed: AtomicBool,
}

impl FailingListener {
	fn trip(&self, during_start: bool) {
		if self.on_start == during_start && self.armed.swap(false, Ordering::SeqCst) {
			panic!("listener failed");
		}
	}
}

impl WriteActionListener for FailingListener {
	fn before_write_action_start(&self, _marker: &'static str) {
		self.trip(false);
	}

	fn write_action_started(&self, _marker: &'static str) {
		self.trip(true);
	}
}

#[test]
fn panicking_write_listener_does_not_wedge_the_lock() {
	for on_start in [false, true] {
		let coordinator = Coordinator::new();
		coordinator.add_write_listener(Arc::new(FailingListener {
			on_start,
			armed: AtomicBool::new(true),
		}));

		let ran = AtomicBool::new(false);
		let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
			coordinator.run_write_action(|| ran.store(true, Ordering::SeqCst));
		}));
		assert!(result.is_err());
		assert!(!ran.load(Ordering::SeqCst));
		assert!(!coordinator.is_write_action_pending(), "write left pending (on_start: {on_start})");
		assert!(!coordinator.is_write_action_in_progress(), "write left held (on_start: {on_start})");

		let reader = coordinator.clone();
		let admitted = thread::spawn(move || reader.try_acquire_read().is_some()).join().unwrap();
		assert!(admitted, "reader refused after a failed write (on_start: {on_start})");
		assert_eq!(coordinator.run_write_action(|| 3), 3);
	}
}

#[derive(Default)]
struct Recorder {
	events: Mutex<Vec<String>>,
}

impl ReadActionListener for Recorder {
	fn before_read_action_start(&self) {
		self.events.lock().push("before-read".into());
	}

	fn read_action_started(&self) {
		self.events.lock().push("read-started".into());
	}

	fn read_action_finished(&self) {
		self.events.lock().push("read-finished".into());
	}

	fn after_read_action_finished(&self) {
		self.events.lock().push("after-read".into());
	}
}

impl WriteActionListener for Recorder {
	fn before_write_action_start(&self, marker: &'static str) {
		self.events.lock().push(format!("before-write:{marker}"));
	}

	fn write_action_started(&self, marker: &'static str) {
		self.events.lock().push(format!("write-started:{marker}"));
	}

	fn write_action_finished(&self, marker: &'static str) {
		self.events.lock().push(format!("write-finished:{marker}"));
	}

	fn after_write_action_finished(&self, marker: &'static str) {
		self.events.lock().push(format!("after-write:{marker}"));
	}
}

#[test]
fn listeners_observe_action_lifecycle() {
	let coordinator = Coordinator::new();
	let recorder = Arc::new(Recorder::default());
	coordinator.add_read_listener(recorder.clone());
	coordinator.add_write_listener(recorder.clone());

	coordinator.run_read_action(|| ()).unwrap();
	coordinator.run_write_action_for("edit", || {
		coordinator.run_write_action_for("inner", || ());
	});

	let events = recorder.events.lock().clone();
	assert_eq!(
		events,
		vec![
			"before-read",
			"read-started",
			"read-finished",
			"after-read",
			"before-write:edit",
			"write-started:edit",
			"write-finished:edit",
			"after-write:edit",
		]
	);

	let as_write: Arc<dyn WriteActionListener> = recorder.clone();
	coordinator.remove_write_listener(&as_write);
	coordinator.run_write_action(|| ());
	assert_eq!(recorder.events.lock().len(), events.len());
}

#[test]
fn before_write_listener_sees_pending_flag() {
	struct PendingObserver {
		coordinator: Coordinator,
		saw_pending: AtomicBool,
	}

	impl WriteActionListener for PendingObserver {
		fn before_write_action_start(&self, _marker: &'static str) {
			self.saw_pending.store(self.coordinator.is_write_action_pending(), Ordering::SeqCst);
		}
	}

	let coordinator = Coordinator::new();
	let observer = Arc::new(PendingObserver {
		coordinator: coordinator.clone(),
		saw_pending: AtomicBool::new(false),
	});
	coordinator.add_write_listener(observer.clone());
	coordinator.run_write_action(|| ());
	assert!(observer.saw_pending.load(Ordering::SeqCst));
}

#[test]
fn followups_run_after_write_releases() {
	let coordinator = Coordinator::new();
	let ran = Arc::new(AtomicUsize::new(0));

	let immediate = Arc::clone(&ran);
	coordinator.run_when_write_action_completed(move || {
		immediate.fetch_add(1, Ordering::SeqCst);
	});
	assert_eq!(ran.load(Ordering::SeqCst), 1);

	coordinator.run_write_action(|| {
		let deferred = Arc::clone(&ran);
		coordinator.run_when_write_action_completed(move || {
			deferred.fetch_add(10, Ordering::SeqCst);
		});
		assert_eq!(ran.load(Ordering::SeqCst), 1);
	});
	assert_eq!(ran.load(Ordering::SeqCst), 11);
}

#[test]
fn try_run_read_action_skips_during_write() {
	let coordinator = Coordinator::new();
	let ticket = coordinator.acquire_write();
	let skipped = {
		let coordinator = coordinator.clone();
		thread::spawn(move || coordinator.try_run_read_action(|| 42)).join().unwrap()
	};
	assert_eq!(skipped, None);
	drop(ticket);
	assert_eq!(coordinator.try_run_read_action(|| 42), Some(42));
}

#[test]
fn generation_counts_top_level_writes_only() {
	let coordinator = Coordinator::new();
	let before = coordinator.generation();
	coordinator.run_write_action(|| {
		coordinator.run_write_action(|| ());
	});
	coordinator.run_write_action(|| ());
	assert_eq!(coordinator.generation(), before + 2);
}
