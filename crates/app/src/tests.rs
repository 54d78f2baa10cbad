use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use super::*;

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn binds_components_to_the_calling_thread() {
	let app = Application::new();
	assert!(app.is_dispatch_thread());
	assert!(app.coordinator().is_write_thread());
	assert!(app.modality().is_owner_thread());

	let remote = app.clone();
	let off_thread = thread::spawn(move || remote.is_dispatch_thread()).join().unwrap();
	assert!(!off_thread);
}

#[test]
fn default_modality_follows_the_caller() {
	let app = Application::new();
	let dialog = ModalEntity::new("dialog");
	app.enter_modal(&dialog);

	let local = Arc::new(AtomicBool::new(false));
	let flag = Arc::clone(&local);
	app.invoke_later(move || flag.store(true, Ordering::SeqCst), None);

	let remote_ran = Arc::new(AtomicBool::new(false));
	let flag = Arc::clone(&remote_ran);
	let remote = app.clone();
	thread::spawn(move || {
		remote.invoke_later(move || flag.store(true, Ordering::SeqCst), None);
	})
	.join()
	.unwrap();

	let report = app.flush();
	assert!(local.load(Ordering::SeqCst));
	assert!(!remote_ran.load(Ordering::SeqCst));
	assert_eq!(report.deferred, 1);

	app.leave_modal(&dialog);
	app.flush();
	assert!(remote_ran.load(Ordering::SeqCst));
}

#[test]
fn expiring_work_is_dropped() {
	let app = Application::new();
	let ran = Arc::new(AtomicBool::new(false));
	let flag = Arc::clone(&ran);
	app.invoke_later_expiring(move || flag.store(true, Ordering::SeqCst), None, || true);

	let report = app.flush();
	assert_eq!(report.expired, 1);
	assert!(!ran.load(Ordering::SeqCst));
	assert!(app.invoker().is_empty());
}

#[test]
fn read_and_write_actions_return_values() {
	let app = Application::new();
	let before = app.coordinator().generation();
	assert_eq!(app.run_write_action(|| 7), 7);
	assert_eq!(app.run_read_action(|| 5).unwrap(), 5);
	assert_eq!(app.coordinator().generation(), before + 1);
}

#[test]
fn configuration_reaches_the_scheduler() {
	let config = ApplicationConfig::default().scheduler(SchedulerConfig::default().max_unbounded_in_flight(3));
	let app = Application::with_config(config);
	assert_eq!(app.scheduler().config().max_unbounded_in_flight, 3);
	assert_eq!(app.config().scheduler.max_unbounded_in_flight, 3);
}

#[test]
fn pump_until_delivers_ui_continuations() {
	let _ = tracing_subscriber::fmt::try_init();
	let app = Application::new();
	let delivered = Arc::new(AtomicUsize::new(0));
	let sink = Arc::clone(&delivered);

	let handle = app
		.non_blocking(|_| Ok(21 * 2))
		.finish_on_ui_thread(ModalityState::non_modal(), move |value| {
			sink.store(*value, Ordering::SeqCst);
		})
		.submit_pooled()
		.unwrap();

	assert!(app.pump_until(TIMEOUT, || handle.is_done()));
	assert_eq!(delivered.load(Ordering::SeqCst), 42);
	assert_eq!(handle.take_result().unwrap().unwrap(), 42);
}

#[test]
fn pump_until_times_out_on_ineligible_work() {
	let app = Application::new();
	let dialog = ModalEntity::new("dialog");
	app.enter_modal(&dialog);
	app.invoke_later(|| {}, Some(ModalityState::non_modal()));

	assert!(!app.pump_until(Duration::from_millis(20), || false));
	assert_eq!(app.invoker().len(), 1);
	app.leave_modal(&dialog);
	assert_eq!(app.flush().executed, 1);
}
