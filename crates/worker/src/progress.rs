use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Lifetime handle for work that must stop once its owner goes away.
///
/// Disposing is idempotent. Children are disposed together with their parent.
#[derive(Debug, Clone, Default)]
pub struct Disposable {
	token: CancellationToken,
}

impl Disposable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Marks this handle and all children as disposed.
	pub fn dispose(&self) {
		self.token.cancel();
	}

	/// Returns true once [`Disposable::dispose`] ran on this handle or an ancestor.
	pub fn is_disposed(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Creates a handle disposed whenever `self` is.
	pub fn child(&self) -> Self {
		Self {
			token: self.token.child_token(),
		}
	}

	/// Future resolving once disposed.
	pub async fn disposed(&self) {
		self.token.cancelled().await;
	}
}

#[derive(Debug, Default, Clone, PartialEq)]
struct ProgressState {
	text: Option<String>,
	fraction: f64,
	indeterminate: bool,
}

struct ProgressInner {
	cancel: CancellationToken,
	state: Mutex<ProgressState>,
	/// Updates are mirrored here when this indicator wraps another.
	parent: Option<ProgressIndicator>,
	/// Wrappers that receive updates made on this indicator.
	children: Mutex<Vec<Weak<ProgressInner>>>,
}

impl ProgressInner {
	fn push_down(&self, apply: &dyn Fn(&mut ProgressState)) {
		let children: Vec<_> = {
			let mut children = self.children.lock();
			children.retain(|child| child.strong_count() > 0);
			children.iter().filter_map(Weak::upgrade).collect()
		};
		for child in children {
			apply(&mut *child.state.lock());
			child.push_down(apply);
		}
	}
}

/// Cancellable progress reporting for long-running work.
///
/// Cloning yields another handle to the same indicator.
#[derive(Clone)]
pub struct ProgressIndicator {
	inner: Arc<ProgressInner>,
}

impl fmt::Debug for ProgressIndicator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("ProgressIndicator")
			.field("text", &state.text)
			.field("fraction", &state.fraction)
			.field("canceled", &self.is_canceled())
			.field("wrapped", &self.inner.parent.is_some())
			.finish()
	}
}

impl Default for ProgressIndicator {
	fn default() -> Self {
		Self::new()
	}
}

impl ProgressIndicator {
	pub fn new() -> Self {
		Self::with_parts(CancellationToken::new(), ProgressState::default(), None)
	}

	fn with_parts(cancel: CancellationToken, state: ProgressState, parent: Option<ProgressIndicator>) -> Self {
		Self {
			inner: Arc::new(ProgressInner {
				cancel,
				state: Mutex::new(state),
				parent,
				children: Mutex::new(Vec::new()),
			}),
		}
	}

	/// Creates an indicator mirrored with `self`.
	///
	/// The wrapper starts from the current state of `self`. Text, fraction and
	/// indeterminate updates then flow both ways: updates on the wrapper reach
	/// `self` and its ancestors, updates on `self` reach every live wrapper.
	/// Cancelling `self` cancels the wrapper; cancelling the wrapper leaves `self`
	/// running.
	pub fn wrap(&self) -> Self {
		let seed = self.inner.state.lock().clone();
		let wrapper = Self::with_parts(self.inner.cancel.child_token(), seed, Some(self.clone()));
		self.inner.children.lock().push(Arc::downgrade(&wrapper.inner));
		wrapper
	}

	pub fn cancel(&self) {
		self.inner.cancel.cancel();
	}

	pub fn is_canceled(&self) -> bool {
		self.inner.cancel.is_cancelled()
	}

	/// Token cancelled together with this indicator.
	pub fn token(&self) -> CancellationToken {
		self.inner.cancel.clone()
	}

	fn update(&self, apply: impl Fn(&mut ProgressState)) {
		apply(&mut *self.inner.state.lock());
		let mut ancestor = self.inner.parent.as_ref();
		while let Some(parent) = ancestor {
			apply(&mut *parent.inner.state.lock());
			ancestor = parent.inner.parent.as_ref();
		}
		self.inner.push_down(&apply);
	}

	pub fn set_text(&self, text: impl Into<String>) {
		let text = text.into();
		self.update(|state| state.text = Some(text.clone()));
	}

	pub fn text(&self) -> Option<String> {
		self.inner.state.lock().text.clone()
	}

	/// Sets completion in `0.0..=1.0`; values outside are clamped.
	pub fn set_fraction(&self, fraction: f64) {
		let fraction = fraction.clamp(0.0, 1.0);
		self.update(|state| {
			state.fraction = fraction;
			state.indeterminate = false;
		});
	}

	pub fn fraction(&self) -> f64 {
		self.inner.state.lock().fraction
	}

	pub fn set_indeterminate(&self, indeterminate: bool) {
		self.update(|state| state.indeterminate = indeterminate);
	}

	pub fn is_indeterminate(&self) -> bool {
		self.inner.state.lock().indeterminate
	}
}
