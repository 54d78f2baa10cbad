/// Kinds of work handed to the worker runtime, recorded on every spawn for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Background read computations on the shared pool.
	ReadAction,
	/// Jobs drained one at a time by a sequential lane.
	Sequential,
	/// Delayed resubmission after a timer fires.
	Timer,
}

impl TaskClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::ReadAction => "read_action",
			Self::Sequential => "sequential",
			Self::Timer => "timer",
		}
	}
}
