/// Precondition a read attempt waits for before acquiring read access.
///
/// Closures returning `bool` implement this trait directly.
pub trait ReadConstraint: Send + Sync + 'static {
	/// Returns true once the attempt may proceed.
	fn is_satisfied(&self) -> bool;

	/// Diagnostic name.
	fn name(&self) -> &str {
		std::any::type_name::<Self>()
	}
}

impl<F> ReadConstraint for F
where
	F: Fn() -> bool + Send + Sync + 'static,
{
	fn is_satisfied(&self) -> bool {
		self()
	}

	fn name(&self) -> &str {
		"closure"
	}
}
