//! The global tokio runtime backing every FFI call.
//!
//! Sessions spawn workers and timers, so any entry point that touches them
//! must be inside this runtime's context.

use std::sync::LazyLock;

use tokio::runtime::Runtime;

static RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.thread_name("moq-mgr")
		.build()
		.expect("failed to build runtime")
});

pub(crate) fn runtime() -> &'static Runtime {
	&RUNTIME
}
