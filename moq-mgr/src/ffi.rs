//! The C ABI for the manager.
//!
//! Handles are boxed [Session]s; all asynchronous work runs on the global
//! runtime, so none of these functions block on the network. Errors are
//! reported through the result codes plus [moq_mgr_get_last_error].

use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Mutex;

use moq_core::SessionMode;
use moq_quic::{ClientConfig, Log};

use crate::runtime::runtime;
use crate::{BroadcastConfig, Session, SessionConfig, SubscriptionConfig};

/// Result codes for FFI functions.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MoqMgrResult {
	Success = 0,
	ErrorInvalidParameter = -1,
	ErrorNotConnected = -2,
	ErrorAlreadyConnected = -3,
	ErrorInternal = -4,
}

/// Opaque handle to a manager session.
pub struct MoqMgrSession {
	session: Session,
}

/// Error callback: `(message, user_data)`. The message is NUL-terminated
/// and only valid for the duration of the call.
pub type MoqMgrErrorCallback = extern "C" fn(*const c_char, *mut c_void);

/// Status callback: `(message, user_data)`. Same lifetime rules as above.
pub type MoqMgrStatusCallback = extern "C" fn(*const c_char, *mut c_void);

/// Data callback: `(data, length, user_data)`. The buffer is only valid for
/// the duration of the call.
pub type MoqMgrDataCallback = extern "C" fn(*const u8, usize, *mut c_void);

// Callbacks are invoked from worker threads; the caller promised us the
// user_data pointer is safe to use from any of them.
#[derive(Clone, Copy)]
struct UserData(*mut c_void);
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

static LAST_ERROR: Mutex<Option<CString>> = Mutex::new(None);

fn set_last_error(message: impl ToString) {
	let message = CString::new(message.to_string()).unwrap_or_default();
	*LAST_ERROR.lock().unwrap() = Some(message);
}

fn parse_c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
	if ptr.is_null() {
		return None;
	}
	unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Initialize the library. Idempotent; call once at process start.
#[no_mangle]
pub extern "C" fn moq_mgr_init() -> MoqMgrResult {
	Log::default().init();
	MoqMgrResult::Success
}

/// Select the global log level: "trace", "debug", "info", "warn", "error".
///
/// Only effective once, before any other logging configuration.
#[no_mangle]
pub extern "C" fn moq_mgr_set_log_level(level: *const c_char) -> MoqMgrResult {
	let Some(level) = parse_c_str(level) else {
		return MoqMgrResult::ErrorInvalidParameter;
	};

	match Log::parse(level) {
		Ok(log) => {
			log.init();
			MoqMgrResult::Success
		}
		Err(err) => {
			set_last_error(err);
			MoqMgrResult::ErrorInvalidParameter
		}
	}
}

/// Create a new manager session.
///
/// - `server_url`: the MoQ relay, e.g. `https://relay.example.com:4443`
/// - `namespace`: the broadcast path to publish or subscribe to
/// - `mode`: 0 = publish-only, 1 = subscribe-only, 2 = both
/// - `reconnect`: non-zero to reconnect after a connection failure
///
/// Returns null on invalid parameters.
#[no_mangle]
pub extern "C" fn moq_mgr_session_create(
	server_url: *const c_char,
	namespace: *const c_char,
	mode: i32,
	reconnect: i32,
) -> *mut MoqMgrSession {
	moq_mgr_session_create_with_bind(server_url, namespace, mode, reconnect, std::ptr::null())
}

/// Like [moq_mgr_session_create], with an explicit UDP bind address such as
/// `0.0.0.0:0` to force IPv4. Null selects the default (`[::]:0`).
#[no_mangle]
pub extern "C" fn moq_mgr_session_create_with_bind(
	server_url: *const c_char,
	namespace: *const c_char,
	mode: i32,
	reconnect: i32,
	bind_addr: *const c_char,
) -> *mut MoqMgrSession {
	let Some(server_url) = parse_c_str(server_url) else {
		set_last_error("server_url is null or not UTF-8");
		return std::ptr::null_mut();
	};
	let Some(namespace) = parse_c_str(namespace) else {
		set_last_error("namespace is null or not UTF-8");
		return std::ptr::null_mut();
	};
	if namespace.is_empty() {
		set_last_error("namespace is empty");
		return std::ptr::null_mut();
	}

	let server_url = match server_url.parse() {
		Ok(url) => url,
		Err(err) => {
			set_last_error(format!("invalid server_url: {}", err));
			return std::ptr::null_mut();
		}
	};

	let mode = match SessionMode::try_from(mode) {
		Ok(mode) => mode,
		Err(_) => {
			set_last_error(format!("invalid mode: {}", mode));
			return std::ptr::null_mut();
		}
	};

	let mut client_config = ClientConfig::default();
	if !bind_addr.is_null() {
		let Some(bind) = parse_c_str(bind_addr) else {
			set_last_error("bind_addr is not UTF-8");
			return std::ptr::null_mut();
		};
		match bind.parse() {
			Ok(bind) => client_config.bind = bind,
			Err(err) => {
				set_last_error(format!("invalid bind_addr: {}", err));
				return std::ptr::null_mut();
			}
		}
	}

	let config = SessionConfig {
		server_url,
		namespace: namespace.to_string(),
		reconnect_on_failure: reconnect != 0,
		client_config,
	};

	let session = Session::new(config, mode);
	Box::into_raw(Box::new(MoqMgrSession { session }))
}

fn with_session<F>(session: *mut MoqMgrSession, f: F) -> MoqMgrResult
where
	F: FnOnce(&Session) -> MoqMgrResult,
{
	if session.is_null() {
		return MoqMgrResult::ErrorInvalidParameter;
	}

	// Enter the runtime so the session may spawn workers.
	let _guard = runtime().enter();
	f(unsafe { &(*session).session })
}

/// Set the error callback, invoked from internal worker threads.
#[no_mangle]
pub extern "C" fn moq_mgr_session_set_error_callback(
	session: *mut MoqMgrSession,
	callback: MoqMgrErrorCallback,
	user_data: *mut c_void,
) -> MoqMgrResult {
	with_session(session, |session| {
		let user_data = UserData(user_data);
		session.set_error_callback(move |message| {
			let user_data = user_data;
			let message = CString::new(message).unwrap_or_default();
			callback(message.as_ptr(), user_data.0);
		});
		MoqMgrResult::Success
	})
}

/// Set the status callback, invoked from internal worker threads.
#[no_mangle]
pub extern "C" fn moq_mgr_session_set_status_callback(
	session: *mut MoqMgrSession,
	callback: MoqMgrStatusCallback,
	user_data: *mut c_void,
) -> MoqMgrResult {
	with_session(session, |session| {
		let user_data = UserData(user_data);
		session.set_status_callback(move |message| {
			let user_data = user_data;
			let message = CString::new(message).unwrap_or_default();
			callback(message.as_ptr(), user_data.0);
		});
		MoqMgrResult::Success
	})
}

/// Request a subscription (consumer mode). Should precede
/// [moq_mgr_session_start]; the worker starts once the track appears in the
/// published catalog.
#[no_mangle]
pub extern "C" fn moq_mgr_session_add_subscription(
	session: *mut MoqMgrSession,
	track_name: *const c_char,
	callback: MoqMgrDataCallback,
	user_data: *mut c_void,
) -> MoqMgrResult {
	let Some(track_name) = parse_c_str(track_name) else {
		return MoqMgrResult::ErrorInvalidParameter;
	};
	if track_name.is_empty() {
		return MoqMgrResult::ErrorInvalidParameter;
	}
	let track_name = track_name.to_string();

	with_session(session, |session| {
		let user_data = UserData(user_data);
		session.add_subscription(SubscriptionConfig {
			track_name,
			data_callback: std::sync::Arc::new(move |data: &[u8]| {
				let user_data = user_data;
				callback(data.as_ptr(), data.len(), user_data.0);
			}),
		});
		MoqMgrResult::Success
	})
}

/// Register a broadcast track (producer mode). Must precede
/// [moq_mgr_session_start].
#[no_mangle]
pub extern "C" fn moq_mgr_session_add_broadcast(
	session: *mut MoqMgrSession,
	track_name: *const c_char,
	priority: u8,
) -> MoqMgrResult {
	let Some(track_name) = parse_c_str(track_name) else {
		return MoqMgrResult::ErrorInvalidParameter;
	};
	if track_name.is_empty() {
		return MoqMgrResult::ErrorInvalidParameter;
	}
	let track_name = track_name.to_string();

	with_session(session, |session| {
		session.add_broadcast(BroadcastConfig { track_name, priority });
		MoqMgrResult::Success
	})
}

/// Publish one object (a single-frame group) on a configured broadcast
/// track. The session must be started and connected.
///
/// # Safety
/// - `data` must point to `length` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn moq_mgr_session_publish(
	session: *mut MoqMgrSession,
	track_name: *const c_char,
	data: *const u8,
	length: usize,
) -> MoqMgrResult {
	let Some(track_name) = parse_c_str(track_name) else {
		return MoqMgrResult::ErrorInvalidParameter;
	};
	if data.is_null() && length > 0 {
		return MoqMgrResult::ErrorInvalidParameter;
	}
	let payload = unsafe { std::slice::from_raw_parts(data, length) };

	with_session(session, |session| {
		if !session.is_running() {
			return MoqMgrResult::ErrorNotConnected;
		}

		let Some(producer) = session.producer(track_name) else {
			set_last_error(format!("no broadcast configured for '{}'", track_name));
			return MoqMgrResult::ErrorInvalidParameter;
		};

		match producer.write_object(payload) {
			Ok(()) => MoqMgrResult::Success,
			Err(err) => {
				set_last_error(err);
				MoqMgrResult::ErrorInternal
			}
		}
	})
}

/// Start the session: connect and bring up workers in the background.
#[no_mangle]
pub extern "C" fn moq_mgr_session_start(session: *mut MoqMgrSession) -> MoqMgrResult {
	with_session(session, |session| {
		if session.is_running() {
			return MoqMgrResult::ErrorAlreadyConnected;
		}

		let session = session.clone();
		runtime().spawn(async move {
			if let Err(err) = session.start().await {
				set_last_error(&err);
				tracing::error!(%err, "failed to start session");
			}
		});

		MoqMgrResult::Success
	})
}

/// Stop the session and all workers. Idempotent.
#[no_mangle]
pub extern "C" fn moq_mgr_session_stop(session: *mut MoqMgrSession) -> MoqMgrResult {
	with_session(session, |session| {
		session.stop();
		MoqMgrResult::Success
	})
}

/// Whether the session is currently connected: 1 or 0.
#[no_mangle]
pub extern "C" fn moq_mgr_session_is_running(session: *mut MoqMgrSession) -> i32 {
	if session.is_null() {
		return 0;
	}

	let session = unsafe { &(*session).session };
	session.is_running() as i32
}

/// Destroy the session, stopping it first.
#[no_mangle]
pub extern "C" fn moq_mgr_session_destroy(session: *mut MoqMgrSession) {
	if session.is_null() {
		return;
	}

	let _guard = runtime().enter();
	let session = unsafe { Box::from_raw(session) };
	session.session.stop();
	drop(session);
}

/// The last error message recorded by any call, or null.
///
/// The pointer is valid until the next call that records an error.
#[no_mangle]
pub extern "C" fn moq_mgr_get_last_error() -> *const c_char {
	match LAST_ERROR.lock().unwrap().as_ref() {
		Some(message) => message.as_ptr(),
		None => std::ptr::null(),
	}
}
