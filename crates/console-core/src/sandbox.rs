// SPDX-License-Identifier: GPL-3.0

//! Script sandbox: runs user-authored JavaScript against injected host
//! bindings on the Boa engine.
//!
//! A run executes on a blocking thread and reports captured output lines
//! incrementally through an unbounded channel, so long-running scripts can be
//! traced in real time. Cancellation is cooperative: the token is observed by
//! `sleep` and before every host-function dispatch, and a synchronous loop
//! that never calls back into the host cannot be interrupted.
//!
//! Host functions bridge between JS and async Rust through JSON values; their
//! futures run on the caller's tokio runtime while the script thread blocks
//! on the result.

use crate::{
	error::SandboxError,
	lock,
	strings::sandbox::{bindings, errors, markers, prefixes},
};
use boa_engine::{
	object::{FunctionBuilder, JsArray},
	prelude::JsObject,
	property::Attribute,
	Context, JsResult, JsValue,
};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex,
	},
	time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How often `sleep` wakes up to observe cancellation.
const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// An injected host function: JSON-encoded positional arguments in, JSON
/// result or error message out.
pub type HostFn =
	Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, String>> + Send + Sync>;

/// How a finished run ended. Errors are reported separately; cancellation is
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
	/// Top-level execution finished without throwing.
	Completed,
	/// The run was cancelled before finishing.
	Stopped,
}

/// State shared between the runner task and the injected bindings.
///
/// Boa closures can only capture garbage-collectable values, so bindings
/// capture a numeric run id and look the state up here.
struct RunShared {
	cancel: CancellationToken,
	output: mpsc::UnboundedSender<String>,
	host_fns: HashMap<String, HostFn>,
	handle: tokio::runtime::Handle,
}

impl RunShared {
	/// Append an output line; suppressed once cancellation has fired.
	fn emit(&self, line: String) {
		if !self.cancel.is_cancelled() {
			let _ = self.output.send(line);
		}
	}

	/// Append a terminal marker; markers bypass post-cancel suppression.
	fn emit_marker(&self, marker: &str) {
		let _ = self.output.send(marker.to_string());
	}
}

static RUNS: Lazy<Mutex<HashMap<u64, Arc<RunShared>>>> = Lazy::new(Default::default);
static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(0);

fn run_shared(id: u64) -> Option<Arc<RunShared>> {
	lock(&RUNS).get(&id).cloned()
}

/// A handle on one script run.
pub struct ScriptHandle {
	cancel: CancellationToken,
	task: tokio::task::JoinHandle<Result<RunOutcome, SandboxError>>,
}

impl ScriptHandle {
	/// Request cooperative cancellation.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Wait for the run to end.
	pub async fn join(self) -> Result<RunOutcome, SandboxError> {
		match self.task.await {
			Ok(result) => result,
			Err(e) => Err(SandboxError::Aborted(e.to_string())),
		}
	}
}

/// The script sandbox. Stateless; each [`run`](Self::run) builds a fresh
/// engine context.
///
/// At most one run should be active per sandbox at a time; the sandbox does
/// not enforce mutual exclusion beyond handing out one handle per run.
#[derive(Default)]
pub struct ScriptSandbox;

impl ScriptSandbox {
	pub fn new() -> Self {
		Self
	}

	/// Start a script run on a blocking thread.
	///
	/// `host_fns` are registered as global functions by name, next to the
	/// built-in `console`, `sleep`, `toHex` and `fromHex` bindings. Captured
	/// output lines arrive on `output` as they are produced. Must be called
	/// from within a multi-threaded tokio runtime.
	pub fn run(
		&self,
		source: String,
		host_fns: Vec<(String, HostFn)>,
		output: mpsc::UnboundedSender<String>,
	) -> ScriptHandle {
		let cancel = CancellationToken::new();
		let id = NEXT_RUN_ID.fetch_add(1, Ordering::SeqCst);
		let shared = Arc::new(RunShared {
			cancel: cancel.clone(),
			output,
			host_fns: host_fns.into_iter().collect(),
			handle: tokio::runtime::Handle::current(),
		});
		lock(&RUNS).insert(id, shared);

		let task = tokio::task::spawn_blocking(move || {
			let result = execute(id, &source);
			lock(&RUNS).remove(&id);
			result
		});
		ScriptHandle { cancel, task }
	}
}

fn execute(id: u64, source: &str) -> Result<RunOutcome, SandboxError> {
	let Some(shared) = run_shared(id) else {
		return Err(SandboxError::Aborted("run state dropped".to_string()));
	};
	let mut context = Context::default();

	// Syntax precheck: parse without evaluating, so no binding can run for a
	// malformed script.
	if let Err(e) = context.parse(source) {
		let message = e.to_string();
		let line = diagnostic_line(&message);
		shared.emit(format!("{}{message}", prefixes::SYNTAX_ERROR));
		return Err(SandboxError::Syntax { message, line });
	}

	setup_context(&mut context, id, &shared);

	match context.eval(source) {
		Ok(_) if shared.cancel.is_cancelled() => {
			shared.emit_marker(markers::STOPPED);
			Ok(RunOutcome::Stopped)
		},
		Ok(_) => {
			shared.emit_marker(markers::DONE);
			Ok(RunOutcome::Completed)
		},
		// Cancellation surfaces as a throw from a control point.
		Err(_) if shared.cancel.is_cancelled() => {
			shared.emit_marker(markers::STOPPED);
			Ok(RunOutcome::Stopped)
		},
		Err(e) => {
			let message = js_error_message(&e, &mut context);
			let line = diagnostic_line(&message);
			shared.emit(format!("{}{message}", prefixes::RUNTIME_ERROR));
			Err(SandboxError::Runtime { message, line })
		},
	}
}

fn setup_context(context: &mut Context, id: u64, shared: &RunShared) {
	let attr = Attribute::WRITABLE | Attribute::NON_ENUMERABLE | Attribute::CONFIGURABLE;

	// console.log / console.error / console.warn
	let console = JsObject::default();
	for (name, prefix) in [
		(bindings::CONSOLE_LOG, ""),
		(bindings::CONSOLE_ERROR, prefixes::ERROR),
		(bindings::CONSOLE_WARN, prefixes::WARN),
	] {
		let func = FunctionBuilder::closure_with_captures(
			context,
			|_this, params, captures: &mut (u64, String), context| {
				if let Some(run) = run_shared(captures.0) {
					let line = params
						.iter()
						.map(|p| format_value(p, context))
						.collect::<Vec<_>>()
						.join(" ");
					run.emit(format!("{}{line}", captures.1));
				}
				Ok(JsValue::Undefined)
			},
			(id, prefix.to_string()),
		)
		.name(name)
		.build();
		// The receiver is a plain object we own; a set failure here is a
		// programming error worth surfacing in the script's output instead
		// of a panic.
		if let Err(e) = console.set(name, func, false, context) {
			log::error!("failed to install console.{name}: {e:?}");
		}
	}
	context.register_global_property(bindings::CONSOLE, console, attr);

	// sleep(ms): blocking with periodic cancellation checks.
	let sleep = FunctionBuilder::closure_with_captures(
		context,
		|_this, params, id: &mut u64, _context| {
			let Some(run) = run_shared(*id) else {
				return Err(JsValue::from(errors::CANCELLED));
			};
			let ms = params.first().and_then(JsValue::as_number).unwrap_or(0.0).max(0.0);
			let deadline = Instant::now() + Duration::from_millis(ms as u64);
			loop {
				if run.cancel.is_cancelled() {
					return Err(JsValue::from(errors::CANCELLED));
				}
				let now = Instant::now();
				if now >= deadline {
					return Ok(JsValue::Undefined);
				}
				std::thread::sleep(SLEEP_SLICE.min(deadline - now));
			}
		},
		id,
	)
	.name(bindings::SLEEP)
	.build();
	context.register_global_property(bindings::SLEEP, sleep, attr);

	context.register_global_function(bindings::TO_HEX, 1, to_hex);
	context.register_global_function(bindings::FROM_HEX, 1, from_hex);

	// Caller-supplied host functions, dispatched through the shared state by
	// name.
	for name in shared.host_fns.keys() {
		let func = FunctionBuilder::closure_with_captures(
			context,
			|_this, params, captures: &mut (u64, String), context| {
				call_host_fn(captures.0, &captures.1, params, context)
			},
			(id, name.clone()),
		)
		.name(name.as_str())
		.build();
		context.register_global_property(name.as_str(), func, attr);
	}
}

fn call_host_fn(
	id: u64,
	name: &str,
	params: &[JsValue],
	context: &mut Context,
) -> JsResult<JsValue> {
	let Some(run) = run_shared(id) else {
		return Err(JsValue::from(errors::CANCELLED));
	};
	if run.cancel.is_cancelled() {
		return Err(JsValue::from(errors::CANCELLED));
	}
	let Some(host) = run.host_fns.get(name).cloned() else {
		return Err(JsValue::from(errors::BAD_ARGUMENTS));
	};

	let args = if params.is_empty() {
		serde_json::Value::Null
	} else {
		let array = JsArray::from_iter(params.to_vec(), context);
		JsValue::from(JsObject::from(array)).to_json(context)?
	};

	let fut = host(args);
	let result = run.handle.block_on(async {
		tokio::select! {
			_ = run.cancel.cancelled() => Err(errors::CANCELLED.to_string()),
			result = fut => result,
		}
	});
	match result {
		Ok(value) => JsValue::from_json(&value, context),
		Err(message) => Err(JsValue::from(message)),
	}
}

/// `toHex(bytes)`: number array to `0x`-prefixed hex.
fn to_hex(_this: &JsValue, params: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
	let value = params.first().cloned().unwrap_or(JsValue::Undefined);
	let json = value.to_json(context)?;
	let bytes: Vec<u8> =
		serde_json::from_value(json).map_err(|_| JsValue::from(errors::BAD_ARGUMENTS))?;
	Ok(JsValue::from(format!("0x{}", hex::encode(bytes))))
}

/// `fromHex(string)`: hex (with or without `0x`) to a number array.
fn from_hex(_this: &JsValue, params: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
	let value = params.first().cloned().unwrap_or(JsValue::Undefined);
	let text = value.to_string(context)?.to_string();
	let bytes = hex::decode(text.strip_prefix("0x").unwrap_or(&text))
		.map_err(|_| JsValue::from(errors::BAD_ARGUMENTS))?;
	let array = JsArray::from_iter(bytes.into_iter().map(|b| JsValue::from(b as i32)), context);
	Ok(JsValue::from(JsObject::from(array)))
}

/// Render a value the way a console would: strings unquoted, everything else
/// through the engine's display form.
fn format_value(value: &JsValue, _context: &mut Context) -> String {
	match value.as_string() {
		Some(s) => s.to_string(),
		None => value.display().to_string(),
	}
}

fn js_error_message(error: &JsValue, context: &mut Context) -> String {
	match error.to_string(context) {
		Ok(message) => message.to_string(),
		Err(_) => error.display().to_string(),
	}
}

/// Best-effort 1-based line number from a diagnostic message ("... at line
/// 3, col 7").
fn diagnostic_line(message: &str) -> Option<u32> {
	let rest = &message[message.find("line ")? + "line ".len()..];
	let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
	digits.parse().ok()
}

/// Script snippet for submitting a call, in the sandbox's host-fn dialect.
pub fn generate_tx_snippet(pallet: &str, call: &str, args: &str) -> String {
	format!(
		"const tx = txSignAndSubmit(\"{pallet}\", \"{call}\", [{args}]);\nconsole.log(\"done\", tx);"
	)
}

/// Script snippet for reading a storage entry.
pub fn generate_query_snippet(pallet: &str, entry: &str, key: Option<&str>) -> String {
	let key = key.unwrap_or("");
	format!("const result = query(\"{pallet}\", \"{entry}\", [{key}]);\nconsole.log(result);")
}
