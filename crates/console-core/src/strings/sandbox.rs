// SPDX-License-Identifier: GPL-3.0

//! String constants for the script sandbox.

/// Terminal markers appended to the captured output.
pub mod markers {
	/// Appended when the script's top-level execution completed without error.
	pub const DONE: &str = "--- done ---";
	/// Appended when the run was cancelled (distinct from an error).
	pub const STOPPED: &str = "--- stopped ---";
}

/// Prefixes for captured output lines.
pub mod prefixes {
	/// Prefix for `console.error` emissions.
	pub const ERROR: &str = "[error] ";
	/// Prefix for `console.warn` emissions.
	pub const WARN: &str = "[warn] ";
	/// Prefix for a syntax-error line.
	pub const SYNTAX_ERROR: &str = "syntax error: ";
	/// Prefix for a runtime-error line.
	pub const RUNTIME_ERROR: &str = "error: ";
}

/// Names under which bindings are injected into the script's global scope.
pub mod bindings {
	pub const CONSOLE: &str = "console";
	pub const CONSOLE_LOG: &str = "log";
	pub const CONSOLE_ERROR: &str = "error";
	pub const CONSOLE_WARN: &str = "warn";
	pub const SLEEP: &str = "sleep";
	pub const TO_HEX: &str = "toHex";
	pub const FROM_HEX: &str = "fromHex";
}

/// Error messages thrown into the script.
pub mod errors {
	/// Thrown by control points once cancellation has fired.
	pub const CANCELLED: &str = "script cancelled";
	/// Thrown when a host function is called with malformed arguments.
	pub const BAD_ARGUMENTS: &str = "invalid arguments";
}
