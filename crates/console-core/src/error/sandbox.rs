// SPDX-License-Identifier: GPL-3.0

//! Script sandbox error types.

use thiserror::Error;

/// Errors produced by a script run.
///
/// Cancellation is deliberately NOT an error: a cancelled run finishes with
/// [`RunOutcome::Stopped`](crate::sandbox::RunOutcome::Stopped) instead.
#[derive(Debug, Clone, Error)]
pub enum SandboxError {
	/// The source failed the syntax pre-check and was never executed.
	#[error("syntax error: {message}")]
	Syntax {
		/// The parser diagnostic.
		message: String,
		/// Best-effort 1-based source line parsed from the diagnostic.
		line: Option<u32>,
	},

	/// The script threw during execution.
	#[error("{message}")]
	Runtime {
		/// The thrown error, rendered as text.
		message: String,
		/// Best-effort 1-based source line parsed from the error text.
		line: Option<u32>,
	},

	/// The execution thread terminated abnormally.
	#[error("script execution aborted: {0}")]
	Aborted(String),
}

impl SandboxError {
	/// The source line this error is attributed to, when one could be derived.
	pub fn line(&self) -> Option<u32> {
		match self {
			Self::Syntax { line, .. } | Self::Runtime { line, .. } => *line,
			Self::Aborted(_) => None,
		}
	}
}
