// SPDX-License-Identifier: GPL-3.0

//! Chain-client collaborator error types.

use thiserror::Error;

/// Errors that can occur when talking to the chain-client collaborator.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
	/// Failed to connect to the RPC endpoint.
	#[error("Failed to connect to {endpoint}: {message}")]
	ConnectionFailed {
		/// The endpoint URL that failed to connect.
		endpoint: String,
		/// The error message describing the failure.
		message: String,
	},
	/// A request to the chain client failed.
	#[error("Request `{method}` failed: {message}")]
	RequestFailed {
		/// The method or query that failed.
		method: String,
		/// The error message describing the failure.
		message: String,
	},
	/// The chain client returned a response we could not interpret.
	#[error("Invalid response: {0}")]
	InvalidResponse(String),
	/// A value could not be decoded with the current runtime context.
	#[error("Decode failed: {0}")]
	Decode(String),
}
