// SPDX-License-Identifier: GPL-3.0

//! String constants for the persistent store.

/// Keys under which blobs are persisted.
pub mod keys {
	/// The single script buffer.
	pub const SCRIPT: &str = "console:script";
}

/// The script shown when no script has been persisted yet.
///
/// Host functions block until their result is available, so no `await` is
/// needed (or supported) at the top level.
pub const DEFAULT_SCRIPT: &str = r#"// signer = selected account (or use getDevSigner("Alice") for dev chains)

const tx = txSignAndSubmit("System", "remark", [toHex([104, 101, 108, 108, 111])]);
console.log("done", tx);
"#;
