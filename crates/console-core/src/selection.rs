// SPDX-License-Identifier: GPL-3.0

//! Pure reducers for the storage-browsing selection state.
//!
//! Metadata changes (new runtime, chain switch) can invalidate the selected
//! pallet or entry at any time; the reducers here resolve every change
//! against current metadata with deterministic fallbacks, so the selection is
//! always valid or empty.

use indexmap::IndexMap;

/// Storage entry names per pallet, in metadata order.
pub type PalletEntries = IndexMap<String, Vec<String>>;

/// The currently selected pallet and storage entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntrySelection {
	/// Selected pallet name, if any pallet exists.
	pub pallet: Option<String>,
	/// Selected entry name, if the pallet has entries.
	pub entry: Option<String>,
}

impl EntrySelection {
	/// Apply a selection change against current metadata.
	///
	/// `pallet`/`entry` of `None` keep the current value. A pallet absent
	/// from metadata falls back to the first pallet in metadata order; an
	/// entry absent under the (possibly just-changed) pallet falls back to
	/// that pallet's first entry.
	pub fn select(
		&self,
		pallet: Option<&str>,
		entry: Option<&str>,
		pallets: &PalletEntries,
	) -> Self {
		let mut next = Self {
			pallet: pallet.map(str::to_string).or_else(|| self.pallet.clone()),
			entry: entry.map(str::to_string).or_else(|| self.entry.clone()),
		};

		let mut entries = next.pallet.as_ref().and_then(|name| pallets.get(name));
		if entries.is_none() {
			next.pallet = pallets.keys().next().cloned();
			entries = next.pallet.as_ref().and_then(|name| pallets.get(name));
		}

		let entry_exists = match (&entries, &next.entry) {
			(Some(entries), Some(selected)) => entries.iter().any(|name| name == selected),
			_ => false,
		};
		if !entry_exists {
			next.entry = entries.and_then(|entries| entries.first().cloned());
		}
		next
	}

	/// Re-resolve the current selection against (possibly new) metadata.
	pub fn revalidate(&self, pallets: &PalletEntries) -> Self {
		self.select(None, None, pallets)
	}
}

/// Toggle how many of a composite storage key's components are enabled.
///
/// Clicking component `i` extends the enabled prefix through `i` when `i` is
/// at or beyond the current count, and truncates the prefix to end just
/// before `i` otherwise. A fully-enabled key addresses a single value; a
/// prefix addresses an entry range.
pub fn toggle_key_count(count: usize, index: usize) -> usize {
	if count <= index {
		index + 1
	} else {
		index
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn metadata() -> PalletEntries {
		let mut pallets = PalletEntries::new();
		pallets.insert("A".to_string(), vec!["x".to_string()]);
		pallets.insert("B".to_string(), vec!["y".to_string(), "z".to_string()]);
		pallets
	}

	#[test]
	fn absent_pallet_falls_back_to_first() {
		let pallets = metadata();
		let selection = EntrySelection::default().select(Some("C"), None, &pallets);
		assert_eq!(selection.pallet.as_deref(), Some("A"));
		assert_eq!(selection.entry.as_deref(), Some("x"));
	}

	#[test]
	fn absent_entry_falls_back_to_first_of_pallet() {
		let pallets = metadata();
		let selection = EntrySelection::default().select(Some("A"), None, &pallets);
		let selection = selection.select(None, Some("q"), &pallets);
		assert_eq!(selection.pallet.as_deref(), Some("A"));
		assert_eq!(selection.entry.as_deref(), Some("x"));
	}

	#[test]
	fn valid_selection_is_kept() {
		let pallets = metadata();
		let selection = EntrySelection::default().select(Some("B"), Some("z"), &pallets);
		assert_eq!(selection.pallet.as_deref(), Some("B"));
		assert_eq!(selection.entry.as_deref(), Some("z"));
	}

	#[test]
	fn pallet_change_revalidates_entry() {
		let pallets = metadata();
		let selection = EntrySelection::default().select(Some("B"), Some("z"), &pallets);
		// Switching pallets with a now-invalid entry falls back to the new
		// pallet's first entry.
		let selection = selection.select(Some("A"), None, &pallets);
		assert_eq!(selection.entry.as_deref(), Some("x"));
	}

	#[test]
	fn empty_metadata_clears_selection() {
		let selection =
			EntrySelection::default().select(Some("A"), Some("x"), &PalletEntries::new());
		assert_eq!(selection, EntrySelection::default());
	}

	#[test]
	fn revalidate_after_metadata_change() {
		let mut pallets = metadata();
		let selection = EntrySelection::default().select(Some("B"), Some("y"), &pallets);
		pallets.shift_remove("B");
		let selection = selection.revalidate(&pallets);
		assert_eq!(selection.pallet.as_deref(), Some("A"));
		assert_eq!(selection.entry.as_deref(), Some("x"));
	}

	#[test]
	fn toggle_extends_and_truncates() {
		// Four key components, two enabled.
		assert_eq!(toggle_key_count(2, 0), 0);
		assert_eq!(toggle_key_count(2, 2), 3);
		assert_eq!(toggle_key_count(2, 3), 4);
		// Toggling the last enabled component truncates it away.
		assert_eq!(toggle_key_count(4, 3), 3);
		assert_eq!(toggle_key_count(0, 0), 1);
	}
}
