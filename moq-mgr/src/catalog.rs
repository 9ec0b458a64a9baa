//! The catalog processor: parses the JSON document published on the catalog
//! track into the set of available tracks.
//!
//! Two formats are understood. The standard format lists tracks explicitly:
//!
//! ```json
//! { "tracks": [ { "trackName": "video/hd", "type": "video", "priority": 60 } ] }
//! ```
//!
//! The HANG format groups renditions under a kind:
//!
//! ```json
//! { "video": { "priority": 60, "renditions": { "video/hd": {} } } }
//! ```
//!
//! Each document is a full snapshot replacing the previous one. A document
//! that fails to parse leaves the previous snapshot untouched.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The canonical catalog track name used by publishers.
pub const CATALOG_TRACK: &str = "catalog.json";

/// The short alias some publishers use instead.
pub const CATALOG_TRACK_ALIAS: &str = "catalog";

/// Whether a track name refers to the catalog.
pub fn is_catalog_track(name: &str) -> bool {
	name == CATALOG_TRACK || name == CATALOG_TRACK_ALIAS
}

/// One track advertised by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTrack {
	#[serde(rename = "trackName")]
	pub track_name: String,

	#[serde(rename = "type")]
	pub track_type: String,

	pub priority: i32,
}

#[derive(Clone, Default)]
pub struct CatalogProcessor {
	available: Arc<RwLock<HashMap<String, CatalogTrack>>>,
}

impl CatalogProcessor {
	pub fn new() -> Self {
		Self::default()
	}

	/// Parse one catalog document and replace the available set.
	///
	/// Returns an error without touching the available set if the document
	/// is not valid JSON or has neither a recognizable standard nor HANG
	/// shape.
	pub fn process(&self, data: &[u8]) -> Result<()> {
		let text = std::str::from_utf8(data).context("catalog is not UTF-8")?;
		let value: Value = serde_json::from_str(text).context("catalog is not valid JSON")?;

		let object = value.as_object().context("catalog is not a JSON object")?;

		// A "tracks" array selects the standard format; anything else is
		// treated as HANG.
		let tracks = match object.get("tracks") {
			Some(Value::Array(entries)) => Self::parse_standard(entries),
			_ => Self::parse_hang(object),
		};

		tracing::info!(count = tracks.len(), "catalog updated");
		for track in tracks.values() {
			tracing::debug!(
				name = %track.track_name,
				kind = %track.track_type,
				priority = track.priority,
				"available track"
			);
		}

		*self.available.write() = tracks;
		Ok(())
	}

	fn parse_standard(entries: &[Value]) -> HashMap<String, CatalogTrack> {
		let mut tracks = HashMap::new();

		for entry in entries {
			// Entries missing any field are skipped, not fatal.
			let track = match serde_json::from_value::<CatalogTrack>(entry.clone()) {
				Ok(track) => track,
				Err(err) => {
					tracing::warn!(%err, "skipping malformed catalog entry");
					continue;
				}
			};

			tracks.insert(track.track_name.clone(), track);
		}

		tracks
	}

	fn parse_hang(object: &serde_json::Map<String, Value>) -> HashMap<String, CatalogTrack> {
		let mut tracks = HashMap::new();

		for (kind, group) in object {
			let group = match group.as_object() {
				Some(group) => group,
				None => {
					tracing::warn!(%kind, "skipping non-object catalog group");
					continue;
				}
			};

			// Renditions without an explicit group priority default to 50.
			let priority = group
				.get("priority")
				.and_then(Value::as_i64)
				.map(|p| p as i32)
				.unwrap_or(50);

			match group.get("renditions").and_then(Value::as_object) {
				Some(renditions) => {
					for name in renditions.keys() {
						tracks.insert(
							name.clone(),
							CatalogTrack {
								track_name: name.clone(),
								track_type: kind.clone(),
								priority,
							},
						);
					}
				}
				// A kind without renditions still advertises itself.
				None => {
					tracks.insert(
						kind.clone(),
						CatalogTrack {
							track_name: kind.clone(),
							track_type: kind.clone(),
							priority: 1,
						},
					);
				}
			}
		}

		tracks
	}

	/// Snapshot of every track the current catalog advertises.
	pub fn available(&self) -> HashMap<String, CatalogTrack> {
		self.available.read().clone()
	}

	pub fn is_available(&self, track_name: &str) -> bool {
		self.available.read().contains_key(track_name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn standard_format() {
		let processor = CatalogProcessor::new();
		processor
			.process(br#"{"tracks":[{"trackName":"video/hd","type":"video","priority":60}]}"#)
			.unwrap();

		let available = processor.available();
		assert_eq!(available.len(), 1);
		let track = &available["video/hd"];
		assert_eq!(track.track_type, "video");
		assert_eq!(track.priority, 60);
	}

	#[test]
	fn standard_skips_malformed_entries() {
		let processor = CatalogProcessor::new();
		processor
			.process(
				br#"{"tracks":[
					{"trackName":"good","type":"data","priority":1},
					{"trackName":"no-priority","type":"data"},
					{"type":"data","priority":1},
					{"trackName":"no-type","priority":1}
				]}"#,
			)
			.unwrap();

		let available = processor.available();
		assert_eq!(available.len(), 1);
		assert!(available.contains_key("good"));
	}

	#[test]
	fn empty_standard_clears() {
		let processor = CatalogProcessor::new();
		processor
			.process(br#"{"tracks":[{"trackName":"t","type":"data","priority":1}]}"#)
			.unwrap();
		assert!(processor.is_available("t"));

		processor.process(br#"{"tracks":[]}"#).unwrap();
		assert!(processor.available().is_empty());
	}

	#[test]
	fn hang_format() {
		let processor = CatalogProcessor::new();
		processor
			.process(
				br#"{
					"video": { "priority": 60, "renditions": { "video/hd": {"codec":"av01"}, "video/sd": {} } },
					"audio": { "priority": 70, "renditions": { "audio/data": {} } }
				}"#,
			)
			.unwrap();

		let available = processor.available();
		assert_eq!(available.len(), 3);
		assert_eq!(available["video/hd"].track_type, "video");
		assert_eq!(available["video/hd"].priority, 60);
		assert_eq!(available["audio/data"].track_type, "audio");
		assert_eq!(available["audio/data"].priority, 70);
	}

	#[test]
	fn hang_renditions_without_priority() {
		let processor = CatalogProcessor::new();
		processor
			.process(br#"{"audio": {"renditions": {"audio/data": {}}}}"#)
			.unwrap();

		let available = processor.available();
		let track = &available["audio/data"];
		assert_eq!(track.track_type, "audio");
		assert_eq!(track.priority, 50);
	}

	#[test]
	fn hang_without_renditions_falls_back() {
		let processor = CatalogProcessor::new();
		processor.process(br#"{"video": {"priority": 9}}"#).unwrap();

		let available = processor.available();
		let track = &available["video"];
		assert_eq!(track.track_name, "video");
		assert_eq!(track.track_type, "video");
		assert_eq!(track.priority, 1);
	}

	#[test]
	fn tracks_must_be_array_for_standard() {
		// A non-array "tracks" key falls through to HANG parsing.
		let processor = CatalogProcessor::new();
		processor
			.process(br#"{"tracks": {"priority": 2, "renditions": {"t": {}}}}"#)
			.unwrap();

		let available = processor.available();
		assert_eq!(available["t"].track_type, "tracks");
		assert_eq!(available["t"].priority, 2);
	}

	#[test]
	fn invalid_document_preserves_snapshot() {
		let processor = CatalogProcessor::new();
		processor
			.process(br#"{"tracks":[{"trackName":"t","type":"data","priority":1}]}"#)
			.unwrap();

		assert!(processor.process(b"not json").is_err());
		assert!(processor.process(br#"["array","not","object"]"#).is_err());
		assert!(processor.process(&[0xff, 0xfe]).is_err());

		// The previous snapshot is still intact.
		assert!(processor.is_available("t"));
	}

	#[test]
	fn catalog_track_names() {
		assert!(is_catalog_track("catalog"));
		assert!(is_catalog_track("catalog.json"));
		assert!(!is_catalog_track("video/hd"));
	}
}
