//! Session record shapes and their store encoding.
//!
//! A session lives in the store as a string-valued field hash plus a
//! separate tag set. `reserved` is a string-typed boolean on the wire; it is
//! normalized to a real `bool` here, at the registry boundary, and an
//! unrecognized spelling is a decode error rather than a silent default.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{DroverError, Result};

/// Hash field names for a session record.
pub mod fields {
	pub const BROWSER_NAME: &str = "browser_name";
	pub const NODE: &str = "node";
	pub const RESERVED: &str = "reserved";
	pub const CURRENT_URL: &str = "current_url";
}

/// A session as the provisioner registers it (id lives alongside).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
	/// Requested capability profile (browser engine identifier).
	pub browser_name: String,
	/// Resolved execution-node address actually serving the session.
	pub node: String,
	/// Exclusive-use flag.
	pub reserved: bool,
	/// Last known navigation target.
	pub current_url: Option<String>,
	/// Free-form labels with set semantics; used for matching, not identity.
	pub tags: BTreeSet<String>,
}

impl SessionRecord {
	/// Field/value pairs for the record hash. `current_url` is simply absent
	/// when unknown; there is no null encoding in the hash.
	pub fn to_fields(&self) -> Vec<(&'static str, String)> {
		let mut out = vec![
			(fields::BROWSER_NAME, self.browser_name.clone()),
			(fields::NODE, self.node.clone()),
			(fields::RESERVED, encode_bool(self.reserved).to_string()),
		];
		if let Some(url) = &self.current_url {
			out.push((fields::CURRENT_URL, url.clone()));
		}
		out
	}
}

/// Externally visible projection of a session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
	pub id: String,
	pub browser_name: String,
	pub node: String,
	pub reserved: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub current_url: Option<String>,
	pub tags: BTreeSet<String>,
}

impl SessionView {
	/// Decodes a store hash + tag set into a view.
	pub fn from_store(id: &str, hash: &BTreeMap<String, String>, tags: BTreeSet<String>) -> Result<Self> {
		Ok(Self {
			id: id.to_string(),
			browser_name: required(hash, fields::BROWSER_NAME)?,
			node: required(hash, fields::NODE)?,
			reserved: decode_bool(fields::RESERVED, &required(hash, fields::RESERVED)?)?,
			current_url: hash.get(fields::CURRENT_URL).cloned(),
			tags,
		})
	}
}

/// Requirement set for matching or provisioning a session.
///
/// Absent keys are wildcards for the matcher and fall back to configured
/// defaults when a new session has to be provisioned.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Requirements {
	pub browser_name: Option<String>,
	pub node: Option<String>,
	pub reserved: Option<bool>,
	pub current_url: Option<String>,
	#[serde(default)]
	pub tags: BTreeSet<String>,
	/// Extra entries merged into the WebDriver capability payload.
	pub extra_desired_capabilities: Option<serde_json::Value>,
}

fn required(hash: &BTreeMap<String, String>, field: &'static str) -> Result<String> {
	hash.get(field).cloned().ok_or(DroverError::Decode {
		field,
		value: "<absent>".to_string(),
	})
}

/// Store spelling for a boolean field.
pub fn encode_bool(value: bool) -> &'static str {
	if value { "true" } else { "false" }
}

/// Strict boolean decode. Accepts our lowercase spelling plus the
/// capitalized form legacy tooling wrote; everything else is an error.
pub fn decode_bool(field: &'static str, raw: &str) -> Result<bool> {
	match raw {
		"true" | "True" => Ok(true),
		"false" | "False" => Ok(false),
		other => Err(DroverError::Decode {
			field,
			value: other.to_string(),
		}),
	}
}
