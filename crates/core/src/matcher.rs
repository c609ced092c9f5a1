//! Requirement matching for get-or-create.

use crate::model::{Requirements, SessionView};

/// True when `candidate` satisfies `req`.
///
/// Absent requirement keys are wildcards, with one exception: a requested
/// node must equal the candidate's resolved node exactly. Tags match by
/// superset, so the candidate may carry more labels than asked for.
pub fn matches(candidate: &SessionView, req: &Requirements) -> bool {
	if let Some(browser_name) = &req.browser_name {
		if &candidate.browser_name != browser_name {
			return false;
		}
	}
	if let Some(node) = &req.node {
		if &candidate.node != node {
			return false;
		}
	}
	if let Some(reserved) = req.reserved {
		if candidate.reserved != reserved {
			return false;
		}
	}
	if let Some(current_url) = &req.current_url {
		if candidate.current_url.as_ref() != Some(current_url) {
			return false;
		}
	}
	req.tags.is_subset(&candidate.tags)
}

/// First compatible candidate in listing order.
///
/// The listing order is the store's arbitrary set iteration; any match is an
/// acceptable winner, ties carry no meaning.
pub fn find_match<'a>(candidates: &'a [SessionView], req: &Requirements) -> Option<&'a SessionView> {
	candidates.iter().find(|candidate| matches(candidate, req))
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use super::*;

	fn session(tags: &[&str]) -> SessionView {
		SessionView {
			id: "s1".into(),
			browser_name: "firefox".into(),
			node: "http://node-a:5555/wd/hub".into(),
			reserved: false,
			current_url: Some("https://example.com".into()),
			tags: tags.iter().map(|t| t.to_string()).collect(),
		}
	}

	fn req() -> Requirements {
		Requirements::default()
	}

	#[test]
	fn empty_requirements_match_anything() {
		assert!(matches(&session(&[]), &req()));
		assert!(matches(&session(&["a", "b"]), &req()));
	}

	#[test]
	fn tag_matching_is_superset() {
		let candidate = session(&["a", "b"]);
		let mut r = req();
		r.tags = BTreeSet::from(["a".to_string()]);
		assert!(matches(&candidate, &r));

		r.tags = BTreeSet::from(["a".to_string(), "c".to_string()]);
		assert!(!matches(&candidate, &r));
	}

	#[test]
	fn browser_name_must_equal_when_requested() {
		let mut r = req();
		r.browser_name = Some("chrome".into());
		assert!(!matches(&session(&[]), &r));
		r.browser_name = Some("firefox".into());
		assert!(matches(&session(&[]), &r));
	}

	#[test]
	fn requested_node_is_exact_never_wildcard() {
		let mut r = req();
		r.node = Some("http://node-b:5555/wd/hub".into());
		assert!(!matches(&session(&[]), &r));
		r.node = Some("http://node-a:5555/wd/hub".into());
		assert!(matches(&session(&[]), &r));
	}

	#[test]
	fn reserved_and_url_compare_when_present() {
		let mut r = req();
		r.reserved = Some(true);
		assert!(!matches(&session(&[]), &r));

		let mut r = req();
		r.current_url = Some("https://other.example".into());
		assert!(!matches(&session(&[]), &r));
		r.current_url = Some("https://example.com".into());
		assert!(matches(&session(&[]), &r));
	}

	#[test]
	fn find_match_takes_first_in_listing_order() {
		let mut first = session(&["a"]);
		first.id = "first".into();
		let mut second = session(&["a"]);
		second.id = "second".into();

		let mut r = req();
		r.tags = BTreeSet::from(["a".to_string()]);
		let sessions = [first, second];
		let found = find_match(&sessions, &r).unwrap();
		assert_eq!(found.id, "first");
	}
}
