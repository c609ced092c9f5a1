//! Remote execution-node protocol boundary.
//!
//! The broker treats the wire protocol as an opaque capability: create a
//! session, ask for its current URL, navigate it, terminate it. Nothing else
//! of the payload is inspected. [`HttpRemoteDriver`] speaks the WebDriver
//! REST dialect Selenium nodes expose; tests substitute scripted drivers.

use async_trait::async_trait;
use serde_json::{Value, json};
use url::Url;

use crate::error::{DroverError, Result};

/// Outcome of a remote session creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
	/// Opaque id assigned by the node.
	pub id: String,
	/// Address the node actually answered on, after any redirect or DNS
	/// resolution; this is what gets recorded, not the requested alias.
	pub resolved_endpoint: String,
}

#[async_trait]
pub trait RemoteDriver: Send + Sync {
	async fn create_session(&self, endpoint: &str, capabilities: &Value) -> Result<CreatedSession>;
	async fn current_url(&self, endpoint: &str, session_id: &str) -> Result<String>;
	async fn navigate(&self, endpoint: &str, session_id: &str, url: &str) -> Result<()>;
	async fn quit(&self, endpoint: &str, session_id: &str) -> Result<()>;
}

/// WebDriver-over-HTTP implementation.
#[derive(Clone)]
pub struct HttpRemoteDriver {
	http: reqwest::Client,
}

impl HttpRemoteDriver {
	pub fn new() -> Self {
		Self { http: reqwest::Client::new() }
	}
}

impl Default for HttpRemoteDriver {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl RemoteDriver for HttpRemoteDriver {
	async fn create_session(&self, endpoint: &str, capabilities: &Value) -> Result<CreatedSession> {
		let url = command_url(endpoint, "session")?;
		let body = json!({
			"capabilities": { "alwaysMatch": capabilities },
			"desiredCapabilities": capabilities,
		});
		let response = self.http.post(url).json(&body).send().await?;
		let resolved_endpoint = resolved_base(response.url(), "session");
		let value = unwrap_value(endpoint, response).await?;
		let id = value
			.get("sessionId")
			.and_then(Value::as_str)
			.ok_or_else(|| DroverError::remote(endpoint, "create response carried no sessionId"))?
			.to_string();
		Ok(CreatedSession { id, resolved_endpoint })
	}

	async fn current_url(&self, endpoint: &str, session_id: &str) -> Result<String> {
		let url = command_url(endpoint, &format!("session/{session_id}/url"))?;
		let response = self.http.get(url).send().await?;
		let value = unwrap_value(endpoint, response).await?;
		value
			.as_str()
			.map(str::to_string)
			.ok_or_else(|| DroverError::remote(endpoint, "url response was not a string"))
	}

	async fn navigate(&self, endpoint: &str, session_id: &str, url: &str) -> Result<()> {
		let command = command_url(endpoint, &format!("session/{session_id}/url"))?;
		let response = self.http.post(command).json(&json!({ "url": url })).send().await?;
		unwrap_value(endpoint, response).await?;
		Ok(())
	}

	async fn quit(&self, endpoint: &str, session_id: &str) -> Result<()> {
		let url = command_url(endpoint, &format!("session/{session_id}"))?;
		let response = self.http.delete(url).send().await?;
		unwrap_value(endpoint, response).await?;
		Ok(())
	}
}

fn command_url(endpoint: &str, path: &str) -> Result<Url> {
	let base = Url::parse(endpoint).map_err(|err| DroverError::remote(endpoint, err))?;
	// Trailing-slash normalization so "…/wd/hub" joins as a path segment.
	let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), path);
	Url::parse(&joined).map_err(|err| DroverError::remote(endpoint, err))
}

/// Base endpoint recovered from the URL the response actually came from.
fn resolved_base(final_url: &Url, command_path: &str) -> String {
	let text = final_url.as_str();
	text.strip_suffix(command_path)
		.map(|base| base.trim_end_matches('/').to_string())
		.unwrap_or_else(|| text.trim_end_matches('/').to_string())
}

/// Unwraps the WebDriver `{"value": …}` envelope, mapping non-success
/// statuses and error payloads to [`DroverError::Remote`].
async fn unwrap_value(endpoint: &str, response: reqwest::Response) -> Result<Value> {
	let status = response.status();
	let payload: Value = response.json().await.map_err(|err| DroverError::remote(endpoint, err))?;
	if !status.is_success() {
		let message = payload
			.pointer("/value/message")
			.and_then(Value::as_str)
			.unwrap_or("node returned an error status")
			.to_string();
		return Err(DroverError::Remote {
			endpoint: endpoint.to_string(),
			message: format!("{status}: {message}"),
		});
	}
	let mut payload = payload;
	match payload.get_mut("value") {
		Some(value) => Ok(value.take()),
		None => Err(DroverError::remote(endpoint, "response carried no value field")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn command_url_joins_through_hub_paths() {
		let url = command_url("http://node-a:4444/wd/hub", "session").unwrap();
		assert_eq!(url.as_str(), "http://node-a:4444/wd/hub/session");

		let url = command_url("http://node-a:4444/wd/hub/", "session/abc/url").unwrap();
		assert_eq!(url.as_str(), "http://node-a:4444/wd/hub/session/abc/url");
	}

	#[test]
	fn resolved_base_strips_command_suffix() {
		let url = Url::parse("http://10.0.0.5:4444/wd/hub/session").unwrap();
		assert_eq!(resolved_base(&url, "session"), "http://10.0.0.5:4444/wd/hub");
	}
}
