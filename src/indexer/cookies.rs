//! Session cookie normalization
//!
//! Cookies reach us in several shapes: a browser-export array of
//! `{name, value, domain, ...}` objects, a flat `{name: value}` object, or a
//! raw `a=b; c=d` header string. All of them are turned into one
//! [`CookieJar`] at the boundary and only that form is used internally.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::json_file;

pub const IPT_COOKIE_DOMAIN: &str = ".iptorrents.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
        }
    }
}

/// Canonical cookie collection; serialized as an array of [`Cookie`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the uid/pass pair the tracker uses for authentication
    pub fn from_credentials(uid: &str, pass: &str) -> Self {
        let mut jar = Self::new();
        for (name, value) in [("uid", uid), ("pass", pass)] {
            jar.set(Cookie {
                name: name.to_string(),
                value: value.to_string(),
                domain: Some(IPT_COOKIE_DOMAIN.to_string()),
                path: Some("/".to_string()),
            });
        }
        jar
    }

    /// Parse any supported cookie shape
    pub fn from_json(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::new());
        }

        // Raw header strings are not JSON at all
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => Self::from_value(value),
            Err(_) => Ok(Self::from_header(trimmed)),
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => {
                let mut jar = Self::new();
                for item in items {
                    let cookie: Cookie = serde_json::from_value(strip_extra_fields(item))
                        .context("Invalid cookie entry")?;
                    jar.set(cookie);
                }
                Ok(jar)
            }
            // Some exports wrap the array: {"cookies": [...]}
            Value::Object(mut map) if matches!(map.get("cookies"), Some(Value::Array(_))) => {
                Self::from_value(map.remove("cookies").unwrap_or_default())
            }
            Value::Object(map) => {
                let mut jar = Self::new();
                for (name, value) in map {
                    let value = match value {
                        Value::String(s) => s,
                        Value::Null => continue,
                        other => other.to_string(),
                    };
                    jar.set(Cookie::new(name, value));
                }
                Ok(jar)
            }
            Value::String(s) => Ok(Self::from_header(&s)),
            other => Err(anyhow!("Unsupported cookie format: {}", other)),
        }
    }

    /// Parse a `Cookie:` header value (`a=b; c=d`)
    pub fn from_header(header: &str) -> Self {
        let mut jar = Self::new();
        for pair in header.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    jar.set(Cookie::new(name, value.trim()));
                }
            }
        }
        jar
    }

    /// Load a cookie file. A missing file yields `None`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text)
                .with_context(|| format!("Failed to parse cookies from {}", path.display()))
                .map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        json_file::write_atomic(path, self)
    }

    /// Insert or replace a cookie by name
    pub fn set(&mut self, cookie: Cookie) {
        match self.cookies.iter_mut().find(|c| c.name == cookie.name) {
            Some(existing) => {
                existing.value = cookie.value;
                if cookie.domain.is_some() {
                    existing.domain = cookie.domain;
                }
                if cookie.path.is_some() {
                    existing.path = cookie.path;
                }
            }
            None => self.cookies.push(cookie),
        }
    }

    /// Apply a `Set-Cookie` header value; attributes other than the pair are ignored
    pub fn apply_set_cookie(&mut self, header: &str) {
        let pair = header.split(';').next().unwrap_or("");
        if let Some((name, value)) = pair.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                self.set(Cookie::new(name, value.trim()));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    /// Whether both tracker session cookies are present and non-empty
    pub fn has_ipt_session(&self) -> bool {
        ["uid", "pass"]
            .iter()
            .all(|name| self.get(name).is_some_and(|v| !v.is_empty()))
    }

    /// Render as a `Cookie:` request header value
    pub fn to_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Cookie names with values masked, for logging
    pub fn redacted(&self) -> String {
        self.cookies
            .iter()
            .map(|c| {
                let prefix: String = c.value.chars().take(3).collect();
                format!("{}={}***", c.name, prefix)
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Browser exports carry extra keys (httpOnly, sameSite, expirationDate...)
fn strip_extra_fields(item: Value) -> Value {
    match item {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| matches!(k.as_str(), "name" | "value" | "domain" | "path"))
                .collect(),
        ),
        other => other,
    }
}
