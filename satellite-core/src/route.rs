//! A single route: a URI glob, a backing artifact, content metadata, an
//! on-failure action, and a compiled [`ConditionSet`] (C5).

use serde::{Deserialize, Serialize};

use crate::condition::{ConditionSet, ConditionSetDoc};
use crate::error::LoadError;
use crate::glob::UriGlob;

/// Exactly one of `{file, proxy, credential_sink}`. Absent ⇒ the pattern
/// must itself name a file on disk beneath the server root (an "anonymous"
/// fallback route, see `table::RouteTable::match_uri`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    File(String),
    Proxy(String),
    CredentialSink(String),
}

/// Exactly one of `{redirect, render}`, or neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnFailure {
    Redirect(String),
    Render(String),
    None,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Disposition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl Disposition {
    /// Renders the `Content-Disposition` header value: `"{type}"` alone, or
    /// `"{type}; filename=\"{name}\""` if a filename is set.
    pub fn header_value(&self) -> String {
        match &self.file_name {
            Some(name) => format!("{}; filename=\"{}\"", self.kind, name),
            None => self.kind.clone(),
        }
    }
}

/// The raw, YAML-deserializable manifest entry. Field names mirror the Go
/// source's manifest keys (`original_source/path/paths.go`'s
/// `NewPathArray`) so existing manifests need no translation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RouteDoc {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosted_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_capture: Option<CredentialCapture>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposition: Option<Disposition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<OnFailureDoc>,
    #[serde(flatten)]
    pub conditions: ConditionSetDoc,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CredentialCapture {
    pub file_output: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OnFailureDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render: Option<String>,
}

pub struct Route {
    pub pattern: String,
    pub glob: UriGlob,
    pub artifact: Option<Artifact>,
    pub content_type: Option<String>,
    pub disposition: Option<Disposition>,
    pub on_failure: OnFailure,
    pub conditions: ConditionSet,
    /// The raw, uncompiled conditions, kept so global overlays can be
    /// re-merged and recompiled at reload/match time (spec §4.6: "Merging
    /// applies at `match` time so routes added after startup still inherit
    /// the overlay").
    pub conditions_doc: ConditionSetDoc,
}

impl Route {
    pub fn compile(doc: &RouteDoc) -> Result<Route, LoadError> {
        let artifact = match (&doc.hosted_file, &doc.proxy, &doc.credential_capture) {
            (Some(f), None, None) => Some(Artifact::File(f.clone())),
            (None, Some(p), None) => Some(Artifact::Proxy(p.clone())),
            (None, None, Some(c)) => Some(Artifact::CredentialSink(c.file_output.clone())),
            (None, None, None) => None,
            _ => {
                return Err(LoadError::InvalidRoute {
                    pattern: doc.path.clone(),
                    reason: "a route may set at most one of hosted_file, proxy, credential_capture"
                        .to_string(),
                })
            }
        };

        let on_failure = match &doc.on_failure {
            None => OnFailure::None,
            Some(OnFailureDoc {
                redirect: Some(_),
                render: Some(_),
            }) => {
                return Err(LoadError::InvalidRoute {
                    pattern: doc.path.clone(),
                    reason: "on_failure.redirect and on_failure.render are mutually exclusive".to_string(),
                })
            }
            Some(OnFailureDoc { redirect: Some(r), .. }) => OnFailure::Redirect(r.clone()),
            Some(OnFailureDoc { render: Some(r), .. }) => OnFailure::Render(r.clone()),
            Some(OnFailureDoc { .. }) => OnFailure::None,
        };

        let glob = UriGlob::compile(&doc.path).map_err(|source| LoadError::InvalidGlob {
            pattern: doc.path.clone(),
            source,
        })?;

        Ok(Route {
            pattern: doc.path.clone(),
            glob,
            artifact,
            content_type: doc.content_type.clone(),
            disposition: doc.disposition.clone(),
            on_failure,
            conditions: ConditionSet::compile(&doc.conditions)?,
            conditions_doc: doc.conditions.clone(),
        })
    }

    /// An anonymous route synthesized when no manifest entry matches but a
    /// real file exists on disk beneath the server root (spec §4.6
    /// fallback): no conditions, serves the URI verbatim.
    pub fn anonymous(uri: &str) -> Route {
        Route {
            pattern: uri.to_string(),
            glob: UriGlob::compile(uri).expect("literal URI is always a valid glob"),
            artifact: Some(Artifact::File(uri.to_string())),
            content_type: None,
            disposition: None,
            on_failure: OnFailure::None,
            conditions: ConditionSet::default(),
            conditions_doc: ConditionSetDoc::default(),
        }
    }
}
