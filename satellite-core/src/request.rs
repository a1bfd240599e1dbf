//! The minimal view of an inbound HTTP request the evaluator and dispatcher
//! need. `satellite-server` builds one of these per request from the
//! `hyper::Request` plus the connection's JA3 fingerprint; keeping it
//! separate from the wire type lets `satellite-core` stay free of an HTTP
//! server dependency.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::ja3::Ja3Hash;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub uri: String,
    pub user_agent: String,
    pub headers: HashMap<String, String>,
    pub remote_addr: String,
    pub client_ip: IpAddr,
    pub ja3: Option<Ja3Hash>,
    /// Raw request-line + headers + body, used to feed the `exec` predicate's
    /// stdin (spec §4.4 item 9: "the full request dump").
    pub dump: Vec<u8>,
    /// The request body alone, used when forwarding to a proxy artifact.
    pub body: Vec<u8>,
}

impl RequestContext {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext {
            method: "GET".into(),
            uri: "/a".into(),
            user_agent: "curl/8".into(),
            headers: HashMap::from([("X-Token".to_string(), "abc".to_string())]),
            remote_addr: "1.2.3.4:1234".into(),
            client_ip: "1.2.3.4".parse().unwrap(),
            ja3: None,
            dump: vec![],
            body: vec![],
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        assert_eq!(ctx().header("x-token"), Some("abc"));
    }
}
