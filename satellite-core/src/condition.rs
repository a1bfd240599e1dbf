//! The ordered policy engine (C4): evaluates a [`ConditionSet`] against a
//! request, the client ledger, the hit counter, and the GeoIP oracle,
//! returning `host` (`true`) or `deflect` (`false`).
//!
//! Every field is optional; an absent field is trivially satisfied. The
//! predicates run in the fixed order spec'd in §4.4 and the first failure
//! short-circuits to `false` -- this function performs no state mutation of
//! its own (I2); the caller commits the ledger hit and counter increment
//! only on a `true` result.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::counter::HitCounter;
use crate::error::{EvalError, LoadError};
use crate::geo::GeoOracle;
use crate::ip::IpRangeEntry;
use crate::ledger::ClientLedger;
use crate::request::RequestContext;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExecCondition {
    pub script: String,
    pub expected_output: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GeoipCondition {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorized_countries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blacklist_countries: Vec<String>,
}

/// The raw, YAML-deserializable shape of a `ConditionSet`. Regex and glob
/// fields are compiled into [`ConditionSet`] by [`ConditionSet::compile`];
/// an absent field (`None`/missing key) is kept distinct from an empty
/// collection so `evaluate` can implement "empty means trivially-true" for
/// both the same way (spec invariant I5).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConditionSetDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_useragents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklist_useragents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_iprange: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklist_iprange: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_methods: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_headers: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_ja3: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_serving: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serve: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prereq: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geoip: Option<GeoipCondition>,
}

impl ConditionSetDoc {
    /// "First wins on conflict" merge of two global-condition documents,
    /// or a route's own conditions overriding the global overlay (spec
    /// §4.6): for each scalar field, `self` wins if present, else `other`;
    /// list fields concatenate (`self`'s entries first).
    pub fn merge_under(self, other: &ConditionSetDoc) -> ConditionSetDoc {
        ConditionSetDoc {
            authorized_useragents: concat_opt(self.authorized_useragents, &other.authorized_useragents),
            blacklist_useragents: concat_opt(self.blacklist_useragents, &other.blacklist_useragents),
            authorized_iprange: concat_opt(self.authorized_iprange, &other.authorized_iprange),
            blacklist_iprange: concat_opt(self.blacklist_iprange, &other.blacklist_iprange),
            authorized_methods: concat_opt(self.authorized_methods, &other.authorized_methods),
            authorized_headers: merge_map(self.authorized_headers, &other.authorized_headers),
            authorized_ja3: concat_opt(self.authorized_ja3, &other.authorized_ja3),
            exec: self.exec.or_else(|| other.exec.clone()),
            not_serving: self.not_serving.or(other.not_serving),
            serve: self.serve.or(other.serve),
            prereq: self.prereq.or_else(|| other.prereq.clone()),
            geoip: self.geoip.or_else(|| other.geoip.clone()),
        }
    }
}

fn concat_opt(mine: Option<Vec<String>>, other: &Option<Vec<String>>) -> Option<Vec<String>> {
    match (mine, other) {
        (Some(mut a), Some(b)) => {
            a.extend(b.iter().cloned());
            Some(a)
        }
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b.clone()),
        (None, None) => None,
    }
}

fn merge_map(
    mine: Option<std::collections::BTreeMap<String, String>>,
    other: &Option<std::collections::BTreeMap<String, String>>,
) -> Option<std::collections::BTreeMap<String, String>> {
    match (mine, other) {
        (Some(mut a), Some(b)) => {
            for (k, v) in b {
                a.entry(k.clone()).or_insert_with(|| v.clone());
            }
            Some(a)
        }
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b.clone()),
        (None, None) => None,
    }
}

/// A compiled `ConditionSet`, ready to evaluate against requests. Regex
/// fields are compiled once here; a compile failure fails the whole load
/// (spec invariant: "load fails if any regex is invalid").
#[derive(Clone, Default)]
pub struct ConditionSet {
    authorized_useragents: Vec<Regex>,
    blacklist_useragents: Vec<Regex>,
    authorized_iprange: Vec<IpRangeEntry>,
    blacklist_iprange: Vec<IpRangeEntry>,
    authorized_methods: Vec<String>,
    authorized_headers: Vec<(String, String)>,
    authorized_ja3: Vec<String>,
    exec: Option<ExecCondition>,
    not_serving: bool,
    serve: Option<u64>,
    prereq: Vec<String>,
    geoip: Option<GeoipCondition>,
}

impl ConditionSet {
    pub fn compile(doc: &ConditionSetDoc) -> Result<ConditionSet, LoadError> {
        let compile_regexes = |maybe: &Option<Vec<String>>| -> Result<Vec<Regex>, LoadError> {
            maybe
                .iter()
                .flatten()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|source| LoadError::InvalidRegex {
                        pattern: pattern.clone(),
                        source,
                    })
                })
                .collect()
        };

        // authorized_iprange fails closed at load time on a malformed
        // entry; blacklist_iprange silently ignores malformed entries at
        // evaluation time (see evaluate()). This asymmetry is preserved
        // from the source rather than "fixed" -- see DESIGN.md.
        let authorized_iprange = doc
            .authorized_iprange
            .iter()
            .flatten()
            .map(|entry| {
                entry.parse::<IpRangeEntry>().map_err(|reason| LoadError::InvalidRoute {
                    pattern: entry.clone(),
                    reason,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let blacklist_iprange = doc
            .blacklist_iprange
            .iter()
            .flatten()
            .filter_map(|entry| entry.parse::<IpRangeEntry>().ok())
            .collect();

        Ok(ConditionSet {
            authorized_useragents: compile_regexes(&doc.authorized_useragents)?,
            blacklist_useragents: compile_regexes(&doc.blacklist_useragents)?,
            authorized_iprange,
            blacklist_iprange,
            authorized_methods: doc.authorized_methods.clone().unwrap_or_default(),
            authorized_headers: doc
                .authorized_headers
                .clone()
                .unwrap_or_default()
                .into_iter()
                .collect(),
            authorized_ja3: doc.authorized_ja3.clone().unwrap_or_default(),
            exec: doc.exec.clone(),
            not_serving: doc.not_serving.unwrap_or(false),
            serve: doc.serve,
            prereq: doc.prereq.clone().unwrap_or_default(),
            geoip: doc.geoip.clone(),
        })
    }

    /// Evaluates this condition set against `req`. Never mutates ledger,
    /// counter, or oracle state (I2); the caller commits a hit on `true`.
    pub fn evaluate(
        &self,
        req: &RequestContext,
        ledger: &ClientLedger,
        counter: &HitCounter,
        geo: &Arc<dyn GeoOracle>,
    ) -> bool {
        // 1. not_serving
        if self.not_serving {
            return false;
        }

        // 2. authorized_useragents
        if !self.authorized_useragents.is_empty()
            && !self.authorized_useragents.iter().any(|re| re.is_match(&req.user_agent))
        {
            return false;
        }

        // 3. blacklist_useragents
        if self.blacklist_useragents.iter().any(|re| re.is_match(&req.user_agent)) {
            return false;
        }

        // 4. authorized_iprange (malformed entries already rejected at load time)
        if !self.authorized_iprange.is_empty()
            && !self.authorized_iprange.iter().any(|range| range.contains(&req.client_ip))
        {
            return false;
        }

        // 5. blacklist_iprange (malformed entries were silently skipped at load time)
        if self.blacklist_iprange.iter().any(|range| range.contains(&req.client_ip)) {
            return false;
        }

        // 6. authorized_methods
        if !self.authorized_methods.is_empty() && !self.authorized_methods.iter().any(|m| m == &req.method) {
            return false;
        }

        // 7. authorized_headers
        if !self.authorized_headers.is_empty()
            && !self
                .authorized_headers
                .iter()
                .any(|(name, value)| req.header(name) == Some(value.as_str()))
        {
            return false;
        }

        // 8. authorized_ja3
        if !self.authorized_ja3.is_empty() {
            let matches = req
                .ja3
                .as_ref()
                .map(|hash| self.authorized_ja3.iter().any(|expected| expected == hash.as_str()))
                .unwrap_or(false);
            if !matches {
                return false;
            }
        }

        // 9. exec
        if let Some(exec) = &self.exec {
            match run_exec_predicate(exec, &req.dump) {
                Ok(matched) => {
                    if !matched {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }

        // 10. serve cap
        if let Some(cap) = self.serve {
            match counter.get(&req.uri) {
                Ok(hits) if hits >= cap => return false,
                Ok(_) => {}
                Err(_) => return false,
            }
        }

        // 11. prereq
        if !self.prereq.is_empty() && !ledger.matches(&req.client_ip, &self.prereq) {
            return false;
        }

        // 12. geoip
        if let Some(geoip) = &self.geoip {
            if geo.has_db() {
                match geo.country_of(&req.client_ip) {
                    Ok(country) => {
                        if !geoip.authorized_countries.is_empty()
                            && !geoip.authorized_countries.iter().any(|c| c == &country)
                        {
                            return false;
                        }
                        if !geoip.blacklist_countries.is_empty()
                            && geoip.blacklist_countries.iter().any(|c| c == &country)
                        {
                            return false;
                        }
                    }
                    Err(_) => return false,
                }
            }
        }

        true
    }
}

/// Spawns `exec.script` with no arguments, feeds `dump` on stdin, then
/// compares the trimmed combined stdout+stderr to `exec.expected_output`.
/// No wall-clock timeout is enforced here; operators are expected to keep
/// exec scripts fast (spec §5/§9 note this as a known gap).
fn run_exec_predicate(exec: &ExecCondition, dump: &[u8]) -> Result<bool, EvalError> {
    let mut child = Command::new(&exec.script)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| EvalError::ExecSpawn {
            script: exec.script.clone().into(),
            source,
        })?;

    let mut stdin = child.stdin.take().expect("stdin was piped");
    let dump = dump.to_vec();
    let writer = std::thread::spawn(move || {
        let _ = stdin.write_all(&dump);
        // stdin is dropped (and closed) here.
    });

    let output = child
        .wait_with_output()
        .map_err(|source| EvalError::ExecSpawn {
            script: exec.script.clone().into(),
            source,
        })?;
    let _ = writer.join();

    if !output.status.success() {
        return Ok(false);
    }

    // The original Go implementation uses CombinedOutput, which interleaves
    // stdout and stderr as the process writes them. We approximate that
    // here by concatenating the two streams (stdout first); scripts that
    // only write to one stream -- the common case -- behave identically.
    let mut combined = output.stdout;
    combined.extend_from_slice(&output.stderr);
    let combined = String::from_utf8_lossy(&combined);
    let trimmed = combined.strip_suffix('\n').unwrap_or(&combined);
    Ok(trimmed == exec.expected_output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::NoGeoOracle;
    use std::collections::HashMap;

    fn req(uri: &str, ua: &str, ip: &str) -> RequestContext {
        RequestContext {
            method: "GET".into(),
            uri: uri.into(),
            user_agent: ua.into(),
            headers: HashMap::new(),
            remote_addr: format!("{ip}:1234"),
            client_ip: ip.parse().unwrap(),
            ja3: None,
            dump: vec![],
            body: vec![],
        }
    }

    fn empty_counter() -> (HitCounter, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (HitCounter::open_sled(dir.path().join("db")).unwrap(), dir)
    }

    #[test]
    fn empty_condition_set_is_always_true() {
        let cs = ConditionSet::compile(&ConditionSetDoc::default()).unwrap();
        let ledger = ClientLedger::new();
        let (counter, _dir) = empty_counter();
        let geo: Arc<dyn GeoOracle> = Arc::new(NoGeoOracle);
        assert!(cs.evaluate(&req("/a", "curl/8", "1.2.3.4"), &ledger, &counter, &geo));
    }

    #[test]
    fn present_but_empty_authorized_useragents_behaves_like_absent() {
        let doc = ConditionSetDoc {
            authorized_useragents: Some(vec![]),
            ..Default::default()
        };
        let cs = ConditionSet::compile(&doc).unwrap();
        let ledger = ClientLedger::new();
        let (counter, _dir) = empty_counter();
        let geo: Arc<dyn GeoOracle> = Arc::new(NoGeoOracle);
        assert!(cs.evaluate(&req("/a", "anything", "1.2.3.4"), &ledger, &counter, &geo));
    }

    #[test]
    fn not_serving_always_deflects() {
        let doc = ConditionSetDoc {
            not_serving: Some(true),
            ..Default::default()
        };
        let cs = ConditionSet::compile(&doc).unwrap();
        let ledger = ClientLedger::new();
        let (counter, _dir) = empty_counter();
        let geo: Arc<dyn GeoOracle> = Arc::new(NoGeoOracle);
        assert!(!cs.evaluate(&req("/a", "curl/8", "1.2.3.4"), &ledger, &counter, &geo));
    }

    #[test]
    fn serve_cap_deflects_once_reached() {
        let doc = ConditionSetDoc {
            serve: Some(1),
            ..Default::default()
        };
        let cs = ConditionSet::compile(&doc).unwrap();
        let ledger = ClientLedger::new();
        let (counter, _dir) = empty_counter();
        let geo: Arc<dyn GeoOracle> = Arc::new(NoGeoOracle);
        let request = req("/payload.bin", "curl/8", "1.2.3.4");
        assert!(cs.evaluate(&request, &ledger, &counter, &geo));
        counter.increment("/payload.bin").unwrap();
        assert!(!cs.evaluate(&request, &ledger, &counter, &geo));
    }

    #[test]
    fn malformed_authorized_cidr_fails_to_compile() {
        let doc = ConditionSetDoc {
            authorized_iprange: Some(vec!["not-a-cidr/nope".to_string()]),
            ..Default::default()
        };
        assert!(ConditionSet::compile(&doc).is_err());
    }

    #[test]
    fn malformed_blacklist_cidr_is_silently_skipped() {
        let doc = ConditionSetDoc {
            blacklist_iprange: Some(vec!["not-a-cidr/nope".to_string()]),
            ..Default::default()
        };
        let cs = ConditionSet::compile(&doc).unwrap();
        let ledger = ClientLedger::new();
        let (counter, _dir) = empty_counter();
        let geo: Arc<dyn GeoOracle> = Arc::new(NoGeoOracle);
        assert!(cs.evaluate(&req("/a", "curl/8", "1.2.3.4"), &ledger, &counter, &geo));
    }

    #[test]
    fn invalid_regex_fails_to_compile() {
        let doc = ConditionSetDoc {
            authorized_useragents: Some(vec!["(".to_string()]),
            ..Default::default()
        };
        assert!(ConditionSet::compile(&doc).is_err());
    }

    #[test]
    fn merge_global_under_route_lets_route_win_scalars() {
        let route = ConditionSetDoc {
            serve: Some(5),
            ..Default::default()
        };
        let global = ConditionSetDoc {
            serve: Some(1),
            authorized_methods: Some(vec!["GET".to_string()]),
            ..Default::default()
        };
        let merged = route.merge_under(&global);
        assert_eq!(merged.serve, Some(5));
        assert_eq!(merged.authorized_methods, Some(vec!["GET".to_string()]));
    }

    #[test]
    fn merge_concatenates_list_fields() {
        let route = ConditionSetDoc {
            authorized_methods: Some(vec!["GET".to_string()]),
            ..Default::default()
        };
        let global = ConditionSetDoc {
            authorized_methods: Some(vec!["POST".to_string()]),
            ..Default::default()
        };
        let merged = route.merge_under(&global);
        assert_eq!(
            merged.authorized_methods,
            Some(vec!["GET".to_string(), "POST".to_string()])
        );
    }
}
