//! Country-of-IP oracle (C3). An opaque "country-of-IP" lookup; may be
//! absent entirely, in which case geoip predicates are skipped rather than
//! evaluated. `has_db()` is how the evaluator distinguishes "unconfigured"
//! from "configured but lookup failed" (the latter fails closed).

use std::net::IpAddr;
use std::path::Path;

use crate::error::EvalError;

pub trait GeoOracle: Send + Sync {
    fn has_db(&self) -> bool;
    fn country_of(&self, ip: &IpAddr) -> Result<String, EvalError>;
}

/// No GeoIP database configured; geoip predicates are always skipped.
#[derive(Default)]
pub struct NoGeoOracle;

impl GeoOracle for NoGeoOracle {
    fn has_db(&self) -> bool {
        false
    }

    fn country_of(&self, _ip: &IpAddr) -> Result<String, EvalError> {
        Err(EvalError::GeoLookup("no geoip database configured".into()))
    }
}

/// GeoLite2-Country (or compatible GeoIP2) database reader.
pub struct MaxMindGeoOracle {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindGeoOracle {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, maxminddb::MaxMindDbError> {
        Ok(MaxMindGeoOracle {
            reader: maxminddb::Reader::open_readfile(path)?,
        })
    }
}

impl GeoOracle for MaxMindGeoOracle {
    fn has_db(&self) -> bool {
        true
    }

    fn country_of(&self, ip: &IpAddr) -> Result<String, EvalError> {
        let country: Option<maxminddb::geoip2::Country> = self
            .reader
            .lookup(*ip)
            .map_err(|e| EvalError::GeoLookup(e.to_string()))?;
        country
            .and_then(|c| c.country)
            .and_then(|c| c.iso_code)
            .map(|code| code.to_string())
            .ok_or_else(|| EvalError::GeoLookup(format!("no country entry for {ip}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_oracle_reports_no_db() {
        let oracle = NoGeoOracle;
        assert!(!oracle.has_db());
    }

    #[test]
    fn unconfigured_oracle_lookup_is_an_error() {
        let oracle = NoGeoOracle;
        assert!(oracle.country_of(&"1.2.3.4".parse().unwrap()).is_err());
    }
}
