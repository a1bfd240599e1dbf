//! End-to-end scenarios from spec §8, exercised directly against
//! `satellite-core`'s route table + evaluator + ledger + counter, without
//! the HTTP/TLS layer `satellite-server` adds on top.

use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::sync::Arc;

use satellite_core::geo::{GeoOracle, NoGeoOracle};
use satellite_core::{ClientLedger, HitCounter, RequestContext, RouteTable};

fn request(uri: &str, ua: &str, ip: &str) -> RequestContext {
    RequestContext {
        method: "GET".into(),
        uri: uri.into(),
        user_agent: ua.into(),
        headers: HashMap::new(),
        remote_addr: format!("{ip}:54321"),
        client_ip: ip.parse::<IpAddr>().unwrap(),
        ja3: None,
        dump: vec![],
        body: vec![],
    }
}

fn fixture(manifest: &str) -> (tempfile::TempDir, RouteTable, ClientLedger, HitCounter) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("pathList.yml"), manifest).unwrap();
    let table = RouteTable::load(dir.path(), dir.path().join("pathList.yml"), None).unwrap();
    let ledger = ClientLedger::new();
    let counter = HitCounter::open_sled(dir.path().join("db")).unwrap();
    (dir, table, ledger, counter)
}

#[test]
fn s1_serve_cap_one_then_404() {
    let manifest = r#"
- path: /payload.bin
  hosted_file: /payload.bin
  authorized_useragents: ["curl/.*"]
  serve: 1
"#;
    let (dir, table, ledger, counter) = fixture(manifest);
    let geo: Arc<dyn GeoOracle> = Arc::new(NoGeoOracle);

    let snapshot = table.current();
    let req1 = request("/payload.bin", "curl/8", "9.9.9.9");
    let route1 = snapshot.match_uri(&req1.uri, dir.path()).unwrap();
    assert!(route1.conditions.evaluate(&req1, &ledger, &counter, &geo));
    counter.increment(&req1.uri).unwrap();
    ledger.hit(req1.client_ip, &req1.uri);

    let req2 = request("/payload.bin", "curl/8", "9.9.9.9");
    let route2 = snapshot.match_uri(&req2.uri, dir.path()).unwrap();
    assert!(!route2.conditions.evaluate(&req2, &ledger, &counter, &geo));
}

#[test]
fn s3_prereq_chain_unlocks_after_hitting_a() {
    let manifest = r#"
- path: /a
  hosted_file: /a
- path: /b
  hosted_file: /b
  prereq: ["/a"]
"#;
    let (dir, table, ledger, counter) = fixture(manifest);
    let geo: Arc<dyn GeoOracle> = Arc::new(NoGeoOracle);
    let snapshot = table.current();
    let ip: IpAddr = "1.2.3.4".parse().unwrap();

    let req_b = request("/b", "any", "1.2.3.4");
    let route_b = snapshot.match_uri(&req_b.uri, dir.path()).unwrap();
    assert!(!route_b.conditions.evaluate(&req_b, &ledger, &counter, &geo));

    let req_a = request("/a", "any", "1.2.3.4");
    let route_a = snapshot.match_uri(&req_a.uri, dir.path()).unwrap();
    assert!(route_a.conditions.evaluate(&req_a, &ledger, &counter, &geo));
    ledger.hit(ip, "/a");

    let req_b2 = request("/b", "any", "1.2.3.4");
    let route_b2 = snapshot.match_uri(&req_b2.uri, dir.path()).unwrap();
    assert!(route_b2.conditions.evaluate(&req_b2, &ledger, &counter, &geo));
}

#[test]
fn b2_prereq_is_a_suffix_test_not_a_consume() {
    let manifest = r#"
- path: /a
  hosted_file: /a
- path: /b
  hosted_file: /b
  prereq: ["/a"]
"#;
    let (dir, table, ledger, counter) = fixture(manifest);
    let geo: Arc<dyn GeoOracle> = Arc::new(NoGeoOracle);
    let snapshot = table.current();
    let ip: IpAddr = "5.5.5.5".parse().unwrap();
    ledger.hit(ip, "/a");

    for _ in 0..2 {
        let req_b = request("/b", "any", "5.5.5.5");
        let route_b = snapshot.match_uri(&req_b.uri, dir.path()).unwrap();
        assert!(route_b.conditions.evaluate(&req_b, &ledger, &counter, &geo));
    }
}

#[test]
fn s4_ja3_gate_requires_matching_hash() {
    use satellite_core::Ja3Hash;

    let client_hash = Ja3Hash::from_canonical("771,4865-4866-4867,0-23-65281,29-23-24,0");
    let manifest = format!(
        "- path: /secret\n  hosted_file: /secret\n  authorized_ja3: [\"{}\"]\n",
        client_hash.as_str()
    );
    let (dir, table, ledger, counter) = fixture(&manifest);
    let geo: Arc<dyn GeoOracle> = Arc::new(NoGeoOracle);
    let snapshot = table.current();

    let mut good = request("/secret", "any", "1.1.1.1");
    good.ja3 = Some(client_hash);
    let route = snapshot.match_uri(&good.uri, dir.path()).unwrap();
    assert!(route.conditions.evaluate(&good, &ledger, &counter, &geo));

    let mut bad = request("/secret", "any", "1.1.1.1");
    bad.ja3 = Some(Ja3Hash::from_canonical("771,9999,0,0,0"));
    let route = snapshot.match_uri(&bad.uri, dir.path()).unwrap();
    assert!(!route.conditions.evaluate(&bad, &ledger, &counter, &geo));
}
