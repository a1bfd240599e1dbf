//! JA3 client fingerprint representation.
//!
//! The canonical JA3 string is built by the TLS front end
//! (`satellite-server::tls::clienthello`) from the raw `ClientHello` bytes;
//! this module only owns the MD5-hex digest used by the
//! `authorized_ja3` predicate, per spec Glossary: "TLS version, cipher-suite
//! list, extension list, supported curves, EC point formats -- comma
//! separated -- used as MD5-hex for client identification."

/// Lowercase-hex MD5 digest of a canonical JA3 string, e.g.
/// `"e7d705a3286e19ea42f587b344ee6865"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ja3Hash(String);

impl Ja3Hash {
    /// Hashes a canonical JA3 string (the comma-joined tuple) into its
    /// 32-character lowercase-hex MD5 digest.
    pub fn from_canonical(ja3: &str) -> Self {
        let digest = md5::compute(ja3.as_bytes());
        Ja3Hash(format!("{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Ja3Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_32_char_lowercase_hex() {
        let hash = Ja3Hash::from_canonical("771,4865-4866-4867,0-23-65281,29-23-24,0");
        assert_eq!(hash.as_str().len(), 32);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn same_input_hashes_identically() {
        let a = Ja3Hash::from_canonical("771,4865,0,29,0");
        let b = Ja3Hash::from_canonical("771,4865,0,29,0");
        assert_eq!(a, b);
    }

    #[test]
    fn membership_is_case_sensitive() {
        let hash = Ja3Hash::from_canonical("771,4865,0,29,0");
        let set: std::collections::HashSet<String> = [hash.as_str().to_uppercase()].into();
        assert!(!set.contains(hash.as_str()));
    }
}
