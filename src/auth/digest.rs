//! HTTP Digest access authentication (RFC 7616, RFC 2617).
//!
//! reqwest has no digest support, so the challenge from a `401` response is
//! parsed here and answered with a computed `Authorization` header.

use md5::Md5;
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Hash algorithm named by the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "MD5" => Some(DigestAlgorithm::Md5),
            "MD5-SESS" => Some(DigestAlgorithm::Md5Sess),
            "SHA-256" => Some(DigestAlgorithm::Sha256),
            "SHA-256-SESS" => Some(DigestAlgorithm::Sha256Sess),
            _ => None,
        }
    }

    fn hash(&self, data: &str) -> String {
        match self {
            DigestAlgorithm::Md5 | DigestAlgorithm::Md5Sess => hex::encode(Md5::digest(data)),
            DigestAlgorithm::Sha256 | DigestAlgorithm::Sha256Sess => {
                hex::encode(Sha256::digest(data))
            }
        }
    }

    fn is_session(&self) -> bool {
        matches!(self, DigestAlgorithm::Md5Sess | DigestAlgorithm::Sha256Sess)
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Md5 => write!(f, "MD5"),
            DigestAlgorithm::Md5Sess => write!(f, "MD5-sess"),
            DigestAlgorithm::Sha256 => write!(f, "SHA-256"),
            DigestAlgorithm::Sha256Sess => write!(f, "SHA-256-sess"),
        }
    }
}

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    /// Whether the server offered `qop=auth`.
    pub qop_auth: bool,
    pub algorithm: DigestAlgorithm,
    pub explicit_algorithm: bool,
}

impl DigestChallenge {
    /// Parses a header value. Returns `None` for non-digest schemes, missing
    /// nonce, unsupported algorithms, or challenges that only allow `auth-int`.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim_start();
        let (scheme, rest) = header.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }

        let params = parse_params(rest);
        let nonce = params.get("nonce")?.clone();
        let (algorithm, explicit_algorithm) = match params.get("algorithm") {
            Some(value) => (DigestAlgorithm::parse(value)?, true),
            None => (DigestAlgorithm::Md5, false),
        };

        let qop_auth = match params.get("qop") {
            Some(qop) => {
                let offered = qop.split(',').map(str::trim).any(|q| q == "auth");
                if !offered {
                    return None;
                }
                true
            }
            None => false,
        };

        Some(Self {
            realm: params.get("realm").cloned().unwrap_or_default(),
            nonce,
            opaque: params.get("opaque").cloned(),
            qop_auth,
            algorithm,
            explicit_algorithm,
        })
    }

    /// Computes the `response` value for one request.
    pub fn response(
        &self,
        method: &str,
        uri: &str,
        user: &str,
        password: &str,
        cnonce: &str,
        nc: &str,
    ) -> String {
        let algorithm = self.algorithm;
        let mut ha1 = algorithm.hash(&format!("{}:{}:{}", user, self.realm, password));
        if algorithm.is_session() {
            ha1 = algorithm.hash(&format!("{}:{}:{}", ha1, self.nonce, cnonce));
        }
        let ha2 = algorithm.hash(&format!("{}:{}", method, uri));

        if self.qop_auth {
            algorithm.hash(&format!(
                "{}:{}:{}:{}:auth:{}",
                ha1, self.nonce, nc, cnonce, ha2
            ))
        } else {
            algorithm.hash(&format!("{}:{}:{}", ha1, self.nonce, ha2))
        }
    }

    /// Builds the full `Authorization` header value with a fixed cnonce.
    pub fn authorization_with_cnonce(
        &self,
        method: &str,
        url: &Url,
        user: &str,
        password: &str,
        cnonce: &str,
    ) -> String {
        let nc = "00000001";
        let uri = request_uri(url);
        let response = self.response(method, &uri, user, password, cnonce, nc);

        let mut value = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            quote(user),
            quote(&self.realm),
            quote(&self.nonce),
            quote(&uri),
            response
        );
        if self.explicit_algorithm {
            value.push_str(&format!(", algorithm={}", self.algorithm));
        }
        if let Some(opaque) = &self.opaque {
            value.push_str(&format!(", opaque=\"{}\"", quote(opaque)));
        }
        if self.qop_auth {
            value.push_str(&format!(", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce));
        }
        value
    }

    /// Builds the `Authorization` header value with a random cnonce.
    pub fn authorization(&self, method: &str, url: &Url, user: &str, password: &str) -> String {
        let cnonce = hex::encode(rand::random::<[u8; 8]>());
        self.authorization_with_cnonce(method, url, user, password, &cnonce)
    }
}

/// Path plus query, as sent on the request line.
fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Splits `key=value, key="quoted, value"` pairs. Keys are lowercased.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.trim().is_empty() && chars.peek().is_none() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        _ => value.push(c),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                value = value.trim().to_string();
            }
        }

        let key = key.trim().to_ascii_lowercase();
        if !key.is_empty() {
            params.insert(key, value);
        }
        if chars.peek().is_none() {
            break;
        }
    }

    params
}
