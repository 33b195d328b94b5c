//! Session cookie codec.
//!
//! The session travels in `sb-<project-ref>-auth-token`, the same cookie the
//! Supabase browser helpers use: JSON, `base64-` prefixed, split into `.0`,
//! `.1`, ... chunks once it outgrows a single cookie.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use time::Duration;

use crate::{
    config::{AppConfig, Env},
    identity::Session,
};

/// Largest value written into a single cookie.
pub const MAX_CHUNK_SIZE: usize = 3180;

/// 400 days, the longest lifetime browsers honour.
pub const MAX_AGE_SECS: i64 = 400 * 24 * 60 * 60;

const BASE64_PREFIX: &str = "base64-";

// Highest chunk index cleared on logout; far beyond any real session.
const MAX_CHUNKS: usize = 16;

/// SessionCookies
///
/// Reads and writes the session cookie for one Supabase project.
#[derive(Clone, Debug)]
pub struct SessionCookies {
    name: String,
    secure: bool,
}

impl SessionCookies {
    pub fn new(project_ref: &str, secure: bool) -> Self {
        Self {
            name: format!("sb-{project_ref}-auth-token"),
            secure,
        }
    }

    pub fn for_config(config: &AppConfig) -> Self {
        Self::new(&config.project_ref(), config.env == Env::Production)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn chunk_name(&self, index: usize) -> String {
        format!("{}.{}", self.name, index)
    }

    /// read
    ///
    /// Extracts the session from the request cookies. A missing or undecodable
    /// cookie is simply "no session".
    pub fn read(&self, jar: &CookieJar) -> Option<Session> {
        let raw = match jar.get(&self.name) {
            Some(cookie) => cookie.value().to_string(),
            None => {
                let chunks: Vec<String> = (0..)
                    .map_while(|i| jar.get(&self.chunk_name(i)).map(|c| c.value().to_string()))
                    .collect();
                if chunks.is_empty() {
                    return None;
                }
                chunks.concat()
            }
        };

        let session = decode(&raw);
        if session.is_none() {
            tracing::debug!(cookie = %self.name, "ignoring undecodable session cookie");
        }
        session
    }

    /// write
    ///
    /// Stores `session`, chunking when needed and expiring whichever layout
    /// (single or chunked) is no longer in use.
    pub fn write(&self, jar: CookieJar, session: &Session) -> CookieJar {
        let encoded = encode(session);
        let mut jar = jar;

        if encoded.len() <= MAX_CHUNK_SIZE {
            for i in 0..MAX_CHUNKS {
                jar = self.expire(jar, self.chunk_name(i));
            }
            return jar.add(self.build(self.name.clone(), encoded));
        }

        jar = self.expire(jar, self.name.clone());
        let chunks: Vec<&str> = encoded
            .as_bytes()
            .chunks(MAX_CHUNK_SIZE)
            // base64 output is ASCII, so byte chunks are valid UTF-8.
            .filter_map(|chunk| std::str::from_utf8(chunk).ok())
            .collect();
        for i in chunks.len()..MAX_CHUNKS {
            jar = self.expire(jar, self.chunk_name(i));
        }
        for (i, chunk) in chunks.into_iter().enumerate() {
            jar = jar.add(self.build(self.chunk_name(i), chunk.to_string()));
        }
        jar
    }

    /// Expires every form of the session cookie the browser sent.
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        let mut jar = self.expire(jar, self.name.clone());
        for i in 0..MAX_CHUNKS {
            jar = self.expire(jar, self.chunk_name(i));
        }
        jar
    }

    // Only cookies the browser actually sent produce a removal header.
    fn expire(&self, jar: CookieJar, name: String) -> CookieJar {
        if jar.get(&name).is_none() {
            return jar;
        }
        jar.remove(Cookie::build((name, "")).path("/"))
    }

    fn build(&self, name: String, value: String) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(Duration::seconds(MAX_AGE_SECS))
            .build()
    }
}

/// Serialises a session into the `base64-` cookie format.
pub fn encode(session: &Session) -> String {
    // Serialising plain strings and numbers cannot fail.
    let json = serde_json::to_vec(session).unwrap_or_default();
    format!("{BASE64_PREFIX}{}", URL_SAFE_NO_PAD.encode(json))
}

/// Parses either cookie format: `base64-` prefixed or raw JSON.
pub fn decode(raw: &str) -> Option<Session> {
    match raw.strip_prefix(BASE64_PREFIX) {
        Some(encoded) => {
            let bytes = URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()?;
            serde_json::from_slice(&bytes).ok()
        }
        None => serde_json::from_str(raw).ok(),
    }
}
