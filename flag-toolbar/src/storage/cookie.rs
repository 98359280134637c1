use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::Duration;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::errors::{SnapshotError, StorageError};

/// Cookie the snapshot is mirrored into for server-side rendering.
pub const TOOLBAR_COOKIE_NAME: &str = "unleash-toolbar-state";
pub const TOOLBAR_COOKIE_MAX_AGE_DAYS: i64 = 7;

/// Characters `encodeURIComponent` leaves untouched.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_cookie_value(raw: &str) -> String {
    utf8_percent_encode(raw, URI_COMPONENT).to_string()
}

pub fn decode_cookie_value(encoded: &str) -> Result<String, SnapshotError> {
    Ok(percent_decode_str(encoded).decode_utf8()?.into_owned())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::Strict => write!(f, "Strict"),
            SameSite::Lax => write!(f, "Lax"),
            SameSite::None => write!(f, "None"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub max_age: Duration,
    pub path: String,
    pub same_site: SameSite,
}

impl Default for CookieOptions {
    fn default() -> Self {
        CookieOptions {
            max_age: Duration::days(TOOLBAR_COOKIE_MAX_AGE_DAYS),
            path: "/".to_string(),
            same_site: SameSite::Lax,
        }
    }
}

impl CookieOptions {
    /// Renders a `Set-Cookie` header value. `value` must already be encoded.
    pub fn set_cookie_header(&self, name: &str, value: &str) -> String {
        format!(
            "{name}={value}; Path={}; Max-Age={}; SameSite={}",
            self.path,
            self.max_age.num_seconds(),
            self.same_site
        )
    }

    /// Header value that makes a browser drop the cookie.
    pub fn expire_cookie_header(&self, name: &str) -> String {
        format!(
            "{name}=; Path={}; Max-Age=0; SameSite={}",
            self.path, self.same_site
        )
    }
}

/// Read side of a cookie store, as seen by a server handling a request.
pub trait CookieStore: Send + Sync {
    fn get(&self, name: &str) -> Option<Cookie>;
}

/// Writable cookie store used for mirroring the snapshot.
pub trait CookieJar: CookieStore {
    fn set(&self, name: &str, value: &str, options: &CookieOptions) -> Result<(), StorageError>;
    fn remove(&self, name: &str) -> Result<(), StorageError>;
}

#[derive(Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<HashMap<String, (String, CookieOptions)>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a jar from a request `Cookie` header (`a=1; b=2`). Values are
    /// kept encoded, exactly as a browser would send them.
    pub fn from_cookie_header(header: &str) -> Self {
        let jar = MemoryCookieJar::new();
        {
            let mut cookies = jar.lock_cookies();
            for pair in header.split(';') {
                if let Some((name, value)) = pair.trim().split_once('=') {
                    cookies.insert(
                        name.trim().to_string(),
                        (value.trim().to_string(), CookieOptions::default()),
                    );
                }
            }
        }
        jar
    }

    fn lock_cookies(&self) -> MutexGuard<'_, HashMap<String, (String, CookieOptions)>> {
        match self.cookies.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn options(&self, name: &str) -> Option<CookieOptions> {
        self.lock_cookies()
            .get(name)
            .map(|(_, options)| options.clone())
    }
}

impl CookieStore for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<Cookie> {
        self.lock_cookies().get(name).map(|(value, _)| Cookie {
            value: value.clone(),
        })
    }
}

impl CookieJar for MemoryCookieJar {
    fn set(&self, name: &str, value: &str, options: &CookieOptions) -> Result<(), StorageError> {
        self.lock_cookies()
            .insert(name.to_string(), (value.to_string(), options.clone()));
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        self.lock_cookies().remove(name);
        Ok(())
    }
}
