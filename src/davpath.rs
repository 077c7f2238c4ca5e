//! Utility module to handle the path part of an URL as a namespace path.
//!
//! A [`DavPath`] is a list of path segments, each one kept in canonical
//! percent-encoded form. That encoded form is what the tree store keeps
//! as a node name, so `/a%20b` and `/a b` (from a sloppy client) resolve
//! to the same node.
use std::fmt;

use percent_encoding::{percent_decode, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::errors::DavError;

// characters that are escaped inside a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Path below the handler prefix, as a list of encoded segments.
#[derive(Clone, PartialEq, Eq)]
pub struct DavPath {
    prefix: String,
    segments: Vec<String>,
}

impl fmt::Debug for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_url_string())
    }
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_url_string())
    }
}

fn encode_segment(raw: &str) -> Result<String, DavError> {
    let decoded = percent_decode(raw.as_bytes())
        .decode_utf8()
        .map_err(|_| DavError::InvalidPath)?;
    if decoded.contains('/') || decoded.contains('\0') {
        return Err(DavError::InvalidPath);
    }
    Ok(utf8_percent_encode(&decoded, SEGMENT).to_string())
}

impl DavPath {
    /// Parse a raw, possibly encoded, absolute path.
    ///
    /// Empty segments are dropped, so trailing slashes do not matter.
    /// `.` and `..` are refused.
    #[cfg(test)]
    pub(crate) fn new(src: &str) -> Result<DavPath, DavError> {
        Self::from_str_and_prefix(src, "")
    }

    /// Parse the path of an URI, stripping `prefix` first.
    pub fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> Result<DavPath, DavError> {
        match uri.path() {
            "*" => Err(DavError::InvalidPath),
            path if path.starts_with('/') => Self::from_str_and_prefix(path, prefix),
            _ => Err(DavError::InvalidPath),
        }
    }

    pub(crate) fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, DavError> {
        let prefix = prefix.trim_end_matches('/');
        let rest = match src.strip_prefix(prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => return Err(DavError::InvalidPath),
        };
        let mut segments = Vec::new();
        for seg in rest.split('/') {
            match seg {
                "" => continue,
                "." | ".." => return Err(DavError::InvalidPath),
                seg => segments.push(encode_segment(seg)?),
            }
        }
        Ok(DavPath {
            prefix: prefix.to_string(),
            segments,
        })
    }

    /// Parse a URL from a request header (`Destination`, a tagged `If` list).
    ///
    /// Absolute URLs must point at `host` (the request's `Host` header) when
    /// that is known. Query and fragment are ignored.
    pub fn from_url(src: &str, host: Option<&str>, prefix: &str) -> Result<DavPath, DavError> {
        if src.starts_with('/') {
            let path = src.split(|c: char| c == '?' || c == '#').next().unwrap_or("");
            return Self::from_str_and_prefix(path, prefix);
        }
        let url = url::Url::parse(src).map_err(|_| DavError::InvalidPath)?;
        if let Some(host) = host {
            // a Host: without a port means the scheme's default port.
            let scheme_port = match url.scheme() {
                "http" => Some(80),
                "https" => Some(443),
                _ => None,
            };
            let (hostname, port) = match host.rsplit_once(':') {
                Some((h, p)) => match p.parse::<u16>() {
                    Ok(p) => (h, Some(p)),
                    Err(_) => (host, scheme_port),
                },
                None => (host, scheme_port),
            };
            let same = url
                .host_str()
                .map(|h| h.eq_ignore_ascii_case(hostname))
                .unwrap_or(false);
            if !same || port.is_none() || port != url.port_or_known_default() {
                debug!("davpath: {src} is not on {host}");
                return Err(DavError::InvalidPath);
            }
        }
        Self::from_str_and_prefix(url.path(), prefix)
    }

    /// Full path as stored by the tree: `""` for the root, `/a/b` below.
    pub fn full_path(&self) -> String {
        let mut s = String::new();
        for seg in &self.segments {
            s.push('/');
            s.push_str(seg);
        }
        s
    }

    /// The parent path. The root is its own parent.
    pub fn parent(&self) -> DavPath {
        let mut segments = self.segments.clone();
        segments.pop();
        DavPath {
            prefix: self.prefix.clone(),
            segments,
        }
    }

    /// Last segment, encoded. Empty for the root.
    pub fn file_name(&self) -> &str {
        self.segments.last().map(|s| s.as_str()).unwrap_or("")
    }

    /// Is `self` equal to `other` or somewhere below it.
    pub fn is_within(&self, other: &DavPath) -> bool {
        self.segments.starts_with(&other.segments)
    }

    /// The path as it appears in an URL, prefix included.
    pub fn as_url_string(&self) -> String {
        href_for(&self.prefix, &self.full_path())
    }
}

/// Build a client-facing href from a handler prefix and a stored full path.
pub(crate) fn href_for(prefix: &str, full_path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if full_path.is_empty() {
        format!("{prefix}/")
    } else {
        format!("{prefix}{full_path}")
    }
}

/// Decode a stored segment for display purposes.
pub(crate) fn decode_segment(seg: &str) -> String {
    percent_decode(seg.as_bytes())
        .decode_utf8_lossy()
        .into_owned()
}
