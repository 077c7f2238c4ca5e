use std::fmt::Display;

use headers::Header;
use http::header::{HeaderName, HeaderValue};

use crate::conditional::IfHeader;

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref IF: HeaderName = HeaderName::from_static("if");
    pub(crate) static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    pub(crate) static ref DAV: HeaderName = HeaderName::from_static("dav");
}

// helper.
fn one<'i, I>(values: &mut I) -> Result<&'i HeaderValue, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(invalid)?;
    if values.next().is_some() {
        return Err(invalid());
    }
    Ok(v)
}

// helper
fn invalid() -> headers::Error {
    headers::Error::invalid()
}

// helper
fn map_invalid(_e: impl std::error::Error) -> headers::Error {
    headers::Error::invalid()
}

fn value(s: impl Display) -> HeaderValue {
    HeaderValue::from_str(&s.to_string()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Depth: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        match value.as_bytes() {
            b"0" => Ok(Depth::Zero),
            b"1" => Ok(Depth::One),
            v if v.eq_ignore_ascii_case(b"infinity") => Ok(Depth::Infinity),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// One value of the Timeout: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum DavTimeout {
    Seconds(u32),
    Infinite,
}

/// Timeout: header, in order of client preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Timeout(pub Vec<DavTimeout>);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        let mut v = Vec::new();
        let words = value.to_str().map_err(map_invalid)?.split(',');
        for word in words {
            let word = word.trim();
            let w = if word.eq_ignore_ascii_case("infinite") {
                DavTimeout::Infinite
            } else if word.len() > 7 && word[..7].eq_ignore_ascii_case("second-") {
                let num = word[7..].parse::<u64>().map_err(map_invalid)?;
                DavTimeout::Seconds(num.min(u32::MAX as u64) as u32)
            } else {
                return Err(invalid());
            };
            v.push(w);
        }
        if v.is_empty() {
            return Err(invalid());
        }
        Ok(Timeout(v))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let mut first = true;
        let mut value = String::new();
        for s in &self.0 {
            if !first {
                value.push_str(", ");
            }
            first = false;
            match *s {
                DavTimeout::Seconds(n) => value.push_str(&format!("Second-{}", n)),
                DavTimeout::Infinite => value.push_str("Infinite"),
            }
        }
        values.extend(std::iter::once(self::value(value)));
    }
}

/// Destination: header, unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?.to_str().map_err(map_invalid)?.trim();
        if s.is_empty() {
            return Err(invalid());
        }
        Ok(Destination(s.to_string()))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        values.extend(std::iter::once(value(&self.0)));
    }
}

/// Overwrite: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let line = one(values)?;
        match line.as_bytes() {
            b"F" | b"f" => Ok(Overwrite(false)),
            b"T" | b"t" => Ok(Overwrite(true)),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// Lock-Token: header, the coded url with its angle brackets removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LockTokenHeader(pub String);

impl Header for LockTokenHeader {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?.to_str().map_err(map_invalid)?.trim();
        match s.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
            Some(token) if !token.is_empty() => Ok(LockTokenHeader(token.to_string())),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        values.extend(std::iter::once(value(format!("<{}>", self.0))));
    }
}

/// If: header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct If(pub IfHeader);

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        // multiple If: lines are one list of alternatives.
        let mut src = String::new();
        for v in values {
            src.push_str(v.to_str().map_err(map_invalid)?);
            src.push(' ');
        }
        IfHeader::parse(&src).map(If).map_err(|e| {
            debug!("If: header does not parse: {e}");
            invalid()
        })
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        values.extend(std::iter::once(value(&self.0)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headers::HeaderMapExt;
    use http::HeaderMap;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_static(*v));
        }
        map
    }

    #[test]
    fn depth() {
        let map = headers(&[("depth", "Infinity")]);
        assert_eq!(map.typed_get::<Depth>(), Some(Depth::Infinity));
        let map = headers(&[("depth", "2")]);
        assert!(map.typed_try_get::<Depth>().is_err());
        assert_eq!(HeaderMap::new().typed_get::<Depth>(), None);
    }

    #[test]
    fn timeout() {
        let map = headers(&[("timeout", "Second-600, Infinite")]);
        assert_eq!(
            map.typed_get::<Timeout>(),
            Some(Timeout(vec![DavTimeout::Seconds(600), DavTimeout::Infinite]))
        );
        let map = headers(&[("timeout", "Minute-5")]);
        assert!(map.typed_try_get::<Timeout>().is_err());
    }

    #[test]
    fn overwrite_and_lock_token() {
        let map = headers(&[("overwrite", "T"), ("lock-token", "<urn:uuid:x?=lock>")]);
        assert_eq!(map.typed_get::<Overwrite>(), Some(Overwrite(true)));
        assert_eq!(
            map.typed_get::<LockTokenHeader>(),
            Some(LockTokenHeader("urn:uuid:x?=lock".to_string()))
        );
        let map = headers(&[("overwrite", "yes"), ("lock-token", "urn:uuid:x?=lock")]);
        assert!(map.typed_try_get::<Overwrite>().is_err());
        assert!(map.typed_try_get::<LockTokenHeader>().is_err());
    }

    #[test]
    fn if_header_lines_combine() {
        let map = headers(&[("if", "(<urn:a>)"), ("if", "([\"x\"])")]);
        let If(header) = map.typed_get::<If>().unwrap();
        assert_eq!(header.lists().len(), 2);
        let map = headers(&[("if", "(<urn:a>")]);
        assert!(map.typed_try_get::<If>().is_err());
    }
}
