//! # Range Request
//!
//! Minimal model of an incoming byte-range request: the target URL, the
//! parsed range offset, and whether the request was partial at all.

use url::Url;

use crate::error::{ProxyCacheError, Result};

/// A client request for a (possibly partial) byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub url: String,
    /// First requested byte; 0 for full requests.
    pub offset: u64,
    /// Whether a `Range` header was present.
    pub partial: bool,
}

impl RangeRequest {
    /// Build a request from the target URL and an optional `Range`
    /// header value.
    ///
    /// Only the `bytes=N-` form is honored; a `bytes=N-M` end bound is
    /// accepted and ignored, since the proxy streams to end-of-source
    /// anyway. Malformed URLs or range values are rejected as
    /// [`ProxyCacheError::InvalidArgument`].
    pub fn new(url: &str, range: Option<&str>) -> Result<Self> {
        Url::parse(url)
            .map_err(|e| ProxyCacheError::InvalidArgument(format!("invalid url {url}: {e}")))?;
        let offset = match range {
            Some(value) => Some(parse_range_offset(value)?),
            None => None,
        };
        Ok(Self {
            url: url.to_owned(),
            offset: offset.unwrap_or(0),
            partial: offset.is_some(),
        })
    }
}

fn parse_range_offset(value: &str) -> Result<u64> {
    let invalid =
        || ProxyCacheError::InvalidArgument(format!("unsupported range value: {value}"));
    let ranges = value.trim().strip_prefix("bytes=").ok_or_else(invalid)?;
    let (start, _end) = ranges.split_once('-').ok_or_else(invalid)?;
    start.trim().parse().map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://example.com/a.mp4";

    #[test]
    fn test_full_request() {
        let request = RangeRequest::new(URL, None).unwrap();
        assert_eq!(request.offset, 0);
        assert!(!request.partial);
    }

    #[test]
    fn test_open_ended_range() {
        let request = RangeRequest::new(URL, Some("bytes=50-")).unwrap();
        assert_eq!(request.offset, 50);
        assert!(request.partial);
    }

    #[test]
    fn test_zero_offset_range_is_still_partial() {
        let request = RangeRequest::new(URL, Some("bytes=0-")).unwrap();
        assert_eq!(request.offset, 0);
        assert!(request.partial);
    }

    #[test]
    fn test_bounded_range_end_is_ignored() {
        let request = RangeRequest::new(URL, Some("bytes=10-20")).unwrap();
        assert_eq!(request.offset, 10);
        assert!(request.partial);
    }

    #[test]
    fn test_malformed_range_is_rejected() {
        assert!(RangeRequest::new(URL, Some("bytes=-500")).is_err());
        assert!(RangeRequest::new(URL, Some("items=0-")).is_err());
        assert!(RangeRequest::new(URL, Some("bytes=abc-")).is_err());
    }

    #[test]
    fn test_malformed_url_is_rejected() {
        assert!(matches!(
            RangeRequest::new("not a url", None),
            Err(ProxyCacheError::InvalidArgument(_))
        ));
    }
}
