use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;
use crate::core::{Result, UploadError};

pub const MTIME: HeaderName = HeaderName::from_static("x-oc-mtime");
pub const TOTAL_LENGTH: HeaderName = HeaderName::from_static("oc-total-length");
pub const DESTINATION: HeaderName = HeaderName::from_static("destination");

/// Modification time header in Unix seconds.
///
/// Left out when the timestamp is not strictly positive: some filesystems
/// (FAT/NTFS on SD cards) report an epoch that yields zero or negative values.
pub fn mtime_header(last_modified_ms: i64) -> Option<(HeaderName, HeaderValue)> {
    let mtime = last_modified_ms.div_euclid(1000);
    if mtime > 0 {
        Some((MTIME, HeaderValue::from(mtime)))
    } else {
        None
    }
}

pub fn insert_mtime(headers: &mut HeaderMap, last_modified_ms: i64) {
    if let Some((name, value)) = mtime_header(last_modified_ms) {
        headers.insert(name, value);
    }
}

/// Appends `relative` to `base`, one percent-encoded segment per path component.
pub fn join_url(base: &str, relative: &str) -> Result<String> {
    let mut url = Url::parse(base)?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| UploadError::InvalidDestination(base.to_string()))?;
        segments.pop_if_empty();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            segments.push(segment);
        }
    }

    Ok(url.to_string())
}

/// Same as [`join_url`] for plain `/`-separated display paths.
pub fn join_path(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_matches('/');
    if name.is_empty() {
        return if base.is_empty() { "/".to_string() } else { base.to_string() };
    }
    format!("{}/{}", base, name)
}

pub fn to_header_map<'a, I>(pairs: I) -> Result<HeaderMap>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        headers.insert(HeaderName::from_bytes(name.as_bytes())?, HeaderValue::from_str(value)?);
    }
    Ok(headers)
}
