//! Route keys for rate limit buckets

use reqwest::Method;

/// Bucket key for a request: `METHOD /path` with IDs generalised
///
/// Numeric segments become `:id`, the segment after `reactions` becomes
/// `:emoji`, and the query string is dropped.
pub fn route_key(method: &Method, path: &str) -> String {
    let path = path.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();

    let mut key = String::with_capacity(method.as_str().len() + path.len() + 1);
    key.push_str(method.as_str());
    key.push(' ');

    let mut previous = "";
    for (i, segment) in path.split('/').enumerate() {
        if i > 0 {
            key.push('/');
        }
        if previous == "reactions" && !segment.is_empty() {
            key.push_str(":emoji");
        } else if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            key.push_str(":id");
        } else {
            key.push_str(segment);
        }
        previous = segment;
    }

    key
}
