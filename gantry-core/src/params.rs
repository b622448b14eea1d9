//! Path parameter storage.
//!
//! The common case is a handful of captures per route, so parameters live
//! in an inline array and only spill to the heap past [`INLINE_PARAM_COUNT`]
//! entries. Lookup is a linear scan over the live count.

use smallvec::SmallVec;

/// Parameters stored inline before spilling to the heap.
pub const INLINE_PARAM_COUNT: usize = 4;

/// A route's extracted path parameters.
///
/// The wildcard capture is an ordinary entry under the key `*` (and under
/// its declared name when the pattern named it, e.g. `*rest`).
#[derive(Debug, Default)]
pub struct PathParams {
    entries: SmallVec<[(String, String); INLINE_PARAM_COUNT]>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a capture. Names are not deduplicated; the first entry wins
    /// on lookup.
    #[inline]
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Look up a capture by name.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The wildcard remainder, when the matched pattern had one.
    #[inline]
    pub fn wildcard(&self) -> Option<&str> {
        self.get("*")
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the store has spilled to the heap.
    #[inline]
    pub fn is_inline(&self) -> bool {
        !self.entries.spilled()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Drop captures past `len`. Used by the matcher to undo a parameter
    /// binding when backtracking to the wildcard branch.
    #[inline]
    pub(crate) fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Clear everything, releasing any heap spill so a pooled reset cannot
    /// leak stale parameters into the next request.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.entries.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_get() {
        let mut params = PathParams::new();
        params.push("id", "42");
        params.push("name", "zed");
        assert_eq!(params.get("id"), Some("42"));
        assert_eq!(params.get("name"), Some("zed"));
        assert_eq!(params.get("missing"), None);
        assert!(params.is_inline());
    }

    #[test]
    fn test_wildcard_key() {
        let mut params = PathParams::new();
        params.push("*", "css/x.css");
        assert_eq!(params.wildcard(), Some("css/x.css"));
    }

    #[test]
    fn test_overflow_spills() {
        let mut params = PathParams::new();
        for i in 0..6 {
            params.push(format!("p{i}"), format!("{i}"));
        }
        assert!(!params.is_inline());
        assert_eq!(params.get("p5"), Some("5"));
        assert_eq!(params.len(), 6);
    }

    #[test]
    fn test_reset_clears_overflow() {
        let mut params = PathParams::new();
        for i in 0..8 {
            params.push(format!("p{i}"), format!("{i}"));
        }
        params.reset();
        assert_eq!(params.len(), 0);
        assert!(params.is_inline());
        assert_eq!(params.get("p0"), None);
    }

    #[test]
    fn test_truncate_undoes_binding() {
        let mut params = PathParams::new();
        params.push("x", "1");
        let mark = params.len();
        params.push("y", "2");
        params.truncate(mark);
        assert_eq!(params.get("x"), Some("1"));
        assert_eq!(params.get("y"), None);
    }
}
