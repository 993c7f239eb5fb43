use std::fmt;

/// A sorted, deduplicated set of tags.
///
/// Tags are normalized on construction, so two sets built from the same tags in any order, with or without
/// duplicates, compare and hash equal.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TagSet(Vec<String>);

impl TagSet {
    /// Returns `true` if the set has no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of tags in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set contains `tag`.
    pub fn contains(&self, tag: &str) -> bool {
        self.0.binary_search_by(|t| t.as_str().cmp(tag)).is_ok()
    }

    /// Returns an iterator over the tags, in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Returns the tags as a sorted slice.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Consumes the set, returning the sorted tags.
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl<S: Into<String>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut tags: Vec<String> = iter.into_iter().map(Into::into).collect();
        tags.sort_unstable();
        tags.dedup();
        Self(tags)
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(tag)?;
        }
        Ok(())
    }
}

/// Tags in their raw, comma-separated wire form.
///
/// Iterating yields each tag as a borrowed slice of the input without allocating. Empty entries, such as the one
/// produced by `a,,b`, are skipped.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RawTags<'a> {
    raw: &'a str,
}

impl<'a> RawTags<'a> {
    /// Wraps the given comma-separated tags.
    pub const fn new(raw: &'a str) -> Self {
        Self { raw }
    }

    /// Returns `true` if there are no non-empty tags.
    pub fn is_empty(&self) -> bool {
        self.into_iter().next().is_none()
    }

    /// Returns the tags exactly as they appeared on the wire.
    pub const fn as_str(&self) -> &'a str {
        self.raw
    }
}

impl<'a> IntoIterator for RawTags<'a> {
    type Item = &'a str;
    type IntoIter = RawTagsIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        RawTagsIter { remaining: self.raw }
    }
}

/// Iterator over [`RawTags`].
#[derive(Clone)]
pub struct RawTagsIter<'a> {
    remaining: &'a str,
}

impl<'a> Iterator for RawTagsIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining.is_empty() {
                return None;
            }

            let tag = match memchr::memchr(b',', self.remaining.as_bytes()) {
                Some(idx) => {
                    let (tag, tail) = (&self.remaining[..idx], &self.remaining[idx + 1..]);
                    self.remaining = tail;
                    tag
                }
                None => std::mem::take(&mut self.remaining),
            };

            if !tag.is_empty() {
                return Some(tag);
            }
        }
    }
}
