use std::{fmt, hash, sync::Arc};

use crate::{hash::hash_single, TagSet};

/// The identity of an aggregated series: metric name, tags, and host.
///
/// Contexts are cheap to clone and compare. The hash is computed once on construction from the normalized parts,
/// so tag order never produces distinct contexts. An empty hostname is treated the same as no hostname.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    name: String,
    tags: TagSet,
    hostname: Option<String>,
    key: u64,
}

impl Context {
    /// Creates a new `Context`.
    pub fn new<N, I, T>(name: N, tags: I, hostname: Option<String>) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::from_parts(name, tags.into_iter().collect(), hostname)
    }

    /// Creates a new `Context` from an already-normalized tag set.
    pub fn from_parts<N: Into<String>>(name: N, tags: TagSet, hostname: Option<String>) -> Self {
        let name = name.into();
        let hostname = hostname.filter(|h| !h.is_empty());
        let key = hash_single((&name, &tags, &hostname));

        Self {
            inner: Arc::new(ContextInner {
                name,
                tags,
                hostname,
                key,
            }),
        }
    }

    /// Returns the metric name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the tags.
    pub fn tags(&self) -> &TagSet {
        &self.inner.tags
    }

    /// Returns the hostname, if any.
    pub fn hostname(&self) -> Option<&str> {
        self.inner.hostname.as_deref()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }

        self.inner.key == other.inner.key
            && self.inner.name == other.inner.name
            && self.inner.hostname == other.inner.hostname
            && self.inner.tags == other.inner.tags
    }
}

impl Eq for Context {}

impl hash::Hash for Context {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.inner.key);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.inner.name)
            .field("tags", &self.inner.tags)
            .field("hostname", &self.inner.hostname)
            .finish()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.name)?;
        if !self.inner.tags.is_empty() {
            write!(f, "{{{}}}", self.inner.tags)?;
        }
        if let Some(hostname) = &self.inner.hostname {
            write!(f, "@{}", hostname)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::new_fast_hashmap;

    #[test]
    fn tag_order_does_not_matter() {
        let a = Context::new("requests", ["b", "a"], None);
        let b = Context::new("requests", ["a", "b", "a"], None);
        assert_eq!(a, b);

        let mut map = new_fast_hashmap();
        map.insert(a, 1);
        *map.entry(b).or_insert(0) += 1;
        assert_eq!(map.len(), 1);
        assert_eq!(map.values().copied().sum::<i32>(), 2);
    }

    #[test]
    fn distinct_parts_distinct_contexts() {
        let base = Context::new("requests", ["a"], Some("web-1".to_string()));
        assert_ne!(base, Context::new("responses", ["a"], Some("web-1".to_string())));
        assert_ne!(base, Context::new("requests", ["b"], Some("web-1".to_string())));
        assert_ne!(base, Context::new("requests", ["a"], Some("web-2".to_string())));
        assert_ne!(base, Context::new("requests", ["a"], None));
    }

    #[test]
    fn empty_hostname_is_no_hostname() {
        let empty = Context::new("requests", Vec::<String>::new(), Some(String::new()));
        let none = Context::new("requests", Vec::<String>::new(), None);
        assert_eq!(empty, none);
        assert_eq!(empty.hostname(), None);
    }

    #[test]
    fn display() {
        assert_eq!(Context::new("a.b", Vec::<String>::new(), None).to_string(), "a.b");
        assert_eq!(
            Context::new("a.b", ["z:1", "y"], Some("h".to_string())).to_string(),
            "a.b{y,z:1}@h"
        );
    }
}
