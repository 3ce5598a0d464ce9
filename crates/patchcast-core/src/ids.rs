//! Identifier types for broadcaster topics and subscriber registrations.
//!
//! A [`Topic`] names the single logical channel a broadcaster serves. A
//! [`SubscriberId`] is the registration handle used to remove a subscriber.
//! Subscriber ids are allocated from a per-broadcaster counter, so ordering
//! by id is the same as ordering by registration time.

use serde::{Deserialize, Serialize};

/// Name of the logical channel served by one broadcaster instance.
///
/// Fixed at construction; there is no way to rename a broadcaster's topic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Topic(String);

impl Topic {
    /// Create a topic from any string-like name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the topic name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Registration handle for one subscriber of a broadcaster.
///
/// Only unique within the broadcaster that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriberId(pub u64);

impl SubscriberId {
    /// Return the raw counter value.
    pub const fn into_inner(self) -> u64 {
        self.0
    }

    /// The id issued after this one.
    pub(crate) const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl core::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_display_is_bare_name() {
        let topic = Topic::from("todos");
        assert_eq!(topic.to_string(), "todos");
        assert_eq!(topic.as_str(), "todos");
    }

    #[test]
    fn subscriber_ids_order_by_allocation() {
        let first = SubscriberId(0);
        let second = first.next();
        assert!(first < second);
        assert_eq!(second.into_inner(), 1);
        assert_eq!(second.to_string(), "sub-1");
    }
}
