//! Nostr event model and store filters.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind tag for auction-creation events.
pub const KIND_AUCTION: u32 = 33222;

/// Kind tag for bid events.
pub const KIND_BID: u32 = 1077;

/// A Nostr event as submitted to the relay.
///
/// Events are content-addressed: `id` is the hex SHA-256 of the canonical
/// serialisation returned by [`Event::canonical_json`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier (hex SHA-256).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Unix timestamp of creation, in seconds.
    pub created_at: u64,
    /// Kind number selecting validation rules.
    pub kind: u32,
    /// Tags, each a list of strings whose first element is the tag name.
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    /// Event content.
    #[serde(default)]
    pub content: String,
    /// Schnorr signature over `id`.
    #[serde(default)]
    pub sig: String,
}

impl Event {
    /// Build an event and fill in its content-derived id.
    ///
    /// The signature is left empty; verifying it is the transport's job.
    #[must_use]
    pub fn new(
        pubkey: impl Into<String>,
        created_at: u64,
        kind: u32,
        tags: Vec<Vec<String>>,
        content: impl Into<String>,
    ) -> Self {
        let mut event = Self {
            id: String::new(),
            pubkey: pubkey.into(),
            created_at,
            kind,
            tags,
            content: content.into(),
            sig: String::new(),
        };
        event.id = event.compute_id();
        event
    }

    /// NIP-01 serialisation: `[0, pubkey, created_at, kind, tags, content]`.
    #[must_use]
    pub fn canonical_json(&self) -> String {
        serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ])
        .to_string()
    }

    /// Compute the id this event should carry.
    #[must_use]
    pub fn compute_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether `id` matches the event's content.
    #[must_use]
    pub fn verify_id(&self) -> bool {
        self.id.eq_ignore_ascii_case(&self.compute_id())
    }

    /// First value of the first tag named `name`.
    #[must_use]
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// All first values of tags named `name`.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    /// Short form of the id for log lines.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(self.id.as_str())
    }
}

/// Query filter over stored events.
///
/// Empty fields match everything; populated fields must all match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Event ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    /// Author public keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Kinds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u32>,
    /// Referenced event ids (`#e`).
    #[serde(default, rename = "#e", skip_serializing_if = "Vec::is_empty")]
    pub event_refs: Vec<String>,
    /// Maximum number of results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    /// Filter matching a single id.
    #[must_use]
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            ids: vec![id.into()],
            ..Self::default()
        }
    }

    /// Restrict to the given kind.
    #[must_use]
    pub fn kind(mut self, kind: u32) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Restrict to events referencing `event_id` through an `e` tag.
    #[must_use]
    pub fn referencing(mut self, event_id: impl Into<String>) -> Self {
        self.event_refs.push(event_id.into());
        self
    }

    /// Whether `event` satisfies the filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        (self.ids.is_empty() || self.ids.iter().any(|id| id == &event.id))
            && (self.authors.is_empty() || self.authors.iter().any(|a| a == &event.pubkey))
            && (self.kinds.is_empty() || self.kinds.contains(&event.kind))
            && (self.event_refs.is_empty()
                || event
                    .tag_values("e")
                    .any(|e| self.event_refs.iter().any(|r| r == e)))
    }
}
