use std::fmt;

/// Identifier of the channel (assistant) a conversation targets.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    /// Creates a channel id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the channel id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChannelId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Identifies one question/answer exchange owned by an `ActionCoordinator`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct SlotId(pub u64);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// A cited source attached to an answer.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Source {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

impl Source {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

/// Whether a request starts a new exchange or replaces the last answer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SubmitKind {
    New,
    Regenerate,
}

impl SubmitKind {
    pub fn is_regenerating(self) -> bool {
        matches!(self, Self::Regenerate)
    }
}

/// Outbound request that opens one answer stream.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    pub channel: ChannelId,
    pub kind: SubmitKind,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>, channel: ChannelId, kind: SubmitKind) -> Self {
        Self {
            question: question.into(),
            channel,
            kind,
        }
    }

    /// Value of the `is_regenerating` wire flag.
    pub fn is_regenerating(&self) -> bool {
        self.kind.is_regenerating()
    }
}

/// A finished exchange as recorded for sharing.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
    pub sources: Vec<Source>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regenerate_kind_sets_wire_flag() {
        let req = AnswerRequest::new("q", ChannelId::new("c"), SubmitKind::Regenerate);
        assert!(req.is_regenerating());
        let req = AnswerRequest::new("q", ChannelId::new("c"), SubmitKind::New);
        assert!(!req.is_regenerating());
    }

    #[test]
    fn source_serializes_as_title_and_url() {
        let value = serde_json::to_value(Source::new("T", "U")).expect("serialize");
        assert_eq!(value, serde_json::json!({"title":"T","url":"U"}));
    }
}
