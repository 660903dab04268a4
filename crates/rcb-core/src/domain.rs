/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Destination channel for published posts.
///
/// Telegram accepts either a numeric chat id or a public `@username`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelRef {
    Id(i64),
    Username(String),
}

impl ChannelRef {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(id) = raw.parse::<i64>() {
            return Some(ChannelRef::Id(id));
        }
        let name = raw.trim_start_matches('@');
        if name.is_empty() {
            return None;
        }
        Some(ChannelRef::Username(format!("@{name}")))
    }
}

impl std::fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelRef::Id(id) => write!(f, "{id}"),
            ChannelRef::Username(name) => f.write_str(name),
        }
    }
}

/// Worker lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}
