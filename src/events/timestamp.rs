use chrono::{DateTime, Utc};

/// Wall-clock moment an event was created, used for display (Discord's
/// relative-timestamp markup) and for ordering diagnostics in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn unix(&self) -> i64 {
        self.0.timestamp()
    }

    /// Discord's relative-timestamp markup, e.g. `<t:1700000000:R>`.
    pub fn discord_relative(&self) -> String {
        format!("<t:{}:R>", self.unix())
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discord_relative_format() {
        let ts = Timestamp::now();
        let rendered = ts.discord_relative();
        assert!(rendered.starts_with("<t:"));
        assert!(rendered.ends_with(":R>"));
    }
}
