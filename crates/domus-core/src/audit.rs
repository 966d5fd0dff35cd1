//! Structs used for auditing
use time::OffsetDateTime;

/// Who did something and when
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Activity<S> {
    pub who: S,
    pub when: OffsetDateTime,
}

impl<S> Activity<S> {
    pub fn now(who: impl Into<S>) -> Self {
        Self {
            who: who.into(),
            when: OffsetDateTime::now_utc(),
        }
    }
}
