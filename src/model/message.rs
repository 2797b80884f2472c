//! Player-facing messages
//!
//! Notification text uses opaque channel prefixes: `P:` personal positive,
//! `N:` personal negative or neutral, `A:` passive/ambient. The core never
//! interprets them; clients route on the prefix.

/// One message addressed to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub recipient_id: i64,
    pub text: String,
    /// Epoch seconds
    pub created_at: i64,
    pub is_read: bool,
}
