//! Outbound prompt assembly.

use crate::types::Turn;
use chrono::{DateTime, Local};
use relay_provider::Message;

/// Everything the upstream caller knows about one inbound turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub query: String,
    /// Nickname of the person asking
    pub display_name: String,
    pub locale: String,
    pub is_private: bool,
    /// Name of the group chat; ignored for private chats
    pub venue_name: String,
}

impl TurnRequest {
    pub fn new(conversation_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            query: query.into(),
            display_name: "noname".to_string(),
            locale: "en".to_string(),
            is_private: true,
            venue_name: "noname chat".to_string(),
        }
    }

    pub fn with_user(mut self, display_name: impl Into<String>, locale: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self.locale = locale.into();
        self
    }

    pub fn in_public(mut self, venue_name: impl Into<String>) -> Self {
        self.is_private = false;
        self.venue_name = venue_name.into();
        self
    }
}

/// Fresh per-turn system text: time, venue, who is asking and their locale.
pub fn situational_preamble(request: &TurnRequest, now: DateTime<Local>) -> String {
    let place = if request.is_private {
        "private chat".to_string()
    } else {
        format!("public chat \"{}\"", request.venue_name)
    };

    format!(
        "Now {}, you are in {} and replying to user with nickname \"{}\", user locale: \"{}\"",
        now.format("%d %B %Y %H:%M"),
        place,
        request.display_name,
        request.locale
    )
}

/// Build the message list for one completion call.
///
/// Order: preamble, style prompt (if any), history, new query.
pub fn compose(preamble: &str, style_prompt: Option<&str>, history: &[Turn], query: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(Message::new("system", preamble));
    if let Some(style) = style_prompt.filter(|s| !s.trim().is_empty()) {
        messages.push(Message::new("system", style));
    }
    messages.extend(history.iter().map(Message::from));
    messages.push(Message::new("user", query));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 0).unwrap()
    }

    #[test]
    fn private_preamble() {
        let request = TurnRequest::new("chat-1", "hello").with_user("alice", "fr");
        let preamble = situational_preamble(&request, fixed_now());
        assert_eq!(
            preamble,
            "Now 05 March 2024 14:07, you are in private chat and replying to user with nickname \"alice\", user locale: \"fr\""
        );
    }

    #[test]
    fn public_preamble_names_the_venue() {
        let request = TurnRequest::new("chat-1", "hello").in_public("Rustaceans");
        let preamble = situational_preamble(&request, fixed_now());
        assert!(preamble.contains("public chat \"Rustaceans\""));
        assert!(preamble.contains("nickname \"noname\""));
    }

    #[test]
    fn compose_orders_messages() {
        let history = vec![Turn::user("q0"), Turn::assistant("a0")];
        let messages = compose("pre", Some("style"), &history, "q1");

        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "system", "user", "assistant", "user"]);
        assert_eq!(messages[0].content, "pre");
        assert_eq!(messages[1].content, "style");
        assert_eq!(messages[4].content, "q1");
    }

    #[test]
    fn compose_skips_missing_style() {
        let messages = compose("pre", None, &[], "q");
        assert_eq!(messages.len(), 2);
        let messages = compose("pre", Some("  "), &[], "q");
        assert_eq!(messages.len(), 2);
    }
}
