use regex::Regex;

use crate::error::EventError;
use crate::llm::{ChatMessage, Role};
use crate::slack::RawMessage;

/// Subtypes that mark edits or deletions of already-processed messages.
/// Reprocessing them would duplicate or corrupt the conversation.
const MUTATION_SUBTYPES: &[&str] = &["message_changed", "message_deleted", "message_replied"];

/// Compiled mention and trigger-phrase patterns for the running bot.
/// Built once at startup from the resolved bot identity and the
/// normalized trigger phrase, immutable afterwards.
pub struct TriggerMatcher {
    mention: Option<Regex>,
    trigger: Option<Regex>,
}

impl TriggerMatcher {
    pub fn new(bot_user_id: &str, trigger_phrase: &str) -> Result<Self, regex::Error> {
        let mention = if bot_user_id.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(
                r"(?i)<@{}>\s*",
                regex::escape(bot_user_id)
            ))?)
        };
        let trigger = if trigger_phrase.is_empty() {
            None
        } else {
            // Whole-word match: "pcmbot2" and "mypcmbot" must survive a
            // "pcmbot" trigger.
            Some(Regex::new(&format!(
                r"(?i)\b{}\b",
                regex::escape(trigger_phrase)
            ))?)
        };
        Ok(Self { mention, trigger })
    }

    /// Remove every bot mention and whole-word trigger occurrence from
    /// `text` and trim the result. Pure and deterministic; empty input
    /// yields empty output.
    pub fn strip(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        if let Some(re) = &self.mention {
            cleaned = re.replace_all(&cleaned, "").into_owned();
        }
        if let Some(re) = &self.trigger {
            cleaned = re.replace_all(&cleaned, "").into_owned();
        }
        cleaned.trim().to_string()
    }

    /// Whether `text` contains the trigger phrase as a whole word.
    pub fn matches_trigger(&self, text: &str) -> bool {
        self.trigger.as_ref().is_some_and(|re| re.is_match(text))
    }

    /// Whether `text` contains an explicit mention of the bot.
    pub fn mentions_bot(&self, text: &str) -> bool {
        self.mention.as_ref().is_some_and(|re| re.is_match(text))
    }
}

/// Decide whether an inbound event is a new conversational turn at all.
///
/// Mutation subtypes are edits/deletions of messages we already saw, and
/// anything authored by a bot (including ourselves) must not trigger a
/// reply, or the bot would answer itself in a loop.
pub fn should_ignore(event: &RawMessage, bot_user_id: &str) -> bool {
    if let Some(subtype) = &event.subtype {
        if MUTATION_SUBTYPES.contains(&subtype.as_str()) {
            return true;
        }
    }
    if event.bot_id.is_some() {
        return true;
    }
    event.user.as_deref() == Some(bot_user_id)
}

/// Convert ordered thread history into the chat-completion message
/// sequence: optional leading system message, then one entry per usable
/// raw message, oldest first.
///
/// A message whose text is nothing but a mention or the trigger phrase is
/// forwarded with its original text rather than dropped — a bare
/// "pcmbot?" is still a conversational turn. Only messages with no text
/// at all are skipped.
pub fn build_conversation(
    thread: &[RawMessage],
    bot_user_id: &str,
    system_prompt: Option<&str>,
    matcher: &TriggerMatcher,
) -> Result<Vec<ChatMessage>, EventError> {
    let mut messages = Vec::new();

    if let Some(prompt) = system_prompt {
        let prompt = prompt.trim();
        if !prompt.is_empty() {
            messages.push(ChatMessage::new(Role::System, prompt));
        }
    }

    let system_count = messages.len();

    for raw in thread {
        let mut content = matcher.strip(&raw.text);
        if content.is_empty() {
            content = raw.text.trim().to_string();
        }
        if content.is_empty() {
            continue;
        }

        let is_bot_message = raw.bot_id.is_some()
            || raw.subtype.as_deref() == Some("bot_message")
            || raw.user.as_deref() == Some(bot_user_id);
        let role = if is_bot_message {
            Role::Assistant
        } else {
            Role::User
        };

        messages.push(ChatMessage::new(role, content));
    }

    if messages.len() == system_count {
        return Err(EventError::EmptyConversation);
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: &str = "UBOT";

    fn matcher(trigger: &str) -> TriggerMatcher {
        TriggerMatcher::new(BOT, trigger).unwrap()
    }

    fn human(text: &str) -> RawMessage {
        RawMessage {
            text: text.to_string(),
            user: Some("U1".to_string()),
            ts: "1.0".to_string(),
            ..Default::default()
        }
    }

    fn from_bot(text: &str) -> RawMessage {
        RawMessage {
            text: text.to_string(),
            bot_id: Some("B1".to_string()),
            ts: "2.0".to_string(),
            ..Default::default()
        }
    }

    // ── Text normalizer ────────────────────────────────────────────────

    #[test]
    fn test_strip_removes_mentions() {
        let m = matcher("");
        let out = m.strip("<@UBOT> what is 2+2?");
        assert_eq!(out, "what is 2+2?");
        assert!(!out.contains("<@UBOT>"));
    }

    #[test]
    fn test_strip_mentions_case_insensitive() {
        let m = TriggerMatcher::new("Ubot", "").unwrap();
        assert_eq!(m.strip("<@UBOT> hi"), "hi");
        assert_eq!(m.strip("<@ubot> hi"), "hi");
    }

    #[test]
    fn test_strip_removes_every_occurrence() {
        let m = matcher("pcmbot");
        assert_eq!(m.strip("<@UBOT> pcmbot hi <@UBOT> pcmbot"), "hi");
    }

    #[test]
    fn test_strip_is_idempotent() {
        let m = matcher("pcmbot");
        let once = m.strip("<@UBOT> pcmbot can you help?");
        assert_eq!(m.strip(&once), once);
    }

    #[test]
    fn test_strip_trigger_is_whole_word() {
        let m = matcher("pcmbot");
        assert_eq!(m.strip("pcmbot2 hello"), "pcmbot2 hello");
        assert_eq!(m.strip("mypcmbot hello"), "mypcmbot hello");
        assert_eq!(m.strip("pcmbot hello"), "hello");
    }

    #[test]
    fn test_strip_trigger_case_insensitive() {
        let m = matcher("pcmbot");
        assert_eq!(m.strip("PCMBot hello"), "hello");
    }

    #[test]
    fn test_strip_empty_input() {
        let m = matcher("pcmbot");
        assert_eq!(m.strip(""), "");
    }

    #[test]
    fn test_matches_trigger_whole_word_only() {
        let m = matcher("pcmbot");
        assert!(m.matches_trigger("hey pcmbot, ping"));
        assert!(!m.matches_trigger("hey pcmbot2"));
        assert!(!m.matches_trigger("mypcmbot is great"));
    }

    #[test]
    fn test_empty_trigger_never_matches() {
        let m = matcher("");
        assert!(!m.matches_trigger("pcmbot hello"));
    }

    #[test]
    fn test_mentions_bot() {
        let m = matcher("pcmbot");
        assert!(m.mentions_bot("<@UBOT> hi"));
        assert!(!m.mentions_bot("pcmbot hi"));
    }

    // ── Event gate ─────────────────────────────────────────────────────

    #[test]
    fn test_ignores_mutation_subtypes() {
        for subtype in ["message_changed", "message_deleted", "message_replied"] {
            let mut event = human("edited");
            event.subtype = Some(subtype.to_string());
            assert!(should_ignore(&event, BOT), "subtype {subtype}");
        }
    }

    #[test]
    fn test_ignores_own_messages() {
        let mut event = human("hello from myself");
        event.user = Some(BOT.to_string());
        assert!(should_ignore(&event, BOT));
    }

    #[test]
    fn test_ignores_other_bots() {
        assert!(should_ignore(&from_bot("beep"), BOT));
    }

    #[test]
    fn test_accepts_plain_human_message() {
        assert!(!should_ignore(&human("hello"), BOT));
    }

    // ── Conversation builder ───────────────────────────────────────────

    #[test]
    fn test_build_fails_on_all_empty_thread() {
        let thread = vec![human(""), human("   ")];
        let err = build_conversation(&thread, BOT, None, &matcher("pcmbot")).unwrap_err();
        assert!(matches!(err, EventError::EmptyConversation));
    }

    #[test]
    fn test_build_fails_with_only_system_prompt() {
        let thread = vec![human("")];
        let err =
            build_conversation(&thread, BOT, Some("You are helpful."), &matcher("pcmbot"))
                .unwrap_err();
        assert!(matches!(err, EventError::EmptyConversation));
    }

    #[test]
    fn test_build_preserves_order() {
        let thread = vec![human("first"), from_bot("second"), human("third")];
        let messages = build_conversation(&thread, BOT, None, &matcher("pcmbot")).unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_role_inference() {
        let mut via_subtype = human("automated notice");
        via_subtype.subtype = Some("bot_message".to_string());
        let mut via_user = human("my own earlier reply");
        via_user.user = Some(BOT.to_string());

        let thread = vec![human("hi"), from_bot("hello"), via_subtype, via_user];
        let messages = build_conversation(&thread, BOT, None, &matcher("pcmbot")).unwrap();
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Assistant, Role::Assistant]
        );
    }

    #[test]
    fn test_trigger_only_message_keeps_raw_text() {
        let thread = vec![human("pcmbot?")];
        let messages = build_conversation(&thread, BOT, None, &matcher("pcmbot")).unwrap();
        assert_eq!(messages.len(), 1);
        // Stripping leaves "?" here; a bare "pcmbot" with no punctuation
        // falls all the way back to the raw text.
        let thread = vec![human("pcmbot")];
        let messages = build_conversation(&thread, BOT, None, &matcher("pcmbot")).unwrap();
        assert_eq!(messages[0].content, "pcmbot");
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn test_blank_system_prompt_is_dropped() {
        let thread = vec![human("hello")];
        let messages =
            build_conversation(&thread, BOT, Some("   "), &matcher("pcmbot")).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn test_system_prompt_is_first_and_trimmed() {
        let thread = vec![human("hello")];
        let messages =
            build_conversation(&thread, BOT, Some("  Be terse.  "), &matcher("pcmbot")).unwrap();
        assert_eq!(messages[0], ChatMessage::new(Role::System, "Be terse."));
    }

    #[test]
    fn test_end_to_end_mention_scenario() {
        let thread = vec![human("pcmbot what is 2+2?")];
        let messages = build_conversation(
            &thread,
            BOT,
            Some("You are helpful."),
            &matcher("pcmbot"),
        )
        .unwrap();

        assert_eq!(
            messages,
            vec![
                ChatMessage::new(Role::System, "You are helpful."),
                ChatMessage::new(Role::User, "what is 2+2?"),
            ]
        );
    }
}
