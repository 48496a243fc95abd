//! Conversation state machine
//!
//! Tracks activation (wake phrase / inactivity timeout), the pending-action
//! confirmation sub-state, and rolling message history. This is the sole
//! authority on whether a final transcript is ignored, answered directly,
//! or escalated to intent resolution.
//!
//! There is no background timer: the inactivity timeout is evaluated lazily
//! on every final transcript, against the timestamp of the last processed
//! interaction.

use std::time::{Duration, Instant};

use wink_config::ConversationConfig;
use wink_core::{DeviceAction, MessageHistory, TaskStatus};

use crate::intent::{IntentResolver, Reply};
use crate::BrainError;

/// Fixed reply when woken with nothing else to say.
const ACK_AWAKE: &str = "Yes?";
/// Fixed reply when a pending action is confirmed.
const ACK_CONFIRMED: &str = "On it.";
/// Fixed reply when a pending action is denied.
const ACK_CANCELLED: &str = "Okay, nevermind.";

/// Prefix-anchored confirmation phrases, checked case-insensitively.
const CONFIRM_PHRASES: &[&str] = &[
    "yes", "yeah", "yep", "yup", "sure", "ok", "okay", "do it", "go ahead", "go for it",
    "confirm", "please do", "sounds good", "affirmative",
];

/// Prefix-anchored denial phrases, checked case-insensitively.
const DENY_PHRASES: &[&str] = &[
    "no", "nope", "nah", "cancel", "stop", "wait", "don't", "do not", "nevermind",
    "never mind", "forget it", "hold on", "negative",
];

/// Outcome of processing one final transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Not listening: no reply, no history mutation.
    Ignored,
    /// Speak this answer.
    Reply { text: String },
    /// Speak this answer and dispatch the action to its device.
    ReplyWithAction { text: String, action: DeviceAction },
}

/// Per-session conversation state.
pub struct Conversation {
    wake_phrases: Vec<String>,
    inactivity_timeout: Duration,
    history: MessageHistory,
    activated: bool,
    last_interaction: Instant,
    pending: Option<DeviceAction>,
}

impl Conversation {
    pub fn new(config: &ConversationConfig) -> Self {
        // Longest first, so "hey wink" wins over a bare "wink" prefix.
        let mut wake_phrases: Vec<String> = config
            .wake_phrases
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        wake_phrases.sort_by_key(|p| std::cmp::Reverse(p.len()));

        Self {
            wake_phrases,
            inactivity_timeout: Duration::from_secs(config.inactivity_timeout_secs),
            history: MessageHistory::new(config.max_history_turns),
            activated: false,
            last_interaction: Instant::now(),
            pending: None,
        }
    }

    /// Override the inactivity timeout (tests and tuning).
    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    pub fn pending_action(&self) -> Option<&DeviceAction> {
        self.pending.as_ref()
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    /// Process one final transcript.
    ///
    /// Transition order: wake phrase, activation window, empty-after-strip
    /// acknowledgment, pending-action confirmation, intent resolution. Every
    /// replying branch records the un-stripped transcript plus the answer in
    /// history; the ignore branch records nothing.
    pub async fn handle_final_transcript(
        &mut self,
        transcript: &str,
        latest_frame: Option<&[u8]>,
        task_status: Option<&TaskStatus>,
        resolver: &dyn IntentResolver,
    ) -> Result<TurnOutcome, BrainError> {
        let spoken = transcript.trim();
        let now = Instant::now();

        let text = if let Some(stripped) = self.strip_wake_phrase(spoken) {
            self.activated = true;
            self.last_interaction = now;
            stripped
        } else if self.activated
            && now.duration_since(self.last_interaction) <= self.inactivity_timeout
        {
            self.last_interaction = now;
            spoken.to_string()
        } else {
            // Not woken, not active, or timed out: the default "not
            // listening" behavior. Staleness is detected here, lazily.
            self.activated = false;
            return Ok(TurnOutcome::Ignored);
        };

        if text.is_empty() {
            self.history.push_turn(spoken, ACK_AWAKE);
            return Ok(TurnOutcome::Reply {
                text: ACK_AWAKE.to_string(),
            });
        }

        // A pending proposal never survives past the next processed turn:
        // confirmed, denied, or displaced by unrelated input.
        if let Some(pending) = self.pending.take() {
            if matches_lexicon(&text, CONFIRM_PHRASES) {
                self.history.push_turn(spoken, ACK_CONFIRMED);
                return Ok(TurnOutcome::ReplyWithAction {
                    text: ACK_CONFIRMED.to_string(),
                    action: pending,
                });
            }
            if matches_lexicon(&text, DENY_PHRASES) {
                self.history.push_turn(spoken, ACK_CANCELLED);
                return Ok(TurnOutcome::Reply {
                    text: ACK_CANCELLED.to_string(),
                });
            }
            tracing::debug!(goal = %pending.goal, "pending action displaced by unrelated input");
        }

        let reply = resolver
            .resolve(&text, latest_frame, &self.history, task_status)
            .await?;

        let outcome = match reply {
            Reply::Answer { text: answer } => TurnOutcome::Reply { text: answer },
            Reply::Action {
                text: answer,
                action,
            } => TurnOutcome::ReplyWithAction {
                text: answer,
                action,
            },
            Reply::ProposedAction {
                text: answer,
                action,
            } => {
                self.pending = Some(action);
                TurnOutcome::Reply { text: answer }
            },
        };

        self.history.push_turn(spoken, outcome_text(&outcome));
        Ok(outcome)
    }

    /// If the transcript contains a wake phrase, remove it and return the
    /// remainder; `None` when no wake phrase is present.
    fn strip_wake_phrase(&self, transcript: &str) -> Option<String> {
        let (lowered, offsets) = lowercase_with_offsets(transcript);
        let sep = |c: char| c.is_whitespace() || c == ',' || c == '.' || c == '!';
        for phrase in &self.wake_phrases {
            if let Some(start) = find_phrase(&lowered, phrase) {
                let end = offsets[start + phrase.len()];
                let start = offsets[start];
                let prefix = transcript[..start]
                    .trim_end_matches(sep)
                    .trim_start_matches(sep);
                let suffix = transcript[end..].trim_start_matches(sep).trim_end_matches(sep);
                let cleaned = match (prefix.is_empty(), suffix.is_empty()) {
                    (true, _) => suffix.to_string(),
                    (_, true) => prefix.to_string(),
                    _ => format!("{} {}", prefix, suffix),
                };
                return Some(cleaned);
            }
        }
        None
    }
}

fn outcome_text(outcome: &TurnOutcome) -> &str {
    match outcome {
        TurnOutcome::Reply { text } | TurnOutcome::ReplyWithAction { text, .. } => text,
        TurnOutcome::Ignored => "",
    }
}

/// Lowercase `s`, recording for every byte of the lowered text the byte
/// offset of the character in `s` it came from. Case mapping can change
/// byte widths ('İ' grows, 'ẞ' shrinks), so offsets found in the lowered
/// text cannot be used to slice the original directly.
fn lowercase_with_offsets(s: &str) -> (String, Vec<usize>) {
    let mut lowered = String::with_capacity(s.len());
    let mut offsets = Vec::with_capacity(s.len() + 1);
    for (idx, ch) in s.char_indices() {
        for lower in ch.to_lowercase() {
            lowered.push(lower);
            offsets.resize(lowered.len(), idx);
        }
    }
    offsets.push(s.len());
    (lowered, offsets)
}

/// Find `phrase` in `haystack` at a word boundary on both sides.
fn find_phrase(haystack: &str, phrase: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(phrase) {
        let start = from + offset;
        let end = start + phrase.len();
        let boundary_before = start == 0
            || !haystack[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let boundary_after = end == haystack.len()
            || !haystack[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        if boundary_before && boundary_after {
            return Some(start);
        }
        from = start + 1;
    }
    None
}

/// Prefix-anchored lexicon match: the text must start with one of the
/// phrases, followed by the end of input or a non-word character, so that
/// "nobody called" never reads as a denial.
fn matches_lexicon(text: &str, lexicon: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    lexicon.iter().any(|phrase| {
        lowered.strip_prefix(phrase).is_some_and(|rest| {
            rest.chars().next().map_or(true, |c| !c.is_alphanumeric())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Scripted resolver that records the transcripts it is called with.
    struct MockResolver {
        replies: Mutex<Vec<Reply>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockResolver {
        fn answering(text: &str) -> Self {
            Self::scripted(vec![Reply::Answer {
                text: text.to_string(),
            }])
        }

        fn scripted(mut replies: Vec<Reply>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl IntentResolver for MockResolver {
        async fn resolve(
            &self,
            transcript: &str,
            _latest_frame: Option<&[u8]>,
            _history: &MessageHistory,
            _task_status: Option<&TaskStatus>,
        ) -> Result<Reply, BrainError> {
            self.calls.lock().push(transcript.to_string());
            Ok(self.replies.lock().pop().unwrap_or(Reply::Answer {
                text: "fallback".to_string(),
            }))
        }
    }

    fn conversation() -> Conversation {
        Conversation::new(&ConversationConfig::default())
    }

    #[tokio::test]
    async fn test_dormant_session_ignores_without_wake_phrase() {
        let mut conv = conversation();
        let resolver = MockResolver::answering("should not be called");

        let outcome = conv
            .handle_final_transcript("what's the weather", None, None, &resolver)
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Ignored);
        assert!(conv.history().is_empty());
        assert!(resolver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_wake_phrase_stripped_before_resolution() {
        let mut conv = conversation();
        let resolver = MockResolver::answering("four");

        let outcome = conv
            .handle_final_transcript("Hey Wink, what's two plus two", None, None, &resolver)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Reply {
                text: "four".to_string()
            }
        );
        assert_eq!(resolver.calls(), vec!["what's two plus two"]);
        // History records the un-stripped transcript.
        assert_eq!(
            conv.history().messages()[0].content,
            "Hey Wink, what's two plus two"
        );
    }

    #[tokio::test]
    async fn test_active_session_processes_without_wake_phrase() {
        let mut conv = conversation();
        let resolver = MockResolver::scripted(vec![
            Reply::Answer {
                text: "hello".to_string(),
            },
            Reply::Answer {
                text: "still here".to_string(),
            },
        ]);

        conv.handle_final_transcript("hey wink hello", None, None, &resolver)
            .await
            .unwrap();
        let outcome = conv
            .handle_final_transcript("and another thing", None, None, &resolver)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Reply {
                text: "still here".to_string()
            }
        );
        assert_eq!(resolver.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_returns_session_to_dormant() {
        let mut conv = conversation().with_inactivity_timeout(Duration::ZERO);
        let resolver = MockResolver::answering("hi");

        conv.handle_final_transcript("hey wink hello", None, None, &resolver)
            .await
            .unwrap();
        assert!(conv.is_activated());

        // Any elapsed time now exceeds the zero window: dormant again.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let outcome = conv
            .handle_final_transcript("are you there", None, None, &resolver)
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Ignored);
        assert!(!conv.is_activated());
        assert_eq!(conv.history().len(), 2);
    }

    #[tokio::test]
    async fn test_bare_wake_phrase_acknowledged_without_resolution() {
        let mut conv = conversation();
        let resolver = MockResolver::answering("should not be called");

        let outcome = conv
            .handle_final_transcript("hey wink", None, None, &resolver)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Reply {
                text: "Yes?".to_string()
            }
        );
        assert!(resolver.calls().is_empty());
        assert_eq!(conv.history().len(), 2);
    }

    fn proposal(goal: &str) -> Reply {
        Reply::ProposedAction {
            text: format!("Should I {}?", goal),
            action: DeviceAction::new("laptop-1", goal),
        }
    }

    #[tokio::test]
    async fn test_confirmation_emits_the_pending_action() {
        let mut conv = conversation();
        let resolver = MockResolver::scripted(vec![proposal("open chrome")]);

        conv.handle_final_transcript("hey wink open chrome", None, None, &resolver)
            .await
            .unwrap();
        assert!(conv.pending_action().is_some());

        let outcome = conv
            .handle_final_transcript("yeah do it", None, None, &resolver)
            .await
            .unwrap();

        match outcome {
            TurnOutcome::ReplyWithAction { text, action } => {
                assert_eq!(text, "On it.");
                assert_eq!(action.device_id, "laptop-1");
                assert_eq!(action.goal, "open chrome");
            },
            other => panic!("expected action, got {:?}", other),
        }
        assert!(conv.pending_action().is_none());
        // Confirmation is answered directly, never re-resolved.
        assert_eq!(resolver.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_denial_cancels_the_pending_action() {
        let mut conv = conversation();
        let resolver = MockResolver::scripted(vec![proposal("open chrome")]);

        conv.handle_final_transcript("hey wink open chrome", None, None, &resolver)
            .await
            .unwrap();
        let outcome = conv
            .handle_final_transcript("no, cancel that", None, None, &resolver)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Reply {
                text: "Okay, nevermind.".to_string()
            }
        );
        assert!(conv.pending_action().is_none());
    }

    #[tokio::test]
    async fn test_unrelated_input_clears_pending_and_falls_through() {
        let mut conv = conversation();
        let resolver = MockResolver::scripted(vec![
            proposal("open chrome"),
            Reply::Answer {
                text: "It's noon.".to_string(),
            },
        ]);

        conv.handle_final_transcript("hey wink open chrome", None, None, &resolver)
            .await
            .unwrap();
        let outcome = conv
            .handle_final_transcript("actually what time is it", None, None, &resolver)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Reply {
                text: "It's noon.".to_string()
            }
        );
        assert!(conv.pending_action().is_none());
        // The unrelated input reached the resolver with its original text.
        assert_eq!(resolver.calls()[1], "actually what time is it");
    }

    #[tokio::test]
    async fn test_denial_with_no_pending_action_falls_through() {
        let mut conv = conversation();
        let resolver = MockResolver::scripted(vec![
            Reply::Answer {
                text: "hi".to_string(),
            },
            Reply::Answer {
                text: "okay then".to_string(),
            },
        ]);

        conv.handle_final_transcript("hey wink hello", None, None, &resolver)
            .await
            .unwrap();
        let outcome = conv
            .handle_final_transcript("no thanks", None, None, &resolver)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Reply {
                text: "okay then".to_string()
            }
        );
        assert_eq!(resolver.calls()[1], "no thanks");
    }

    #[tokio::test]
    async fn test_at_most_one_pending_action() {
        let mut conv = conversation();
        let resolver =
            MockResolver::scripted(vec![proposal("open chrome"), proposal("close chrome")]);

        conv.handle_final_transcript("hey wink open chrome", None, None, &resolver)
            .await
            .unwrap();
        conv.handle_final_transcript("mm close chrome instead", None, None, &resolver)
            .await
            .unwrap();

        let pending = conv.pending_action().unwrap();
        assert_eq!(pending.goal, "close chrome");
    }

    #[tokio::test]
    async fn test_history_stays_bounded() {
        let mut conv = conversation();
        let resolver = MockResolver::scripted(Vec::new());

        conv.handle_final_transcript("hey wink hello", None, None, &resolver)
            .await
            .unwrap();
        for i in 0..40 {
            conv.handle_final_transcript(&format!("turn {}", i), None, None, &resolver)
                .await
                .unwrap();
        }

        assert!(conv.history().len() <= 20);
    }

    #[test]
    fn test_lexicon_is_prefix_anchored() {
        assert!(matches_lexicon("yes please", CONFIRM_PHRASES));
        assert!(matches_lexicon("OK", CONFIRM_PHRASES));
        assert!(matches_lexicon("no way", DENY_PHRASES));
        assert!(!matches_lexicon("nobody called", DENY_PHRASES));
        assert!(!matches_lexicon("okra is a vegetable", CONFIRM_PHRASES));
        assert!(!matches_lexicon("actually what time is it", DENY_PHRASES));
    }

    #[test]
    fn test_wake_phrase_found_mid_sentence() {
        let conv = conversation();
        assert_eq!(
            conv.strip_wake_phrase("um, hey wink, turn it up").as_deref(),
            Some("um turn it up")
        );
        assert!(conv.strip_wake_phrase("winking at you").is_none());
    }

    #[test]
    fn test_wake_phrase_strip_survives_widening_case_mappings() {
        let conv = conversation();
        // 'İ' lowercases to two characters and 'ẞ' to a shorter one, so
        // offsets in the lowered text differ from the original.
        assert_eq!(
            conv.strip_wake_phrase("İ wink ẞello").as_deref(),
            Some("İ ẞello")
        );
        assert_eq!(conv.strip_wake_phrase("ẞ«wink İ").as_deref(), Some("ẞ« İ"));
    }
}
