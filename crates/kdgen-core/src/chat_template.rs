//! Chat prompt formatting for the instruction formats of common model
//! families.
//!
//! | Format   | Markers                                                        |
//! |----------|----------------------------------------------------------------|
//! | `llama3` | `<\|begin_of_text\|>`, `<\|start_header_id\|>`, `<\|eot_id\|>` |
//! | `llama3.1` | as `llama3`, system turn opens with the knowledge/date header  |
//! | `chatml` | `<\|im_start\|>` / `<\|im_end\|>` (Qwen2 and friends)          |
//! | `llama2` | `[INST]` / `<<SYS>>` (LLaMA-2, Mistral)                        |
//! | `plain`  | `System:` / `User:` / `Assistant:` fallback                    |
//!
//! Every rendered prompt is ready for tokenisation with
//! `add_special_tokens = false`: BOS markers are part of the template.

use serde::{Deserialize, Serialize};

/// Header the Llama-3.1 template puts at the top of the system turn. The
/// date is the template's own default when no `date_string` is supplied.
const LLAMA31_SYSTEM_HEADER: &str = "Cutting Knowledge Date: December 2023\nToday Date: 26 Jul 2024\n\n";

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Chat template family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatFormat {
    Llama3,
    #[serde(rename = "llama3.1")]
    Llama31,
    ChatML,
    Llama2,
    Plain,
}

impl std::str::FromStr for ChatFormat {
    type Err = std::convert::Infallible;

    /// Never fails: unknown names map to [`ChatFormat::Plain`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "llama3" => Self::Llama3,
            "llama3.1" | "llama31" => Self::Llama31,
            "chatml" | "qwen2" => Self::ChatML,
            "llama2" | "llama" | "mistral" => Self::Llama2,
            _ => Self::Plain,
        })
    }
}

impl std::fmt::Display for ChatFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Llama3 => "llama3",
            Self::Llama31 => "llama3.1",
            Self::ChatML => "chatml",
            Self::Llama2 => "llama2",
            Self::Plain => "plain",
        })
    }
}

impl ChatFormat {
    /// Pick a format by probing the vocabulary for well-known control tokens,
    /// falling back to the architecture name.
    ///
    /// `has_token` answers whether an exact token string exists.
    pub fn detect(arch: &str, has_token: impl Fn(&str) -> bool) -> Self {
        if has_token("<|eot_id|>") {
            // `<|eom_id|>` first appears in the 3.1 vocabulary.
            return if has_token("<|eom_id|>") { Self::Llama31 } else { Self::Llama3 };
        }
        if has_token("<|im_start|>") {
            return Self::ChatML;
        }
        arch.parse().unwrap_or(Self::Plain)
    }

    /// Render `messages`, optionally ending with the marker that opens the
    /// assistant's turn.
    pub fn apply(self, messages: &[ChatMessage], add_generation_prompt: bool) -> String {
        match self {
            Self::Llama3 => render_llama3(messages, add_generation_prompt),
            Self::Llama31 => render_llama31(messages, add_generation_prompt),
            Self::ChatML => render_chatml(messages, add_generation_prompt),
            Self::Llama2 => render_llama2(messages),
            Self::Plain => render_plain(messages, add_generation_prompt),
        }
    }

    /// End-of-turn token strings that should stop generation.
    ///
    /// Callers resolve these through the tokenizer and keep the ids that
    /// exist in the vocabulary.
    pub fn stop_tokens(self) -> &'static [&'static str] {
        match self {
            Self::Llama3 | Self::Llama31 => &["<|eot_id|>", "<|end_of_text|>", "<|eom_id|>"],
            Self::ChatML => &["<|im_end|>", "<|endoftext|>"],
            Self::Llama2 => &["</s>"],
            Self::Plain => &["</s>", "<|endoftext|>"],
        }
    }
}

fn render_llama3(messages: &[ChatMessage], add_generation_prompt: bool) -> String {
    let mut s = String::from("<|begin_of_text|>");
    for m in messages {
        s.push_str(&format!(
            "<|start_header_id|>{}<|end_header_id|>\n\n{}<|eot_id|>",
            m.role.as_str(),
            m.content
        ));
    }
    if add_generation_prompt {
        s.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    }
    s
}

/// Llama-3.1 layout: the system turn is always emitted and starts with
/// [`LLAMA31_SYSTEM_HEADER`], even when no system message is given.
fn render_llama31(messages: &[ChatMessage], add_generation_prompt: bool) -> String {
    let (system, rest) = match messages.split_first() {
        Some((first, rest)) if first.role == Role::System => (first.content.as_str(), rest),
        _ => ("", messages),
    };
    let mut s = format!(
        "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{LLAMA31_SYSTEM_HEADER}{system}<|eot_id|>"
    );
    // Everything after the header matches the 3.0 layout.
    let body = render_llama3(rest, add_generation_prompt);
    s.push_str(body.trim_start_matches("<|begin_of_text|>"));
    s
}

fn render_chatml(messages: &[ChatMessage], add_generation_prompt: bool) -> String {
    let mut s = String::new();
    for m in messages {
        s.push_str(&format!("<|im_start|>{}\n{}<|im_end|>\n", m.role.as_str(), m.content));
    }
    if add_generation_prompt {
        s.push_str("<|im_start|>assistant\n");
    }
    s
}

/// `[INST]` format. The system prompt is folded into the first user turn; an
/// unanswered user turn ends at `[/INST]`, which is already the generation
/// prompt.
fn render_llama2(messages: &[ChatMessage]) -> String {
    let mut system: Option<&str> = None;
    let mut s = String::new();
    for m in messages {
        match m.role {
            Role::System => system = Some(m.content.as_str()),
            Role::User => {
                let content = match system.take() {
                    Some(sys) if !sys.is_empty() => {
                        format!("<<SYS>>\n{sys}\n<</SYS>>\n\n{}", m.content)
                    }
                    _ => m.content.clone(),
                };
                s.push_str(&format!("<s>[INST] {content} [/INST]"));
            }
            Role::Assistant => s.push_str(&format!(" {} </s>", m.content)),
        }
    }
    s
}

fn render_plain(messages: &[ChatMessage], add_generation_prompt: bool) -> String {
    let mut s = String::new();
    for m in messages {
        let label = match m.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        s.push_str(&format!("{label}: {}\n\n", m.content));
    }
    if add_generation_prompt {
        s.push_str("Assistant:");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convo() -> Vec<ChatMessage> {
        vec![ChatMessage::system("Be brief."), ChatMessage::user("Say hi")]
    }

    #[test]
    fn llama3_layout() {
        let out = ChatFormat::Llama3.apply(&convo(), true);
        assert_eq!(
            out,
            "<|begin_of_text|>\
             <|start_header_id|>system<|end_header_id|>\n\nBe brief.<|eot_id|>\
             <|start_header_id|>user<|end_header_id|>\n\nSay hi<|eot_id|>\
             <|start_header_id|>assistant<|end_header_id|>\n\n"
        );
    }

    #[test]
    fn llama31_system_turn_carries_date_header() {
        let out = ChatFormat::Llama31.apply(&convo(), true);
        assert_eq!(
            out,
            "<|begin_of_text|>\
             <|start_header_id|>system<|end_header_id|>\n\n\
             Cutting Knowledge Date: December 2023\nToday Date: 26 Jul 2024\n\n\
             Be brief.<|eot_id|>\
             <|start_header_id|>user<|end_header_id|>\n\nSay hi<|eot_id|>\
             <|start_header_id|>assistant<|end_header_id|>\n\n"
        );
    }

    #[test]
    fn llama31_without_system_message_still_emits_header() {
        let out = ChatFormat::Llama31.apply(&[ChatMessage::user("Say hi")], true);
        assert!(out.starts_with(
            "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n\
             Cutting Knowledge Date: December 2023\nToday Date: 26 Jul 2024\n\n<|eot_id|>"
        ));
        assert_eq!(out.matches("<|begin_of_text|>").count(), 1);
        assert!(out.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    }

    #[test]
    fn generation_prompt_is_optional() {
        let out = ChatFormat::Llama3.apply(&convo(), false);
        assert!(out.ends_with("Say hi<|eot_id|>"));
        let out = ChatFormat::ChatML.apply(&convo(), false);
        assert!(!out.contains("<|im_start|>assistant"));
    }

    #[test]
    fn chatml_ends_with_assistant_marker() {
        let out = ChatFormat::ChatML.apply(&convo(), true);
        assert!(out.starts_with("<|im_start|>system\nBe brief.<|im_end|>\n"));
        assert!(out.contains("<|im_start|>user\nSay hi<|im_end|>\n"));
        assert!(out.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn llama2_folds_system_into_first_turn() {
        let out = ChatFormat::Llama2.apply(&convo(), true);
        assert_eq!(out, "<s>[INST] <<SYS>>\nBe brief.\n<</SYS>>\n\nSay hi [/INST]");
    }

    #[test]
    fn llama2_multi_turn_closes_answered_turns() {
        let messages = vec![
            ChatMessage::user("one"),
            ChatMessage::assistant("1"),
            ChatMessage::user("two"),
        ];
        let out = ChatFormat::Llama2.apply(&messages, true);
        assert_eq!(out, "<s>[INST] one [/INST] 1 </s><s>[INST] two [/INST]");
    }

    #[test]
    fn plain_fallback() {
        let out = ChatFormat::Plain.apply(&convo(), true);
        assert!(out.starts_with("System: Be brief."));
        assert!(out.contains("User: Say hi"));
        assert!(out.ends_with("Assistant:"));
    }

    #[test]
    fn parse_aliases() {
        assert_eq!("qwen2".parse::<ChatFormat>().unwrap(), ChatFormat::ChatML);
        assert_eq!("LLAMA3".parse::<ChatFormat>().unwrap(), ChatFormat::Llama3);
        assert_eq!("mistral".parse::<ChatFormat>().unwrap(), ChatFormat::Llama2);
        assert_eq!("gpt-neo".parse::<ChatFormat>().unwrap(), ChatFormat::Plain);
    }

    #[test]
    fn detect_prefers_vocabulary_probe() {
        let llama3_vocab = |t: &str| t == "<|eot_id|>";
        assert_eq!(ChatFormat::detect("llama", llama3_vocab), ChatFormat::Llama3);

        let llama31_vocab = |t: &str| t == "<|eot_id|>" || t == "<|eom_id|>";
        assert_eq!(ChatFormat::detect("llama", llama31_vocab), ChatFormat::Llama31);

        let chatml_vocab = |t: &str| t == "<|im_start|>";
        assert_eq!(ChatFormat::detect("llama", chatml_vocab), ChatFormat::ChatML);

        assert_eq!(ChatFormat::detect("llama", |_| false), ChatFormat::Llama2);
        assert_eq!(ChatFormat::detect("qwen2", |_| false), ChatFormat::ChatML);
    }

    #[test]
    fn display_roundtrips_through_parse() {
        for fmt in [ChatFormat::Llama3, ChatFormat::Llama31, ChatFormat::ChatML, ChatFormat::Llama2, ChatFormat::Plain] {
            assert_eq!(fmt.to_string().parse::<ChatFormat>().unwrap(), fmt);
        }
    }

    #[test]
    fn stop_tokens_are_family_specific() {
        assert!(!ChatFormat::ChatML.stop_tokens().contains(&"</s>"));
        assert!(ChatFormat::Llama3.stop_tokens().contains(&"<|eot_id|>"));
    }
}
