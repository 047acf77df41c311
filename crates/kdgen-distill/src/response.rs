//! Prompt construction, generation and response extraction for one sample.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use kdgen_core::{ChatFormat, ChatMessage, SamplingParams};

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant. Answer the user request \
directly and concisely. Do NOT provide explanations, notes, or references. Only return \
the final answer.";

const ALPACA_TEMPERATURE: f64 = 0.7;
const ALPACA_RESPONSE_MARKER: &str = "### Response:";

/// Sampling settings for one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub do_sample: bool,
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { max_new_tokens: 512, temperature: 0.3, top_p: 0.9, do_sample: true, seed: None }
    }
}

impl GenerationConfig {
    pub fn sampling_params(&self, stop_token_ids: Vec<u32>) -> SamplingParams {
        SamplingParams {
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            do_sample: self.do_sample,
            seed: self.seed,
            stop_token_ids,
        }
    }

    /// Same settings with the seed offset by `index`, so seeded runs do not
    /// replay one random stream for every sample.
    pub fn for_sample(&self, index: usize) -> Self {
        Self { seed: self.seed.map(|s| s.wrapping_add(index as u64)), ..self.clone() }
    }
}

/// How an instruction is turned into a prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStyle {
    /// System + user messages in the model's chat template.
    #[default]
    Chat,
    /// `### Instruction:` / `### Response:` completion prompt, sampled at 0.7.
    Alpaca,
}

impl std::str::FromStr for PromptStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "alpaca" => Ok(Self::Alpaca),
            other => Err(format!("unknown prompt style '{other}' (expected chat or alpaca)")),
        }
    }
}

impl std::fmt::Display for PromptStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Chat => "chat",
            Self::Alpaca => "alpaca",
        })
    }
}

/// A model that continues a fully formatted prompt.
pub trait TextGenerator {
    /// Template used to wrap chat messages.
    fn chat_format(&self) -> ChatFormat;

    /// Generate a continuation of `prompt` and return the decoded prompt plus
    /// completion with special tokens removed.
    fn generate_text(&mut self, prompt: &str, config: &GenerationConfig) -> Result<String>;
}

/// The user turn: the instruction alone, or followed by its input.
pub fn build_user_prompt(instruction: &str, input: &str) -> String {
    if input.is_empty() {
        instruction.to_string()
    } else {
        format!("{instruction}\n\nInput: {input}")
    }
}

pub fn build_alpaca_prompt(instruction: &str, input: &str) -> String {
    if input.is_empty() {
        format!("### Instruction:\n{instruction}\n\n{ALPACA_RESPONSE_MARKER}\n")
    } else {
        format!("### Instruction:\n{instruction}\n\n### Input:\n{input}\n\n{ALPACA_RESPONSE_MARKER}\n")
    }
}

/// Generate the teacher's answer to one instruction/input pair.
pub fn get_teacher_response<G: TextGenerator + ?Sized>(
    generator: &mut G,
    instruction: &str,
    input: &str,
    config: &GenerationConfig,
    style: PromptStyle,
) -> Result<String> {
    match style {
        PromptStyle::Chat => {
            let user_prompt = build_user_prompt(instruction, input);
            let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt.as_str())];
            let prompt = generator.chat_format().apply(&messages, true);
            let decoded = generator.generate_text(&prompt, config)?;
            Ok(extract_response(&decoded, &user_prompt))
        }
        PromptStyle::Alpaca => {
            let prompt = build_alpaca_prompt(instruction, input);
            let config = GenerationConfig { temperature: ALPACA_TEMPERATURE, ..config.clone() };
            let decoded = generator.generate_text(&prompt, &config)?;
            Ok(extract_after_marker(&decoded, ALPACA_RESPONSE_MARKER))
        }
    }
}

/// Recover the answer from a decoded prompt + completion.
///
/// 1. Keep the text after the last occurrence of `user_prompt`. When it does
///    not occur (or is empty) the whole text is used. A user prompt quoted
///    again inside the answer cuts the answer at that point.
/// 2. Trim. If the rest starts with `assistant` (any case), drop through the
///    first newline; a label with no newline after it is kept as is.
/// 3. Trim again. The result may be empty.
pub fn extract_response(decoded: &str, user_prompt: &str) -> String {
    let after = match decoded.rfind(user_prompt) {
        Some(idx) if !user_prompt.is_empty() => &decoded[idx + user_prompt.len()..],
        _ => decoded,
    };
    let after = after.trim();
    let starts_with_role = after
        .get(.."assistant".len())
        .is_some_and(|head| head.eq_ignore_ascii_case("assistant"));
    let body = match after.split_once('\n') {
        Some((_, rest)) if starts_with_role => rest,
        _ => after,
    };
    body.trim().to_string()
}

fn extract_after_marker(decoded: &str, marker: &str) -> String {
    match decoded.rfind(marker) {
        Some(idx) => decoded[idx + marker.len()..].trim().to_string(),
        None => decoded.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mimics a Llama-3 decode with special tokens stripped.
    struct Echo {
        reply: &'static str,
        seen: Vec<(String, GenerationConfig)>,
    }

    impl TextGenerator for Echo {
        fn chat_format(&self) -> ChatFormat {
            ChatFormat::Llama3
        }

        fn generate_text(&mut self, prompt: &str, config: &GenerationConfig) -> Result<String> {
            self.seen.push((prompt.to_string(), config.clone()));
            let visible = prompt
                .replace("<|begin_of_text|>", "")
                .replace("<|start_header_id|>", "")
                .replace("<|end_header_id|>", "")
                .replace("<|eot_id|>", "");
            Ok(format!("{visible}{}", self.reply))
        }
    }

    fn echo(reply: &'static str) -> Echo {
        Echo { reply, seen: Vec::new() }
    }

    #[test]
    fn say_hi_yields_hello() {
        let decoded = "system\n\nYou are helpful.user\n\nSay hiassistant\nHello!";
        assert_eq!(extract_response(decoded, "Say hi"), "Hello!");
    }

    #[test]
    fn role_label_is_case_insensitive() {
        assert_eq!(extract_response("Q ASSISTANT\n\n  A ", "Q"), "A");
    }

    #[test]
    fn missing_prompt_processes_whole_text() {
        assert_eq!(extract_response("  assistant\nonly answer ", "absent"), "only answer");
        assert_eq!(extract_response("plain", ""), "plain");
    }

    #[test]
    fn last_occurrence_wins() {
        let decoded = "user: repeat X\nassistant\nI repeat: repeat X and more";
        assert_eq!(extract_response(decoded, "repeat X"), "and more");
    }

    #[test]
    fn role_label_without_newline_is_kept() {
        assert_eq!(extract_response("Q assistant says hi", "Q"), "assistant says hi");
    }

    #[test]
    fn empty_result() {
        assert_eq!(extract_response("Say hi", "Say hi"), "");
        assert_eq!(extract_response("Say hi\n\n   ", "Say hi"), "");
    }

    #[test]
    fn user_prompt_includes_input_only_when_present() {
        assert_eq!(build_user_prompt("Summarise", ""), "Summarise");
        assert_eq!(build_user_prompt("Summarise", "text"), "Summarise\n\nInput: text");
    }

    #[test]
    fn chat_round_trip_through_template() {
        let mut gen = echo("Hello!");
        let cfg = GenerationConfig::default();
        let out = get_teacher_response(&mut gen, "Say hi", "", &cfg, PromptStyle::Chat).unwrap();
        assert_eq!(out, "Hello!");

        let (prompt, used) = &gen.seen[0];
        assert!(prompt.contains(SYSTEM_PROMPT));
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
        assert_eq!(used, &cfg);
    }

    #[test]
    fn system_prompt_never_leaks() {
        let mut gen = echo("Paris");
        let out = get_teacher_response(&mut gen, "Capital of France?", "", &GenerationConfig::default(), PromptStyle::Chat)
            .unwrap();
        assert_eq!(out, "Paris");
        assert!(!out.contains("helpful AI assistant"));
    }

    #[test]
    fn alpaca_style_prompt_and_temperature() {
        let mut gen = echo("42");
        let out = get_teacher_response(&mut gen, "Answer", "6*7", &GenerationConfig::default(), PromptStyle::Alpaca)
            .unwrap();
        assert_eq!(out, "42");
        let (prompt, used) = &gen.seen[0];
        assert_eq!(prompt, "### Instruction:\nAnswer\n\n### Input:\n6*7\n\n### Response:\n");
        assert!((used.temperature - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn alpaca_prompt_omits_empty_input() {
        assert_eq!(build_alpaca_prompt("Hi", ""), "### Instruction:\nHi\n\n### Response:\n");
    }

    #[test]
    fn generation_errors_propagate() {
        struct Failing;
        impl TextGenerator for Failing {
            fn chat_format(&self) -> ChatFormat {
                ChatFormat::ChatML
            }
            fn generate_text(&mut self, _: &str, _: &GenerationConfig) -> Result<String> {
                anyhow::bail!("out of memory")
            }
        }
        let err = get_teacher_response(&mut Failing, "x", "", &GenerationConfig::default(), PromptStyle::Chat)
            .unwrap_err();
        assert!(err.to_string().contains("out of memory"));
    }

    #[test]
    fn per_sample_seed_offsets() {
        let cfg = GenerationConfig { seed: Some(42), ..Default::default() };
        assert_eq!(cfg.for_sample(3).seed, Some(45));
        assert_eq!(GenerationConfig::default().for_sample(3).seed, None);
    }

    #[test]
    fn sampling_params_carry_stop_ids() {
        let p = GenerationConfig::default().sampling_params(vec![128009]);
        assert_eq!(p.max_new_tokens, 512);
        assert_eq!(p.stop_token_ids, vec![128009]);
    }

    #[test]
    fn prompt_style_parsing() {
        assert_eq!("Alpaca".parse::<PromptStyle>().unwrap(), PromptStyle::Alpaca);
        assert_eq!(PromptStyle::default(), PromptStyle::Chat);
        assert!("raw".parse::<PromptStyle>().is_err());
    }
}
