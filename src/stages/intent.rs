//! Keyword-pattern intent extraction.
//!
//! A static pattern table maps recognized text to an action; entity
//! extraction pulls out the device and time mentions the built-in command
//! handlers care about. Deterministic: the same text always yields the
//! same intent.

use crate::stages::{FailureReason, Intent, Interpreter};

/// Pattern table entry: action name and the keywords that select it.
/// First match wins, so order is part of the contract.
const PATTERNS: &[(&str, &[&str])] = &[
    (
        "weather",
        &["weather", "temperature", "rain", "sunny", "forecast"],
    ),
    ("music", &["play", "music", "song", "listen"]),
    ("alarm", &["alarm", "remind", "reminder", "timer"]),
    (
        "smart_home",
        &["light", "lights", "fan", "air conditioner", "heater", "tv"],
    ),
    (
        "general",
        &["hello", "hi", "thanks", "thank you", "goodbye", "bye"],
    ),
];

/// Devices the smart-home handler understands.
const DEVICES: &[&str] = &["light", "fan", "air conditioner", "heater", "tv"];

/// Intent extractor over a static keyword pattern table.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternInterpreter;

impl PatternInterpreter {
    pub fn new() -> Self {
        Self
    }

    fn extract_entities(text: &str, intent: Intent) -> Intent {
        let mut intent = intent;
        for device in DEVICES {
            if text.contains(device) {
                intent = intent.with_argument("device", *device);
                break;
            }
        }
        if let Some(time) = extract_time(text) {
            intent = intent.with_argument("time", time);
        }
        intent
    }
}

impl Interpreter for PatternInterpreter {
    fn interpret(&self, text: &str) -> Result<Intent, FailureReason> {
        let lowered = text.to_lowercase();
        for (action, keywords) in PATTERNS {
            if keywords.iter().any(|kw| lowered.contains(kw)) {
                let intent = Intent::new(*action, text);
                return Ok(Self::extract_entities(&lowered, intent));
            }
        }
        Err(FailureReason::NoMatch)
    }
}

/// Pulls a clock-time mention out of the text, e.g. "7 o'clock", "6 am",
/// "18:30".
fn extract_time(text: &str) -> Option<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    for (i, token) in tokens.iter().enumerate() {
        let starts_numeric = token.chars().next().is_some_and(|c| c.is_ascii_digit());
        if !starts_numeric {
            continue;
        }
        if token.contains(':') {
            return Some((*token).to_string());
        }
        if let Some(next) = tokens.get(i + 1) {
            if matches!(*next, "o'clock" | "am" | "pm" | "a.m." | "p.m.") {
                return Some(format!("{} {}", token, next));
            }
        }
    }
    None
}
