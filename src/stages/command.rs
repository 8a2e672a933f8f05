//! Built-in command dispatch with canned responses.
//!
//! One handler per action the pattern interpreter can produce, plus the
//! mandatory fallback for the `"unrecognized"` sentinel. Real deployments
//! replace this with a dispatcher that talks to actual services; the
//! orchestrator only sees the [`Executor`] shape.

use crate::stages::{CommandOutcome, Executor, FailureReason, Intent, UNRECOGNIZED_ACTION};

/// Dispatches intents to built-in handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandDispatcher;

impl CommandDispatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for CommandDispatcher {
    fn execute(&mut self, intent: &Intent) -> Result<CommandOutcome, FailureReason> {
        match intent.action.as_str() {
            "weather" => Ok(CommandOutcome::ok("It is sunny today, 25 degrees.")),
            "music" => Ok(CommandOutcome::ok("Playing music now.")),
            "alarm" => {
                let response = match intent.arguments.get("time") {
                    Some(time) => format!("Your alarm is set for {}.", time),
                    None => "Your alarm has been set.".to_string(),
                };
                Ok(CommandOutcome::ok(response))
            }
            "smart_home" => {
                let device = intent
                    .arguments
                    .get("device")
                    .map(String::as_str)
                    .unwrap_or("device");
                Ok(CommandOutcome::ok(format!("The {} has been switched.", device)))
            }
            "general" => Ok(CommandOutcome::ok(
                "Happy to help. What else can I do for you?",
            )),
            UNRECOGNIZED_ACTION => Ok(CommandOutcome::failed(
                "Sorry, I didn't catch that. Could you repeat it?",
            )),
            other => Err(FailureReason::Stage(format!(
                "no handler for action '{}'",
                other
            ))),
        }
    }
}
