use std::collections::BTreeMap;

use serde_json::Value;

use super::registry::{
    CommandSpec, NO_ARG_COMMANDS, SLOT_COMMANDS, SOURCE_COMMANDS, TOGGLE_COMMAND,
};

#[derive(Debug, Clone, PartialEq)]
pub struct StudioCommand {
    pub action: String,
    pub raw: String,
    pub command_args: BTreeMap<String, Value>,
}

impl StudioCommand {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_arg(arg: &str) -> String {
    parse_args(arg).join(" ")
}

/// Maps user slot names onto the two workspace slots.
fn normalize_slot(raw: &str) -> String {
    let lower = raw.trim().to_ascii_lowercase();
    match lower.as_str() {
        "identity" | "target" | "subject" | "a" => "target".to_string(),
        "reference" | "ref" | "attribute" | "b" => "reference".to_string(),
        _ => lower,
    }
}

pub fn parse_command(text: &str) -> StudioCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return StudioCommand::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, SOURCE_COMMANDS) {
                let mut parsed = StudioCommand::new(action, text);
                let key = if action == "save_result" {
                    "path"
                } else {
                    "source"
                };
                parsed
                    .command_args
                    .insert(key.to_string(), Value::String(parse_single_arg(arg)));
                return parsed;
            }

            if let Some(action) = find_action(&command, SLOT_COMMANDS) {
                let mut parsed = StudioCommand::new(action, text);
                parsed.command_args.insert(
                    "slot".to_string(),
                    Value::String(normalize_slot(&parse_single_arg(arg))),
                );
                return parsed;
            }

            if command == TOGGLE_COMMAND.command {
                let mut parsed = StudioCommand::new(TOGGLE_COMMAND.action, text);
                parsed.command_args.insert(
                    "attributes".to_string(),
                    Value::Array(
                        parse_args(&arg.replace(',', " "))
                            .into_iter()
                            .map(Value::String)
                            .collect(),
                    ),
                );
                return parsed;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return StudioCommand::new(action, text);
            }

            let mut parsed = StudioCommand::new("unknown", text);
            parsed
                .command_args
                .insert("command".to_string(), Value::String(command));
            parsed
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return parsed;
        }
    }

    let mut parsed = StudioCommand::new("unknown", text);
    parsed
        .command_args
        .insert("arg".to_string(), Value::String(raw_trimmed.to_string()));
    parsed
}
