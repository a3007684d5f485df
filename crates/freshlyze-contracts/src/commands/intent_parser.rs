use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            command_args: BTreeMap::new(),
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
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

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

/// Map one line of session input to an action.
///
/// Slash commands come from the registry; bare text is taken as a path to
/// analyze, which is the selection gesture of the session.
pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = if remainder.is_empty() {
                ""
            } else {
                remainder.trim()
            };

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert("model".to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("analyze", text);
    intent.command_args.insert(
        "path".to_string(),
        Value::String(parse_single_path_arg(raw_trimmed)),
    );
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn parse_analyze_with_quoted_path() {
        let intent = parse_intent("/analyze \"/tmp/red apple.jpg\"");
        assert_eq!(intent.action, "analyze");
        assert_eq!(intent.command_args["path"], json!("/tmp/red apple.jpg"));
    }

    #[test]
    fn bare_text_is_a_selection() {
        let intent = parse_intent("  photos/banana.png  ");
        assert_eq!(intent.action, "analyze");
        assert_eq!(intent.command_args["path"], json!("photos/banana.png"));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/status").action, "status");
        assert_eq!(parse_intent("/report").action, "show_report");
        assert_eq!(parse_intent("/reset").action, "reset");
        assert_eq!(parse_intent("/help").action, "help");
        assert_eq!(parse_intent("/quit").action, "quit");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn parse_model_command() {
        let intent = parse_intent("/model gemini-2.5-flash");
        assert_eq!(intent.action, "set_model");
        assert_eq!(intent.command_args["model"], json!("gemini-2.5-flash"));
    }

    #[test]
    fn parse_save_command() {
        let intent = parse_intent("/save out/report.json");
        assert_eq!(intent.action, "save_report");
        assert_eq!(intent.command_args["path"], json!("out/report.json"));
    }

    #[test]
    fn empty_input_is_a_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn unknown_command_is_surfaced() {
        let intent = parse_intent("/peel now");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("peel"));
        assert_eq!(intent.command_args["arg"], json!("now"));
    }
}
