//! Command line parser (C6 input half).
//!
//! The wire grammar is `VERB key=value key="quoted, value" ...`. Quoted
//! values may contain commas and spaces (notably `args="k1=v1,k2=v2"`), so a
//! plain whitespace split is not enough -- this mirrors the original
//! firmware's `find_param`/`copy_param_value` hand-rolled scanner rather than
//! reaching for `regex`, since the grammar needed (quote-aware tokenizing,
//! not pattern matching) is not what that crate is for.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Load {
        module_id: String,
        size: usize,
        crc32: String,
        replace: bool,
        replace_victim: Option<String>,
    },
    Start {
        module_id: String,
        func: Option<String>,
        args: Vec<(String, u32)>,
    },
    Stop {
        module_id: String,
    },
    Status,
    /// Recognized `LOAD` verb missing one of `module_id`/`size`/`crc32`: a
    /// `LOAD_ERR code=BAD_PARAMS`, not an unrecognized command.
    LoadBadParams,
    Unknown,
}

/// Split a command line into a verb and a set of raw key=value tokens,
/// honoring double-quoted values.
fn tokenize(line: &str) -> (String, HashMap<String, String>) {
    let line = line.trim();
    let mut chars = line.chars().peekable();
    let mut verb = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            break;
        }
        verb.push(c);
        chars.next();
    }

    let mut params = HashMap::new();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.peek() != Some(&'=') {
            // malformed token, skip to next whitespace
            while matches!(chars.peek(), Some(c) if !c.is_whitespace()) {
                chars.next();
            }
            continue;
        }
        chars.next(); // consume '='

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(&c) = chars.peek() {
                chars.next();
                if c == '"' {
                    break;
                }
                value.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        params.insert(key, value);
    }

    (verb, params)
}

/// Parse `args="k1=v1,k2=v2,..."` into ordered (key, u32-value) pairs,
/// clamped to `max_args` entries (extra pairs are dropped, matching the
/// fixed `argv[MAX_CALL_ARGS]` layout in the original firmware).
fn parse_args_value(raw: &str, max_args: usize) -> Vec<(String, u32)> {
    raw.split(',')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.to_string();
            let value: u32 = parts.next()?.parse().ok()?;
            Some((key, value))
        })
        .take(max_args)
        .collect()
}

pub fn parse_line(line: &str, max_args: usize) -> Command {
    let (verb, params) = tokenize(line);
    match verb.as_str() {
        "LOAD" => {
            let module_id = match params.get("module_id") {
                Some(v) => v.clone(),
                None => return Command::LoadBadParams,
            };
            let size = match params.get("size").and_then(|v| v.parse().ok()) {
                Some(v) => v,
                None => return Command::LoadBadParams,
            };
            let crc32 = match params.get("crc32") {
                Some(v) => v.clone(),
                None => return Command::LoadBadParams,
            };
            let replace = params.get("replace").map(|v| v == "1").unwrap_or(false);
            let replace_victim = params.get("replace_victim").cloned();
            Command::Load {
                module_id,
                size,
                crc32,
                replace,
                replace_victim,
            }
        }
        "START" => {
            let module_id = match params.get("module_id") {
                Some(v) => v.clone(),
                None => return Command::Unknown,
            };
            let func = params.get("func").cloned();
            let args = params
                .get("args")
                .map(|v| parse_args_value(v, max_args))
                .unwrap_or_default();
            Command::Start {
                module_id,
                func,
                args,
            }
        }
        "STOP" => match params.get("module_id") {
            Some(v) => Command::Stop {
                module_id: v.clone(),
            },
            None => Command::Unknown,
        },
        "STATUS" => Command::Status,
        _ => Command::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_load() {
        let cmd = parse_line("LOAD module_id=m1 size=128 crc32=deadbeef", 4);
        assert_eq!(
            cmd,
            Command::Load {
                module_id: "m1".to_string(),
                size: 128,
                crc32: "deadbeef".to_string(),
                replace: false,
                replace_victim: None,
            }
        );
    }

    #[test]
    fn parses_load_with_replace_victim() {
        let cmd = parse_line(
            "LOAD module_id=m1 size=128 crc32=deadbeef replace=1 replace_victim=m0",
            4,
        );
        assert_eq!(
            cmd,
            Command::Load {
                module_id: "m1".to_string(),
                size: 128,
                crc32: "deadbeef".to_string(),
                replace: true,
                replace_victim: Some("m0".to_string()),
            }
        );
    }

    #[test]
    fn parses_start_with_quoted_args() {
        let cmd = parse_line(r#"START module_id=m1 func=app_main args="a=1,b=2""#, 4);
        assert_eq!(
            cmd,
            Command::Start {
                module_id: "m1".to_string(),
                func: Some("app_main".to_string()),
                args: vec![("a".to_string(), 1), ("b".to_string(), 2)],
            }
        );
    }

    #[test]
    fn args_clamp_to_max_call_args() {
        let cmd = parse_line(r#"START module_id=m1 args="a=1,b=2,c=3,d=4,e=5""#, 4);
        match cmd {
            Command::Start { args, .. } => assert_eq!(args.len(), 4),
            _ => panic!("expected Start"),
        }
    }

    #[test]
    fn parses_stop_and_status() {
        assert_eq!(
            parse_line("STOP module_id=m1", 4),
            Command::Stop {
                module_id: "m1".to_string()
            }
        );
        assert_eq!(parse_line("STATUS", 4), Command::Status);
    }

    #[test]
    fn unknown_verb_yields_unknown() {
        assert_eq!(parse_line("FROBNICATE", 4), Command::Unknown);
    }

    #[test]
    fn missing_required_param_yields_load_bad_params() {
        assert_eq!(
            parse_line("LOAD module_id=m1 size=128", 4),
            Command::LoadBadParams
        );
    }
}
