//! Command screening for the process runner
//!
//! Commands are screened before any child is spawned. The blocked set
//! covers destructive filesystem wipes, disk formatting, machine
//! shutdown, raw `dd` reads, and fork bombs. Screening is syntactic:
//! each unquoted pipeline segment is tokenized and its primary command
//! inspected.

/// Screen a command line; `Err` carries the matched pattern description
pub fn screen(command: &str) -> Result<(), String> {
    let lower = command.to_lowercase();

    // Fork bomb: no tokenization will make this safe
    if lower.contains(":(){") {
        return Err("fork bomb".to_string());
    }

    for segment in split_unquoted_segments(command) {
        let tokens = tokenize_shell(&segment);
        let Some((cmd_index, cmd)) = primary_command(&tokens) else {
            continue;
        };

        match cmd.as_str() {
            "mkfs" | "format" | "diskpart" | "fdisk" => {
                return Err(format!("disk format command: {}", cmd));
            }
            "shutdown" | "reboot" | "halt" | "poweroff" => {
                return Err(format!("machine shutdown command: {}", cmd));
            }
            "dd" => {
                if tokens.iter().skip(cmd_index + 1).any(|t| t.starts_with("if=")) {
                    return Err("raw dd read".to_string());
                }
            }
            "rm" => {
                if is_destructive_rm(&tokens, cmd_index) {
                    return Err("recursive removal of a root path".to_string());
                }
            }
            c if c.starts_with("mkfs.") => {
                return Err(format!("disk format command: {}", c));
            }
            _ => {}
        }
    }

    Ok(())
}

/// `rm -rf` (or -fr) aimed at /, ~, or a top-level path
fn is_destructive_rm(tokens: &[String], cmd_index: usize) -> bool {
    let mut recursive = false;
    let mut force = false;
    let mut targets = Vec::new();

    for token in tokens.iter().skip(cmd_index + 1) {
        if token.starts_with('-') && !token.starts_with("--") {
            recursive |= token.contains('r') || token.contains('R');
            force |= token.contains('f');
        } else if token == "--recursive" {
            recursive = true;
        } else if token == "--force" {
            force = true;
        } else {
            targets.push(token.as_str());
        }
    }

    if !(recursive && force) {
        return false;
    }

    targets.iter().any(|t| {
        matches!(*t, "/" | "/*" | "~" | "~/" | "$HOME")
            || (t.starts_with('/') && t.trim_end_matches('/').matches('/').count() == 1 && t.len() <= 6)
    })
}

fn primary_command(tokens: &[String]) -> Option<(usize, String)> {
    let mut i = 0;
    while i < tokens.len() && is_env_assignment(&tokens[i]) {
        i += 1;
    }
    if i >= tokens.len() {
        return None;
    }

    let mut cmd = normalize_command_token(&tokens[i]);
    if cmd == "sudo" || cmd == "env" {
        i += 1;
        while i < tokens.len() && (tokens[i].starts_with('-') || is_env_assignment(&tokens[i])) {
            i += 1;
        }
        if i >= tokens.len() {
            return None;
        }
        cmd = normalize_command_token(&tokens[i]);
    }

    Some((i, cmd))
}

fn normalize_command_token(token: &str) -> String {
    let base = token.rsplit('/').next().unwrap_or(token);
    base.to_lowercase()
}

fn is_env_assignment(token: &str) -> bool {
    if token.starts_with('-') {
        return false;
    }
    let Some(eq) = token.find('=') else {
        return false;
    };
    if eq == 0 {
        return false;
    }
    token[..eq].chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split on unquoted `;`, `|`, `&`, and newlines
fn split_unquoted_segments(command: &str) -> Vec<String> {
    let b = command.as_bytes();
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    while i < b.len() {
        let c = b[i];
        if escaped {
            escaped = false;
            i += 1;
            continue;
        }
        if c == b'\\' && !in_single {
            escaped = true;
            i += 1;
            continue;
        }
        if c == b'\'' && !in_double {
            in_single = !in_single;
            i += 1;
            continue;
        }
        if c == b'"' && !in_single {
            in_double = !in_double;
            i += 1;
            continue;
        }

        if !in_single && !in_double {
            let split_len = if c == b';' || c == b'\n' {
                1
            } else if i + 1 < b.len() && ((c == b'&' && b[i + 1] == b'&') || (c == b'|' && b[i + 1] == b'|')) {
                2
            } else if c == b'|' || c == b'&' {
                1
            } else {
                0
            };

            if split_len > 0 {
                let seg = command[start..i].trim();
                if !seg.is_empty() {
                    out.push(seg.to_string());
                }
                i += split_len;
                start = i;
                continue;
            }
        }

        i += 1;
    }

    let seg = command[start..].trim();
    if !seg.is_empty() {
        out.push(seg.to_string());
    }
    out
}

/// Whitespace-split honoring quotes and escapes
pub fn tokenize_shell(segment: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for ch in segment.chars() {
        if escaped {
            cur.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if !in_single => escaped = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            c if c.is_whitespace() && !in_single && !in_double => {
                if !cur.is_empty() {
                    out.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}
