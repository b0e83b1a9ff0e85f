use recoup_core::ErrorAnalysis;

/// Alternatives tried for an unrecognized executable, keyed by the base
/// command and indexed by attempt number.
const COMMAND_ALTERNATIVES: &[(&str, &[&str])] = &[
    ("ls", &["ls -la", "dir"]),
    ("cat", &["cat", "type"]),
    ("grep", &["grep", "findstr"]),
];

/// Deterministic corrected command for retry `attempt` (zero-based).
/// When no alternative applies the original command is returned unchanged
/// so the retry still runs and the attempt count is honoured.
pub fn corrected_command(analysis: &ErrorAnalysis, attempt: usize) -> String {
    let original = analysis.context.command.as_str();

    if analysis.matched_patterns.iter().any(|p| p == "command_not_found") {
        if let Some(base) = analysis.context.base_command() {
            if let Some((_, alternatives)) =
                COMMAND_ALTERNATIVES.iter().find(|(cmd, _)| *cmd == base)
            {
                if let Some(alternative) = alternatives.get(attempt) {
                    let args = original
                        .strip_prefix(base)
                        .unwrap_or("")
                        .trim_start();
                    return if args.is_empty() {
                        alternative.to_string()
                    } else {
                        format!("{} {}", alternative, args)
                    };
                }
            }
        }
        return original.to_string();
    }

    if analysis.matched_patterns.iter().any(|p| p == "no_such_file") {
        // Relative executables are the usual culprit; after that the
        // original command is retried as-is.
        if attempt == 0 && !original.starts_with("./") {
            return format!("./{}", original);
        }
        return original.to_string();
    }

    original.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use recoup_core::{
        next_id, ErrorCategory, ErrorContext, ErrorSeverity,
    };

    fn analysis_for(command: &str, pattern: &str) -> ErrorAnalysis {
        ErrorAnalysis {
            error_id: next_id("err"),
            category: ErrorCategory::CommandSyntax,
            severity: ErrorSeverity::Low,
            primary_message: "not found".to_string(),
            secondary_messages: Vec::new(),
            matched_patterns: vec![pattern.to_string()],
            suggested_fixes: Vec::new(),
            research_query: String::new(),
            requires_code_fix: false,
            requires_command_retry: true,
            context: ErrorContext::new(command, 127, "", ""),
            confidence: 0.8,
            analysis_time: 0.0,
        }
    }

    #[test]
    fn test_command_alternatives_by_attempt() {
        let analysis = analysis_for("ls /tmp", "command_not_found");
        assert_eq!(corrected_command(&analysis, 0), "ls -la /tmp");
        assert_eq!(corrected_command(&analysis, 1), "dir /tmp");
        // Past the table the original command is retried as-is.
        assert_eq!(corrected_command(&analysis, 2), "ls /tmp");
    }

    #[test]
    fn test_unknown_command_falls_back_to_original() {
        let analysis = analysis_for("frobnicate --now", "command_not_found");
        assert_eq!(corrected_command(&analysis, 0), "frobnicate --now");
    }

    #[test]
    fn test_missing_file_gets_relative_prefix() {
        let analysis = analysis_for("run.sh", "no_such_file");
        assert_eq!(corrected_command(&analysis, 0), "./run.sh");
        assert_eq!(corrected_command(&analysis, 1), "run.sh");
        assert_eq!(corrected_command(&analysis, 2), "run.sh");
    }

    #[test]
    fn test_corrections_split_into_clean_command_parts() {
        // Corrected commands are tokenized on whitespace before execution,
        // so they must never carry escape sequences.
        let analysis = analysis_for("cat my file.txt", "no_such_file");
        for attempt in 0..3 {
            let corrected = corrected_command(&analysis, attempt);
            assert!(!corrected.contains('\\'), "attempt {}: {}", attempt, corrected);
        }
    }
}
