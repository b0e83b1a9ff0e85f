use recoup_core::{ErrorCategory, ErrorSeverity};
use regex::{Regex, RegexBuilder};

/// One registered classification rule. Rules are scanned in registration
/// order; the first category registered wins ties on confidence.
#[derive(Debug)]
pub struct PatternRule {
    pub id: &'static str,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub pattern: Regex,
    pub extract_message: Option<Regex>,
    pub research_keywords: &'static [&'static str],
}

fn regex(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .expect("pattern rule regex compiles")
}

fn rule(
    id: &'static str,
    category: ErrorCategory,
    severity: ErrorSeverity,
    pattern: &str,
    extract_message: Option<&str>,
    research_keywords: &'static [&'static str],
) -> PatternRule {
    PatternRule {
        id,
        category,
        severity,
        pattern: regex(pattern),
        extract_message: extract_message.map(regex),
        research_keywords,
    }
}

/// Default rule table. Registration order fixes the tie-break order between
/// categories: code errors before command syntax, before system, network,
/// dependency and configuration errors.
pub fn default_rules() -> Vec<PatternRule> {
    use ErrorCategory::*;
    use ErrorSeverity::*;

    vec![
        rule(
            "python_traceback",
            CodeError,
            Medium,
            r"Traceback \(most recent call last\):",
            Some(r"(\w+Error): (.+?)(?:\n|$)"),
            &["python", "traceback", "error"],
        ),
        rule(
            "python_syntax_error",
            CodeError,
            Medium,
            r"SyntaxError: (.+)",
            Some(r"SyntaxError: (.+)"),
            &["python", "syntax error"],
        ),
        rule(
            "python_missing_module",
            CodeError,
            Medium,
            r"ModuleNotFoundError: No module named (.+)",
            Some(r"ModuleNotFoundError: No module named (.+)"),
            &["python", "module not found", "install package"],
        ),
        rule(
            "npm_error",
            CodeError,
            Medium,
            r"npm ERR!",
            Some(r"npm ERR! (.+)"),
            &["npm", "node", "package manager"],
        ),
        rule(
            "rustc_error",
            CodeError,
            Medium,
            r"error(\[E\d+\])?: (.+)\n.*-->",
            Some(r"error(?:\[E\d+\])?: (.+)"),
            &["rust", "compilation error", "cargo"],
        ),
        rule(
            "command_not_found",
            CommandSyntax,
            Medium,
            r"command not found",
            Some(r"(.+): command not found"),
            &["bash", "command not found", "install"],
        ),
        rule(
            "no_such_file",
            CommandSyntax,
            Medium,
            r"No such file or directory",
            Some(r"(.+): No such file or directory"),
            &["file not found", "path"],
        ),
        rule(
            "invalid_option",
            CommandSyntax,
            Low,
            r"invalid option",
            Some(r"(.+): invalid option"),
            &["command options", "help"],
        ),
        rule(
            "usage_error",
            CommandSyntax,
            Low,
            r"usage: (.+)",
            Some(r"usage: (.+)"),
            &["command usage", "help"],
        ),
        rule(
            "permission_denied",
            SystemError,
            High,
            r"Permission denied",
            Some(r"(.+): Permission denied"),
            &["permission denied", "chmod", "sudo"],
        ),
        rule(
            "connection_refused",
            SystemError,
            Medium,
            r"Connection refused",
            Some(r"(.+): Connection refused"),
            &["connection refused", "server", "port"],
        ),
        rule(
            "port_in_use",
            SystemError,
            Medium,
            r"Port \d+ is already in use",
            Some(r"(Port \d+ is already in use)"),
            &["port in use", "kill process"],
        ),
        rule(
            "disk_full",
            SystemError,
            Critical,
            r"No space left on device",
            Some(r"No space left on device"),
            &["disk space", "cleanup"],
        ),
        rule(
            "dns_failure",
            NetworkError,
            Medium,
            r"Could not resolve host",
            Some(r"Could not resolve host: (.+)"),
            &["DNS", "network", "host resolution"],
        ),
        rule(
            "connection_timeout",
            NetworkError,
            Medium,
            r"Connection timed out",
            Some(r"Connection timed out"),
            &["connection timeout", "network"],
        ),
        rule(
            "missing_package",
            DependencyError,
            Medium,
            r"Package (.+) not found",
            Some(r"Package (.+) not found"),
            &["package manager", "install package"],
        ),
        rule(
            "version_conflict",
            DependencyError,
            Medium,
            r"version conflict",
            Some(r"version conflict(.+)"),
            &["version conflict", "dependency"],
        ),
        rule(
            "missing_config",
            ConfigurationError,
            Medium,
            r"Config file not found",
            Some(r"Config file not found: (.+)"),
            &["config file", "configuration"],
        ),
        rule(
            "invalid_config",
            ConfigurationError,
            Medium,
            r"Invalid configuration",
            Some(r"Invalid configuration: (.+)"),
            &["configuration", "config syntax"],
        ),
    ]
}
