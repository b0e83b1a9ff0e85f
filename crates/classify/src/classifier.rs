use crate::patterns::{default_rules, PatternRule};
use recoup_core::{next_id, ErrorAnalysis, ErrorCategory, ErrorContext, ErrorSeverity};
use std::sync::Arc;
use std::time::Instant;

const BASE_MATCH_CONFIDENCE: f64 = 0.8;
const EXTRACT_BONUS: f64 = 0.1;
const UNKNOWN_CONFIDENCE: f64 = 0.3;
const ENHANCED_CONFIDENCE_CAP: f64 = 0.95;
const MAX_SUGGESTED_FIXES: usize = 5;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
];

const CODE_FIX_MARKERS: &[&str] =
    &["traceback", "syntaxerror", "compilation error", "build failed"];

/// Optional text-understanding hook. Its output may refine the message and
/// fixes and raise confidence, but the pattern result stays authoritative.
pub trait AnalysisEnhancer: Send + Sync {
    fn enhance(&self, context: &ErrorContext, draft: &ErrorAnalysis) -> Option<Enhancement>;
}

#[derive(Debug, Clone, Default)]
pub struct Enhancement {
    pub primary_message: Option<String>,
    pub suggested_fixes: Vec<String>,
}

/// Pattern-based error classifier. `analyze` is total: any input yields an
/// analysis, worst case an unknown-error one, so classification can never
/// block recovery.
pub struct ErrorClassifier {
    rules: Vec<PatternRule>,
    enhancer: Option<Arc<dyn AnalysisEnhancer>>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
            enhancer: None,
        }
    }

    pub fn with_enhancer(enhancer: Arc<dyn AnalysisEnhancer>) -> Self {
        Self {
            rules: default_rules(),
            enhancer: Some(enhancer),
        }
    }

    pub fn analyze(&self, context: &ErrorContext) -> ErrorAnalysis {
        let started = Instant::now();
        let error_id = next_id("err");

        tracing::debug!(command = %context.command, "analyzing failed execution");

        let mut analysis = match self.best_match(context) {
            Some((rule, confidence)) => self.build_analysis(rule, confidence, context, &error_id),
            None => self.unknown_analysis(context, &error_id),
        };

        if let Some(enhancer) = &self.enhancer {
            if let Some(enhancement) = enhancer.enhance(context, &analysis) {
                apply_enhancement(&mut analysis, enhancement);
            }
        }

        analysis.analysis_time = started.elapsed().as_secs_f64();

        tracing::info!(
            error_id = %analysis.error_id,
            category = %analysis.category,
            severity = %analysis.severity,
            confidence = analysis.confidence,
            "error classified"
        );

        analysis
    }

    /// Best rule by confidence; ties keep the earlier-registered rule.
    fn best_match(&self, context: &ErrorContext) -> Option<(&PatternRule, f64)> {
        let text = combined_output(context);

        let mut best: Option<(&PatternRule, f64)> = None;
        for rule in &self.rules {
            if !rule.pattern.is_match(&text) {
                continue;
            }
            let mut confidence = BASE_MATCH_CONFIDENCE;
            if let Some(extract) = &rule.extract_message {
                if extract.is_match(&text) {
                    confidence += EXTRACT_BONUS;
                }
            }
            if best.map_or(true, |(_, c)| confidence > c) {
                best = Some((rule, confidence));
            }
        }
        best
    }

    fn build_analysis(
        &self,
        rule: &PatternRule,
        confidence: f64,
        context: &ErrorContext,
        error_id: &str,
    ) -> ErrorAnalysis {
        let primary_message = extract_primary_message(rule, context);
        let suggested_fixes = suggested_fixes(rule, context);
        let category = rule.category;
        let severity = rule.severity;

        let requires_code_fix = category == ErrorCategory::CodeError
            || contains_code_fix_marker(&primary_message);
        let requires_command_retry = matches!(
            category,
            ErrorCategory::CommandSyntax
                | ErrorCategory::DependencyError
                | ErrorCategory::ConfigurationError
        ) || severity == ErrorSeverity::Low;

        let research_query =
            build_research_query(category, &primary_message, context, rule.research_keywords);

        ErrorAnalysis {
            error_id: error_id.to_string(),
            category,
            severity,
            primary_message,
            secondary_messages: Vec::new(),
            matched_patterns: vec![rule.id.to_string()],
            suggested_fixes,
            research_query,
            requires_code_fix,
            requires_command_retry,
            context: context.clone(),
            confidence,
            analysis_time: 0.0,
        }
    }

    fn unknown_analysis(&self, context: &ErrorContext, error_id: &str) -> ErrorAnalysis {
        let primary_message = first_stderr_line(context);
        let research_query = build_research_query(
            ErrorCategory::UnknownError,
            &primary_message,
            context,
            &[],
        );

        ErrorAnalysis {
            error_id: error_id.to_string(),
            category: ErrorCategory::UnknownError,
            severity: ErrorSeverity::Medium,
            primary_message,
            secondary_messages: Vec::new(),
            matched_patterns: Vec::new(),
            suggested_fixes: vec![
                "Review full error output for clues".to_string(),
                "Check command documentation".to_string(),
                "Search online for similar error messages".to_string(),
            ],
            research_query,
            requires_code_fix: false,
            // Unclassified failures default to a corrected retry.
            requires_command_retry: true,
            context: context.clone(),
            confidence: UNKNOWN_CONFIDENCE,
            analysis_time: 0.0,
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn combined_output(context: &ErrorContext) -> String {
    format!("{} {}", context.stderr, context.stdout)
}

fn extract_primary_message(rule: &PatternRule, context: &ErrorContext) -> String {
    if let Some(extract) = &rule.extract_message {
        let text = combined_output(context);
        if let Some(caps) = extract.captures(&text) {
            let m = caps
                .get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().trim().to_string());
            if let Some(message) = m {
                if !message.is_empty() {
                    return message;
                }
            }
        }
    }
    first_stderr_line(context)
}

fn first_stderr_line(context: &ErrorContext) -> String {
    context
        .stderr
        .lines()
        .next()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| format!("Command failed with exit code {}", context.exit_code))
}

fn contains_code_fix_marker(message: &str) -> bool {
    let lower = message.to_lowercase();
    CODE_FIX_MARKERS.iter().any(|m| lower.contains(m))
}

/// Fix suggestions keyed by the matched rule, falling back to generic
/// guidance when no specific template applies.
fn suggested_fixes(rule: &PatternRule, context: &ErrorContext) -> Vec<String> {
    let fixes: Vec<String> = match rule.id {
        "python_missing_module" => match extract_module_name(&context.stderr) {
            Some(module) => vec![
                format!("Install missing module: pip install {}", module),
                "Check if the module is listed in requirements.txt".to_string(),
                "Verify the virtual environment is activated".to_string(),
            ],
            None => Vec::new(),
        },
        "npm_error" => vec![
            "Clear npm cache: npm cache clean --force".to_string(),
            "Delete node_modules and reinstall: rm -rf node_modules && npm install".to_string(),
            "Check package.json for syntax errors".to_string(),
        ],
        "command_not_found" => vec![
            "Check if the command is installed".to_string(),
            "Verify the command is in PATH".to_string(),
            "Install the required package or tool".to_string(),
        ],
        "no_such_file" => vec![
            "Check file path spelling".to_string(),
            "Verify the file exists in the current directory".to_string(),
            "Use an absolute path instead of a relative path".to_string(),
        ],
        "permission_denied" => vec![
            "Run with sudo if a system operation is required".to_string(),
            "Change file permissions: chmod +x <file>".to_string(),
            "Check file ownership: chown <user>:<group> <file>".to_string(),
        ],
        "port_in_use" => vec![
            "Kill the process using the port: lsof -ti:<port> | xargs kill -9".to_string(),
            "Use a different port number".to_string(),
            "Check for running services".to_string(),
        ],
        _ => Vec::new(),
    };

    if fixes.is_empty() {
        vec![
            "Check command syntax and arguments".to_string(),
            "Verify all dependencies are installed".to_string(),
            "Review the error message for specific guidance".to_string(),
        ]
    } else {
        fixes
    }
}

fn extract_module_name(stderr: &str) -> Option<String> {
    let marker = "No module named ";
    let rest = stderr.split(marker).nth(1)?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '\'' | '"'))
        .filter(|c| *c != '\'' && *c != '"')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Query = base executable + top three key terms of the message + a
/// category-specific suffix.
fn build_research_query(
    category: ErrorCategory,
    primary_message: &str,
    context: &ErrorContext,
    keywords: &[&str],
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(base) = context.base_command() {
        parts.push(base.to_string());
    }

    parts.extend(key_terms(primary_message).into_iter().take(3));

    match category {
        ErrorCategory::CodeError => parts.push("fix".to_string()),
        ErrorCategory::CommandSyntax => parts.push("usage example".to_string()),
        ErrorCategory::SystemError => parts.push("solution".to_string()),
        _ => {}
    }

    if parts.is_empty() {
        parts.extend(keywords.iter().map(|k| k.to_string()));
    }

    parts.join(" ")
}

fn key_terms(message: &str) -> Vec<String> {
    message
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 2 && !STOPWORDS.contains(t))
        .take(5)
        .map(|t| t.to_string())
        .collect()
}

fn apply_enhancement(analysis: &mut ErrorAnalysis, enhancement: Enhancement) {
    if let Some(message) = enhancement.primary_message {
        if !message.is_empty() {
            analysis.primary_message = message;
        }
    }

    if !enhancement.suggested_fixes.is_empty() {
        let mut merged = enhancement.suggested_fixes;
        merged.extend(analysis.suggested_fixes.drain(..));
        let mut seen = std::collections::HashSet::new();
        merged.retain(|f| seen.insert(f.clone()));
        merged.truncate(MAX_SUGGESTED_FIXES);
        analysis.suggested_fixes = merged;
    }

    // Enhancement only ever raises confidence, capped below certainty.
    let raised = (analysis.confidence + EXTRACT_BONUS).min(ENHANCED_CONFIDENCE_CAP);
    analysis.confidence = analysis.confidence.max(raised);
}

#[cfg(test)]
mod tests {
    use super::*;
    use recoup_core::ErrorContext;

    fn ctx(command: &str, stderr: &str) -> ErrorContext {
        ErrorContext::new(command, 1, "", stderr)
    }

    #[test]
    fn test_missing_module_classified_as_code_error() {
        let classifier = ErrorClassifier::new();
        let analysis = classifier.analyze(&ctx(
            "python app.py",
            "ModuleNotFoundError: No module named 'flask'",
        ));

        assert_eq!(analysis.category, ErrorCategory::CodeError);
        assert!(analysis.confidence >= 0.8);
        assert!(analysis.requires_code_fix);
        assert!(analysis
            .suggested_fixes
            .iter()
            .any(|f| f.contains("pip install flask")));
    }

    #[test]
    fn test_command_not_found_classified_as_syntax() {
        let classifier = ErrorClassifier::new();
        let analysis = classifier.analyze(&ctx("invalidcmd", "bash: invalidcmd: command not found"));

        assert_eq!(analysis.category, ErrorCategory::CommandSyntax);
        assert!(analysis.confidence >= 0.8);
        assert!(analysis.requires_command_retry);
        assert!(!analysis.requires_code_fix);
    }

    #[test]
    fn test_disk_full_is_critical_system_error() {
        let classifier = ErrorClassifier::new();
        let analysis = classifier.analyze(&ctx("cp big.iso /mnt", "No space left on device"));

        assert_eq!(analysis.category, ErrorCategory::SystemError);
        assert_eq!(analysis.severity, ErrorSeverity::Critical);
    }

    #[test]
    fn test_unmatched_output_yields_unknown() {
        let classifier = ErrorClassifier::new();
        let analysis = classifier.analyze(&ctx("./run.sh", "something inexplicable happened"));

        assert_eq!(analysis.category, ErrorCategory::UnknownError);
        assert!((analysis.confidence - 0.3).abs() < f64::EPSILON);
        assert!(analysis.requires_command_retry);
        assert!(!analysis.requires_code_fix);
    }

    #[test]
    fn test_empty_output_never_fails() {
        let classifier = ErrorClassifier::new();
        let analysis = classifier.analyze(&ctx("", ""));

        assert_eq!(analysis.category, ErrorCategory::UnknownError);
        assert_eq!(analysis.primary_message, "Command failed with exit code 1");
    }

    #[test]
    fn test_analysis_is_idempotent() {
        let classifier = ErrorClassifier::new();
        let context = ctx("python app.py", "SyntaxError: invalid syntax");

        let a = classifier.analyze(&context);
        let b = classifier.analyze(&context);

        assert_eq!(a.category, b.category);
        assert_eq!(a.severity, b.severity);
        assert!((a.confidence - b.confidence).abs() < f64::EPSILON);
    }

    #[test]
    fn test_extraction_bonus_raises_confidence() {
        let classifier = ErrorClassifier::new();
        let analysis = classifier.analyze(&ctx(
            "python app.py",
            "SyntaxError: invalid syntax",
        ));
        assert!((analysis.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_research_query_shape() {
        let classifier = ErrorClassifier::new();
        let analysis = classifier.analyze(&ctx(
            "python app.py",
            "ModuleNotFoundError: No module named 'flask'",
        ));

        assert!(analysis.research_query.starts_with("python"));
        assert!(analysis.research_query.ends_with("fix"));
    }

    #[test]
    fn test_syntax_query_suffix() {
        let classifier = ErrorClassifier::new();
        let analysis = classifier.analyze(&ctx("invalidcmd", "invalidcmd: command not found"));
        assert!(analysis.research_query.ends_with("usage example"));
    }

    #[test]
    fn test_permission_denied_requires_no_retry() {
        let classifier = ErrorClassifier::new();
        let analysis = classifier.analyze(&ctx("cat /etc/shadow", "cat: /etc/shadow: Permission denied"));

        assert_eq!(analysis.category, ErrorCategory::SystemError);
        assert_eq!(analysis.severity, ErrorSeverity::High);
        assert!(!analysis.requires_command_retry);
    }

    struct FixedEnhancer;

    impl AnalysisEnhancer for FixedEnhancer {
        fn enhance(&self, _context: &ErrorContext, _draft: &ErrorAnalysis) -> Option<Enhancement> {
            Some(Enhancement {
                primary_message: Some("flask is not installed".to_string()),
                suggested_fixes: vec!["pip install flask".to_string()],
            })
        }
    }

    #[test]
    fn test_enhancer_raises_confidence_capped() {
        let classifier = ErrorClassifier::with_enhancer(Arc::new(FixedEnhancer));
        let analysis = classifier.analyze(&ctx(
            "python app.py",
            "ModuleNotFoundError: No module named 'flask'",
        ));

        assert_eq!(analysis.primary_message, "flask is not installed");
        assert_eq!(analysis.suggested_fixes[0], "pip install flask");
        assert!(analysis.confidence > 0.8);
        assert!(analysis.confidence <= 0.95);
        assert!(analysis.suggested_fixes.len() <= 5);
    }

    #[test]
    fn test_low_severity_enables_retry() {
        let classifier = ErrorClassifier::new();
        let analysis = classifier.analyze(&ctx("tar", "usage: tar [-options] <name>"));

        assert_eq!(analysis.severity, ErrorSeverity::Low);
        assert!(analysis.requires_command_retry);
    }
}
