//! Pattern Matcher: compiles named regex rules and extracts addresses
//! and severities from single log lines.

use crate::engine::ledger::Violation;
use crate::error::PatternError;
use regex::Regex;
use std::time::SystemTime;
use tracing::warn;

/// One compiled rule. `ip_group` is the 1-based capture index holding
/// the offending address.
pub struct CompiledPattern {
    pub name: String,
    regex: Regex,
    ip_group: usize,
    pub severity: u8,
    pub description: String,
}

impl CompiledPattern {
    /// Compile a rule, validating that `ip_group` can plausibly exist
    /// (the regex has at least that many capture groups). A rule that
    /// fails to compile or has too few groups is rejected here, not
    /// allowed to panic later during matching.
    pub fn compile(
        name: &str,
        regex_src: &str,
        ip_group: usize,
        severity: u8,
        description: &str,
    ) -> Result<Self, PatternError> {
        let regex = Regex::new(regex_src).map_err(|source| PatternError::InvalidRegex {
            name: name.to_string(),
            source,
        })?;
        if ip_group == 0 || ip_group > regex.captures_len().saturating_sub(1) {
            return Err(PatternError::MissingCaptureGroup {
                name: name.to_string(),
                group: ip_group,
            });
        }
        Ok(Self {
            name: name.to_string(),
            regex,
            ip_group,
            severity,
            description: description.to_string(),
        })
    }
}

/// A violation extracted from one log line, paired with the address it
/// names (the engine keys violations by address, not the matcher).
pub struct ExtractedViolation {
    pub address: String,
    pub violation: Violation,
}

/// The set of compiled rules, evaluated in a stable (load) order against
/// each incoming line.
#[derive(Default)]
pub struct PatternMatcher {
    patterns: Vec<CompiledPattern>,
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a matcher from a rule set, dropping (and warning about) any
    /// rule that fails to compile. Never fails outright: a broken
    /// pattern set must not halt the service.
    pub fn from_rules(rules: &[(String, String, usize, u8, String)]) -> Self {
        let mut patterns = Vec::with_capacity(rules.len());
        for (name, regex_src, ip_group, severity, description) in rules {
            match CompiledPattern::compile(name, regex_src, *ip_group, *severity, description) {
                Ok(pattern) => patterns.push(pattern),
                Err(e) => warn!(pattern = %name, error = %e, "dropping pattern that failed to compile"),
            }
        }
        Self { patterns }
    }

    pub fn push(&mut self, pattern: CompiledPattern) {
        self.patterns.push(pattern);
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Evaluate every rule against one line, in load order. A line may
    /// yield zero, one, or multiple violations — one per rule that both
    /// matches and whose `ip_group` capture parses as a valid address.
    pub fn extract(&self, line: &str, now: SystemTime) -> Vec<ExtractedViolation> {
        let mut out = Vec::new();
        for pattern in &self.patterns {
            let Some(captures) = pattern.regex.captures(line) else {
                continue;
            };
            let Some(addr_match) = captures.get(pattern.ip_group) else {
                continue;
            };
            let Some(addr) = crate::engine::address::parse_address(addr_match.as_str()) else {
                continue;
            };
            out.push(ExtractedViolation {
                address: crate::engine::address::canonical(&addr),
                violation: Violation {
                    timestamp: now,
                    severity: pattern.severity,
                    description: pattern.description.clone(),
                },
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dovecot_matcher() -> PatternMatcher {
        let mut matcher = PatternMatcher::new();
        matcher.push(
            CompiledPattern::compile(
                "dovecot-auth-failed",
                r"dovecot.*auth failed.*rip=([0-9.]+)",
                1,
                4,
                "dovecot auth failure",
            )
            .unwrap(),
        );
        matcher
    }

    #[test]
    fn matches_configured_rule_and_extracts_address() {
        let matcher = dovecot_matcher();
        let line = "Oct 15 10:30:15 mail dovecot: auth failed, rip=192.168.1.200";
        let violations = matcher.extract(line, SystemTime::now());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].address, "192.168.1.200");
        assert_eq!(violations[0].violation.severity, 4);
    }

    #[test]
    fn non_matching_line_yields_nothing() {
        let matcher = dovecot_matcher();
        let violations = matcher.extract("totally unrelated line", SystemTime::now());
        assert!(violations.is_empty());
    }

    #[test]
    fn single_line_can_match_multiple_rules() {
        let mut matcher = dovecot_matcher();
        matcher.push(
            CompiledPattern::compile(
                "generic-rip",
                r"rip=([0-9.]+)",
                1,
                2,
                "generic rip mention",
            )
            .unwrap(),
        );
        let line = "Oct 15 10:30:15 mail dovecot: auth failed, rip=192.168.1.200";
        let violations = matcher.extract(line, SystemTime::now());
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn invalid_regex_is_rejected_at_compile_time() {
        let result = CompiledPattern::compile("bad", "(unclosed", 1, 3, "broken");
        assert!(result.is_err());
    }

    #[test]
    fn from_rules_drops_broken_patterns_without_failing() {
        let rules = vec![
            (
                "good".to_string(),
                r"rip=([0-9.]+)".to_string(),
                1,
                3,
                "ok".to_string(),
            ),
            (
                "bad".to_string(),
                "(unclosed".to_string(),
                1,
                3,
                "broken".to_string(),
            ),
        ];
        let matcher = PatternMatcher::from_rules(&rules);
        assert_eq!(matcher.len(), 1);
    }
}
