//! Policy engine for per-path conflict strategies
//!
//! Evaluates conflict rules from configuration to pick the strategy for a
//! path. Rules are matched using glob patterns in first-match-wins order.

use glob::Pattern;
use tracing::{debug, trace};

use mirrorsync_core::config::{ConflictRuleConfig, ConflictsConfig};
use mirrorsync_core::domain::ConflictStrategy;

use crate::error::ConflictError;

/// Compiles a rule's glob pattern
fn compile(rule: &ConflictRuleConfig) -> Result<Pattern, ConflictError> {
    Pattern::new(&rule.pattern).map_err(|e| ConflictError::InvalidPattern {
        pattern: rule.pattern.clone(),
        reason: e.to_string(),
    })
}

/// Engine that evaluates conflict strategy rules
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    rules: Vec<(Pattern, ConflictStrategy)>,
    default_strategy: ConflictStrategy,
}

impl PolicyEngine {
    /// Creates a PolicyEngine from a default strategy and a list of rules
    ///
    /// Invalid rules are logged and skipped.
    pub fn new(default_strategy: ConflictStrategy, rules: &[ConflictRuleConfig]) -> Self {
        let compiled_rules: Vec<(Pattern, ConflictStrategy)> = rules
            .iter()
            .filter_map(|rule| match compile(rule) {
                Ok(pattern) => Some((pattern, rule.strategy)),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping invalid conflict rule pattern");
                    None
                }
            })
            .collect();

        debug!(
            rules_count = compiled_rules.len(),
            default = %default_strategy,
            "PolicyEngine initialized"
        );

        Self {
            rules: compiled_rules,
            default_strategy,
        }
    }

    /// Creates a PolicyEngine, failing on the first invalid rule
    pub fn try_from_config(config: &ConflictsConfig) -> Result<Self, ConflictError> {
        let rules = config
            .rules
            .iter()
            .map(|rule| compile(rule).map(|p| (p, rule.strategy)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            default_strategy: config.default_strategy,
        })
    }

    /// Evaluates the policy for a given path (relative to the sync root)
    ///
    /// The first rule whose glob matches the path determines the strategy.
    /// If no rule matches, returns the default strategy.
    pub fn evaluate(&self, relative_path: &str) -> ConflictStrategy {
        for (pattern, strategy) in &self.rules {
            if pattern.matches(relative_path) {
                trace!(
                    path = %relative_path,
                    pattern = %pattern,
                    strategy = %strategy,
                    "Conflict rule matched"
                );
                return *strategy;
            }
        }

        trace!(
            path = %relative_path,
            default = %self.default_strategy,
            "No conflict rule matched, using default"
        );
        self.default_strategy
    }

    /// Returns the default strategy
    pub fn default_strategy(&self) -> ConflictStrategy {
        self.default_strategy
    }

    /// Returns the number of compiled rules
    pub fn rules_count(&self) -> usize {
        self.rules.len()
    }
}

impl From<&ConflictsConfig> for PolicyEngine {
    fn from(config: &ConflictsConfig) -> Self {
        Self::new(config.default_strategy, &config.rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, strategy: ConflictStrategy) -> ConflictRuleConfig {
        ConflictRuleConfig {
            pattern: pattern.to_string(),
            strategy,
        }
    }

    #[test]
    fn test_policy_engine_no_rules() {
        let engine = PolicyEngine::new(ConflictStrategy::Newer, &[]);
        assert_eq!(engine.evaluate("any/file.txt"), ConflictStrategy::Newer);
        assert_eq!(engine.rules_count(), 0);
    }

    #[test]
    fn test_policy_engine_first_match_wins() {
        let rules = vec![
            rule("**/*.docx", ConflictStrategy::Larger),
            rule("**/*", ConflictStrategy::Remote),
        ];
        let engine = PolicyEngine::new(ConflictStrategy::Newer, &rules);

        assert_eq!(engine.evaluate("Documents/report.docx"), ConflictStrategy::Larger);
        assert_eq!(engine.evaluate("Documents/report.pdf"), ConflictStrategy::Remote);
    }

    #[test]
    fn test_policy_engine_glob_patterns() {
        let rules = vec![
            rule("*.tmp", ConflictStrategy::Remote),
            rule("Documents/**/*.xlsx", ConflictStrategy::Local),
        ];
        let engine = PolicyEngine::new(ConflictStrategy::Newer, &rules);

        assert_eq!(engine.evaluate("test.tmp"), ConflictStrategy::Remote);
        assert_eq!(
            engine.evaluate("Documents/Finance/budget.xlsx"),
            ConflictStrategy::Local
        );
        assert_eq!(engine.evaluate("other.txt"), ConflictStrategy::Newer);
    }

    #[test]
    fn test_policy_engine_invalid_rules_skipped() {
        let rules = vec![
            rule("[invalid", ConflictStrategy::Local),
            rule("**/*.rs", ConflictStrategy::Local),
        ];
        let engine = PolicyEngine::new(ConflictStrategy::Newer, &rules);
        assert_eq!(engine.rules_count(), 1);
        assert_eq!(engine.evaluate("src/main.rs"), ConflictStrategy::Local);
    }

    #[test]
    fn test_try_from_config_rejects_invalid_pattern() {
        let config = ConflictsConfig {
            default_strategy: ConflictStrategy::Newer,
            rules: vec![rule("[invalid", ConflictStrategy::Local)],
        };
        assert!(matches!(
            PolicyEngine::try_from_config(&config),
            Err(ConflictError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_from_config() {
        let config = ConflictsConfig {
            default_strategy: ConflictStrategy::Larger,
            rules: vec![rule("*.log", ConflictStrategy::Local)],
        };
        let engine = PolicyEngine::from(&config);
        assert_eq!(engine.default_strategy(), ConflictStrategy::Larger);
        assert_eq!(engine.evaluate("app.log"), ConflictStrategy::Local);
    }
}
