//! Authorization rules attached to profiles
//!
//! A profile may carry allow/deny rules. When it does, every mutation asks a
//! [`RuleEvaluator`] whether the acting principal may administer it.

use serde::{Deserialize, Serialize};

/// Rule directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Directive {
    Allow,
    Deny,
}

/// What the principal is trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    Administer,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Administer => "administer",
        }
    }
}

/// One directive of a profile's rule set
///
/// `action` is `view`, `administer` or `*`. `subject_type` is `user`,
/// `role` or `*`. `resource` is a glob (`*` matches any run of characters)
/// compared case-insensitively against the principal's name or roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub directive: Directive,
    pub action: String,
    #[serde(rename = "type")]
    pub subject_type: String,
    pub resource: String,
}

impl Rule {
    pub fn allow(
        action: impl Into<String>,
        subject_type: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            directive: Directive::Allow,
            action: action.into(),
            subject_type: subject_type.into(),
            resource: resource.into(),
        }
    }

    pub fn deny(
        action: impl Into<String>,
        subject_type: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            directive: Directive::Deny,
            ..Self::allow(action, subject_type, resource)
        }
    }

    /// Whether this rule speaks about `principal` performing `action`
    pub fn applies_to(&self, principal: &Principal, action: Action) -> bool {
        self.covers_action(action) && self.covers_subject(principal)
    }

    fn covers_action(&self, action: Action) -> bool {
        let rule_action = self.action.to_ascii_lowercase();
        match rule_action.as_str() {
            "*" => true,
            // administering a profile implies viewing it
            "administer" => true,
            other => other == action.as_str(),
        }
    }

    fn covers_subject(&self, principal: &Principal) -> bool {
        let user = || glob_matches(&self.resource, &principal.name);
        let role = || principal.roles.iter().any(|r| glob_matches(&self.resource, r));
        match self.subject_type.to_ascii_lowercase().as_str() {
            "user" => user(),
            "role" => role(),
            "*" => user() || role(),
            _ => false,
        }
    }
}

/// Who is acting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

/// Context provided to a rule evaluator
#[derive(Debug)]
pub struct RuleContext<'a> {
    pub principal: &'a Principal,
    pub rules: &'a [Rule],
    pub action: Action,
    /// Name of the profile being acted on
    pub profile: &'a str,
}

/// Decision returned by a rule evaluator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleDecision {
    Allow,
    Deny(String),
}

/// Strategy for evaluating a profile's rule set
pub trait RuleEvaluator: Send + Sync {
    fn check(&self, ctx: &RuleContext<'_>) -> RuleDecision;

    fn permits(&self, principal: &Principal, rules: &[Rule], action: Action) -> bool {
        let ctx = RuleContext {
            principal,
            rules,
            action,
            profile: "",
        };
        self.check(&ctx) == RuleDecision::Allow
    }
}

// ============================================================================
// Default Implementations
// ============================================================================

/// Directive-based evaluation
///
/// - An empty rule set allows everything
/// - Any matching deny wins over matching allows
/// - A non-empty rule set with no match denies
/// - An optional super-admin role bypasses the rules
#[derive(Debug, Clone, Default)]
pub struct DirectiveRuleEvaluator {
    super_admin_role: Option<String>,
}

impl DirectiveRuleEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_super_admin_role(mut self, role: impl Into<String>) -> Self {
        self.super_admin_role = Some(role.into());
        self
    }
}

impl RuleEvaluator for DirectiveRuleEvaluator {
    fn check(&self, ctx: &RuleContext<'_>) -> RuleDecision {
        if ctx.rules.is_empty() {
            return RuleDecision::Allow;
        }
        if let Some(role) = &self.super_admin_role {
            if ctx.principal.has_role(role) {
                return RuleDecision::Allow;
            }
        }

        let mut allowed = false;
        for rule in ctx.rules.iter().filter(|r| r.applies_to(ctx.principal, ctx.action)) {
            match rule.directive {
                Directive::Deny => {
                    return RuleDecision::Deny(format!(
                        "User '{}' is denied to {} '{}' by rule '{}'",
                        ctx.principal.name,
                        ctx.action.as_str(),
                        ctx.profile,
                        rule.resource
                    ))
                }
                Directive::Allow => allowed = true,
            }
        }

        if allowed {
            RuleDecision::Allow
        } else {
            RuleDecision::Deny(format!(
                "User '{}' is not allowed to {} '{}'",
                ctx.principal.name,
                ctx.action.as_str(),
                ctx.profile
            ))
        }
    }
}

/// Trust-all evaluator (DANGEROUS - for development only)
#[derive(Debug)]
pub struct TrustAllRules {
    _private: (),
}

impl TrustAllRules {
    /// Bypasses every rule. Only use in controlled environments.
    pub fn new_dangerous() -> Self {
        Self { _private: () }
    }
}

impl RuleEvaluator for TrustAllRules {
    fn check(&self, _ctx: &RuleContext<'_>) -> RuleDecision {
        RuleDecision::Allow
    }
}

/// Case-insensitive glob where `*` matches any run of characters
fn glob_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let text: Vec<char> = text.to_lowercase().chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(evaluator: &dyn RuleEvaluator, principal: &Principal, rules: &[Rule]) -> RuleDecision {
        evaluator.check(&RuleContext {
            principal,
            rules,
            action: Action::Administer,
            profile: "ldap",
        })
    }

    #[test]
    fn test_glob_matches() {
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("ops-*", "OPS-admins"));
        assert!(glob_matches("*admin*", "superadministrator"));
        assert!(!glob_matches("ops-*", "dev-ops"));
        assert!(glob_matches("bob", "Bob"));
        assert!(!glob_matches("bob", "bobby"));
    }

    #[test]
    fn test_empty_rules_allow() {
        let evaluator = DirectiveRuleEvaluator::new();
        assert_eq!(check(&evaluator, &Principal::new("bob"), &[]), RuleDecision::Allow);
    }

    #[test]
    fn test_matching_allow_by_role() {
        let evaluator = DirectiveRuleEvaluator::new();
        let rules = [Rule::allow("administer", "role", "ops-*")];
        let bob = Principal::new("bob").with_role("ops-admins");

        assert_eq!(check(&evaluator, &bob, &rules), RuleDecision::Allow);
        assert!(evaluator.permits(&bob, &rules, Action::View));
    }

    #[test]
    fn test_no_match_denies() {
        let evaluator = DirectiveRuleEvaluator::new();
        let rules = [Rule::allow("*", "user", "alice")];

        match check(&evaluator, &Principal::new("bob"), &rules) {
            RuleDecision::Deny(reason) => assert!(reason.contains("bob")),
            other => panic!("Expected Deny, got {:?}", other),
        }
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let evaluator = DirectiveRuleEvaluator::new();
        let rules = [
            Rule::allow("*", "*", "*"),
            Rule::deny("administer", "user", "mallory"),
        ];

        assert_eq!(check(&evaluator, &Principal::new("bob"), &rules), RuleDecision::Allow);
        assert!(matches!(
            check(&evaluator, &Principal::new("Mallory"), &rules),
            RuleDecision::Deny(_)
        ));
    }

    #[test]
    fn test_view_rule_does_not_grant_administer() {
        let evaluator = DirectiveRuleEvaluator::new();
        let rules = [Rule::allow("view", "user", "bob")];
        let bob = Principal::new("bob");

        assert!(evaluator.permits(&bob, &rules, Action::View));
        assert!(!evaluator.permits(&bob, &rules, Action::Administer));
    }

    #[test]
    fn test_super_admin_bypasses_rules() {
        let evaluator = DirectiveRuleEvaluator::new().with_super_admin_role("admins");
        let rules = [Rule::deny("*", "*", "*")];
        let root = Principal::new("root").with_role("Admins");

        assert_eq!(check(&evaluator, &root, &rules), RuleDecision::Allow);
    }

    #[test]
    fn test_trust_all_allows_everything() {
        let evaluator = TrustAllRules::new_dangerous();
        let rules = [Rule::deny("*", "*", "*")];
        assert_eq!(check(&evaluator, &Principal::new("x"), &rules), RuleDecision::Allow);
    }

    #[test]
    fn test_rule_serde_shape() {
        let json = r#"{"directive":"deny","action":"*","type":"role","resource":"guests"}"#;
        let rule: Rule = serde_json::from_str(json).unwrap();
        assert_eq!(rule, Rule::deny("*", "role", "guests"));
    }
}
