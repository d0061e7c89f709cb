// src/connectors/redlight/robots.rs
//! Minimal robots.txt support: `Disallow` rules for one user-agent group.

use std::collections::HashMap;

use regex::Regex;

#[derive(Debug, Clone)]
pub struct RobotsRule {
    pub original: String,
    pattern: Regex,
}

impl RobotsRule {
    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }
}

/// Compiled disallow rules. Empty means unrestricted.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    rules: Vec<RobotsRule>,
}

/// Lower-cased product token of a user agent: `Foo/1.0 (+x)` -> `foo`.
pub fn agent_token(user_agent: &str) -> String {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// `*` matches any run of characters, a trailing `$` anchors the end;
/// otherwise the rule is a path prefix.
pub fn compile_rule(rule: &str) -> Option<Regex> {
    let (body, anchored) = match rule.strip_suffix('$') {
        Some(b) => (b, true),
        None => (rule, false),
    };
    let escaped: Vec<String> = body.split('*').map(regex::escape).collect();
    let src = format!("^{}{}", escaped.join(".*"), if anchored { "$" } else { "" });
    Regex::new(&src).ok()
}

impl RobotsRules {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Parse robots.txt and keep the disallow rules of the group naming
    /// `agent` (case-insensitive), else the `*` group.
    pub fn parse(content: &str, agent: &str) -> Self {
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        let mut current: Vec<String> = Vec::new();
        let mut in_agent_block = false;

        for raw in content.lines() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_ascii_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    // Consecutive user-agent lines share one group.
                    if !in_agent_block {
                        current.clear();
                    }
                    in_agent_block = true;
                    let name = value.to_ascii_lowercase();
                    groups.entry(name.clone()).or_default();
                    current.push(name);
                }
                "disallow" => {
                    in_agent_block = false;
                    for name in &current {
                        groups.entry(name.clone()).or_default().push(value.to_string());
                    }
                }
                _ => {
                    in_agent_block = false;
                }
            }
        }

        let agent = agent.to_ascii_lowercase();
        let selected = [agent.as_str(), "*"]
            .into_iter()
            .filter_map(|a| groups.get(a))
            .find(|rules| !rules.is_empty());

        let rules = selected
            .map(|rules| {
                rules
                    .iter()
                    .filter(|r| !r.is_empty())
                    .filter_map(|r| {
                        compile_rule(r).map(|pattern| RobotsRule {
                            original: r.clone(),
                            pattern,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { rules }
    }

    pub fn is_allowed(&self, path: &str) -> bool {
        !self.rules.iter().any(|r| r.matches(path))
    }

    pub fn is_unrestricted(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[RobotsRule] {
        &self.rules
    }
}
