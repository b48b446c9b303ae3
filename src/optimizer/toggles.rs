//! Per-query rule toggles.
//!
//! `options.optimizer.rules` carries a token list: `+name` / `-name` switch
//! one rule, `+all` / `-all` switch every rule. Tokens apply in order, so
//! `["-all", "+use-indexes"]` runs exactly one rule.

use std::collections::HashMap;

use super::RULE_NAMES;

#[derive(Debug, Clone)]
pub struct RuleToggles {
    enabled: HashMap<&'static str, bool>,
}

impl RuleToggles {
    /// All rules enabled, the default.
    pub fn all() -> Self {
        Self {
            enabled: RULE_NAMES.iter().map(|name| (*name, true)).collect(),
        }
    }

    /// Applies `+name`/`-name`/`+all`/`-all` tokens in order. Unknown rule
    /// names are ignored, matching the lenient surface of the original
    /// option.
    pub fn from_tokens<'a, I: IntoIterator<Item = &'a str>>(tokens: I) -> Self {
        let mut toggles = Self::all();
        for token in tokens {
            let (on, name) = if let Some(name) = token.strip_prefix('+') {
                (true, name)
            } else if let Some(name) = token.strip_prefix('-') {
                (false, name)
            } else {
                continue;
            };
            if name == "all" {
                for value in toggles.enabled.values_mut() {
                    *value = on;
                }
            } else if let Some(value) = RULE_NAMES
                .iter()
                .find(|known| **known == name)
                .and_then(|known| toggles.enabled.get_mut(known))
            {
                *value = on;
            }
        }
        toggles
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.get(name).copied().unwrap_or(false)
    }
}

impl Default for RuleToggles {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_enables_everything() {
        let toggles = RuleToggles::all();
        for name in RULE_NAMES {
            assert!(toggles.is_enabled(name));
        }
    }

    #[test]
    fn test_minus_all_then_plus_one() {
        let toggles = RuleToggles::from_tokens(["-all", "+use-indexes"]);
        assert!(toggles.is_enabled("use-indexes"));
        assert!(!toggles.is_enabled("reduce-extraction-to-projection"));
    }

    #[test]
    fn test_minus_one() {
        let toggles = RuleToggles::from_tokens(["-parallelize-gather"]);
        assert!(!toggles.is_enabled("parallelize-gather"));
        assert!(toggles.is_enabled("use-indexes"));
    }

    #[test]
    fn test_unknown_rule_is_ignored() {
        let toggles = RuleToggles::from_tokens(["-no-such-rule"]);
        for name in RULE_NAMES {
            assert!(toggles.is_enabled(name));
        }
    }
}
