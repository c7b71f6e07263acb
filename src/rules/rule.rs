// ABOUTME: Hardware rule file: match predicates, actions and field overrides
// ABOUTME: Structural checks that hold whether or not schema validation ran

use crate::dtb::DeviceTreeNode;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;

/// Root of a hardware rule document
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    /// Rules in authored order
    pub rules: Vec<Rule>,
}

/// One authored rule
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    /// Label used in diagnostics
    #[serde(default)]
    pub name: Option<String>,
    /// Which nodes the rule applies to
    #[serde(rename = "match", deserialize_with = "serde_yaml::with::singleton_map::deserialize")]
    pub matcher: Matcher,
    /// Classification the rule assigns
    pub action: Action,
    /// Fields the rule contributes
    #[serde(default)]
    pub overrides: Overrides,
}

/// Match predicate, one variant per kind
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Matcher {
    /// Any listed string equals one of the node's compatible strings
    Compatible(Vec<String>),
    /// Any of the node's compatible strings starts with the prefix
    CompatiblePrefix(String),
    /// Node path glob: `*` within a segment, `**` for any number of segments
    Path(String),
    /// Every node
    Any,
}

/// How strongly a matcher pins down a node; decides override layering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Specificity {
    /// `any`
    Wildcard = 1,
    /// `compatible-prefix`
    CompatiblePrefix = 2,
    /// `path`
    Path = 3,
    /// `compatible`
    Compatible = 4,
}

impl Matcher {
    /// Whether the predicate holds for `node`
    pub fn matches(&self, node: &DeviceTreeNode) -> bool {
        match self {
            Matcher::Compatible(list) => list.iter().any(|c| node.is_compatible(c)),
            Matcher::CompatiblePrefix(prefix) => {
                node.compatible.iter().any(|c| c.starts_with(prefix.as_str()))
            }
            Matcher::Path(pattern) => path_matches(pattern, &node.path),
            Matcher::Any => true,
        }
    }

    /// Rank used when two rules set the same field
    pub fn specificity(&self) -> Specificity {
        match self {
            Matcher::Compatible(_) => Specificity::Compatible,
            Matcher::CompatiblePrefix(_) => Specificity::CompatiblePrefix,
            Matcher::Path(_) => Specificity::Path,
            Matcher::Any => Specificity::Wildcard,
        }
    }
}

/// Classification assigned by the first matching rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Device the kernel drives itself
    Kernel,
    /// Memory kept away from untyped allocation
    Reserved,
    /// Not described to the kernel
    Ignore,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Kernel => "kernel",
            Action::Reserved => "reserved",
            Action::Ignore => "ignore",
        })
    }
}

/// Optional fields a rule layers onto the nodes it matches
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Overrides {
    /// Symbolic name replacing the derived one
    #[serde(default)]
    pub name: Option<String>,
    /// Narrowed register ranges, by `reg` index
    #[serde(default)]
    pub regions: Option<Vec<RegionOverride>>,
    /// Interrupt numbers replacing the decoded ones
    #[serde(default)]
    pub interrupts: Option<Vec<u32>>,
    /// Kernel device without MMIO
    #[serde(default)]
    pub address_less: Option<bool>,
    /// Let the ranges of an unclassified node become untyped
    #[serde(default)]
    pub release: Option<bool>,
}

/// Window into one translated `reg` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionOverride {
    /// Index into the node's `reg`
    pub index: usize,
    /// Bytes skipped from the start of the entry
    #[serde(default)]
    pub offset: u64,
    /// Length kept, the rest of the entry when absent
    #[serde(default)]
    pub size: Option<u64>,
}

/// A rule with its resolved label, ready for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledRule {
    /// `name`, or `rule #<n>` counting from one
    pub label: String,
    /// The authored rule
    pub rule: Rule,
}

/// Validated rules in authored order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<LabeledRule>,
}

impl RuleSet {
    /// Check the structure of every rule and assign labels.
    ///
    /// These checks hold whether or not schema validation ran.
    pub fn new(file: RuleFile) -> Result<Self> {
        let mut labels = BTreeSet::new();
        let mut rules = Vec::with_capacity(file.rules.len());

        for (index, rule) in file.rules.into_iter().enumerate() {
            let label = rule
                .name
                .clone()
                .unwrap_or_else(|| format!("rule #{}", index + 1));
            let invalid = |reason: String| Error::InvalidRule {
                rule: label.clone(),
                reason,
            };

            if !labels.insert(label.clone()) {
                return Err(invalid("rule name is used more than once".to_owned()));
            }
            check_matcher(&rule.matcher).map_err(invalid)?;
            check_overrides(&rule.overrides).map_err(invalid)?;

            rules.push(LabeledRule { label, rule });
        }

        Ok(Self { rules })
    }

    /// Rules in authored order
    pub fn iter(&self) -> impl Iterator<Item = &LabeledRule> {
        self.rules.iter()
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// No rules at all
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn check_matcher(matcher: &Matcher) -> core::result::Result<(), String> {
    match matcher {
        Matcher::Compatible(list) if list.is_empty() => {
            Err("`compatible` needs at least one string".to_owned())
        }
        Matcher::Compatible(list) if list.iter().any(|c| c.is_empty()) => {
            Err("`compatible` contains an empty string".to_owned())
        }
        Matcher::CompatiblePrefix(prefix) if prefix.is_empty() => {
            Err("`compatible-prefix` is empty".to_owned())
        }
        Matcher::Path(pattern) if !pattern.starts_with('/') => {
            Err(format!("path pattern `{pattern}` is not absolute"))
        }
        _ => Ok(()),
    }
}

fn check_overrides(overrides: &Overrides) -> core::result::Result<(), String> {
    if let Some(name) = &overrides.name {
        if !is_c_identifier(name) {
            return Err(format!("name `{name}` is not a C identifier"));
        }
    }
    if let Some(regions) = &overrides.regions {
        if regions.is_empty() {
            return Err("`regions` lists no region".to_owned());
        }
        let mut seen = BTreeSet::new();
        for region in regions {
            if !seen.insert(region.index) {
                return Err(format!("region index {} is listed twice", region.index));
            }
            if region.size == Some(0) {
                return Err(format!("region index {} has size 0", region.index));
            }
        }
        if overrides.address_less == Some(true) {
            return Err("`address-less` device cannot override `regions`".to_owned());
        }
    }
    Ok(())
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_c_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Match a node path against a glob.
///
/// A pattern segment without `@` also matches a node segment by its base
/// name, so `/soc/serial` matches `/soc/serial@2000`.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match_segments(&pattern, &path)
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => (0..=path.len()).any(|skip| match_segments(rest, &path[skip..])),
        Some((segment, rest)) => match path.split_first() {
            Some((name, tail)) => segment_matches(segment, name) && match_segments(rest, tail),
            None => false,
        },
    }
}

fn segment_matches(pattern: &str, name: &str) -> bool {
    if glob(pattern, name) {
        return true;
    }
    !pattern.contains('@') && name.split_once('@').is_some_and(|(base, _)| glob(pattern, base))
}

/// Single-segment glob where `*` matches any run of characters
fn glob(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn load(yaml: &str) -> Result<RuleSet> {
        let file: RuleFile = serde_yaml::from_str(yaml)?;
        RuleSet::new(file)
    }

    #[test_case("/soc/serial@2000", "/soc/serial@2000" => true; "exact")]
    #[test_case("/soc/serial", "/soc/serial@2000" => true; "base name")]
    #[test_case("/soc/serial@*", "/soc/serial@2000" => true; "unit wildcard")]
    #[test_case("/soc/*", "/soc/bus@0/timer@10" => false; "star stays in segment")]
    #[test_case("/soc/**", "/soc/bus@0/timer@10" => true; "double star")]
    #[test_case("/soc/**", "/soc" => true; "double star matches nothing")]
    #[test_case("/**/timer@*", "/soc/bus@0/timer@10" => true; "leading double star")]
    #[test_case("/soc/ser*l", "/soc/serial@2000" => true; "inner star on base name")]
    #[test_case("/soc", "/" => false; "root")]
    #[test_case("/", "/" => true; "root pattern")]
    fn test_path_matches(pattern: &str, path: &str) -> bool {
        path_matches(pattern, path)
    }

    #[test]
    fn test_parse_rule_file() {
        let rules = load(
            r#"
rules:
  - name: console
    match:
      compatible:
        - arm,pl011
    action: kernel
    overrides:
      name: SERIAL
      regions:
        - index: 0
          size: 0x1000
  - match:
      path: /soc/**
    action: ignore
    overrides:
      release: true
  - match: any
    action: reserved
"#,
        )
        .unwrap();

        let labels: Vec<_> = rules.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["console", "rule #2", "rule #3"]);

        let console = &rules.iter().next().unwrap().rule;
        assert_eq!(console.matcher, Matcher::Compatible(vec!["arm,pl011".to_owned()]));
        assert_eq!(
            console.overrides.regions,
            Some(vec![RegionOverride {
                index: 0,
                offset: 0,
                size: Some(0x1000)
            }])
        );
        assert_eq!(rules.iter().nth(2).unwrap().rule.matcher, Matcher::Any);
    }

    #[test_case("match: { compatible: [] }\n    action: kernel" ; "empty compatible list")]
    #[test_case("match: { path: soc/uart }\n    action: kernel" ; "relative path")]
    #[test_case("match: any\n    action: kernel\n    overrides: { name: 9lives }" ; "bad name")]
    #[test_case("match: any\n    action: kernel\n    overrides: { address-less: true, regions: [ { index: 0 } ] }" ; "address-less with regions")]
    #[test_case("match: any\n    action: kernel\n    overrides: { regions: [ { index: 0 }, { index: 0 } ] }" ; "duplicate region index")]
    fn test_structural_checks(rule: &str) {
        let yaml = format!("rules:\n  - {rule}\n");
        assert!(matches!(load(&yaml), Err(Error::InvalidRule { .. })));
    }

    #[test]
    fn test_duplicate_rule_names() {
        let yaml = "rules:\n  - name: a\n    match: any\n    action: ignore\n  - name: a\n    match: any\n    action: ignore\n";
        assert!(matches!(load(yaml), Err(Error::InvalidRule { ref rule, .. }) if rule == "a"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = "rules:\n  - match: any\n    action: kernel\n    colour: blue\n";
        assert!(matches!(load(yaml), Err(Error::Yaml(_))));
    }

    #[test]
    fn test_specificity_order() {
        assert!(Specificity::Compatible > Specificity::Path);
        assert!(Specificity::Path > Specificity::CompatiblePrefix);
        assert!(Specificity::CompatiblePrefix > Specificity::Wildcard);
    }

    #[test]
    fn test_c_identifier() {
        assert!(is_c_identifier("SERIAL_0"));
        assert!(is_c_identifier("_x"));
        assert!(!is_c_identifier(""));
        assert!(!is_c_identifier("0x"));
        assert!(!is_c_identifier("A-B"));
    }
}
