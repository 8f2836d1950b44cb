use regex::Regex;

use crate::error::{Error, Result};

/// a compiled sparse pattern
struct Rule {
    negated: bool,
    /// whole-path matcher
    regex: Regex,
    /// anchored at the repository root (pattern began with `/`)
    anchored: bool,
    /// literal leading components before the first wildcard
    literal_components: Vec<String>,
}

/// an ordered sparse pattern set
///
/// pattern language: leading `/` anchors to the root, trailing `/`
/// restricts to the subtree, `*` matches within one component, `**`
/// crosses components, `!` negates, `#` starts a comment. evaluation is
/// last-match-wins and no match means excluded.
pub struct SparseFilter {
    rules: Vec<Rule>,
}

impl SparseFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut rules = Vec::new();
        for pattern in patterns {
            let raw = pattern.as_ref().trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            rules.push(compile(raw)?);
        }
        Ok(Self { rules })
    }

    /// does the filter select this path; the last matching pattern decides
    pub fn matches(&self, path: &str) -> bool {
        let path = path.trim_matches('/');
        let mut included = false;
        for rule in &self.rules {
            if rule.regex.is_match(path) {
                included = !rule.negated;
            }
        }
        included
    }

    /// can anything under this directory match; used to prune tree walks
    ///
    /// conservative: negations are ignored, a false here guarantees no
    /// file below `dir` is selected.
    pub fn could_contain_matches(&self, dir: &str) -> bool {
        let dir = dir.trim_matches('/');
        if dir.is_empty() {
            return self.rules.iter().any(|r| !r.negated);
        }
        let dir_components: Vec<&str> = dir.split('/').collect();

        self.rules.iter().filter(|r| !r.negated).any(|rule| {
            // unanchored patterns may match at any depth
            if !rule.anchored {
                return true;
            }
            for (i, component) in dir_components.iter().enumerate() {
                match rule.literal_components.get(i) {
                    // pattern prefix exhausted: the rest is wildcards or
                    // the pattern selects this very subtree
                    None => return true,
                    Some(literal) if literal != component => return false,
                    Some(_) => {}
                }
            }
            true
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile(raw: &str) -> Result<Rule> {
    let (negated, body) = match raw.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let anchored = body.starts_with('/');
    let body = body.trim_start_matches('/');
    let (body, dir_only) = match body.strip_suffix('/') {
        Some(rest) => (rest, true),
        None => (body, false),
    };
    if body.is_empty() {
        return Err(Error::InvalidSparsePattern(raw.to_string()));
    }

    let mut regex = String::from("^");
    if !anchored {
        regex.push_str("(?:.*/)?");
    }

    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // `**` crosses path separators; swallow a following
                    // slash so `a/**/b` also matches `a/b`
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        regex.push_str("(?:[^/]*/)*");
                    } else {
                        regex.push_str(".*");
                    }
                } else {
                    regex.push_str("[^/]*");
                }
            }
            c if "\\.+()[]{}^$|?".contains(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex.push_str(if dir_only { "(?:/.*)$" } else { "(?:/.*)?$" });

    let literal_components = body
        .split('/')
        .map(str::to_string)
        .take_while(|c| !c.contains('*'))
        .collect();

    Ok(Rule {
        negated,
        regex: Regex::new(&regex).map_err(|e| Error::InvalidSparsePattern(e.to_string()))?,
        anchored,
        literal_components,
    })
}
