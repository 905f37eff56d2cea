//! Glob pattern matching for excluded paths.
//!
//! Patterns use shell-style globs over forward-slash relative paths:
//! - `**` matches any files and zero or more directories
//! - `*` matches everything except a directory separator
//! - `?` matches any single character except a directory separator
//! - `[seq]` / `[!seq]` match any character in / not in seq

use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;

lazy_static::lazy_static! {
    /// Cache for compiled regex patterns
    static ref PATTERN_CACHE: Mutex<HashMap<String, Regex>> = Mutex::new(HashMap::new());
}

/// Translates a shell-style glob pattern to an anchored regex pattern.
pub fn translate_pattern(pattern: &str) -> String {
    let mut regex_pattern = String::new();
    let mut i = 0;
    let chars: Vec<char> = pattern.chars().collect();
    let n = chars.len();

    while i < n {
        let c = chars[i];
        match c {
            '*' => {
                if i + 1 < n && chars[i + 1] == '*' {
                    if i + 2 < n && chars[i + 2] == '/' {
                        // **/
                        regex_pattern.push_str("(?:[^/]+/)*");
                        i += 3;
                    } else {
                        regex_pattern.push_str(".*");
                        i += 2;
                    }
                } else {
                    regex_pattern.push_str("[^/]*");
                    i += 1;
                }
            }
            '?' => {
                regex_pattern.push_str("[^/]");
                i += 1;
            }
            '[' => {
                let mut j = i + 1;
                if j < n && (chars[j] == '!' || chars[j] == '^') {
                    j += 1;
                }
                if j < n && chars[j] == ']' {
                    j += 1;
                }
                while j < n && chars[j] != ']' {
                    j += 1;
                }
                if j >= n {
                    // No closing ], treat [ as literal
                    regex_pattern.push_str("\\[");
                    i += 1;
                } else {
                    let mut class_content = String::new();
                    let mut k = i + 1;

                    if k < n && (chars[k] == '!' || chars[k] == '^') {
                        class_content.push('^');
                        k += 1;
                    }

                    while k < j {
                        let ch = chars[k];
                        if ch == '\\' && k + 1 < j {
                            class_content.push('\\');
                            class_content.push(chars[k + 1]);
                            k += 2;
                        } else {
                            class_content.push(ch);
                            k += 1;
                        }
                    }

                    regex_pattern.push('[');
                    regex_pattern.push_str(&class_content);
                    regex_pattern.push(']');
                    i = j + 1;
                }
            }
            '\\' | '.' | '^' | '$' | '+' | '{' | '}' | '|' | '(' | ')' => {
                regex_pattern.push('\\');
                regex_pattern.push(c);
                i += 1;
            }
            _ => {
                regex_pattern.push(c);
                i += 1;
            }
        }
    }

    format!("^{}$", regex_pattern)
}

/// Compiles a pattern into a regex, using the cache.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let mut cache = PATTERN_CACHE.lock();

    if let Some(regex) = cache.get(pattern) {
        return Ok(regex.clone());
    }

    let regex = Regex::new(&translate_pattern(pattern))?;
    cache.insert(pattern.to_string(), regex.clone());

    Ok(regex)
}

/// Tests if a name matches a glob pattern.
pub fn pattern_match(name: &str, pattern: &str) -> Result<bool, regex::Error> {
    Ok(compile_pattern(pattern)?.is_match(name))
}

/// A compiled set of exclusion patterns.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    patterns: Vec<Regex>,
}

impl PathMatcher {
    pub fn new(patterns: &[String]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| compile_pattern(p.trim_end_matches('/')))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// True if `path` or any of its ancestor directories matches a pattern,
    /// so excluding a directory excludes everything beneath it.
    pub fn matches(&self, path: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let mut candidate = path;
        loop {
            if self.patterns.iter().any(|re| re.is_match(candidate)) {
                return true;
            }
            match candidate.rfind('/') {
                Some(pos) => candidate = &candidate[..pos],
                None => return false,
            }
        }
    }
}
