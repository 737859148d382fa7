use crate::error::{Result, WeaveError};
use axum::http::StatusCode;
use indexmap::IndexMap;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Compiled route pattern.
///
/// Literal text is regex source, so `/assets/(.*)` matches anything below
/// `/assets/`. Parameters are written `<name:(regex)>` or `<name>`, the latter
/// matching one path segment. The whole path must match.
#[derive(Clone)]
pub struct RoutePattern {
    source: String,
    regex: Regex,
    names: Vec<String>,
}

impl RoutePattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let mut source = String::with_capacity(pattern.len() + 16);
        let mut names = Vec::new();
        source.push_str("^(?:");

        let mut rest = pattern;
        while let Some(start) = rest.find('<') {
            source.push_str(&rest[..start]);
            let tail = &rest[start..];
            match parse_param(tail) {
                Some(param) => {
                    source.push_str(&format!("(?P<{}>{})", param.name, param.regex));
                    names.push(param.name.to_string());
                    rest = &tail[param.consumed..];
                }
                None => {
                    source.push('<');
                    rest = &tail[1..];
                }
            }
        }
        source.push_str(rest);
        source.push_str(")$");

        let regex = Regex::new(&source).map_err(|err| {
            WeaveError::configuration(format!("Invalid route pattern {}: {}", pattern, err))
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
            names,
        })
    }

    /// Named parameters when `path` matches.
    pub fn matches(&self, path: &str) -> Option<RouteParams> {
        let captures = self.regex.captures(path)?;
        let params = self
            .names
            .iter()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|value| (name.clone(), value.as_str().to_string()))
            })
            .collect();
        Some(RouteParams(params))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn param_names(&self) -> &[String] {
        &self.names
    }
}

impl fmt::Debug for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RoutePattern").field(&self.source).finish()
    }
}

struct Param<'a> {
    name: &'a str,
    regex: &'a str,
    consumed: usize,
}

/// Parses `<name>` or `<name:(regex)>` at the start of `input`.
fn parse_param(input: &str) -> Option<Param<'_>> {
    let body = input.strip_prefix('<')?;
    let name_len = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(body.len());
    if name_len == 0 {
        return None;
    }
    let name = &body[..name_len];
    let after = &body[name_len..];

    if after.starts_with('>') {
        return Some(Param {
            name,
            regex: "[^/]+",
            consumed: 1 + name_len + 1,
        });
    }

    let group = after.strip_prefix(':')?;
    if !group.starts_with('(') {
        return None;
    }
    let mut depth = 0usize;
    let mut escaped = false;
    for (index, c) in group.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    if !group[index + 1..].starts_with('>') {
                        return None;
                    }
                    return Some(Param {
                        name,
                        regex: &group[1..index],
                        // '<' + name + ':' + group + '>'
                        consumed: 1 + name_len + 1 + index + 1 + 1,
                    });
                }
            }
            _ => {}
        }
    }
    None
}

/// Parameters captured from the request path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams(IndexMap<String, String>);

impl RouteParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Parse a parameter; a missing or malformed value is a 400.
    pub fn parse<T>(&self, name: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.get(name).ok_or_else(|| {
            WeaveError::http(StatusCode::BAD_REQUEST, format!("Missing route parameter {}", name))
        })?;
        raw.parse::<T>().map_err(|err| {
            WeaveError::http(
                StatusCode::BAD_REQUEST,
                format!("Invalid route parameter {}: {}", name, err),
            )
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
