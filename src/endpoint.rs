use std::collections::HashMap;
use std::fmt;

use crate::{FbxError, Result};

pub type PathParams = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn as_method(&self) -> reqwest::Method {
        match self {
            Verb::Get => reqwest::Method::GET,
            Verb::Post => reqwest::Method::POST,
            Verb::Put => reqwest::Method::PUT,
            Verb::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_method().as_str())
    }
}

/// Static description of one API call.
///
/// `path` is relative to `/api/v{N}/` and may contain named placeholders
/// such as `fs/ls/{path}`; each one must be given a value before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub verb: Verb,
    pub path: &'static str,
    pub auth: bool,
    pub body_required: bool,
}

impl Endpoint {
    pub const fn new(verb: Verb, path: &'static str) -> Self {
        Self {
            verb,
            path,
            auth: true,
            body_required: false,
        }
    }

    pub const fn get(path: &'static str) -> Self {
        Self::new(Verb::Get, path)
    }

    pub const fn post(path: &'static str) -> Self {
        Self::new(Verb::Post, path)
    }

    pub const fn put(path: &'static str) -> Self {
        Self::new(Verb::Put, path)
    }

    pub const fn delete(path: &'static str) -> Self {
        Self::new(Verb::Delete, path)
    }

    /// Callable without a session.
    pub const fn public(self) -> Self {
        Self {
            auth: false,
            ..self
        }
    }

    pub const fn with_body(self) -> Self {
        Self {
            body_required: true,
            ..self
        }
    }

    /// Names of the placeholders in template order.
    pub fn placeholders(&self) -> Result<Vec<&'static str>> {
        let mut names = Vec::new();
        scan(self.path, |segment| {
            if let Segment::Placeholder(name) = segment {
                names.push(name);
            }
            Ok(())
        })?;
        Ok(names)
    }

    /// Substitute every placeholder with its value from `params`.
    ///
    /// Values are inserted verbatim; callers encode them (see
    /// [`crate::fs::encode_path`]). Parameters the template does not name
    /// are ignored.
    pub fn resolve(&self, params: &PathParams) -> Result<String> {
        let mut resolved = String::with_capacity(self.path.len());
        scan(self.path, |segment| {
            match segment {
                Segment::Literal(text) => resolved.push_str(text),
                Segment::Placeholder(name) => {
                    let value = params.get(name).ok_or_else(|| {
                        FbxError::Template(format!(
                            "no value for {{{}}} in {:?}",
                            name, self.path
                        ))
                    })?;
                    resolved.push_str(value);
                }
            }
            Ok(())
        })?;
        Ok(resolved)
    }
}

enum Segment {
    Literal(&'static str),
    Placeholder(&'static str),
}

fn scan(
    template: &'static str,
    mut visit: impl FnMut(Segment) -> Result<()>,
) -> Result<()> {
    let mut rest = template;
    while let Some(at) = rest.find(['{', '}']) {
        let (head, tail) = rest.split_at(at);
        if !head.is_empty() {
            visit(Segment::Literal(head))?;
        }
        if tail.starts_with('}') {
            return Err(FbxError::Template(format!(
                "unmatched '}}' in {:?}",
                template
            )));
        }
        let close = tail.find('}').ok_or_else(|| {
            FbxError::Template(format!("unclosed '{{' in {:?}", template))
        })?;
        let name = &tail[1..close];
        if name.is_empty()
            || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(FbxError::Template(format!(
                "invalid placeholder {:?} in {:?}",
                name, template
            )));
        }
        visit(Segment::Placeholder(name))?;
        rest = &tail[close + 1..];
    }
    if !rest.is_empty() {
        visit(Segment::Literal(rest))?;
    }
    Ok(())
}
