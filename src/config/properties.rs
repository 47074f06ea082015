use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::patch::DeploymentKind;
use crate::scanner::ScanRoots;

use super::ConfigError;

/// Resource paths probed for per-deployment configuration, first found wins.
pub const PROPERTIES_LOCATIONS: [&str; 2] = [
    "META-INF/class-change.properties",
    "WEB-INF/class-change.properties",
];

pub const CLASSES_DIR_KEY: &str = "classes.dir";
pub const SOURCES_DIR_KEY: &str = "srcs.dir";
pub const WEB_RESOURCES_DIR_KEY: &str = "web.resources.dir";
pub const REMOTE_PASSWORD_KEY: &str = "remote.password";

/// Parsed `key=value` properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    /// Parse properties text.
    ///
    /// Keys end at the first unescaped `=`, `:` or whitespace. Lines starting
    /// with `#` or `!` are comments and a trailing backslash continues the
    /// logical line.
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in logical_lines(text) {
            let (key, value) = split_entry(&line);
            if !key.is_empty() {
                entries.insert(key, value);
            }
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Value for `key`, treating blank values as absent.
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|value| !value.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current: Option<String> = None;
    for raw in text.lines() {
        let trimmed = raw.trim_start();
        let continuing = current.is_some();
        if !continuing && (trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!')) {
            continue;
        }
        let (body, continues) = strip_continuation(trimmed);
        let line = current.get_or_insert_with(String::new);
        line.push_str(body);
        if !continues {
            lines.extend(current.take());
        }
    }
    lines.extend(current);
    lines
}

/// Split off a trailing line-continuation backslash (an odd run of them).
fn strip_continuation(line: &str) -> (&str, bool) {
    let trailing = line.bytes().rev().take_while(|byte| *byte == b'\\').count();
    if trailing % 2 == 1 {
        (&line[..line.len() - 1], true)
    } else {
        (line, false)
    }
}

fn split_entry(line: &str) -> (String, String) {
    let mut key = String::new();
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    key.push(unescape(escaped));
                }
            }
            '=' | ':' => break,
            ch if ch.is_whitespace() => {
                while chars.peek().is_some_and(|next| next.is_whitespace()) {
                    chars.next();
                }
                if chars.peek().is_some_and(|next| *next == '=' || *next == ':') {
                    chars.next();
                }
                break;
            }
            ch => key.push(ch),
        }
    }
    while chars.peek().is_some_and(|next| next.is_whitespace()) {
        chars.next();
    }
    let mut value = String::new();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(escaped) = chars.next() {
                value.push(unescape(escaped));
            }
        } else {
            value.push(ch);
        }
    }
    (key, value.trim_end().to_string())
}

fn unescape(ch: char) -> char {
    match ch {
        't' => '\t',
        'n' => '\n',
        'r' => '\r',
        'f' => '\u{000C}',
        other => other,
    }
}

/// External locations configured for one deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassChangeConfig {
    pub classes_dir: Option<PathBuf>,
    pub sources_dir: Option<PathBuf>,
    pub web_resources_dir: Option<PathBuf>,
    pub remote_password: Option<String>,
}

impl ClassChangeConfig {
    pub fn from_properties(properties: &Properties) -> Self {
        let dir = |key| properties.non_empty(key).map(resolve_dir);
        Self {
            classes_dir: dir(CLASSES_DIR_KEY),
            sources_dir: dir(SOURCES_DIR_KEY),
            web_resources_dir: dir(WEB_RESOURCES_DIR_KEY),
            remote_password: properties.non_empty(REMOTE_PASSWORD_KEY).map(str::to_string),
        }
    }

    /// Remote push mode replaces local scanning.
    pub fn is_remote(&self) -> bool {
        self.remote_password.is_some()
    }

    /// Local roots to scan; empty in remote mode.
    pub fn scan_roots(&self) -> ScanRoots {
        if self.is_remote() {
            return ScanRoots::default();
        }
        ScanRoots {
            sources: self.sources_dir.clone(),
            classes: self.classes_dir.clone(),
            web_resources: self.web_resources_dir.clone(),
        }
    }
}

fn resolve_dir(value: &str) -> PathBuf {
    let path = Path::new(value);
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Read the deployment's properties resource, if it has one.
pub fn load_for_deployment(kind: &DeploymentKind) -> Result<ClassChangeConfig, ConfigError> {
    for location in PROPERTIES_LOCATIONS {
        let Some(bytes) = kind.read_resource(location)? else {
            continue;
        };
        let text = String::from_utf8(bytes).map_err(|_| ConfigError::InvalidProperties {
            location: location.to_string(),
            message: "not valid UTF-8".to_string(),
        })?;
        let properties = Properties::parse(&text);
        debug!(
            deployment = %kind.root().display(),
            location,
            keys = properties.len(),
            "Loaded class change properties"
        );
        return Ok(ClassChangeConfig::from_properties(&properties));
    }
    Ok(ClassChangeConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_separators_comments_and_continuations() {
        let properties = Properties::parse(
            "# comment\n\
             ! also a comment\n\
             classes.dir=/tmp/classes\n\
             srcs.dir : /tmp/src\n\
             web.resources.dir /tmp/web\n\
             long.value = first \\\n    second\n\
             spaced\\ key = x\n",
        );
        assert_eq!(properties.get("classes.dir"), Some("/tmp/classes"));
        assert_eq!(properties.get("srcs.dir"), Some("/tmp/src"));
        assert_eq!(properties.get("web.resources.dir"), Some("/tmp/web"));
        assert_eq!(properties.get("long.value"), Some("first second"));
        assert_eq!(properties.get("spaced key"), Some("x"));
        assert_eq!(properties.len(), 5);
    }

    #[test]
    fn blank_values_are_absent() {
        let properties = Properties::parse("classes.dir=\nsrcs.dir=  \n");
        let config = ClassChangeConfig::from_properties(&properties);
        assert_eq!(config, ClassChangeConfig::default());
    }

    #[test]
    fn remote_password_disables_local_roots() {
        let properties = Properties::parse("classes.dir=/c\nremote.password=secret\n");
        let config = ClassChangeConfig::from_properties(&properties);
        assert!(config.is_remote());
        assert!(config.scan_roots().is_empty());
        assert_eq!(config.remote_password.as_deref(), Some("secret"));
    }

    #[test]
    fn meta_inf_wins_over_web_inf() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("app.war");
        std::fs::create_dir_all(root.join("META-INF")).unwrap();
        std::fs::create_dir_all(root.join("WEB-INF")).unwrap();
        std::fs::write(root.join("META-INF/class-change.properties"), "srcs.dir=/meta\n").unwrap();
        std::fs::write(root.join("WEB-INF/class-change.properties"), "srcs.dir=/web\n").unwrap();
        let kind = DeploymentKind::detect("app.war", &root, dir.path()).unwrap();

        let config = load_for_deployment(&kind).unwrap();

        assert_eq!(config.sources_dir, Some(PathBuf::from("/meta")));
    }

    #[test]
    fn missing_properties_yield_defaults() {
        let dir = tempdir().unwrap();
        let kind = DeploymentKind::detect("lib.jar", dir.path(), dir.path()).unwrap();
        assert_eq!(load_for_deployment(&kind).unwrap(), ClassChangeConfig::default());
    }
}
