//! Configuration File Parser
//!
//! Reads the block-structured run configuration into raw, unresolved
//! blocks. No interpolation or typing happens here.
//!
//! # Example
//!
//! ```text
//! docker {
//!     enabled = true
//! }
//!
//! params {
//!     input = "$baseDir/data/forests.csv"
//!     outdir = "$baseDir/results"
//! }
//!
//! executor.cpus = 4   // dotted form is equivalent to a block
//! ```

use std::fmt;
use std::fs;
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;

use log::debug;
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// A literal configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Writes the value back in configuration syntax.
    pub fn to_literal(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Str(s) => {
                let escaped = s
                    .replace('\\', "\\\\")
                    .replace('"', "\\\"")
                    .replace('\n', "\\n")
                    .replace('\t', "\\t");
                format!("\"{}\"", escaped)
            }
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Str(s) => write!(f, "{}", s),
        }
    }
}

/// One `key = value` line inside a block.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub key: String,
    pub value: ConfigValue,
    pub line: usize,
}

/// A named section as written in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    pub name: String,
    pub entries: Vec<RawEntry>,
}

/// Unresolved configuration: blocks in file order, possibly repeated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawConfig {
    pub blocks: Vec<RawBlock>,
}

impl RawConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry to the named block, creating it if needed.
    pub fn set(&mut self, section: &str, key: &str, value: ConfigValue) {
        let line = 0;
        let entry = RawEntry {
            key: key.to_string(),
            value,
            line,
        };
        match self.blocks.iter_mut().find(|b| b.name == section) {
            Some(block) => block.entries.push(entry),
            None => self.blocks.push(RawBlock {
                name: section.to_string(),
                entries: vec![entry],
            }),
        }
    }

    /// Merges repeated blocks and repeated keys.
    ///
    /// Sections and keys keep the position of their first appearance;
    /// the value is the last one written.
    pub fn merged(&self) -> Vec<(String, Vec<(String, ConfigValue)>)> {
        let mut sections: Vec<(String, Vec<(String, ConfigValue)>)> = Vec::new();

        for block in &self.blocks {
            let index = match sections.iter().position(|(name, _)| *name == block.name) {
                Some(index) => index,
                None => {
                    sections.push((block.name.clone(), Vec::new()));
                    sections.len() - 1
                }
            };
            let entries = &mut sections[index].1;

            for entry in &block.entries {
                match entries.iter_mut().find(|(key, _)| *key == entry.key) {
                    Some(existing) => existing.1 = entry.value.clone(),
                    None => entries.push((entry.key.clone(), entry.value.clone())),
                }
            }
        }

        sections
    }

    /// Renders the merged configuration back into block syntax.
    pub fn to_config_string(&self) -> String {
        let mut out = String::new();
        for (index, (section, entries)) in self.merged().iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            out.push_str(&format!("{} {{\n", section));
            for (key, value) in entries {
                out.push_str(&format!("    {} = {}\n", key, value.to_literal()));
            }
            out.push_str("}\n");
        }
        out
    }
}

/// Reads and parses a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<RawConfig, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    debug!("Config file loaded ({} bytes)", text.len());
    parse_config(&text)
}

/// Parses configuration text into raw blocks.
pub fn parse_config(text: &str) -> Result<RawConfig, ConfigError> {
    let tokens = Lexer::new(text).tokenize()?;
    let mut parser = Parser {
        tokens,
        position: 0,
        config: RawConfig::new(),
    };
    parser.parse_items(&[], false)?;
    Ok(parser.config)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Dot,
    Equals,
    LeftBrace,
    RightBrace,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
        }
    }

    fn error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<(Token, usize)>, ConfigError> {
        let mut tokens = Vec::new();

        while let Some(&ch) = self.chars.peek() {
            match ch {
                '\n' => {
                    self.line += 1;
                    self.chars.next();
                }
                c if c.is_whitespace() || c == ';' => {
                    self.chars.next();
                }
                '/' => self.skip_comment()?,
                '{' => {
                    self.chars.next();
                    tokens.push((Token::LeftBrace, self.line));
                }
                '}' => {
                    self.chars.next();
                    tokens.push((Token::RightBrace, self.line));
                }
                '=' => {
                    self.chars.next();
                    tokens.push((Token::Equals, self.line));
                }
                '.' => {
                    self.chars.next();
                    tokens.push((Token::Dot, self.line));
                }
                '\'' | '"' => {
                    let line = self.line;
                    let text = self.read_quoted(ch)?;
                    tokens.push((Token::Quoted(text), line));
                }
                c if is_word_char(c) => {
                    let word = self.read_word();
                    tokens.push((Token::Word(word), self.line));
                }
                other => return Err(self.error(format!("unexpected character '{}'", other))),
            }
        }

        Ok(tokens)
    }

    fn skip_comment(&mut self) -> Result<(), ConfigError> {
        self.chars.next();
        match self.chars.next() {
            Some('/') => {
                while let Some(&c) = self.chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.chars.next();
                }
                Ok(())
            }
            Some('*') => {
                let mut previous = '\0';
                for c in self.chars.by_ref() {
                    if c == '\n' {
                        self.line += 1;
                    }
                    if previous == '*' && c == '/' {
                        return Ok(());
                    }
                    previous = c;
                }
                Err(self.error("unterminated block comment"))
            }
            _ => Err(self.error("unexpected '/'")),
        }
    }

    fn read_quoted(&mut self, quote: char) -> Result<String, ConfigError> {
        self.chars.next();
        let mut text = String::new();

        while let Some(c) = self.chars.next() {
            match c {
                c if c == quote => return Ok(text),
                '\\' => match self.chars.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some(other) => text.push(other),
                    None => break,
                },
                '\n' => return Err(self.error("newline inside quoted string")),
                c => text.push(c),
            }
        }

        Err(self.error("unterminated string"))
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if !is_word_char(c) {
                break;
            }
            word.push(c);
            self.chars.next();
        }
        word
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | ':')
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    position: usize,
    config: RawConfig,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(token, _)| token)
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn current_line(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|(_, line)| *line)
            .unwrap_or(1)
    }

    fn error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::Syntax {
            line: self.current_line(),
            message: message.into(),
        }
    }

    /// Parses assignments and nested blocks until a closing brace
    /// (when `nested`) or end of input.
    fn parse_items(&mut self, prefix: &[String], nested: bool) -> Result<(), ConfigError> {
        loop {
            match self.peek() {
                None if nested => return Err(self.error("missing closing '}'")),
                None => return Ok(()),
                Some(Token::RightBrace) if nested => {
                    self.next();
                    return Ok(());
                }
                Some(Token::RightBrace) => return Err(self.error("unexpected '}'")),
                _ => {}
            }

            let mut path = prefix.to_vec();
            path.extend(self.parse_path()?);

            match self.next() {
                Some((Token::LeftBrace, _)) => self.parse_items(&path, true)?,
                Some((Token::Equals, line)) => {
                    let value = self.parse_value()?;
                    self.assign(&path, value, line)?;
                }
                _ => {
                    self.position -= 1;
                    return Err(self.error(format!(
                        "expected '=' or '{{' after '{}'",
                        path.join(".")
                    )));
                }
            }
        }
    }

    fn parse_path(&mut self) -> Result<Vec<String>, ConfigError> {
        let mut path = Vec::new();
        loop {
            match self.next() {
                Some((Token::Word(word), _)) => path.push(word),
                _ => {
                    self.position -= 1;
                    return Err(self.error("expected an option or section name"));
                }
            }
            if self.peek() == Some(&Token::Dot) {
                self.next();
            } else {
                return Ok(path);
            }
        }
    }

    fn parse_value(&mut self) -> Result<ConfigValue, ConfigError> {
        match self.next() {
            Some((Token::Quoted(text), _)) => Ok(ConfigValue::Str(text)),
            Some((Token::Word(word), _)) => Ok(match word.as_str() {
                "true" => ConfigValue::Bool(true),
                "false" => ConfigValue::Bool(false),
                _ => word
                    .parse::<i64>()
                    .map(ConfigValue::Int)
                    .unwrap_or(ConfigValue::Str(word)),
            }),
            _ => {
                self.position -= 1;
                Err(self.error("expected a value after '='"))
            }
        }
    }

    fn assign(&mut self, path: &[String], value: ConfigValue, line: usize) -> Result<(), ConfigError> {
        let Some((section, rest)) = path.split_first() else {
            return Err(self.error("empty option name"));
        };
        if rest.is_empty() {
            return Err(ConfigError::Syntax {
                line,
                message: format!("option '{}' must belong to a section", section),
            });
        }

        let entry = RawEntry {
            key: rest.join("."),
            value,
            line,
        };
        match self.config.blocks.last_mut() {
            Some(block) if block.name == *section => block.entries.push(entry),
            _ => self.config.blocks.push(RawBlock {
                name: section.clone(),
                entries: vec![entry],
            }),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOREST_CONFIG: &str = r#"
docker {
    enabled = true
}

process {
    container = 'forest-fire-analysis'
}

params {
    input = "$baseDir/data/forests.csv"
    outdir = "$baseDir/results"
}

executor {
    name = 'local'
    cpus = 4
    memory = '8 GB'
}

timeline {
    enabled = true
    file = "${params.outdir}/timeline.html"
}
"#;

    fn lookup<'a>(
        merged: &'a [(String, Vec<(String, ConfigValue)>)],
        section: &str,
        key: &str,
    ) -> Option<&'a ConfigValue> {
        merged
            .iter()
            .find(|(name, _)| name == section)
            .and_then(|(_, entries)| entries.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v)
    }

    #[test]
    fn test_parse_blocks() {
        let config = parse_config(FOREST_CONFIG).unwrap();
        let merged = config.merged();

        assert_eq!(lookup(&merged, "docker", "enabled"), Some(&ConfigValue::Bool(true)));
        assert_eq!(lookup(&merged, "executor", "cpus"), Some(&ConfigValue::Int(4)));
        assert_eq!(
            lookup(&merged, "executor", "memory"),
            Some(&ConfigValue::Str("8 GB".to_string()))
        );
        assert_eq!(
            lookup(&merged, "timeline", "file"),
            Some(&ConfigValue::Str("${params.outdir}/timeline.html".to_string()))
        );
    }

    #[test]
    fn test_parse_dotted_assignment() {
        let config = parse_config("executor.cpus = 2\ndocker.enabled = false").unwrap();
        let merged = config.merged();
        assert_eq!(lookup(&merged, "executor", "cpus"), Some(&ConfigValue::Int(2)));
        assert_eq!(lookup(&merged, "docker", "enabled"), Some(&ConfigValue::Bool(false)));
    }

    #[test]
    fn test_nested_blocks_produce_dotted_keys() {
        let config = parse_config("process { withName:align { cpus = 8 } }").unwrap();
        let merged = config.merged();
        assert_eq!(
            lookup(&merged, "process", "withName:align.cpus"),
            Some(&ConfigValue::Int(8))
        );
    }

    #[test]
    fn test_last_write_wins() {
        let text = "params { outdir = 'a' }\nparams { outdir = 'b'\n outdir = 'c' }";
        let merged = parse_config(text).unwrap().merged();

        assert_eq!(merged.len(), 1);
        assert_eq!(
            lookup(&merged, "params", "outdir"),
            Some(&ConfigValue::Str("c".to_string()))
        );
    }

    #[test]
    fn test_comments_are_ignored() {
        let text = "// header\nexecutor { /* inline\n block */ cpus = 3 // trailing\n}";
        let merged = parse_config(text).unwrap().merged();
        assert_eq!(lookup(&merged, "executor", "cpus"), Some(&ConfigValue::Int(3)));
    }

    #[test]
    fn test_unterminated_block() {
        let err = parse_config("docker {\n enabled = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { .. }));
    }

    #[test]
    fn test_missing_value_reports_line() {
        let err = parse_config("docker {\n\n enabled =\n}").unwrap_err();
        match err {
            ConfigError::Syntax { line, .. } => assert_eq!(line, 4),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_top_level_option_rejected() {
        assert!(parse_config("workDir = 'work'").is_err());
    }

    #[test]
    fn test_quoted_escapes() {
        let merged = parse_config(r#"params { title = "say \"hi\"" }"#).unwrap().merged();
        assert_eq!(
            lookup(&merged, "params", "title"),
            Some(&ConfigValue::Str("say \"hi\"".to_string()))
        );
    }

    #[test]
    fn test_config_string_reparses() {
        let config = parse_config(FOREST_CONFIG).unwrap();
        let rendered = config.to_config_string();
        let reparsed = parse_config(&rendered).unwrap();
        assert_eq!(config.merged(), reparsed.merged());
    }

    #[test]
    fn test_set_appends_block() {
        let mut config = RawConfig::new();
        config.set("params", "outdir", ConfigValue::Str("/x".to_string()));
        config.set("params", "input", ConfigValue::Str("/y".to_string()));
        assert_eq!(config.blocks.len(), 1);
        assert_eq!(config.blocks[0].entries.len(), 2);
    }
}
