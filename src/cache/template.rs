//! Key templates.
//!
//! A template such as `list:{owner}:{query}` is parsed once into literal and
//! slot tokens; resolving it against a [`KeyContext`] is then a straight
//! substitution. `{{` and `}}` stand for literal braces.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::keys::{KeyContext, ResolvedKey};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("key template `{template}` has an unterminated placeholder starting at byte {position}")]
    Unterminated { template: String, position: usize },
    #[error("key template `{template}` has an unmatched closing brace at byte {position}")]
    UnmatchedClose { template: String, position: usize },
    #[error("key template `{template}` has an invalid placeholder name `{name}`")]
    InvalidSlot { template: String, name: String },
    #[error("key template `{template}` references `{name}`, which its handler does not supply")]
    UnresolvedPlaceholder { template: String, name: String },
    #[error("context is missing `{name}` required by key template `{template}`")]
    MissingField { template: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Slot(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    source: String,
    tokens: Vec<Token>,
}

impl KeyTemplate {
    pub fn parse(source: &str) -> Result<Self, KeyError> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((position, ch)) = chars.next() {
            match ch {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, inner) in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        name.push(inner);
                    }
                    if !closed {
                        return Err(KeyError::Unterminated {
                            template: source.to_string(),
                            position,
                        });
                    }
                    if !is_slot_name(&name) {
                        return Err(KeyError::InvalidSlot {
                            template: source.to_string(),
                            name,
                        });
                    }
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    tokens.push(Token::Slot(name));
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '}' => {
                    return Err(KeyError::UnmatchedClose {
                        template: source.to_string(),
                        position,
                    });
                }
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            tokens,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Slot names in template order; repeated slots appear once per use.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|token| match token {
            Token::Slot(name) => Some(name.as_str()),
            Token::Literal(_) => None,
        })
    }

    /// Fail unless every slot is reported as supplied.
    pub fn ensure_supplied(&self, supplied: impl Fn(&str) -> bool) -> Result<(), KeyError> {
        match self.placeholders().find(|name| !supplied(name)) {
            Some(name) => Err(KeyError::UnresolvedPlaceholder {
                template: self.source.clone(),
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn resolve(&self, context: &KeyContext) -> Result<ResolvedKey, KeyError> {
        let mut key = String::with_capacity(self.source.len() + 16);
        for token in &self.tokens {
            match token {
                Token::Literal(text) => key.push_str(text),
                Token::Slot(name) => {
                    let value = context.get(name).ok_or_else(|| KeyError::MissingField {
                        template: self.source.clone(),
                        name: name.clone(),
                    })?;
                    key.push_str(&value.render());
                }
            }
        }
        Ok(ResolvedKey::new(key))
    }
}

impl FromStr for KeyTemplate {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_slot_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        }
        _ => false,
    }
}
