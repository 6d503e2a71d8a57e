// SPDX-License-Identifier: Apache-2.0

//! Named parameter binding
//!
//! Rewrites `:name` placeholders into the positional syntax of the target
//! backend and returns the values in binding order. Text inside quotes and
//! comments is copied untouched, as are `::` casts and `:=` assignments.
//! MySQL string literals honour backslash escapes and Postgres dollar-quoted
//! bodies (`$$...$$`, `$tag$...$tag$`) are treated as quoted text.

use std::collections::HashMap;

use crate::driver::Driver;
use crate::error::{EngineError, EngineResult};
use crate::types::{QueryParams, Value};

/// A statement ready to be sent to a backend, with its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl BoundStatement {
    /// A statement without parameters, sent verbatim.
    pub fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Plain when `params` is empty, otherwise compiled for `driver`.
    pub fn prepare(driver: Driver, sql: &str, params: &QueryParams) -> EngineResult<Self> {
        if params.is_empty() {
            Ok(Self::plain(sql))
        } else {
            compile(driver, sql, params)
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum ScanState {
    Normal,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment,
    DollarQuote,
}

/// Compiles `sql` for `driver`, binding every `:name` from `params`.
///
/// Backends with numbered placeholders reuse the same number when a name
/// repeats; `?` backends get one argument per occurrence. Parameters that the
/// statement never mentions are ignored.
pub fn compile(driver: Driver, sql: &str, params: &QueryParams) -> EngineResult<BoundStatement> {
    let numbered = !matches!(driver, Driver::MySql | Driver::Sqlite);
    let backslash_escapes = driver == Driver::MySql;
    let dollar_quotes = driver == Driver::Postgres;
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut bound: Vec<Value> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut state = ScanState::Normal;
    let mut dollar_tag: &[char] = &[];
    let mut i = 0;

    let peek = |i: usize| chars.get(i).copied();

    while i < chars.len() {
        let ch = chars[i];
        match state {
            ScanState::Normal => match ch {
                '\'' => {
                    out.push(ch);
                    state = ScanState::SingleQuote;
                    i += 1;
                }
                '"' => {
                    out.push(ch);
                    state = ScanState::DoubleQuote;
                    i += 1;
                }
                '-' if peek(i + 1) == Some('-') => {
                    out.push_str("--");
                    state = ScanState::LineComment;
                    i += 2;
                }
                '/' if peek(i + 1) == Some('*') => {
                    out.push_str("/*");
                    state = ScanState::BlockComment;
                    i += 2;
                }
                '$' if dollar_quotes && (i == 0 || !is_tag_char(chars[i - 1])) => {
                    match dollar_tag_len(&chars[i..]) {
                        Some(len) => {
                            dollar_tag = &chars[i..i + len];
                            out.extend(dollar_tag);
                            state = ScanState::DollarQuote;
                            i += len;
                        }
                        None => {
                            out.push(ch);
                            i += 1;
                        }
                    }
                }
                ':' if matches!(peek(i + 1), Some(':') | Some('=')) => {
                    out.push(ch);
                    out.push(chars[i + 1]);
                    i += 2;
                }
                ':' if peek(i + 1).map(is_name_start).unwrap_or(false) => {
                    let start = i + 1;
                    let mut end = start + 1;
                    while end < chars.len() && is_name_continue(chars[end]) {
                        end += 1;
                    }
                    let name: String = chars[start..end].iter().collect();
                    let (key, value) = params.get_key_value(name.as_str()).ok_or_else(|| {
                        EngineError::invalid_parameter(format!(
                            "could not find name '{}' in parameters",
                            name
                        ))
                    })?;

                    let existing = positions.get(key.as_str()).copied();
                    let index = match existing {
                        Some(index) if numbered => index,
                        _ => {
                            bound.push(value.clone());
                            positions.insert(key.as_str(), bound.len());
                            bound.len()
                        }
                    };
                    out.push_str(&driver.placeholder(index));
                    i = end;
                }
                _ => {
                    out.push(ch);
                    i += 1;
                }
            },
            ScanState::SingleQuote | ScanState::DoubleQuote => {
                let quote = if state == ScanState::SingleQuote {
                    '\''
                } else {
                    '"'
                };
                if ch == '\\' && backslash_escapes {
                    out.push(ch);
                    if let Some(next) = peek(i + 1) {
                        out.push(next);
                    }
                    i += 2;
                    continue;
                }
                out.push(ch);
                i += 1;
                if ch == quote {
                    if peek(i) == Some(quote) {
                        out.push(quote);
                        i += 1;
                    } else {
                        state = ScanState::Normal;
                    }
                }
            }
            ScanState::LineComment => {
                out.push(ch);
                i += 1;
                if ch == '\n' {
                    state = ScanState::Normal;
                }
            }
            ScanState::BlockComment => {
                out.push(ch);
                i += 1;
                if ch == '*' && peek(i) == Some('/') {
                    out.push('/');
                    i += 1;
                    state = ScanState::Normal;
                }
            }
            ScanState::DollarQuote => {
                if chars[i..].starts_with(dollar_tag) {
                    out.extend(dollar_tag);
                    i += dollar_tag.len();
                    state = ScanState::Normal;
                } else {
                    out.push(ch);
                    i += 1;
                }
            }
        }
    }

    Ok(BoundStatement {
        sql: out,
        params: bound,
    })
}

/// Length of the `$tag$` opener at the start of `rest`, if there is one.
fn dollar_tag_len(rest: &[char]) -> Option<usize> {
    let mut end = 1;
    if rest.get(1).copied().map(is_name_start).unwrap_or(false) {
        while rest
            .get(end)
            .map(|c| c.is_alphanumeric() || *c == '_')
            .unwrap_or(false)
        {
            end += 1;
        }
    }
    (rest.get(end) == Some(&'$')).then_some(end + 1)
}

fn is_tag_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

fn is_name_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_name_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '.'
}
