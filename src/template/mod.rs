//! Module dedicated to token substitution.
//!
//! Templates are rendered by a pure function over an explicit
//! token-to-value mapping. Substitution is best-effort: a placeholder
//! outside the fixed token set of its template kind passes through
//! literally, while a fixed token with no value behind it is a render
//! error naming the token.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot render template: no value for token {0}")]
    MissingTokenValueError(String),
}

/// Tokens recognized by the email body template.
pub const BODY_TOKENS: &[&str] = &["salutation", "company", "deadline", "logo_cid"];

/// Tokens recognized by the cover letter template.
pub const LETTER_TOKENS: &[&str] = &[
    "salutation",
    "company",
    "deadline",
    "from_name",
    "reply_to",
    "today",
];

/// Tokens recognized by the subject template.
pub const SUBJECT_TOKENS: &[&str] = &["company"];

/// The token-to-value mapping a template is rendered against.
pub type Tokens = HashMap<&'static str, String>;

/// The placeholder delimiter style of a template kind.
///
/// Subject and body use `{token}`, the cover letter uses `{{token}}`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenStyle {
    SingleBrace,
    DoubleBrace,
}

static SINGLE_BRACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").unwrap());
static DOUBLE_BRACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{([a-z_]+)\}\}").unwrap());

/// Expand every placeholder of `template` against `tokens`.
///
/// Pure: same inputs, same output, no I/O.
pub fn expand(template: &str, style: TokenStyle, known: &[&str], tokens: &Tokens) -> Result<String> {
    let regex = match style {
        TokenStyle::SingleBrace => &*SINGLE_BRACE,
        TokenStyle::DoubleBrace => &*DOUBLE_BRACE,
    };

    let mut output = String::with_capacity(template.len());
    let mut last = 0;

    for captures in regex.captures_iter(template) {
        let placeholder = captures.get(0).unwrap();
        let name = captures.get(1).unwrap().as_str();

        output.push_str(&template[last..placeholder.start()]);

        if known.contains(&name) {
            match tokens.get(name) {
                Some(value) => output.push_str(value),
                None => return Err(Error::MissingTokenValueError(name.to_owned())),
            }
        } else {
            output.push_str(placeholder.as_str());
        }

        last = placeholder.end();
    }

    output.push_str(&template[last..]);

    Ok(output)
}

/// Fully rendered per-recipient content, produced fresh per attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rendered {
    pub subject: String,
    pub html_body: String,
    pub letter: String,
}
