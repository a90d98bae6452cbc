//! Module dedicated to contact loading and validation.
//!
//! Contacts come from a CSV table with the fixed header contract
//! `email,name,gender,company`. Rows that fail validation are
//! excluded and reported, they never abort the run.

use std::{collections::HashSet, fmt, fs, path::PathBuf, str::FromStr};

use email_address::EmailAddress;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read contacts file at {1}")]
    ReadContactsFileError(#[source] std::io::Error, PathBuf),
    #[error("cannot parse contacts file header at {1}")]
    ParseContactsHeaderError(#[source] csv::Error, PathBuf),
    #[error("contacts file misses required column {0}")]
    MissingColumnError(&'static str),
}

/// A contact row that was rejected at load time.
///
/// Carries the 1-based row number of the source file so the operator
/// can fix the offending line.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("contacts row {row}: {reason}")]
pub struct RowError {
    pub row: usize,
    pub reason: RowErrorReason,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RowErrorReason {
    Malformed(String),
    InvalidEmail(String),
    UnknownGenderCode(String),
    EmptyCompany,
    DuplicateEmail(String),
}

impl fmt::Display for RowErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(err) => write!(f, "malformed row: {err}"),
            Self::InvalidEmail(email) => write!(f, "invalid email address {email:?}"),
            Self::UnknownGenderCode(code) => write!(f, "unknown gender code {code:?}"),
            Self::EmptyCompany => write!(f, "empty company"),
            Self::DuplicateEmail(email) => write!(f, "duplicate email address {email:?}"),
        }
    }
}

/// The gender code attached to a contact, driving the salutation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "m")]
    Masculine,
    #[serde(rename = "f")]
    Feminine,
    #[serde(rename = "x")]
    Neutral,
}

impl FromStr for Gender {
    type Err = UnknownGenderCodeError;

    fn from_str(code: &str) -> std::result::Result<Self, Self::Err> {
        match code {
            "m" => Ok(Self::Masculine),
            "f" => Ok(Self::Feminine),
            "x" => Ok(Self::Neutral),
            _ => Err(UnknownGenderCodeError(code.to_owned())),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Masculine => write!(f, "m"),
            Self::Feminine => write!(f, "f"),
            Self::Neutral => write!(f, "x"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("unknown gender code {0:?}")]
pub struct UnknownGenderCodeError(pub String);

/// One addressee and their personalization data.
///
/// Immutable once loaded. Identity key is the email address,
/// case-insensitive.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub email: String,
    pub name: String,
    pub gender: Gender,
    pub company: String,
}

impl Contact {
    /// The case-insensitive identity key of this contact.
    pub fn key(&self) -> String {
        self.email.to_lowercase()
    }

    /// Derive the greeting line from the gender code.
    ///
    /// Total for every valid [`Gender`]: an invalid code is rejected
    /// at load time, never here.
    pub fn salutation(&self) -> String {
        match self.gender {
            Gender::Masculine => format!("Dear Mr {}", self.last_name()),
            Gender::Feminine => format!("Dear Ms {}", self.last_name()),
            Gender::Neutral => format!("Hello {}", self.name),
        }
    }

    fn last_name(&self) -> &str {
        self.name.split_whitespace().last().unwrap_or(&self.name)
    }
}

/// The outcome of loading a contacts table: validated contacts in
/// first-appearance order, plus the rejected rows.
#[derive(Clone, Debug, Default)]
pub struct LoadedContacts {
    pub contacts: Vec<Contact>,
    pub rejects: Vec<RowError>,
}

/// Load and validate contacts from a CSV table.
///
/// The delimiter is sniffed between `,` and `;` from the header line.
/// A missing required column is fatal; anything wrong with a single
/// row yields a [`RowError`] and the row is excluded.
pub fn load_csv(path: impl Into<PathBuf>) -> Result<LoadedContacts> {
    let path = path.into();
    let raw = fs::read_to_string(&path).map_err(|err| Error::ReadContactsFileError(err, path.clone()))?;
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(raw))
        .trim(csv::Trim::All)
        .from_reader(raw.as_bytes());

    let headers = reader
        .headers()
        .map_err(|err| Error::ParseContactsHeaderError(err, path.clone()))?
        .clone();
    let column = |name: &'static str| {
        headers
            .iter()
            .position(|header| header.eq_ignore_ascii_case(name))
            .ok_or(Error::MissingColumnError(name))
    };
    let email_column = column("email")?;
    let name_column = column("name")?;
    let gender_column = column("gender")?;
    let company_column = column("company")?;

    let mut loaded = LoadedContacts::default();
    let mut seen = HashSet::new();

    for (index, record) in reader.into_records().enumerate() {
        // 1-based, the header being row 1
        let row = index + 2;
        let mut reject = |reason| loaded.rejects.push(RowError { row, reason });

        let record = match record {
            Ok(record) => record,
            Err(err) => {
                reject(RowErrorReason::Malformed(err.to_string()));
                continue;
            }
        };
        let field = |column: usize| record.get(column).unwrap_or_default().trim();

        let email = field(email_column).to_owned();
        if EmailAddress::from_str(&email).is_err() {
            reject(RowErrorReason::InvalidEmail(email));
            continue;
        }

        let gender = match field(gender_column).to_lowercase().parse::<Gender>() {
            Ok(gender) => gender,
            Err(UnknownGenderCodeError(code)) => {
                reject(RowErrorReason::UnknownGenderCode(code));
                continue;
            }
        };

        let company = field(company_column).to_owned();
        if company.is_empty() {
            reject(RowErrorReason::EmptyCompany);
            continue;
        }

        if !seen.insert(email.to_lowercase()) {
            reject(RowErrorReason::DuplicateEmail(email));
            continue;
        }

        loaded.contacts.push(Contact {
            email,
            name: field(name_column).to_owned(),
            gender,
            company,
        });
    }

    debug!(
        "loaded {} contacts from {} ({} rejected)",
        loaded.contacts.len(),
        path.display(),
        loaded.rejects.len(),
    );

    Ok(loaded)
}

fn sniff_delimiter(raw: &str) -> u8 {
    let header = raw.lines().next().unwrap_or_default();
    if header.matches(';').count() > header.matches(',').count() {
        b';'
    } else {
        b','
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use concat_with::concat_line;
    use tempfile::NamedTempFile;

    use super::*;

    fn contact(gender: Gender) -> Contact {
        Contact {
            email: "jane.doe@example.com".into(),
            name: "Jane Marie Doe".into(),
            gender,
            company: "Acme".into(),
        }
    }

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn salutation_is_total_and_deterministic() {
        assert_eq!(contact(Gender::Masculine).salutation(), "Dear Mr Doe");
        assert_eq!(contact(Gender::Feminine).salutation(), "Dear Ms Doe");
        assert_eq!(contact(Gender::Neutral).salutation(), "Hello Jane Marie Doe");
        assert_eq!(contact(Gender::Feminine).salutation(), contact(Gender::Feminine).salutation());
    }

    #[test]
    fn invalid_gender_row_is_rejected_others_survive() {
        let file = write_csv(concat_line!(
            "email,name,gender,company",
            "alice@x.com,Alice,f,Acme",
            "bob@x.com,Bob,z,Initech",
            "carol@x.com,Carol,x,Globex",
        ));

        let loaded = load_csv(file.path()).unwrap();

        let emails: Vec<_> = loaded.contacts.iter().map(|c| c.email.as_str()).collect();
        assert_eq!(emails, ["alice@x.com", "carol@x.com"]);
        assert_eq!(loaded.rejects.len(), 1);
        assert_eq!(loaded.rejects[0].row, 3);
        assert_eq!(
            loaded.rejects[0].reason,
            RowErrorReason::UnknownGenderCode("z".into())
        );
    }

    #[test]
    fn duplicate_email_keeps_first_occurrence() {
        let file = write_csv(concat_line!(
            "email,name,gender,company",
            "alice@x.com,Alice,f,Acme",
            "ALICE@X.COM,Alice Again,f,Acme Bis",
        ));

        let loaded = load_csv(file.path()).unwrap();

        assert_eq!(loaded.contacts.len(), 1);
        assert_eq!(loaded.contacts[0].company, "Acme");
        assert_eq!(
            loaded.rejects[0].reason,
            RowErrorReason::DuplicateEmail("ALICE@X.COM".into())
        );
    }

    #[test]
    fn semicolon_delimiter_is_sniffed() {
        let file = write_csv(concat_line!(
            "email;name;gender;company",
            "alice@x.com;Alice;f;Acme",
        ));

        let loaded = load_csv(file.path()).unwrap();

        assert_eq!(loaded.contacts.len(), 1);
        assert_eq!(loaded.contacts[0].gender, Gender::Feminine);
    }

    #[test]
    fn missing_column_is_fatal() {
        let file = write_csv(concat_line!("email,name,company", "alice@x.com,Alice,Acme"));

        assert!(matches!(
            load_csv(file.path()),
            Err(Error::MissingColumnError("gender"))
        ));
    }

    #[test]
    fn empty_company_and_bad_email_are_row_errors() {
        let file = write_csv(concat_line!(
            "email,name,gender,company",
            "not-an-email,Alice,f,Acme",
            "bob@x.com,Bob,m,",
        ));

        let loaded = load_csv(file.path()).unwrap();

        assert!(loaded.contacts.is_empty());
        assert_eq!(
            loaded.rejects[0].reason,
            RowErrorReason::InvalidEmail("not-an-email".into())
        );
        assert_eq!(loaded.rejects[1].reason, RowErrorReason::EmptyCompany);
    }
}
