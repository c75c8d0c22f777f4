//! The `"<database>.<collection>"` identifier that names a namespace in the oplog.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// A parsed `database.collection` pair.
///
/// Collection names may themselves contain dots (e.g. `system.indexes`), so parsing splits on
/// the *first* `.` only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Namespace {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.find('.') {
            Some(idx) if idx > 0 && idx < s.len() - 1 => Ok(Namespace {
                database: s[..idx].to_owned(),
                collection: s[idx + 1..].to_owned(),
            }),
            _ => Err(Error::NamespaceParse(s.to_owned())),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}
