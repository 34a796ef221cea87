// kiln: The package manager core for C and C++.
// Copyright (C) 2024 International Digital Economy Academy
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// For inquiries, you can contact us via e-mail at jichuruanjian@idea.edu.cn.

use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("malformed package reference '{0}', expected 'name/version[@user/channel]'")]
    Malformed(String),
    #[error("invalid version in package reference '{reference}': {source}")]
    Version {
        reference: String,
        source: semver::Error,
    },
}

/// A package reference: `name/version`, optionally qualified as
/// `name/version@user/channel`. The binary identity (package ID) is not part
/// of the reference; it is computed separately from settings and options.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PkgReference {
    pub name: String,
    pub version: Version,
    pub user: Option<String>,
    pub channel: Option<String>,
}

impl PkgReference {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        PkgReference {
            name: name.into(),
            version,
            user: None,
            channel: None,
        }
    }

    /// Whether this reference matches an fnmatch-style pattern such as
    /// `zlib/*` or `openssl/1.*@*/stable`. The pattern is matched against
    /// the display form.
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        let Ok(pattern) = glob::Pattern::new(pattern) else {
            log::warn!("ignoring malformed package pattern '{pattern}'");
            return false;
        };
        pattern.matches(&self.to_string()) || pattern.matches(&self.name)
    }
}

impl std::fmt::Display for PkgReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.version)?;
        if let (Some(user), Some(channel)) = (&self.user, &self.channel) {
            write!(f, "@{user}/{channel}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PkgReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for PkgReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, qualifier) = match s.split_once('@') {
            Some((base, qualifier)) => (base, Some(qualifier)),
            None => (s, None),
        };
        let Some((name, version)) = base.split_once('/') else {
            return Err(ReferenceError::Malformed(s.to_string()));
        };
        if name.is_empty() {
            return Err(ReferenceError::Malformed(s.to_string()));
        }
        let version = Version::parse(version).map_err(|e| ReferenceError::Version {
            reference: s.to_string(),
            source: e,
        })?;
        let (user, channel) = match qualifier {
            None => (None, None),
            Some(qualifier) => {
                let Some((user, channel)) = qualifier.split_once('/') else {
                    return Err(ReferenceError::Malformed(s.to_string()));
                };
                if user.is_empty() || channel.is_empty() {
                    return Err(ReferenceError::Malformed(s.to_string()));
                }
                (Some(user.to_string()), Some(channel.to_string()))
            }
        };
        Ok(PkgReference {
            name: name.to_string(),
            version,
            user,
            channel,
        })
    }
}

#[cfg(test)]
mod test {
    use expect_test::expect;

    use super::*;

    #[test]
    fn parse_and_display() {
        let reference: PkgReference = "zlib/1.2.13".parse().unwrap();
        expect!["zlib/1.2.13"].assert_eq(&reference.to_string());

        let reference: PkgReference = "openssl/3.1.0@corp/stable".parse().unwrap();
        expect!["openssl/3.1.0@corp/stable"].assert_eq(&reference.to_string());
        assert_eq!(reference.user.as_deref(), Some("corp"));
    }

    #[test]
    fn rejects_malformed_references() {
        assert!("zlib".parse::<PkgReference>().is_err());
        assert!("zlib/not-a-version".parse::<PkgReference>().is_err());
        assert!("zlib/1.2.13@corp".parse::<PkgReference>().is_err());
    }

    #[test]
    fn pattern_matching() {
        let reference: PkgReference = "zlib/1.2.13".parse().unwrap();
        assert!(reference.matches_pattern("zlib/*"));
        assert!(reference.matches_pattern("zlib"));
        assert!(reference.matches_pattern("z*"));
        assert!(!reference.matches_pattern("openssl/*"));

        let reference: PkgReference = "openssl/3.1.0@corp/stable".parse().unwrap();
        assert!(reference.matches_pattern("openssl/3.*@*/stable"));
        assert!(!reference.matches_pattern("openssl/1.*"));
    }
}
