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

//! A flat, ordered list of dotted-name/value pairs, as produced by
//! [`Settings::values_list`](crate::settings::Settings::values_list) and
//! friends. The hash computed here is the raw material of package IDs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::sha256_hex;

#[derive(Debug, Error)]
pub enum ValuesParseError {
    #[error("invalid values line {line}: '{text}', expected 'name=value'")]
    MalformedLine { line: usize, text: String },
}

/// An ordered `name=value` list.
///
/// The held order is whatever the producer emitted (declaration order for
/// settings, registration order for options) and is preserved by
/// [`Values::dumps`]. Hashing always sorts first, so assignment order can
/// never change a binary identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Values(Vec<(String, String)>);

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_list(list: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut values = Values::new();
        for (name, value) in list {
            values.set(name, value);
        }
        values
    }

    /// Parses the `name=value` line format. Empty lines are skipped; the
    /// value may be empty, the name may not.
    pub fn loads(text: &str) -> Result<Self, ValuesParseError> {
        let mut values = Values::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (name, value) = line.split_once('=').ok_or_else(|| {
                ValuesParseError::MalformedLine {
                    line: idx + 1,
                    text: line.to_string(),
                }
            })?;
            if name.trim().is_empty() {
                return Err(ValuesParseError::MalformedLine {
                    line: idx + 1,
                    text: line.to_string(),
                });
            }
            values.set(name.trim().to_string(), value.trim().to_string());
        }
        Ok(values)
    }

    /// Sets `name` to `value`, replacing in place if `name` is already held.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Removes `name` if held. Not an error when absent.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.remove(idx).1)
    }

    /// Drops every entry whose dotted name starts with `prefix.` (or equals
    /// `prefix`). Used by package-id hooks to erase a whole subtree, e.g.
    /// every `compiler.*` entry.
    pub fn remove_prefixed(&mut self, prefix: &str) {
        let dotted = format!("{prefix}.");
        self.0
            .retain(|(n, _)| n != prefix && !n.starts_with(&dotted));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `name=value` lines in held order.
    pub fn dumps(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.0 {
            out.push_str(name);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    /// The entries sorted lexicographically by dotted name. This is the
    /// canonical order for hashing, independent of assignment order.
    pub fn sorted(&self) -> Vec<(String, String)> {
        let mut entries = self.0.clone();
        entries.sort();
        entries
    }

    /// A stable digest over the sorted `name=value` lines.
    pub fn sha(&self) -> String {
        let mut text = String::new();
        for (name, value) in self.sorted() {
            text.push_str(&name);
            text.push('=');
            text.push_str(&value);
            text.push('\n');
        }
        sha256_hex(text)
    }
}

impl<'a> IntoIterator for &'a Values {
    type Item = &'a (String, String);
    type IntoIter = std::slice::Iter<'a, (String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod test {
    use expect_test::expect;

    use super::*;

    #[test]
    fn held_order_is_preserved_in_dumps() {
        let mut values = Values::new();
        values.set("os", "Linux");
        values.set("compiler", "gcc");
        values.set("compiler.version", "13");
        values.set("arch", "x86_64");
        expect![[r#"
            os=Linux
            compiler=gcc
            compiler.version=13
            arch=x86_64
        "#]]
        .assert_eq(&values.dumps());
    }

    #[test]
    fn sha_ignores_assignment_order() {
        let mut a = Values::new();
        a.set("os", "Linux");
        a.set("compiler", "gcc");
        let mut b = Values::new();
        b.set("compiler", "gcc");
        b.set("os", "Linux");
        assert_eq!(a.sha(), b.sha());
        assert_ne!(a.dumps(), b.dumps());
    }

    #[test]
    fn sha_is_sensitive_to_any_value() {
        let mut a = Values::new();
        a.set("os", "Linux");
        let mut b = Values::new();
        b.set("os", "Windows");
        assert_ne!(a.sha(), b.sha());

        // Absent vs. explicit "None" are different identities.
        let mut c = Values::new();
        c.set("os", "Linux");
        c.set("build_type", "None");
        assert_ne!(a.sha(), c.sha());
    }

    #[test]
    fn loads_round_trips() {
        let text = "os=Linux\ncompiler=gcc\ncompiler.version=13\n";
        let values = Values::loads(text).unwrap();
        assert_eq!(values.dumps(), text);
        assert_eq!(values.get("compiler.version"), Some("13"));
    }

    #[test]
    fn loads_rejects_garbage() {
        let err = Values::loads("os Linux").unwrap_err();
        expect!["invalid values line 1: 'os Linux', expected 'name=value'"]
            .assert_eq(&err.to_string());
    }

    #[test]
    fn remove_prefixed_erases_subtree() {
        let mut values = Values::from_list([
            ("compiler".to_string(), "gcc".to_string()),
            ("compiler.version".to_string(), "13".to_string()),
            ("os".to_string(), "Linux".to_string()),
        ]);
        values.remove_prefixed("compiler");
        expect![[r#"
            os=Linux
        "#]]
        .assert_eq(&values.dumps());
    }
}
