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

//! Per-package options and profile-level scoped option values.
//!
//! [`PackageOptions`] is the flat sibling of the settings tree: one level of
//! constrained fields with defaults, declared by the recipe. [`Options`] is
//! the profile side: a list of `value` assignments, optionally scoped to a
//! package pattern (`zlib/*:shared=True`), applied onto each package's
//! declared options during graph construction.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reference::PkgReference;
use crate::settings::SettingValue;
use crate::values::Values;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("'{value}' is not a valid '{field}' option value.\nPossible values are [{}]", .possible.join(", "))]
    BadValue {
        field: String,
        value: String,
        possible: Vec<String>,
    },
    #[error("option '{field}' doesn't exist.\nPossible options are [{}]", .valid.join(", "))]
    UndefinedField { field: String, valid: Vec<String> },
    #[error("option '{path}' value not defined")]
    UndefinedValue { path: String },
    #[error("invalid options line {line}: '{text}', expected '[pattern:]name=value'")]
    MalformedLine { line: usize, text: String },
}

/// The allowed range of one option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptionDefinition {
    Any,
    Enum(Vec<SettingValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PackageOption {
    definition: OptionDefinition,
    value: Option<SettingValue>,
}

impl PackageOption {
    fn possible_values(&self) -> Vec<String> {
        match &self.definition {
            OptionDefinition::Any => vec!["ANY".to_string()],
            OptionDefinition::Enum(values) => {
                let mut possible: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                possible.sort();
                possible
            }
        }
    }

    fn contains(&self, value: &SettingValue) -> bool {
        match &self.definition {
            OptionDefinition::Any => true,
            OptionDefinition::Enum(values) => values.contains(value),
        }
    }
}

/// One package's declared options with their current values. Defaults are
/// applied at declaration time, before any recipe callback runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageOptions {
    fields: IndexMap<String, PackageOption>,
}

impl PackageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an option with a closed value range and an optional default.
    pub fn declare<'a>(
        &mut self,
        name: &str,
        values: impl IntoIterator<Item = &'a str>,
        default: Option<&str>,
    ) {
        self.fields.insert(
            name.to_string(),
            PackageOption {
                definition: OptionDefinition::Enum(
                    values.into_iter().map(SettingValue::from).collect(),
                ),
                value: default.map(SettingValue::from),
            },
        );
    }

    /// Declares an unconstrained option.
    pub fn declare_any(&mut self, name: &str, default: Option<&str>) {
        self.fields.insert(
            name.to_string(),
            PackageOption {
                definition: OptionDefinition::Any,
                value: default.map(SettingValue::from),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn set(
        &mut self,
        name: &str,
        value: impl Into<SettingValue>,
    ) -> Result<(), OptionsError> {
        let valid = self.sorted_names();
        let option = self
            .fields
            .get_mut(name)
            .ok_or_else(|| OptionsError::UndefinedField {
                field: name.to_string(),
                valid,
            })?;
        let value = value.into();
        if !option.contains(&value) {
            return Err(OptionsError::BadValue {
                field: name.to_string(),
                value: value.to_string(),
                possible: option.possible_values(),
            });
        }
        option.value = Some(value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&SettingValue, OptionsError> {
        let option = self
            .fields
            .get(name)
            .ok_or_else(|| OptionsError::UndefinedField {
                field: name.to_string(),
                valid: self.sorted_names(),
            })?;
        option
            .value
            .as_ref()
            .ok_or_else(|| OptionsError::UndefinedValue {
                path: name.to_string(),
            })
    }

    /// Tolerant read: undeclared or unset reads as `None`, as does an
    /// explicit null value.
    pub fn get_safe(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)?
            .value
            .as_ref()
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Removes an option if present, no-ops otherwise. Recipes call this
    /// unconditionally across platforms where the option may not exist.
    pub fn rm_safe(&mut self, name: &str) {
        self.fields.shift_remove(name);
    }

    /// Asserts every declared option holds a value.
    pub fn validate(&self) -> Result<(), OptionsError> {
        for (name, option) in &self.fields {
            if option.value.is_none() {
                return Err(OptionsError::UndefinedValue {
                    path: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// `(name, value)` pairs in declaration order, assigned options only.
    pub fn values_list(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .filter_map(|(name, option)| {
                option.value.as_ref().map(|v| (name.clone(), v.to_string()))
            })
            .collect()
    }

    pub fn values(&self) -> Values {
        Values::from_list(self.values_list())
    }

    pub fn dumps(&self) -> String {
        self.values().dumps()
    }
}

/// One profile-level option assignment, optionally scoped to a package
/// pattern. `&` scopes to the consuming recipe itself, `&!` to everything
/// but the consumer; any other pattern is an fnmatch-style glob on the
/// package reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedOption {
    pub pattern: Option<String>,
    pub name: String,
    pub value: SettingValue,
}

impl ScopedOption {
    fn applies_to(&self, reference: &PkgReference, is_consumer: bool) -> bool {
        match self.pattern.as_deref() {
            // An unscoped value applies to every package in the graph.
            None => true,
            Some("&") => is_consumer,
            Some("&!") => !is_consumer,
            Some(pattern) => reference.matches_pattern(pattern),
        }
    }
}

/// The ordered profile-side option assignments. Later entries override
/// earlier ones when both match a package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options {
    entries: Vec<ScopedOption>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `[pattern:]name=value` lines.
    pub fn loads(text: &str) -> Result<Self, OptionsError> {
        let mut options = Options::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (head, value) =
                line.split_once('=')
                    .ok_or_else(|| OptionsError::MalformedLine {
                        line: idx + 1,
                        text: line.to_string(),
                    })?;
            let (pattern, name) = match head.split_once(':') {
                Some((pattern, name)) => (Some(pattern.trim().to_string()), name.trim()),
                None => (None, head.trim()),
            };
            if name.is_empty() {
                return Err(OptionsError::MalformedLine {
                    line: idx + 1,
                    text: line.to_string(),
                });
            }
            options.entries.push(ScopedOption {
                pattern,
                name: name.to_string(),
                value: SettingValue::from(value.trim()),
            });
        }
        Ok(options)
    }

    pub fn dumps(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            if let Some(pattern) = &entry.pattern {
                out.push_str(pattern);
                out.push(':');
            }
            out.push_str(&entry.name);
            out.push('=');
            out.push_str(&entry.value.to_string());
            out.push('\n');
        }
        out
    }

    pub fn set(&mut self, name: &str, value: impl Into<SettingValue>) {
        self.entries.push(ScopedOption {
            pattern: None,
            name: name.to_string(),
            value: value.into(),
        });
    }

    pub fn set_scoped(&mut self, pattern: &str, name: &str, value: impl Into<SettingValue>) {
        self.entries.push(ScopedOption {
            pattern: Some(pattern.to_string()),
            name: name.to_string(),
            value: value.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The assignments that apply to `reference`, in profile order.
    pub fn for_reference<'a>(
        &'a self,
        reference: &PkgReference,
        is_consumer: bool,
    ) -> impl Iterator<Item = (&'a str, &'a SettingValue)> {
        let matched: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.applies_to(reference, is_consumer))
            .map(|e| (e.name.as_str(), &e.value))
            .collect();
        matched.into_iter()
    }

    /// Applies the matching assignments onto a package's declared options.
    /// Values naming options the package does not declare are skipped;
    /// pattern-scoped values routinely target other packages' options.
    /// Out-of-range values are still errors.
    pub fn apply_to(
        &self,
        pkg: &mut PackageOptions,
        reference: &PkgReference,
        is_consumer: bool,
    ) -> Result<(), OptionsError> {
        for (name, value) in self.for_reference(reference, is_consumer) {
            if !pkg.contains(name) {
                log::debug!("skipping option '{name}' not declared by {reference}");
                continue;
            }
            pkg.set(name, value.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use expect_test::expect;
    use test_log::test;

    use super::*;

    fn zlib_options() -> PackageOptions {
        let mut options = PackageOptions::new();
        options.declare("shared", ["True", "False"], Some("False"));
        options.declare("fPIC", ["True", "False"], Some("True"));
        options.declare_any("custom_suffix", None);
        options
    }

    #[test]
    fn defaults_are_applied_at_declaration() {
        let options = zlib_options();
        expect![[r#"
            shared=False
            fPIC=True
        "#]]
        .assert_eq(&options.dumps());
    }

    #[test]
    fn bad_value_lists_range() {
        let mut options = zlib_options();
        let err = options.set("shared", "Maybe").unwrap_err();
        expect![[r#"
            'Maybe' is not a valid 'shared' option value.
            Possible values are [False, True]"#]]
        .assert_eq(&err.to_string());
        options.set("custom_suffix", "d").unwrap();
    }

    #[test]
    fn undeclared_option_is_an_error() {
        let mut options = zlib_options();
        let err = options.set("threads", "True").unwrap_err();
        expect![[r#"
            option 'threads' doesn't exist.
            Possible options are [custom_suffix, fPIC, shared]"#]]
        .assert_eq(&err.to_string());
    }

    #[test]
    fn rm_safe_is_idempotent() {
        let mut options = zlib_options();
        options.rm_safe("fPIC");
        options.rm_safe("fPIC");
        options.rm_safe("never_declared");
        assert!(!options.contains("fPIC"));
        assert_eq!(options.get_safe("shared").as_deref(), Some("False"));
    }

    #[test]
    fn validate_requires_all_values() {
        let mut options = zlib_options();
        let err = options.validate().unwrap_err();
        expect!["option 'custom_suffix' value not defined"].assert_eq(&err.to_string());
        options.set("custom_suffix", "d").unwrap();
        options.validate().unwrap();
    }

    #[test]
    fn scoped_values_follow_patterns() {
        let profile = Options::loads("*:shared=True\nzlib/*:fPIC=False\n&:custom_suffix=app\n")
            .unwrap();
        let zlib: PkgReference = "zlib/1.2.13".parse().unwrap();
        let openssl: PkgReference = "openssl/3.1.0".parse().unwrap();

        let mut zlib_opts = zlib_options();
        profile.apply_to(&mut zlib_opts, &zlib, false).unwrap();
        expect![[r#"
            shared=True
            fPIC=False
        "#]]
        .assert_eq(&zlib_opts.dumps());

        // openssl is the consumer here: no fPIC override, custom_suffix set.
        let mut openssl_opts = zlib_options();
        profile.apply_to(&mut openssl_opts, &openssl, true).unwrap();
        expect![[r#"
            shared=True
            fPIC=True
            custom_suffix=app
        "#]]
        .assert_eq(&openssl_opts.dumps());
    }

    #[test]
    fn not_consumer_token() {
        let profile = Options::loads("&!:shared=True\n").unwrap();
        let zlib: PkgReference = "zlib/1.2.13".parse().unwrap();
        assert_eq!(profile.for_reference(&zlib, false).count(), 1);
        assert_eq!(profile.for_reference(&zlib, true).count(), 0);
    }

    #[test]
    fn later_entries_override_earlier() {
        let profile = Options::loads("zlib/*:shared=True\n*:shared=False\n").unwrap();
        let zlib: PkgReference = "zlib/1.2.13".parse().unwrap();
        let mut opts = zlib_options();
        profile.apply_to(&mut opts, &zlib, false).unwrap();
        assert_eq!(opts.get_safe("shared").as_deref(), Some("False"));
    }

    #[test]
    fn loads_dumps_round_trip() {
        let text = "*:shared=True\nzlib/*:fPIC=False\n&:custom_suffix=app\n";
        let profile = Options::loads(text).unwrap();
        assert_eq!(profile.dumps(), text);
        assert_eq!(Options::loads(&profile.dumps()).unwrap(), profile);
    }
}
