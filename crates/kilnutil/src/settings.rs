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

//! The constrained settings tree.
//!
//! A settings schema is a YAML mapping whose leaves are either the literal
//! string `"ANY"`, a list of allowed values (a null entry is permitted), or a
//! nested mapping gating further sub-settings on the parent's chosen value:
//!
//! ```yaml
//! os: [Windows, Linux, Macos]
//! compiler:
//!   gcc:
//!     version: ["13", "14"]
//!   msvc:
//!     version: ["193", "194"]
//! build_type: [null, Debug, Release]
//! ```
//!
//! `compiler.version` only exists once `compiler` has been assigned, and its
//! range depends on which compiler was chosen. All reads and writes go
//! through explicit paths (`settings.set(&["compiler", "version"], "14")`);
//! the error messages carry the full dotted path and the sorted legal range,
//! because they are the primary diagnostic surface for configuration
//! mistakes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::values::Values;

/// The default settings schema shipped with kiln. Callers load it explicitly
/// with [`Settings::loads`]; there is no process-wide singleton.
pub const DEFAULT_SETTINGS: &str = r#"
os:
  Windows:
    subsystem: [null, cygwin, msys2, wsl]
  Linux: null
  Macos:
    version: [null, "11.0", "12.0", "13.0", "14.0"]
  Android:
    api_level: ANY
  FreeBSD: null
  baremetal: null
arch: [x86, x86_64, armv7, armv8, riscv32, riscv64, wasm]
compiler:
  gcc:
    version: ["9", "10", "11", "12", "13", "14"]
    libcxx: [libstdc++, libstdc++11]
    threads: [null, posix, win32]
  clang:
    version: ["14", "15", "16", "17", "18", "19"]
    libcxx: [libstdc++, libstdc++11, libc++]
  apple-clang:
    version: ["13", "14", "15"]
    libcxx: [libc++]
  msvc:
    version: ["190", "191", "192", "193", "194"]
    runtime: [static, dynamic]
    runtime_type: [Debug, Release]
build_type: [null, Debug, Release, RelWithDebInfo, MinSizeRel]
"#;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("malformed settings schema at '{path}': {reason}")]
    Schema { path: String, reason: String },
    #[error("'{value}' is not a valid '{field}' value.\nPossible values are [{}]", .possible.join(", "))]
    BadValue {
        field: String,
        value: String,
        possible: Vec<String>,
    },
    #[error("'{field}' setting doesn't exist for this configuration.\nPossible settings are [{}]", .valid.join(", "))]
    UndefinedField { field: String, valid: Vec<String> },
    #[error("'{path}' value not defined")]
    UndefinedValue { path: String },
    #[error("constraint references unknown setting '{field}'.\nPossible settings are [{}]", .valid.join(", "))]
    ConstraintField { field: String, valid: Vec<String> },
    #[error("constraint value '{value}' is outside the range of '{field}'.\nPossible values are [{}]", .possible.join(", "))]
    ConstraintValue {
        field: String,
        value: String,
        possible: Vec<String>,
    },
}

/// A single setting value. The null sentinel is a legal value of its own and
/// renders as `None`, matching how profiles and package-id dumps spell it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SettingValue(Option<String>);

impl SettingValue {
    pub fn null() -> Self {
        SettingValue(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        if s == "None" {
            SettingValue(None)
        } else {
            SettingValue(Some(s.to_string()))
        }
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        SettingValue::from(s.as_str())
    }
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(s) => f.write_str(s),
            None => f.write_str("None"),
        }
    }
}

/// The allowed range of a [`SettingsItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SettingsDefinition {
    /// Any value is accepted.
    Any,
    /// A closed list of allowed values, no sub-settings.
    Enum(Vec<SettingValue>),
    /// Allowed values, each gating its own sub-settings tree.
    Map(IndexMap<SettingValue, Settings>),
}

/// One node of the settings tree: a fully dotted name, the currently
/// assigned value (if any) and the allowed range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsItem {
    name: String,
    value: Option<SettingValue>,
    definition: SettingsDefinition,
}

impl SettingsItem {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&SettingValue> {
        self.value.as_ref()
    }

    pub fn definition(&self) -> &SettingsDefinition {
        &self.definition
    }

    /// The allowed values rendered and sorted, for diagnostics.
    pub fn possible_values(&self) -> Vec<String> {
        let mut possible: Vec<String> = match &self.definition {
            SettingsDefinition::Any => return vec!["ANY".to_string()],
            SettingsDefinition::Enum(values) => values.iter().map(|v| v.to_string()).collect(),
            SettingsDefinition::Map(map) => map.keys().map(|v| v.to_string()).collect(),
        };
        possible.sort();
        possible
    }

    pub fn contains(&self, value: &SettingValue) -> bool {
        match &self.definition {
            SettingsDefinition::Any => true,
            SettingsDefinition::Enum(values) => values.contains(value),
            SettingsDefinition::Map(map) => map.contains_key(value),
        }
    }

    fn allows_null(&self) -> bool {
        self.contains(&SettingValue::null()) && !matches!(self.definition, SettingsDefinition::Any)
    }

    /// Assigns a value, rejecting anything outside the current range.
    pub fn set(&mut self, value: SettingValue) -> Result<(), SettingsError> {
        if !self.contains(&value) {
            return Err(SettingsError::BadValue {
                field: self.name.clone(),
                value: value.to_string(),
                possible: self.possible_values(),
            });
        }
        self.value = Some(value);
        Ok(())
    }

    /// Permanently removes `value` from the allowed range. Narrowing is
    /// monotonic: once removed, assigning the value fails. If the removed
    /// value was the current one, the item becomes unassigned.
    pub fn remove_value(&mut self, value: &SettingValue) {
        match &mut self.definition {
            SettingsDefinition::Any => {}
            SettingsDefinition::Enum(values) => values.retain(|v| v != value),
            SettingsDefinition::Map(map) => {
                map.shift_remove(value);
            }
        }
        if self.value.as_ref() == Some(value) {
            self.value = None;
        }
    }

    /// The sub-settings gated on the currently assigned value. Empty for
    /// leaf items and for branches without sub-settings.
    fn current_subtree(&self) -> Result<Option<&Settings>, SettingsError> {
        let SettingsDefinition::Map(map) = &self.definition else {
            return Ok(None);
        };
        let value = self
            .value
            .as_ref()
            .ok_or_else(|| SettingsError::UndefinedValue {
                path: self.name.clone(),
            })?;
        Ok(map.get(value))
    }

    fn current_subtree_mut(&mut self) -> Result<Option<&mut Settings>, SettingsError> {
        let SettingsDefinition::Map(map) = &mut self.definition else {
            return Ok(None);
        };
        let value = self
            .value
            .clone()
            .ok_or_else(|| SettingsError::UndefinedValue {
                path: self.name.clone(),
            })?;
        Ok(map.get_mut(&value))
    }
}

/// A named collection of [`SettingsItem`], keyed by field name in
/// declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    name: String,
    fields: IndexMap<String, SettingsItem>,
}

fn dotted(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

fn yaml_scalar(value: &serde_yaml::Value, path: &str) -> Result<SettingValue, SettingsError> {
    match value {
        serde_yaml::Value::Null => Ok(SettingValue::null()),
        serde_yaml::Value::String(s) => Ok(SettingValue::from(s.as_str())),
        serde_yaml::Value::Bool(b) => Ok(SettingValue::from(if *b { "True" } else { "False" })),
        serde_yaml::Value::Number(n) => Ok(SettingValue::from(n.to_string())),
        _ => Err(SettingsError::Schema {
            path: path.to_string(),
            reason: "expected a scalar value".to_string(),
        }),
    }
}

impl Settings {
    /// Parses a YAML schema into a settings tree with no values assigned.
    pub fn loads(text: &str) -> Result<Settings, SettingsError> {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| SettingsError::Schema {
                path: String::new(),
                reason: e.to_string(),
            })?;
        Settings::from_yaml(String::new(), &doc)
    }

    fn from_yaml(name: String, doc: &serde_yaml::Value) -> Result<Settings, SettingsError> {
        let mapping = match doc {
            serde_yaml::Value::Null => {
                return Ok(Settings {
                    name,
                    fields: IndexMap::new(),
                });
            }
            serde_yaml::Value::Mapping(m) => m,
            _ => {
                return Err(SettingsError::Schema {
                    path: name,
                    reason: "expected a mapping of setting fields".to_string(),
                });
            }
        };
        let mut fields = IndexMap::new();
        for (key, value) in mapping {
            let field = yaml_scalar(key, &name)?;
            let Some(field) = field.as_str().map(str::to_string) else {
                return Err(SettingsError::Schema {
                    path: name,
                    reason: "a setting field name cannot be null".to_string(),
                });
            };
            let item_name = dotted(&name, &field);
            let definition = Settings::definition_from_yaml(&item_name, value)?;
            fields.insert(
                field,
                SettingsItem {
                    name: item_name,
                    value: None,
                    definition,
                },
            );
        }
        Ok(Settings { name, fields })
    }

    fn definition_from_yaml(
        item_name: &str,
        doc: &serde_yaml::Value,
    ) -> Result<SettingsDefinition, SettingsError> {
        match doc {
            serde_yaml::Value::String(s) if s == "ANY" => Ok(SettingsDefinition::Any),
            serde_yaml::Value::Sequence(seq) => {
                let mut values = Vec::with_capacity(seq.len());
                for entry in seq {
                    let value = yaml_scalar(entry, item_name)?;
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
                Ok(SettingsDefinition::Enum(values))
            }
            serde_yaml::Value::Mapping(mapping) => {
                let mut map = IndexMap::new();
                for (key, value) in mapping {
                    let branch = yaml_scalar(key, item_name)?;
                    if branch.is_null() && !matches!(value, serde_yaml::Value::Null) {
                        return Err(SettingsError::Schema {
                            path: item_name.to_string(),
                            reason: "a null branch cannot define sub-settings".to_string(),
                        });
                    }
                    let subtree = Settings::from_yaml(item_name.to_string(), value)?;
                    map.insert(branch, subtree);
                }
                Ok(SettingsDefinition::Map(map))
            }
            _ => Err(SettingsError::Schema {
                path: item_name.to_string(),
                reason: "expected 'ANY', a list of values or a mapping".to_string(),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names at this level, in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    fn sorted_field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolves `path` to the item it names, walking nested sub-settings
    /// through the currently assigned value at each level.
    pub fn item(&self, path: &[&str]) -> Result<&SettingsItem, SettingsError> {
        let (first, rest) = path.split_first().ok_or_else(|| SettingsError::UndefinedField {
            field: self.name.clone(),
            valid: self.sorted_field_names(),
        })?;
        let item = self
            .fields
            .get(*first)
            .ok_or_else(|| SettingsError::UndefinedField {
                field: dotted(&self.name, first),
                valid: self.sorted_field_names(),
            })?;
        if rest.is_empty() {
            return Ok(item);
        }
        match item.current_subtree()? {
            Some(subtree) => subtree.item(rest),
            None => Err(SettingsError::UndefinedField {
                field: dotted(&item.name, rest[0]),
                valid: vec![],
            }),
        }
    }

    pub fn item_mut(&mut self, path: &[&str]) -> Result<&mut SettingsItem, SettingsError> {
        let name = self.name.clone();
        let sorted = self.sorted_field_names();
        let (first, rest) = path.split_first().ok_or_else(|| SettingsError::UndefinedField {
            field: name.clone(),
            valid: sorted.clone(),
        })?;
        let item = self
            .fields
            .get_mut(*first)
            .ok_or_else(|| SettingsError::UndefinedField {
                field: dotted(&name, first),
                valid: sorted,
            })?;
        if rest.is_empty() {
            return Ok(item);
        }
        let item_name = item.name.clone();
        match item.current_subtree_mut()? {
            Some(subtree) => subtree.item_mut(rest),
            None => Err(SettingsError::UndefinedField {
                field: dotted(&item_name, rest[0]),
                valid: vec![],
            }),
        }
    }

    /// Assigns a value along `path`, rejecting values outside the range.
    pub fn set(
        &mut self,
        path: &[&str],
        value: impl Into<SettingValue>,
    ) -> Result<(), SettingsError> {
        self.item_mut(path)?.set(value.into())
    }

    /// [`Settings::set`] addressed by a dotted string.
    pub fn set_dotted(
        &mut self,
        dotted_name: &str,
        value: impl Into<SettingValue>,
    ) -> Result<(), SettingsError> {
        let path: Vec<&str> = dotted_name.split('.').collect();
        self.set(&path, value)
    }

    /// The assigned value at `path`, failing if the field is undefined or
    /// has no value yet.
    pub fn get(&self, path: &[&str]) -> Result<&SettingValue, SettingsError> {
        let item = self.item(path)?;
        item.value().ok_or_else(|| SettingsError::UndefinedValue {
            path: item.name.clone(),
        })
    }

    /// Tolerant read by dotted name: any undefined-field or undefined-value
    /// condition yields `None` instead of an error. A field explicitly set
    /// to the null sentinel also reads as `None`.
    ///
    /// This is the only sanctioned catch-and-default wrapper; everything
    /// downstream that can live with a missing setting goes through here.
    pub fn get_safe(&self, dotted_name: &str) -> Option<String> {
        let path: Vec<&str> = dotted_name.split('.').collect();
        match self.get(&path) {
            Ok(value) => value.as_str().map(str::to_string),
            Err(_) => None,
        }
    }

    /// [`Settings::get_safe`] with a fallback for the missing cases.
    pub fn get_safe_or(&self, dotted_name: &str, default: &str) -> String {
        self.get_safe(dotted_name)
            .unwrap_or_else(|| default.to_string())
    }

    /// Removes whole fields from this level of the schema. Reading a removed
    /// field afterwards is an undefined-field error.
    pub fn remove(&mut self, names: &[&str]) -> Result<(), SettingsError> {
        for name in names {
            if self.fields.shift_remove(*name).is_none() {
                return Err(SettingsError::UndefinedField {
                    field: dotted(&self.name, name),
                    valid: self.sorted_field_names(),
                });
            }
        }
        Ok(())
    }

    /// Removes the field a dotted name points at, if it exists along the
    /// currently assigned branch. Never fails; recipes call this
    /// unconditionally across platforms where the field may not exist.
    pub fn rm_safe(&mut self, dotted_name: &str) {
        let path: Vec<&str> = dotted_name.split('.').collect();
        let Some((last, parents)) = path.split_last() else {
            return;
        };
        if parents.is_empty() {
            self.fields.shift_remove(*last);
            return;
        }
        let Ok(item) = self.item_mut(parents) else {
            return;
        };
        if let Ok(Some(subtree)) = item.current_subtree_mut() {
            subtree.fields.shift_remove(*last);
        }
    }

    /// Narrows the allowed range of the item at `path` by removing `value`.
    pub fn remove_value(
        &mut self,
        path: &[&str],
        value: impl Into<SettingValue>,
    ) -> Result<(), SettingsError> {
        self.item_mut(path)?.remove_value(&value.into());
        Ok(())
    }

    /// Projects the schema down to `allow`, removing every field not listed
    /// and narrowing listed fields to the given values. Referencing a field
    /// or value outside the current schema is an error, as is constraining
    /// away a value that is currently assigned.
    pub fn constraint(&mut self, allow: &SettingsConstraint) -> Result<(), SettingsError> {
        for (field, _) in &allow.0 {
            if !self.fields.contains_key(field) {
                return Err(SettingsError::ConstraintField {
                    field: dotted(&self.name, field),
                    valid: self.sorted_field_names(),
                });
            }
        }
        self.fields.retain(|name, _| allow.0.contains_key(name));
        log::debug!(
            "constrained '{}' to fields [{}]",
            if self.name.is_empty() { "settings" } else { &self.name },
            allow.0.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        for (field, values) in &allow.0 {
            let Some(values) = values else { continue };
            let item = self.fields.get_mut(field).unwrap();
            for value in values {
                if !item.contains(value) {
                    return Err(SettingsError::ConstraintValue {
                        field: item.name.clone(),
                        value: value.to_string(),
                        possible: item.possible_values(),
                    });
                }
            }
            if let Some(current) = &item.value {
                if !values.contains(current) {
                    return Err(SettingsError::ConstraintValue {
                        field: item.name.clone(),
                        value: current.to_string(),
                        possible: values.iter().map(|v| v.to_string()).collect(),
                    });
                }
            }
            match &mut item.definition {
                SettingsDefinition::Any => {
                    item.definition = SettingsDefinition::Enum(values.clone());
                }
                SettingsDefinition::Enum(range) => range.retain(|v| values.contains(v)),
                SettingsDefinition::Map(map) => map.retain(|v, _| values.contains(v)),
            }
        }
        Ok(())
    }

    /// Non-destructive [`Settings::constraint`].
    pub fn constrained(&self, allow: &SettingsConstraint) -> Result<Settings, SettingsError> {
        let mut copy = self.clone();
        copy.constraint(allow)?;
        Ok(copy)
    }

    /// Asserts every reachable field along the assigned branches holds a
    /// value, unless its range contains the null sentinel. Runs before a
    /// package ID may be computed.
    pub fn validate(&self) -> Result<(), SettingsError> {
        for item in self.fields.values() {
            match &item.value {
                None => {
                    if !item.allows_null() {
                        return Err(SettingsError::UndefinedValue {
                            path: item.name.clone(),
                        });
                    }
                }
                Some(value) => {
                    if let SettingsDefinition::Map(map) = &item.definition {
                        if let Some(subtree) = map.get(value) {
                            subtree.validate()?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// The `(dotted name, value)` pairs currently assigned, following the
    /// chosen branch at each level. Order is field declaration order, not
    /// sorted; hashing sorts separately.
    pub fn values_list(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.collect_values(&mut out);
        out
    }

    fn collect_values(&self, out: &mut Vec<(String, String)>) {
        for item in self.fields.values() {
            let Some(value) = &item.value else { continue };
            out.push((item.name.clone(), value.to_string()));
            if let SettingsDefinition::Map(map) = &item.definition {
                if let Some(subtree) = map.get(value) {
                    subtree.collect_values(out);
                }
            }
        }
    }

    pub fn values(&self) -> Values {
        Values::from_list(self.values_list())
    }

    /// The `name=value` text form of the assigned values.
    pub fn dumps(&self) -> String {
        self.values().dumps()
    }

    /// A copy keeping the schema only where a value is assigned.
    pub fn copy_values(&self) -> Settings {
        let mut copy = self.clone();
        copy.prune_unset();
        copy
    }

    fn prune_unset(&mut self) {
        self.fields.retain(|_, item| item.value.is_some());
        for item in self.fields.values_mut() {
            if let SettingsDefinition::Map(map) = &mut item.definition {
                for subtree in map.values_mut() {
                    subtree.prune_unset();
                }
            }
        }
    }
}

/// The allow-list fed to [`Settings::constraint`]: field names, each with an
/// optional narrowed value range.
#[derive(Debug, Clone, Default)]
pub struct SettingsConstraint(IndexMap<String, Option<Vec<SettingValue>>>);

impl SettingsConstraint {
    /// Keeps the named fields with their full ranges.
    pub fn fields<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        SettingsConstraint(names.into_iter().map(|n| (n.to_string(), None)).collect())
    }

    /// Additionally narrows one field to the given values.
    pub fn with_values<'a>(mut self, field: &str, values: impl IntoIterator<Item = &'a str>) -> Self {
        self.0.insert(
            field.to_string(),
            Some(values.into_iter().map(SettingValue::from).collect()),
        );
        self
    }
}
