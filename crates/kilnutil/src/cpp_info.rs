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

//! Per-package build metadata (cpp-info).
//!
//! A package exposes directories, libraries and flags to its consumers,
//! either as a single record or split into named components with
//! intra-package `requires` edges. Consumers that do not understand
//! components read the [`CppInfo::aggregated_components`] rollup instead.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CppInfoError {
    #[error("components of '{package}' require each other in a cycle, involving [{}]", .components.join(", "))]
    ComponentCycle {
        package: String,
        components: Vec<String>,
    },
    #[error("component '{component}' of '{package}' requires undeclared component '{required}'")]
    MissingRequire {
        package: String,
        component: String,
        required: String,
    },
}

/// The list-valued cpp-info fields, in canonical order. Shared with the text
/// serialization, which names its sections after these.
pub const LIST_FIELDS: [&str; 14] = [
    "includedirs",
    "libdirs",
    "bindirs",
    "resdirs",
    "builddirs",
    "frameworkdirs",
    "libs",
    "system_libs",
    "defines",
    "cflags",
    "cxxflags",
    "sharedlinkflags",
    "exelinkflags",
    "frameworks",
];

/// The subset of [`LIST_FIELDS`] holding directories.
pub const DIR_FIELDS: [&str; 6] = [
    "includedirs",
    "libdirs",
    "bindirs",
    "resdirs",
    "builddirs",
    "frameworkdirs",
];

/// Generator properties whose values are paths and therefore participate in
/// [`CppInfo::set_relative_base_folder`].
const PATH_PROPERTIES: [&str; 1] = ["cmake_build_modules"];

/// Appends the entries of `extra` not already present in `base`. Order is
/// preserve-then-append; duplicates are suppressed, never reordered.
pub fn merge_lists<T: Clone + PartialEq>(base: &[T], extra: &[T]) -> Vec<T> {
    let mut out = base.to_vec();
    for item in extra {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// One component's build metadata. Also used for the package-level record
/// and for per-configuration records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub includedirs: Vec<String>,
    pub libdirs: Vec<String>,
    pub bindirs: Vec<String>,
    pub resdirs: Vec<String>,
    pub builddirs: Vec<String>,
    pub frameworkdirs: Vec<String>,
    pub libs: Vec<String>,
    pub system_libs: Vec<String>,
    pub defines: Vec<String>,
    pub cflags: Vec<String>,
    pub cxxflags: Vec<String>,
    pub sharedlinkflags: Vec<String>,
    pub exelinkflags: Vec<String>,
    pub frameworks: Vec<String>,
    /// Component references: `other` for a component of the same package,
    /// `pkg::comp` for a component of a dependency.
    pub requires: Vec<String>,
    pub sysroot: Option<String>,
    /// Generator-specific hints (target names, file names). Scoped to where
    /// they are set; never aggregated across components.
    pub properties: IndexMap<String, Vec<String>>,
}

impl Component {
    /// The conventional package layout: headers in `include`, libraries in
    /// `lib`, executables in `bin`, resources in `res`.
    pub fn with_default_dirs() -> Self {
        Component {
            includedirs: vec!["include".to_string()],
            libdirs: vec!["lib".to_string()],
            bindirs: vec!["bin".to_string()],
            resdirs: vec!["res".to_string()],
            ..Default::default()
        }
    }

    pub fn field(&self, name: &str) -> Option<&Vec<String>> {
        match name {
            "includedirs" => Some(&self.includedirs),
            "libdirs" => Some(&self.libdirs),
            "bindirs" => Some(&self.bindirs),
            "resdirs" => Some(&self.resdirs),
            "builddirs" => Some(&self.builddirs),
            "frameworkdirs" => Some(&self.frameworkdirs),
            "libs" => Some(&self.libs),
            "system_libs" => Some(&self.system_libs),
            "defines" => Some(&self.defines),
            "cflags" => Some(&self.cflags),
            "cxxflags" => Some(&self.cxxflags),
            "sharedlinkflags" => Some(&self.sharedlinkflags),
            "exelinkflags" => Some(&self.exelinkflags),
            "frameworks" => Some(&self.frameworks),
            "requires" => Some(&self.requires),
            _ => None,
        }
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Vec<String>> {
        match name {
            "includedirs" => Some(&mut self.includedirs),
            "libdirs" => Some(&mut self.libdirs),
            "bindirs" => Some(&mut self.bindirs),
            "resdirs" => Some(&mut self.resdirs),
            "builddirs" => Some(&mut self.builddirs),
            "frameworkdirs" => Some(&mut self.frameworkdirs),
            "libs" => Some(&mut self.libs),
            "system_libs" => Some(&mut self.system_libs),
            "defines" => Some(&mut self.defines),
            "cflags" => Some(&mut self.cflags),
            "cxxflags" => Some(&mut self.cxxflags),
            "sharedlinkflags" => Some(&mut self.sharedlinkflags),
            "exelinkflags" => Some(&mut self.exelinkflags),
            "frameworks" => Some(&mut self.frameworks),
            "requires" => Some(&mut self.requires),
            _ => None,
        }
    }

    /// The `requires` entries naming components of the same package.
    pub fn same_package_requires(&self) -> impl Iterator<Item = &str> {
        self.requires
            .iter()
            .filter(|r| !r.contains("::"))
            .map(String::as_str)
    }

    /// The `requires` entries naming components of other packages.
    pub fn cross_package_requires(&self) -> impl Iterator<Item = &str> {
        self.requires
            .iter()
            .filter(|r| r.contains("::"))
            .map(String::as_str)
    }

    /// Field-by-field append-if-absent merge. `sysroot` keeps the current
    /// value if already set; properties are updated with the newer value
    /// winning on key collision.
    pub fn merge_from(&mut self, other: &Component) {
        for name in LIST_FIELDS {
            let merged = merge_lists(self.field(name).unwrap(), other.field(name).unwrap());
            *self.field_mut(name).unwrap() = merged;
        }
        self.requires = merge_lists(&self.requires, &other.requires);
        if self.sysroot.is_none() {
            self.sysroot = other.sysroot.clone();
        }
        for (key, value) in &other.properties {
            self.properties.insert(key.clone(), value.clone());
        }
    }

    pub fn set_property(&mut self, name: &str, value: impl Into<String>) {
        self.properties.insert(name.to_string(), vec![value.into()]);
    }

    pub fn set_property_list<'a>(
        &mut self,
        name: &str,
        values: impl IntoIterator<Item = &'a str>,
    ) {
        self.properties.insert(
            name.to_string(),
            values.into_iter().map(str::to_string).collect(),
        );
    }

    pub fn get_property(&self, name: &str) -> Option<&[String]> {
        self.properties.get(name).map(Vec::as_slice)
    }

    fn prefix_paths(&mut self, folder: &Path) {
        for name in DIR_FIELDS {
            for dir in self.field_mut(name).unwrap() {
                *dir = folder.join(&*dir).to_string_lossy().into_owned();
            }
        }
        for (key, value) in &mut self.properties {
            if PATH_PROPERTIES.contains(&key.as_str()) {
                for path in value {
                    *path = folder.join(&*path).to_string_lossy().into_owned();
                }
            }
        }
    }
}

/// A package's full cpp-info: the package-level record, optional named
/// components and per-configuration records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CppInfo {
    pub name: String,
    /// Absolute root of the package folder; directory fields are relative
    /// to it until resolved by the consumer-side aggregation.
    pub rootpath: String,
    pub root: Component,
    components: IndexMap<String, Component>,
    configs: IndexMap<String, Component>,
}

impl CppInfo {
    pub fn new(name: impl Into<String>) -> Self {
        CppInfo {
            name: name.into(),
            rootpath: String::new(),
            root: Component::with_default_dirs(),
            components: IndexMap::new(),
            configs: IndexMap::new(),
        }
    }

    /// The named component, created on first access so recipes can assign
    /// into components without declaring them.
    pub fn component_mut(&mut self, name: &str) -> &mut Component {
        self.components
            .entry(name.to_string())
            .or_insert_with(Component::with_default_dirs)
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.get(name)
    }

    pub fn components(&self) -> impl Iterator<Item = (&str, &Component)> {
        self.components.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn has_components(&self) -> bool {
        !self.components.is_empty()
    }

    /// The per-configuration record (`debug`, `release`, ...), created on
    /// first access. Configuration records start empty, not with the
    /// conventional directory layout.
    pub fn config_mut(&mut self, name: &str) -> &mut Component {
        self.configs.entry(name.to_string()).or_default()
    }

    pub fn config(&self, name: &str) -> Option<&Component> {
        self.configs.get(name)
    }

    pub fn configs(&self) -> impl Iterator<Item = (&str, &Component)> {
        self.configs.iter().map(|(n, c)| (n.as_str(), c))
    }

    /// Components ordered dependencies-first: a component never appears
    /// before one it requires. Kahn-style peeling; a remainder that cannot
    /// be placed is a cycle, reported instead of looping.
    pub fn sorted_components(&self) -> Result<Vec<(&str, &Component)>, CppInfoError> {
        for (name, component) in &self.components {
            for required in component.same_package_requires() {
                if !self.components.contains_key(required) {
                    return Err(CppInfoError::MissingRequire {
                        package: self.name.clone(),
                        component: name.clone(),
                        required: required.to_string(),
                    });
                }
            }
        }
        let mut pending: Vec<&str> = self.components.keys().map(String::as_str).collect();
        let mut sorted: Vec<&str> = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let placed_before = sorted.len();
            pending.retain(|name| {
                let component = &self.components[*name];
                let ready = component
                    .same_package_requires()
                    .all(|r| sorted.contains(&r));
                if ready {
                    sorted.push(name);
                }
                !ready
            });
            if sorted.len() == placed_before {
                return Err(CppInfoError::ComponentCycle {
                    package: self.name.clone(),
                    components: pending.iter().map(|s| s.to_string()).collect(),
                });
            }
        }
        Ok(sorted
            .into_iter()
            .map(|name| (name, &self.components[name]))
            .collect())
    }

    /// Collapses the named components into a single package-level record,
    /// walking them most-dependent-first so that a component's entries come
    /// before those of the components it requires.
    ///
    /// Cross-package requires survive the rollup; same-package requires are
    /// internal wiring and disappear. Generator properties are taken from
    /// the package-level record only, since hints like a target name are
    /// meaningful at a single scope.
    pub fn aggregated_components(&self) -> Result<CppInfo, CppInfoError> {
        if self.components.is_empty() {
            return Ok(self.clone());
        }
        let sorted = self.sorted_components()?;
        let mut aggregate = Component::default();
        for (_, component) in sorted.iter().rev() {
            for name in LIST_FIELDS {
                let merged = merge_lists(
                    aggregate.field(name).unwrap(),
                    component.field(name).unwrap(),
                );
                *aggregate.field_mut(name).unwrap() = merged;
            }
            for required in component.cross_package_requires() {
                if !aggregate.requires.iter().any(|r| r == required) {
                    aggregate.requires.push(required.to_string());
                }
            }
            if aggregate.sysroot.is_none() {
                aggregate.sysroot = component.sysroot.clone();
            }
        }
        if let Some(sysroot) = &self.root.sysroot {
            aggregate.sysroot = Some(sysroot.clone());
        }
        aggregate.properties = self.root.properties.clone();
        Ok(CppInfo {
            name: self.name.clone(),
            rootpath: self.rootpath.clone(),
            root: aggregate,
            components: IndexMap::new(),
            configs: self.configs.clone(),
        })
    }

    /// Merges another package-shaped cpp-info into this one, field by field.
    /// Components and configurations present only in `other` are created.
    pub fn merge(&mut self, other: &CppInfo) {
        self.root.merge_from(&other.root);
        for (name, component) in &other.components {
            match self.components.get_mut(name) {
                Some(existing) => existing.merge_from(component),
                None => {
                    self.components.insert(name.clone(), component.clone());
                }
            }
        }
        for (name, config) in &other.configs {
            match self.configs.get_mut(name) {
                Some(existing) => existing.merge_from(config),
                None => {
                    self.configs.insert(name.clone(), config.clone());
                }
            }
        }
        if self.rootpath.is_empty() {
            self.rootpath = other.rootpath.clone();
        }
    }

    /// Prefixes every directory field (and path-valued generator property)
    /// with `folder`, turning recipe-declared relative paths into absolute
    /// ones. Call at most once per object; a second application would
    /// double-prefix.
    pub fn set_relative_base_folder(&mut self, folder: &Path) {
        self.root.prefix_paths(folder);
        for component in self.components.values_mut() {
            component.prefix_paths(folder);
        }
        for config in self.configs.values_mut() {
            config.prefix_paths(folder);
        }
    }

    /// The package-level directories resolved against `rootpath`.
    pub fn abs_paths(&self, field: &str) -> Vec<PathBuf> {
        let root = Path::new(&self.rootpath);
        self.root
            .field(field)
            .map(|dirs| dirs.iter().map(|d| root.join(d)).collect())
            .unwrap_or_default()
    }
}
