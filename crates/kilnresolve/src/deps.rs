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

//! Consumer-side aggregation of dependency cpp-info.
//!
//! A [`DepsCppInfo`] accumulates, for one consumer, the already
//! self-aggregated cpp-info of every transitive dependency: a rolling total
//! of absolute directories and flags, the per-dependency records, and the
//! same rollup scoped per build configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kilnutil::cpp_info::{merge_lists, Component, CppInfo, CppInfoError};
use kilnutil::reference::PkgReference;

use crate::graph::{DepsGraph, NodeId};

#[derive(Debug, Error)]
pub enum DepsError {
    #[error(transparent)]
    Component(#[from] CppInfoError),
    #[error("no cpp-info recorded for graph node '{reference}'")]
    MissingInfo { reference: PkgReference },
}

/// The rolling totals of one consumer: directories resolved to absolute
/// paths, flags and libraries deduplicated in merge order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepsRollup {
    pub include_paths: Vec<PathBuf>,
    pub lib_paths: Vec<PathBuf>,
    pub bin_paths: Vec<PathBuf>,
    pub res_paths: Vec<PathBuf>,
    pub build_paths: Vec<PathBuf>,
    pub framework_paths: Vec<PathBuf>,
    pub libs: Vec<String>,
    pub system_libs: Vec<String>,
    pub defines: Vec<String>,
    pub cflags: Vec<String>,
    pub cxxflags: Vec<String>,
    pub sharedlinkflags: Vec<String>,
    pub exelinkflags: Vec<String>,
    pub frameworks: Vec<String>,
    pub sysroot: Option<String>,
}

impl DepsRollup {
    fn dir_field_mut(&mut self, name: &str) -> Option<&mut Vec<PathBuf>> {
        match name {
            "includedirs" => Some(&mut self.include_paths),
            "libdirs" => Some(&mut self.lib_paths),
            "bindirs" => Some(&mut self.bin_paths),
            "resdirs" => Some(&mut self.res_paths),
            "builddirs" => Some(&mut self.build_paths),
            "frameworkdirs" => Some(&mut self.framework_paths),
            _ => None,
        }
    }

    fn dir_field(&self, name: &str) -> Option<&Vec<PathBuf>> {
        match name {
            "includedirs" => Some(&self.include_paths),
            "libdirs" => Some(&self.lib_paths),
            "bindirs" => Some(&self.bin_paths),
            "resdirs" => Some(&self.res_paths),
            "builddirs" => Some(&self.build_paths),
            "frameworkdirs" => Some(&self.framework_paths),
            _ => None,
        }
    }

    fn value_field_mut(&mut self, name: &str) -> Option<&mut Vec<String>> {
        match name {
            "libs" => Some(&mut self.libs),
            "system_libs" => Some(&mut self.system_libs),
            "defines" => Some(&mut self.defines),
            "cflags" => Some(&mut self.cflags),
            "cxxflags" => Some(&mut self.cxxflags),
            "sharedlinkflags" => Some(&mut self.sharedlinkflags),
            "exelinkflags" => Some(&mut self.exelinkflags),
            "frameworks" => Some(&mut self.frameworks),
            _ => None,
        }
    }

    fn value_field(&self, name: &str) -> Option<&Vec<String>> {
        match name {
            "libs" => Some(&self.libs),
            "system_libs" => Some(&self.system_libs),
            "defines" => Some(&self.defines),
            "cflags" => Some(&self.cflags),
            "cxxflags" => Some(&self.cxxflags),
            "sharedlinkflags" => Some(&self.sharedlinkflags),
            "exelinkflags" => Some(&self.exelinkflags),
            "frameworks" => Some(&self.frameworks),
            _ => None,
        }
    }

    /// The rollup list named by a cpp-info field, rendered as strings.
    /// Used by the text serialization.
    pub fn field_as_strings(&self, name: &str) -> Option<Vec<String>> {
        if let Some(paths) = self.dir_field(name) {
            return Some(
                paths
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect(),
            );
        }
        self.value_field(name).cloned()
    }

    /// Overwrites the rollup list named by a cpp-info field. Returns false
    /// for an unknown field name.
    pub fn set_field_from_strings(&mut self, name: &str, values: Vec<String>) -> bool {
        if let Some(paths) = self.dir_field_mut(name) {
            *paths = values.into_iter().map(PathBuf::from).collect();
            return true;
        }
        if let Some(list) = self.value_field_mut(name) {
            *list = values;
            return true;
        }
        false
    }

    /// Folds one dependency's (already aggregated) record into the totals.
    ///
    /// Directories and libraries are appended after what is already
    /// accumulated; flags and defines are prepended ahead of it, so each new
    /// dependency's flags take precedence over previously merged ones. The
    /// asymmetry is deliberate and load-bearing: generators and build
    /// helpers rely on this exact ordering for `-I`/`-D`/`-l` emission.
    fn update_from(&mut self, component: &Component, rootpath: &str) {
        let root = Path::new(rootpath);
        for name in ["includedirs", "libdirs", "bindirs", "resdirs", "builddirs", "frameworkdirs"]
        {
            let abs: Vec<PathBuf> = component
                .field(name)
                .unwrap()
                .iter()
                .map(|d| root.join(d))
                .collect();
            let target = self.dir_field_mut(name).unwrap();
            *target = merge_lists(target, &abs);
        }
        for name in ["libs", "system_libs", "frameworks"] {
            let target = self.value_field_mut(name).unwrap();
            *target = merge_lists(target, component.field(name).unwrap());
        }
        for name in ["defines", "cflags", "cxxflags", "sharedlinkflags", "exelinkflags"] {
            let target = self.value_field_mut(name).unwrap();
            *target = merge_lists(component.field(name).unwrap(), target);
        }
        if self.sysroot.is_none() {
            self.sysroot = component.sysroot.clone();
        }
    }
}

/// The accumulated view of every dependency of one consumer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepsCppInfo {
    rollup: DepsRollup,
    deps: IndexMap<String, CppInfo>,
    configs: IndexMap<String, DepsRollup>,
}

impl DepsCppInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one dependency's cpp-info under `pkg_name`, aggregating
    /// its components first, and folds it into the rolling totals and the
    /// per-configuration totals.
    pub fn update(&mut self, dep_cpp_info: &CppInfo, pkg_name: &str) -> Result<(), CppInfoError> {
        let aggregated = dep_cpp_info.aggregated_components()?;
        self.rollup
            .update_from(&aggregated.root, &aggregated.rootpath);
        for (config, component) in aggregated.configs() {
            self.configs
                .entry(config.to_string())
                .or_default()
                .update_from(component, &aggregated.rootpath);
        }
        log::debug!("aggregated cpp-info of '{pkg_name}' into consumer totals");
        self.deps.insert(pkg_name.to_string(), aggregated);
        Ok(())
    }

    pub fn rollup(&self) -> &DepsRollup {
        &self.rollup
    }

    pub fn include_paths(&self) -> &[PathBuf] {
        &self.rollup.include_paths
    }

    pub fn lib_paths(&self) -> &[PathBuf] {
        &self.rollup.lib_paths
    }

    pub fn bin_paths(&self) -> &[PathBuf] {
        &self.rollup.bin_paths
    }

    pub fn build_paths(&self) -> &[PathBuf] {
        &self.rollup.build_paths
    }

    pub fn libs(&self) -> &[String] {
        &self.rollup.libs
    }

    pub fn system_libs(&self) -> &[String] {
        &self.rollup.system_libs
    }

    pub fn defines(&self) -> &[String] {
        &self.rollup.defines
    }

    pub fn cflags(&self) -> &[String] {
        &self.rollup.cflags
    }

    pub fn cxxflags(&self) -> &[String] {
        &self.rollup.cxxflags
    }

    pub fn sharedlinkflags(&self) -> &[String] {
        &self.rollup.sharedlinkflags
    }

    pub fn exelinkflags(&self) -> &[String] {
        &self.rollup.exelinkflags
    }

    /// The registered dependencies in merge order.
    pub fn dependencies(&self) -> impl Iterator<Item = (&str, &CppInfo)> {
        self.deps.iter().map(|(n, i)| (n.as_str(), i))
    }

    pub fn dependency(&self, pkg_name: &str) -> Option<&CppInfo> {
        self.deps.get(pkg_name)
    }

    /// The rolling totals scoped to one build configuration.
    pub fn config(&self, name: &str) -> Option<&DepsRollup> {
        self.configs.get(name)
    }

    pub fn configs(&self) -> impl Iterator<Item = (&str, &DepsRollup)> {
        self.configs.iter().map(|(n, r)| (n.as_str(), r))
    }

    // Reconstruction hooks for the text serialization.

    pub(crate) fn rollup_mut(&mut self) -> &mut DepsRollup {
        &mut self.rollup
    }

    pub(crate) fn config_mut(&mut self, name: &str) -> &mut DepsRollup {
        self.configs.entry(name.to_string()).or_default()
    }

    pub(crate) fn dep_mut(&mut self, pkg_name: &str) -> &mut CppInfo {
        self.deps.entry(pkg_name.to_string()).or_insert_with(|| {
            let mut info = CppInfo::new(pkg_name);
            // Parsed records carry explicit fields; no conventional layout.
            info.root = Component::default();
            info
        })
    }
}

/// Builds the [`DepsCppInfo`] of `consumer` from a resolved graph and the
/// per-node cpp-info records, walking the transitive dependencies in
/// breadth-first order (direct dependencies first, in declaration order).
pub fn aggregate_deps(
    graph: &DepsGraph,
    consumer: NodeId,
    infos: &HashMap<NodeId, CppInfo>,
) -> Result<DepsCppInfo, DepsError> {
    let mut out = DepsCppInfo::new();
    for node in graph.closure(consumer) {
        let reference = graph.reference(node);
        let info = infos.get(&node).ok_or_else(|| DepsError::MissingInfo {
            reference: reference.clone(),
        })?;
        out.update(info, &reference.name)?;
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;

    fn dep_info(name: &str, rootpath: &str) -> CppInfo {
        let mut info = CppInfo::new(name);
        info.rootpath = rootpath.to_string();
        info.root.libs = vec![name.to_string()];
        info
    }

    #[test]
    fn directories_append_flags_prepend() {
        let mut deps = DepsCppInfo::new();

        let mut first = dep_info("zlib", "/cache/zlib");
        first.root.cxxflags = vec!["-Dy".to_string()];
        deps.update(&first, "zlib").unwrap();

        let mut second = dep_info("openssl", "/cache/openssl");
        second.root.cxxflags = vec!["-Dx".to_string()];
        deps.update(&second, "openssl").unwrap();

        assert_eq!(
            deps.include_paths(),
            [
                PathBuf::from("/cache/zlib/include"),
                PathBuf::from("/cache/openssl/include")
            ]
        );
        // New dependency's flags come before previously accumulated ones.
        assert_eq!(deps.cxxflags(), ["-Dx", "-Dy"]);
        // Libraries append like directories.
        assert_eq!(deps.libs(), ["zlib", "openssl"]);
    }

    #[test]
    fn same_relative_dir_under_different_roots_stays_distinct() {
        let mut deps = DepsCppInfo::new();
        deps.update(&dep_info("a", "/cache/a"), "a").unwrap();
        deps.update(&dep_info("b", "/cache/b"), "b").unwrap();
        assert_eq!(
            deps.include_paths(),
            [
                PathBuf::from("/cache/a/include"),
                PathBuf::from("/cache/b/include")
            ]
        );
    }

    #[test]
    fn duplicate_absolute_paths_are_suppressed() {
        let mut deps = DepsCppInfo::new();
        let mut info = dep_info("a", "/cache/a");
        info.root.includedirs = vec!["include".to_string(), "include".to_string()];
        deps.update(&info, "a").unwrap();
        assert_eq!(deps.include_paths(), [PathBuf::from("/cache/a/include")]);
    }

    #[test]
    fn components_are_aggregated_before_registration() {
        let mut info = CppInfo::new("openssl");
        info.rootpath = "/cache/openssl".to_string();
        info.component_mut("ssl").libs = vec!["ssl".to_string()];
        info.component_mut("ssl").requires = vec!["crypto".to_string()];
        info.component_mut("crypto").libs = vec!["crypto".to_string()];

        let mut deps = DepsCppInfo::new();
        deps.update(&info, "openssl").unwrap();
        // Most-dependent component first.
        assert_eq!(deps.libs(), ["ssl", "crypto"]);
        assert!(!deps.dependency("openssl").unwrap().has_components());
    }

    #[test]
    fn per_config_rollups_follow_the_same_rules() {
        let mut first = dep_info("zlib", "/cache/zlib");
        first.config_mut("debug").libs = vec!["z_d".to_string()];
        first.config_mut("debug").cxxflags = vec!["-Dy".to_string()];
        let mut second = dep_info("openssl", "/cache/openssl");
        second.config_mut("debug").libs = vec!["ssl_d".to_string()];
        second.config_mut("debug").cxxflags = vec!["-Dx".to_string()];

        let mut deps = DepsCppInfo::new();
        deps.update(&first, "zlib").unwrap();
        deps.update(&second, "openssl").unwrap();

        let debug = deps.config("debug").unwrap();
        assert_eq!(debug.libs, ["z_d", "ssl_d"]);
        assert_eq!(debug.cxxflags, ["-Dx", "-Dy"]);
        assert!(deps.config("release").is_none());
    }

    #[test]
    fn aggregate_deps_walks_the_closure() {
        let mut graph = DepsGraph::new();
        let app = graph.add_node("app/1.0.0".parse().unwrap());
        let ssl = graph.add_node("openssl/3.1.0".parse().unwrap());
        let zlib = graph.add_node("zlib/1.2.13".parse().unwrap());
        graph.add_dependency(app, ssl);
        graph.add_dependency(app, zlib);
        graph.add_dependency(ssl, zlib);

        let mut infos = HashMap::new();
        infos.insert(ssl, dep_info("openssl", "/cache/openssl"));
        infos.insert(zlib, dep_info("zlib", "/cache/zlib"));

        let deps = aggregate_deps(&graph, app, &infos).unwrap();
        let names: Vec<&str> = deps.dependencies().map(|(n, _)| n).collect();
        assert_eq!(names, ["openssl", "zlib"]);
        assert_eq!(deps.libs(), ["openssl", "zlib"]);

        // A node without recorded cpp-info is an error, not a silent skip.
        let empty = HashMap::new();
        assert!(matches!(
            aggregate_deps(&graph, app, &empty),
            Err(DepsError::MissingInfo { .. })
        ));
    }
}
