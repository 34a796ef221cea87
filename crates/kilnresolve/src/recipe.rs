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

//! The data interface the core consumes from a recipe.
//!
//! The core never executes recipe build logic; it only reads a node's
//! constrained configuration and lets the recipe populate cpp-info and
//! adjust its binary identity.

use kilnutil::cpp_info::CppInfo;
use kilnutil::options::PackageOptions;
use kilnutil::settings::Settings;

use crate::package_id::BinaryInfo;

pub trait Recipe {
    fn settings(&self) -> &Settings;

    fn options(&self) -> &PackageOptions;

    /// Populates the package's cpp-info. Called once per node after the
    /// binary is available.
    fn package_info(&self, cpp_info: &mut CppInfo);

    /// Adjusts the binary identity. The default identity is the full
    /// settings and options values; the hook receives a copy and may erase
    /// or rewrite entries to widen compatibility.
    fn package_id(&self, _info: &mut BinaryInfo) {}
}

/// A plain-data recipe carrying its configuration and cpp-info verbatim.
/// Mostly useful for tests and for tooling that materializes recipes from
/// serialized data instead of executing them.
#[derive(Debug, Clone)]
pub struct BasicRecipe {
    pub settings: Settings,
    pub options: PackageOptions,
    pub cpp_info: CppInfo,
    pub package_id_hook: Option<fn(&mut BinaryInfo)>,
}

impl BasicRecipe {
    pub fn new(settings: Settings, options: PackageOptions, cpp_info: CppInfo) -> Self {
        BasicRecipe {
            settings,
            options,
            cpp_info,
            package_id_hook: None,
        }
    }
}

impl Recipe for BasicRecipe {
    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn options(&self) -> &PackageOptions {
        &self.options
    }

    fn package_info(&self, cpp_info: &mut CppInfo) {
        *cpp_info = self.cpp_info.clone();
    }

    fn package_id(&self, info: &mut BinaryInfo) {
        if let Some(hook) = self.package_id_hook {
            hook(info);
        }
    }
}
