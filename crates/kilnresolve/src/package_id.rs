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

//! Binary identity: the package-ID hash.
//!
//! A package ID is the digest of a node's final settings and options
//! values. The recipe's `package_id` hook receives a copy of those values
//! and may widen compatibility by erasing entries (for example "any
//! compiler version produces the same binary"); the original build-time
//! settings are never touched.

use thiserror::Error;

use kilnutil::hash::sha256_hex;
use kilnutil::options::{OptionsError, PackageOptions};
use kilnutil::settings::{Settings, SettingsError};
use kilnutil::values::Values;

use crate::recipe::Recipe;

#[derive(Debug, Error)]
pub enum PackageIdError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Options(#[from] OptionsError),
}

/// The mutable copy of a node's configuration handed to the `package_id`
/// hook. Mutating it narrows or widens the binary identity only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinaryInfo {
    pub settings: Values,
    pub options: Values,
}

impl BinaryInfo {
    /// Copies the current values out of the node's settings and options.
    pub fn new(settings: &Settings, options: &PackageOptions) -> Self {
        BinaryInfo {
            settings: settings.values(),
            options: options.values(),
        }
    }

    /// The canonical text this identity hashes: sorted `name=value` lines
    /// under `[settings]` and `[options]` headers.
    pub fn dumps(&self) -> String {
        let mut out = String::from("[settings]\n");
        for (name, value) in self.settings.sorted() {
            out.push_str(&format!("{name}={value}\n"));
        }
        out.push_str("[options]\n");
        for (name, value) in self.options.sorted() {
            out.push_str(&format!("{name}={value}\n"));
        }
        out
    }

    pub fn package_id(&self) -> String {
        sha256_hex(self.dumps())
    }
}

/// Computes a node's package ID: validates its configuration, copies it
/// into a [`BinaryInfo`], runs the recipe's `package_id` hook on the copy
/// and hashes the result.
pub fn compute_package_id(recipe: &dyn Recipe) -> Result<String, PackageIdError> {
    recipe.settings().validate()?;
    recipe.options().validate()?;
    let mut info = BinaryInfo::new(recipe.settings(), recipe.options());
    recipe.package_id(&mut info);
    Ok(info.package_id())
}

#[cfg(test)]
mod test {
    use kilnutil::cpp_info::CppInfo;

    use super::*;
    use crate::recipe::BasicRecipe;

    const SCHEMA: &str = r#"
os: [Linux, Windows]
compiler:
  gcc:
    version: ["13", "14"]
build_type: [null, Debug, Release]
"#;

    fn recipe() -> BasicRecipe {
        let mut settings = Settings::loads(SCHEMA).unwrap();
        settings.set(&["os"], "Linux").unwrap();
        settings.set(&["compiler"], "gcc").unwrap();
        settings.set(&["compiler", "version"], "13").unwrap();
        settings.set(&["build_type"], "Release").unwrap();
        let mut options = PackageOptions::new();
        options.declare("shared", ["True", "False"], Some("False"));
        BasicRecipe::new(settings, options, CppInfo::new("pkg"))
    }

    #[test]
    fn identical_values_identical_id() {
        assert_eq!(
            compute_package_id(&recipe()).unwrap(),
            compute_package_id(&recipe()).unwrap()
        );
    }

    #[test]
    fn any_single_value_changes_the_id() {
        let base = compute_package_id(&recipe()).unwrap();

        let mut other = recipe();
        other.settings.set(&["compiler", "version"], "14").unwrap();
        assert_ne!(base, compute_package_id(&other).unwrap());

        let mut other = recipe();
        other.options.set("shared", "True").unwrap();
        assert_ne!(base, compute_package_id(&other).unwrap());

        // Explicit null is an identity of its own, distinct from absent.
        let mut other = recipe();
        other.settings.set(&["build_type"], "None").unwrap();
        assert_ne!(base, compute_package_id(&other).unwrap());
    }

    #[test]
    fn unvalidated_settings_cannot_be_hashed() {
        let mut broken = recipe();
        broken.settings = Settings::loads(SCHEMA).unwrap();
        assert!(matches!(
            compute_package_id(&broken),
            Err(PackageIdError::Settings(SettingsError::UndefinedValue { .. }))
        ));
    }

    #[test]
    fn package_id_hook_mutates_a_copy_only() {
        let mut relaxed = recipe();
        relaxed.package_id_hook = Some(|info: &mut BinaryInfo| {
            // Any gcc version produces a compatible binary.
            info.settings.remove("compiler.version");
        });
        let mut same_but_newer = recipe();
        same_but_newer.package_id_hook = relaxed.package_id_hook;
        same_but_newer
            .settings
            .set(&["compiler", "version"], "14")
            .unwrap();

        assert_eq!(
            compute_package_id(&relaxed).unwrap(),
            compute_package_id(&same_but_newer).unwrap()
        );
        // The build-time settings still hold the real version.
        assert_eq!(
            relaxed.settings.get_safe("compiler.version").as_deref(),
            Some("13")
        );
    }
}
