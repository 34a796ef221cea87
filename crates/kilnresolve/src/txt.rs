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

//! Text serialization of aggregated build info.
//!
//! One bracketed section per `(field, optional dependency, optional
//! configuration)` triple, newline-separated values:
//!
//! ```text
//! [includedirs]
//! /abs/path/include
//!
//! [includedirs_zlib]
//! include
//!
//! [libs_zlib:debug]
//! z_d
//! ```
//!
//! Parsing reconstructs the same object graph: `loads(dumps(x))` preserves
//! the rollup, the per-dependency records and the per-configuration
//! sub-objects. Generator properties are not part of this format.

use thiserror::Error;

use kilnutil::cpp_info::LIST_FIELDS;

use crate::deps::DepsCppInfo;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed section header at line {line}: '{text}'")]
    MalformedHeader { line: usize, text: String },
    #[error("unknown cpp-info field in section header at line {line}: '{field}'")]
    UnknownField { line: usize, field: String },
    #[error("value outside any section at line {line}: '{text}'")]
    ValueOutsideSection { line: usize, text: String },
}

/// Scalar pseudo-fields serialized alongside the list fields.
const SCALAR_FIELDS: [&str; 2] = ["rootpath", "sysroot"];

fn known_fields() -> Vec<&'static str> {
    let mut fields: Vec<&'static str> = LIST_FIELDS.to_vec();
    fields.push("requires");
    fields.extend(SCALAR_FIELDS);
    // Longest first, so 'system_libs_zlib' never parses as field 'libs'.
    fields.sort_by_key(|f| std::cmp::Reverse(f.len()));
    fields
}

/// Serializes with empty sections omitted.
pub fn dumps(deps: &DepsCppInfo) -> String {
    dumps_filtered(deps, true)
}

/// Serializes; with `filter_empty` disabled every section is emitted even
/// when empty, which keeps the structure diffable.
pub fn dumps_filtered(deps: &DepsCppInfo, filter_empty: bool) -> String {
    let mut sections: Vec<(String, Vec<String>)> = Vec::new();

    for field in LIST_FIELDS {
        sections.push((
            field.to_string(),
            deps.rollup().field_as_strings(field).unwrap_or_default(),
        ));
    }
    sections.push((
        "sysroot".to_string(),
        deps.rollup().sysroot.clone().into_iter().collect(),
    ));
    for (config, rollup) in deps.configs() {
        for field in LIST_FIELDS {
            sections.push((
                format!("{field}:{config}"),
                rollup.field_as_strings(field).unwrap_or_default(),
            ));
        }
    }

    for (name, info) in deps.dependencies() {
        sections.push((format!("rootpath_{name}"), vec![info.rootpath.clone()]));
        sections.push((
            format!("sysroot_{name}"),
            info.root.sysroot.clone().into_iter().collect(),
        ));
        for field in LIST_FIELDS.iter().chain(std::iter::once(&"requires")) {
            sections.push((
                format!("{field}_{name}"),
                info.root.field(field).cloned().unwrap_or_default(),
            ));
        }
        for (config, component) in info.configs() {
            for field in LIST_FIELDS.iter().chain(std::iter::once(&"requires")) {
                sections.push((
                    format!("{field}_{name}:{config}"),
                    component.field(field).cloned().unwrap_or_default(),
                ));
            }
        }
    }

    let mut out = String::new();
    for (header, values) in sections {
        let empty = values.iter().all(String::is_empty);
        if empty && filter_empty {
            continue;
        }
        out.push_str(&format!("[{header}]\n"));
        for value in values {
            if !value.is_empty() {
                out.push_str(&value);
                out.push('\n');
            }
        }
        out.push('\n');
    }
    out
}

struct SectionHeader {
    field: &'static str,
    dep: Option<String>,
    config: Option<String>,
}

fn parse_header(inner: &str, line: usize) -> Result<SectionHeader, ParseError> {
    let (body, config) = match inner.split_once(':') {
        Some((body, config)) if !config.is_empty() => (body, Some(config.to_string())),
        Some(_) => {
            return Err(ParseError::MalformedHeader {
                line,
                text: format!("[{inner}]"),
            });
        }
        None => (inner, None),
    };
    for field in known_fields() {
        if body == field {
            return Ok(SectionHeader {
                field,
                dep: None,
                config,
            });
        }
        if let Some(dep) = body.strip_prefix(field).and_then(|r| r.strip_prefix('_')) {
            if dep.is_empty() {
                break;
            }
            return Ok(SectionHeader {
                field,
                dep: Some(dep.to_string()),
                config,
            });
        }
    }
    Err(ParseError::UnknownField {
        line,
        field: body.to_string(),
    })
}

fn apply_section(
    deps: &mut DepsCppInfo,
    header: &SectionHeader,
    values: Vec<String>,
    line: usize,
) -> Result<(), ParseError> {
    let scalar = |values: Vec<String>| values.into_iter().next();
    match (&header.dep, &header.config) {
        (None, None) => match header.field {
            "sysroot" => deps.rollup_mut().sysroot = scalar(values),
            "rootpath" | "requires" => {
                return Err(ParseError::UnknownField {
                    line,
                    field: header.field.to_string(),
                });
            }
            field => {
                deps.rollup_mut().set_field_from_strings(field, values);
            }
        },
        (None, Some(config)) => match header.field {
            "sysroot" => deps.config_mut(config).sysroot = scalar(values),
            "rootpath" | "requires" => {
                return Err(ParseError::UnknownField {
                    line,
                    field: format!("{}:{config}", header.field),
                });
            }
            field => {
                deps.config_mut(config).set_field_from_strings(field, values);
            }
        },
        (Some(dep), None) => {
            let info = deps.dep_mut(dep);
            match header.field {
                "rootpath" => info.rootpath = scalar(values).unwrap_or_default(),
                "sysroot" => info.root.sysroot = scalar(values),
                field => *info.root.field_mut(field).unwrap() = values,
            }
        }
        (Some(dep), Some(config)) => {
            if header.field == "rootpath" {
                return Err(ParseError::UnknownField {
                    line,
                    field: format!("{}_{dep}:{config}", header.field),
                });
            }
            let component = deps.dep_mut(dep).config_mut(config);
            match header.field {
                "sysroot" => component.sysroot = scalar(values),
                field => *component.field_mut(field).unwrap() = values,
            }
        }
    }
    Ok(())
}

/// Parses the section format back into a [`DepsCppInfo`].
pub fn loads(text: &str) -> Result<DepsCppInfo, ParseError> {
    let mut deps = DepsCppInfo::new();
    let mut current: Option<(SectionHeader, usize)> = None;
    let mut values: Vec<String> = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(inner) = line.strip_prefix('[') {
            let Some(inner) = inner.strip_suffix(']') else {
                return Err(ParseError::MalformedHeader {
                    line: idx + 1,
                    text: line.to_string(),
                });
            };
            if let Some((header, header_line)) = current.take() {
                apply_section(&mut deps, &header, std::mem::take(&mut values), header_line)?;
            }
            current = Some((parse_header(inner, idx + 1)?, idx + 1));
            continue;
        }
        if current.is_none() {
            return Err(ParseError::ValueOutsideSection {
                line: idx + 1,
                text: line.to_string(),
            });
        }
        values.push(line.to_string());
    }
    if let Some((header, header_line)) = current.take() {
        apply_section(&mut deps, &header, values, header_line)?;
    }
    Ok(deps)
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use expect_test::expect;

    use super::*;
    use kilnutil::cpp_info::CppInfo;

    fn sample() -> DepsCppInfo {
        let mut zlib = CppInfo::new("zlib");
        zlib.rootpath = "/cache/zlib".to_string();
        zlib.root.libs = vec!["z".to_string()];
        zlib.root.defines = vec!["ZLIB_STATIC".to_string()];
        zlib.config_mut("debug").libs = vec!["z_d".to_string()];

        let mut openssl = CppInfo::new("openssl");
        openssl.rootpath = "/cache/openssl".to_string();
        openssl.component_mut("ssl").libs = vec!["ssl".to_string()];
        openssl.component_mut("ssl").requires =
            vec!["crypto".to_string(), "zlib::zlib".to_string()];
        openssl.component_mut("crypto").libs = vec!["crypto".to_string()];

        let mut deps = DepsCppInfo::new();
        deps.update(&zlib, "zlib").unwrap();
        deps.update(&openssl, "openssl").unwrap();
        deps
    }

    #[test]
    fn dumps_sections() {
        let text = dumps(&sample());
        expect![[r#"
            [includedirs]
            /cache/zlib/include
            /cache/openssl/include

            [libdirs]
            /cache/zlib/lib
            /cache/openssl/lib

            [bindirs]
            /cache/zlib/bin
            /cache/openssl/bin

            [resdirs]
            /cache/zlib/res
            /cache/openssl/res

            [libs]
            z
            ssl
            crypto

            [defines]
            ZLIB_STATIC

            [libs:debug]
            z_d

            [rootpath_zlib]
            /cache/zlib

            [includedirs_zlib]
            include

            [libdirs_zlib]
            lib

            [bindirs_zlib]
            bin

            [resdirs_zlib]
            res

            [libs_zlib]
            z

            [defines_zlib]
            ZLIB_STATIC

            [libs_zlib:debug]
            z_d

            [rootpath_openssl]
            /cache/openssl

            [includedirs_openssl]
            include

            [libdirs_openssl]
            lib

            [bindirs_openssl]
            bin

            [resdirs_openssl]
            res

            [libs_openssl]
            ssl
            crypto

            [requires_openssl]
            zlib::zlib

        "#]]
        .assert_eq(&text);
    }

    #[test]
    fn loads_reconstructs_the_object_graph() {
        let original = sample();
        let parsed = loads(&dumps(&original)).unwrap();

        assert_eq!(parsed.include_paths(), original.include_paths());
        assert_eq!(parsed.libs(), original.libs());
        assert_eq!(parsed.defines(), original.defines());
        assert_eq!(
            parsed.config("debug").unwrap().libs,
            original.config("debug").unwrap().libs
        );
        let names: Vec<&str> = parsed.dependencies().map(|(n, _)| n).collect();
        assert_eq!(names, ["zlib", "openssl"]);
        assert_eq!(
            parsed.dependency("openssl").unwrap().root.requires,
            ["zlib::zlib"]
        );
        assert_eq!(parsed.dependency("zlib").unwrap().rootpath, "/cache/zlib");

        // Re-serializing the parsed graph is a fixed point.
        assert_eq!(dumps(&parsed), dumps(&original));
    }

    #[test]
    fn strict_mode_keeps_empty_sections() {
        let deps = DepsCppInfo::new();
        assert_eq!(dumps(&deps), "");
        let strict = dumps_filtered(&deps, false);
        assert!(strict.contains("[includedirs]\n"));
        assert!(strict.contains("[sysroot]\n"));
    }

    #[test]
    fn parses_the_documented_example() {
        let text = "\
[includedirs]
/abs/path/include

[includedirs_mypkg]
/abs/other/include

[libs_mypkg:debug]
mypkg_d
";
        let deps = loads(text).unwrap();
        assert_eq!(deps.include_paths(), [PathBuf::from("/abs/path/include")]);
        assert_eq!(
            deps.dependency("mypkg").unwrap().root.includedirs,
            ["/abs/other/include"]
        );
        assert_eq!(
            deps.dependency("mypkg")
                .unwrap()
                .config("debug")
                .unwrap()
                .libs,
            ["mypkg_d"]
        );
    }

    #[test]
    fn dep_names_with_underscores_parse() {
        let text = "[system_libs_my_pkg]\npthread\n";
        let deps = loads(text).unwrap();
        assert_eq!(
            deps.dependency("my_pkg").unwrap().root.system_libs,
            ["pthread"]
        );
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let err = loads("[includedirs\n/p\n").unwrap_err();
        expect!["malformed section header at line 1: '[includedirs'"].assert_eq(&err.to_string());

        let err = loads("[nonsense_zlib]\nx\n").unwrap_err();
        expect!["unknown cpp-info field in section header at line 1: 'nonsense_zlib'"]
            .assert_eq(&err.to_string());

        let err = loads("stray value\n").unwrap_err();
        expect!["value outside any section at line 1: 'stray value'"].assert_eq(&err.to_string());
    }
}
