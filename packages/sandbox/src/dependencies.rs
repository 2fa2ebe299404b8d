// ABOUTME: Static scan of program text for external package references
// ABOUTME: Finds import/require specifiers and reduces them to installable package names

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

/// `import x from 'pkg'`, `import { a } from "pkg"`, `export * from 'pkg'`
static FROM_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bfrom\s*['"]([^'"\s]+)['"]"#).expect("valid regex"));

/// Side-effect import: `import 'pkg'`
static BARE_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*import\s*['"]([^'"\s]+)['"]"#).expect("valid regex"));

/// `import('pkg')`
static DYNAMIC_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bimport\s*\(\s*['"]([^'"\s]+)['"]\s*\)"#).expect("valid regex"));

/// `require('pkg')`
static REQUIRE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\brequire\s*\(\s*['"]([^'"\s]+)['"]\s*\)"#).expect("valid regex"));

const NODE_BUILTINS: &[&str] = &[
    "assert",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "domain",
    "events",
    "fs",
    "http",
    "http2",
    "https",
    "inspector",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "sys",
    "timers",
    "tls",
    "trace_events",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "wasi",
    "worker_threads",
    "zlib",
];

/// Return the sorted, deduplicated external packages `source` references.
///
/// Specifiers that are relative, absolute, scheme-qualified (`node:fs`,
/// `https://...`), Node builtins, or part of `preinstalled` are skipped.
pub fn detect_dependencies(source: &str, preinstalled: &BTreeMap<String, String>) -> Vec<String> {
    let mut packages = BTreeSet::new();

    for line in source.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("//") || trimmed.starts_with('*') {
            continue;
        }

        let specifiers = FROM_CLAUSE
            .captures_iter(line)
            .chain(BARE_IMPORT.captures_iter(line))
            .chain(DYNAMIC_IMPORT.captures_iter(line))
            .chain(REQUIRE_CALL.captures_iter(line))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()));

        for specifier in specifiers {
            if let Some(package) = package_name(specifier) {
                if !preinstalled.contains_key(&package) {
                    packages.insert(package);
                }
            }
        }
    }

    packages.into_iter().collect()
}

/// Reduce a module specifier to its installable package name, or `None` if
/// it does not name an external package.
fn package_name(specifier: &str) -> Option<String> {
    if specifier.is_empty()
        || specifier.starts_with('.')
        || specifier.starts_with('/')
        || specifier.contains(':')
    {
        return None;
    }

    let mut segments = specifier.split('/');
    let first = segments.next()?;

    let name = if first.starts_with('@') {
        let scoped = segments.next().filter(|s| !s.is_empty())?;
        if first.len() < 2 {
            return None;
        }
        format!("{}/{}", first, scoped)
    } else {
        first.to_string()
    };

    if NODE_BUILTINS.contains(&name.as_str()) {
        return None;
    }

    Some(name)
}
