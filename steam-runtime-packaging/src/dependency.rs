// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Flattening of dependency fields into package names.

Full relationship syntax is described at
<https://www.debian.org/doc/debian-policy/ch-relationships.html>. Runtime
assembly only needs to know *which* packages a package pulls in, so a field
like `libc6 (>= 2.15) | libc6.1, libx11-6 [amd64]` is reduced to the set
`{libc6, libx11-6}`: the first alternative of each group, with version
constraints, architecture restrictions, build profiles and multi-arch
qualifiers stripped.
*/

use {
    once_cell::sync::Lazy,
    regex::Regex,
    std::collections::BTreeSet,
};

/// Package name at the start of a single relation.
///
/// Terminates at whitespace or at the opening of a version constraint,
/// architecture restriction, build profile or multi-arch qualifier.
static RE_PACKAGE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?P<package>[^\s\[(<:,|]+)").expect("package name regex should compile")
});

/// Extract the package name of a single relation such as `foo (>= 1.0)`.
///
/// Returns [None] for an empty relation.
pub fn relation_package_name(relation: &str) -> Option<&str> {
    RE_PACKAGE_NAME
        .captures(relation)
        .and_then(|caps| caps.name("package"))
        .map(|m| m.as_str())
}

/// Reduce a dependency field value to the set of names it depends on.
///
/// Only the first alternative of each `|` group is considered. Empty groups
/// are ignored and duplicates collapse.
pub fn dependency_names(field: &str) -> BTreeSet<String> {
    field
        .split(',')
        .filter_map(|group| group.split('|').next())
        .filter_map(relation_package_name)
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(s: &str) -> Vec<String> {
        dependency_names(s).into_iter().collect()
    }

    #[test]
    fn first_alternative_only() {
        assert_eq!(names("foo (>= 1.0) | bar, baz"), vec!["baz", "foo"]);
    }

    #[test]
    fn strips_qualifiers() {
        assert_eq!(
            names("libc6 (>= 2.15), libx11-6 [amd64 i386], python:any, perl <!nocheck>"),
            vec!["libc6", "libx11-6", "perl", "python"]
        );
        assert_eq!(names("libfoo2(=1.0)"), vec!["libfoo2"]);
    }

    #[test]
    fn duplicates_and_empties() {
        assert_eq!(names("a, a (>> 1), , b |c"), vec!["a", "b"]);
        assert!(names("").is_empty());
        assert!(names(" , ").is_empty());
    }

    #[test]
    fn idempotent_on_flattened_output() {
        let once = dependency_names("foo (>= 1.0) | bar, baz");
        let joined = once.iter().cloned().collect::<Vec<_>>().join(", ");

        assert_eq!(dependency_names(&joined), once);
    }

    #[test]
    fn multiline_fields() {
        assert_eq!(names("libc6,\n libfoo2 (>= 2)"), vec!["libc6", "libfoo2"]);
    }
}
