//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    /// Generate a valid project name
    pub fn project_name() -> impl Strategy<Value = String> {
        "[A-Za-z0-9][A-Za-z0-9_-]{0,30}"
    }

    /// Generate a block identifier usable as a plain YAML key
    pub fn block_id() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}".prop_filter("Reserved or YAML keyword", |s| {
            !matches!(s.as_str(), "all" | "null" | "true" | "false")
        })
    }

    /// Generate a patch file name as written by `git format-patch`
    pub fn patch_name() -> impl Strategy<Value = String> {
        (1u32..10000, "[a-z][a-z0-9-]{0,20}").prop_map(|(n, subject)| format!("{n:04}-{subject}.patch"))
    }

    /// Generate a remote repository URL
    pub fn repo_url() -> impl Strategy<Value = String> {
        (
            prop_oneof!["https", "ssh"],
            "[a-z]{3,10}",
            "[a-z]{2,5}",
            "[a-z0-9-]{1,20}",
        )
            .prop_map(|(scheme, domain, tld, repo)| format!("{scheme}://{domain}.{tld}/{repo}.git"))
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_block_id_generator(id in block_id()) {
            prop_assert!(!id.is_empty());
            prop_assert_ne!(id, "all");
        }

        #[test]
        fn test_patch_name_generator(name in patch_name()) {
            prop_assert!(name.ends_with(".patch"));
            prop_assert!(name[..4].chars().all(|c| c.is_ascii_digit()));
        }

        #[test]
        fn test_repo_url_generator(url in repo_url()) {
            prop_assert!(url.ends_with(".git"));
            prop_assert!(url.contains("://"));
        }
    }
}
