//! Image naming and build descriptor discovery
//!
//! Image names are derived from the repository URL, the location and name
//! of the Dockerfile, and the revision being built:
//!
//! `https://example.com/org/svc.git` + `worker/Dockerfile.cron` @ `abcdef1234`
//! with registry `gcr.io/proj` becomes `gcr.io/proj/org-svc-worker-cron:abcdef12`.
//!
//! The target registry rejects names with more than two `/` separators, so
//! everything past the second `/` is joined with `-` instead.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Number of revision characters used as the image tag
pub const TAG_LENGTH: usize = 8;

const DESCRIPTOR_NAME: &str = "Dockerfile";

/// A build descriptor found in a working copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// Absolute path to the Dockerfile
    pub path: PathBuf,
    /// Dockerfile name, e.g. `Dockerfile.worker`
    pub file_name: String,
    /// Directory relative to the repository root, `/`-separated, empty at root
    pub sub_path: String,
}

impl Descriptor {
    /// Directory the build runs in (the descriptor's own directory)
    pub fn context_dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }

    /// `sub/path/Dockerfile.x` relative to the repository root
    pub fn relative_path(&self) -> String {
        if self.sub_path.is_empty() {
            self.file_name.clone()
        } else {
            format!("{}/{}", self.sub_path, self.file_name)
        }
    }

    pub fn image_name(&self, registry: &str, repo_url: &str, revision: &str) -> String {
        image_name(registry, repo_url, &self.sub_path, &self.file_name, revision)
    }
}

/// Check that a repository URL is usable for cloning and naming
pub fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();

    if url.is_empty() {
        return Err(Error::Validation("repository URL is empty".to_string()));
    }
    if url.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!("{:?} contains whitespace", url)));
    }

    if let Some((scheme, rest)) = url.split_once("://") {
        let scheme_ok = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        let host = rest.split('/').next().unwrap_or_default();
        let local = scheme.eq_ignore_ascii_case("file");
        if !scheme_ok || (host.is_empty() && !local) {
            return Err(Error::Validation(format!("{} is not a valid URL", url)));
        }
    } else if !url.contains(':') && !url.starts_with('/') {
        return Err(Error::Validation(format!(
            "{} is neither a URL nor a host:path remote",
            url
        )));
    }

    if path_segments(url).is_empty() {
        return Err(Error::Validation(format!("{} has no repository path", url)));
    }

    Ok(())
}

/// Path segments of a repository URL without scheme, host or `.git`
///
/// Handles `scheme://host/path` as well as scp-like `user@host:path` remotes.
pub fn path_segments(url: &str) -> Vec<&str> {
    let url = url.trim();

    let path = match url.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path),
        None if url.starts_with('/') => Some(url),
        None => url.split_once(':').map(|(_, path)| path),
    };

    let Some(path) = path else {
        return Vec::new();
    };

    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);

    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// First [`TAG_LENGTH`] characters of a revision identifier
pub fn revision_tag(revision: &str) -> &str {
    match revision.char_indices().nth(TAG_LENGTH) {
        Some((index, _)) => &revision[..index],
        None => revision,
    }
}

/// Variant suffix of a descriptor file name (`Dockerfile.worker` -> `worker`)
pub fn descriptor_suffix(file_name: &str) -> Option<&str> {
    file_name
        .split_once('.')
        .map(|(_, suffix)| suffix)
        .filter(|suffix| !suffix.is_empty())
}

/// Derive the registry-qualified image name and tag
pub fn image_name(
    registry: &str,
    repo_url: &str,
    sub_path: &str,
    descriptor: &str,
    revision: &str,
) -> String {
    let mut name = registry.trim().trim_end_matches('/').to_string();

    for segment in path_segments(repo_url) {
        if !name.is_empty() {
            name.push('/');
        }
        name.push_str(segment);
    }

    let sub_path = sub_path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("-");
    if !sub_path.is_empty() {
        name.push('-');
        name.push_str(&sub_path);
    }

    if let Some(suffix) = descriptor_suffix(descriptor) {
        name.push('-');
        name.push_str(suffix);
    }

    name.push(':');
    name.push_str(revision_tag(revision));

    collapse_separators(&name)
}

/// Keep at most two `/` by hyphen-joining everything after the second
fn collapse_separators(name: &str) -> String {
    let mut parts = name.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(first), Some(second), Some(rest)) => {
            format!("{}/{}/{}", first, second, rest.replace('/', "-"))
        }
        _ => name.to_string(),
    }
}

fn is_descriptor(file_name: &str) -> bool {
    if file_name == DESCRIPTOR_NAME {
        return true;
    }
    match file_name.strip_prefix(DESCRIPTOR_NAME) {
        Some(rest) => rest.len() > 1 && rest.starts_with('.') && !rest.ends_with(".dockerignore"),
        None => false,
    }
}

/// Find every Dockerfile in a working copy, in a stable order
pub fn find_descriptors(root: &Path, max_depth: usize) -> Result<Vec<Descriptor>> {
    let mut descriptors = Vec::new();

    let walker = WalkDir::new(root)
        .max_depth(max_depth.max(1))
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::io(path, e.into())
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !is_descriptor(&file_name) {
            continue;
        }

        let sub_path = entry
            .path()
            .parent()
            .and_then(|dir| dir.strip_prefix(root).ok())
            .map(|dir| {
                dir.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default();

        descriptors.push(Descriptor {
            path: entry.path().to_path_buf(),
            file_name,
            sub_path,
        });
    }

    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_default_descriptor_name() {
        let name = image_name(
            "gcr.io/proj",
            "https://example.com/org/svc.git",
            "",
            "Dockerfile",
            "abcdef1234",
        );
        assert_eq!(name, "gcr.io/proj/org-svc:abcdef12");
    }

    #[test]
    fn test_variant_descriptor_name() {
        let name = image_name(
            "gcr.io/proj",
            "https://example.com/org/svc.git",
            "",
            "Dockerfile.worker",
            "abcdef1234",
        );
        assert_eq!(name, "gcr.io/proj/org-svc-worker:abcdef12");
    }

    #[test]
    fn test_sub_path_is_hyphen_joined() {
        let name = image_name(
            "gcr.io/proj",
            "https://example.com/org/svc.git",
            "services/api",
            "Dockerfile",
            "abcdef1234",
        );
        assert_eq!(name, "gcr.io/proj/org-svc-services-api:abcdef12");
    }

    #[test]
    fn test_deep_group_paths_collapse() {
        let name = image_name(
            "gcr.io/proj",
            "https://gitlab.example.com/group/subgroup/team/svc.git",
            "",
            "Dockerfile",
            "ecaf0d06834ec132",
        );
        assert_eq!(name, "gcr.io/proj/group-subgroup-team-svc:ecaf0d06");
    }

    #[test]
    fn test_single_segment_registry_keeps_slashes() {
        let name = image_name("gcr.io/", "https://h/org/svc", "", "Dockerfile", "abc");
        assert_eq!(name, "gcr.io/org/svc:abc");
    }

    #[test]
    fn test_scp_style_remote() {
        let name = image_name(
            "gcr.io/proj",
            "git@example.com:org/svc.git",
            "",
            "Dockerfile",
            "abcdef1234",
        );
        assert_eq!(name, "gcr.io/proj/org-svc:abcdef12");
    }

    #[test]
    fn test_short_revision_is_used_whole() {
        assert_eq!(revision_tag("abc"), "abc");
        assert_eq!(revision_tag("abcdef1234"), "abcdef12");
        assert_eq!(revision_tag(""), "");
    }

    #[test]
    fn test_descriptor_suffix_uses_first_dot() {
        assert_eq!(descriptor_suffix("Dockerfile"), None);
        assert_eq!(descriptor_suffix("Dockerfile.worker"), Some("worker"));
        assert_eq!(descriptor_suffix("Dockerfile.worker.prod"), Some("worker.prod"));
        assert_eq!(descriptor_suffix("Dockerfile."), None);
    }

    #[test]
    fn test_path_segments() {
        assert_eq!(path_segments("https://h/org/svc.git"), vec!["org", "svc"]);
        assert_eq!(path_segments("https://h/org/svc/"), vec!["org", "svc"]);
        assert_eq!(path_segments("ssh://git@h:22/org/svc.git"), vec!["org", "svc"]);
        assert_eq!(path_segments("git@h:org/svc.git"), vec!["org", "svc"]);
        assert!(path_segments("https://h").is_empty());
        assert_eq!(
            path_segments("file:///srv/git/org/svc.git"),
            vec!["srv", "git", "org", "svc"]
        );
        assert_eq!(path_segments("/srv/git/svc"), vec!["srv", "git", "svc"]);
    }

    #[test]
    fn test_local_remote_name() {
        let name = image_name(
            "gcr.io/proj",
            "file:///srv/git/org/svc.git",
            "",
            "Dockerfile",
            "abcdef1234",
        );
        assert_eq!(name, "gcr.io/proj/srv-git-org-svc:abcdef12");
    }

    #[test]
    fn test_descriptor_relative_path() {
        let root = Descriptor {
            path: PathBuf::from("/w/Dockerfile.api"),
            file_name: "Dockerfile.api".to_string(),
            sub_path: String::new(),
        };
        let nested = Descriptor {
            path: PathBuf::from("/w/api/Dockerfile"),
            file_name: "Dockerfile".to_string(),
            sub_path: "api".to_string(),
        };
        assert_eq!(root.relative_path(), "Dockerfile.api");
        assert_eq!(nested.relative_path(), "api/Dockerfile");
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com/org/svc.git").is_ok());
        assert!(validate_url("git@example.com:org/svc.git").is_ok());
        assert!(validate_url("file:///srv/git/org/svc.git").is_ok());
        assert!(validate_url("/srv/git/org/svc.git").is_ok());
        assert_matches!(validate_url("file://"), Err(Error::Validation(_)));
        assert_matches!(validate_url(""), Err(Error::Validation(_)));
        assert_matches!(validate_url("https://"), Err(Error::Validation(_)));
        assert_matches!(validate_url("https://example.com"), Err(Error::Validation(_)));
        assert_matches!(validate_url("not a url"), Err(Error::Validation(_)));
        assert_matches!(validate_url("plainword"), Err(Error::Validation(_)));
    }

    #[quickcheck]
    fn prop_never_more_than_two_slashes(
        registry: String,
        url: String,
        sub_path: String,
        descriptor: String,
        revision: String,
    ) -> bool {
        image_name(&registry, &url, &sub_path, &descriptor, &revision)
            .matches('/')
            .count()
            <= 2
    }

    #[quickcheck]
    fn prop_deep_urls_never_exceed_two_slashes(segments: Vec<u8>) -> bool {
        let path = segments
            .iter()
            .map(|n| format!("s{}", n))
            .collect::<Vec<_>>()
            .join("/");
        let url = format!("https://example.com/{}.git", path);
        image_name("gcr.io/proj/nested", &url, "a/b/c", "Dockerfile.x", "0123456789")
            .matches('/')
            .count()
            <= 2
    }

    #[test]
    fn test_find_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("services/api")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("Dockerfile"), "FROM scratch").unwrap();
        std::fs::write(root.join("Dockerfile.worker"), "FROM scratch").unwrap();
        std::fs::write(root.join("Dockerfile.worker.dockerignore"), "*").unwrap();
        std::fs::write(root.join("services/api/Dockerfile"), "FROM scratch").unwrap();
        std::fs::write(root.join(".git/Dockerfile"), "FROM scratch").unwrap();
        std::fs::write(root.join("README.md"), "hi").unwrap();

        let found = find_descriptors(root, 4).unwrap();
        let summary: Vec<_> = found
            .iter()
            .map(|d| (d.sub_path.as_str(), d.file_name.as_str()))
            .collect();

        assert_eq!(
            summary,
            vec![
                ("", "Dockerfile"),
                ("", "Dockerfile.worker"),
                ("services/api", "Dockerfile"),
            ]
        );
        assert_eq!(found[2].context_dir(), root.join("services/api"));
        assert_eq!(
            found[2].image_name("gcr.io/proj", "https://h/org/svc.git", "abcdef1234"),
            "gcr.io/proj/org-svc-services-api:abcdef12"
        );
    }

    #[test]
    fn test_find_descriptors_respects_depth() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/Dockerfile"), "FROM scratch").unwrap();

        assert!(find_descriptors(dir.path(), 2).unwrap().is_empty());
        assert_eq!(find_descriptors(dir.path(), 3).unwrap().len(), 1);
    }

    #[test]
    fn test_repository_without_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.go"), "package main").unwrap();

        assert!(find_descriptors(dir.path(), 4).unwrap().is_empty());
    }
}
