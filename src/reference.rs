//! Image reference parsing.
//!
//! Parses raw references like `myregistry.local:5000/testing/test-image:v1`
//! into structured components. Unlike a registry client, the parser never
//! normalizes against a default registry: the engine indexes local images by
//! whatever repo string the user gave it, so the residual string is preserved
//! as-is.

/// Digest separator inside a reference.
const DIGEST_MARKER: &str = "@sha256:";

/// Tag appended when a reference carries neither tag nor digest.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
///
/// All fields default to empty. At most one of `tag`/`digest` is meaningfully
/// set per resolution attempt; when both are empty the reference defaults to
/// `latest` at pull time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageIdentifier {
    /// Registry host (e.g., "myregistry.local:5000"), empty when unset
    pub registry: String,
    /// Repository path after registry/digest/tag stripping
    pub repo: String,
    /// Tag (e.g., "jessie"), empty when unset
    pub tag: String,
    /// sha256 digest hex, without the "sha256:" prefix, empty when unset
    pub digest: String,
    /// Requested platform, empty when unset
    pub platform: String,
}

impl ImageIdentifier {
    /// Parse a raw image reference.
    ///
    /// Each extraction strips its matched substring from the working string,
    /// so the steps must run in order: registry, digest, tag, residual repo.
    /// Empty input yields all-empty fields rather than an error.
    pub fn parse(full_name: &str) -> Self {
        let mut id = Self::default();
        let mut rest = full_name.trim().to_string();
        if rest.is_empty() {
            return id;
        }

        // A registry host is only plausible when a path separator is present
        // and the string carries a dot or a colon somewhere.
        if rest.contains('/') && (rest.contains('.') || rest.contains(':')) {
            if let Some((first, remainder)) = rest.split_once('/') {
                if first.contains('.') || first.contains(':') {
                    id.registry = first.to_string();
                    rest = remainder.to_string();
                }
            }
        }

        if let Some((head, digest)) = rest.split_once(DIGEST_MARKER) {
            id.digest = digest.to_string();
            rest = head.to_string();
        }

        if let Some(colon) = rest.rfind(':') {
            id.tag = rest[colon + 1..].to_string();
            rest.truncate(colon);
        }

        id.repo = rest;
        id
    }

    /// Normalize a raw reference for pull/export: append `:latest` when
    /// neither tag nor digest is present, otherwise return it unchanged.
    ///
    /// The resolver and the export pipeline both normalize independently, so
    /// this is the single place the rule lives.
    pub fn normalized_reference(full_name: &str) -> String {
        let full_name = full_name.trim();
        let id = Self::parse(full_name);
        if id.tag.is_empty() && id.digest.is_empty() {
            format!("{}:{}", full_name, DEFAULT_TAG)
        } else {
            full_name.to_string()
        }
    }
}

impl std::fmt::Display for ImageIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.registry.is_empty() {
            write!(f, "{}/", self.registry)?;
        }
        write!(f, "{}", self.repo)?;
        if !self.tag.is_empty() {
            write!(f, ":{}", self.tag)?;
        }
        if !self.digest.is_empty() {
            write!(f, "{}{}", DIGEST_MARKER, self.digest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_name() {
        let id = ImageIdentifier::parse("debian");
        assert_eq!(id.registry, "");
        assert_eq!(id.repo, "debian");
        assert_eq!(id.tag, "");
        assert_eq!(id.digest, "");
    }

    #[test]
    fn test_parse_name_with_tag() {
        let id = ImageIdentifier::parse("debian:jessie");
        assert_eq!(id.registry, "");
        assert_eq!(id.repo, "debian");
        assert_eq!(id.tag, "jessie");
        assert_eq!(id.digest, "");
    }

    #[test]
    fn test_parse_digest() {
        let id = ImageIdentifier::parse("ubuntu@sha256:abc123");
        assert_eq!(id.repo, "ubuntu");
        assert_eq!(id.digest, "abc123");
        assert_eq!(id.tag, "");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let id = ImageIdentifier::parse("myregistry.local:5000/testing/test-image");
        assert_eq!(id.registry, "myregistry.local:5000");
        assert_eq!(id.repo, "testing/test-image");
        assert_eq!(id.tag, "");
        assert_eq!(id.digest, "");
    }

    #[test]
    fn test_parse_registry_tag_and_digest() {
        let id = ImageIdentifier::parse("ghcr.io/org/image:v1@sha256:deadbeef");
        assert_eq!(id.registry, "ghcr.io");
        assert_eq!(id.repo, "org/image");
        assert_eq!(id.tag, "v1");
        assert_eq!(id.digest, "deadbeef");
    }

    #[test]
    fn test_parse_user_repo_without_registry() {
        // No dot or colon anywhere, so the first segment is not a host.
        let id = ImageIdentifier::parse("myuser/myimage");
        assert_eq!(id.registry, "");
        assert_eq!(id.repo, "myuser/myimage");
    }

    #[test]
    fn test_parse_dotted_tag_keeps_plain_first_segment() {
        // The dot lives in the tag, not the first segment, so no registry.
        let id = ImageIdentifier::parse("myuser/myimage:1.25");
        assert_eq!(id.registry, "");
        assert_eq!(id.repo, "myuser/myimage");
        assert_eq!(id.tag, "1.25");
    }

    #[test]
    fn test_parse_empty_input() {
        let id = ImageIdentifier::parse("");
        assert_eq!(id, ImageIdentifier::default());
    }

    #[test]
    fn test_parse_whitespace_input() {
        let id = ImageIdentifier::parse("  debian  ");
        assert_eq!(id.repo, "debian");
    }

    #[test]
    fn test_no_separator_means_no_registry() {
        for name in ["debian", "test_image", "a"] {
            let id = ImageIdentifier::parse(name);
            assert_eq!(id.registry, "", "unexpected registry for '{}'", name);
        }
    }

    #[test]
    fn test_reparse_repo_is_idempotent() {
        let first = ImageIdentifier::parse("myregistry.local:5000/testing/test-image:v2");
        let second = ImageIdentifier::parse(&first.repo);
        assert_eq!(second.repo, first.repo);
        assert_eq!(second.registry, "");
        assert_eq!(second.tag, "");
        assert_eq!(second.digest, "");
    }

    #[test]
    fn test_normalized_reference_appends_latest() {
        assert_eq!(
            ImageIdentifier::normalized_reference("debian"),
            "debian:latest"
        );
    }

    #[test]
    fn test_normalized_reference_keeps_tag() {
        assert_eq!(
            ImageIdentifier::normalized_reference("debian:jessie"),
            "debian:jessie"
        );
    }

    #[test]
    fn test_normalized_reference_keeps_digest_only() {
        // A digest-only reference must not gain a :latest suffix.
        assert_eq!(
            ImageIdentifier::normalized_reference("ubuntu@sha256:abc123"),
            "ubuntu@sha256:abc123"
        );
    }

    #[test]
    fn test_display_round_trip() {
        let id = ImageIdentifier::parse("ghcr.io/org/image:v1");
        assert_eq!(format!("{}", id), "ghcr.io/org/image:v1");
    }
}
