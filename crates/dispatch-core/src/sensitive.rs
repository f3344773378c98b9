//! The fixed, case-sensitive predicate deciding whether a forward-slash path
//! is sensitive and must never leave a workspace in a published commit.
//!
//! Rules are conjunction-free: a single match marks the file sensitive.

/// Whether `path` (forward-slash separated, relative to the workspace root)
/// matches one of the fixed sensitive-path rules.
pub fn is_sensitive_path(path: &str) -> bool {
    let segments: Vec<&str> = path.split('/').collect();
    let Some(&last) = segments.last() else {
        return false;
    };

    if last.starts_with(".env") {
        return true;
    }
    if last.starts_with("id_rsa") {
        return true;
    }
    if last == "credentials.json" || last == "serviceAccountKey.json" {
        return true;
    }
    if segments.iter().any(|&segment| segment == "secrets") {
        return true;
    }
    if last.ends_with(".key") || last.ends_with(".pem") {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_variants_are_sensitive() {
        assert!(is_sensitive_path(".env"));
        assert!(is_sensitive_path(".env.local"));
        assert!(is_sensitive_path("config/.env"));
    }

    #[test]
    fn id_rsa_variants_are_sensitive() {
        assert!(is_sensitive_path("keys/id_rsa"));
        assert!(is_sensitive_path("keys/id_rsa.pub"));
    }

    #[test]
    fn named_credential_files_are_sensitive() {
        assert!(is_sensitive_path("credentials.json"));
        assert!(is_sensitive_path("gcp/serviceAccountKey.json"));
    }

    #[test]
    fn any_secrets_directory_segment_is_sensitive() {
        assert!(is_sensitive_path("app/secrets/db.yaml"));
        assert!(!is_sensitive_path("app/secretsmanager/db.yaml"));
    }

    #[test]
    fn key_and_pem_suffixes_are_sensitive() {
        assert!(is_sensitive_path("tls/server.key"));
        assert!(is_sensitive_path("tls/server.pem"));
    }

    #[test]
    fn ordinary_source_files_are_not_sensitive() {
        assert!(!is_sensitive_path("src/main.ts"));
        assert!(!is_sensitive_path("README.md"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert!(!is_sensitive_path("ID_RSA"));
        assert!(!is_sensitive_path("CREDENTIALS.JSON"));
    }
}
