//! Sender trust and identifier hygiene.

/// Normalize a domain for allowlist comparisons.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn domain_matches(host: &str, allowed: &[String]) -> bool {
    let host = normalize_domain(host);
    if host.is_empty() {
        return false;
    }
    allowed.iter().any(|raw| {
        let allowed = normalize_domain(raw);
        !allowed.is_empty() && (host == allowed || host.ends_with(&format!(".{allowed}")))
    })
}

/// Sender belongs to the firm itself (subdomains included).
pub fn is_internal_sender(domain: Option<&str>, internal_domains: &[String]) -> bool {
    domain.is_some_and(|d| domain_matches(d, internal_domains))
}

/// External sender on the auto-registration allowlist. Internal senders
/// never qualify, even if a domain appears on both lists.
pub fn is_trusted_external_sender(
    domain: Option<&str>,
    internal_domains: &[String],
    trusted_domains: &[String],
) -> bool {
    !is_internal_sender(domain, internal_domains)
        && domain.is_some_and(|d| domain_matches(d, trusted_domains))
}

/// Keep matter IDs filesystem-safe and deterministic.
pub fn sanitize_matter_id(matter_id: &str) -> String {
    matter_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

/// Storage names may not escape their parent folder.
pub fn is_safe_path_segment(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed != "."
        && trimmed != ".."
        && !trimmed.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn internal_domains_include_subdomains() {
        let internal = domains(&["firm.test"]);
        assert!(is_internal_sender(Some("firm.test"), &internal));
        assert!(is_internal_sender(Some("Mail.Firm.Test."), &internal));
        assert!(!is_internal_sender(Some("notfirm.test"), &internal));
        assert!(!is_internal_sender(None, &internal));
    }

    #[test]
    fn trusted_senders_exclude_internal_ones() {
        let internal = domains(&["firm.test"]);
        let trusted = domains(&["courts.utah.gov", "firm.test"]);
        assert!(is_trusted_external_sender(
            Some("courts.utah.gov"),
            &internal,
            &trusted
        ));
        assert!(!is_trusted_external_sender(
            Some("firm.test"),
            &internal,
            &trusted
        ));
        assert!(!is_trusted_external_sender(
            Some("gmail.test"),
            &internal,
            &trusted
        ));
    }

    #[test]
    fn sanitize_matter_id_removes_unsafe_chars() {
        assert_eq!(sanitize_matter_id(" Acme v. Foo/2026 "), "acme-v--foo-2026");
    }

    #[test]
    fn path_segments_cannot_traverse() {
        assert!(is_safe_path_segment("order.pdf"));
        assert!(!is_safe_path_segment(".."));
        assert!(!is_safe_path_segment("../etc/passwd"));
        assert!(!is_safe_path_segment("  "));
    }
}
