/// Lowercased domain portion of a committer email, if it has one.
pub fn email_domain(email: &str) -> Option<String> {
    let (_, domain) = email.rsplit_once('@')?;
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() { None } else { Some(domain) }
}

/// Whether `email` falls under an ignored domain. Matches the domain itself
/// and any subdomain of it, case-insensitively: `user@sub.example.com`
/// matches an ignore entry of `example.com`.
pub fn matches_ignored_domain(email: &str, ignored: &str) -> bool {
    let Some(domain) = email_domain(email) else {
        return false;
    };
    let ignored = ignored.trim().to_lowercase();
    if ignored.is_empty() {
        return false;
    }
    domain == ignored || domain.ends_with(&format!(".{}", ignored))
}
