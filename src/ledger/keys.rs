/// Trimmed, lower-cased email used for comparisons.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Storage-safe key derived from an email: every character outside
/// `[a-z0-9]` becomes `_`, so `Ana.Souza@Mail.com` maps to `ana_souza_mail_com`.
pub fn email_key(raw: &str) -> String {
    normalize_email(raw)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn is_plausible_email(raw: &str) -> bool {
    let email = raw.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}
