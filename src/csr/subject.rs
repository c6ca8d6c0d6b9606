//! Common Name extraction from a textual certificate subject line

/// Prefix on the subject line produced by certificate tooling
const SUBJECT_PREFIX: &str = "subject=";

/// Extract the CN value from a `subject=<DN>` line.
///
/// Accepts both notations certificate tools emit:
///
/// ```text
/// subject=/C=US/CN=test.io/L=Raleigh/O=Red Hat
/// subject=C = US, CN = test.io, L = City, O = Company
/// ```
///
/// Returns `None` when the subject has no CN component.
pub fn parse_common_name(subject: &str) -> Option<String> {
    let dn = subject
        .trim()
        .strip_prefix(SUBJECT_PREFIX)
        .unwrap_or(subject)
        .trim();

    // A comma-free subject is read as slash form, so a `/` inside a lone CN value
    // ends the value there. Node names never contain `/`.
    let mut components: Vec<&str> = dn.split(',').map(str::trim).collect();
    if components.len() == 1 {
        components = dn.split('/').map(str::trim).collect();
        // Slash form starts with a separator, leaving an empty first segment
        if components.first().is_some_and(|c| c.is_empty()) {
            components.remove(0);
        }
    }

    components.into_iter().find_map(|component| {
        let (key, value) = component.split_once('=')?;
        (key.trim() == "CN").then(|| value.trim().to_string())
    })
}
