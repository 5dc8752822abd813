//! Channel target syntax understood by the discovery resolver factory.

/// URI scheme claimed by [`super::DiscoveryResolverFactory`].
pub const DISCOVERY_SCHEME: &str = "discovery";

/// Extract the service name from `discovery://name`, `discovery:name` or a bare `name`.
/// Returns `None` for other schemes and for names that are empty or carry a path or port.
pub fn parse_target(target: &str) -> Option<&str> {
    let target = target.trim();
    let rest = match target.split_once(':') {
        Some((scheme, rest)) => {
            if !scheme.eq_ignore_ascii_case(DISCOVERY_SCHEME) {
                return None;
            }
            rest.strip_prefix("//").unwrap_or(rest)
        }
        None => target,
    };
    let name = rest.trim_matches('/');
    if name.is_empty() || name.contains(['/', ':']) || name.contains(char::is_whitespace) {
        return None;
    }
    Some(name)
}
