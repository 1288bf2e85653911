use url::Url;

use crate::util::port_or_default;

/// Policy governing which `Location` targets a session follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RedirectMode {
    /// Never follow redirects.
    None,
    /// Host, port and scheme must all match the current url.
    SameEndpoint,
    /// Host must match; port and scheme may change.
    SameHost,
    /// The new host must be within the registrable domain of the current
    /// host, e.g. `example.com` -> `api.example.com`.
    SameDomain,
    /// Follow unconditionally.
    Any,
}

pub(crate) fn should_redirect(mode: RedirectMode, current: &Url, next: &Url) -> bool {
    match mode {
        RedirectMode::None => false,
        RedirectMode::SameEndpoint => {
            next.scheme() == current.scheme()
                && next.host_str() == current.host_str()
                && port_or_default(next) == port_or_default(current)
        }
        RedirectMode::SameHost => next.host_str() == current.host_str(),
        RedirectMode::SameDomain => match (current.host_str(), next.host_str()) {
            (Some(a), Some(b)) => same_domain(a, b),
            _ => false,
        },
        RedirectMode::Any => true,
    }
}

/// True when `next` is within the registrable domain of `current`.
///
/// The registrable domain is approximated as the last two labels of the
/// host. Single-label hosts (`localhost`) only match themselves.
fn same_domain(current: &str, next: &str) -> bool {
    if current.eq_ignore_ascii_case(next) {
        return true;
    }
    match registrable(current) {
        Some(domain) => {
            next.eq_ignore_ascii_case(domain)
                || (next.len() > domain.len() + 1
                    && next[next.len() - domain.len()..].eq_ignore_ascii_case(domain)
                    && next.as_bytes()[next.len() - domain.len() - 1] == b'.')
        }
        None => false,
    }
}

fn registrable(host: &str) -> Option<&str> {
    let mut labels = host.rsplitn(3, '.');
    let tld = labels.next()?;
    let second = labels.next()?;
    // Slice from the start of the second-to-last label.
    let len = tld.len() + second.len() + 1;
    Some(&host[host.len() - len..])
}

#[cfg(test)]
mod test {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn none_never_follows() {
        assert!(!should_redirect(
            RedirectMode::None,
            &url("http://a.com/"),
            &url("http://a.com/x"),
        ));
    }

    #[test]
    fn same_endpoint_requires_exact_match() {
        let a = url("http://a.com/x");
        assert!(should_redirect(RedirectMode::SameEndpoint, &a, &url("http://a.com:80/y")));
        assert!(!should_redirect(RedirectMode::SameEndpoint, &a, &url("https://a.com/y")));
        assert!(!should_redirect(RedirectMode::SameEndpoint, &a, &url("http://a.com:8080/y")));
        assert!(!should_redirect(RedirectMode::SameEndpoint, &a, &url("http://b.com/y")));
    }

    #[test]
    fn same_host_allows_scheme_and_port_changes() {
        let a = url("http://a.com/x");
        assert!(should_redirect(RedirectMode::SameHost, &a, &url("https://a.com:8443/y")));
        assert!(!should_redirect(RedirectMode::SameHost, &a, &url("http://www.a.com/y")));
    }

    #[test]
    fn same_domain_matches_subdomains() {
        let a = url("https://www.example.com/x");
        assert!(should_redirect(RedirectMode::SameDomain, &a, &url("https://api.example.com/y")));
        assert!(should_redirect(RedirectMode::SameDomain, &a, &url("https://example.com/y")));
        assert!(!should_redirect(RedirectMode::SameDomain, &a, &url("https://example.org/y")));
        assert!(!should_redirect(
            RedirectMode::SameDomain,
            &a,
            &url("https://notexample.com/y")
        ));
    }

    #[test]
    fn same_domain_single_label_hosts() {
        let a = url("http://localhost/x");
        assert!(should_redirect(RedirectMode::SameDomain, &a, &url("http://localhost:8080/y")));
        assert!(!should_redirect(RedirectMode::SameDomain, &a, &url("http://remotehost/y")));
    }

    #[test]
    fn any_follows_everything() {
        assert!(should_redirect(
            RedirectMode::Any,
            &url("http://a.com/"),
            &url("https://b.org/"),
        ));
    }
}
