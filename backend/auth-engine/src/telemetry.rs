//! Tracing subscriber setup
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "auth_engine=info,info";

/// Install a global fmt subscriber filtered by `RUST_LOG`.
///
/// Returns `false` when a subscriber was already installed, which happens when
/// several tests initialise logging in the same process.
pub fn init_tracing(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if json {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .try_init()
            .is_ok()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init().is_ok()
    }
}

/// Mask an e-mail for log output: `alice@example.com` becomes `a***@example.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_repeatable() {
        init_tracing(false);
        assert!(!init_tracing(false));
    }

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("alice@example.com"), "a***@example.com");
        assert_eq!(mask_email("not-an-email"), "***");
    }
}
