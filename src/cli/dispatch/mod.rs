use crate::auth::AuthConfig;
use crate::cli::actions::Action;
use anyhow::Result;
use secrecy::SecretString;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let auth = AuthConfig {
        access_ttl_secs: matches.get_one::<i64>("access-ttl").copied().unwrap_or(900),
        refresh_ttl_secs: matches
            .get_one::<i64>("refresh-ttl")
            .copied()
            .unwrap_or(86_400),
        reset_ttl_secs: matches
            .get_one::<i64>("reset-ttl")
            .copied()
            .unwrap_or(3_600),
        totp_issuer: matches
            .get_one::<String>("totp-issuer")
            .map_or_else(|| "Vigilo".to_string(), ToString::to_string),
        secure_cookies: !matches.get_flag("insecure-cookies"),
    };

    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches
            .get_one("dsn")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --dsn"))?,
        jwt_secret: matches
            .get_one("jwt-secret")
            .map(|s: &String| SecretString::from(s.as_str()))
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --jwt-secret"))?,
        auth,
    })
}

#[cfg(test)]
mod tests {
    use super::handler;
    use crate::cli::{actions::Action, commands};

    #[test]
    fn builds_server_action_from_flags() {
        let matches = commands::new().get_matches_from(vec![
            "vigilo",
            "--dsn",
            "postgres://localhost/vigilo",
            "--jwt-secret",
            "secret",
            "--access-ttl",
            "300",
            "--insecure-cookies",
        ]);
        let Action::Server {
            port, dsn, auth, ..
        } = handler(&matches).expect("handler should succeed");
        assert_eq!(port, 8080);
        assert_eq!(dsn, "postgres://localhost/vigilo");
        assert_eq!(auth.access_ttl_secs, 300);
        assert_eq!(auth.refresh_ttl_secs, 86_400);
        assert!(!auth.secure_cookies);
    }
}
