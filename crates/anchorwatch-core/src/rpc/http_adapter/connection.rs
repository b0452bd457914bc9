use std::path::Path;

use reqwest::Url;

use crate::error::CoreError;

pub(super) fn resolve_auth(
    user: Option<&str>,
    pass: Option<&str>,
    cookie_file: Option<&Path>,
) -> Result<Option<(String, String)>, CoreError> {
    match (user, pass) {
        (Some(u), Some(p)) => return Ok(Some((u.to_owned(), p.to_owned()))),
        (Some(_), None) | (None, Some(_)) => {
            return Err(CoreError::InvalidData(
                "both rpc user and rpc pass must be set together".to_owned(),
            ));
        }
        (None, None) => {}
    }

    let Some(cookie_file) = cookie_file else {
        return Ok(None);
    };

    let content = std::fs::read_to_string(cookie_file).map_err(|e| {
        CoreError::InvalidData(format!(
            "failed to read rpc cookie file {}: {e}",
            cookie_file.display()
        ))
    })?;
    parse_cookie(&content)
        .map(Some)
        .ok_or_else(|| {
            CoreError::InvalidData(format!(
                "rpc cookie file {} must contain non-empty `username:password`",
                cookie_file.display()
            ))
        })
}

fn parse_cookie(content: &str) -> Option<(String, String)> {
    let line = content.lines().next().map(str::trim)?;
    let (user, pass) = line.split_once(':')?;
    if user.is_empty() || pass.is_empty() {
        return None;
    }
    Some((user.to_owned(), pass.to_owned()))
}

pub(super) fn parse_connection(connection: &str) -> Result<String, CoreError> {
    let parsed = Url::parse(connection).map_err(|e| {
        CoreError::InvalidData(format!(
            "invalid connection `{connection}`: expected HTTP(S) URL ({e})"
        ))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(connection.to_owned()),
        other => Err(CoreError::InvalidData(format!(
            "unsupported connection scheme `{other}`; expected http or https"
        ))),
    }
}

/// Endpoint for a named wallet on a multi-wallet node (`<base>/wallet/<name>`).
/// Without a name the base URL is used as-is.
pub(super) fn wallet_endpoint(connection: &str, wallet: Option<&str>) -> Result<String, CoreError> {
    let base = parse_connection(connection)?;
    match wallet {
        None | Some("") => Ok(base),
        Some(name) => Ok(format!("{}/wallet/{name}", base.trim_end_matches('/'))),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    #[test]
    fn parse_connection_rejects_non_http_scheme() {
        assert_eq!(
            parse_connection("http://127.0.0.1:8332").expect("should parse"),
            "http://127.0.0.1:8332"
        );
        let err = parse_connection("tcp://127.0.0.1:28332").expect_err("must reject tcp");
        assert!(err.to_string().contains("unsupported connection scheme"));
    }

    #[test]
    fn wallet_endpoint_appends_wallet_path() {
        assert_eq!(
            wallet_endpoint("http://127.0.0.1:18443/", Some("relayer")).expect("valid url"),
            "http://127.0.0.1:18443/wallet/relayer"
        );
        assert_eq!(
            wallet_endpoint("http://127.0.0.1:18443", None).expect("valid url"),
            "http://127.0.0.1:18443"
        );
    }

    #[test]
    fn resolve_auth_rejects_partial_credentials() {
        let err = resolve_auth(None, Some("secret"), None).expect_err("must reject partial auth");
        assert!(err.to_string().contains("must be set together"));
    }

    #[test]
    fn cookie_requires_user_and_password() {
        assert_eq!(
            parse_cookie("__cookie__:token\n"),
            Some(("__cookie__".to_owned(), "token".to_owned()))
        );
        assert_eq!(parse_cookie(":token"), None);
        assert_eq!(parse_cookie(""), None);
    }

    #[test]
    fn resolve_auth_reads_cookie_file() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time must be after unix epoch")
            .as_nanos();
        let cookie_path = std::env::temp_dir().join(format!("anchorwatch-cookie-{unique}.txt"));
        fs::write(&cookie_path, "__cookie__:token\n").expect("cookie file must be writable");

        let auth = resolve_auth(None, None, Some(&cookie_path)).expect("cookie must parse");
        assert_eq!(auth, Some(("__cookie__".to_owned(), "token".to_owned())));

        let _ = fs::remove_file(cookie_path);
    }
}
