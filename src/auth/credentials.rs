use base64::{engine::general_purpose, Engine as _};
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str;

use crate::api::schema::*;
use crate::error::handler::*;
use crate::log::logging::*;

// read the credentials from the podman location, falling back to the
// docker config (see containers-auth.json reference)
pub fn get_credentials() -> Result<String, MirrorError> {
    let mut candidates = vec![];
    if let Some(run_dir) = env::var_os("XDG_RUNTIME_DIR") {
        let dir = run_dir
            .into_string()
            .map_err(|_| MirrorError::new("XDG_RUNTIME_DIR is not valid utf-8"))?;
        candidates.push(dir + "/containers/auth.json");
    }
    if let Some(home) = env::var_os("HOME") {
        let dir = home
            .into_string()
            .map_err(|_| MirrorError::new("HOME is not valid utf-8"))?;
        candidates.push(dir.clone() + "/.config/containers/auth.json");
        candidates.push(dir + "/.docker/config.json");
    }
    for candidate in candidates.iter() {
        if Path::new(candidate).exists() {
            let mut file = File::open(candidate)
                .map_err(|e| MirrorError::new(&format!("opening {} {}", candidate, e)))?;
            let mut s = String::new();
            file.read_to_string(&mut s)
                .map_err(|e| MirrorError::new(&format!("reading {} {}", candidate, e)))?;
            return Ok(s);
        }
    }
    Err(MirrorError::new(
        "no registry credentials found (checked $XDG_RUNTIME_DIR/containers/auth.json, ~/.config/containers/auth.json and ~/.docker/config.json)",
    ))
}

// look up the base64 auth entry for a registry in the credential store
pub fn parse_json_creds(log: &Logging, data: String, registry: &str) -> Result<String, MirrorError> {
    let creds: Root = serde_json::from_str(&data)
        .map_err(|e| MirrorError::new(&format!("parsing credentials {}", e)))?;
    if let Some(provider) = creds.auths.get(registry) {
        log.trace(&format!("using credentials for registry {}", registry));
        return Ok(provider.auth.clone());
    }
    // registry.redhat.io style entries sometimes carry the domain only
    let domain = registry.split(':').next().unwrap_or(registry);
    if let Some(provider) = creds.auths.get(domain) {
        log.trace(&format!("using credentials for registry {}", domain));
        return Ok(provider.auth.clone());
    }
    Ok(String::from(""))
}

// parse the token from the auth service response
pub fn parse_json_token(data: String) -> Result<String, MirrorError> {
    let root: Token = serde_json::from_str(&data)
        .map_err(|e| MirrorError::new(&format!("parsing token {}", e)))?;
    if let Some(token) = root.access_token {
        if !token.is_empty() {
            return Ok(token);
        }
    }
    if let Some(token) = root.token {
        if !token.is_empty() {
            return Ok(token);
        }
    }
    Err(MirrorError::new("auth service returned an empty token"))
}

// async api call with basic auth
pub async fn get_auth_json(
    url: String,
    user: String,
    password: String,
) -> Result<String, MirrorError> {
    let client = reqwest::Client::new();
    let req = if user.is_empty() {
        client.get(&url)
    } else {
        client.get(&url).basic_auth(user, Some(password))
    };
    let body = req
        .send()
        .await
        .map_err(|e| MirrorError::new(&format!("calling auth endpoint {} {}", url, e)))?
        .text()
        .await
        .map_err(|e| MirrorError::new(&format!("reading auth response {}", e)))?;
    Ok(body)
}

// pull realm and service out of a Www-Authenticate bearer challenge
fn parse_www_authenticate(header: &str) -> (String, String) {
    let mut realm = String::from("");
    let mut service = String::from("");
    let trimmed = header.trim_start_matches("Bearer").trim();
    for part in trimmed.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            let value = value.trim_matches('"').to_string();
            match key {
                "realm" => realm = value,
                "service" => service = value,
                _ => {}
            }
        }
    }
    (realm, service)
}

// negotiate a bearer token for the registry and repository scope
// loopback cache registries are unauthenticated - returns an empty token
pub async fn get_token(
    log: &Logging,
    registry: String,
    scope: String,
    base_url: String,
) -> Result<String, MirrorError> {
    if registry.starts_with("localhost") || registry.starts_with("127.0.0.1") {
        return Ok(String::from(""));
    }
    // probe /v2/ for the bearer challenge
    let client = reqwest::Client::new();
    let probe = format!("{}/v2/", base_url);
    let res = client
        .get(&probe)
        .send()
        .await
        .map_err(|e| MirrorError::new(&format!("probing registry {} {}", registry, e)))?;
    if res.status().is_success() {
        return Ok(String::from(""));
    }
    let challenge = match res.headers().get("www-authenticate") {
        Some(header) => header
            .to_str()
            .map_err(|e| MirrorError::new(&format!("reading auth challenge {}", e)))?
            .to_string(),
        None => return Ok(String::from("")),
    };
    let (realm, service) = parse_www_authenticate(&challenge);
    if realm.is_empty() {
        return Ok(String::from(""));
    }
    let mut token_url = realm.clone();
    token_url.push_str("?service=");
    token_url.push_str(&service);
    if !scope.is_empty() {
        token_url.push_str("&scope=repository:");
        token_url.push_str(&scope);
        token_url.push_str(":pull,push");
    }

    // creds are optional - some registries hand out anonymous pull tokens
    let mut user = String::from("");
    let mut pwd = String::from("");
    if let Ok(creds) = get_credentials() {
        let auth = parse_json_creds(log, creds, &registry)?;
        if !auth.is_empty() {
            let bytes = general_purpose::STANDARD
                .decode(auth)
                .map_err(|e| MirrorError::new(&format!("decoding credentials {}", e)))?;
            let decoded = str::from_utf8(&bytes)
                .map_err(|e| MirrorError::new(&format!("invalid utf-8 in credentials {}", e)))?;
            if let Some((u, p)) = decoded.split_once(':') {
                user = u.to_string();
                pwd = p.to_string();
            }
        }
    }
    let res = get_auth_json(token_url, user, pwd).await?;
    let token = parse_json_token(res)?;
    Ok(token)
}
