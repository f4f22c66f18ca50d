use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::parsing::SiteFile;

pub const ZONE_NAME: &str = "ZONE_NAME";
pub const SUB_DOMAIN: &str = "SUB_DOMAIN";
pub const WEB_ASSET_PATH: &str = "WEB_ASSET_PATH";
pub const STACK_NAME: &str = "STACK_NAME";
pub const AWS_REGION: &str = "AWS_REGION";
pub const AWS_ACCOUNT_ID: &str = "AWS_ACCOUNT_ID";

pub type DotEnv = HashMap<String, String>;

/// `KEY=value` per line. blank lines and `#` comments are skipped, an
/// optional `export ` prefix and surrounding quotes are stripped.
pub fn parse_dot_env(contents: &str) -> DotEnv {
    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, val)) = line.split_once('=') {
            map.insert(key.trim().to_string(), unquote(val.trim()).to_string());
        }
    }
    map
}

fn unquote(val: &str) -> &str {
    for q in ['"', '\''] {
        if val.len() >= 2 && val.starts_with(q) && val.ends_with(q) {
            return &val[1..val.len() - 1];
        }
    }
    val
}

pub fn load_dot_env<P: AsRef<Path>>(path: P) -> ConfigResult<DotEnv> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let map = parse_dot_env(&contents);
    debug!(path = %path.display(), keys = map.len(), "loaded .env file");
    Ok(map)
}

/// Values from the .env file win over the site file. Empty values are ignored,
/// except for SUB_DOMAIN where an empty value clears the sub domain.
pub fn apply_overrides(file: &mut SiteFile, env: &DotEnv) {
    let get = |key: &str| env.get(key).filter(|v| !v.is_empty()).cloned();
    if let Some(zone) = get(ZONE_NAME) {
        file.site.zone_name = zone;
    }
    if let Some(sub) = env.get(SUB_DOMAIN) {
        file.site.sub_domain = if sub.is_empty() { None } else { Some(sub.clone()) };
    }
    if let Some(path) = get(WEB_ASSET_PATH) {
        file.site.web_asset_path = PathBuf::from(path);
    }
    if let Some(name) = get(STACK_NAME) {
        file.stack.name = Some(name);
    }
    if let Some(region) = get(AWS_REGION) {
        file.stack.region = Some(region);
    }
    if let Some(account) = get(AWS_ACCOUNT_ID) {
        file.stack.account = Some(account);
    }
}
