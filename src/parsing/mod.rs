use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};
use crate::resources::SiteProps;

pub const MAX_DOMAIN_LENGTH: usize = 253;
pub const MAX_LABEL_LENGTH: usize = 63;

pub const VALID_AWS_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "ca-central-1",
    "eu-north-1",
    "eu-west-3",
    "eu-west-2",
    "eu-west-1",
    "eu-central-1",
    "eu-central-2",
    "eu-south-1",
    "eu-south-2",
    "ap-south-1",
    "ap-south-2",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-east-1",
    "sa-east-1",
    "cn-north-1",
    "cn-northwest-1",
    "us-gov-east-1",
    "us-gov-west-1",
    "me-south-1",
    "me-central-1",
    "il-central-1",
    "af-south-1",
];

fn invalid_domain(msg: String) -> ConfigError {
    ConfigError::InvalidDomainConfig(msg)
}

/// route53 hands zone names back with a trailing dot, users usually
/// type them without one. we store them without.
pub fn normalize_domain(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn validate_label(label: &str, full: &str) -> ConfigResult<()> {
    if label.is_empty() {
        return Err(invalid_domain(format!("{full:?} contains an empty label")));
    }
    if label.len() > MAX_LABEL_LENGTH {
        return Err(invalid_domain(format!(
            "label {label:?} in {full:?} is longer than {MAX_LABEL_LENGTH} characters"
        )));
    }
    if let Some(c) = label.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '-') {
        return Err(invalid_domain(format!("{full:?} contains illegal character {c:?}")));
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err(invalid_domain(format!(
            "label {label:?} in {full:?} cannot start or end with a hyphen"
        )));
    }
    Ok(())
}

/// Validates a DNS zone name such as `example.com`. Returns the normalized name.
pub fn validate_zone_name(zone_name: &str) -> ConfigResult<String> {
    let zone = normalize_domain(zone_name);
    if zone.is_empty() {
        return Err(invalid_domain("zone name must not be empty".into()));
    }
    if zone.len() > MAX_DOMAIN_LENGTH {
        return Err(invalid_domain(format!(
            "zone name {zone:?} is longer than {MAX_DOMAIN_LENGTH} characters"
        )));
    }
    let labels: Vec<&str> = zone.split('.').collect();
    if labels.len() < 2 {
        return Err(invalid_domain(format!(
            "zone name {zone:?} must have at least two labels, eg: example.com"
        )));
    }
    for label in labels.iter() {
        validate_label(label, &zone)?;
    }
    if let Some(tld) = labels.last() {
        if tld.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid_domain(format!("top level domain of {zone:?} cannot be numeric")));
        }
    }
    Ok(zone)
}

/// Validates the sub domain part of a record name. A single leading `*` label
/// is allowed, as ACM and CloudFront accept wildcards in the first position only.
pub fn validate_sub_domain(sub_domain: &str) -> ConfigResult<String> {
    let sub = sub_domain.trim().to_ascii_lowercase();
    if sub.is_empty() {
        return Err(invalid_domain("sub domain must not be empty when provided".into()));
    }
    for (i, label) in sub.split('.').enumerate() {
        if label == "*" {
            if i != 0 {
                return Err(invalid_domain(format!(
                    "wildcard must be the first label of the sub domain. {sub:?} is invalid"
                )));
            }
            continue;
        }
        validate_label(label, &sub)?;
    }
    Ok(sub)
}

/// Computes the fully qualified record name: `{sub_domain}.{zone_name}` when a
/// sub domain is given, the zone name otherwise.
pub fn record_name(zone_name: &str, sub_domain: Option<&str>) -> ConfigResult<String> {
    let zone = validate_zone_name(zone_name)?;
    let name = match sub_domain {
        Some(sub) => format!("{}.{}", validate_sub_domain(sub)?, zone),
        None => zone,
    };
    if name.len() > MAX_DOMAIN_LENGTH {
        return Err(invalid_domain(format!(
            "record name {name:?} is longer than {MAX_DOMAIN_LENGTH} characters"
        )));
    }
    Ok(name)
}

// A stack name can contain only alphanumeric characters (case sensitive) and hyphens.
// It must start with an alphabetical character and can't be longer than 128 characters.
pub fn validate_stack_name(stack_name: &str) -> ConfigResult<()> {
    let restriction = "Must only consist of alphanumeric characters and hyphens, Must start with an alphabetical character, and cannot be longer than 128 characters.";
    let err = || ConfigError::InvalidStackContext(format!("Invalid stack name {stack_name:?}\n{restriction}"));
    match stack_name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return Err(err()),
    }
    if !stack_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(err());
    }
    if stack_name.len() > 128 {
        return Err(err());
    }
    Ok(())
}

pub fn validate_region(region: &str) -> ConfigResult<()> {
    if !VALID_AWS_REGIONS.contains(&region) {
        return Err(ConfigError::InvalidStackContext(format!(
            "Invalid region code {region:?}\nMust be one of {VALID_AWS_REGIONS:?}"
        )));
    }
    Ok(())
}

pub fn validate_account(account: &str) -> ConfigResult<()> {
    if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::InvalidStackContext(format!(
            "Invalid account id {account:?}\nMust be exactly 12 digits"
        )));
    }
    Ok(())
}

pub fn validate_bucket_name(bucket_name: &str) -> ConfigResult<()> {
    let err = |reason: &str| ConfigError::InvalidBucketName {
        name: bucket_name.to_string(),
        reason: reason.to_string(),
    };
    if bucket_name.len() > 63 || bucket_name.len() < 3 {
        return Err(err("Must be between 3 and 63 characters"));
    }
    let valid_char_check = |c: char| -> bool {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-'
    };
    if !bucket_name.chars().all(valid_char_check) {
        return Err(err("May only contain lowercase letters, numbers, dots, and dashes"));
    }
    let first_ok = bucket_name.chars().next().map_or(false, |c| c.is_ascii_alphanumeric());
    let last_ok = bucket_name.chars().last().map_or(false, |c| c.is_ascii_alphanumeric());
    if !first_ok || !last_ok {
        return Err(err("First and last character must be either lowercase letter, or number"));
    }
    if bucket_name.contains("..") {
        return Err(err("May not contain two consecutive dots"));
    }
    Ok(())
}

/// the `[stack]` table of a site file. every field can also come from
/// the command line or a .env file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackSection {
    pub name: Option<String>,
    pub region: Option<String>,
    pub account: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteFile {
    pub site: SiteProps,
    #[serde(default)]
    pub stack: StackSection,
}

pub fn parse_site_file(contents: &str) -> ConfigResult<SiteFile> {
    toml::from_str(contents).map_err(|e| ConfigError::Parse {
        what: "site configuration".into(),
        message: e.to_string(),
    })
}

pub fn load_site_file<P: AsRef<Path>>(path: P) -> ConfigResult<SiteFile> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut file = parse_site_file(&contents)?;
    // asset paths are relative to the config file, not the working dir
    if file.site.web_asset_path.is_relative() {
        if let Some(dir) = path.parent() {
            file.site.web_asset_path = dir.join(&file.site.web_asset_path);
        }
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{BucketAccess, PriceClass};

    #[test]
    fn record_name_joins_sub_domain_and_zone() {
        assert_eq!(record_name("example.com", None).unwrap(), "example.com");
        assert_eq!(record_name("example.com", Some("test")).unwrap(), "test.example.com");
        assert_eq!(record_name("Example.COM.", Some("Docs.v2")).unwrap(), "docs.v2.example.com");
        assert_eq!(record_name("example.com", Some("*")).unwrap(), "*.example.com");
    }

    #[test]
    fn empty_or_malformed_sub_domain_is_rejected() {
        for sub in ["", "  ", "a..b", "-abc", "abc-", "under_score", "sp ace", "a.*", "é"] {
            let err = record_name("example.com", Some(sub)).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidDomainConfig(_)), "{sub:?} should fail, got {err:?}");
        }
    }

    #[test]
    fn zone_names_must_be_valid() {
        for zone in ["", ".", "com", "example..com", "exa mple.com", "example.123", "-example.com"] {
            assert!(validate_zone_name(zone).is_err(), "{zone:?} should fail");
        }
        let long_label = "a".repeat(64);
        assert!(validate_zone_name(&format!("{long_label}.com")).is_err());
        assert_eq!(validate_zone_name("elevator-robot.com.").unwrap(), "elevator-robot.com");
    }

    #[test]
    fn record_name_cannot_exceed_max_length() {
        let zone = format!("{}.{}.com", "a".repeat(63), "b".repeat(63));
        let sub = format!("{}.{}", "c".repeat(63), "d".repeat(63));
        let err = record_name(&zone, Some(&sub)).unwrap_err();
        assert!(err.to_string().contains("longer than 253"));
    }

    #[test]
    fn stack_names_follow_cloudformation_rules() {
        assert!(validate_stack_name("my-site-1").is_ok());
        assert!(validate_stack_name("1site").is_err());
        assert!(validate_stack_name("my_site").is_err());
        assert!(validate_stack_name("").is_err());
        assert!(validate_stack_name(&"a".repeat(129)).is_err());
    }

    #[test]
    fn bucket_names_are_checked() {
        assert!(validate_bucket_name("my-site.assets").is_ok());
        let err = validate_bucket_name("something..exact").unwrap_err();
        assert!(err.to_string().contains("May not contain two consecutive dots"));
        let err = validate_bucket_name("ab").unwrap_err();
        assert!(err.to_string().contains("Must be between 3 and 63 characters"));
        assert!(validate_bucket_name("Uppercase").is_err());
        assert!(validate_bucket_name("-dash").is_err());
    }

    #[test]
    fn regions_and_accounts() {
        assert!(validate_region("us-east-1").is_ok());
        assert!(validate_region("mars-north-1").is_err());
        assert!(validate_account("123456789012").is_ok());
        assert!(validate_account("1234").is_err());
    }

    #[test]
    fn parses_site_file_with_defaults() {
        let file = parse_site_file(r#"
            [site]
            zone_name = "example.com"
            web_asset_path = "./dist"
        "#).unwrap();
        assert_eq!(file.site.zone_name, "example.com");
        assert_eq!(file.site.sub_domain, None);
        assert_eq!(file.site.website_index_document, "index.html");
        assert_eq!(file.site.website_error_document, "index.html");
        assert!(file.site.enable_access_logging);
        assert!(file.site.prune);
        assert_eq!(file.site.bucket_access, BucketAccess::OriginAccessIdentity);
        assert_eq!(file.site.price_class, PriceClass::PriceClass100);
        assert_eq!(file.stack, StackSection::default());
    }

    #[test]
    fn parses_camel_case_keys_and_stack_table() {
        let file = parse_site_file(r#"
            [site]
            zoneName = "example.com"
            subDomain = "test"
            webAssetPath = "./dist"
            websiteErrorDocument = "404.html"
            enableAccessLogging = false
            bucket_access = "public-read"

            [stack]
            name = "test-site"
            region = "us-east-1"
            account = "123456789012"
        "#).unwrap();
        assert_eq!(file.site.sub_domain.as_deref(), Some("test"));
        assert_eq!(file.site.website_error_document, "404.html");
        assert!(!file.site.enable_access_logging);
        assert_eq!(file.site.bucket_access, BucketAccess::PublicRead);
        assert_eq!(file.stack.name.as_deref(), Some("test-site"));
        assert_eq!(file.stack.account.as_deref(), Some("123456789012"));
    }

    #[test]
    fn unknown_keys_are_a_parse_error() {
        let err = parse_site_file(r#"
            [site]
            zone_name = "example.com"
            web_asset_path = "./dist"
            domain = "oops"
        "#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn asset_path_is_relative_to_site_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.toml");
        std::fs::write(&path, "[site]\nzone_name = \"example.com\"\nweb_asset_path = \"dist\"\n").unwrap();
        let file = load_site_file(&path).unwrap();
        assert_eq!(file.site.web_asset_path, dir.path().join("dist"));
    }
}
