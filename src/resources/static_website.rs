use std::path::PathBuf;

use tracing::debug;

use super::*;
use crate::parsing::{normalize_domain, record_name, validate_zone_name};

pub const DEFAULT_DOCUMENT: &str = "index.html";
pub const INVALIDATE_ALL_PATHS: &str = "/*";

pub const OUTPUT_DOMAIN_NAME: &str = "DomainName";
pub const OUTPUT_BUCKET_NAME: &str = "BucketName";
pub const OUTPUT_DISTRIBUTION_ID: &str = "DistributionId";
pub const OUTPUT_DISTRIBUTION_DOMAIN_NAME: &str = "DistributionDomainName";
pub const OUTPUT_CERTIFICATE_ARN: &str = "CertificateArn";

fn default_document() -> String {
    DEFAULT_DOCUMENT.to_string()
}

fn default_true() -> bool {
    true
}

/// who may read objects out of the content bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BucketAccess {
    /// only cloudfront, through an origin access identity.
    #[default]
    OriginAccessIdentity,
    /// anyone may `s3:GetObject`. cloudfront reads through the website endpoint.
    PublicRead,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteProps {
    #[serde(alias = "zoneName")]
    pub zone_name: String,
    #[serde(default, alias = "subDomain")]
    pub sub_domain: Option<String>,
    /// Path to your web asset build folder [e.g. ./dist || ./build || ./out]
    #[serde(alias = "webAssetPath")]
    pub web_asset_path: PathBuf,
    #[serde(default = "default_document", alias = "websiteIndexDocument")]
    pub website_index_document: String,
    #[serde(default = "default_document", alias = "websiteErrorDocument")]
    pub website_error_document: String,
    /// creates the bucket access log bucket and the distribution log bucket.
    #[serde(default = "default_true", alias = "enableAccessLogging")]
    pub enable_access_logging: bool,
    #[serde(default, alias = "certificateValidation")]
    pub certificate_validation: CertificateValidation,
    #[serde(default, alias = "bucketAccess")]
    pub bucket_access: BucketAccess,
    /// physical name of the content bucket. Must be globally unique.
    /// left empty, cloudformation derives one from the logical id.
    #[serde(default, alias = "bucketName")]
    pub bucket_name: Option<String>,
    /// defaults to `{stack name}/distribution-logs`.
    #[serde(default, alias = "distributionLogPrefix")]
    pub distribution_log_prefix: Option<String>,
    #[serde(default, alias = "priceClass")]
    pub price_class: PriceClass,
    /// delete objects from the bucket that no longer exist locally.
    #[serde(default = "default_true")]
    pub prune: bool,
}

impl SiteProps {
    pub fn new(zone_name: impl Into<String>, web_asset_path: impl Into<PathBuf>) -> Self {
        Self {
            zone_name: zone_name.into(),
            sub_domain: None,
            web_asset_path: web_asset_path.into(),
            website_index_document: default_document(),
            website_error_document: default_document(),
            enable_access_logging: true,
            certificate_validation: CertificateValidation::Dns,
            bucket_access: BucketAccess::OriginAccessIdentity,
            bucket_name: None,
            distribution_log_prefix: None,
            price_class: PriceClass::PriceClass100,
            prune: true,
        }
    }

    pub fn sub_domain(mut self, sub_domain: impl Into<String>) -> Self {
        self.sub_domain = Some(sub_domain.into());
        self
    }

    /// Everything that can be checked without talking to AWS. Returns the
    /// fully qualified record name.
    pub fn validate(&self) -> ConfigResult<String> {
        let name = record_name(&self.zone_name, self.sub_domain.as_deref())?;
        if self.website_index_document.is_empty() || self.website_error_document.is_empty() {
            return Err(ConfigError::InvalidSiteConfig(
                "website index and error documents must not be empty".into(),
            ));
        }
        if let Some(bucket_name) = &self.bucket_name {
            crate::parsing::validate_bucket_name(bucket_name)?;
        }
        if !self.web_asset_path.is_dir() {
            return Err(ConfigError::AssetPathNotFound(self.web_asset_path.clone()));
        }
        Ok(name)
    }
}

/// A Route53 hosted zone, as returned by a zone lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedZone {
    /// without the `/hostedzone/` prefix.
    pub id: String,
    /// without the trailing dot.
    pub name: String,
}

impl HostedZone {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.trim_start_matches("/hostedzone/").to_string(),
            name: normalize_domain(name),
        }
    }
}

/// a declared resource, referenced by logical id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    pub logical_id: String,
}

impl ResourceHandle {
    fn new(logical_id: String) -> Self {
        Self { logical_id }
    }
    pub fn reference(&self) -> Value {
        get_ref(&self.logical_id)
    }
    pub fn attribute(&self, name: &str) -> Value {
        get_att(&self.logical_id, name)
    }
}

/// The upload + invalidation that happens once the stack is up. Bucket and
/// distribution are named by stack output, since their physical ids are only
/// known after deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDeployment {
    pub source: PathBuf,
    pub bucket_output: String,
    pub distribution_output: String,
    pub distribution_paths: Vec<String>,
    pub prune: bool,
}

/// Hosted Site construct: content bucket, certificate, distribution and alias
/// record for one domain name.
#[derive(Debug, Clone)]
pub struct HostedSite {
    pub id: String,
    pub record_name: String,
    pub zone: HostedZone,
    pub bucket: ResourceHandle,
    pub distribution: ResourceHandle,
    pub certificate: ResourceHandle,
    pub record: ResourceHandle,
    pub access_log_bucket: Option<ResourceHandle>,
    pub distribution_log_bucket: Option<ResourceHandle>,
    pub deployment: AssetDeployment,
}

impl HostedSite {
    /// Declares the site's resources in `stack`.
    /// Fails before declaring anything if the configuration is invalid.
    pub fn new(stack: &mut Stack, id: &str, props: SiteProps, zone: &HostedZone) -> ConfigResult<Self> {
        stack.context.validate()?;
        let record_name = props.validate()?;
        let zone_name = validate_zone_name(&props.zone_name)?;
        if zone.name != zone_name {
            return Err(ConfigError::InvalidDomainConfig(format!(
                "hosted zone {} ({}) does not match zone name {}", zone.id, zone.name, zone_name
            )));
        }
        if stack.context.region != CLOUDFRONT_CERTIFICATE_REGION {
            return Err(ConfigError::InvalidStackContext(format!(
                "cloudfront certificates must be issued in {CLOUDFRONT_CERTIFICATE_REGION}, stack region is {}",
                stack.context.region
            )));
        }
        let stack_name = stack.context.stack_name.clone();
        let account = stack.context.account_value();
        let ids = |name: &str| logical_id(id, name);

        let mut access_log_bucket = None;
        let mut distribution_log_bucket = None;
        if props.enable_access_logging {
            let logs_id = ids("BucketAccessLogs");
            add_destroyable_bucket(stack, &logs_id, S3Bucket::default())?;
            access_log_bucket = Some(ResourceHandle::new(logs_id));

            let distr_logs_id = ids("DistributionLogBucket");
            add_destroyable_bucket(stack, &distr_logs_id, S3Bucket {
                object_ownership: "BucketOwnerPreferred",
                ..Default::default()
            })?;
            distribution_log_bucket = Some(ResourceHandle::new(distr_logs_id));
        }

        let bucket_id = ids("Bucket");
        let public_read = props.bucket_access == BucketAccess::PublicRead;
        add_destroyable_bucket(stack, &bucket_id, S3Bucket {
            name: props.bucket_name.clone(),
            website: Some(WebsiteConfig {
                index_document: props.website_index_document.clone(),
                error_document: props.website_error_document.clone(),
            }),
            versioned: true,
            access_logging: access_log_bucket.as_ref().map(|logs| AccessLogging {
                destination_logical_id: logs.logical_id.clone(),
                prefix: None,
            }),
            allow_public_policy: public_read,
            ..Default::default()
        })?;
        if let Some(logs) = &access_log_bucket {
            stack.add_resource(Resource::new(
                format!("{}Policy", logs.logical_id),
                server_access_log_policy(&logs.logical_id, &bucket_id, account),
            ))?;
        }

        let certificate_id = ids("Certificate");
        stack.add_resource(Resource::new(&certificate_id, AcmCertificate {
            domain_name: record_name.clone(),
            hosted_zone_id: zone.id.clone(),
            validation: props.certificate_validation,
        }))?;

        let (origin, reader) = if public_read {
            (BucketOrigin::Website { bucket_logical_id: bucket_id.clone() }, json!("*"))
        } else {
            let identity_id = ids("OriginAccessIdentity");
            stack.add_resource(Resource::new(&identity_id, OriginAccessIdentity {
                comment: format!("Identity for {record_name}"),
            }))?;
            let reader = json!({ "CanonicalUser": get_att(&identity_id, "S3CanonicalUserId") });
            (BucketOrigin::AccessIdentity { bucket_logical_id: bucket_id.clone(), identity_logical_id: identity_id }, reader)
        };
        stack.add_resource(Resource::new(ids("BucketPolicy"), BucketPolicy {
            bucket_logical_id: bucket_id.clone(),
            statements: vec![
                PolicyStatement::allow(&["s3:GetObject"], vec![bucket_objects_arn(&bucket_id)]).principal(reader),
            ],
        }))?;

        let distribution_id = ids("Distribution");
        let log_prefix = props.distribution_log_prefix.clone()
            .unwrap_or_else(|| format!("{stack_name}/distribution-logs"));
        stack.add_resource(Resource::new(&distribution_id, CloudfrontDistribution {
            comment: format!("{record_name} ({stack_name})"),
            origin,
            aliases: vec![record_name.clone()],
            certificate_logical_id: certificate_id.clone(),
            default_root_object: props.website_index_document.clone(),
            // the website endpoint serves the error document itself
            error_document: (!public_read).then(|| props.website_error_document.clone()),
            logging: distribution_log_bucket.as_ref().map(|logs| DistributionLogging {
                bucket_logical_id: logs.logical_id.clone(),
                prefix: log_prefix,
            }),
            price_class: props.price_class,
        }))?;

        let record_id = ids("AliasRecord");
        add_record(stack, &record_id, Route53RecordSet::alias_a_record(&record_name, &zone.id, AliasTarget {
            dns_name: get_att(&distribution_id, "DomainName"),
            hosted_zone_id: CLOUDFRONT_HOSTED_ZONE_ID.to_string(),
        }))?;

        stack.add_output(OUTPUT_DOMAIN_NAME, "public domain name of the site", get_ref(&record_id));
        stack.add_output(OUTPUT_BUCKET_NAME, "content bucket", get_ref(&bucket_id));
        stack.add_output(OUTPUT_DISTRIBUTION_ID, "cloudfront distribution id", get_ref(&distribution_id));
        stack.add_output(
            OUTPUT_DISTRIBUTION_DOMAIN_NAME,
            "cloudfront domain name",
            get_att(&distribution_id, "DomainName"),
        );
        stack.add_output(OUTPUT_CERTIFICATE_ARN, "acm certificate", get_ref(&certificate_id));

        debug!(site = id, record = %record_name, zone = %zone.id, "declared hosted site");

        Ok(Self {
            id: id.to_string(),
            record_name,
            zone: zone.clone(),
            bucket: ResourceHandle::new(bucket_id),
            distribution: ResourceHandle::new(distribution_id),
            certificate: ResourceHandle::new(certificate_id),
            record: ResourceHandle::new(record_id),
            access_log_bucket,
            distribution_log_bucket,
            deployment: AssetDeployment {
                source: props.web_asset_path,
                bucket_output: OUTPUT_BUCKET_NAME.to_string(),
                distribution_output: OUTPUT_DISTRIBUTION_ID.to_string(),
                distribution_paths: vec![INVALIDATE_ALL_PATHS.to_string()],
                prune: props.prune,
            },
        })
    }

    /// the final public domain name.
    pub fn domain_name(&self) -> &str {
        &self.record_name
    }
}
