use super::*;

// caching optimized:
// https://docs.aws.amazon.com/AmazonCloudFront/latest/DeveloperGuide/using-managed-cache-policies.html#managed-cache-caching-optimized
pub const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";

/// this is static for all of AWS for aliases to CloudFront
/// see here: https://docs.aws.amazon.com/AWSCloudFormation/latest/UserGuide/aws-properties-route53-aliastarget.html#cfn-route53-aliastarget-hostedzoneid
pub const CLOUDFRONT_HOSTED_ZONE_ID: &str = "Z2FDTNDATAQYW2";

pub const ALLOWED_METHODS: [&str; 2] = ["GET", "HEAD"];
pub const VIEWER_PROTOCOL_POLICY: &str = "redirect-to-https";
const DEFAULT_ORIGIN_ID: &str = "origin0";

/// the rest endpoint answers 403 for a missing key when the reader can't list the bucket.
pub const ERROR_DOCUMENT_STATUS_CODES: [u16; 2] = [403, 404];
const ERROR_CACHING_MIN_TTL_SECONDS: u32 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceClass {
    #[default]
    #[serde(rename = "PriceClass_100")]
    PriceClass100,
    #[serde(rename = "PriceClass_200")]
    PriceClass200,
    #[serde(rename = "PriceClass_All")]
    PriceClassAll,
}

impl PriceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceClass::PriceClass100 => "PriceClass_100",
            PriceClass::PriceClass200 => "PriceClass_200",
            PriceClass::PriceClassAll => "PriceClass_All",
        }
    }
}

pub struct OriginAccessIdentity {
    pub comment: String,
}

impl CfnResource for OriginAccessIdentity {
    fn type_string(&self) -> &'static str {
        "AWS::CloudFront::CloudFrontOriginAccessIdentity"
    }
    fn properties(&self) -> Value {
        json!({
            "CloudFrontOriginAccessIdentityConfig": { "Comment": self.comment },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketOrigin {
    /// the bucket's rest endpoint. objects are only readable through the identity.
    AccessIdentity { bucket_logical_id: String, identity_logical_id: String },
    /// the bucket's website endpoint, which only speaks http and needs public read.
    Website { bucket_logical_id: String },
}

/// { "Fn::Select" : [ "2", { "Fn::Split": ["/", { "Fn::GetAtt": ["logical_bucket", "WebsiteURL"] }] } ] }
pub fn select_s3website_url(bucket_logical_id: &str) -> Value {
    json!({
        "Fn::Select": ["2", { "Fn::Split": ["/", get_att(bucket_logical_id, "WebsiteURL")] }],
    })
}

impl BucketOrigin {
    fn to_value(&self) -> Value {
        match self {
            BucketOrigin::AccessIdentity { bucket_logical_id, identity_logical_id } => json!({
                "Id": DEFAULT_ORIGIN_ID,
                "DomainName": get_att(bucket_logical_id, "RegionalDomainName"),
                "S3OriginConfig": {
                    "OriginAccessIdentity": sub(&format!("origin-access-identity/cloudfront/${{{identity_logical_id}}}")),
                },
            }),
            BucketOrigin::Website { bucket_logical_id } => json!({
                "Id": DEFAULT_ORIGIN_ID,
                "DomainName": select_s3website_url(bucket_logical_id),
                "CustomOriginConfig": { "OriginProtocolPolicy": "http-only" },
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionLogging {
    pub bucket_logical_id: String,
    pub prefix: String,
}

pub struct CloudfrontDistribution {
    pub comment: String,
    pub origin: BucketOrigin,
    pub aliases: Vec<String>,
    pub certificate_logical_id: String,
    pub default_root_object: String,
    /// served with a 404 for missing objects. only needed for origins that
    /// don't apply the bucket's website configuration themselves.
    pub error_document: Option<String>,
    pub logging: Option<DistributionLogging>,
    pub price_class: PriceClass,
}

impl CfnResource for CloudfrontDistribution {
    fn type_string(&self) -> &'static str {
        "AWS::CloudFront::Distribution"
    }
    fn properties(&self) -> Value {
        let mut config = serde_json::Map::new();
        config.insert("Enabled".into(), Value::Bool(true));
        config.insert("Comment".into(), Value::String(self.comment.clone()));
        config.insert("Aliases".into(), json!(self.aliases));
        config.insert("DefaultRootObject".into(), Value::String(self.default_root_object.clone()));
        config.insert("HttpVersion".into(), json!("http2"));
        config.insert("IPV6Enabled".into(), Value::Bool(true));
        config.insert("PriceClass".into(), json!(self.price_class.as_str()));
        config.insert("Origins".into(), json!([self.origin.to_value()]));
        config.insert("DefaultCacheBehavior".into(), json!({
            "TargetOriginId": DEFAULT_ORIGIN_ID,
            "ViewerProtocolPolicy": VIEWER_PROTOCOL_POLICY,
            "AllowedMethods": ALLOWED_METHODS,
            "CachedMethods": ALLOWED_METHODS,
            "CachePolicyId": CACHING_OPTIMIZED_POLICY_ID,
            "Compress": true,
        }));
        config.insert("ViewerCertificate".into(), json!({
            "AcmCertificateArn": get_ref(&self.certificate_logical_id),
            "SslSupportMethod": "sni-only",
            "MinimumProtocolVersion": "TLSv1.2_2021",
        }));
        if let Some(document) = &self.error_document {
            let responses: Vec<Value> = ERROR_DOCUMENT_STATUS_CODES.iter().map(|code| json!({
                "ErrorCode": code,
                "ResponseCode": 404,
                "ResponsePagePath": format!("/{document}"),
                "ErrorCachingMinTTL": ERROR_CACHING_MIN_TTL_SECONDS,
            })).collect();
            config.insert("CustomErrorResponses".into(), Value::Array(responses));
        }
        if let Some(logging) = &self.logging {
            config.insert("Logging".into(), json!({
                "Bucket": get_att(&logging.bucket_logical_id, "RegionalDomainName"),
                "Prefix": logging.prefix,
                "IncludeCookies": false,
            }));
        }
        json!({ "DistributionConfig": config })
    }
    fn validate(&self) -> ConfigResult<()> {
        if self.aliases.is_empty() {
            return Err(ConfigError::InvalidDomainConfig("distribution must have at least one alias".into()));
        }
        if self.default_root_object.starts_with('/') {
            return Err(ConfigError::InvalidSiteConfig(format!(
                "default root object {:?} must not start with '/'", self.default_root_object
            )));
        }
        if let Some(document) = &self.error_document {
            if document.is_empty() || document.starts_with('/') {
                return Err(ConfigError::InvalidSiteConfig(format!(
                    "error document {:?} must be a key, not a path", document
                )));
            }
        }
        if let Some(logging) = &self.logging {
            if logging.prefix.starts_with('/') {
                return Err(ConfigError::InvalidSiteConfig(format!(
                    "distribution log prefix {:?} must not start with '/'", logging.prefix
                )));
            }
        }
        Ok(())
    }
}
