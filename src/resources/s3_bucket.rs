use super::*;

use crate::parsing::validate_bucket_name;

/// s3 buckets in cloudformation cannot be deleted if they contain objects.
/// this function empties the bucket (every version and delete marker) when the
/// custom resource is deleted, which happens before the bucket itself is deleted.
/// a bucket rename replaces the bucket, so an update that changes the name
/// empties the old one before cloudformation cleans it up.
pub const AUTO_DELETE_OBJECTS_CODE: &str = r#"const { S3Client, ListObjectVersionsCommand, DeleteObjectsCommand } = require('@aws-sdk/client-s3');
const response = require('cfn-response');
const s3 = new S3Client({});
async function emptyBucket(bucket) {
    let params = { Bucket: bucket };
    for (;;) {
        const page = await s3.send(new ListObjectVersionsCommand(params));
        const objects = [...(page.Versions || []), ...(page.DeleteMarkers || [])]
            .map(v => ({ Key: v.Key, VersionId: v.VersionId }));
        if (objects.length > 0) {
            await s3.send(new DeleteObjectsCommand({ Bucket: bucket, Delete: { Objects: objects, Quiet: true } }));
        }
        if (!page.IsTruncated) return;
        params = { Bucket: bucket, KeyMarker: page.NextKeyMarker, VersionIdMarker: page.NextVersionIdMarker };
    }
}
function bucketToEmpty(event) {
    const bucket = event.ResourceProperties.BucketName;
    if (event.RequestType === 'Delete') return bucket;
    const old = (event.OldResourceProperties || {}).BucketName;
    if (event.RequestType === 'Update' && old && old !== bucket) return old;
}
exports.handler = async function(event, context) {
    let status = response.SUCCESS;
    const bucket = bucketToEmpty(event);
    if (bucket) {
        try {
            await emptyBucket(bucket);
        } catch (err) {
            if (err.name !== 'NoSuchBucket') {
                console.log(`Error emptying bucket: ${err}`);
                status = response.FAILED;
            }
        }
    }
    await new Promise(resolve => {
        context.done = resolve;
        response.send(event, context, status, {}, event.PhysicalResourceId || event.LogicalResourceId);
    });
};
"#;

pub const AUTO_DELETE_RESOURCE_TYPE: &str = "Custom::S3AutoDeleteObjects";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebsiteConfig {
    pub index_document: String,
    pub error_document: String,
}

impl Default for WebsiteConfig {
    fn default() -> Self {
        Self {
            index_document: "index.html".into(),
            error_document: "index.html".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogging {
    pub destination_logical_id: String,
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Bucket {
    /// physical name. None lets cloudformation pick a unique one.
    pub name: Option<String>,
    pub website: Option<WebsiteConfig>,
    pub versioned: bool,
    pub access_logging: Option<AccessLogging>,
    /// cloudfront standard logging writes through ACLs, which requires
    /// BucketOwnerPreferred. every other bucket disables ACLs.
    pub object_ownership: &'static str,
    /// only true for buckets that hand out objects through a public bucket policy.
    pub allow_public_policy: bool,
}

impl Default for S3Bucket {
    fn default() -> Self {
        Self {
            name: None,
            website: None,
            versioned: false,
            access_logging: None,
            object_ownership: "BucketOwnerEnforced",
            allow_public_policy: false,
        }
    }
}

impl CfnResource for S3Bucket {
    fn type_string(&self) -> &'static str {
        "AWS::S3::Bucket"
    }
    fn properties(&self) -> Value {
        let mut props = serde_json::Map::new();
        if let Some(name) = &self.name {
            props.insert("BucketName".into(), Value::String(name.clone()));
        }
        props.insert("BucketEncryption".into(), json!({
            "ServerSideEncryptionConfiguration": [{
                "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" },
            }],
        }));
        if self.versioned {
            props.insert("VersioningConfiguration".into(), json!({ "Status": "Enabled" }));
        }
        if let Some(website) = &self.website {
            props.insert("WebsiteConfiguration".into(), json!({
                "IndexDocument": website.index_document,
                "ErrorDocument": website.error_document,
            }));
        }
        if let Some(logging) = &self.access_logging {
            let mut conf = serde_json::Map::new();
            conf.insert("DestinationBucketName".into(), get_ref(&logging.destination_logical_id));
            if let Some(prefix) = &logging.prefix {
                conf.insert("LogFilePrefix".into(), Value::String(prefix.clone()));
            }
            props.insert("LoggingConfiguration".into(), Value::Object(conf));
        }
        props.insert("OwnershipControls".into(), json!({
            "Rules": [{ "ObjectOwnership": self.object_ownership }],
        }));
        let block_policy = !self.allow_public_policy;
        props.insert("PublicAccessBlockConfiguration".into(), json!({
            "BlockPublicAcls": true,
            "IgnorePublicAcls": true,
            "BlockPublicPolicy": block_policy,
            "RestrictPublicBuckets": block_policy,
        }));
        Value::Object(props)
    }
    fn validate(&self) -> ConfigResult<()> {
        if let Some(name) = &self.name {
            validate_bucket_name(name)?;
        }
        if let Some(website) = &self.website {
            if website.index_document.is_empty() || website.error_document.is_empty() {
                return Err(ConfigError::InvalidSiteConfig(
                    "website index and error documents must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

pub struct BucketPolicy {
    pub bucket_logical_id: String,
    pub statements: Vec<PolicyStatement>,
}

impl CfnResource for BucketPolicy {
    fn type_string(&self) -> &'static str {
        "AWS::S3::BucketPolicy"
    }
    fn properties(&self) -> Value {
        json!({
            "Bucket": get_ref(&self.bucket_logical_id),
            "PolicyDocument": policy_document(&self.statements),
        })
    }
}

pub fn bucket_arn(bucket_logical_id: &str) -> Value {
    get_att(bucket_logical_id, "Arn")
}

pub fn bucket_objects_arn(bucket_logical_id: &str) -> Value {
    sub(&format!("${{{bucket_logical_id}.Arn}}/*"))
}

/// adds the bucket with a Delete removal policy and attaches the cleanup
/// custom resource so the stack can be torn down while the bucket still has objects.
pub fn add_destroyable_bucket(stack: &mut Stack, logical_id: &str, bucket: S3Bucket) -> ConfigResult<CustomResourceIds> {
    stack.add_resource(Resource::new(logical_id, bucket).deletion_policy(DeletionPolicy::Delete))?;
    let mut props = serde_json::Map::new();
    props.insert("BucketName".into(), get_ref(logical_id));
    add_custom_resource(
        stack,
        &format!("{logical_id}AutoDeleteObjects"),
        AUTO_DELETE_RESOURCE_TYPE,
        &format!("empties {logical_id} before it is deleted"),
        AUTO_DELETE_OBJECTS_CODE,
        vec![
            PolicyStatement::allow(
                &["s3:ListBucket", "s3:ListBucketVersions", "s3:GetBucketVersioning"],
                vec![bucket_arn(logical_id)],
            ),
            PolicyStatement::allow(
                &["s3:DeleteObject", "s3:DeleteObjectVersion"],
                vec![bucket_objects_arn(logical_id)],
            ),
        ],
        props,
    )
}

/// write-only policy for the s3 server access log delivery service.
pub fn server_access_log_policy(
    log_bucket_logical_id: &str,
    source_bucket_logical_id: &str,
    account: Value,
) -> BucketPolicy {
    BucketPolicy {
        bucket_logical_id: log_bucket_logical_id.to_string(),
        statements: vec![
            PolicyStatement::allow(&["s3:PutObject"], vec![bucket_objects_arn(log_bucket_logical_id)])
                .principal(json!({ "Service": "logging.s3.amazonaws.com" }))
                .condition(json!({
                    "ArnLike": { "aws:SourceArn": bucket_arn(source_bucket_logical_id) },
                    "StringEquals": { "aws:SourceAccount": account },
                })),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_always_encrypted() {
        let props = S3Bucket::default().properties();
        assert_eq!(
            props["BucketEncryption"]["ServerSideEncryptionConfiguration"][0]["ServerSideEncryptionByDefault"]["SSEAlgorithm"],
            "AES256"
        );
        assert!(props.get("VersioningConfiguration").is_none());
        assert!(props.get("WebsiteConfiguration").is_none());
        assert!(props.get("BucketName").is_none());
        assert_eq!(props["PublicAccessBlockConfiguration"]["BlockPublicPolicy"], true);
    }

    #[test]
    fn website_bucket_properties() {
        let bucket = S3Bucket {
            website: Some(WebsiteConfig::default()),
            versioned: true,
            access_logging: Some(AccessLogging { destination_logical_id: "Logs".into(), prefix: None }),
            allow_public_policy: true,
            ..Default::default()
        };
        let props = bucket.properties();
        assert_eq!(props["WebsiteConfiguration"], json!({ "IndexDocument": "index.html", "ErrorDocument": "index.html" }));
        assert_eq!(props["VersioningConfiguration"]["Status"], "Enabled");
        assert_eq!(props["LoggingConfiguration"], json!({ "DestinationBucketName": { "Ref": "Logs" } }));
        assert_eq!(props["PublicAccessBlockConfiguration"]["BlockPublicPolicy"], false);
    }

    #[test]
    fn explicit_bucket_names_are_validated() {
        let bucket = S3Bucket { name: Some("Not_Valid".into()), ..Default::default() };
        assert!(matches!(bucket.validate(), Err(ConfigError::InvalidBucketName { .. })));
        let bucket = S3Bucket { name: Some("my-site-bucket".into()), ..Default::default() };
        assert!(bucket.validate().is_ok());
        assert_eq!(bucket.properties()["BucketName"], "my-site-bucket");
    }

    #[test]
    fn destroyable_bucket_gets_cleanup_resources() {
        let mut stack = Stack::new(StackContext::new("s", "us-east-1"));
        let ids = add_destroyable_bucket(&mut stack, "SiteBucket", S3Bucket::default()).unwrap();
        let template = stack.synth().unwrap();
        assert_eq!(template.resources["SiteBucket"].deletion_policy, Some(DeletionPolicy::Delete));
        assert_eq!(template.resources["SiteBucket"].update_replace_policy, Some(DeletionPolicy::Delete));
        let cleanup = &template.resources[&ids.resource];
        assert_eq!(cleanup.ty, AUTO_DELETE_RESOURCE_TYPE);
        assert_eq!(cleanup.properties["BucketName"], json!({ "Ref": "SiteBucket" }));
        // the cleanup resource has to come after the bucket so it is deleted before it
        let order = stack.creation_order().unwrap();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(pos("SiteBucket") < pos(&ids.resource));
    }

    #[test]
    fn cleanup_empties_renamed_buckets() {
        assert!(AUTO_DELETE_OBJECTS_CODE.contains("event.RequestType === 'Update'"));
        assert!(AUTO_DELETE_OBJECTS_CODE.contains("OldResourceProperties"));
        let function = InlineFunction {
            description: "empty bucket".into(),
            role_logical_id: "Role".into(),
            code: AUTO_DELETE_OBJECTS_CODE,
            timeout_seconds: 900,
        };
        assert!(function.validate().is_ok());
    }

    #[test]
    fn log_policy_is_write_only() {
        let policy = server_access_log_policy("Logs", "Site", json!("123456789012"));
        let props = policy.properties();
        let statement = &props["PolicyDocument"]["Statement"][0];
        assert_eq!(statement["Action"], "s3:PutObject");
        assert_eq!(statement["Principal"]["Service"], "logging.s3.amazonaws.com");
        assert_eq!(statement["Condition"]["StringEquals"]["aws:SourceAccount"], "123456789012");
    }
}
