//! Deploying and destroying a hosted site.
//!
//! Configuration is checked and the asset folder is scanned before the first
//! call to the [`Provisioner`]. After that the order is: zone lookup, stack
//! create/update (certificate, distribution and record are ordered by the
//! engine through their references), asset upload, optional prune, and
//! finally the invalidation, which is only requested once every upload has
//! completed.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::assets::{AssetFile, AssetManifest};
use crate::error::{ConfigError, ConfigResult, DeployError, DeployResult};
use crate::parsing::validate_zone_name;
use crate::resources::{
    AssetDeployment, HostedSite, HostedZone, SiteProps, Stack, StackContext, Template, CLOUDFRONT_CERTIFICATE_REGION,
    OUTPUT_DOMAIN_NAME,
};

pub mod aws;

/// logical id prefix of the construct inside the stack.
pub const SITE_ID: &str = "HostedSite";

pub const MAX_CONCURRENT_UPLOADS: usize = 8;

/// The calls the deployer makes against the provisioning engine.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// find the public hosted zone with exactly this name.
    async fn lookup_zone(&self, zone_name: &str) -> DeployResult<HostedZone>;
    /// create or update the stack and wait for it to settle. returns the stack outputs.
    async fn deploy_stack(&self, stack_name: &str, template_body: &str) -> DeployResult<HashMap<String, String>>;
    /// delete the stack and wait until it is gone.
    async fn destroy_stack(&self, stack_name: &str) -> DeployResult<()>;
    async fn put_object(&self, bucket: &str, file: &AssetFile) -> DeployResult<()>;
    async fn list_objects(&self, bucket: &str) -> DeployResult<Vec<String>>;
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> DeployResult<()>;
    /// returns the invalidation id.
    async fn create_invalidation(
        &self,
        distribution_id: &str,
        paths: &[String],
        caller_reference: &str,
    ) -> DeployResult<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub domain_name: String,
    pub bucket_name: String,
    pub distribution_id: String,
    pub invalidation_id: String,
    pub uploaded: usize,
    pub pruned: usize,
    pub outputs: HashMap<String, String>,
}

/// Declares the site in a fresh stack and renders it.
pub fn synth_site(context: StackContext, props: SiteProps, zone: &HostedZone) -> ConfigResult<(HostedSite, Template)> {
    let mut stack = Stack::new(context);
    stack.description = Some(format!("Hosted site for {}", props.zone_name));
    let site = HostedSite::new(&mut stack, SITE_ID, props, zone)?;
    let template = stack.synth()?;
    Ok((site, template))
}

fn required_output(outputs: &HashMap<String, String>, stack: &str, key: &str) -> DeployResult<String> {
    outputs.get(key).cloned().ok_or_else(|| DeployError::MissingOutput {
        stack: stack.to_string(),
        output: key.to_string(),
    })
}

pub async fn upload_assets<P: Provisioner + ?Sized>(
    provisioner: &P,
    bucket: &str,
    manifest: &AssetManifest,
) -> DeployResult<usize> {
    info!(bucket, files = manifest.files.len(), bytes = manifest.total_size(), "uploading assets");
    let uploaded: Vec<()> = stream::iter(manifest.files.iter())
        .map(|file| async move {
            debug!(key = %file.key, content_type = file.content_type, "put object");
            provisioner.put_object(bucket, file).await
        })
        .buffer_unordered(MAX_CONCURRENT_UPLOADS)
        .try_collect()
        .await?;
    Ok(uploaded.len())
}

/// deletes every object in the bucket that is not part of the manifest.
pub async fn prune_objects<P: Provisioner + ?Sized>(
    provisioner: &P,
    bucket: &str,
    manifest: &AssetManifest,
) -> DeployResult<usize> {
    let local: BTreeSet<&str> = manifest.files.iter().map(|f| f.key.as_str()).collect();
    let stale: Vec<String> = provisioner.list_objects(bucket).await?
        .into_iter()
        .filter(|key| !local.contains(key.as_str()))
        .collect();
    if stale.is_empty() {
        return Ok(0);
    }
    info!(bucket, count = stale.len(), "pruning objects that no longer exist locally");
    provisioner.delete_objects(bucket, &stale).await?;
    Ok(stale.len())
}

static INVALIDATION_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// cloudfront returns the earlier invalidation when a caller reference is
/// reused, so content that returns to an older fingerprint still needs a new one.
pub fn invalidation_reference(stack_name: &str, fingerprint: u32) -> String {
    let millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    let sequence = INVALIDATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{stack_name}-{fingerprint:08x}-{millis}-{sequence}")
}

async fn deploy_assets<P: Provisioner + ?Sized>(
    provisioner: &P,
    deployment: &AssetDeployment,
    manifest: &AssetManifest,
    bucket: &str,
    distribution_id: &str,
    stack_name: &str,
) -> DeployResult<(usize, usize, String)> {
    let uploaded = upload_assets(provisioner, bucket, manifest).await?;
    let pruned = if deployment.prune {
        prune_objects(provisioner, bucket, manifest).await?
    } else {
        0
    };
    let caller_reference = invalidation_reference(stack_name, manifest.fingerprint);
    let invalidation_id = provisioner
        .create_invalidation(distribution_id, &deployment.distribution_paths, &caller_reference)
        .await?;
    info!(distribution_id, invalidation_id = %invalidation_id, paths = ?deployment.distribution_paths, "requested invalidation");
    Ok((uploaded, pruned, invalidation_id))
}

/// Full deploy: stack, then assets, then invalidation.
pub async fn deploy_site<P: Provisioner + ?Sized>(
    provisioner: &P,
    context: StackContext,
    props: SiteProps,
) -> DeployResult<DeployOutcome> {
    context.validate()?;
    if context.region != CLOUDFRONT_CERTIFICATE_REGION {
        return Err(ConfigError::InvalidStackContext(format!(
            "a hosted site must be deployed to {CLOUDFRONT_CERTIFICATE_REGION}, got {}", context.region
        )).into());
    }
    props.validate()?;
    let zone_name = validate_zone_name(&props.zone_name)?;
    let manifest = AssetManifest::scan(&props.web_asset_path)?;
    if manifest.files.is_empty() {
        warn!(path = %props.web_asset_path.display(), "web asset path contains no files");
    }

    let zone = provisioner.lookup_zone(&zone_name).await?;
    debug!(zone_id = %zone.id, zone_name = %zone.name, "found hosted zone");

    let stack_name = context.stack_name.clone();
    let (site, template) = synth_site(context, props, &zone)?;
    let body = template.to_json_pretty()?;
    info!(stack = %stack_name, resources = template.resources.len(), "deploying stack");
    let outputs = provisioner.deploy_stack(&stack_name, &body).await?;

    let deployment = &site.deployment;
    let bucket_name = required_output(&outputs, &stack_name, &deployment.bucket_output)?;
    let distribution_id = required_output(&outputs, &stack_name, &deployment.distribution_output)?;
    let (uploaded, pruned, invalidation_id) =
        deploy_assets(provisioner, deployment, &manifest, &bucket_name, &distribution_id, &stack_name).await?;

    let domain_name = outputs.get(OUTPUT_DOMAIN_NAME).cloned().unwrap_or_else(|| site.record_name.clone());
    info!(domain = %domain_name, uploaded, pruned, "site deployed");
    Ok(DeployOutcome {
        domain_name,
        bucket_name,
        distribution_id,
        invalidation_id,
        uploaded,
        pruned,
        outputs,
    })
}

/// Deletes the stack. The buckets are emptied by their cleanup resources.
pub async fn destroy_site<P: Provisioner + ?Sized>(provisioner: &P, context: &StackContext) -> DeployResult<()> {
    context.validate()?;
    info!(stack = %context.stack_name, "destroying stack");
    provisioner.destroy_stack(&context.stack_name).await?;
    info!(stack = %context.stack_name, "stack destroyed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{OUTPUT_BUCKET_NAME, OUTPUT_DISTRIBUTION_ID};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        LookupZone(String),
        DeployStack(String),
        DestroyStack(String),
        Put(String),
        List,
        Delete(Vec<String>),
        Invalidate(Vec<String>),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Call>>,
        template: Mutex<Option<String>>,
        caller_references: Mutex<Vec<String>>,
        existing_objects: Vec<String>,
        missing_zone: bool,
        omit_outputs: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Provisioner for Recorder {
        async fn lookup_zone(&self, zone_name: &str) -> DeployResult<HostedZone> {
            self.record(Call::LookupZone(zone_name.to_string()));
            if self.missing_zone {
                return Err(DeployError::ZoneNotFound(zone_name.to_string()));
            }
            Ok(HostedZone::new("/hostedzone/ZTEST", &format!("{zone_name}.")))
        }
        async fn deploy_stack(&self, stack_name: &str, template_body: &str) -> DeployResult<HashMap<String, String>> {
            self.record(Call::DeployStack(stack_name.to_string()));
            *self.template.lock().unwrap() = Some(template_body.to_string());
            let mut outputs = HashMap::new();
            if !self.omit_outputs {
                outputs.insert(OUTPUT_BUCKET_NAME.to_string(), "site-bucket-123".to_string());
                outputs.insert(OUTPUT_DISTRIBUTION_ID.to_string(), "E123".to_string());
                outputs.insert(OUTPUT_DOMAIN_NAME.to_string(), "test.example.com".to_string());
            }
            Ok(outputs)
        }
        async fn destroy_stack(&self, stack_name: &str) -> DeployResult<()> {
            self.record(Call::DestroyStack(stack_name.to_string()));
            Ok(())
        }
        async fn put_object(&self, bucket: &str, file: &AssetFile) -> DeployResult<()> {
            assert_eq!(bucket, "site-bucket-123");
            tokio::task::yield_now().await;
            self.record(Call::Put(file.key.clone()));
            Ok(())
        }
        async fn list_objects(&self, _bucket: &str) -> DeployResult<Vec<String>> {
            self.record(Call::List);
            Ok(self.existing_objects.clone())
        }
        async fn delete_objects(&self, _bucket: &str, keys: &[String]) -> DeployResult<()> {
            self.record(Call::Delete(keys.to_vec()));
            Ok(())
        }
        async fn create_invalidation(&self, distribution_id: &str, paths: &[String], caller_reference: &str) -> DeployResult<String> {
            assert_eq!(distribution_id, "E123");
            assert!(caller_reference.starts_with("test-site-"));
            self.caller_references.lock().unwrap().push(caller_reference.to_string());
            self.record(Call::Invalidate(paths.to_vec()));
            Ok("I123".to_string())
        }
    }

    fn assets() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("img")).unwrap();
        for name in ["index.html", "404.html", "app.js", "img/logo.png"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }
        dir
    }

    fn context() -> StackContext {
        StackContext::new("test-site", "us-east-1")
    }

    #[tokio::test]
    async fn deploy_uploads_before_invalidating() {
        let dir = assets();
        let provisioner = Recorder::default();
        let props = SiteProps::new("example.com", dir.path()).sub_domain("test");
        let outcome = deploy_site(&provisioner, context(), props).await.unwrap();

        assert_eq!(outcome.domain_name, "test.example.com");
        assert_eq!(outcome.uploaded, 4);
        assert_eq!(outcome.pruned, 0);
        assert_eq!(outcome.invalidation_id, "I123");

        let calls = provisioner.calls();
        assert_eq!(calls[0], Call::LookupZone("example.com".into()));
        assert_eq!(calls[1], Call::DeployStack("test-site".into()));
        let invalidation = calls.iter().position(|c| matches!(c, Call::Invalidate(_))).unwrap();
        assert_eq!(invalidation, calls.len() - 1);
        let puts: Vec<_> = calls.iter().enumerate().filter(|(_, c)| matches!(c, Call::Put(_))).collect();
        assert_eq!(puts.len(), 4);
        assert!(puts.iter().all(|(i, _)| *i < invalidation));
        assert_eq!(calls[invalidation], Call::Invalidate(vec!["/*".into()]));
    }

    #[tokio::test]
    async fn every_deploy_gets_its_own_invalidation() {
        let dir = assets();
        let provisioner = Recorder::default();
        let mut fingerprints = vec![];
        for content in ["v1", "v2", "v1"] {
            std::fs::write(dir.path().join("index.html"), content).unwrap();
            fingerprints.push(AssetManifest::scan(dir.path()).unwrap().fingerprint);
            deploy_site(&provisioner, context(), SiteProps::new("example.com", dir.path())).await.unwrap();
        }
        assert_eq!(fingerprints[0], fingerprints[2]);

        let refs = provisioner.caller_references.lock().unwrap().clone();
        assert_eq!(refs.len(), 3);
        let unique: BTreeSet<_> = refs.iter().collect();
        assert_eq!(unique.len(), 3);
        assert!(refs[0].starts_with(&format!("test-site-{:08x}-", fingerprints[0])));
        assert!(refs[2].starts_with(&format!("test-site-{:08x}-", fingerprints[0])));
    }

    #[tokio::test]
    async fn deployed_template_targets_looked_up_zone() {
        let dir = assets();
        let provisioner = Recorder::default();
        deploy_site(&provisioner, context(), SiteProps::new("example.com", dir.path())).await.unwrap();
        let body = provisioner.template.lock().unwrap().clone().unwrap();
        let template: Template = serde_json::from_str(&body).unwrap();
        let (_, record) = template.resources_of_type("AWS::Route53::RecordSet").next().unwrap();
        assert_eq!(record.properties["HostedZoneId"], "ZTEST");
        assert_eq!(record.properties["Name"], "example.com.");
        assert_eq!(template.description.as_deref(), Some("Hosted site for example.com"));
    }

    #[tokio::test]
    async fn prune_removes_only_stale_objects() {
        let dir = assets();
        let provisioner = Recorder {
            existing_objects: vec!["index.html".into(), "old/page.html".into(), "img/logo.png".into()],
            ..Default::default()
        };
        let outcome = deploy_site(&provisioner, context(), SiteProps::new("example.com", dir.path())).await.unwrap();
        assert_eq!(outcome.pruned, 1);
        let calls = provisioner.calls();
        assert!(calls.contains(&Call::Delete(vec!["old/page.html".into()])));

        let provisioner = Recorder {
            existing_objects: vec!["old/page.html".into()],
            ..Default::default()
        };
        let mut props = SiteProps::new("example.com", dir.path());
        props.prune = false;
        deploy_site(&provisioner, context(), props).await.unwrap();
        assert!(!provisioner.calls().contains(&Call::List));
    }

    #[tokio::test]
    async fn invalid_config_makes_no_calls() {
        let dir = assets();
        let provisioner = Recorder::default();

        let err = deploy_site(&provisioner, context(), SiteProps::new("example.com", dir.path()).sub_domain("")).await.unwrap_err();
        assert!(matches!(err, DeployError::Config(ConfigError::InvalidDomainConfig(_))));

        let err = deploy_site(&provisioner, context(), SiteProps::new("example.com", dir.path().join("nope"))).await.unwrap_err();
        assert!(matches!(err, DeployError::Config(ConfigError::AssetPathNotFound(_))));

        let err = deploy_site(&provisioner, StackContext::new("bad_name", "us-east-1"), SiteProps::new("example.com", dir.path())).await.unwrap_err();
        assert!(matches!(err, DeployError::Config(ConfigError::InvalidStackContext(_))));

        let err = deploy_site(&provisioner, StackContext::new("test-site", "eu-west-1"), SiteProps::new("example.com", dir.path())).await.unwrap_err();
        assert!(matches!(err, DeployError::Config(ConfigError::InvalidStackContext(_))));

        assert!(provisioner.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_zone_stops_the_deploy() {
        let dir = assets();
        let provisioner = Recorder { missing_zone: true, ..Default::default() };
        let err = deploy_site(&provisioner, context(), SiteProps::new("example.com", dir.path())).await.unwrap_err();
        assert!(matches!(err, DeployError::ZoneNotFound(_)));
        assert_eq!(provisioner.calls(), vec![Call::LookupZone("example.com".into())]);
    }

    #[tokio::test]
    async fn missing_outputs_are_reported() {
        let dir = assets();
        let provisioner = Recorder { omit_outputs: true, ..Default::default() };
        let err = deploy_site(&provisioner, context(), SiteProps::new("example.com", dir.path())).await.unwrap_err();
        assert!(matches!(err, DeployError::MissingOutput { .. }));
        assert!(!provisioner.calls().iter().any(|c| matches!(c, Call::Put(_))));
    }

    #[tokio::test]
    async fn destroy_deletes_the_stack() {
        let provisioner = Recorder::default();
        destroy_site(&provisioner, &context()).await.unwrap();
        assert_eq!(provisioner.calls(), vec![Call::DestroyStack("test-site".into())]);
    }

    #[test]
    fn synth_is_deterministic() {
        let dir = assets();
        let zone = HostedZone::new("Z1", "example.com");
        let (_, a) = synth_site(context(), SiteProps::new("example.com", dir.path()), &zone).unwrap();
        let (_, b) = synth_site(context(), SiteProps::new("example.com", dir.path()), &zone).unwrap();
        assert_eq!(a.to_json_pretty().unwrap(), b.to_json_pretty().unwrap());
    }
}
